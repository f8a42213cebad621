use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

pub const PIN_COLUMNS: &str = "pins.id, pins.blueprint_id, pins.x, pins.y, pins.label, pins.created_by, pins.created_at";

/// Marker on a blueprint. Coordinates are fractions of the sheet size.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Pin {
    pub id: Uuid,
    pub blueprint_id: Uuid,
    #[schema(example = 0.25)]
    pub x: f64,
    #[schema(example = 0.6)]
    pub y: f64,
    pub label: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PinCreateRequest {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PinUpdateRequest {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub label: Option<String>,
}

pub fn validate_coordinate(axis: &str, value: f64) -> AppResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AppError::validation(format!("{axis} must be between 0 and 1, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_bounded_inclusive() {
        assert!(validate_coordinate("x", 0.0).is_ok());
        assert!(validate_coordinate("x", 1.0).is_ok());
        assert!(validate_coordinate("y", -0.01).is_err());
        assert!(validate_coordinate("y", 1.5).is_err());
        assert!(validate_coordinate("y", f64::NAN).is_err());
    }
}
