use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::pin::Pin;
use crate::review::{ReviewState, ReviewTiming};

pub const BLUEPRINT_COLUMNS: &str = "blueprints.id, blueprints.project_id, blueprints.file_path, blueprints.file_name, blueprints.file_type, blueprints.file_size, blueprints.checksum, blueprints.width, blueprints.height, blueprints.review_status, blueprints.review_deadline, blueprints.reviewed_by, blueprints.reviewed_at, blueprints.review_notes, blueprints.uploaded_by, blueprints.uploaded_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Blueprint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub checksum: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub review: ReviewState,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BlueprintDetail {
    #[serde(flatten)]
    pub blueprint: Blueprint,
    #[serde(flatten)]
    pub timing: ReviewTiming,
    pub pins: Vec<Pin>,
}

/// Multipart body accepted by the blueprint upload route.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct BlueprintUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}
