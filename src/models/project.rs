use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::review::ReviewStatus;

pub const PROJECT_COLUMNS: &str = "projects.id, projects.company_id, projects.contractor_id, projects.consultant_id, projects.name, projects.description, projects.address, projects.status, projects.start_date, projects.end_date, projects.estimated_budget, projects.actual_budget, projects.created_by, projects.created_at, projects.updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Planning,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub company_id: Uuid,
    pub contractor_id: Option<Uuid>,
    pub consultant_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub address: String,
    pub status: ProjectStatus,
    #[schema(example = "2026-03-01")]
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub estimated_budget: Option<f64>,
    pub actual_budget: Option<f64>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    /// Required for superusers; everyone else creates inside their own company.
    pub company_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub consultant_id: Option<Uuid>,
    #[schema(example = "Harbour Tower")]
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub status: Option<ProjectStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub estimated_budget: Option<f64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    pub contractor_id: Option<Uuid>,
    pub consultant_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub status: Option<ProjectStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub estimated_budget: Option<f64>,
    pub actual_budget: Option<f64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub company_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectStatistics {
    pub project_id: Uuid,
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub completed_tasks: i64,
    pub delayed_tasks: i64,
    pub overdue_tasks: i64,
    /// Completed over total, 0 to 100.
    pub completion_percentage: f64,
    pub total_documents: i64,
    pub pending_documents: i64,
    pub approved_documents: i64,
    pub blueprint_status: Option<ReviewStatus>,
}

impl ProjectStatistics {
    pub fn completion(completed: i64, total: i64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (completed as f64 * 10_000.0 / total as f64).round() / 100.0
    }
}
