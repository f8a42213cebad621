use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const TASK_COLUMNS: &str = "tasks.id, tasks.project_id, tasks.pin_id, tasks.department_id, tasks.assigned_to, tasks.title, tasks.description, tasks.status, tasks.priority, tasks.due_date, tasks.estimated_hours, tasks.actual_hours, tasks.started_at, tasks.completed_at, tasks.created_by, tasks.created_at, tasks.updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Delayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub pin_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[schema(example = "2026-04-15")]
    pub due_date: Option<NaiveDate>,
    pub estimated_hours: Option<f64>,
    /// Sum of logged time entries; absent until the first entry.
    pub actual_hours: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Move to `status`, stamping `started_at` and `completed_at` the first
    /// time the task enters `IN_PROGRESS` and `COMPLETED`.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            TaskStatus::InProgress if self.started_at.is_none() => self.started_at = Some(now),
            TaskStatus::Completed if self.completed_at.is_none() => self.completed_at = Some(now),
            _ => {}
        }
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != TaskStatus::Completed && self.due_date.is_some_and(|due| due < today)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    pub project_id: Uuid,
    pub pin_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    #[schema(example = "Pour level 3 slab")]
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<NaiveDate>,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub pin_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<NaiveDate>,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct TaskFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<Uuid>,
    pub department_id: Option<Uuid>,
}

/// `None` or a finite, non-negative number of hours.
pub fn check_estimate(hours: Option<f64>) -> Result<(), &'static str> {
    match hours {
        Some(hours) if !hours.is_finite() || hours < 0.0 => Err("estimated_hours must be a non-negative number"),
        _ => Ok(()),
    }
}

/// Counts over every task the caller can see.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TaskStatistics {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub delayed: i64,
    pub overdue: i64,
    pub total_estimated_hours: f64,
    pub total_actual_hours: f64,
}

pub const TIME_ENTRY_COLUMNS: &str = "time_entries.id, time_entries.task_id, time_entries.user_id, time_entries.hours, time_entries.date, time_entries.notes, time_entries.created_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TimeEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub hours: f64,
    #[schema(example = "2026-04-15")]
    pub date: NaiveDate,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogTimeRequest {
    #[schema(example = 3.5)]
    pub hours: f64,
    /// Defaults to today (UTC).
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl LogTimeRequest {
    pub const MAX_HOURS: f64 = 24.0;

    pub fn check(&self) -> Result<(), &'static str> {
        if !self.hours.is_finite() || self.hours <= 0.0 || self.hours > Self::MAX_HOURS {
            return Err("hours must be greater than 0 and at most 24");
        }
        Ok(())
    }
}

pub const COMMENT_COLUMNS: &str = "task_comments.id, task_comments.task_id, task_comments.user_id, task_comments.content, task_comments.created_at, task_comments.updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    #[schema(example = "Formwork inspected, ready to pour")]
    pub content: String,
}

pub const ATTACHMENT_COLUMNS: &str = "task_attachments.id, task_attachments.task_id, task_attachments.file_path, task_attachments.file_name, task_attachments.file_type, task_attachments.file_size, task_attachments.checksum, task_attachments.uploaded_by, task_attachments.uploaded_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TaskAttachment {
    pub id: Uuid,
    pub task_id: Uuid,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub checksum: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

/// Multipart form for `POST /tasks/{id}/attachments`.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct AttachmentUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn task() -> Task {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        Task {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            pin_id: None,
            department_id: None,
            assigned_to: None,
            title: "Pour slab".into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date: NaiveDate::from_ymd_opt(2026, 3, 10),
            estimated_hours: None,
            actual_hours: None,
            started_at: None,
            completed_at: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn timestamps_are_set_once() {
        let mut task = task();
        let t1 = task.created_at + Duration::hours(1);
        let t2 = t1 + Duration::hours(1);

        task.set_status(TaskStatus::InProgress, t1);
        task.set_status(TaskStatus::Delayed, t2);
        task.set_status(TaskStatus::InProgress, t2);
        assert_eq!(task.started_at, Some(t1));

        task.set_status(TaskStatus::Completed, t1);
        task.set_status(TaskStatus::InProgress, t2);
        task.set_status(TaskStatus::Completed, t2);
        assert_eq!(task.completed_at, Some(t1));
        assert_eq!(task.started_at, Some(t1));
    }

    #[test]
    fn completed_tasks_are_never_overdue() {
        let mut task = task();
        let after_due = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert!(task.is_overdue(after_due));
        assert!(!task.is_overdue(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()));

        task.set_status(TaskStatus::Completed, task.created_at);
        assert!(!task.is_overdue(after_due));
    }

    #[test]
    fn logged_hours_stay_within_a_day() {
        let entry = |hours| LogTimeRequest {
            hours,
            date: None,
            notes: None,
        };
        assert!(entry(7.5).check().is_ok());
        assert!(entry(24.0).check().is_ok());
        assert!(entry(0.0).check().is_err());
        assert!(entry(-1.0).check().is_err());
        assert!(entry(24.5).check().is_err());
        assert!(entry(f64::NAN).check().is_err());
    }

    #[test]
    fn estimates_must_be_non_negative() {
        assert!(check_estimate(None).is_ok());
        assert!(check_estimate(Some(0.0)).is_ok());
        assert!(check_estimate(Some(-2.0)).is_err());
        assert!(check_estimate(Some(f64::INFINITY)).is_err());
    }
}
