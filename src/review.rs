//! Review lifecycle shared by documents and blueprints.
//!
//! `PENDING` is the only open state. Approve, reject and request-modification
//! close a cycle; a fresh upload opens a new one with a new deadline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::PermissionAction;
use crate::errors::{AppError, AppResult};
use crate::events::{publish, EventBus, WorkflowEvent};
use crate::utils::utc_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    ModificationRequested,
    Expired,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Approved => "APPROVED",
            ReviewStatus::Rejected => "REJECTED",
            ReviewStatus::ModificationRequested => "MODIFICATION_REQUESTED",
            ReviewStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestModification,
}

impl ReviewAction {
    pub fn target(self) -> ReviewStatus {
        match self {
            ReviewAction::Approve => ReviewStatus::Approved,
            ReviewAction::Reject => ReviewStatus::Rejected,
            ReviewAction::RequestModification => ReviewStatus::ModificationRequested,
        }
    }

    /// Permission bit a reviewer needs; asking for changes is a soft rejection.
    pub fn permission(self) -> PermissionAction {
        match self {
            ReviewAction::Approve => PermissionAction::Approve,
            ReviewAction::Reject | ReviewAction::RequestModification => PermissionAction::Reject,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReviewRequest {
    #[schema(example = "Section 4 needs the revised load calculation")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ReviewState {
    pub review_status: ReviewStatus,
    pub review_deadline: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: String,
}

impl ReviewState {
    /// A new cycle starting at `now`.
    pub fn open(now: DateTime<Utc>, window_days: i64) -> Self {
        Self {
            review_status: ReviewStatus::Pending,
            review_deadline: Some(now + chrono::Duration::days(window_days)),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: String::new(),
        }
    }

    /// Discard the previous cycle, including its deadline.
    pub fn reopen(&mut self, now: DateTime<Utc>, window_days: i64) {
        *self = Self::open(now, window_days);
    }

    /// Close the cycle. Only valid from `PENDING`; the state is untouched on
    /// failure. Returns the status the cycle left.
    pub fn apply(
        &mut self,
        action: ReviewAction,
        reviewer: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<ReviewStatus> {
        if self.review_status != ReviewStatus::Pending {
            return Err(AppError::invalid_transition(format!(
                "cannot {} from {}",
                match action {
                    ReviewAction::Approve => "approve",
                    ReviewAction::Reject => "reject",
                    ReviewAction::RequestModification => "request modification",
                },
                self.review_status.as_str()
            )));
        }

        let from = self.review_status;
        self.review_status = action.target();
        self.reviewed_by = Some(reviewer);
        self.reviewed_at = Some(now);
        self.review_notes = notes.unwrap_or_default();
        Ok(from)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match (self.review_status, self.review_deadline) {
            (ReviewStatus::Pending, Some(deadline)) => now > deadline,
            _ => false,
        }
    }

    /// Whole days left, floored at zero. `None` without a deadline.
    pub fn days_until_deadline(&self, now: DateTime<Utc>) -> Option<i64> {
        self.review_deadline
            .map(|deadline| (deadline - now).num_days().max(0))
    }

    pub fn timing(&self, now: DateTime<Utc>) -> ReviewTiming {
        ReviewTiming {
            is_overdue: self.is_overdue(now),
            days_until_deadline: self.days_until_deadline(now),
        }
    }
}

/// Deadline figures computed at response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReviewTiming {
    pub is_overdue: bool,
    pub days_until_deadline: Option<i64>,
}

#[derive(Debug, FromRow)]
struct PendingRow {
    id: Uuid,
    project_id: Uuid,
    title: String,
    uploaded_by: Option<Uuid>,
    review_deadline: Option<DateTime<Utc>>,
}

impl PendingRow {
    fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        ReviewState {
            review_status: ReviewStatus::Pending,
            review_deadline: self.review_deadline,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: String::new(),
        }
        .is_overdue(now)
    }
}

/// Move every pending document and blueprint past its deadline to `EXPIRED`.
pub async fn expire_overdue(pool: &SqlitePool, now: DateTime<Utc>) -> AppResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();

    let documents = sqlx::query_as::<_, PendingRow>(
        "SELECT id, project_id, title, uploaded_by, review_deadline FROM documents WHERE review_status = 'PENDING' AND review_deadline IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    for row in documents.into_iter().filter(|row| row.is_overdue(now)) {
        let result = sqlx::query(
            "UPDATE documents SET review_status = 'EXPIRED', updated_at = ? WHERE id = ? AND review_status = 'PENDING'",
        )
        .bind(now)
        .bind(row.id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            events.push(WorkflowEvent::DocumentReviewed {
                document_id: row.id,
                project_id: row.project_id,
                title: row.title,
                from: ReviewStatus::Pending,
                to: ReviewStatus::Expired,
                uploaded_by: row.uploaded_by,
            });
        }
    }

    let blueprints = sqlx::query_as::<_, PendingRow>(
        "SELECT b.id, b.project_id, p.name AS title, b.uploaded_by, b.review_deadline FROM blueprints b JOIN projects p ON p.id = b.project_id WHERE b.review_status = 'PENDING' AND b.review_deadline IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    for row in blueprints.into_iter().filter(|row| row.is_overdue(now)) {
        let result = sqlx::query("UPDATE blueprints SET review_status = 'EXPIRED' WHERE id = ? AND review_status = 'PENDING'")
            .bind(row.id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 1 {
            events.push(WorkflowEvent::BlueprintReviewed {
                blueprint_id: row.id,
                project_id: row.project_id,
                project_name: row.title,
                from: ReviewStatus::Pending,
                to: ReviewStatus::Expired,
                uploaded_by: row.uploaded_by,
            });
        }
    }

    if !events.is_empty() {
        tracing::info!(expired = events.len(), "expired overdue reviews");
    }

    Ok(events)
}

/// Periodically run [`expire_overdue`] and publish what it produced.
pub async fn run_expiry_sweeper(pool: SqlitePool, bus: EventBus, every: Duration) {
    tracing::info!(interval_secs = every.as_secs(), "review expiry sweeper started");
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match expire_overdue(&pool, utc_now()).await {
            Ok(events) => publish(&bus, None, events),
            Err(err) => tracing::error!(error = %err, "review expiry sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn open_sets_deadline_from_window() {
        let state = ReviewState::open(t0(), 10);
        assert_eq!(state.review_status, ReviewStatus::Pending);
        assert_eq!(state.review_deadline, Some(t0() + Duration::days(10)));
    }

    #[test]
    fn overdue_boundary_is_strict() {
        let state = ReviewState::open(t0(), 10);
        let deadline = state.review_deadline.unwrap();
        assert!(!state.is_overdue(deadline - Duration::seconds(1)));
        assert!(!state.is_overdue(deadline));
        assert!(state.is_overdue(deadline + Duration::seconds(1)));
    }

    #[test]
    fn closed_cycles_are_never_overdue() {
        let mut state = ReviewState::open(t0(), 1);
        state.apply(ReviewAction::Approve, Uuid::new_v4(), None, t0()).unwrap();
        assert!(!state.is_overdue(t0() + Duration::days(30)));
    }

    #[test]
    fn transitions_only_from_pending() {
        let reviewer = Uuid::new_v4();
        let mut state = ReviewState::open(t0(), 10);
        let from = state
            .apply(ReviewAction::Reject, reviewer, Some("wrong scale".into()), t0())
            .unwrap();
        assert_eq!(from, ReviewStatus::Pending);
        assert_eq!(state.review_status, ReviewStatus::Rejected);
        assert_eq!(state.reviewed_by, Some(reviewer));
        assert_eq!(state.review_notes, "wrong scale");

        let before = state.clone();
        for action in [ReviewAction::Approve, ReviewAction::Reject, ReviewAction::RequestModification] {
            let err = state.apply(action, Uuid::new_v4(), None, t0()).unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition(_)));
        }
        assert_eq!(state, before);
    }

    #[test]
    fn reopen_discards_previous_cycle() {
        let mut state = ReviewState::open(t0(), 10);
        state
            .apply(ReviewAction::RequestModification, Uuid::new_v4(), Some("redo".into()), t0())
            .unwrap();

        let later = t0() + Duration::days(5);
        state.reopen(later, 10);
        assert_eq!(state.review_status, ReviewStatus::Pending);
        assert_eq!(state.review_deadline, Some(later + Duration::days(10)));
        assert_eq!(state.reviewed_by, None);
        assert_eq!(state.reviewed_at, None);
        assert!(state.review_notes.is_empty());
    }

    #[test]
    fn days_until_deadline_floors_at_zero() {
        let state = ReviewState::open(t0(), 10);
        assert_eq!(state.days_until_deadline(t0()), Some(10));
        assert_eq!(state.days_until_deadline(t0() + Duration::hours(36)), Some(8));
        assert_eq!(state.days_until_deadline(t0() + Duration::days(12)), Some(0));

        let mut no_deadline = state.clone();
        no_deadline.review_deadline = None;
        assert_eq!(no_deadline.days_until_deadline(t0()), None);
    }
}
