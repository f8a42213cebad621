use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::project::{ProjectStatistics, ProjectStatus};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ReportQuery {
    pub project_id: Option<Uuid>,
    /// Inclusive lower bound on time entry dates.
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound on time entry dates.
    pub end_date: Option<NaiveDate>,
}

/// Reports that can be downloaded through `/reports/{report}/export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    ProjectProgress,
    TimeTracking,
    BudgetVsActual,
    DocumentApprovalTimeline,
    DepartmentPerformance,
    DashboardSummary,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::ProjectProgress,
        ReportKind::TimeTracking,
        ReportKind::BudgetVsActual,
        ReportKind::DocumentApprovalTimeline,
        ReportKind::DepartmentPerformance,
        ReportKind::DashboardSummary,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ReportKind::ProjectProgress => "project-progress",
            ReportKind::TimeTracking => "time-tracking",
            ReportKind::BudgetVsActual => "budget-vs-actual",
            ReportKind::DocumentApprovalTimeline => "document-approval-timeline",
            ReportKind::DepartmentPerformance => "department-performance",
            ReportKind::DashboardSummary => "dashboard-summary",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == raw)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectProgress {
    pub project_id: Uuid,
    pub project_name: String,
    pub status: ProjectStatus,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    #[schema(example = 62.5)]
    pub progress_percentage: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskHours {
    pub task_id: Uuid,
    pub task_title: String,
    pub total_hours: f64,
    pub entry_count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectHours {
    pub project_id: Uuid,
    pub project_name: String,
    pub total_hours: f64,
    pub entry_count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TimeTrackingReport {
    pub by_task: Vec<TaskHours>,
    pub by_project: Vec<ProjectHours>,
    pub total_hours: f64,
    pub total_entries: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BudgetLine {
    pub project_id: Uuid,
    pub project_name: String,
    pub estimated_budget: f64,
    pub actual_budget: f64,
    /// Logged hours priced at the configured hourly rate.
    pub calculated_cost: f64,
    pub total_hours: f64,
    /// `estimated_budget - calculated_cost`; negative when over budget.
    pub variance: f64,
}

impl BudgetLine {
    pub fn priced(
        project_id: Uuid,
        project_name: String,
        estimated_budget: Option<f64>,
        actual_budget: Option<f64>,
        total_hours: f64,
        hourly_rate: f64,
    ) -> Self {
        let estimated_budget = estimated_budget.unwrap_or_default();
        let calculated_cost = total_hours * hourly_rate;
        Self {
            project_id,
            project_name,
            estimated_budget,
            actual_budget: actual_budget.unwrap_or_default(),
            calculated_cost,
            total_hours,
            variance: estimated_budget - calculated_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApprovalTimeline {
    pub status_breakdown: Vec<StatusCount>,
    pub overdue_count: i64,
    pub total_documents: i64,
    /// Mean hours from upload to decision over reviewed documents.
    pub average_review_time_hours: Option<f64>,
}

/// Mean of `reviewed - uploaded` in hours, rounded to two places.
pub fn average_review_hours(reviews: &[(DateTime<Utc>, DateTime<Utc>)]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let total: f64 = reviews
        .iter()
        .map(|(uploaded, reviewed)| (*reviewed - *uploaded).num_seconds() as f64 / 3600.0)
        .sum();
    Some((total / reviews.len() as f64 * 100.0).round() / 100.0)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DepartmentPerformance {
    pub department_id: Uuid,
    pub department_name: String,
    pub contractor_name: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_rate: f64,
    pub total_hours: f64,
    pub member_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonthlyProgress {
    #[schema(example = "2026-04")]
    pub month: String,
    #[schema(example = "Apr 2026")]
    pub month_name: String,
    pub total_projects: i64,
    pub avg_progress: f64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardSummary {
    pub total_projects: i64,
    pub active_projects: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub delayed_tasks: i64,
    pub overdue_tasks: i64,
    pub pending_documents: i64,
    pub overdue_documents: i64,
    pub pending_blueprints: i64,
    pub overdue_blueprints: i64,
    pub project_status_breakdown: Vec<StatusCount>,
    pub progress_over_time: Vec<MonthlyProgress>,
}

/// Per-project input to the monthly progress series.
#[derive(Debug, Clone, Copy)]
pub struct ProjectTally {
    pub created_at: DateTime<Utc>,
    pub total_tasks: i64,
    pub completed_tasks: i64,
}

/// Calendar months ending with the one containing `now`, oldest first, as
/// `(first day, last instant)`. The current month ends at `now`.
pub fn month_windows(now: DateTime<Utc>, count: u32) -> Vec<(NaiveDate, DateTime<Utc>)> {
    let Some(current) = NaiveDate::from_ymd_opt(now.year(), now.month(), 1) else {
        return Vec::new();
    };

    (0..count)
        .rev()
        .filter_map(|back| {
            let start = current.checked_sub_months(Months::new(back))?;
            let end = if back == 0 {
                now
            } else {
                let next = start.checked_add_months(Months::new(1))?;
                Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0)?) - Duration::seconds(1)
            };
            Some((start, end))
        })
        .collect()
}

/// Cumulative progress of the projects that existed at the end of each month.
pub fn progress_over_time(projects: &[ProjectTally], now: DateTime<Utc>, months: u32) -> Vec<MonthlyProgress> {
    month_windows(now, months)
        .into_iter()
        .map(|(start, end)| {
            let existing = projects.iter().filter(|project| project.created_at <= end);
            let (total_projects, total_tasks, completed_tasks) = existing.fold((0, 0, 0), |acc, project| {
                (acc.0 + 1, acc.1 + project.total_tasks, acc.2 + project.completed_tasks)
            });
            MonthlyProgress {
                month: start.format("%Y-%m").to_string(),
                month_name: start.format("%b %Y").to_string(),
                total_projects,
                avg_progress: ProjectStatistics::completion(completed_tasks, total_tasks),
                total_tasks,
                completed_tasks,
            }
        })
        .collect()
}
