//! Read-only aggregates over the caller's visible projects, tasks, hours and
//! documents. Every query starts from the caller's `Scope`, so a report never
//! counts rows the caller could not list.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::errors::{AppError, AppResult};
use crate::models::project::{ProjectStatistics, ProjectStatus};
use crate::models::report::{
    average_review_hours, progress_over_time, ApprovalTimeline, BudgetLine, DashboardSummary, DepartmentPerformance,
    ProjectHours, ProjectProgress, ProjectTally, ReportKind, ReportQuery, StatusCount, TaskHours, TimeTrackingReport,
};
use crate::utils::utc_now;

const DASHBOARD_MONTHS: u32 = 12;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/project-progress", get(project_progress))
        .route("/time-tracking", get(time_tracking))
        .route("/budget-vs-actual", get(budget_vs_actual))
        .route("/document-approval-timeline", get(document_approval_timeline))
        .route("/department-performance", get(department_performance))
        .route("/dashboard-summary", get(dashboard_summary))
        .route("/:report/export", get(export_report))
}

/// `SELECT ... WHERE <visibility of entity>`, ready for more ` AND` clauses.
fn visible(select: &str, scope: &Scope, entity: Entity) -> QueryBuilder<'static, Sqlite> {
    let mut query = QueryBuilder::new(select);
    query.push(" WHERE ");
    scope.filter(entity).push_to(&mut query);
    query
}

fn push_project(query: &mut QueryBuilder<'_, Sqlite>, column: &str, project_id: Option<Uuid>) {
    if let Some(project_id) = project_id {
        query.push(format!(" AND {column} = ")).push_bind(project_id);
    }
}

fn push_entry_conditions(query: &mut QueryBuilder<'_, Sqlite>, filter: &ReportQuery) {
    if let Some(project_id) = filter.project_id {
        query
            .push(" AND time_entries.task_id IN (SELECT tasks.id FROM tasks WHERE tasks.project_id = ")
            .push_bind(project_id)
            .push(")");
    }
    if let Some(start) = filter.start_date {
        query.push(" AND time_entries.date >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        query.push(" AND time_entries.date <= ").push_bind(end);
    }
}

async fn require(state: &AppState, principal: &Principal, action: PermissionAction) -> AppResult<Scope> {
    state
        .policy
        .require(principal, PermissionCategory::Reports, action)
        .await?;
    Ok(Scope::for_principal(principal))
}

async fn build_project_progress(state: &AppState, scope: &Scope, filter: &ReportQuery) -> AppResult<Vec<ProjectProgress>> {
    let mut query = visible(
        "SELECT projects.id, projects.name, projects.status, \
            (SELECT COUNT(*) FROM tasks WHERE tasks.project_id = projects.id), \
            (SELECT COUNT(*) FROM tasks WHERE tasks.project_id = projects.id AND tasks.status = 'COMPLETED'), \
            projects.start_date, projects.end_date \
         FROM projects",
        scope,
        Entity::Project,
    );
    push_project(&mut query, "projects.id", filter.project_id);
    query.push(" ORDER BY projects.name");

    let rows: Vec<(Uuid, String, ProjectStatus, i64, i64, Option<NaiveDate>, Option<NaiveDate>)> =
        query.build_query_as().fetch_all(&state.pool).await?;
    Ok(rows
        .into_iter()
        .map(
            |(project_id, project_name, status, total_tasks, completed_tasks, start_date, end_date)| ProjectProgress {
                project_id,
                project_name,
                status,
                total_tasks,
                completed_tasks,
                progress_percentage: ProjectStatistics::completion(completed_tasks, total_tasks),
                start_date,
                end_date,
            },
        )
        .collect())
}

async fn build_time_tracking(state: &AppState, scope: &Scope, filter: &ReportQuery) -> AppResult<TimeTrackingReport> {
    if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
        if start > end {
            return Err(AppError::validation("start_date must not be after end_date"));
        }
    }

    let mut by_task = visible(
        "SELECT tasks.id, tasks.title, TOTAL(time_entries.hours), COUNT(time_entries.id) \
         FROM time_entries JOIN tasks ON tasks.id = time_entries.task_id",
        scope,
        Entity::TimeEntry,
    );
    push_entry_conditions(&mut by_task, filter);
    by_task.push(" GROUP BY tasks.id, tasks.title ORDER BY 3 DESC, tasks.title");
    let by_task: Vec<(Uuid, String, f64, i64)> = by_task.build_query_as().fetch_all(&state.pool).await?;

    let mut by_project = visible(
        "SELECT projects.id, projects.name, TOTAL(time_entries.hours), COUNT(time_entries.id) \
         FROM time_entries JOIN tasks ON tasks.id = time_entries.task_id JOIN projects ON projects.id = tasks.project_id",
        scope,
        Entity::TimeEntry,
    );
    push_entry_conditions(&mut by_project, filter);
    by_project.push(" GROUP BY projects.id, projects.name ORDER BY 3 DESC, projects.name");
    let by_project: Vec<(Uuid, String, f64, i64)> = by_project.build_query_as().fetch_all(&state.pool).await?;

    let mut totals = visible(
        "SELECT TOTAL(time_entries.hours), COUNT(*) FROM time_entries",
        scope,
        Entity::TimeEntry,
    );
    push_entry_conditions(&mut totals, filter);
    let (total_hours, total_entries): (f64, i64) = totals.build_query_as().fetch_one(&state.pool).await?;

    Ok(TimeTrackingReport {
        by_task: by_task
            .into_iter()
            .map(|(task_id, task_title, total_hours, entry_count)| TaskHours {
                task_id,
                task_title,
                total_hours,
                entry_count,
            })
            .collect(),
        by_project: by_project
            .into_iter()
            .map(|(project_id, project_name, total_hours, entry_count)| ProjectHours {
                project_id,
                project_name,
                total_hours,
                entry_count,
            })
            .collect(),
        total_hours,
        total_entries,
    })
}

async fn build_budget_vs_actual(state: &AppState, scope: &Scope, filter: &ReportQuery) -> AppResult<Vec<BudgetLine>> {
    let mut query = visible(
        "SELECT projects.id, projects.name, projects.estimated_budget, projects.actual_budget, \
            (SELECT TOTAL(time_entries.hours) FROM time_entries JOIN tasks ON tasks.id = time_entries.task_id \
             WHERE tasks.project_id = projects.id) \
         FROM projects",
        scope,
        Entity::Project,
    );
    push_project(&mut query, "projects.id", filter.project_id);
    query.push(" ORDER BY projects.name");

    let rows: Vec<(Uuid, String, Option<f64>, Option<f64>, f64)> =
        query.build_query_as().fetch_all(&state.pool).await?;
    let rate = state.config.hourly_rate;
    Ok(rows
        .into_iter()
        .map(|(id, name, estimated, actual, hours)| BudgetLine::priced(id, name, estimated, actual, hours, rate))
        .collect())
}

async fn build_approval_timeline(state: &AppState, scope: &Scope, filter: &ReportQuery) -> AppResult<ApprovalTimeline> {
    let now = utc_now();

    let mut breakdown = visible(
        "SELECT documents.review_status, COUNT(*) FROM documents",
        scope,
        Entity::Document,
    );
    push_project(&mut breakdown, "documents.project_id", filter.project_id);
    breakdown.push(" GROUP BY documents.review_status ORDER BY documents.review_status");
    let breakdown: Vec<(String, i64)> = breakdown.build_query_as().fetch_all(&state.pool).await?;

    let mut counts = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*), COALESCE(SUM(documents.review_status = 'PENDING' \
            AND documents.review_deadline IS NOT NULL AND documents.review_deadline < ",
    );
    counts.push_bind(now).push("), 0) FROM documents WHERE ");
    scope.filter(Entity::Document).push_to(&mut counts);
    push_project(&mut counts, "documents.project_id", filter.project_id);
    let (total_documents, overdue_count): (i64, i64) = counts.build_query_as().fetch_one(&state.pool).await?;

    let mut reviewed = visible(
        "SELECT documents.uploaded_at, documents.reviewed_at FROM documents",
        scope,
        Entity::Document,
    );
    reviewed.push(" AND documents.reviewed_at IS NOT NULL");
    push_project(&mut reviewed, "documents.project_id", filter.project_id);
    let reviewed: Vec<(DateTime<Utc>, DateTime<Utc>)> = reviewed.build_query_as().fetch_all(&state.pool).await?;

    Ok(ApprovalTimeline {
        status_breakdown: breakdown
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        overdue_count,
        total_documents,
        average_review_time_hours: average_review_hours(&reviewed),
    })
}

async fn build_department_performance(state: &AppState, scope: &Scope) -> AppResult<Vec<DepartmentPerformance>> {
    let mut query = visible(
        "SELECT departments.id, departments.name, contractors.name, \
            (SELECT COUNT(*) FROM tasks WHERE tasks.department_id = departments.id), \
            (SELECT COUNT(*) FROM tasks WHERE tasks.department_id = departments.id AND tasks.status = 'COMPLETED'), \
            (SELECT TOTAL(time_entries.hours) FROM time_entries JOIN tasks ON tasks.id = time_entries.task_id \
             WHERE tasks.department_id = departments.id), \
            (SELECT COUNT(*) FROM users WHERE users.department_id = departments.id) \
         FROM departments JOIN contractors ON contractors.id = departments.contractor_id",
        scope,
        Entity::Department,
    );
    query.push(" ORDER BY contractors.name, departments.name");

    let rows: Vec<(Uuid, String, String, i64, i64, f64, i64)> = query.build_query_as().fetch_all(&state.pool).await?;
    Ok(rows
        .into_iter()
        .map(
            |(department_id, department_name, contractor_name, total_tasks, completed_tasks, total_hours, member_count)| {
                DepartmentPerformance {
                    department_id,
                    department_name,
                    contractor_name,
                    total_tasks,
                    completed_tasks,
                    completion_rate: ProjectStatistics::completion(completed_tasks, total_tasks),
                    total_hours,
                    member_count,
                }
            },
        )
        .collect())
}

async fn build_dashboard_summary(state: &AppState, scope: &Scope) -> AppResult<DashboardSummary> {
    let now = utc_now();
    let today = now.date_naive();

    let (total_projects, active_projects): (i64, i64) = visible(
        "SELECT COUNT(*), COALESCE(SUM(projects.status = 'IN_PROGRESS'), 0) FROM projects",
        scope,
        Entity::Project,
    )
    .build_query_as()
    .fetch_one(&state.pool)
    .await?;

    let mut tasks = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*), \
            COALESCE(SUM(tasks.status = 'COMPLETED'), 0), \
            COALESCE(SUM(tasks.status = 'PENDING'), 0), \
            COALESCE(SUM(tasks.status = 'DELAYED'), 0), \
            COALESCE(SUM(tasks.due_date IS NOT NULL AND tasks.due_date < ",
    );
    tasks
        .push_bind(today)
        .push(" AND tasks.status != 'COMPLETED'), 0) FROM tasks WHERE ");
    scope.filter(Entity::Task).push_to(&mut tasks);
    let (total_tasks, completed_tasks, pending_tasks, delayed_tasks, overdue_tasks): (i64, i64, i64, i64, i64) =
        tasks.build_query_as().fetch_one(&state.pool).await?;

    let mut documents = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*), COALESCE(SUM(documents.review_deadline IS NOT NULL AND documents.review_deadline < ",
    );
    documents.push_bind(now).push("), 0) FROM documents WHERE ");
    scope.filter(Entity::Document).push_to(&mut documents);
    documents.push(" AND documents.review_status = 'PENDING'");
    let (pending_documents, overdue_documents): (i64, i64) =
        documents.build_query_as().fetch_one(&state.pool).await?;

    let mut blueprints = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*), COALESCE(SUM(blueprints.review_deadline IS NOT NULL AND blueprints.review_deadline < ",
    );
    blueprints.push_bind(now).push("), 0) FROM blueprints WHERE ");
    scope.filter(Entity::Blueprint).push_to(&mut blueprints);
    blueprints.push(" AND blueprints.review_status = 'PENDING'");
    let (pending_blueprints, overdue_blueprints): (i64, i64) =
        blueprints.build_query_as().fetch_one(&state.pool).await?;

    let mut breakdown = visible("SELECT projects.status, COUNT(*) FROM projects", scope, Entity::Project);
    breakdown.push(" GROUP BY projects.status ORDER BY projects.status");
    let breakdown: Vec<(String, i64)> = breakdown.build_query_as().fetch_all(&state.pool).await?;

    let tallies: Vec<(DateTime<Utc>, i64, i64)> = visible(
        "SELECT projects.created_at, \
            (SELECT COUNT(*) FROM tasks WHERE tasks.project_id = projects.id), \
            (SELECT COUNT(*) FROM tasks WHERE tasks.project_id = projects.id AND tasks.status = 'COMPLETED') \
         FROM projects",
        scope,
        Entity::Project,
    )
    .build_query_as()
    .fetch_all(&state.pool)
    .await?;
    let tallies: Vec<ProjectTally> = tallies
        .into_iter()
        .map(|(created_at, total_tasks, completed_tasks)| ProjectTally {
            created_at,
            total_tasks,
            completed_tasks,
        })
        .collect();

    Ok(DashboardSummary {
        total_projects,
        active_projects,
        total_tasks,
        completed_tasks,
        pending_tasks,
        delayed_tasks,
        overdue_tasks,
        pending_documents,
        overdue_documents,
        pending_blueprints,
        overdue_blueprints,
        project_status_breakdown: breakdown
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        progress_over_time: progress_over_time(&tallies, now, DASHBOARD_MONTHS),
    })
}

#[utoipa::path(
    get,
    path = "/reports/project-progress",
    tag = "Reports",
    params(ReportQuery),
    responses((status = 200, description = "Completion per visible project", body = [ProjectProgress])),
    security(("bearerAuth" = []))
)]
pub async fn project_progress(
    State(state): State<AppState>,
    principal: Principal,
    Query(filter): Query<ReportQuery>,
) -> AppResult<Json<Vec<ProjectProgress>>> {
    let scope = require(&state, &principal, PermissionAction::Read).await?;
    Ok(Json(build_project_progress(&state, &scope, &filter).await?))
}

#[utoipa::path(
    get,
    path = "/reports/time-tracking",
    tag = "Reports",
    params(ReportQuery),
    responses(
        (status = 200, description = "Logged hours by task and by project", body = TimeTrackingReport),
        (status = 400, description = "Inverted date range")
    ),
    security(("bearerAuth" = []))
)]
pub async fn time_tracking(
    State(state): State<AppState>,
    principal: Principal,
    Query(filter): Query<ReportQuery>,
) -> AppResult<Json<TimeTrackingReport>> {
    let scope = require(&state, &principal, PermissionAction::Read).await?;
    Ok(Json(build_time_tracking(&state, &scope, &filter).await?))
}

#[utoipa::path(
    get,
    path = "/reports/budget-vs-actual",
    tag = "Reports",
    params(ReportQuery),
    responses((status = 200, description = "Budgets against priced logged hours", body = [BudgetLine])),
    security(("bearerAuth" = []))
)]
pub async fn budget_vs_actual(
    State(state): State<AppState>,
    principal: Principal,
    Query(filter): Query<ReportQuery>,
) -> AppResult<Json<Vec<BudgetLine>>> {
    let scope = require(&state, &principal, PermissionAction::Read).await?;
    Ok(Json(build_budget_vs_actual(&state, &scope, &filter).await?))
}

#[utoipa::path(
    get,
    path = "/reports/document-approval-timeline",
    tag = "Reports",
    params(ReportQuery),
    responses((status = 200, description = "Document review outcomes and turnaround", body = ApprovalTimeline)),
    security(("bearerAuth" = []))
)]
pub async fn document_approval_timeline(
    State(state): State<AppState>,
    principal: Principal,
    Query(filter): Query<ReportQuery>,
) -> AppResult<Json<ApprovalTimeline>> {
    let scope = require(&state, &principal, PermissionAction::Read).await?;
    Ok(Json(build_approval_timeline(&state, &scope, &filter).await?))
}

#[utoipa::path(
    get,
    path = "/reports/department-performance",
    tag = "Reports",
    responses((status = 200, description = "Task completion and hours per department", body = [DepartmentPerformance])),
    security(("bearerAuth" = []))
)]
pub async fn department_performance(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<DepartmentPerformance>>> {
    let scope = require(&state, &principal, PermissionAction::Read).await?;
    Ok(Json(build_department_performance(&state, &scope).await?))
}

#[utoipa::path(
    get,
    path = "/reports/dashboard-summary",
    tag = "Reports",
    responses((status = 200, description = "Headline counters and a twelve month progress series", body = DashboardSummary)),
    security(("bearerAuth" = []))
)]
pub async fn dashboard_summary(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<DashboardSummary>> {
    let scope = require(&state, &principal, PermissionAction::Read).await?;
    Ok(Json(build_dashboard_summary(&state, &scope).await?))
}

fn to_json<T: Serialize>(report: &T) -> AppResult<serde_json::Value> {
    serde_json::to_value(report).map_err(|err| AppError::internal(format!("failed to encode report: {err}")))
}

/// Any report as a JSON file download. Requires `reports:export`.
#[utoipa::path(
    get,
    path = "/reports/{report}/export",
    tag = "Reports",
    params(
        ("report" = String, Path, description = "Report name, e.g. `budget-vs-actual`"),
        ReportQuery
    ),
    responses(
        (status = 200, description = "Report as an attached JSON file"),
        (status = 403, description = "Missing reports:export"),
        (status = 404, description = "Unknown report")
    ),
    security(("bearerAuth" = []))
)]
pub async fn export_report(
    State(state): State<AppState>,
    principal: Principal,
    Path(report): Path<String>,
    Query(filter): Query<ReportQuery>,
) -> AppResult<impl IntoResponse> {
    let scope = require(&state, &principal, PermissionAction::Export).await?;
    let kind = ReportKind::parse(&report).ok_or_else(|| AppError::not_found(format!("unknown report '{report}'")))?;

    let body = match kind {
        ReportKind::ProjectProgress => to_json(&build_project_progress(&state, &scope, &filter).await?)?,
        ReportKind::TimeTracking => to_json(&build_time_tracking(&state, &scope, &filter).await?)?,
        ReportKind::BudgetVsActual => to_json(&build_budget_vs_actual(&state, &scope, &filter).await?)?,
        ReportKind::DocumentApprovalTimeline => to_json(&build_approval_timeline(&state, &scope, &filter).await?)?,
        ReportKind::DepartmentPerformance => to_json(&build_department_performance(&state, &scope).await?)?,
        ReportKind::DashboardSummary => to_json(&build_dashboard_summary(&state, &scope).await?)?,
    };

    tracing::info!(user_id = %principal.user_id, report = kind.slug(), "report exported");
    let disposition = format!(
        "attachment; filename=\"{}-{}.json\"",
        kind.slug(),
        utc_now().date_naive().format("%Y%m%d")
    );
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(body)))
}
