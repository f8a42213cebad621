use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{blueprints, pins, AppJson};
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Role, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_by_id, fetch_page, fetch_visible, like_pattern, Listing};
use crate::errors::{AppError, AppResult};
use crate::models::project::{
    Project, ProjectCreateRequest, ProjectFilter, ProjectStatistics, ProjectStatus, ProjectUpdateRequest,
    PROJECT_COLUMNS,
};
use crate::review::ReviewStatus;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/:id", get(get_project).put(update_project).delete(delete_project))
        .route("/:id/statistics", get(project_statistics))
        .merge(blueprints::routes())
        .merge(pins::project_routes())
}

/// The contractor must belong to the project's company and the consultant
/// must be an active consultant account.
async fn check_parties(
    pool: &SqlitePool,
    company_id: Uuid,
    contractor_id: Option<Uuid>,
    consultant_id: Option<Uuid>,
) -> AppResult<()> {
    if let Some(contractor_id) = contractor_id {
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT company_id FROM contractors WHERE id = ?")
            .bind(contractor_id)
            .fetch_optional(pool)
            .await?;
        if owner != Some(company_id) {
            return Err(AppError::validation("contractor does not belong to the project's company"));
        }
    }

    if let Some(consultant_id) = consultant_id {
        let role: Option<Role> = sqlx::query_scalar("SELECT role FROM users WHERE id = ? AND is_active = 1")
            .bind(consultant_id)
            .fetch_optional(pool)
            .await?;
        if role != Some(Role::Consultant) {
            return Err(AppError::validation("consultant_id must reference an active consultant"));
        }
    }

    Ok(())
}

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    params(PageQuery, ProjectFilter),
    responses((status = 200, description = "Visible projects", body = crate::db::paging::ProjectPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_projects(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ProjectFilter>,
) -> AppResult<Json<Page<Project>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Projects, PermissionAction::Read)
        .await?;

    let listing = Listing {
        entity: Entity::Project,
        columns: PROJECT_COLUMNS,
        order_by: "projects.created_at DESC",
    };
    let page = fetch_page(&state.pool, &Scope::for_principal(&principal), listing, &page, |query| {
        if let Some(status) = filter.status {
            query.push(" AND projects.status = ").push_bind(status);
        }
        if let Some(company_id) = filter.company_id {
            query.push(" AND projects.company_id = ").push_bind(company_id);
        }
        if let Some(contractor_id) = filter.contractor_id {
            query.push(" AND projects.contractor_id = ").push_bind(contractor_id);
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            query
                .push(" AND (lower(projects.name) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(projects.address) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    })
    .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project detail", body = Project),
        (status = 404, description = "Project not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_project(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<Project>> {
    let project = fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Project, PROJECT_COLUMNS, id).await?;
    Ok(Json(project))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid parties or dates")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_project(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Projects, PermissionAction::Create)
        .await?;

    let company_id = if principal.is_superuser {
        payload
            .company_id
            .or(principal.company_id)
            .ok_or_else(|| AppError::validation("company_id is required"))?
    } else {
        let own = principal
            .company_id
            .ok_or_else(|| AppError::forbidden("you are not affiliated with a company"))?;
        if payload.company_id.is_some_and(|requested| requested != own) {
            return Err(AppError::forbidden("projects can only be created for your own company"));
        }
        own
    };

    if payload.name.trim().is_empty() {
        return Err(AppError::validation("name is required"));
    }
    if let (Some(start), Some(end)) = (payload.start_date, payload.end_date) {
        if end < start {
            return Err(AppError::validation("end_date must not be before start_date"));
        }
    }
    check_parties(&state.pool, company_id, payload.contractor_id, payload.consultant_id).await?;

    let now = utc_now();
    let project_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO projects (id, company_id, contractor_id, consultant_id, name, description, address, status, start_date, end_date, estimated_budget, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(company_id)
    .bind(payload.contractor_id)
    .bind(payload.consultant_id)
    .bind(payload.name.trim())
    .bind(payload.description.unwrap_or_default())
    .bind(payload.address.unwrap_or_default())
    .bind(payload.status.unwrap_or(ProjectStatus::Planning))
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(payload.estimated_budget)
    .bind(principal.user_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    tracing::info!(%project_id, %company_id, created_by = %principal.user_id, "project created");
    let project = fetch_by_id(&state.pool, Entity::Project, PROJECT_COLUMNS, project_id).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses((status = 200, description = "Project updated", body = Project)),
    security(("bearerAuth" = []))
)]
pub async fn update_project(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    state
        .policy
        .require(&principal, PermissionCategory::Projects, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Project, id, Some("created_by")).await?;

    let reassigning = payload.contractor_id.is_some() || payload.consultant_id.is_some();
    if reassigning {
        state
            .policy
            .require(&principal, PermissionCategory::Projects, PermissionAction::Assign)
            .await?;
    }

    let mut project: Project = fetch_by_id(&state.pool, Entity::Project, PROJECT_COLUMNS, id).await?;
    if payload.contractor_id.is_some() {
        project.contractor_id = payload.contractor_id;
    }
    if payload.consultant_id.is_some() {
        project.consultant_id = payload.consultant_id;
    }
    if let Some(name) = payload.name {
        project.name = name;
    }
    if let Some(description) = payload.description {
        project.description = description;
    }
    if let Some(address) = payload.address {
        project.address = address;
    }
    if let Some(status) = payload.status {
        project.status = status;
    }
    if payload.start_date.is_some() {
        project.start_date = payload.start_date;
    }
    if payload.end_date.is_some() {
        project.end_date = payload.end_date;
    }
    if payload.estimated_budget.is_some() {
        project.estimated_budget = payload.estimated_budget;
    }
    if payload.actual_budget.is_some() {
        project.actual_budget = payload.actual_budget;
    }
    if let (Some(start), Some(end)) = (project.start_date, project.end_date) {
        if end < start {
            return Err(AppError::validation("end_date must not be before start_date"));
        }
    }
    if reassigning {
        check_parties(&state.pool, project.company_id, project.contractor_id, project.consultant_id).await?;
    }
    project.updated_at = utc_now();

    sqlx::query(
        "UPDATE projects SET contractor_id = ?, consultant_id = ?, name = ?, description = ?, address = ?, status = ?, start_date = ?, end_date = ?, estimated_budget = ?, actual_budget = ?, updated_at = ? WHERE id = ?",
    )
    .bind(project.contractor_id)
    .bind(project.consultant_id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.address)
    .bind(project.status)
    .bind(project.start_date)
    .bind(project.end_date)
    .bind(project.estimated_budget)
    .bind(project.actual_budget)
    .bind(project.updated_at)
    .bind(id)
    .execute(&state.pool)
    .await?;

    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 204, description = "Project and everything under it deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_project(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Projects, PermissionAction::Delete)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Project, id, Some("created_by")).await?;

    let mut files: Vec<String> = sqlx::query_scalar("SELECT file_path FROM blueprints WHERE project_id = ?")
        .bind(id)
        .fetch_all(&state.pool)
        .await?;
    let attachments: Vec<String> = sqlx::query_scalar(
        "SELECT file_path FROM documents WHERE project_id = ? UNION SELECT document_versions.file_path FROM document_versions JOIN documents ON documents.id = document_versions.document_id WHERE documents.project_id = ?",
    )
    .bind(id)
    .bind(id)
    .fetch_all(&state.pool)
    .await?;
    files.extend(attachments);

    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    for key in files {
        if let Err(err) = state.storage.delete(&key).await {
            tracing::warn!(project_id = %id, %key, error = %err, "failed to release project file");
        }
    }

    tracing::info!(project_id = %id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/projects/{id}/statistics",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Task and document counters", body = ProjectStatistics)),
    security(("bearerAuth" = []))
)]
pub async fn project_statistics(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProjectStatistics>> {
    let project: Project =
        fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Project, PROJECT_COLUMNS, id).await?;
    let today = utc_now().date_naive();

    let (total, pending, in_progress, completed, delayed, overdue): (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
            COALESCE(SUM(status = 'PENDING'), 0), \
            COALESCE(SUM(status = 'IN_PROGRESS'), 0), \
            COALESCE(SUM(status = 'COMPLETED'), 0), \
            COALESCE(SUM(status = 'DELAYED'), 0), \
            COALESCE(SUM(due_date IS NOT NULL AND due_date < ? AND status != 'COMPLETED'), 0) \
         FROM tasks WHERE project_id = ?",
    )
    .bind(today)
    .bind(project.id)
    .fetch_one(&state.pool)
    .await?;

    let (total_documents, pending_documents, approved_documents): (i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
            COALESCE(SUM(review_status = 'PENDING'), 0), \
            COALESCE(SUM(review_status = 'APPROVED'), 0) \
         FROM documents WHERE project_id = ?",
    )
    .bind(project.id)
    .fetch_one(&state.pool)
    .await?;

    let blueprint_status: Option<ReviewStatus> =
        sqlx::query_scalar("SELECT review_status FROM blueprints WHERE project_id = ?")
            .bind(project.id)
            .fetch_optional(&state.pool)
            .await?;

    Ok(Json(ProjectStatistics {
        project_id: project.id,
        total_tasks: total,
        pending_tasks: pending,
        in_progress_tasks: in_progress,
        completed_tasks: completed,
        delayed_tasks: delayed,
        overdue_tasks: overdue,
        completion_percentage: ProjectStatistics::completion(completed, total),
        total_documents,
        pending_documents,
        approved_documents,
        blueprint_status,
    }))
}
