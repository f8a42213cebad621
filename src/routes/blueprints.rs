//! Blueprint upload, replacement, download and review for a project.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::read_upload;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Role, Scope};
use crate::db::scoped::{fetch_by_id, fetch_visible};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::events::{publish, WorkflowEvent};
use crate::files::{validate, UploadKind, ValidatedFile};
use crate::models::blueprint::{Blueprint, BlueprintDetail, BLUEPRINT_COLUMNS};
use crate::models::pin::{Pin, PIN_COLUMNS};
use crate::models::project::{Project, PROJECT_COLUMNS};
use crate::review::{ReviewAction, ReviewRequest, ReviewState};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:id/blueprint",
            get(get_blueprint).post(upload_blueprint).delete(delete_blueprint),
        )
        .route("/:id/blueprint/file", get(download_blueprint))
        .route("/:id/blueprint/approve", post(approve_blueprint))
        .route("/:id/blueprint/reject", post(reject_blueprint))
        .route("/:id/blueprint/request-modification", post(request_blueprint_modification))
}

pub(crate) async fn blueprint_for_project(pool: &SqlitePool, project_id: Uuid) -> AppResult<Option<Blueprint>> {
    let blueprint = sqlx::query_as::<_, Blueprint>(&format!(
        "SELECT {BLUEPRINT_COLUMNS} FROM blueprints WHERE blueprints.project_id = ?"
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    Ok(blueprint)
}

async fn require_blueprint(pool: &SqlitePool, project_id: Uuid) -> AppResult<Blueprint> {
    blueprint_for_project(pool, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("this project has no blueprint"))
}

async fn detail(pool: &SqlitePool, blueprint: Blueprint, now: DateTime<Utc>) -> AppResult<BlueprintDetail> {
    let pins = sqlx::query_as::<_, Pin>(&format!(
        "SELECT {PIN_COLUMNS} FROM pins WHERE pins.blueprint_id = ? ORDER BY pins.created_at"
    ))
    .bind(blueprint.id)
    .fetch_all(pool)
    .await?;

    Ok(BlueprintDetail {
        timing: blueprint.review.timing(now),
        blueprint,
        pins,
    })
}

fn storage_key(project_id: Uuid, file: &ValidatedFile) -> String {
    format!("blueprints/{project_id}/{}.{}", Uuid::new_v4(), file.file_type())
}

/// Store `file` as the blueprint of `project_id`, creating it or replacing the
/// current one. Either way a fresh review cycle starts at `now`.
///
/// The new file is written and the row committed before the old file is
/// released; failing to release it is only logged.
pub async fn save_blueprint(
    state: &AppState,
    project: &Project,
    uploader: Uuid,
    file: ValidatedFile,
    now: DateTime<Utc>,
) -> AppResult<(Blueprint, bool)> {
    let key = storage_key(project.id, &file);
    state
        .storage
        .put(&key, &file.bytes)
        .await
        .map_err(|err| AppError::internal(format!("failed to store blueprint: {err:#}")))?;

    let review = ReviewState::open(now, state.config.review.window_days);
    let (width, height) = file
        .dimensions
        .map(|(w, h)| (Some(i64::from(w)), Some(i64::from(h))))
        .unwrap_or((None, None));

    let existing = blueprint_for_project(&state.pool, project.id).await?;
    // A replacement only lands on the file it read; `None` means another
    // upload swapped the file in between.
    let written = match &existing {
        Some(current) => {
            sqlx::query(
                "UPDATE blueprints SET file_path = ?, file_name = ?, file_type = ?, file_size = ?, checksum = ?, width = ?, height = ?, review_status = ?, review_deadline = ?, reviewed_by = NULL, reviewed_at = NULL, review_notes = '', uploaded_by = ?, uploaded_at = ? WHERE id = ? AND file_path = ?",
            )
            .bind(&key)
            .bind(&file.file_name)
            .bind(file.file_type())
            .bind(file.size)
            .bind(&file.checksum)
            .bind(width)
            .bind(height)
            .bind(review.review_status)
            .bind(review.review_deadline)
            .bind(uploader)
            .bind(now)
            .bind(current.id)
            .bind(&current.file_path)
            .execute(&state.pool)
            .await
            .map(|done| (done.rows_affected() > 0).then_some(current.id))
        }
        None => {
            let blueprint_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO blueprints (id, project_id, file_path, file_name, file_type, file_size, checksum, width, height, review_status, review_deadline, review_notes, uploaded_by, uploaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)",
            )
            .bind(blueprint_id)
            .bind(project.id)
            .bind(&key)
            .bind(&file.file_name)
            .bind(file.file_type())
            .bind(file.size)
            .bind(&file.checksum)
            .bind(width)
            .bind(height)
            .bind(review.review_status)
            .bind(review.review_deadline)
            .bind(uploader)
            .bind(now)
            .execute(&state.pool)
            .await
            .map(|_| Some(blueprint_id))
        }
    };

    let blueprint_id = match written {
        Ok(Some(id)) => id,
        Ok(None) => {
            discard(state, &key).await;
            return Err(AppError::conflict("the blueprint was replaced concurrently, retry the upload"));
        }
        Err(err) => {
            discard(state, &key).await;
            if is_unique_violation(&err) {
                return Err(AppError::conflict("a blueprint was uploaded concurrently, retry the upload"));
            }
            return Err(err.into());
        }
    };

    let replaced = existing.is_some();
    if let Some(previous) = existing {
        if let Err(err) = state.storage.delete(&previous.file_path).await {
            tracing::warn!(
                %blueprint_id,
                file_path = %previous.file_path,
                error = %err,
                "failed to release replaced blueprint file"
            );
        }
    }

    tracing::info!(%blueprint_id, project_id = %project.id, replaced, size = file.size, "blueprint stored");
    let blueprint = require_blueprint(&state.pool, project.id).await?;
    Ok((blueprint, replaced))
}

/// Drop a stored file that never made it into a row.
async fn discard(state: &AppState, key: &str) {
    if let Err(err) = state.storage.delete(key).await {
        tracing::warn!(%key, error = %err, "failed to remove orphaned blueprint file");
    }
}

async fn visible_project(state: &AppState, principal: &Principal, project_id: Uuid) -> AppResult<Project> {
    fetch_visible(
        &state.pool,
        &Scope::for_principal(principal),
        Entity::Project,
        PROJECT_COLUMNS,
        project_id,
    )
    .await
}

/// Blueprints are visible to some roles that cannot list projects, such as
/// document controllers, so readers go through the blueprint's own scope.
async fn visible_blueprint(state: &AppState, principal: &Principal, project_id: Uuid) -> AppResult<Blueprint> {
    let scope = Scope::for_principal(principal);
    match blueprint_for_project(&state.pool, project_id).await? {
        Some(blueprint) if scope.is_visible(&state.pool, Entity::Blueprint, blueprint.id).await? => Ok(blueprint),
        _ => Err(AppError::not_found("this project has no blueprint")),
    }
}

#[utoipa::path(
    get,
    path = "/projects/{id}/blueprint",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Blueprint with review timing and pins", body = BlueprintDetail),
        (status = 404, description = "Project or blueprint not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_blueprint(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<BlueprintDetail>> {
    let blueprint = visible_blueprint(&state, &principal, project_id).await?;
    Ok(Json(detail(&state.pool, blueprint, utc_now()).await?))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/blueprint",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body(content = crate::models::blueprint::BlueprintUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Blueprint uploaded", body = BlueprintDetail),
        (status = 200, description = "Blueprint replaced, review restarted", body = BlueprintDetail),
        (status = 413, description = "File too large"),
        (status = 415, description = "Unsupported file type")
    ),
    security(("bearerAuth" = []))
)]
pub async fn upload_blueprint(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<BlueprintDetail>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Projects, PermissionAction::Upload)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Project, project_id, Some("created_by")).await?;
    let project: Project = fetch_by_id(&state.pool, Entity::Project, PROJECT_COLUMNS, project_id).await?;

    let mut form = read_upload(multipart).await?;
    let file = validate(form.take_file()?, UploadKind::Blueprint, &state.config.uploads)?;

    let now = utc_now();
    let (blueprint, replaced) = save_blueprint(&state, &project, principal.user_id, file, now).await?;

    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::BlueprintUploaded {
            blueprint_id: blueprint.id,
            project_id: project.id,
            project_name: project.name.clone(),
            replaced,
        }],
    );

    let status = if replaced { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(detail(&state.pool, blueprint, now).await?)))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/blueprint",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 204, description = "Blueprint and its pins deleted"),
        (status = 404, description = "No blueprint")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_blueprint(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Projects, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Project, project_id, Some("created_by")).await?;
    let blueprint = require_blueprint(&state.pool, project_id).await?;

    sqlx::query("DELETE FROM blueprints WHERE id = ?")
        .bind(blueprint.id)
        .execute(&state.pool)
        .await?;

    if let Err(err) = state.storage.delete(&blueprint.file_path).await {
        tracing::warn!(blueprint_id = %blueprint.id, error = %err, "failed to release deleted blueprint file");
    }

    tracing::info!(blueprint_id = %blueprint.id, %project_id, "blueprint deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/projects/{id}/blueprint/file",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Blueprint file bytes")),
    security(("bearerAuth" = []))
)]
pub async fn download_blueprint(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let blueprint = visible_blueprint(&state, &principal, project_id).await?;
    let bytes = state
        .storage
        .get(&blueprint.file_path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read blueprint: {err:#}")))?;

    let content_type = mime_guess::from_path(&blueprint.file_name)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!("inline; filename=\"{}\"", blueprint.file_name.replace('"', ""));
    Ok(([(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)], bytes))
}

/// Company admins of the owning company and the assigned consultant review
/// blueprints; nobody else does, whatever their permission bits.
fn ensure_blueprint_reviewer(principal: &Principal, project: &Project) -> AppResult<()> {
    if principal.is_superuser {
        return Ok(());
    }
    let allowed = match principal.role {
        Role::CompanyAdmin => principal.company_id == Some(project.company_id),
        Role::Consultant => project.consultant_id == Some(principal.user_id),
        Role::SuperAdmin
        | Role::ProjectManager
        | Role::Contractor
        | Role::Worker
        | Role::DocumentController => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("only the company admin or the assigned consultant may review this blueprint"))
    }
}

async fn review_blueprint(
    state: &AppState,
    principal: &Principal,
    project_id: Uuid,
    action: ReviewAction,
    notes: Option<String>,
) -> AppResult<BlueprintDetail> {
    state
        .policy
        .require(principal, PermissionCategory::Projects, action.permission())
        .await?;
    let project = visible_project(state, principal, project_id).await?;
    ensure_blueprint_reviewer(principal, &project)?;

    let mut blueprint = require_blueprint(&state.pool, project.id).await?;
    let now = utc_now();
    let from = blueprint.review.apply(action, principal.user_id, notes, now)?;

    let result = sqlx::query(
        "UPDATE blueprints SET review_status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ? WHERE id = ? AND review_status = 'PENDING'",
    )
    .bind(blueprint.review.review_status)
    .bind(blueprint.review.reviewed_by)
    .bind(blueprint.review.reviewed_at)
    .bind(&blueprint.review.review_notes)
    .bind(blueprint.id)
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::invalid_transition("blueprint is no longer pending review"));
    }

    tracing::info!(
        blueprint_id = %blueprint.id,
        reviewer = %principal.user_id,
        to = blueprint.review.review_status.as_str(),
        "blueprint reviewed"
    );
    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::BlueprintReviewed {
            blueprint_id: blueprint.id,
            project_id: project.id,
            project_name: project.name,
            from,
            to: blueprint.review.review_status,
            uploaded_by: blueprint.uploaded_by,
        }],
    );

    detail(&state.pool, blueprint, now).await
}

#[utoipa::path(
    post,
    path = "/projects/{id}/blueprint/approve",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Blueprint approved", body = BlueprintDetail),
        (status = 409, description = "Blueprint is not pending review")
    ),
    security(("bearerAuth" = []))
)]
pub async fn approve_blueprint(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<BlueprintDetail>> {
    let notes = payload.and_then(|Json(body)| body.notes);
    review_blueprint(&state, &principal, project_id, ReviewAction::Approve, notes)
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/projects/{id}/blueprint/reject",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Blueprint rejected", body = BlueprintDetail),
        (status = 409, description = "Blueprint is not pending review")
    ),
    security(("bearerAuth" = []))
)]
pub async fn reject_blueprint(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<BlueprintDetail>> {
    let notes = payload.and_then(|Json(body)| body.notes);
    review_blueprint(&state, &principal, project_id, ReviewAction::Reject, notes)
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/projects/{id}/blueprint/request-modification",
    tag = "Blueprints",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Modification requested", body = BlueprintDetail),
        (status = 409, description = "Blueprint is not pending review")
    ),
    security(("bearerAuth" = []))
)]
pub async fn request_blueprint_modification(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<BlueprintDetail>> {
    let notes = payload.and_then(|Json(body)| body.notes);
    review_blueprint(&state, &principal, project_id, ReviewAction::RequestModification, notes)
        .await
        .map(Json)
}
