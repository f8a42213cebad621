use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use super::blueprints::blueprint_for_project;
use super::AppJson;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::db::scoped::{fetch_by_id, fetch_visible};
use crate::errors::{AppError, AppResult};
use crate::models::pin::{validate_coordinate, Pin, PinCreateRequest, PinUpdateRequest, PIN_COLUMNS};
use crate::utils::utc_now;

/// Mounted under `/projects`.
pub fn project_routes() -> Router<AppState> {
    Router::new().route("/:id/pins", get(list_pins).post(create_pin))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/:id", get(get_pin).put(update_pin).delete(delete_pin))
}

#[utoipa::path(
    get,
    path = "/projects/{id}/pins",
    tag = "Pins",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Pins on the project blueprint", body = [Pin])),
    security(("bearerAuth" = []))
)]
pub async fn list_pins(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<Pin>>> {
    let scope = Scope::for_principal(&principal);
    let Some(blueprint) = blueprint_for_project(&state.pool, project_id).await? else {
        return Err(AppError::not_found("this project has no blueprint"));
    };
    scope.ensure_visible(&state.pool, Entity::Blueprint, blueprint.id).await?;

    let pins = sqlx::query_as::<_, Pin>(&format!(
        "SELECT {PIN_COLUMNS} FROM pins WHERE pins.blueprint_id = ? ORDER BY pins.created_at"
    ))
    .bind(blueprint.id)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(pins))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/pins",
    tag = "Pins",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = PinCreateRequest,
    responses(
        (status = 201, description = "Pin placed", body = Pin),
        (status = 400, description = "Coordinates outside [0, 1]")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_pin(
    State(state): State<AppState>,
    principal: Principal,
    Path(project_id): Path<Uuid>,
    AppJson(payload): AppJson<PinCreateRequest>,
) -> AppResult<(StatusCode, Json<Pin>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Create)
        .await?;
    validate_coordinate("x", payload.x)?;
    validate_coordinate("y", payload.y)?;
    authorize_object(&state.pool, &principal, Entity::Project, project_id, Some("created_by")).await?;

    let blueprint = blueprint_for_project(&state.pool, project_id)
        .await?
        .ok_or_else(|| AppError::validation("upload a blueprint before placing pins"))?;

    let pin_id = Uuid::new_v4();
    sqlx::query("INSERT INTO pins (id, blueprint_id, x, y, label, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)")
        .bind(pin_id)
        .bind(blueprint.id)
        .bind(payload.x)
        .bind(payload.y)
        .bind(payload.label.trim())
        .bind(principal.user_id)
        .bind(utc_now())
        .execute(&state.pool)
        .await?;

    let pin = fetch_by_id(&state.pool, Entity::Pin, PIN_COLUMNS, pin_id).await?;
    Ok((StatusCode::CREATED, Json(pin)))
}

#[utoipa::path(
    get,
    path = "/pins/{id}",
    tag = "Pins",
    params(("id" = Uuid, Path, description = "Pin id")),
    responses((status = 200, description = "Pin", body = Pin), (status = 404, description = "Pin not found")),
    security(("bearerAuth" = []))
)]
pub async fn get_pin(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<Pin>> {
    let pin = fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Pin, PIN_COLUMNS, id).await?;
    Ok(Json(pin))
}

#[utoipa::path(
    put,
    path = "/pins/{id}",
    tag = "Pins",
    params(("id" = Uuid, Path, description = "Pin id")),
    request_body = PinUpdateRequest,
    responses((status = 200, description = "Pin moved or relabelled", body = Pin)),
    security(("bearerAuth" = []))
)]
pub async fn update_pin(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<PinUpdateRequest>,
) -> AppResult<Json<Pin>> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Pin, id, Some("created_by")).await?;

    let mut pin: Pin = fetch_by_id(&state.pool, Entity::Pin, PIN_COLUMNS, id).await?;
    if let Some(x) = payload.x {
        validate_coordinate("x", x)?;
        pin.x = x;
    }
    if let Some(y) = payload.y {
        validate_coordinate("y", y)?;
        pin.y = y;
    }
    if let Some(label) = payload.label {
        pin.label = label;
    }

    sqlx::query("UPDATE pins SET x = ?, y = ?, label = ? WHERE id = ?")
        .bind(pin.x)
        .bind(pin.y)
        .bind(&pin.label)
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(Json(pin))
}

#[utoipa::path(
    delete,
    path = "/pins/{id}",
    tag = "Pins",
    params(("id" = Uuid, Path, description = "Pin id")),
    responses((status = 204, description = "Pin removed; anchored tasks keep their project")),
    security(("bearerAuth" = []))
)]
pub async fn delete_pin(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Delete)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Pin, id, Some("created_by")).await?;

    sqlx::query("DELETE FROM pins WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
