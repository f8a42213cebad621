//! Role permission administration.
//!
//! Reads degrade to the built-in defaults when the permission table is not
//! provisioned. Writes are superuser-only and surface `storage_unavailable`
//! in that case.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};

use super::require_superuser;
use crate::app::AppState;
use crate::authz::{all_actions, all_categories, all_roles, Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{
    Choice, PermissionsOverview, ResetPermissionsResponse, RolePermissionsResponse, UpdatePermissionsRequest,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/permissions", get(get_permissions))
        .route("/permissions/:role", put(update_role_permissions))
        .route("/permissions/:role/reset", post(reset_role_permissions))
}

/// Every role with its effective permissions plus the closed sets a client
/// needs to render an editor.
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "Effective permissions for every role", body = PermissionsOverview)),
    security(("bearerAuth" = []))
)]
pub async fn get_permissions(State(state): State<AppState>, _principal: Principal) -> Json<PermissionsOverview> {
    let mut permissions = BTreeMap::new();
    for role in all_roles() {
        permissions.insert(role.as_str(), state.permissions.effective_permissions(*role).await);
    }

    Json(PermissionsOverview {
        roles: all_roles()
            .iter()
            .map(|role| Choice {
                value: role.as_str(),
                label: role.display_name().to_string(),
            })
            .collect(),
        permissions,
        categories: all_categories()
            .iter()
            .map(|category| Choice::humanized(category.as_str()))
            .collect(),
        actions: all_actions()
            .iter()
            .map(|action| Choice::humanized(action.as_str()))
            .collect(),
    })
}

#[utoipa::path(
    put,
    path = "/rbac/permissions/{role}",
    tag = "RBAC",
    params(("role" = String, Path, description = "Role tag, e.g. WORKER")),
    request_body = UpdatePermissionsRequest,
    responses(
        (status = 200, description = "Stored permissions replaced", body = RolePermissionsResponse),
        (status = 400, description = "Unknown role or malformed payload"),
        (status = 403, description = "Superuser access required"),
        (status = 503, description = "Permission storage not provisioned")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(role): Path<String>,
    payload: Result<Json<UpdatePermissionsRequest>, JsonRejection>,
) -> AppResult<Json<RolePermissionsResponse>> {
    require_superuser(&principal)?;
    let parsed: Role = role.parse()?;
    let Json(payload) = payload.map_err(|rejection| AppError::invalid_permissions_payload(rejection.body_text()))?;
    let permissions = payload
        .permissions
        .ok_or_else(|| AppError::invalid_permissions_payload("permissions is required"))?;

    let permissions = state.permissions.set_permissions(&role, &permissions).await?;
    tracing::info!(actor = %principal.user_id, role = %parsed, "role permissions updated");

    Ok(Json(RolePermissionsResponse {
        role: parsed.as_str(),
        permissions,
    }))
}

#[utoipa::path(
    post,
    path = "/rbac/permissions/{role}/reset",
    tag = "RBAC",
    params(("role" = String, Path, description = "Role tag, e.g. WORKER")),
    responses(
        (status = 200, description = "Role permissions reseeded from defaults", body = ResetPermissionsResponse),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Superuser access required"),
        (status = 503, description = "Permission storage not provisioned")
    ),
    security(("bearerAuth" = []))
)]
pub async fn reset_role_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(role): Path<String>,
) -> AppResult<Json<ResetPermissionsResponse>> {
    require_superuser(&principal)?;
    let parsed: Role = role.parse()?;

    let created = state.permissions.reset_to_defaults(&role).await?;
    let permissions = state.permissions.effective_permissions(parsed).await;
    tracing::info!(actor = %principal.user_id, role = %parsed, created, "role permissions reset");

    Ok(Json(ResetPermissionsResponse {
        role: parsed.as_str(),
        created,
        permissions,
    }))
}
