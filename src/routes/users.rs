use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use super::auth::{ensure_identity_available, fetch_user};
use super::AppJson;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Role, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_page, fetch_visible, like_pattern, Listing};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::events::{publish, WorkflowEvent};
use crate::models::user::{
    AssignCompanyRequest, AssignRoleRequest, DbUser, User, UserCreateRequest, UserFilter, UserUpdateRequest,
    USER_COLUMNS,
};
use crate::utils::{hash_password, utc_now};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(deactivate_user))
        .route("/:id/activate", post(activate_user))
        .route("/:id/assign-role", post(assign_role))
        .route("/:id/assign-company", post(assign_company))
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    params(PageQuery, UserFilter),
    responses((status = 200, description = "Visible users", body = crate::db::paging::UserPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<UserFilter>,
) -> AppResult<Json<Page<User>>> {
    let listing = Listing {
        entity: Entity::User,
        columns: USER_COLUMNS,
        order_by: "users.username",
    };
    let page = fetch_page::<DbUser, _>(&state.pool, &Scope::for_principal(&principal), listing, &page, |query| {
        if let Some(role) = filter.role {
            query.push(" AND users.role = ").push_bind(role);
        }
        if let Some(company_id) = filter.company_id {
            query.push(" AND users.company_id = ").push_bind(company_id);
        }
        if let Some(contractor_id) = filter.contractor_id {
            query.push(" AND users.contractor_id = ").push_bind(contractor_id);
        }
        if let Some(department_id) = filter.department_id {
            query.push(" AND users.department_id = ").push_bind(department_id);
        }
        if let Some(active) = filter.is_active {
            query.push(" AND users.is_active = ").push_bind(active);
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            query
                .push(" AND (lower(users.username) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(users.email) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(users.first_name || ' ' || users.last_name) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    })
    .await?;

    Ok(Json(page.map(User::from)))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User detail", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<User>> {
    let user: DbUser =
        fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::User, USER_COLUMNS, id).await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Role not assignable"),
        (status = 409, description = "Username or email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Users, PermissionAction::Create)
        .await?;

    if !payload.role.is_assignable() {
        return Err(AppError::invalid_role(payload.role.as_str()));
    }
    if payload.username.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(AppError::validation("username and email are required"));
    }

    let company_id = if principal.is_superuser {
        payload.company_id
    } else {
        match (payload.company_id, principal.company_id) {
            (Some(requested), Some(own)) if requested != own => {
                return Err(AppError::forbidden("users can only be added to your own company"));
            }
            (_, own) => own,
        }
    };
    let contractor_id = payload.contractor_id.or(match principal.role {
        Role::Contractor if !principal.is_superuser => principal.contractor_id,
        _ => None,
    });
    if let Some(contractor_id) = contractor_id {
        authorize_object(&state.pool, &principal, Entity::Contractor, contractor_id, None).await?;
    }
    if let Some(department_id) = payload.department_id {
        authorize_object(&state.pool, &principal, Entity::Department, department_id, None).await?;
    }

    ensure_identity_available(&state.pool, &payload.username, &payload.email).await?;
    let password_hash = payload.password.as_deref().map(hash_password).transpose()?;

    let now = utc_now();
    let user_id = Uuid::new_v4();
    let username = payload.username.trim().to_string();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name, role, is_superuser, phone_number, company_id, contractor_id, department_id, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user_id)
    .bind(&username)
    .bind(payload.email.trim())
    .bind(password_hash)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(payload.role)
    .bind(payload.phone_number.unwrap_or_default())
    .bind(company_id)
    .bind(contractor_id)
    .bind(payload.department_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::conflict("username or email already in use")
        } else {
            err.into()
        }
    })?;

    tracing::info!(%user_id, role = %payload.role, created_by = %principal.user_id, "user created");
    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::UserRegistered { user_id, username }],
    );

    let user = fetch_user(&state.pool, user_id).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses((status = 200, description = "User updated", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    if id != principal.user_id {
        state
            .policy
            .require(&principal, PermissionCategory::Users, PermissionAction::Update)
            .await?;
        authorize_object(&state.pool, &principal, Entity::User, id, None).await?;
    }
    if let Some(department_id) = payload.department_id {
        authorize_object(&state.pool, &principal, Entity::Department, department_id, None).await?;
    }

    let mut user = fetch_user(&state.pool, id).await?;
    if let Some(email) = payload.email {
        user.email = email.trim().to_string();
    }
    if let Some(first_name) = payload.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = payload.last_name {
        user.last_name = last_name;
    }
    if let Some(phone_number) = payload.phone_number {
        user.phone_number = phone_number;
    }
    if payload.department_id.is_some() {
        user.department_id = payload.department_id;
    }
    user.updated_at = utc_now();

    sqlx::query(
        "UPDATE users SET email = ?, first_name = ?, last_name = ?, phone_number = ?, department_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&user.email)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone_number)
    .bind(user.department_id)
    .bind(user.updated_at)
    .bind(id)
    .execute(&state.pool)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::conflict("email already in use")
        } else {
            err.into()
        }
    })?;

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User deactivated", body = User),
        (status = 400, description = "Cannot deactivate yourself")
    ),
    security(("bearerAuth" = []))
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    state
        .policy
        .require(&principal, PermissionCategory::Users, PermissionAction::Delete)
        .await?;
    if id == principal.user_id {
        return Err(AppError::validation("you cannot deactivate your own account"));
    }
    set_active(&state, &principal, id, false).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/users/{id}/activate",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "User reactivated", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn activate_user(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<User>> {
    state
        .policy
        .require(&principal, PermissionCategory::Users, PermissionAction::Activate)
        .await?;
    set_active(&state, &principal, id, true).await.map(Json)
}

// Users are never hard-deleted; deactivation keeps their authored records.
async fn set_active(state: &AppState, principal: &Principal, id: Uuid, active: bool) -> AppResult<User> {
    authorize_object(&state.pool, principal, Entity::User, id, None).await?;

    sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(active)
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(user_id = %id, active, changed_by = %principal.user_id, "user activation changed");
    fetch_user(&state.pool, id).await
}

#[utoipa::path(
    post,
    path = "/users/{id}/assign-role",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = User),
        (status = 400, description = "Unknown or unassignable role")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<AssignRoleRequest>,
) -> AppResult<Json<User>> {
    state
        .policy
        .require(&principal, PermissionCategory::Users, PermissionAction::AssignRole)
        .await?;
    let role: Role = payload.role.trim().parse()?;
    if !role.is_assignable() {
        return Err(AppError::invalid_role(role.as_str()));
    }
    authorize_object(&state.pool, &principal, Entity::User, id, None).await?;

    sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role)
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(user_id = %id, %role, assigned_by = %principal.user_id, "role assigned");
    fetch_user(&state.pool, id).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/users/{id}/assign-company",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignCompanyRequest,
    responses(
        (status = 200, description = "Affiliation updated", body = User),
        (status = 400, description = "Contractor belongs to another company")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_company(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<AssignCompanyRequest>,
) -> AppResult<Json<User>> {
    state
        .policy
        .require(&principal, PermissionCategory::Users, PermissionAction::AssignCompany)
        .await?;
    authorize_object(&state.pool, &principal, Entity::User, id, None).await?;

    if let Some(company_id) = payload.company_id {
        authorize_object(&state.pool, &principal, Entity::Company, company_id, None).await?;
    }

    let mut company_id = payload.company_id;
    if let Some(contractor_id) = payload.contractor_id {
        authorize_object(&state.pool, &principal, Entity::Contractor, contractor_id, None).await?;
        let owner: Uuid = sqlx::query_scalar("SELECT company_id FROM contractors WHERE id = ?")
            .bind(contractor_id)
            .fetch_one(&state.pool)
            .await?;
        match company_id {
            Some(company) if company != owner => {
                return Err(AppError::validation("contractor belongs to a different company"));
            }
            _ => company_id = Some(owner),
        }
    }

    // A department only makes sense under the contractor it belongs to.
    sqlx::query(
        "UPDATE users SET company_id = ?, contractor_id = ?, department_id = CASE WHEN contractor_id IS ? THEN department_id ELSE NULL END, updated_at = ? WHERE id = ?",
    )
    .bind(company_id)
    .bind(payload.contractor_id)
    .bind(payload.contractor_id)
    .bind(utc_now())
    .bind(id)
    .execute(&state.pool)
    .await?;

    tracing::info!(user_id = %id, company_id = ?company_id, contractor_id = ?payload.contractor_id, "affiliation assigned");
    fetch_user(&state.pool, id).await.map(Json)
}
