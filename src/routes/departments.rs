use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use super::AppJson;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_by_id, fetch_page, fetch_visible, Listing};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::models::department::{
    Department, DepartmentCreateRequest, DepartmentFilter, DepartmentUpdateRequest, DEPARTMENT_COLUMNS,
};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_departments).post(create_department))
        .route("/:id", get(get_department).put(update_department).delete(delete_department))
}

fn conflict_on_name(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::conflict("this contractor already has a department with that name")
    } else {
        err.into()
    }
}

/// Department changes count as updates to the owning contractor.
async fn authorize_contractor(state: &AppState, principal: &Principal, contractor_id: Uuid) -> AppResult<()> {
    state
        .policy
        .require(principal, PermissionCategory::Contractors, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, principal, Entity::Contractor, contractor_id, None).await
}

#[utoipa::path(
    get,
    path = "/departments",
    tag = "Departments",
    params(PageQuery, DepartmentFilter),
    responses((status = 200, description = "Visible departments", body = crate::db::paging::DepartmentPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_departments(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DepartmentFilter>,
) -> AppResult<Json<Page<Department>>> {
    let listing = Listing {
        entity: Entity::Department,
        columns: DEPARTMENT_COLUMNS,
        order_by: "departments.name",
    };
    let page = fetch_page(&state.pool, &Scope::for_principal(&principal), listing, &page, |query| {
        if let Some(contractor_id) = filter.contractor_id {
            query.push(" AND departments.contractor_id = ").push_bind(contractor_id);
        }
        if let Some(active) = filter.is_active {
            query.push(" AND departments.is_active = ").push_bind(active);
        }
    })
    .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department detail", body = Department),
        (status = 404, description = "Department not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Department>> {
    let department = fetch_visible(
        &state.pool,
        &Scope::for_principal(&principal),
        Entity::Department,
        DEPARTMENT_COLUMNS,
        id,
    )
    .await?;
    Ok(Json(department))
}

#[utoipa::path(
    post,
    path = "/departments",
    tag = "Departments",
    request_body = DepartmentCreateRequest,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 409, description = "Name already used by this contractor")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_department(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<DepartmentCreateRequest>,
) -> AppResult<(StatusCode, Json<Department>)> {
    authorize_contractor(&state, &principal, payload.contractor_id).await?;
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("name is required"));
    }

    let now = utc_now();
    let department_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO departments (id, contractor_id, name, description, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(department_id)
    .bind(payload.contractor_id)
    .bind(payload.name.trim())
    .bind(payload.description.unwrap_or_default())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(conflict_on_name)?;

    let department = fetch_by_id(&state.pool, Entity::Department, DEPARTMENT_COLUMNS, department_id).await?;
    Ok((StatusCode::CREATED, Json(department)))
}

#[utoipa::path(
    put,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    request_body = DepartmentUpdateRequest,
    responses((status = 200, description = "Department updated", body = Department)),
    security(("bearerAuth" = []))
)]
pub async fn update_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<DepartmentUpdateRequest>,
) -> AppResult<Json<Department>> {
    let scope = Scope::for_principal(&principal);
    let mut department: Department = if principal.is_superuser {
        fetch_by_id(&state.pool, Entity::Department, DEPARTMENT_COLUMNS, id).await?
    } else {
        fetch_visible(&state.pool, &scope, Entity::Department, DEPARTMENT_COLUMNS, id).await?
    };
    authorize_contractor(&state, &principal, department.contractor_id).await?;

    if let Some(name) = payload.name {
        department.name = name;
    }
    if let Some(description) = payload.description {
        department.description = description;
    }
    if let Some(active) = payload.is_active {
        department.is_active = active;
    }
    department.updated_at = utc_now();

    sqlx::query("UPDATE departments SET name = ?, description = ?, is_active = ?, updated_at = ? WHERE id = ?")
        .bind(&department.name)
        .bind(&department.description)
        .bind(department.is_active)
        .bind(department.updated_at)
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(conflict_on_name)?;

    Ok(Json(department))
}

#[utoipa::path(
    delete,
    path = "/departments/{id}",
    tag = "Departments",
    params(("id" = Uuid, Path, description = "Department id")),
    responses((status = 204, description = "Department deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_department(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let department: Department = if principal.is_superuser {
        fetch_by_id(&state.pool, Entity::Department, DEPARTMENT_COLUMNS, id).await?
    } else {
        fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Department, DEPARTMENT_COLUMNS, id).await?
    };
    authorize_contractor(&state, &principal, department.contractor_id).await?;

    sqlx::query("DELETE FROM departments WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
