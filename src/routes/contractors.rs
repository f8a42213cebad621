use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use super::AppJson;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_by_id, fetch_page, fetch_visible, like_pattern, Listing};
use crate::errors::{AppError, AppResult};
use crate::models::company::{Contractor, ContractorCreateRequest, ContractorFilter, ContractorUpdateRequest, CONTRACTOR_COLUMNS};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_contractors).post(create_contractor))
        .route("/:id", get(get_contractor).put(update_contractor).delete(delete_contractor))
}

#[utoipa::path(
    get,
    path = "/contractors",
    tag = "Contractors",
    params(PageQuery, ContractorFilter),
    responses((status = 200, description = "Visible contractors", body = crate::db::paging::ContractorPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_contractors(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ContractorFilter>,
) -> AppResult<Json<Page<Contractor>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Contractors, PermissionAction::Read)
        .await?;

    let listing = Listing {
        entity: Entity::Contractor,
        columns: CONTRACTOR_COLUMNS,
        order_by: "contractors.name",
    };
    let page = fetch_page(&state.pool, &Scope::for_principal(&principal), listing, &page, |query| {
        if let Some(company_id) = filter.company_id {
            query.push(" AND contractors.company_id = ").push_bind(company_id);
        }
        if let Some(active) = filter.is_active {
            query.push(" AND contractors.is_active = ").push_bind(active);
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            query
                .push(" AND lower(contractors.name) LIKE ")
                .push_bind(like_pattern(search))
                .push(" ESCAPE '\\'");
        }
    })
    .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/contractors/{id}",
    tag = "Contractors",
    params(("id" = Uuid, Path, description = "Contractor id")),
    responses(
        (status = 200, description = "Contractor detail", body = Contractor),
        (status = 404, description = "Contractor not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_contractor(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Contractor>> {
    let contractor = fetch_visible(
        &state.pool,
        &Scope::for_principal(&principal),
        Entity::Contractor,
        CONTRACTOR_COLUMNS,
        id,
    )
    .await?;
    Ok(Json(contractor))
}

#[utoipa::path(
    post,
    path = "/contractors",
    tag = "Contractors",
    request_body = ContractorCreateRequest,
    responses((status = 201, description = "Contractor created", body = Contractor)),
    security(("bearerAuth" = []))
)]
pub async fn create_contractor(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<ContractorCreateRequest>,
) -> AppResult<(StatusCode, Json<Contractor>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Contractors, PermissionAction::Create)
        .await?;

    let company_id = match (principal.is_superuser, payload.company_id, principal.company_id) {
        (true, Some(company_id), _) => company_id,
        (false, Some(requested), Some(own)) if requested != own => {
            return Err(AppError::forbidden("contractors can only be added to your own company"));
        }
        (_, _, Some(own)) => own,
        (_, None, None) => return Err(AppError::validation("company_id is required")),
        (false, Some(_), None) => return Err(AppError::forbidden("you are not affiliated with a company")),
    };
    authorize_object(&state.pool, &principal, Entity::Company, company_id, None).await?;

    if payload.name.trim().is_empty() {
        return Err(AppError::validation("name is required"));
    }

    let now = utc_now();
    let contractor_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO contractors (id, company_id, name, email, phone_number, address, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(contractor_id)
    .bind(company_id)
    .bind(payload.name.trim())
    .bind(payload.email.trim())
    .bind(payload.phone_number.unwrap_or_default())
    .bind(payload.address.unwrap_or_default())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    tracing::info!(%contractor_id, %company_id, "contractor created");
    let contractor = fetch_by_id(&state.pool, Entity::Contractor, CONTRACTOR_COLUMNS, contractor_id).await?;
    Ok((StatusCode::CREATED, Json(contractor)))
}

#[utoipa::path(
    put,
    path = "/contractors/{id}",
    tag = "Contractors",
    params(("id" = Uuid, Path, description = "Contractor id")),
    request_body = ContractorUpdateRequest,
    responses((status = 200, description = "Contractor updated", body = Contractor)),
    security(("bearerAuth" = []))
)]
pub async fn update_contractor(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<ContractorUpdateRequest>,
) -> AppResult<Json<Contractor>> {
    state
        .policy
        .require(&principal, PermissionCategory::Contractors, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Contractor, id, None).await?;

    let mut contractor: Contractor = fetch_by_id(&state.pool, Entity::Contractor, CONTRACTOR_COLUMNS, id).await?;
    if let Some(name) = payload.name {
        contractor.name = name;
    }
    if let Some(email) = payload.email {
        contractor.email = email;
    }
    if let Some(phone_number) = payload.phone_number {
        contractor.phone_number = phone_number;
    }
    if let Some(address) = payload.address {
        contractor.address = address;
    }
    if let Some(active) = payload.is_active {
        contractor.is_active = active;
    }
    contractor.updated_at = utc_now();

    sqlx::query(
        "UPDATE contractors SET name = ?, email = ?, phone_number = ?, address = ?, is_active = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&contractor.name)
    .bind(&contractor.email)
    .bind(&contractor.phone_number)
    .bind(&contractor.address)
    .bind(contractor.is_active)
    .bind(contractor.updated_at)
    .bind(id)
    .execute(&state.pool)
    .await?;

    Ok(Json(contractor))
}

#[utoipa::path(
    delete,
    path = "/contractors/{id}",
    tag = "Contractors",
    params(("id" = Uuid, Path, description = "Contractor id")),
    responses((status = 204, description = "Contractor deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_contractor(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Contractors, PermissionAction::Delete)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Contractor, id, None).await?;

    sqlx::query("DELETE FROM contractors WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(contractor_id = %id, "contractor deleted");
    Ok(StatusCode::NO_CONTENT)
}
