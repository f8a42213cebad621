use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use super::AppJson;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_by_id, fetch_page, fetch_visible, like_pattern, Listing};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::events::{publish, WorkflowEvent};
use crate::models::company::{Company, CompanyCreateRequest, CompanyFilter, CompanyUpdateRequest, DbCompany, COMPANY_COLUMNS};
use crate::utils::{hash_password, utc_now};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_companies).post(create_company))
        .route("/:id", get(get_company).put(update_company).delete(delete_company))
        .route("/:id/activate", post(activate_company))
        .route("/:id/deactivate", post(deactivate_company))
}

fn conflict_on_email(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::conflict("a company with this email already exists")
    } else {
        err.into()
    }
}

#[utoipa::path(
    get,
    path = "/companies",
    tag = "Companies",
    params(PageQuery, CompanyFilter),
    responses((status = 200, description = "Visible companies", body = crate::db::paging::CompanyPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_companies(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<CompanyFilter>,
) -> AppResult<Json<Page<Company>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Companies, PermissionAction::Read)
        .await?;

    let listing = Listing {
        entity: Entity::Company,
        columns: COMPANY_COLUMNS,
        order_by: "companies.name",
    };
    let page = fetch_page::<DbCompany, _>(&state.pool, &Scope::for_principal(&principal), listing, &page, |query| {
        if let Some(active) = filter.is_active {
            query.push(" AND companies.is_active = ").push_bind(active);
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            query
                .push(" AND (lower(companies.name) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(companies.email) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    })
    .await?;

    Ok(Json(page.map(Company::from)))
}

#[utoipa::path(
    get,
    path = "/companies/{id}",
    tag = "Companies",
    params(("id" = Uuid, Path, description = "Company id")),
    responses(
        (status = 200, description = "Company detail", body = Company),
        (status = 404, description = "Company not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_company(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<Company>> {
    let company: DbCompany =
        fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Company, COMPANY_COLUMNS, id).await?;
    Ok(Json(company.into()))
}

#[utoipa::path(
    post,
    path = "/companies",
    tag = "Companies",
    request_body = CompanyCreateRequest,
    responses(
        (status = 201, description = "Company created", body = Company),
        (status = 403, description = "Not allowed to create companies"),
        (status = 409, description = "Email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_company(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<CompanyCreateRequest>,
) -> AppResult<(StatusCode, Json<Company>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Companies, PermissionAction::Create)
        .await?;

    if payload.name.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(AppError::validation("name and email are required"));
    }
    let password_hash = payload.password.as_deref().map(hash_password).transpose()?;

    let now = utc_now();
    let company_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO companies (id, name, email, phone_number, address, password_hash, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(company_id)
    .bind(payload.name.trim())
    .bind(payload.email.trim())
    .bind(payload.phone_number.unwrap_or_default())
    .bind(payload.address.unwrap_or_default())
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(conflict_on_email)?;

    let company: Company = fetch_by_id::<DbCompany>(&state.pool, Entity::Company, COMPANY_COLUMNS, company_id)
        .await?
        .into();
    tracing::info!(%company_id, "company created");
    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::CompanyCreated {
            company_id,
            name: company.name.clone(),
        }],
    );

    Ok((StatusCode::CREATED, Json(company)))
}

#[utoipa::path(
    put,
    path = "/companies/{id}",
    tag = "Companies",
    params(("id" = Uuid, Path, description = "Company id")),
    request_body = CompanyUpdateRequest,
    responses((status = 200, description = "Company updated", body = Company)),
    security(("bearerAuth" = []))
)]
pub async fn update_company(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<CompanyUpdateRequest>,
) -> AppResult<Json<Company>> {
    state
        .policy
        .require(&principal, PermissionCategory::Companies, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Company, id, None).await?;

    if payload.password.is_some() && !principal.is_superuser {
        return Err(AppError::forbidden("only a superuser may set the company credential"));
    }

    let mut company = fetch_by_id::<DbCompany>(&state.pool, Entity::Company, COMPANY_COLUMNS, id).await?;
    if let Some(name) = payload.name {
        company.name = name;
    }
    if let Some(email) = payload.email {
        company.email = email;
    }
    if let Some(phone_number) = payload.phone_number {
        company.phone_number = phone_number;
    }
    if let Some(address) = payload.address {
        company.address = address;
    }
    if let Some(password) = payload.password.as_deref() {
        company.password_hash = Some(hash_password(password)?);
    }
    company.updated_at = utc_now();

    sqlx::query(
        "UPDATE companies SET name = ?, email = ?, phone_number = ?, address = ?, password_hash = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&company.name)
    .bind(&company.email)
    .bind(&company.phone_number)
    .bind(&company.address)
    .bind(&company.password_hash)
    .bind(company.updated_at)
    .bind(id)
    .execute(&state.pool)
    .await
    .map_err(conflict_on_email)?;

    Ok(Json(company.into()))
}

#[utoipa::path(
    delete,
    path = "/companies/{id}",
    tag = "Companies",
    params(("id" = Uuid, Path, description = "Company id")),
    responses((status = 204, description = "Company and everything it owns deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_company(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Companies, PermissionAction::Delete)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Company, id, None).await?;

    sqlx::query("DELETE FROM companies WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(company_id = %id, "company deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/companies/{id}/activate",
    tag = "Companies",
    params(("id" = Uuid, Path, description = "Company id")),
    responses((status = 200, description = "Company activated", body = Company)),
    security(("bearerAuth" = []))
)]
pub async fn activate_company(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<Company>> {
    set_active(&state, &principal, id, true).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/companies/{id}/deactivate",
    tag = "Companies",
    params(("id" = Uuid, Path, description = "Company id")),
    responses((status = 200, description = "Company deactivated", body = Company)),
    security(("bearerAuth" = []))
)]
pub async fn deactivate_company(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Company>> {
    set_active(&state, &principal, id, false).await.map(Json)
}

async fn set_active(state: &AppState, principal: &Principal, id: Uuid, active: bool) -> AppResult<Company> {
    state
        .policy
        .require(principal, PermissionCategory::Companies, PermissionAction::Activate)
        .await?;
    authorize_object(&state.pool, principal, Entity::Company, id, None).await?;

    sqlx::query("UPDATE companies SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(active)
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(company_id = %id, active, "company activation changed");
    Ok(fetch_by_id::<DbCompany>(&state.pool, Entity::Company, COMPANY_COLUMNS, id)
        .await?
        .into())
}
