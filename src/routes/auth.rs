use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{AppJson, ClientAddr, MessageResponse};
use crate::app::AppState;
use crate::authz::{Principal, Role};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::events::{publish, WorkflowEvent};
use crate::jwt::TokenKind;
use crate::models::company::{DbCompany, COMPANY_COLUMNS};
use crate::models::user::{
    AuthResponse, ChangePasswordRequest, DbUser, LoginRequest, RefreshRequest, RefreshResponse, RegisterRequest, User,
    USER_COLUMNS,
};
use crate::utils::{hash_password, utc_now, verify_optional_password, verify_password};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .route("/change-password", post(change_password))
        .route("/logout", post(logout))
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Passwords differ or role not assignable"),
        (status = 409, description = "Username or email already in use"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    state
        .login_limiter
        .check_attempt("register", addr.as_deref(), &payload.email)?;

    if payload.password != payload.password_confirm {
        return Err(AppError::validation("passwords do not match"));
    }
    if !payload.role.is_assignable() {
        return Err(AppError::invalid_role(payload.role.as_str()));
    }
    if payload.username.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(AppError::validation("username and email are required"));
    }
    ensure_identity_available(&state.pool, &payload.username, &payload.email).await?;
    let password_hash = hash_password(&payload.password)?;

    let now = utc_now();
    let user_id = Uuid::new_v4();
    let mut events = Vec::new();
    let mut tx = state.pool.begin().await?;

    let company_id = match (payload.role, payload.company_name.as_deref().map(str::trim)) {
        (Role::CompanyAdmin, Some(name)) if !name.is_empty() => {
            let company_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO companies (id, name, email, phone_number, address, password_hash, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, '', NULL, 1, ?, ?)",
            )
            .bind(company_id)
            .bind(name)
            .bind(&payload.email)
            .bind(payload.phone_number.clone().unwrap_or_default())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::conflict("a company with this email already exists")
                } else {
                    err.into()
                }
            })?;
            events.push(WorkflowEvent::CompanyCreated {
                company_id,
                name: name.to_string(),
            });
            Some(company_id)
        }
        _ => None,
    };

    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name, role, is_superuser, phone_number, company_id, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?, ?)",
    )
    .bind(user_id)
    .bind(payload.username.trim())
    .bind(payload.email.trim())
    .bind(password_hash)
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(payload.role)
    .bind(payload.phone_number.unwrap_or_default())
    .bind(company_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::conflict("username or email already in use")
        } else {
            err.into()
        }
    })?;
    tx.commit().await?;

    events.push(WorkflowEvent::UserRegistered {
        user_id,
        username: payload.username.trim().to_string(),
    });
    publish(&state.event_bus, Some(user_id), events);

    let user = fetch_user(&state.pool, user_id).await?;
    let tokens = state.config.jwt.issue_pair(user_id)?;
    tracing::info!(%user_id, role = %user.role, "user registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { user, tokens })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    state
        .login_limiter
        .check_attempt("login", addr.as_deref(), &payload.username)?;

    let user = match authenticate_user(&state.pool, &payload).await? {
        Some(user) => user,
        None => authenticate_company(&state.pool, &payload)
            .await?
            .ok_or(AppError::InvalidCredentials)?,
    };

    let tokens = state.config.jwt.issue_pair(user.id)?;
    tracing::info!(user_id = %user.id, "login succeeded");

    Ok(Json(AuthResponse {
        user: user.into(),
        tokens,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Refresh token invalid or expired")
    )
)]
pub async fn refresh(State(state): State<AppState>, AppJson(payload): AppJson<RefreshRequest>) -> AppResult<Json<RefreshResponse>> {
    let claims = state.config.jwt.decode(&payload.refresh, TokenKind::Refresh)?;

    let principal = Principal::load(&state.pool, claims.sub)
        .await?
        .filter(|principal| principal.is_active)
        .ok_or_else(|| AppError::unauthorized("account is inactive or missing"))?;

    let access = state.config.jwt.encode(principal.user_id, TokenKind::Access)?;
    Ok(Json(RefreshResponse { access }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<User>> {
    Ok(Json(fetch_user(&state.pool, principal.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/auth/change-password",
    tag = "Auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Old password wrong or new passwords differ")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let current: Option<String> = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = ?")
        .bind(principal.user_id)
        .fetch_one(&state.pool)
        .await?;

    if !verify_optional_password(&payload.old_password, current.as_deref())? {
        return Err(AppError::validation("old password is incorrect"));
    }
    if payload.new_password != payload.new_password_confirm {
        return Err(AppError::validation("new passwords do not match"));
    }

    let password_hash = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(utc_now())
        .bind(principal.user_id)
        .execute(&state.pool)
        .await?;

    tracing::info!(user_id = %principal.user_id, "password changed");
    Ok(Json(MessageResponse::new("Password changed")))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged", body = MessageResponse)),
    security(("bearerAuth" = []))
)]
pub async fn logout(_principal: Principal) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse::new("Logged out")))
}

/// First path: a user matched by username or email with their own password.
async fn authenticate_user(pool: &SqlitePool, payload: &LoginRequest) -> AppResult<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE (users.username = ? OR lower(users.email) = lower(?)) AND users.is_active = 1"
    ))
    .bind(payload.username.trim())
    .bind(payload.username.trim())
    .fetch_optional(pool)
    .await?;

    match user {
        Some(user) if verify_optional_password(&payload.password, user.password_hash.as_deref())? => Ok(Some(user)),
        _ => Ok(None),
    }
}

/// Second path: the company email with the company secret. Signs in as the
/// company's admin, provisioning one on first use.
async fn authenticate_company(pool: &SqlitePool, payload: &LoginRequest) -> AppResult<Option<DbUser>> {
    let company = sqlx::query_as::<_, DbCompany>(&format!(
        "SELECT {COMPANY_COLUMNS} FROM companies WHERE lower(companies.email) = lower(?) AND companies.is_active = 1"
    ))
    .bind(payload.username.trim())
    .fetch_optional(pool)
    .await?;

    let Some(company) = company else {
        return Ok(None);
    };
    let Some(hash) = company.password_hash.as_deref() else {
        return Ok(None);
    };
    if !verify_password(&payload.password, hash)? {
        return Ok(None);
    }

    if let Some(admin) = company_admin(pool, company.id).await? {
        return Ok(Some(admin));
    }

    let now = utc_now();
    let username = format!("company-{}", company.id.simple());
    let inserted = sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name, role, is_superuser, company_id, is_active, created_at, updated_at) VALUES (?, ?, ?, NULL, ?, '', ?, 0, ?, 1, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(&username)
    .bind(format!("{username}@company.local"))
    .bind(&company.name)
    .bind(Role::CompanyAdmin)
    .bind(company.id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => tracing::info!(company_id = %company.id, "provisioned company admin for company login"),
        // Lost a race with a concurrent login for the same company.
        Err(err) if is_unique_violation(&err) => {}
        Err(err) => return Err(err.into()),
    }

    company_admin(pool, company.id).await
}

async fn company_admin(pool: &SqlitePool, company_id: Uuid) -> AppResult<Option<DbUser>> {
    let admin = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE users.company_id = ? AND users.role = 'COMPANY_ADMIN' AND users.is_active = 1 ORDER BY users.created_at, users.username LIMIT 1"
    ))
    .bind(company_id)
    .fetch_optional(pool)
    .await?;
    Ok(admin)
}

pub(crate) async fn ensure_identity_available(pool: &SqlitePool, username: &str, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE username = ? OR lower(email) = lower(?)")
        .bind(username.trim())
        .bind(email.trim())
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("username or email already in use"));
    }

    Ok(())
}

pub(crate) async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE users.id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(user.into())
}
