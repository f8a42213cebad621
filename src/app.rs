use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{PermissionStore, PolicyEvaluator, StorePolicyEvaluator};
use crate::config::AppConfig;
use crate::docs;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_notification_listener, EventBus};
use crate::rate_limit::RateLimiter;
use crate::review::run_expiry_sweeper;
use crate::routes::{
    auth, companies, contractors, departments, documents, health, notifications, pins, projects, rbac, reports, tasks,
    users,
};
use crate::storage::{FileStorage, LocalFileStorage};

/// Multipart framing on top of the largest accepted file.
const BODY_LIMIT_MARGIN: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub event_bus: EventBus,
    pub permissions: PermissionStore,
    pub policy: Arc<dyn PolicyEvaluator>,
    pub storage: Arc<dyn FileStorage>,
    pub login_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// State with no notification listener attached; events published on
    /// `event_bus` are dropped until something subscribes.
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        let (event_bus, _) = init_event_bus();
        Self::with_bus(pool, config, event_bus)
    }

    fn with_bus(pool: SqlitePool, config: AppConfig, event_bus: EventBus) -> Self {
        let permissions = PermissionStore::new(pool.clone());
        Self {
            policy: Arc::new(StorePolicyEvaluator::new(permissions.clone())),
            storage: Arc::new(LocalFileStorage::new(config.media_root.clone())),
            login_limiter: Arc::new(RateLimiter::new(config.login_rate)),
            config: Arc::new(config),
            permissions,
            event_bus,
            pool,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AppConfig::from_env().map_err(|err| AppError::configuration(format!("{err:#}")))?;
    create_app_with_config(pool, config).await
}

/// Build the router and start the background tasks on the current runtime:
/// the notification listener always, the review expiry sweeper when
/// `config.sweep_interval` is set.
pub async fn create_app_with_config(pool: SqlitePool, config: AppConfig) -> Result<Router, AppError> {
    let (event_bus, receiver) = init_event_bus();
    tokio::spawn(start_notification_listener(receiver, pool.clone()));

    let body_limit = config
        .uploads
        .max_blueprint_bytes
        .max(config.uploads.max_attachment_bytes)
        .saturating_add(BODY_LIMIT_MARGIN);
    let body_limit = usize::try_from(body_limit).map_err(|_| AppError::configuration("upload limit is too large"))?;
    let sweep_interval = config.sweep_interval;
    let state = AppState::with_bus(pool, config, event_bus);
    if let Some(every) = sweep_interval {
        tokio::spawn(run_expiry_sweeper(state.pool.clone(), state.event_bus.clone(), every));
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let api = Router::new()
        .nest("/auth", auth::routes())
        .nest("/companies", companies::routes())
        .nest("/contractors", contractors::routes())
        .nest("/departments", departments::routes())
        .nest("/users", users::routes())
        .nest("/projects", projects::routes())
        .nest("/pins", pins::routes())
        .nest("/tasks", tasks::routes())
        .nest("/documents", documents::routes())
        .nest("/notifications", notifications::routes())
        .nest("/rbac", rbac::routes())
        .nest("/reports", reports::routes())
        .nest("/health", health::routes());

    let openapi = docs::build_openapi().map_err(|err| AppError::internal(format!("failed to build OpenAPI: {err:#}")))?;

    let router = Router::new()
        .nest("/api", api)
        .with_state(state)
        .merge(docs::swagger_routes(openapi))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
