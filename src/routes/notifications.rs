use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Principal;
use crate::db::paging::{Page, PageQuery};
use crate::errors::{AppError, AppResult};
use crate::models::notification::{MarkedRead, Notification, NotificationFilter, UnreadCount};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, notification_type, title, message, is_read, reference_type, reference_id, created_at";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/mark-all-read", post(mark_all_read))
        .route("/:id/read", post(mark_read))
}

fn owned_by<'a>(query: &mut QueryBuilder<'a, Sqlite>, principal: &Principal, filter: &NotificationFilter) {
    query.push(" WHERE user_id = ").push_bind(principal.user_id);
    if let Some(is_read) = filter.is_read {
        query.push(" AND is_read = ").push_bind(is_read);
    }
}

/// Only ever the caller's own notifications, newest first.
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "Notifications",
    params(PageQuery, NotificationFilter),
    responses((status = 200, description = "Own notifications", body = crate::db::paging::NotificationPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<NotificationFilter>,
) -> AppResult<Json<Page<Notification>>> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM notifications");
    owned_by(&mut count, &principal, &filter);
    let total: i64 = count.build_query_scalar().fetch_one(&state.pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications"));
    owned_by(&mut select, &principal, &filter);
    select.push(" ORDER BY created_at DESC LIMIT ").push_bind(page.limit());
    select.push(" OFFSET ").push_bind(page.offset());
    let items = select.build_query_as::<Notification>().fetch_all(&state.pool).await?;

    Ok(Json(Page::new(items, total, &page)))
}

#[utoipa::path(
    get,
    path = "/notifications/unread-count",
    tag = "Notifications",
    responses((status = 200, description = "Unread notifications for the caller", body = UnreadCount)),
    security(("bearerAuth" = []))
)]
pub async fn unread_count(State(state): State<AppState>, principal: Principal) -> AppResult<Json<UnreadCount>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
        .bind(principal.user_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(UnreadCount { count }))
}

#[utoipa::path(
    post,
    path = "/notifications/mark-all-read",
    tag = "Notifications",
    responses((status = 200, description = "Number of notifications marked read", body = MarkedRead)),
    security(("bearerAuth" = []))
)]
pub async fn mark_all_read(State(state): State<AppState>, principal: Principal) -> AppResult<Json<MarkedRead>> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
        .bind(principal.user_id)
        .execute(&state.pool)
        .await?;
    Ok(Json(MarkedRead {
        updated: result.rows_affected(),
    }))
}

#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    tag = "Notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification marked read", body = Notification),
        (status = 404, description = "Notification not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn mark_read(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Notification>> {
    let notification = sqlx::query_as::<_, Notification>(&format!(
        "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ? RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(id)
    .bind(principal.user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("notification not found"))?;
    Ok(Json(notification))
}
