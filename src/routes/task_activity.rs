use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{read_upload, AppJson};
use crate::app::AppState;
use crate::authz::{Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::files::{validate, UploadKind};
use crate::models::task::{
    CommentRequest, LogTimeRequest, TaskAttachment, TaskComment, TimeEntry, ATTACHMENT_COLUMNS, COMMENT_COLUMNS,
    TIME_ENTRY_COLUMNS,
};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id/time-entries", get(list_time_entries).post(log_time))
        .route("/:id/comments", get(list_comments).post(add_comment))
        .route("/:id/comments/:comment_id", delete(delete_comment))
        .route("/:id/attachments", get(list_attachments).post(upload_attachment))
        .route("/:id/attachments/:attachment_id/file", get(download_attachment))
}

async fn visible_task(
    state: &AppState,
    principal: &Principal,
    action: PermissionAction,
    task_id: Uuid,
) -> AppResult<()> {
    state
        .policy
        .require(principal, PermissionCategory::Tasks, action)
        .await?;
    Scope::for_principal(principal)
        .ensure_visible(&state.pool, Entity::Task, task_id)
        .await
}

async fn rows_for_task<T>(pool: &SqlitePool, entity: Entity, columns: &str, order_by: &str, task_id: Uuid) -> AppResult<Vec<T>>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    let table = entity.table();
    let rows = sqlx::query_as::<_, T>(&format!(
        "SELECT {columns} FROM {table} WHERE {table}.task_id = ? ORDER BY {order_by}"
    ))
    .bind(task_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[utoipa::path(
    get,
    path = "/tasks/{id}/time-entries",
    tag = "Task activity",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Hours logged on the task, newest first", body = [TimeEntry])),
    security(("bearerAuth" = []))
)]
pub async fn list_time_entries(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TimeEntry>>> {
    visible_task(&state, &principal, PermissionAction::Read, id).await?;
    let entries = rows_for_task(
        &state.pool,
        Entity::TimeEntry,
        TIME_ENTRY_COLUMNS,
        "time_entries.date DESC, time_entries.created_at DESC",
        id,
    )
    .await?;
    Ok(Json(entries))
}

/// Records hours for the caller on one day and refreshes the task's
/// `actual_hours` total in the same transaction.
#[utoipa::path(
    post,
    path = "/tasks/{id}/time-entries",
    tag = "Task activity",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = LogTimeRequest,
    responses(
        (status = 201, description = "Time logged", body = TimeEntry),
        (status = 400, description = "Hours out of range"),
        (status = 409, description = "Time already logged for that day")
    ),
    security(("bearerAuth" = []))
)]
pub async fn log_time(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<LogTimeRequest>,
) -> AppResult<(StatusCode, Json<TimeEntry>)> {
    visible_task(&state, &principal, PermissionAction::Update, id).await?;
    payload.check().map_err(AppError::validation)?;

    let now = utc_now();
    let date = payload.date.unwrap_or_else(|| Utc::now().date_naive());
    let notes = payload.notes.as_deref().map(str::trim).unwrap_or_default();
    let entry_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO time_entries (id, task_id, user_id, hours, date, notes, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry_id)
    .bind(id)
    .bind(principal.user_id)
    .bind(payload.hours)
    .bind(date)
    .bind(notes)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::conflict(format!("time already logged for this task on {date}"))
        } else {
            err.into()
        }
    })?;
    sqlx::query(
        "UPDATE tasks SET actual_hours = (SELECT TOTAL(hours) FROM time_entries WHERE task_id = ?), updated_at = ? WHERE id = ?",
    )
    .bind(id)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(task_id = %id, %entry_id, hours = payload.hours, %date, "time logged");
    let entry = sqlx::query_as::<_, TimeEntry>(&format!("SELECT {TIME_ENTRY_COLUMNS} FROM time_entries WHERE id = ?"))
        .bind(entry_id)
        .fetch_one(&state.pool)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}/comments",
    tag = "Task activity",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Comments, oldest first", body = [TaskComment])),
    security(("bearerAuth" = []))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TaskComment>>> {
    visible_task(&state, &principal, PermissionAction::Read, id).await?;
    let comments = rows_for_task(
        &state.pool,
        Entity::TaskComment,
        COMMENT_COLUMNS,
        "task_comments.created_at",
        id,
    )
    .await?;
    Ok(Json(comments))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/comments",
    tag = "Task activity",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment added", body = TaskComment),
        (status = 400, description = "Empty comment")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<CommentRequest>,
) -> AppResult<(StatusCode, Json<TaskComment>)> {
    visible_task(&state, &principal, PermissionAction::Comment, id).await?;
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(AppError::validation("content must not be empty"));
    }

    let now = utc_now();
    let comment_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO task_comments (id, task_id, user_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(comment_id)
    .bind(id)
    .bind(principal.user_id)
    .bind(content)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    tracing::info!(task_id = %id, %comment_id, "task comment added");
    let comment = sqlx::query_as::<_, TaskComment>(&format!("SELECT {COMMENT_COLUMNS} FROM task_comments WHERE id = ?"))
        .bind(comment_id)
        .fetch_one(&state.pool)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// Authors remove their own comments; superusers remove any.
#[utoipa::path(
    delete,
    path = "/tasks/{id}/comments/{comment_id}",
    tag = "Task activity",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("comment_id" = Uuid, Path, description = "Comment id")
    ),
    responses((status = 204, description = "Comment removed"), (status = 403, description = "Not the author")),
    security(("bearerAuth" = []))
)]
pub async fn delete_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    visible_task(&state, &principal, PermissionAction::Comment, id).await?;
    let author: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT user_id FROM task_comments WHERE id = ? AND task_id = ?")
            .bind(comment_id)
            .bind(id)
            .fetch_optional(&state.pool)
            .await?;
    let Some(author) = author else {
        return Err(AppError::not_found("comment not found"));
    };
    if !principal.is_superuser && author != Some(principal.user_id) {
        return Err(AppError::forbidden("only the author can remove a comment"));
    }

    sqlx::query("DELETE FROM task_comments WHERE id = ?")
        .bind(comment_id)
        .execute(&state.pool)
        .await?;
    tracing::info!(task_id = %id, %comment_id, "task comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/tasks/{id}/attachments",
    tag = "Task activity",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Files attached to the task", body = [TaskAttachment])),
    security(("bearerAuth" = []))
)]
pub async fn list_attachments(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TaskAttachment>>> {
    visible_task(&state, &principal, PermissionAction::Read, id).await?;
    let attachments = rows_for_task(
        &state.pool,
        Entity::TaskAttachment,
        ATTACHMENT_COLUMNS,
        "task_attachments.uploaded_at DESC",
        id,
    )
    .await?;
    Ok(Json(attachments))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/attachments",
    tag = "Task activity",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body(content = crate::models::task::AttachmentUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File attached", body = TaskAttachment),
        (status = 400, description = "Unsupported file type"),
        (status = 413, description = "File too large")
    ),
    security(("bearerAuth" = []))
)]
pub async fn upload_attachment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<TaskAttachment>)> {
    visible_task(&state, &principal, PermissionAction::Update, id).await?;
    let mut form = read_upload(multipart).await?;
    let file = validate(form.take_file()?, UploadKind::Attachment, &state.config.uploads)?;

    let key = format!("task_attachments/{id}/{}.{}", Uuid::new_v4(), file.file_type());
    state
        .storage
        .put(&key, &file.bytes)
        .await
        .map_err(|err| AppError::internal(format!("failed to store attachment: {err:#}")))?;

    let attachment_id = Uuid::new_v4();
    let inserted = sqlx::query(
        "INSERT INTO task_attachments (id, task_id, file_path, file_name, file_type, file_size, checksum, uploaded_by, uploaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(attachment_id)
    .bind(id)
    .bind(&key)
    .bind(&file.file_name)
    .bind(file.file_type())
    .bind(file.size)
    .bind(&file.checksum)
    .bind(principal.user_id)
    .bind(utc_now())
    .execute(&state.pool)
    .await;
    if let Err(err) = inserted {
        if let Err(cleanup) = state.storage.delete(&key).await {
            tracing::warn!(%key, error = %cleanup, "failed to remove orphaned attachment file");
        }
        return Err(err.into());
    }

    tracing::info!(task_id = %id, %attachment_id, size = file.size, "task attachment uploaded");
    let attachment = find_attachment(&state.pool, id, attachment_id).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

async fn find_attachment(pool: &SqlitePool, task_id: Uuid, attachment_id: Uuid) -> AppResult<TaskAttachment> {
    sqlx::query_as::<_, TaskAttachment>(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM task_attachments WHERE id = ? AND task_id = ?"
    ))
    .bind(attachment_id)
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("attachment not found"))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}/attachments/{attachment_id}/file",
    tag = "Task activity",
    params(
        ("id" = Uuid, Path, description = "Task id"),
        ("attachment_id" = Uuid, Path, description = "Attachment id")
    ),
    responses((status = 200, description = "Attached file")),
    security(("bearerAuth" = []))
)]
pub async fn download_attachment(
    State(state): State<AppState>,
    principal: Principal,
    Path((id, attachment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<impl IntoResponse> {
    visible_task(&state, &principal, PermissionAction::Read, id).await?;
    let attachment = find_attachment(&state.pool, id, attachment_id).await?;
    let bytes = state
        .storage
        .get(&attachment.file_path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read attachment: {err:#}")))?;

    let content_type = mime_guess::from_path(&attachment.file_name)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!("attachment; filename=\"{}\"", attachment.file_name.replace('"', ""));
    Ok(([(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)], bytes))
}
