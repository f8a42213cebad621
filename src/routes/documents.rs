use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::read_upload;
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Role, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_by_id, fetch_page, fetch_visible, Listing};
use crate::errors::{is_unique_violation, AppError, AppResult};
use crate::events::{publish, WorkflowEvent};
use crate::files::{validate, UploadKind, ValidatedFile};
use crate::models::document::{
    Document, DocumentDetail, DocumentFilter, DocumentSide, DocumentVersion, DOCUMENT_COLUMNS, VERSION_COLUMNS,
};
use crate::models::project::{Project, PROJECT_COLUMNS};
use crate::review::{ReviewAction, ReviewRequest, ReviewState, ReviewStatus};
use crate::utils::utc_now;

const VERSION_INSERT_ATTEMPTS: usize = 5;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_documents).post(upload_document))
        .route("/pending-review", get(pending_review))
        .route("/overdue", get(overdue_documents))
        .route("/:id", get(get_document).delete(delete_document))
        .route("/:id/file", get(download_document))
        .route("/:id/versions", get(list_versions).post(upload_version))
        .route("/:id/approve", post(approve_document))
        .route("/:id/reject", post(reject_document))
        .route("/:id/request-modification", post(request_document_modification))
}

const DOCUMENT_LISTING: Listing<'static> = Listing {
    entity: Entity::Document,
    columns: DOCUMENT_COLUMNS,
    order_by: "documents.uploaded_at DESC",
};

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &DocumentFilter) {
    if let Some(project_id) = filter.project_id {
        query.push(" AND documents.project_id = ").push_bind(project_id);
    }
    if let Some(side) = filter.side {
        query.push(" AND documents.side = ").push_bind(side);
    }
    if let Some(status) = filter.review_status {
        query.push(" AND documents.review_status = ").push_bind(status);
    }
}

async fn detail(pool: &SqlitePool, document: Document, now: DateTime<Utc>) -> AppResult<DocumentDetail> {
    let latest_version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version_number) FROM document_versions WHERE document_id = ?")
            .bind(document.id)
            .fetch_one(pool)
            .await?;

    Ok(DocumentDetail {
        timing: document.review.timing(now),
        document,
        latest_version,
    })
}

fn storage_key(project_id: Uuid, file: &ValidatedFile) -> String {
    format!("documents/{project_id}/{}.{}", Uuid::new_v4(), file.file_type())
}

async fn store(state: &AppState, key: &str, file: &ValidatedFile) -> AppResult<()> {
    state
        .storage
        .put(key, &file.bytes)
        .await
        .map_err(|err| AppError::internal(format!("failed to store document: {err:#}")))
}

async fn discard(state: &AppState, key: &str) {
    if let Err(err) = state.storage.delete(key).await {
        tracing::warn!(%key, error = %err, "failed to remove orphaned document file");
    }
}

/// Side a principal uploads for. Superusers may pick; everyone else uploads
/// for their own party and naming the other one is rejected.
fn upload_side(principal: &Principal, requested: Option<&str>) -> AppResult<DocumentSide> {
    let requested = requested
        .map(|raw| DocumentSide::parse(raw).ok_or_else(|| AppError::validation(format!("unknown side '{raw}'"))))
        .transpose()?;
    let own = DocumentSide::for_role(principal.role);

    match requested {
        Some(side) if principal.is_superuser => Ok(side),
        Some(side) if side != own => Err(AppError::validation(format!(
            "a {} uploads {:?} side documents only",
            principal.role.display_name(),
            own
        ))),
        _ => Ok(own),
    }
}

#[utoipa::path(
    get,
    path = "/documents",
    tag = "Documents",
    params(PageQuery, DocumentFilter),
    responses((status = 200, description = "Visible documents", body = crate::db::paging::DocumentPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_documents(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DocumentFilter>,
) -> AppResult<Json<Page<Document>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Documents, PermissionAction::Read)
        .await?;

    let scope = Scope::for_principal(&principal);
    let page = fetch_page(&state.pool, &scope, DOCUMENT_LISTING, &page, |query| push_filter(query, &filter)).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/documents/pending-review",
    tag = "Documents",
    params(PageQuery, DocumentFilter),
    responses(
        (status = 200, description = "Pending documents from the other side within the caller's tenant", body = crate::db::paging::DocumentPage),
        (status = 403, description = "Only document controllers review documents")
    ),
    security(("bearerAuth" = []))
)]
pub async fn pending_review(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DocumentFilter>,
) -> AppResult<Json<Page<Document>>> {
    ensure_document_controller(&principal)?;

    let scope = Scope::for_principal(&principal);
    let page = fetch_page(&state.pool, &scope, DOCUMENT_LISTING, &page, |query| {
        query.push(" AND documents.review_status = 'PENDING'");
        push_filter(query, &filter);
    })
    .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/documents/overdue",
    tag = "Documents",
    params(PageQuery, DocumentFilter),
    responses((status = 200, description = "Visible pending documents past their review deadline", body = crate::db::paging::DocumentPage)),
    security(("bearerAuth" = []))
)]
pub async fn overdue_documents(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<DocumentFilter>,
) -> AppResult<Json<Page<Document>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Documents, PermissionAction::Read)
        .await?;

    let scope = Scope::for_principal(&principal);
    let now = utc_now();
    let page = fetch_page(&state.pool, &scope, DOCUMENT_LISTING, &page, |query| {
        query
            .push(" AND documents.review_status = 'PENDING' AND documents.review_deadline IS NOT NULL AND documents.review_deadline < ")
            .push_bind(now);
        push_filter(query, &filter);
    })
    .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/documents/{id}",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document with review timing", body = DocumentDetail),
        (status = 404, description = "Document not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DocumentDetail>> {
    let document: Document =
        fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Document, DOCUMENT_COLUMNS, id).await?;
    Ok(Json(detail(&state.pool, document, utc_now()).await?))
}

#[utoipa::path(
    post,
    path = "/documents",
    tag = "Documents",
    request_body(content = crate::models::document::DocumentUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document uploaded, review window opened", body = DocumentDetail),
        (status = 413, description = "File too large"),
        (status = 415, description = "Unsupported file type")
    ),
    security(("bearerAuth" = []))
)]
pub async fn upload_document(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentDetail>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Documents, PermissionAction::Upload)
        .await?;

    let mut form = read_upload(multipart).await?;
    let project_id = form
        .text("project_id")
        .ok_or_else(|| AppError::validation("project_id is required"))?
        .parse::<Uuid>()
        .map_err(|_| AppError::validation("project_id must be a UUID"))?;
    let title = form
        .text("title")
        .ok_or_else(|| AppError::validation("title is required"))?;
    let description = form.text("description").unwrap_or_default();
    let side = upload_side(&principal, form.text("side").as_deref())?;

    authorize_object(&state.pool, &principal, Entity::Project, project_id, Some("created_by")).await?;
    let project: Project = fetch_by_id(&state.pool, Entity::Project, PROJECT_COLUMNS, project_id).await?;
    let contractor_id = match side {
        DocumentSide::Contractor => principal.contractor_id.or(project.contractor_id),
        DocumentSide::Company => None,
    };

    let file = validate(form.take_file()?, UploadKind::Attachment, &state.config.uploads)?;
    let key = storage_key(project.id, &file);
    store(&state, &key, &file).await?;

    let now = utc_now();
    let review = ReviewState::open(now, state.config.review.window_days);
    let document_id = Uuid::new_v4();
    let inserted = sqlx::query(
        "INSERT INTO documents (id, project_id, contractor_id, company_id, side, title, description, file_path, file_name, file_type, file_size, checksum, review_status, review_deadline, review_notes, uploaded_by, uploaded_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?, ?)",
    )
    .bind(document_id)
    .bind(project.id)
    .bind(contractor_id)
    .bind(project.company_id)
    .bind(side)
    .bind(&title)
    .bind(&description)
    .bind(&key)
    .bind(&file.file_name)
    .bind(file.file_type())
    .bind(file.size)
    .bind(&file.checksum)
    .bind(review.review_status)
    .bind(review.review_deadline)
    .bind(principal.user_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await;
    if let Err(err) = inserted {
        discard(&state, &key).await;
        return Err(err.into());
    }

    tracing::info!(%document_id, project_id = %project.id, ?side, size = file.size, "document uploaded");
    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::DocumentUploaded {
            document_id,
            project_id: project.id,
            title,
            side,
        }],
    );

    let document = fetch_by_id(&state.pool, Entity::Document, DOCUMENT_COLUMNS, document_id).await?;
    Ok((StatusCode::CREATED, Json(detail(&state.pool, document, now).await?)))
}

#[utoipa::path(
    delete,
    path = "/documents/{id}",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses((status = 204, description = "Document and its versions deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_document(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Documents, PermissionAction::Delete)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Document, id, Some("uploaded_by")).await?;

    let files: Vec<String> = sqlx::query_scalar(
        "SELECT file_path FROM documents WHERE id = ? UNION SELECT file_path FROM document_versions WHERE document_id = ?",
    )
    .bind(id)
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    for key in files {
        discard(&state, &key).await;
    }
    tracing::info!(document_id = %id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/documents/{id}/file",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses((status = 200, description = "Current document file")),
    security(("bearerAuth" = []))
)]
pub async fn download_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let document: Document =
        fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Document, DOCUMENT_COLUMNS, id).await?;
    let bytes = state
        .storage
        .get(&document.file_path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read document: {err:#}")))?;

    let content_type = mime_guess::from_path(&document.file_name)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!("attachment; filename=\"{}\"", document.file_name.replace('"', ""));
    Ok(([(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)], bytes))
}

#[utoipa::path(
    get,
    path = "/documents/{id}/versions",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses((status = 200, description = "Version history, newest first", body = [DocumentVersion])),
    security(("bearerAuth" = []))
)]
pub async fn list_versions(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentVersion>>> {
    Scope::for_principal(&principal)
        .ensure_visible(&state.pool, Entity::Document, id)
        .await?;

    let versions = sqlx::query_as::<_, DocumentVersion>(&format!(
        "SELECT {VERSION_COLUMNS} FROM document_versions WHERE document_versions.document_id = ? ORDER BY document_versions.version_number DESC"
    ))
    .bind(id)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(versions))
}

/// Append a version with the next number for `document_id`. The number is
/// computed inside the insert so concurrent uploads serialize on the write
/// lock; the UNIQUE constraint backs that up and a collision is retried.
async fn insert_version(
    pool: &SqlitePool,
    document_id: Uuid,
    key: &str,
    file: &ValidatedFile,
    change_notes: &str,
    uploader: Uuid,
    now: DateTime<Utc>,
) -> AppResult<i64> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO document_versions (id, document_id, version_number, file_path, file_name, file_type, file_size, checksum, change_notes, uploaded_by, uploaded_at) \
             SELECT ?, ?, COALESCE(MAX(version_number), 0) + 1, ?, ?, ?, ?, ?, ?, ?, ? FROM document_versions WHERE document_id = ? \
             RETURNING version_number",
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(key)
        .bind(&file.file_name)
        .bind(file.file_type())
        .bind(file.size)
        .bind(&file.checksum)
        .bind(change_notes)
        .bind(uploader)
        .bind(now)
        .bind(document_id)
        .fetch_one(pool)
        .await;

        match inserted {
            Ok(version_number) => return Ok(version_number),
            Err(err) if is_unique_violation(&err) && attempt < VERSION_INSERT_ATTEMPTS => {
                tracing::debug!(%document_id, attempt, "version number collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[utoipa::path(
    post,
    path = "/documents/{id}/versions",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body(content = crate::models::document::VersionUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Version stored, document back to PENDING", body = DocumentVersion),
        (status = 413, description = "File too large"),
        (status = 415, description = "Unsupported file type")
    ),
    security(("bearerAuth" = []))
)]
pub async fn upload_version(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentVersion>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Documents, PermissionAction::Upload)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Document, id, Some("uploaded_by")).await?;
    let document: Document = fetch_by_id(&state.pool, Entity::Document, DOCUMENT_COLUMNS, id).await?;

    let mut form = read_upload(multipart).await?;
    let change_notes = form.text("change_notes").unwrap_or_default();
    let file = validate(form.take_file()?, UploadKind::Attachment, &state.config.uploads)?;
    let key = storage_key(document.project_id, &file);
    store(&state, &key, &file).await?;

    let now = utc_now();
    let version_number = match insert_version(&state.pool, id, &key, &file, &change_notes, principal.user_id, now).await {
        Ok(number) => number,
        Err(err) => {
            discard(&state, &key).await;
            return Err(err);
        }
    };

    // Every new version opens a fresh review cycle; only the newest version
    // becomes the document's current file.
    let review = ReviewState::open(now, state.config.review.window_days);
    sqlx::query(
        "UPDATE documents SET review_status = ?, review_deadline = ?, reviewed_by = NULL, reviewed_at = NULL, review_notes = '', updated_at = ? WHERE id = ?",
    )
    .bind(review.review_status)
    .bind(review.review_deadline)
    .bind(now)
    .bind(id)
    .execute(&state.pool)
    .await?;
    sqlx::query(
        "UPDATE documents SET file_path = ?, file_name = ?, file_type = ?, file_size = ?, checksum = ? WHERE id = ? AND NOT EXISTS (SELECT 1 FROM document_versions WHERE document_id = ? AND version_number > ?)",
    )
    .bind(&key)
    .bind(&file.file_name)
    .bind(file.file_type())
    .bind(file.size)
    .bind(&file.checksum)
    .bind(id)
    .bind(id)
    .bind(version_number)
    .execute(&state.pool)
    .await?;

    tracing::info!(document_id = %id, version_number, "document version uploaded");
    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::DocumentVersionUploaded {
            document_id: id,
            project_id: document.project_id,
            title: document.title,
            side: document.side,
            version_number,
        }],
    );

    let version = sqlx::query_as::<_, DocumentVersion>(&format!(
        "SELECT {VERSION_COLUMNS} FROM document_versions WHERE document_versions.document_id = ? AND document_versions.version_number = ?"
    ))
    .bind(id)
    .bind(version_number)
    .fetch_one(&state.pool)
    .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

fn ensure_document_controller(principal: &Principal) -> AppResult<()> {
    if principal.is_superuser || principal.role == Role::DocumentController {
        Ok(())
    } else {
        Err(AppError::forbidden("only document controllers review documents"))
    }
}

async fn review_document(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
    action: ReviewAction,
    notes: Option<String>,
) -> AppResult<DocumentDetail> {
    ensure_document_controller(principal)?;
    state
        .policy
        .require(principal, PermissionCategory::Documents, action.permission())
        .await?;

    let mut document: Document =
        fetch_visible(&state.pool, &Scope::for_principal(principal), Entity::Document, DOCUMENT_COLUMNS, id).await?;
    let now = utc_now();
    let from = document.review.apply(action, principal.user_id, notes, now)?;
    document.updated_at = now;

    let result = sqlx::query(
        "UPDATE documents SET review_status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?, updated_at = ? WHERE id = ? AND review_status = ?",
    )
    .bind(document.review.review_status)
    .bind(document.review.reviewed_by)
    .bind(document.review.reviewed_at)
    .bind(&document.review.review_notes)
    .bind(now)
    .bind(id)
    .bind(ReviewStatus::Pending)
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::invalid_transition("document is no longer pending review"));
    }

    tracing::info!(
        document_id = %id,
        reviewer = %principal.user_id,
        to = document.review.review_status.as_str(),
        "document reviewed"
    );
    publish(
        &state.event_bus,
        Some(principal.user_id),
        [WorkflowEvent::DocumentReviewed {
            document_id: id,
            project_id: document.project_id,
            title: document.title.clone(),
            from,
            to: document.review.review_status,
            uploaded_by: document.uploaded_by,
        }],
    );

    detail(&state.pool, document, now).await
}

#[utoipa::path(
    post,
    path = "/documents/{id}/approve",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Document approved", body = DocumentDetail),
        (status = 409, description = "Document is not pending review")
    ),
    security(("bearerAuth" = []))
)]
pub async fn approve_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<DocumentDetail>> {
    let notes = payload.and_then(|Json(body)| body.notes);
    review_document(&state, &principal, id, ReviewAction::Approve, notes)
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/documents/{id}/reject",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Document rejected", body = DocumentDetail),
        (status = 409, description = "Document is not pending review")
    ),
    security(("bearerAuth" = []))
)]
pub async fn reject_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<DocumentDetail>> {
    let notes = payload.and_then(|Json(body)| body.notes);
    review_document(&state, &principal, id, ReviewAction::Reject, notes)
        .await
        .map(Json)
}

#[utoipa::path(
    post,
    path = "/documents/{id}/request-modification",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Modification requested", body = DocumentDetail),
        (status = 409, description = "Document is not pending review")
    ),
    security(("bearerAuth" = []))
)]
pub async fn request_document_modification(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReviewRequest>>,
) -> AppResult<Json<DocumentDetail>> {
    let notes = payload.and_then(|Json(body)| body.notes);
    review_document(&state, &principal, id, ReviewAction::RequestModification, notes)
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploaders_keep_to_their_side() {
        let contractor = Principal::new(Uuid::new_v4(), Role::Contractor);
        assert_eq!(upload_side(&contractor, None).unwrap(), DocumentSide::Contractor);
        assert_eq!(upload_side(&contractor, Some("contractor")).unwrap(), DocumentSide::Contractor);
        assert!(matches!(upload_side(&contractor, Some("COMPANY")), Err(AppError::Validation(_))));

        let admin = Principal::new(Uuid::new_v4(), Role::CompanyAdmin);
        assert_eq!(upload_side(&admin, None).unwrap(), DocumentSide::Company);

        let root = Principal::new(Uuid::new_v4(), Role::CompanyAdmin).superuser();
        assert_eq!(upload_side(&root, Some("contractor")).unwrap(), DocumentSide::Contractor);
        assert!(matches!(upload_side(&root, Some("both")), Err(AppError::Validation(_))));
    }

    #[test]
    fn only_controllers_review() {
        let controller = Principal::new(Uuid::new_v4(), Role::DocumentController);
        assert!(ensure_document_controller(&controller).is_ok());
        assert!(ensure_document_controller(&Principal::new(Uuid::new_v4(), Role::CompanyAdmin)).is_err());
        assert!(ensure_document_controller(&Principal::new(Uuid::new_v4(), Role::Worker).superuser()).is_ok());
    }
}
