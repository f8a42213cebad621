use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::Role;
use crate::review::{ReviewState, ReviewStatus, ReviewTiming};

pub const DOCUMENT_COLUMNS: &str = "documents.id, documents.project_id, documents.contractor_id, documents.company_id, documents.side, documents.title, documents.description, documents.file_path, documents.file_name, documents.file_type, documents.file_size, documents.checksum, documents.review_status, documents.review_deadline, documents.reviewed_by, documents.reviewed_at, documents.review_notes, documents.uploaded_by, documents.uploaded_at, documents.updated_at";

pub const VERSION_COLUMNS: &str = "document_versions.id, document_versions.document_id, document_versions.version_number, document_versions.file_path, document_versions.file_name, document_versions.file_type, document_versions.file_size, document_versions.checksum, document_versions.change_notes, document_versions.uploaded_by, document_versions.uploaded_at";

/// Party that produced a document. The other party reviews it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentSide {
    Contractor,
    Company,
}

impl DocumentSide {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Contractor => DocumentSide::Contractor,
            _ => DocumentSide::Company,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            DocumentSide::Contractor => DocumentSide::Company,
            DocumentSide::Company => DocumentSide::Contractor,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CONTRACTOR" => Some(DocumentSide::Contractor),
            "COMPANY" => Some(DocumentSide::Company),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub contractor_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub side: DocumentSide,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub checksum: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub review: ReviewState,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    #[serde(flatten)]
    pub timing: ReviewTiming,
    pub latest_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub checksum: String,
    pub change_notes: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DocumentFilter {
    pub project_id: Option<Uuid>,
    pub side: Option<DocumentSide>,
    pub review_status: Option<ReviewStatus>,
}

/// Multipart body accepted by the document upload route.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct DocumentUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// Only superusers may choose; everyone else uploads for their own side.
    pub side: Option<DocumentSide>,
}

/// Multipart body accepted by the version upload route.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct VersionUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub change_notes: Option<String>,
}
