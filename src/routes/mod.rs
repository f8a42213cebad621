pub mod auth;
pub mod blueprints;
pub mod companies;
pub mod contractors;
pub mod departments;
pub mod documents;
pub mod health;
pub mod notifications;
pub mod pins;
pub mod projects;
pub mod rbac;
pub mod reports;
pub mod task_activity;
pub mod tasks;
pub mod users;

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::multipart::MultipartError;
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Multipart};
use axum::http::request::Parts;
use axum::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::events::RequestContext;
use crate::files::UploadedFile;

/// `Json` whose rejections use the `validation_error` body instead of axum's
/// plain-text one.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Address a request is attributed to: the socket peer, or the first
/// forwarded hop when `trust_proxy_headers` is on. `None` when the server was
/// not started with connect info and no trusted header is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAddr(pub Option<String>);

#[async_trait]
impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let forwarded = if state.config.trust_proxy_headers {
            RequestContext::from_headers(&parts.headers).ip
        } else {
            None
        };
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(forwarded.or(peer)))
    }
}

pub(crate) fn require_superuser(principal: &Principal) -> AppResult<()> {
    if principal.is_superuser {
        Ok(())
    } else {
        tracing::debug!(user_id = %principal.user_id, "superuser required");
        Err(AppError::forbidden("superuser access required"))
    }
}

/// A multipart body with one `file` part and any number of text fields.
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub fn take_file(&mut self) -> AppResult<UploadedFile> {
        self.file
            .take()
            .ok_or_else(|| AppError::validation("multipart field 'file' is required"))
    }

    /// Trimmed text field, treating blank values as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Bodies cut off by the request size limit are `file_too_large`; anything
/// else is a malformed form.
fn multipart_error(context: &str, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::file_too_large(format!("request body exceeds the upload limit: {}", err.body_text()))
    } else {
        AppError::validation(format!("{context}: {}", err.body_text()))
    }
}

pub(crate) async fn read_upload(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error("invalid multipart payload", err))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| multipart_error("failed to read file", err))?;
            form.file = Some(UploadedFile {
                file_name,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|err| multipart_error(&format!("failed to read field {name}"), err))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}
