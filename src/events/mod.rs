use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::document::DocumentSide;
use crate::review::ReviewStatus;

mod dispatch;

pub use dispatch::{dispatch, recipients};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: &'static str, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

/// Side effects of a mutating operation, returned to the caller and then
/// published for notification fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    DocumentUploaded {
        document_id: Uuid,
        project_id: Uuid,
        title: String,
        side: DocumentSide,
    },
    DocumentVersionUploaded {
        document_id: Uuid,
        project_id: Uuid,
        title: String,
        side: DocumentSide,
        version_number: i64,
    },
    /// Review outcome or expiry.
    DocumentReviewed {
        document_id: Uuid,
        project_id: Uuid,
        title: String,
        from: ReviewStatus,
        to: ReviewStatus,
        uploaded_by: Option<Uuid>,
    },
    BlueprintUploaded {
        blueprint_id: Uuid,
        project_id: Uuid,
        project_name: String,
        replaced: bool,
    },
    BlueprintReviewed {
        blueprint_id: Uuid,
        project_id: Uuid,
        project_name: String,
        from: ReviewStatus,
        to: ReviewStatus,
        uploaded_by: Option<Uuid>,
    },
    TaskAssigned {
        task_id: Uuid,
        title: String,
        assignee: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        project_id: Uuid,
        title: String,
    },
    TaskDelayed {
        task_id: Uuid,
        title: String,
        assignee: Option<Uuid>,
    },
    CompanyCreated {
        company_id: Uuid,
        name: String,
    },
    UserRegistered {
        user_id: Uuid,
        username: String,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::DocumentUploaded { .. } => "document.uploaded",
            WorkflowEvent::DocumentVersionUploaded { .. } => "document.version_uploaded",
            WorkflowEvent::DocumentReviewed { .. } => "document.reviewed",
            WorkflowEvent::BlueprintUploaded { .. } => "blueprint.uploaded",
            WorkflowEvent::BlueprintReviewed { .. } => "blueprint.reviewed",
            WorkflowEvent::TaskAssigned { .. } => "task.assigned",
            WorkflowEvent::TaskCompleted { .. } => "task.completed",
            WorkflowEvent::TaskDelayed { .. } => "task.delayed",
            WorkflowEvent::CompanyCreated { .. } => "company.created",
            WorkflowEvent::UserRegistered { .. } => "user.registered",
        }
    }

    pub fn subject_id(&self) -> Uuid {
        match self {
            WorkflowEvent::DocumentUploaded { document_id, .. }
            | WorkflowEvent::DocumentVersionUploaded { document_id, .. }
            | WorkflowEvent::DocumentReviewed { document_id, .. } => *document_id,
            WorkflowEvent::BlueprintUploaded { blueprint_id, .. }
            | WorkflowEvent::BlueprintReviewed { blueprint_id, .. } => *blueprint_id,
            WorkflowEvent::TaskAssigned { task_id, .. }
            | WorkflowEvent::TaskCompleted { task_id, .. }
            | WorkflowEvent::TaskDelayed { task_id, .. } => *task_id,
            WorkflowEvent::CompanyCreated { company_id, .. } => *company_id,
            WorkflowEvent::UserRegistered { user_id, .. } => *user_id,
        }
    }
}

pub type EventBus = broadcast::Sender<DomainEvent<WorkflowEvent>>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<DomainEvent<WorkflowEvent>>) {
    broadcast::channel(1024)
}

/// Client details taken from proxy headers, used to key rate limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Fire and forget: a missing listener never fails the operation.
pub fn publish(bus: &EventBus, actor_id: Option<Uuid>, events: impl IntoIterator<Item = WorkflowEvent>) {
    for event in events {
        let name = event.name();
        let subject_id = event.subject_id();
        if bus.send(DomainEvent::new(name, actor_id, Some(subject_id), event)).is_err() {
            tracing::debug!(event = name, "no notification listener attached");
        }
    }
}

pub async fn start_notification_listener(mut rx: broadcast::Receiver<DomainEvent<WorkflowEvent>>, pool: SqlitePool) {
    tracing::info!("Notification listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = dispatch(&pool, &event).await {
                    tracing::error!(event = event.name, error = %err, "failed to dispatch notifications");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification listener lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
