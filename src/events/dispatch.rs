use std::collections::BTreeSet;

use sqlx::SqlitePool;
use uuid::Uuid;

use super::{DomainEvent, WorkflowEvent};
use crate::errors::AppResult;
use crate::models::document::DocumentSide;
use crate::models::notification::NotificationType;
use crate::review::ReviewStatus;
use crate::utils::utc_now;

struct Notice {
    kind: NotificationType,
    title: String,
    message: String,
    reference_type: &'static str,
}

fn review_kind(document: bool, to: ReviewStatus) -> Option<NotificationType> {
    use NotificationType as N;

    let kind = match (document, to) {
        (_, ReviewStatus::Pending) => return None,
        (true, ReviewStatus::Approved) => N::DocumentApproved,
        (true, ReviewStatus::Rejected) => N::DocumentRejected,
        (true, ReviewStatus::ModificationRequested) => N::DocumentModificationRequested,
        (true, ReviewStatus::Expired) => N::DocumentExpired,
        (false, ReviewStatus::Approved) => N::BlueprintApproved,
        (false, ReviewStatus::Rejected) => N::BlueprintRejected,
        (false, ReviewStatus::ModificationRequested) => N::BlueprintModificationRequested,
        (false, ReviewStatus::Expired) => N::BlueprintExpired,
    };
    Some(kind)
}

fn notice(event: &WorkflowEvent) -> Option<Notice> {
    let notice = match event {
        WorkflowEvent::DocumentUploaded { title, .. } => Notice {
            kind: NotificationType::DocumentUploaded,
            title: "New document awaiting review".into(),
            message: format!("Document \"{title}\" was uploaded and needs review."),
            reference_type: "document",
        },
        WorkflowEvent::DocumentVersionUploaded { title, version_number, .. } => Notice {
            kind: NotificationType::DocumentUploaded,
            title: "New document version awaiting review".into(),
            message: format!("Version {version_number} of \"{title}\" was uploaded and needs review."),
            reference_type: "document",
        },
        WorkflowEvent::DocumentReviewed { title, to, .. } => Notice {
            kind: review_kind(true, *to)?,
            title: format!("Document {}", to.as_str().to_lowercase().replace('_', " ")),
            message: format!("Your document \"{title}\" is now {}.", to.as_str()),
            reference_type: "document",
        },
        WorkflowEvent::BlueprintUploaded { project_name, replaced, .. } => Notice {
            kind: NotificationType::BlueprintUploaded,
            title: (if *replaced { "Blueprint replaced" } else { "Blueprint uploaded" }).into(),
            message: format!("The blueprint for \"{project_name}\" needs review."),
            reference_type: "blueprint",
        },
        WorkflowEvent::BlueprintReviewed { project_name, to, .. } => Notice {
            kind: review_kind(false, *to)?,
            title: format!("Blueprint {}", to.as_str().to_lowercase().replace('_', " ")),
            message: format!("The blueprint for \"{project_name}\" is now {}.", to.as_str()),
            reference_type: "blueprint",
        },
        WorkflowEvent::TaskAssigned { title, .. } => Notice {
            kind: NotificationType::TaskAssigned,
            title: "Task assigned".into(),
            message: format!("You have been assigned \"{title}\"."),
            reference_type: "task",
        },
        WorkflowEvent::TaskCompleted { title, .. } => Notice {
            kind: NotificationType::TaskCompleted,
            title: "Task completed".into(),
            message: format!("\"{title}\" was marked as completed."),
            reference_type: "task",
        },
        WorkflowEvent::TaskDelayed { title, .. } => Notice {
            kind: NotificationType::TaskDelayed,
            title: "Task delayed".into(),
            message: format!("\"{title}\" was marked as delayed."),
            reference_type: "task",
        },
        WorkflowEvent::CompanyCreated { name, .. } => Notice {
            kind: NotificationType::CompanyCreated,
            title: "Company created".into(),
            message: format!("Company \"{name}\" was created."),
            reference_type: "company",
        },
        WorkflowEvent::UserRegistered { username, .. } => Notice {
            kind: NotificationType::UserRegistered,
            title: "New user registered".into(),
            message: format!("User \"{username}\" registered."),
            reference_type: "user",
        },
    };
    Some(notice)
}

async fn ids(pool: &SqlitePool, sql: &str, bind: Uuid) -> AppResult<Vec<Uuid>> {
    Ok(sqlx::query_scalar::<_, Uuid>(sql).bind(bind).fetch_all(pool).await?)
}

async fn company_admins(pool: &SqlitePool, project_id: Uuid) -> AppResult<Vec<Uuid>> {
    ids(
        pool,
        "SELECT u.id FROM users u JOIN projects p ON p.company_id = u.company_id WHERE p.id = ? AND u.role = 'COMPANY_ADMIN' AND u.is_active = 1",
        project_id,
    )
    .await
}

/// Controllers who review uploads from `side`.
async fn reviewing_controllers(pool: &SqlitePool, project_id: Uuid, side: DocumentSide) -> AppResult<Vec<Uuid>> {
    let sql = match side {
        DocumentSide::Contractor => {
            "SELECT u.id FROM users u JOIN projects p ON p.company_id = u.company_id WHERE p.id = ? AND u.role = 'DOCUMENT_CONTROLLER' AND u.contractor_id IS NULL AND u.is_active = 1"
        }
        DocumentSide::Company => {
            "SELECT u.id FROM users u JOIN projects p ON p.contractor_id = u.contractor_id WHERE p.id = ? AND u.role = 'DOCUMENT_CONTROLLER' AND u.is_active = 1"
        }
    };
    ids(pool, sql, project_id).await
}

/// Users who should hear about `event`, before the actor is removed.
pub async fn recipients(pool: &SqlitePool, event: &WorkflowEvent) -> AppResult<Vec<Uuid>> {
    let users = match event {
        WorkflowEvent::DocumentUploaded { project_id, side, .. }
        | WorkflowEvent::DocumentVersionUploaded { project_id, side, .. } => {
            reviewing_controllers(pool, *project_id, *side).await?
        }
        WorkflowEvent::DocumentReviewed { uploaded_by, .. } | WorkflowEvent::BlueprintReviewed { uploaded_by, .. } => {
            uploaded_by.iter().copied().collect()
        }
        WorkflowEvent::BlueprintUploaded { project_id, .. } => {
            let mut users = company_admins(pool, *project_id).await?;
            let consultant = sqlx::query_scalar::<_, Option<Uuid>>("SELECT consultant_id FROM projects WHERE id = ?")
                .bind(*project_id)
                .fetch_optional(pool)
                .await?
                .flatten();
            users.extend(consultant);
            users
        }
        WorkflowEvent::TaskAssigned { assignee, .. } => vec![*assignee],
        WorkflowEvent::TaskCompleted { project_id, .. } => company_admins(pool, *project_id).await?,
        WorkflowEvent::TaskDelayed { assignee, .. } => assignee.iter().copied().collect(),
        WorkflowEvent::CompanyCreated { .. } | WorkflowEvent::UserRegistered { .. } => {
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE is_superuser = 1 AND is_active = 1")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(users)
}

/// Persist one notification per recipient. Returns how many were written.
pub async fn dispatch(pool: &SqlitePool, event: &DomainEvent<WorkflowEvent>) -> AppResult<usize> {
    let Some(notice) = notice(&event.payload) else {
        return Ok(0);
    };

    let targets: BTreeSet<Uuid> = recipients(pool, &event.payload)
        .await?
        .into_iter()
        .filter(|user| Some(*user) != event.actor_id)
        .collect();

    let now = utc_now();
    for user_id in &targets {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, notification_type, title, message, is_read, reference_type, reference_id, created_at) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(*user_id)
        .bind(notice.kind)
        .bind(&notice.title)
        .bind(&notice.message)
        .bind(notice.reference_type)
        .bind(event.payload.subject_id())
        .bind(now)
        .execute(pool)
        .await?;
    }

    if !targets.is_empty() {
        tracing::info!(event = event.name, recipients = targets.len(), "notifications dispatched");
    }
    Ok(targets.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_outcomes_produce_no_notice() {
        let event = WorkflowEvent::DocumentReviewed {
            document_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            title: "Shop drawings".into(),
            from: ReviewStatus::Pending,
            to: ReviewStatus::Pending,
            uploaded_by: None,
        };
        assert!(notice(&event).is_none());
    }

    #[test]
    fn review_outcomes_map_to_kinds() {
        assert_eq!(review_kind(true, ReviewStatus::Expired), Some(NotificationType::DocumentExpired));
        assert_eq!(
            review_kind(false, ReviewStatus::ModificationRequested),
            Some(NotificationType::BlueprintModificationRequested)
        );
    }
}
