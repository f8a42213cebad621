use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::Value;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::{authz, db, jwt, models, review, routes};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::refresh,
        routes::auth::me,
        routes::auth::change_password,
        routes::auth::logout,
        routes::companies::list_companies,
        routes::companies::get_company,
        routes::companies::create_company,
        routes::companies::update_company,
        routes::companies::delete_company,
        routes::companies::activate_company,
        routes::companies::deactivate_company,
        routes::contractors::list_contractors,
        routes::contractors::get_contractor,
        routes::contractors::create_contractor,
        routes::contractors::update_contractor,
        routes::contractors::delete_contractor,
        routes::departments::list_departments,
        routes::departments::get_department,
        routes::departments::create_department,
        routes::departments::update_department,
        routes::departments::delete_department,
        routes::users::list_users,
        routes::users::get_user,
        routes::users::create_user,
        routes::users::update_user,
        routes::users::deactivate_user,
        routes::users::activate_user,
        routes::users::assign_role,
        routes::users::assign_company,
        routes::projects::list_projects,
        routes::projects::get_project,
        routes::projects::create_project,
        routes::projects::update_project,
        routes::projects::delete_project,
        routes::projects::project_statistics,
        routes::blueprints::get_blueprint,
        routes::blueprints::upload_blueprint,
        routes::blueprints::delete_blueprint,
        routes::blueprints::download_blueprint,
        routes::blueprints::approve_blueprint,
        routes::blueprints::reject_blueprint,
        routes::blueprints::request_blueprint_modification,
        routes::pins::list_pins,
        routes::pins::create_pin,
        routes::pins::get_pin,
        routes::pins::update_pin,
        routes::pins::delete_pin,
        routes::tasks::list_tasks,
        routes::tasks::my_tasks,
        routes::tasks::overdue_tasks,
        routes::tasks::get_task,
        routes::tasks::create_task,
        routes::tasks::update_task,
        routes::tasks::delete_task,
        routes::tasks::task_statistics,
        routes::task_activity::list_time_entries,
        routes::task_activity::log_time,
        routes::task_activity::list_comments,
        routes::task_activity::add_comment,
        routes::task_activity::delete_comment,
        routes::task_activity::list_attachments,
        routes::task_activity::upload_attachment,
        routes::task_activity::download_attachment,
        routes::documents::list_documents,
        routes::documents::pending_review,
        routes::documents::overdue_documents,
        routes::documents::get_document,
        routes::documents::upload_document,
        routes::documents::delete_document,
        routes::documents::download_document,
        routes::documents::list_versions,
        routes::documents::upload_version,
        routes::documents::approve_document,
        routes::documents::reject_document,
        routes::documents::request_document_modification,
        routes::notifications::list_notifications,
        routes::notifications::unread_count,
        routes::notifications::mark_all_read,
        routes::notifications::mark_read,
        routes::rbac::get_permissions,
        routes::rbac::update_role_permissions,
        routes::rbac::reset_role_permissions,
        routes::reports::project_progress,
        routes::reports::time_tracking,
        routes::reports::budget_vs_actual,
        routes::reports::document_approval_timeline,
        routes::reports::department_performance,
        routes::reports::dashboard_summary,
        routes::reports::export_report,
    ),
    components(
        schemas(
            routes::MessageResponse,
            jwt::TokenPair,
            routes::health::HealthResponse,
            authz::Role,
            authz::PermissionCategory,
            authz::PermissionAction,
            review::ReviewStatus,
            review::ReviewAction,
            review::ReviewRequest,
            review::ReviewState,
            review::ReviewTiming,
            db::paging::CompanyPage,
            db::paging::ContractorPage,
            db::paging::DepartmentPage,
            db::paging::UserPage,
            db::paging::ProjectPage,
            db::paging::TaskPage,
            db::paging::DocumentPage,
            db::paging::NotificationPage,
            models::user::User,
            models::user::RegisterRequest,
            models::user::LoginRequest,
            models::user::AuthResponse,
            models::user::RefreshRequest,
            models::user::RefreshResponse,
            models::user::ChangePasswordRequest,
            models::user::UserCreateRequest,
            models::user::UserUpdateRequest,
            models::user::AssignRoleRequest,
            models::user::AssignCompanyRequest,
            models::company::Company,
            models::company::CompanyCreateRequest,
            models::company::CompanyUpdateRequest,
            models::company::Contractor,
            models::company::ContractorCreateRequest,
            models::company::ContractorUpdateRequest,
            models::department::Department,
            models::department::DepartmentCreateRequest,
            models::department::DepartmentUpdateRequest,
            models::project::ProjectStatus,
            models::project::Project,
            models::project::ProjectCreateRequest,
            models::project::ProjectUpdateRequest,
            models::project::ProjectStatistics,
            models::blueprint::Blueprint,
            models::blueprint::BlueprintDetail,
            models::blueprint::BlueprintUploadForm,
            models::pin::Pin,
            models::pin::PinCreateRequest,
            models::pin::PinUpdateRequest,
            models::task::TaskStatus,
            models::task::TaskPriority,
            models::task::Task,
            models::task::TaskCreateRequest,
            models::task::TaskUpdateRequest,
            models::task::TaskStatistics,
            models::task::TimeEntry,
            models::task::LogTimeRequest,
            models::task::TaskComment,
            models::task::CommentRequest,
            models::task::TaskAttachment,
            models::task::AttachmentUploadForm,
            models::document::DocumentSide,
            models::document::Document,
            models::document::DocumentDetail,
            models::document::DocumentVersion,
            models::document::DocumentUploadForm,
            models::document::VersionUploadForm,
            models::notification::NotificationType,
            models::notification::Notification,
            models::notification::UnreadCount,
            models::notification::MarkedRead,
            models::rbac::Choice,
            models::rbac::PermissionsOverview,
            models::rbac::UpdatePermissionsRequest,
            models::rbac::RolePermissionsResponse,
            models::rbac::ResetPermissionsResponse,
            models::report::ProjectProgress,
            models::report::TaskHours,
            models::report::ProjectHours,
            models::report::TimeTrackingReport,
            models::report::BudgetLine,
            models::report::StatusCount,
            models::report::ApprovalTimeline,
            models::report::DepartmentPerformance,
            models::report::MonthlyProgress,
            models::report::DashboardSummary,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Auth", description = "Authentication and account endpoints"),
        (name = "Companies", description = "Company tenants"),
        (name = "Contractors", description = "Contractors working for a company"),
        (name = "Departments", description = "Departments inside a contractor"),
        (name = "Users", description = "User administration"),
        (name = "Projects", description = "Projects and their statistics"),
        (name = "Blueprints", description = "Project blueprint upload and review"),
        (name = "Pins", description = "Locations marked on a blueprint"),
        (name = "Tasks", description = "Work items"),
        (name = "Task activity", description = "Hours, comments and files recorded on a task"),
        (name = "Documents", description = "Document upload, versions and review"),
        (name = "Notifications", description = "Per-user notifications"),
        (name = "RBAC", description = "Role permission administration"),
        (name = "Reports", description = "Aggregates over visible data and their export")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Handler paths are relative to the `/api` mount point.
pub fn build_openapi() -> anyhow::Result<utoipa::openapi::OpenApi> {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![Server::new("/api")]);
    Ok(doc)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    let doc_json: Arc<Value> = Arc::new(serde_json::to_value(&doc).unwrap_or_default());

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_review_routes_and_bearer_scheme() {
        let doc = serde_json::to_value(build_openapi().unwrap()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/documents/{id}/approve",
            "/documents/{id}/versions",
            "/projects/{id}/blueprint",
            "/rbac/permissions/{role}/reset",
            "/tasks/{id}/time-entries",
            "/reports/{report}/export",
            "/health",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(doc["components"]["securitySchemes"]["bearerAuth"].is_object());
        assert_eq!(doc["servers"][0]["url"], "/api");
    }
}
