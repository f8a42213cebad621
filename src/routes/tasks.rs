use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{task_activity, AppJson};
use crate::app::AppState;
use crate::authz::{authorize_object, Entity, PermissionAction, PermissionCategory, Principal, Scope};
use crate::db::paging::{Page, PageQuery};
use crate::db::scoped::{fetch_by_id, fetch_page, fetch_visible, Listing};
use crate::errors::{AppError, AppResult};
use crate::events::{publish, WorkflowEvent};
use crate::models::project::{Project, PROJECT_COLUMNS};
use crate::models::task::{
    check_estimate, Task, TaskCreateRequest, TaskFilter, TaskPriority, TaskStatistics, TaskStatus, TaskUpdateRequest,
    TASK_COLUMNS,
};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/mine", get(my_tasks))
        .route("/overdue", get(overdue_tasks))
        .route("/statistics", get(task_statistics))
        .route("/:id", get(get_task).put(update_task).delete(delete_task))
        .merge(task_activity::routes())
}

const TASK_LISTING: Listing<'static> = Listing {
    entity: Entity::Task,
    columns: TASK_COLUMNS,
    order_by: "tasks.due_date IS NULL, tasks.due_date, tasks.created_at",
};

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    if let Some(project_id) = filter.project_id {
        query.push(" AND tasks.project_id = ").push_bind(project_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND tasks.status = ").push_bind(status);
    }
    if let Some(priority) = filter.priority {
        query.push(" AND tasks.priority = ").push_bind(priority);
    }
    if let Some(assigned_to) = filter.assigned_to {
        query.push(" AND tasks.assigned_to = ").push_bind(assigned_to);
    }
    if let Some(department_id) = filter.department_id {
        query.push(" AND tasks.department_id = ").push_bind(department_id);
    }
}

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "Tasks",
    params(PageQuery, TaskFilter),
    responses((status = 200, description = "Visible tasks", body = crate::db::paging::TaskPage)),
    security(("bearerAuth" = []))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TaskFilter>,
) -> AppResult<Json<Page<Task>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Read)
        .await?;

    let scope = Scope::for_principal(&principal);
    let page = fetch_page(&state.pool, &scope, TASK_LISTING, &page, |query| push_filter(query, &filter)).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/tasks/mine",
    tag = "Tasks",
    params(PageQuery, TaskFilter),
    responses((status = 200, description = "Tasks assigned to the caller", body = crate::db::paging::TaskPage)),
    security(("bearerAuth" = []))
)]
pub async fn my_tasks(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TaskFilter>,
) -> AppResult<Json<Page<Task>>> {
    let scope = Scope::for_principal(&principal);
    let user_id = principal.user_id;
    let page = fetch_page(&state.pool, &scope, TASK_LISTING, &page, |query| {
        query.push(" AND tasks.assigned_to = ").push_bind(user_id);
        push_filter(query, &filter);
    })
    .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/tasks/overdue",
    tag = "Tasks",
    params(PageQuery, TaskFilter),
    responses((status = 200, description = "Visible tasks past their due date", body = crate::db::paging::TaskPage)),
    security(("bearerAuth" = []))
)]
pub async fn overdue_tasks(
    State(state): State<AppState>,
    principal: Principal,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TaskFilter>,
) -> AppResult<Json<Page<Task>>> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Read)
        .await?;

    let scope = Scope::for_principal(&principal);
    let today = utc_now().date_naive();
    let page = fetch_page(&state.pool, &scope, TASK_LISTING, &page, |query| {
        query
            .push(" AND tasks.due_date IS NOT NULL AND tasks.due_date < ")
            .push_bind(today)
            .push(" AND tasks.status != 'COMPLETED'");
        push_filter(query, &filter);
    })
    .await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/tasks/statistics",
    tag = "Tasks",
    params(TaskFilter),
    responses((status = 200, description = "Status counts and hours over visible tasks", body = TaskStatistics)),
    security(("bearerAuth" = []))
)]
pub async fn task_statistics(
    State(state): State<AppState>,
    principal: Principal,
    Query(filter): Query<TaskFilter>,
) -> AppResult<Json<TaskStatistics>> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Read)
        .await?;

    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*), \
            COALESCE(SUM(tasks.status = 'PENDING'), 0), \
            COALESCE(SUM(tasks.status = 'IN_PROGRESS'), 0), \
            COALESCE(SUM(tasks.status = 'COMPLETED'), 0), \
            COALESCE(SUM(tasks.status = 'DELAYED'), 0), \
            COALESCE(SUM(tasks.due_date IS NOT NULL AND tasks.due_date < ",
    );
    query
        .push_bind(utc_now().date_naive())
        .push(" AND tasks.status != 'COMPLETED'), 0), TOTAL(tasks.estimated_hours), TOTAL(tasks.actual_hours) FROM tasks WHERE ");
    Scope::for_principal(&principal).filter(Entity::Task).push_to(&mut query);
    push_filter(&mut query, &filter);

    let (total, pending, in_progress, completed, delayed, overdue, total_estimated_hours, total_actual_hours): (
        i64,
        i64,
        i64,
        i64,
        i64,
        i64,
        f64,
        f64,
    ) = query.build_query_as().fetch_one(&state.pool).await?;

    Ok(Json(TaskStatistics {
        total,
        pending,
        in_progress,
        completed,
        delayed,
        overdue,
        total_estimated_hours,
        total_actual_hours,
    }))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task detail", body = Task),
        (status = 404, description = "Task not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_task(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<Json<Task>> {
    let task = fetch_visible(&state.pool, &Scope::for_principal(&principal), Entity::Task, TASK_COLUMNS, id).await?;
    Ok(Json(task))
}

/// Assignees must be active members of the project's company.
async fn check_assignee(pool: &SqlitePool, project: &Project, assignee: Uuid) -> AppResult<()> {
    let company: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT company_id FROM users WHERE id = ? AND is_active = 1")
            .bind(assignee)
            .fetch_optional(pool)
            .await?;
    match company {
        Some(Some(company_id)) if company_id == project.company_id => Ok(()),
        Some(_) => Err(AppError::validation("assignee is not a member of the project's company")),
        None => Err(AppError::validation("assignee does not exist or is inactive")),
    }
}

async fn check_pin(pool: &SqlitePool, project_id: Uuid, pin_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pins JOIN blueprints ON blueprints.id = pins.blueprint_id WHERE pins.id = ? AND blueprints.project_id = ?",
    )
    .bind(pin_id)
    .bind(project_id)
    .fetch_one(pool)
    .await?;
    if count == 0 {
        return Err(AppError::validation("pin does not belong to this project's blueprint"));
    }
    Ok(())
}

async fn check_department(pool: &SqlitePool, project: &Project, department_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM departments JOIN contractors ON contractors.id = departments.contractor_id WHERE departments.id = ? AND contractors.company_id = ?",
    )
    .bind(department_id)
    .bind(project.company_id)
    .fetch_one(pool)
    .await?;
    if count == 0 {
        return Err(AppError::validation("department does not belong to the project's company"));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Pin, department or assignee outside the project")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_task(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(payload): AppJson<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Create)
        .await?;
    if payload.assigned_to.is_some() {
        state
            .policy
            .require(&principal, PermissionCategory::Tasks, PermissionAction::Assign)
            .await?;
    }
    if payload.title.trim().is_empty() {
        return Err(AppError::validation("title is required"));
    }
    check_estimate(payload.estimated_hours).map_err(AppError::validation)?;

    authorize_object(&state.pool, &principal, Entity::Project, payload.project_id, Some("created_by")).await?;
    let project: Project = fetch_by_id(&state.pool, Entity::Project, PROJECT_COLUMNS, payload.project_id).await?;

    if let Some(pin_id) = payload.pin_id {
        check_pin(&state.pool, project.id, pin_id).await?;
    }
    if let Some(department_id) = payload.department_id {
        check_department(&state.pool, &project, department_id).await?;
    }
    if let Some(assignee) = payload.assigned_to {
        check_assignee(&state.pool, &project, assignee).await?;
    }

    let now = utc_now();
    let status = payload.status.unwrap_or(TaskStatus::Pending);
    let started_at = (status == TaskStatus::InProgress).then_some(now);
    let completed_at = (status == TaskStatus::Completed).then_some(now);
    let task_id = Uuid::new_v4();
    let title = payload.title.trim().to_string();

    sqlx::query(
        "INSERT INTO tasks (id, project_id, pin_id, department_id, assigned_to, title, description, status, priority, due_date, estimated_hours, started_at, completed_at, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(project.id)
    .bind(payload.pin_id)
    .bind(payload.department_id)
    .bind(payload.assigned_to)
    .bind(&title)
    .bind(payload.description.unwrap_or_default())
    .bind(status)
    .bind(payload.priority.unwrap_or(TaskPriority::Medium))
    .bind(payload.due_date)
    .bind(payload.estimated_hours)
    .bind(started_at)
    .bind(completed_at)
    .bind(principal.user_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    tracing::info!(%task_id, project_id = %project.id, assignee = ?payload.assigned_to, "task created");
    if let Some(assignee) = payload.assigned_to {
        publish(
            &state.event_bus,
            Some(principal.user_id),
            [WorkflowEvent::TaskAssigned { task_id, title, assignee }],
        );
    }

    let task = fetch_by_id(&state.pool, Entity::Task, TASK_COLUMNS, task_id).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 403, description = "Reassignment needs tasks:assign")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_task(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Update)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Task, id, Some("created_by")).await?;

    let mut task: Task = fetch_by_id(&state.pool, Entity::Task, TASK_COLUMNS, id).await?;
    let project: Project = fetch_by_id(&state.pool, Entity::Project, PROJECT_COLUMNS, task.project_id).await?;

    let reassigned_to = payload.assigned_to.filter(|assignee| task.assigned_to != Some(*assignee));
    if let Some(assignee) = reassigned_to {
        state
            .policy
            .require(&principal, PermissionCategory::Tasks, PermissionAction::Assign)
            .await?;
        check_assignee(&state.pool, &project, assignee).await?;
        task.assigned_to = Some(assignee);
    }
    if let Some(pin_id) = payload.pin_id {
        check_pin(&state.pool, project.id, pin_id).await?;
        task.pin_id = Some(pin_id);
    }
    if let Some(department_id) = payload.department_id {
        check_department(&state.pool, &project, department_id).await?;
        task.department_id = Some(department_id);
    }
    if let Some(title) = payload.title {
        if title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }
        task.title = title.trim().to_string();
    }
    if let Some(description) = payload.description {
        task.description = description;
    }
    if let Some(priority) = payload.priority {
        task.priority = priority;
    }
    if payload.due_date.is_some() {
        task.due_date = payload.due_date;
    }
    if payload.estimated_hours.is_some() {
        check_estimate(payload.estimated_hours).map_err(AppError::validation)?;
        task.estimated_hours = payload.estimated_hours;
    }

    let now = utc_now();
    let previous_status = task.status;
    if let Some(status) = payload.status {
        task.set_status(status, now);
    }
    task.updated_at = now;

    sqlx::query(
        "UPDATE tasks SET pin_id = ?, department_id = ?, assigned_to = ?, title = ?, description = ?, status = ?, priority = ?, due_date = ?, estimated_hours = ?, started_at = ?, completed_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(task.pin_id)
    .bind(task.department_id)
    .bind(task.assigned_to)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(task.priority)
    .bind(task.due_date)
    .bind(task.estimated_hours)
    .bind(task.started_at)
    .bind(task.completed_at)
    .bind(task.updated_at)
    .bind(id)
    .execute(&state.pool)
    .await?;

    let mut events = Vec::new();
    if let Some(assignee) = reassigned_to {
        events.push(WorkflowEvent::TaskAssigned {
            task_id: task.id,
            title: task.title.clone(),
            assignee,
        });
    }
    if task.status != previous_status {
        tracing::info!(task_id = %task.id, from = ?previous_status, to = ?task.status, "task status changed");
        match task.status {
            TaskStatus::Completed => events.push(WorkflowEvent::TaskCompleted {
                task_id: task.id,
                project_id: task.project_id,
                title: task.title.clone(),
            }),
            TaskStatus::Delayed => events.push(WorkflowEvent::TaskDelayed {
                task_id: task.id,
                title: task.title.clone(),
                assignee: task.assigned_to,
            }),
            TaskStatus::Pending | TaskStatus::InProgress => {}
        }
    }
    publish(&state.event_bus, Some(principal.user_id), events);

    Ok(Json(task))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 204, description = "Task deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_task(State(state): State<AppState>, principal: Principal, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state
        .policy
        .require(&principal, PermissionCategory::Tasks, PermissionAction::Delete)
        .await?;
    authorize_object(&state.pool, &principal, Entity::Task, id, Some("created_by")).await?;

    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    tracing::info!(task_id = %id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}
