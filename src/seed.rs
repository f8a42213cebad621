//! Operator-side provisioning used by the admin CLI: superusers and a demo
//! tenant. Every step is get-or-create, so running it twice changes nothing.

use chrono::{Duration, NaiveDate};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::{AppError, AppResult};
use crate::utils::{hash_password, utc_now};

pub const DEMO_COMPANY_EMAIL: &str = "demo@company.com";
pub const DEMO_PROJECT: &str = "Residential Building Project";

/// Login names and passwords of the seeded demo accounts.
pub const DEMO_ACCOUNTS: &[(&str, &str)] = &[
    ("superadmin", "superadmin123"),
    ("admin", "admin123"),
    ("contractor", "contractor123"),
    ("doc-controller", "controller123"),
    ("consultant", "consultant123"),
    ("worker1", "worker123"),
    ("worker2", "worker123"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSeed {
    pub company_id: Uuid,
    pub contractor_id: Uuid,
    pub project_id: Uuid,
    /// Rows inserted by this run; zero on a re-run.
    pub created: usize,
}

struct NewUser<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    role: Role,
    is_superuser: bool,
    company_id: Option<Uuid>,
    contractor_id: Option<Uuid>,
    department_id: Option<Uuid>,
}

impl<'a> NewUser<'a> {
    fn new(username: &'a str, email: &'a str, password: &'a str, role: Role) -> Self {
        Self {
            username,
            email,
            password,
            first_name: "",
            last_name: "",
            role,
            is_superuser: false,
            company_id: None,
            contractor_id: None,
            department_id: None,
        }
    }

    fn named(mut self, first_name: &'a str, last_name: &'a str) -> Self {
        self.first_name = first_name;
        self.last_name = last_name;
        self
    }
}

async fn ensure_user(pool: &SqlitePool, user: NewUser<'_>, created: &mut usize) -> AppResult<Uuid> {
    let existing = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE username = ?")
        .bind(user.username)
        .fetch_optional(pool)
        .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, first_name, last_name, role, is_superuser, company_id, contractor_id, department_id, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(user.username)
    .bind(user.email)
    .bind(hash_password(user.password)?)
    .bind(user.first_name)
    .bind(user.last_name)
    .bind(user.role)
    .bind(user.is_superuser)
    .bind(user.company_id)
    .bind(user.contractor_id)
    .bind(user.department_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    *created += 1;
    Ok(id)
}

/// A platform-wide superuser. Fails with `Conflict` when the username or
/// email is taken.
pub async fn create_superuser(pool: &SqlitePool, username: &str, email: &str, password: &str) -> AppResult<Uuid> {
    let username = username.trim();
    let email = email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() {
        return Err(AppError::validation("username and email are required"));
    }

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? OR lower(email) = ?")
        .bind(username)
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict(format!("user {username} or {email} already exists")));
    }

    let mut created = 0;
    let user = NewUser {
        is_superuser: true,
        ..NewUser::new(username, &email, password, Role::CompanyAdmin)
    };
    let id = ensure_user(pool, user, &mut created).await?;
    tracing::info!(user_id = %id, %username, "superuser created");
    Ok(id)
}

async fn ensure_company(pool: &SqlitePool, created: &mut usize) -> AppResult<Uuid> {
    if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM companies WHERE email = ?")
        .bind(DEMO_COMPANY_EMAIL)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO companies (id, name, email, phone_number, address, password_hash, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind("Demo Construction Company")
    .bind(DEMO_COMPANY_EMAIL)
    .bind("+1234567890")
    .bind("123 Construction St, City, Country")
    .bind(hash_password("company123")?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    *created += 1;
    Ok(id)
}

async fn ensure_contractor(pool: &SqlitePool, company_id: Uuid, created: &mut usize) -> AppResult<Uuid> {
    const EMAIL: &str = "contractor@example.com";
    if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM contractors WHERE company_id = ? AND email = ?")
        .bind(company_id)
        .bind(EMAIL)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO contractors (id, company_id, name, email, phone_number, address, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(company_id)
    .bind("ABC Contractors")
    .bind(EMAIL)
    .bind("+1234567891")
    .bind("456 Contractor Ave, City, Country")
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    *created += 1;
    Ok(id)
}

async fn ensure_department(pool: &SqlitePool, contractor_id: Uuid, name: &str, created: &mut usize) -> AppResult<Uuid> {
    if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM departments WHERE contractor_id = ? AND name = ?")
        .bind(contractor_id)
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO departments (id, contractor_id, name, description, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(contractor_id)
    .bind(name)
    .bind(format!("{name} department"))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    *created += 1;
    Ok(id)
}

struct DemoTask<'a> {
    title: &'a str,
    description: &'a str,
    department_id: Uuid,
    assigned_to: Uuid,
    status: &'a str,
    priority: &'a str,
    due_in_days: i64,
}

async fn ensure_task(
    pool: &SqlitePool,
    project_id: Uuid,
    created_by: Uuid,
    task: DemoTask<'_>,
    created: &mut usize,
) -> AppResult<()> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ? AND title = ?")
        .bind(project_id)
        .bind(task.title)
        .fetch_one(pool)
        .await?;
    if exists > 0 {
        return Ok(());
    }

    let now = utc_now();
    let due: NaiveDate = (now + Duration::days(task.due_in_days)).date_naive();
    let started_at = (task.status == "IN_PROGRESS").then_some(now);
    sqlx::query(
        "INSERT INTO tasks (id, project_id, department_id, assigned_to, title, description, status, priority, due_date, started_at, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(task.department_id)
    .bind(task.assigned_to)
    .bind(task.title)
    .bind(task.description)
    .bind(task.status)
    .bind(task.priority)
    .bind(due)
    .bind(started_at)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    *created += 1;
    Ok(())
}

/// One company with a contractor, two departments, an account for every
/// role and a project with three tasks.
pub async fn seed_demo(pool: &SqlitePool) -> AppResult<DemoSeed> {
    let mut created = 0;

    ensure_user(
        pool,
        NewUser {
            is_superuser: true,
            ..NewUser::new("superadmin", "superadmin@mukhattat.local", "superadmin123", Role::CompanyAdmin)
                .named("Super", "Admin")
        },
        &mut created,
    )
    .await?;

    let company_id = ensure_company(pool, &mut created).await?;
    let admin = ensure_user(
        pool,
        NewUser {
            company_id: Some(company_id),
            ..NewUser::new("admin", "admin@company.com", "admin123", Role::CompanyAdmin).named("Company", "Admin")
        },
        &mut created,
    )
    .await?;
    ensure_user(
        pool,
        NewUser {
            company_id: Some(company_id),
            ..NewUser::new("doc-controller", "documents@company.com", "controller123", Role::DocumentController)
                .named("Dana", "Controller")
        },
        &mut created,
    )
    .await?;
    let consultant = ensure_user(
        pool,
        NewUser::new("consultant", "consultant@example.com", "consultant123", Role::Consultant).named("Sara", "Consultant"),
        &mut created,
    )
    .await?;

    let contractor_id = ensure_contractor(pool, company_id, &mut created).await?;
    let contractor_user = ensure_user(
        pool,
        NewUser {
            company_id: Some(company_id),
            contractor_id: Some(contractor_id),
            ..NewUser::new("contractor", "lead@contractor.example.com", "contractor123", Role::Contractor)
                .named("John", "Contractor")
        },
        &mut created,
    )
    .await?;

    let plumbing = ensure_department(pool, contractor_id, "Plumbing", &mut created).await?;
    let electrical = ensure_department(pool, contractor_id, "Electrical", &mut created).await?;

    let worker = |username: &'static str, email: &'static str, first_name: &'static str, department: Uuid| NewUser {
        company_id: Some(company_id),
        contractor_id: Some(contractor_id),
        department_id: Some(department),
        ..NewUser::new(username, email, "worker123", Role::Worker).named(first_name, "Worker")
    };
    let worker1 = ensure_user(pool, worker("worker1", "worker1@example.com", "Ahmed", plumbing), &mut created).await?;
    let worker2 = ensure_user(pool, worker("worker2", "worker2@example.com", "Mohammed", electrical), &mut created).await?;

    let project_id = match sqlx::query_scalar::<_, Uuid>("SELECT id FROM projects WHERE company_id = ? AND name = ?")
        .bind(company_id)
        .bind(DEMO_PROJECT)
        .fetch_optional(pool)
        .await?
    {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4();
            let now = utc_now();
            sqlx::query(
                "INSERT INTO projects (id, company_id, contractor_id, consultant_id, name, description, address, status, start_date, end_date, estimated_budget, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 'IN_PROGRESS', ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(company_id)
            .bind(contractor_id)
            .bind(consultant)
            .bind(DEMO_PROJECT)
            .bind("A new residential building construction project")
            .bind("789 Project Site, City, Country")
            .bind(now.date_naive())
            .bind((now + Duration::days(180)).date_naive())
            .bind(500_000.0_f64)
            .bind(admin)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
            created += 1;
            id
        }
    };

    let tasks = [
        DemoTask {
            title: "Install Main Water Line",
            description: "Install the main water supply line for the building",
            department_id: plumbing,
            assigned_to: worker1,
            status: "IN_PROGRESS",
            priority: "HIGH",
            due_in_days: 5,
        },
        DemoTask {
            title: "Install Electrical Panel",
            description: "Install the main electrical panel",
            department_id: electrical,
            assigned_to: worker2,
            status: "PENDING",
            priority: "HIGH",
            due_in_days: 7,
        },
        DemoTask {
            title: "Install Bathroom Fixtures",
            description: "Install all bathroom fixtures",
            department_id: plumbing,
            assigned_to: worker1,
            status: "PENDING",
            priority: "MEDIUM",
            due_in_days: 10,
        },
    ];
    for task in tasks {
        ensure_task(pool, project_id, contractor_user, task, &mut created).await?;
    }

    tracing::info!(%company_id, %project_id, created, "demo data seeded");
    Ok(DemoSeed {
        company_id,
        contractor_id,
        project_id,
        created,
    })
}
