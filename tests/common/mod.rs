#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use mukhattat::authz::Role;
use mukhattat::utils::hash_password;
use mukhattat::{create_app_with_config, AppConfig, AppState};

pub const PASSWORD: &str = "password123";
pub const JWT_SECRET: &str = "test-secret";
const BOUNDARY: &str = "mukhattat-test-boundary";

/// A router over a fresh migrated SQLite file. The temp dir holds both the
/// database and uploaded media and is removed on drop.
pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub config: AppConfig,
    _dir: TempDir,
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut AppConfig)) -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let pool = connect(&dir).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let mut config = AppConfig::with_defaults(JWT_SECRET, dir.path().join("media"));
    customize(&mut config);
    let router = create_app_with_config(pool.clone(), config.clone()).await?;

    Ok(TestApp {
        router,
        pool,
        config,
        _dir: dir,
    })
}

pub async fn connect(dir: &TempDir) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(10));
    Ok(SqlitePool::connect_with(opts).await?)
}

impl TestApp {
    /// State sharing this app's pool and media root, for calling library
    /// operations directly.
    pub fn state(&self) -> AppState {
        AppState::new(self.pool.clone(), self.config.clone())
    }

    pub fn token_for(&self, user_id: Uuid) -> Result<String> {
        Ok(self.config.jwt.issue_pair(user_id)?.access)
    }

    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        send(&self.router, request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await
    }

    pub async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string()))?).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(StatusCode, Value)> {
        self.json(
            "POST",
            "/api/auth/login",
            None,
            serde_json::json!({ "username": username, "password": password }),
        )
        .await
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, value))
}

/// `multipart/form-data` request with text `fields` and one `file` part.
pub fn multipart_request(
    uri: &str,
    token: &str,
    fields: &[(&str, &str)],
    file_name: &str,
    file: &[u8],
) -> Result<Request<Body>> {
    let mut payload = Vec::new();
    for (name, value) in fields {
        payload.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    payload.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    payload.extend_from_slice(file);
    payload.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(payload))?)
}

pub fn pdf_bytes(marker: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {marker}\n1 0 obj << /Type /Catalog >> endobj\ntrailer << /Root 1 0 R >>\n%%EOF\n").into_bytes()
}

pub fn id_of(value: &Value) -> Result<Uuid> {
    let raw = value
        .get("id")
        .and_then(Value::as_str)
        .with_context(|| format!("missing id in {value}"))?;
    Ok(raw.parse()?)
}

pub async fn insert_company(pool: &SqlitePool, name: &str, email: &str, password: Option<&str>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let password_hash = password.map(hash_password).transpose()?;
    sqlx::query(
        "INSERT INTO companies (id, name, email, password_hash, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn insert_contractor(pool: &SqlitePool, company_id: Uuid, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query("INSERT INTO contractors (id, company_id, name, email, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)")
        .bind(id)
        .bind(company_id)
        .bind(name)
        .bind(format!("{}@contractors.test", name.to_lowercase()))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(id)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Affiliation {
    pub company: Option<Uuid>,
    pub contractor: Option<Uuid>,
    pub superuser: bool,
}

/// A user whose password is [`PASSWORD`].
pub async fn insert_user(pool: &SqlitePool, username: &str, role: Role, affiliation: Affiliation) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, role, is_superuser, company_id, contractor_id, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id)
    .bind(username)
    .bind(format!("{username}@users.test"))
    .bind(hash_password(PASSWORD)?)
    .bind(role)
    .bind(affiliation.superuser)
    .bind(affiliation.company)
    .bind(affiliation.contractor)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn insert_project(
    pool: &SqlitePool,
    company_id: Uuid,
    contractor_id: Option<Uuid>,
    created_by: Uuid,
    name: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO projects (id, company_id, contractor_id, name, status, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, 'IN_PROGRESS', ?, ?, ?)",
    )
    .bind(id)
    .bind(company_id)
    .bind(contractor_id)
    .bind(name)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn insert_task(
    pool: &SqlitePool,
    project_id: Uuid,
    assigned_to: Option<Uuid>,
    title: &str,
    due_date: Option<NaiveDate>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO tasks (id, project_id, assigned_to, title, status, priority, due_date, created_at, updated_at) VALUES (?, ?, ?, ?, 'PENDING', 'MEDIUM', ?, ?, ?)",
    )
    .bind(id)
    .bind(project_id)
    .bind(assigned_to)
    .bind(title)
    .bind(due_date)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Acme with contractor BuildCo, its admin, a contractor user, a worker and a
/// project the worker has one task on.
pub struct AcmeFixture {
    pub company: Uuid,
    pub contractor: Uuid,
    pub admin: Uuid,
    pub contractor_user: Uuid,
    pub worker: Uuid,
    pub project: Uuid,
    pub task: Uuid,
}

pub async fn seed_acme(pool: &SqlitePool) -> Result<AcmeFixture> {
    let company = insert_company(pool, "Acme", "acme@x.com", Some("secret-pass")).await?;
    let contractor = insert_contractor(pool, company, "BuildCo").await?;
    let admin = insert_user(
        pool,
        "acme-admin",
        Role::CompanyAdmin,
        Affiliation {
            company: Some(company),
            ..Affiliation::default()
        },
    )
    .await?;
    let contractor_user = insert_user(
        pool,
        "buildco-lead",
        Role::Contractor,
        Affiliation {
            company: Some(company),
            contractor: Some(contractor),
            ..Affiliation::default()
        },
    )
    .await?;
    let worker = insert_user(
        pool,
        "w1",
        Role::Worker,
        Affiliation {
            company: Some(company),
            contractor: Some(contractor),
            ..Affiliation::default()
        },
    )
    .await?;
    let project = insert_project(pool, company, Some(contractor), admin, "Harbour Tower").await?;
    let task = insert_task(pool, project, Some(worker), "Pour slab", None).await?;

    Ok(AcmeFixture {
        company,
        contractor,
        admin,
        contractor_user,
        worker,
        project,
        task,
    })
}
