use sqlx::Row;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use mukhattat::authz::{all_roles, PermissionStore};
use mukhattat::events::{dispatch, DomainEvent};
use mukhattat::review::expire_overdue;
use mukhattat::{db, seed};

#[derive(Parser, Debug)]
#[command(author, version, about = "mukhattat administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Create a platform superuser
    CreateSuperuser {
        username: String,
        email: String,
        /// Falls back to MUKHATTAT_ADMIN_PASSWORD
        #[arg(long, env = "MUKHATTAT_ADMIN_PASSWORD")]
        password: String,
    },
    /// Re-seed stored role permissions from the built-in defaults
    ResetPermissions {
        /// A single role such as WORKER; every role when omitted
        role: Option<String>,
    },
    /// Expire pending reviews past their deadline and notify uploaders
    ExpireReviews,
    /// Insert a demo company, accounts for every role and a project
    SeedDemo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::CreateSuperuser {
            username,
            email,
            password,
        } => {
            let pool = db::init().await?;
            let id = seed::create_superuser(&pool, &username, &email, &password).await?;
            println!("Created superuser {username} ({id})");
        }
        Commands::ResetPermissions { role } => {
            let pool = db::init().await?;
            let store = PermissionStore::new(pool);
            let roles: Vec<String> = match role {
                Some(role) => vec![role],
                None => all_roles().iter().map(|role| role.as_str().to_string()).collect(),
            };
            for role in roles {
                let created = store.reset_to_defaults(&role).await?;
                println!("{:<20} {} permissions", role, created);
            }
        }
        Commands::ExpireReviews => {
            let pool = db::init().await?;
            let events = expire_overdue(&pool, Utc::now()).await?;
            let mut notified = 0;
            for event in &events {
                let envelope = DomainEvent::new(event.name(), None, Some(event.subject_id()), event.clone());
                notified += dispatch(&pool, &envelope).await?;
            }
            println!("Expired {} reviews, {} notifications sent", events.len(), notified);
        }
        Commands::SeedDemo => {
            let pool = db::init().await?;
            let summary = seed::seed_demo(&pool).await?;
            println!("Seeded demo data ({} rows created)", summary.created);
            println!("{:<16} {}", "Username", "Password");
            for (username, password) in seed::DEMO_ACCOUNTS {
                println!("{:<16} {}", username, password);
            }
            println!("Company login: {} / company123", seed::DEMO_COMPANY_EMAIL);
        }
    }

    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let filename = format!("{}_{}.sql", timestamp, sanitize_name(name));
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

/// `./migrations` when run from the repo root, else the crate's own folder.
async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", display))
}
