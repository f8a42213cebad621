use anyhow::{Context, Result};
use axum::http::StatusCode;

use mukhattat::seed::{create_superuser, seed_demo, DEMO_ACCOUNTS};

mod common;

#[tokio::test]
async fn demo_seed_is_idempotent_and_usable_over_the_api() -> Result<()> {
    let app = common::spawn_app().await?;

    let first = seed_demo(&app.pool).await?;
    assert!(first.created > 0);
    let second = seed_demo(&app.pool).await?;
    assert_eq!(second.created, 0, "a re-run inserts nothing");
    assert_eq!(second.project_id, first.project_id);

    for (username, password) in DEMO_ACCOUNTS {
        let (status, body) = app.login(username, password).await?;
        assert_eq!(status, StatusCode::OK, "{username}: {body}");
    }

    let (_, body) = app.login("worker1", "worker123").await?;
    let token = body["tokens"]["access"].as_str().context("missing access token")?;
    let (status, mine) = app.get("/api/tasks/mine", token).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total"], 2);

    let (_, body) = app.login("superadmin", "superadmin123").await?;
    assert_eq!(body["user"]["is_superuser"], true);
    Ok(())
}

#[tokio::test]
async fn superuser_names_must_be_unique() -> Result<()> {
    let app = common::spawn_app().await?;

    create_superuser(&app.pool, "ops", "Ops@Example.com", "long-enough-pass").await?;
    let err = create_superuser(&app.pool, "ops2", "ops@example.com", "long-enough-pass")
        .await
        .expect_err("duplicate email");
    assert_eq!(err.kind(), "conflict");

    let err = create_superuser(&app.pool, "ops3", "ops3@example.com", "short")
        .await
        .expect_err("short password");
    assert_eq!(err.kind(), "validation_error");

    let (status, _) = app.login("ops", "long-enough-pass").await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}
