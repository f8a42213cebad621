use anyhow::Result;
use axum::http::StatusCode;
use serde_json::Value;

use mukhattat::authz::Role;

mod common;
use common::{insert_company, insert_contractor, insert_project, insert_task, insert_user, seed_acme, Affiliation};

fn ids(page: &Value) -> Vec<String> {
    page["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn worker_sees_only_their_own_task() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    // Another task in the same project, assigned to nobody.
    insert_task(&app.pool, acme.project, None, "Order rebar", None).await?;

    let (status, body) = app.login("w1", common::PASSWORD).await?;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let token = body["tokens"]["access"].as_str().unwrap_or_default().to_string();

    let (status, page) = app.get("/api/tasks", &token).await?;
    assert_eq!(status, StatusCode::OK, "{page}");
    assert_eq!(ids(&page), vec![acme.task.to_string()]);
    assert_eq!(page["total"], 1);
    Ok(())
}

#[tokio::test]
async fn other_company_admin_sees_none_of_acme() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;

    let rival = insert_company(&app.pool, "Rival", "rival@x.com", None).await?;
    let rival_admin = insert_user(
        &app.pool,
        "rival-admin",
        Role::CompanyAdmin,
        Affiliation {
            company: Some(rival),
            ..Affiliation::default()
        },
    )
    .await?;
    let rival_project = insert_project(&app.pool, rival, None, rival_admin, "Rival HQ").await?;
    let rival_task = insert_task(&app.pool, rival_project, None, "Survey", None).await?;
    let token = app.token_for(rival_admin)?;

    let (status, page) = app.get("/api/tasks", &token).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&page), vec![rival_task.to_string()]);

    // Filters narrow the visible set, they never widen it.
    let (_, page) = app.get(&format!("/api/tasks?project_id={}", acme.project), &token).await?;
    assert!(ids(&page).is_empty());
    let (_, page) = app.get(&format!("/api/projects?company_id={}", acme.company), &token).await?;
    assert!(ids(&page).is_empty());

    // Hidden rows read as missing, not forbidden.
    let (status, _) = app.get(&format!("/api/tasks/{}", acme.task), &token).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/api/projects/{}", acme.project), &token).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn worker_filters_cannot_reach_other_users() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let other_contractor = insert_contractor(&app.pool, acme.company, "SteelWorks").await?;
    let other_worker = insert_user(
        &app.pool,
        "w2",
        Role::Worker,
        Affiliation {
            company: Some(acme.company),
            contractor: Some(other_contractor),
            ..Affiliation::default()
        },
    )
    .await?;
    insert_task(&app.pool, acme.project, Some(other_worker), "Weld frame", None).await?;

    let token = app.token_for(acme.worker)?;
    let (_, page) = app
        .get(&format!("/api/tasks?assigned_to={other_worker}&project_id={}", acme.project), &token)
        .await?;
    assert!(ids(&page).is_empty(), "worker saw someone else's task: {page}");

    let (_, page) = app.get("/api/users", &token).await?;
    assert_eq!(ids(&page), vec![acme.worker.to_string()]);

    // No companies:read grant at all for workers.
    let (status, body) = app.get("/api/companies", &token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    Ok(())
}

#[tokio::test]
async fn superuser_sees_every_tenant() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let rival = insert_company(&app.pool, "Rival", "rival@x.com", None).await?;
    let root = insert_user(
        &app.pool,
        "root",
        Role::CompanyAdmin,
        Affiliation {
            superuser: true,
            ..Affiliation::default()
        },
    )
    .await?;
    let token = app.token_for(root)?;

    let (status, page) = app.get("/api/companies", &token).await?;
    assert_eq!(status, StatusCode::OK);
    let seen = ids(&page);
    assert!(seen.contains(&acme.company.to_string()));
    assert!(seen.contains(&rival.to_string()));
    Ok(())
}
