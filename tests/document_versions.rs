use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

use mukhattat::authz::Role;

mod common;
use common::{id_of, insert_user, multipart_request, pdf_bytes, seed_acme, send, Affiliation, TestApp};

async fn upload_contractor_document(app: &TestApp, token: &str, project: &str) -> Result<Value> {
    let (status, body) = app
        .send(multipart_request(
            "/api/documents",
            token,
            &[("project_id", project), ("title", "Rebar shop drawings")],
            "rebar.pdf",
            &pdf_bytes("rebar"),
        )?)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(body)
}

/// Notifications are written by a background listener.
async fn wait_for_unread(app: &TestApp, token: &str) -> Result<i64> {
    for _ in 0..50 {
        let (_, body) = app.get("/api/notifications/unread-count", token).await?;
        let count = body["count"].as_i64().unwrap_or_default();
        if count > 0 {
            return Ok(count);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(0)
}

#[tokio::test]
async fn concurrent_versions_get_distinct_numbers() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let contractor = app.token_for(acme.contractor_user)?;

    let document = upload_contractor_document(&app, &contractor, &acme.project.to_string()).await?;
    assert_eq!(document["side"], "CONTRACTOR");
    assert_eq!(document["review_status"], "PENDING");
    let document_id = id_of(&document)?;

    let mut handles = Vec::new();
    for n in 0..5 {
        let router = app.router.clone();
        let request = multipart_request(
            &format!("/api/documents/{document_id}/versions"),
            &contractor,
            &[("change_notes", &format!("revision {n}"))],
            &format!("rebar-{n}.pdf"),
            &pdf_bytes(&format!("rev-{n}")),
        )?;
        handles.push(tokio::spawn(async move { send(&router, request).await }));
    }

    let mut numbers = BTreeSet::new();
    for handle in handles {
        let (status, version) = handle.await??;
        assert_eq!(status, StatusCode::CREATED, "{version}");
        numbers.insert(version["version_number"].as_i64().unwrap_or_default());
    }
    assert_eq!(numbers, (1..=5).collect::<BTreeSet<i64>>());

    let (status, versions) = app
        .get(&format!("/api/documents/{document_id}/versions"), &contractor)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<i64> = versions
        .as_array()
        .map(|items| items.iter().filter_map(|v| v["version_number"].as_i64()).collect())
        .unwrap_or_default();
    assert_eq!(listed.len(), 5);

    let (_, detail) = app.get(&format!("/api/documents/{document_id}"), &contractor).await?;
    assert_eq!(detail["latest_version"], 5);
    Ok(())
}

#[tokio::test]
async fn company_controller_reviews_contractor_documents() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let contractor = app.token_for(acme.contractor_user)?;
    let controller_id = insert_user(
        &app.pool,
        "acme-dc",
        Role::DocumentController,
        Affiliation {
            company: Some(acme.company),
            ..Affiliation::default()
        },
    )
    .await?;
    let controller = app.token_for(controller_id)?;

    let document = upload_contractor_document(&app, &contractor, &acme.project.to_string()).await?;
    let document_id = id_of(&document)?;
    assert!(wait_for_unread(&app, &controller).await? >= 1, "controller is told about the upload");

    let (status, pending) = app.get("/api/documents/pending-review", &controller).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["total"], 1);
    assert_eq!(pending["items"][0]["id"], document["id"]);

    // Review is reserved to controllers even for the company's own admin.
    let admin = app.token_for(acme.admin)?;
    let approve_uri = format!("/api/documents/{document_id}/approve");
    let (status, _) = app.json("POST", &approve_uri, Some(&admin), json!({})).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = app
        .json("POST", &approve_uri, Some(&controller), json!({ "notes": "ok to build" }))
        .await?;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["review_status"], "APPROVED");
    assert_eq!(approved["reviewed_by"], json!(controller_id.to_string()));
    assert!(wait_for_unread(&app, &contractor).await? >= 1, "uploader hears the outcome");

    for action in ["approve", "reject", "request-modification"] {
        let (status, body) = app
            .json(
                "POST",
                &format!("/api/documents/{document_id}/{action}"),
                Some(&controller),
                json!({ "notes": "second opinion" }),
            )
            .await?;
        assert_eq!(status, StatusCode::CONFLICT, "{action}");
        assert_eq!(body["error"], "invalid_transition");
    }
    let (_, current) = app.get(&format!("/api/documents/{document_id}"), &controller).await?;
    assert_eq!(current["review_status"], "APPROVED");
    assert_eq!(current["review_notes"], "ok to build");

    // A new version starts a fresh review cycle.
    let (status, _) = app
        .send(multipart_request(
            &format!("/api/documents/{document_id}/versions"),
            &contractor,
            &[("change_notes", "moved the stirrups")],
            "rebar-b.pdf",
            &pdf_bytes("rebar-b"),
        )?)
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let (_, reopened) = app.get(&format!("/api/documents/{document_id}"), &controller).await?;
    assert_eq!(reopened["review_status"], "PENDING");
    assert_eq!(reopened["review_notes"], "");
    assert_eq!(reopened["reviewed_by"], Value::Null);
    assert_eq!(reopened["file_name"], "rebar-b.pdf");
    Ok(())
}

#[tokio::test]
async fn controllers_do_not_review_their_own_side() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let controller_id = insert_user(
        &app.pool,
        "buildco-dc",
        Role::DocumentController,
        Affiliation {
            company: Some(acme.company),
            contractor: Some(acme.contractor),
            ..Affiliation::default()
        },
    )
    .await?;
    let controller = app.token_for(controller_id)?;
    let contractor = app.token_for(acme.contractor_user)?;

    let document = upload_contractor_document(&app, &contractor, &acme.project.to_string()).await?;
    let (status, pending) = app.get("/api/documents/pending-review", &controller).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["total"], 0);

    let (status, _) = app
        .json(
            "POST",
            &format!("/api/documents/{}/approve", id_of(&document)?),
            Some(&controller),
            json!({}),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
