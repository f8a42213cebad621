use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};

use mukhattat::authz::Role;

mod common;
use common::{
    id_of, insert_company, insert_project, insert_task, insert_user, multipart_request, pdf_bytes, seed_acme,
    Affiliation,
};

#[tokio::test]
async fn tasks_created_as_completed_never_started() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let admin = app.token_for(acme.admin)?;

    let (status, done) = app
        .json(
            "POST",
            "/api/tasks",
            Some(&admin),
            json!({ "project_id": acme.project, "title": "Backfilled survey", "status": "COMPLETED" }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{done}");
    assert_eq!(done["started_at"], Value::Null);
    assert!(done["completed_at"].is_string(), "{done}");

    let (status, running) = app
        .json(
            "POST",
            "/api/tasks",
            Some(&admin),
            json!({ "project_id": acme.project, "title": "Strip formwork", "status": "IN_PROGRESS" }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{running}");
    assert!(running["started_at"].is_string(), "{running}");
    assert_eq!(running["completed_at"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn logged_hours_roll_up_into_the_task() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let worker = app.token_for(acme.worker)?;
    let uri = format!("/api/tasks/{}/time-entries", acme.task);

    let (status, entry) = app
        .json("POST", &uri, Some(&worker), json!({ "hours": 3.5, "date": "2026-04-14", "notes": "rebar tying" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{entry}");
    assert_eq!(entry["hours"], 3.5);
    assert_eq!(entry["user_id"], acme.worker.to_string());

    let (status, _) = app
        .json("POST", &uri, Some(&worker), json!({ "hours": 4, "date": "2026-04-15" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    // One entry per person, task and day.
    let (status, body) = app
        .json("POST", &uri, Some(&worker), json!({ "hours": 1, "date": "2026-04-15" }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    for hours in [0.0, -2.0, 24.5] {
        let (status, body) = app.json("POST", &uri, Some(&worker), json!({ "hours": hours })).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{hours}: {body}");
        assert_eq!(body["error"], "validation_error");
    }

    let (status, task) = app.get(&format!("/api/tasks/{}", acme.task), &worker).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["actual_hours"], 7.5);

    let (status, entries) = app.get(&uri, &worker).await?;
    assert_eq!(status, StatusCode::OK);
    let dates: Vec<&str> = entries
        .as_array()
        .map(|items| items.iter().filter_map(|entry| entry["date"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(dates, ["2026-04-15", "2026-04-14"]);
    Ok(())
}

#[tokio::test]
async fn comments_follow_task_visibility() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let worker = app.token_for(acme.worker)?;
    let unassigned = insert_task(&app.pool, acme.project, None, "Order rebar", None).await?;

    let (status, comment) = app
        .json(
            "POST",
            &format!("/api/tasks/{}/comments", acme.task),
            Some(&worker),
            json!({ "content": "  Slab poured, curing  " }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{comment}");
    assert_eq!(comment["content"], "Slab poured, curing");

    let (status, body) = app
        .json("POST", &format!("/api/tasks/{}/comments", acme.task), Some(&worker), json!({ "content": " " }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    // The worker cannot see a task they are not assigned to.
    let (status, body) = app
        .json("POST", &format!("/api/tasks/{unassigned}/comments"), Some(&worker), json!({ "content": "hi" }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");

    // The admin reads the thread but only the author may remove the comment.
    let admin = app.token_for(acme.admin)?;
    let (status, thread) = app.get(&format!("/api/tasks/{}/comments", acme.task), &admin).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread.as_array().map(Vec::len), Some(1));

    let comment_uri = format!("/api/tasks/{}/comments/{}", acme.task, id_of(&comment)?);
    let (status, _) = app.json("DELETE", &comment_uri, Some(&admin), Value::Null).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.json("DELETE", &comment_uri, Some(&worker), Value::Null).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn attachments_upload_and_download() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let worker = app.token_for(acme.worker)?;

    let (status, attachment) = app
        .send(multipart_request(
            &format!("/api/tasks/{}/attachments", acme.task),
            &worker,
            &[],
            "pour-record.pdf",
            &pdf_bytes("pour-record"),
        )?)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{attachment}");
    assert_eq!(attachment["file_name"], "pour-record.pdf");
    assert_eq!(attachment["file_type"], "pdf");
    assert!(attachment.get("file_path").is_none(), "storage key leaked: {attachment}");

    let download = format!("/api/tasks/{}/attachments/{}/file", acme.task, id_of(&attachment)?);
    let (status, body) = app.get(&download, &worker).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap_or_default().contains("pour-record"));

    // Another company's admin cannot reach the file through a task it cannot see.
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
    let (status, _) = app.get(&download, &app.token_for(rival_admin)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(multipart_request(
            &format!("/api/tasks/{}/attachments", acme.task),
            &worker,
            &[],
            "payload.exe",
            b"MZ\x90\x00binary",
        )?)
        .await?;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE, "{body}");
    assert_eq!(body["error"], "unsupported_file_type");
    Ok(())
}

#[tokio::test]
async fn statistics_cover_only_visible_tasks() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let admin = app.token_for(acme.admin)?;

    let (status, _) = app
        .json(
            "POST",
            "/api/tasks",
            Some(&admin),
            json!({ "project_id": acme.project, "title": "Handover", "status": "COMPLETED", "estimated_hours": 6 }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let overdue = chrono::Utc::now().date_naive() - chrono::Duration::days(3);
    insert_task(&app.pool, acme.project, None, "Late inspection", Some(overdue)).await?;

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
    insert_task(&app.pool, rival_project, None, "Survey", None).await?;

    let (status, stats) = app.get("/api/tasks/statistics", &admin).await?;
    assert_eq!(status, StatusCode::OK, "{stats}");
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["pending"], 2);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["overdue"], 1);
    assert_eq!(stats["total_estimated_hours"], 6.0);

    let (status, stats) = app.get("/api/tasks/statistics", &app.token_for(acme.worker)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 1);
    Ok(())
}
