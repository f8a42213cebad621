use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use mukhattat::authz::{Entity, Role};
use mukhattat::db::scoped::fetch_by_id;
use mukhattat::errors::AppError;
use mukhattat::files::{validate, UploadKind, UploadedFile};
use mukhattat::models::project::{Project, PROJECT_COLUMNS};
use mukhattat::review::ReviewStatus;
use mukhattat::routes::blueprints::save_blueprint;

mod common;
use common::{insert_company, insert_user, multipart_request, pdf_bytes, seed_acme, Affiliation};

fn blueprint_file(marker: &str) -> UploadedFile {
    UploadedFile {
        file_name: format!("{marker}.pdf"),
        bytes: pdf_bytes(marker),
    }
}

#[tokio::test]
async fn replacing_a_blueprint_restarts_the_deadline() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let state = app.state();
    let project: Project = fetch_by_id(&app.pool, Entity::Project, PROJECT_COLUMNS, acme.project).await?;

    let t = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let file = validate(blueprint_file("ground-floor"), UploadKind::Blueprint, &app.config.uploads)?;
    let (first, replaced) = save_blueprint(&state, &project, acme.admin, file, t).await?;
    assert!(!replaced);
    assert_eq!(first.review.review_status, ReviewStatus::Pending);
    assert_eq!(first.review.review_deadline, Some(t + Duration::days(10)));

    // Close the first cycle so the replacement visibly reopens it.
    sqlx::query("UPDATE blueprints SET review_status = 'REJECTED', review_notes = 'wrong scale' WHERE id = ?")
        .bind(first.id)
        .execute(&app.pool)
        .await?;

    let later = t + Duration::days(5);
    let file = validate(blueprint_file("ground-floor-rev-b"), UploadKind::Blueprint, &app.config.uploads)?;
    let (second, replaced) = save_blueprint(&state, &project, acme.admin, file, later).await?;
    assert!(replaced);
    assert_eq!(second.id, first.id, "a project keeps a single blueprint row");
    assert_eq!(second.review.review_status, ReviewStatus::Pending);
    assert_eq!(second.review.review_deadline, Some(later + Duration::days(10)));
    assert!(second.review.review_notes.is_empty());
    assert_ne!(second.file_path, first.file_path);
    Ok(())
}

#[tokio::test]
async fn blueprint_upload_and_review_over_http() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let admin = app.token_for(acme.admin)?;
    let uri = format!("/api/projects/{}/blueprint", acme.project);

    let (status, created) = app
        .send(multipart_request(&uri, &admin, &[], "plan.pdf", &pdf_bytes("v1"))?)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["review_status"], "PENDING");
    assert_eq!(created["is_overdue"], false);
    let days = created["days_until_deadline"].as_i64();
    assert!(matches!(days, Some(9 | 10)), "deadline is ten days out, got {days:?}");

    let (status, replaced) = app
        .send(multipart_request(&uri, &admin, &[], "plan-b.pdf", &pdf_bytes("v2"))?)
        .await?;
    assert_eq!(status, StatusCode::OK, "{replaced}");
    assert_eq!(replaced["id"], created["id"]);

    // Contractors can see the blueprint but not review it.
    let contractor = app.token_for(acme.contractor_user)?;
    let (status, _) = app.get(&uri, &contractor).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .json("POST", &format!("{uri}/approve"), Some(&contractor), json!({}))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = app
        .json("POST", &format!("{uri}/approve"), Some(&admin), json!({ "notes": "looks right" }))
        .await?;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["review_status"], "APPROVED");
    assert_eq!(approved["review_notes"], "looks right");

    let (status, body) = app
        .json("POST", &format!("{uri}/reject"), Some(&admin), json!({ "notes": "changed my mind" }))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let (_, current) = app.get(&uri, &admin).await?;
    assert_eq!(current["review_status"], "APPROVED");
    assert_eq!(current["review_notes"], "looks right");
    Ok(())
}

#[tokio::test]
async fn blueprints_reject_disallowed_content() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let admin = app.token_for(acme.admin)?;
    let uri = format!("/api/projects/{}/blueprint", acme.project);

    let (status, body) = app
        .send(multipart_request(&uri, &admin, &[], "notes.txt", b"just some text")?)
        .await?;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "unsupported_file_type");

    // PNG signature with a truncated body: sniffed as an image, fails to decode.
    let broken_png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    let (status, body) = app
        .send(multipart_request(&uri, &admin, &[], "plan.png", &broken_png)?)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "corrupt_file");

    let (status, _) = app.get(&uri, &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "failed uploads leave nothing behind");
    Ok(())
}

#[tokio::test]
async fn only_the_owning_admin_and_assigned_consultant_review() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let admin = app.token_for(acme.admin)?;
    let uri = format!("/api/projects/{}/blueprint", acme.project);
    let (status, _) = app
        .send(multipart_request(&uri, &admin, &[], "plan.pdf", &pdf_bytes("v1"))?)
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let assigned = insert_user(&app.pool, "assigned-consultant", Role::Consultant, Affiliation::default()).await?;
    let bystander = insert_user(&app.pool, "other-consultant", Role::Consultant, Affiliation::default()).await?;
    sqlx::query("UPDATE projects SET consultant_id = ? WHERE id = ?")
        .bind(assigned)
        .bind(acme.project)
        .execute(&app.pool)
        .await?;

    let globex = insert_company(&app.pool, "Globex", "globex@x.com", None).await?;
    let globex_admin = insert_user(
        &app.pool,
        "globex-admin",
        Role::CompanyAdmin,
        Affiliation {
            company: Some(globex),
            ..Affiliation::default()
        },
    )
    .await?;

    for outsider in [bystander, globex_admin] {
        let token = app.token_for(outsider)?;
        let (status, body) = app
            .json("POST", &format!("{uri}/approve"), Some(&token), json!({ "notes": "fine by me" }))
            .await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
        assert_eq!(body["error"], "not_found");
    }

    let (_, current) = app.get(&uri, &admin).await?;
    assert_eq!(current["review_status"], "PENDING", "refused reviews change nothing");

    let consultant = app.token_for(assigned)?;
    let (status, body) = app
        .json(
            "POST",
            &format!("{uri}/request-modification"),
            Some(&consultant),
            json!({ "notes": "add grid lines" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["review_status"], "MODIFICATION_REQUESTED");
    assert_eq!(body["reviewed_by"], assigned.to_string());
    Ok(())
}

#[tokio::test]
async fn concurrent_replacements_leave_one_stored_file() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;
    let state = app.state();
    let project: Project = fetch_by_id(&app.pool, Entity::Project, PROJECT_COLUMNS, acme.project).await?;

    let file = validate(blueprint_file("original"), UploadKind::Blueprint, &app.config.uploads)?;
    save_blueprint(&state, &project, acme.admin, file, Utc::now()).await?;

    let admin = acme.admin;
    let mut handles = Vec::new();
    for i in 0..4 {
        let state = state.clone();
        let project = project.clone();
        let file = validate(blueprint_file(&format!("rev-{i}")), UploadKind::Blueprint, &app.config.uploads)?;
        handles.push(tokio::spawn(async move {
            save_blueprint(&state, &project, admin, file, Utc::now()).await
        }));
    }

    let mut stored = 0;
    for handle in handles {
        match handle.await? {
            Ok((_, replaced)) => {
                assert!(replaced);
                stored += 1;
            }
            Err(AppError::Conflict(_)) => {}
            Err(other) => return Err(other.into()),
        }
    }
    assert!(stored >= 1);

    let current: String = sqlx::query_scalar("SELECT file_path FROM blueprints WHERE project_id = ?")
        .bind(acme.project)
        .fetch_one(&app.pool)
        .await?;
    let dir = app.config.media_root.join("blueprints").join(acme.project.to_string());
    let mut on_disk = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        on_disk.push(entry?.file_name().to_string_lossy().into_owned());
    }
    let expected = current.rsplit('/').next().unwrap_or_default().to_string();
    assert_eq!(on_disk, vec![expected], "only the committed file remains");
    Ok(())
}

#[tokio::test]
async fn oversized_multipart_bodies_are_file_too_large() -> Result<()> {
    let app = common::spawn_app_with(|config| {
        config.uploads.max_blueprint_bytes = 1024;
        config.uploads.max_attachment_bytes = 1024;
    })
    .await?;
    let acme = seed_acme(&app.pool).await?;
    let admin = app.token_for(acme.admin)?;
    let uri = format!("/api/projects/{}/blueprint", acme.project);

    // Past the request body limit, not just the per-file one.
    let mut huge = pdf_bytes("huge");
    huge.resize(3 * 1024 * 1024, b' ');
    let (status, body) = app
        .send(multipart_request(&uri, &admin, &[], "huge.pdf", &huge)?)
        .await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{body}");
    assert_eq!(body["error"], "file_too_large");
    Ok(())
}
