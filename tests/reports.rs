use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use mukhattat::authz::Role;

mod common;
use common::{insert_company, insert_project, insert_task, insert_user, seed_acme, AcmeFixture, Affiliation, TestApp};

/// Acme with logged hours plus a rival company whose hours must never show up
/// in Acme's reports.
async fn seeded(app: &TestApp) -> Result<AcmeFixture> {
    let acme = seed_acme(&app.pool).await?;
    let worker = app.token_for(acme.worker)?;
    for (hours, date) in [(3.0, "2026-04-14"), (5.0, "2026-04-15")] {
        let (status, body) = app
            .json(
                "POST",
                &format!("/api/tasks/{}/time-entries", acme.task),
                Some(&worker),
                json!({ "hours": hours, "date": date }),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

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
    let (status, body) = app
        .json(
            "POST",
            &format!("/api/tasks/{rival_task}/time-entries"),
            Some(&app.token_for(rival_admin)?),
            json!({ "hours": 11, "date": "2026-04-15" }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    Ok(acme)
}

#[tokio::test]
async fn roles_without_report_access_are_refused() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seed_acme(&app.pool).await?;

    let (status, body) = app
        .get("/api/reports/dashboard-summary", &app.token_for(acme.worker)?)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let contractor = app.token_for(acme.contractor_user)?;
    let (status, body) = app.get("/api/reports/dashboard-summary", &contractor).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total_projects"], 1);

    // Contractors read reports but may not export them.
    let (status, _) = app.get("/api/reports/dashboard-summary/export", &contractor).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn time_tracking_counts_only_visible_hours() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seeded(&app).await?;
    let admin = app.token_for(acme.admin)?;

    let (status, report) = app.get("/api/reports/time-tracking", &admin).await?;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["total_hours"], 8.0);
    assert_eq!(report["total_entries"], 2);
    assert_eq!(report["by_project"][0]["project_name"], "Harbour Tower");
    assert_eq!(report["by_project"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["by_task"][0]["task_title"], "Pour slab");

    let (status, report) = app
        .get("/api/reports/time-tracking?start_date=2026-04-15&end_date=2026-04-15", &admin)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_hours"], 5.0);

    let (status, body) = app
        .get("/api/reports/time-tracking?start_date=2026-04-16&end_date=2026-04-15", &admin)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    Ok(())
}

#[tokio::test]
async fn budget_prices_hours_at_the_configured_rate() -> Result<()> {
    let app = common::spawn_app_with(|config| config.hourly_rate = 100.0).await?;
    let acme = seeded(&app).await?;
    sqlx::query("UPDATE projects SET estimated_budget = 2000 WHERE id = ?")
        .bind(acme.project)
        .execute(&app.pool)
        .await?;

    let (status, lines) = app.get("/api/reports/budget-vs-actual", &app.token_for(acme.admin)?).await?;
    assert_eq!(status, StatusCode::OK, "{lines}");
    assert_eq!(lines.as_array().map(Vec::len), Some(1));
    assert_eq!(lines[0]["total_hours"], 8.0);
    assert_eq!(lines[0]["calculated_cost"], 800.0);
    assert_eq!(lines[0]["variance"], 1200.0);
    Ok(())
}

#[tokio::test]
async fn progress_and_dashboard_reflect_completed_tasks() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seeded(&app).await?;
    let admin = app.token_for(acme.admin)?;
    let (status, _) = app
        .json("PUT", &format!("/api/tasks/{}", acme.task), Some(&admin), json!({ "status": "COMPLETED" }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    insert_task(&app.pool, acme.project, None, "Order rebar", None).await?;

    let (status, progress) = app.get("/api/reports/project-progress", &admin).await?;
    assert_eq!(status, StatusCode::OK, "{progress}");
    assert_eq!(progress.as_array().map(Vec::len), Some(1));
    assert_eq!(progress[0]["progress_percentage"], 50.0);

    let (status, summary) = app.get("/api/reports/dashboard-summary", &admin).await?;
    assert_eq!(status, StatusCode::OK, "{summary}");
    assert_eq!(summary["total_projects"], 1);
    assert_eq!(summary["active_projects"], 1);
    assert_eq!(summary["total_tasks"], 2);
    assert_eq!(summary["completed_tasks"], 1);
    let series = summary["progress_over_time"].as_array().cloned().unwrap_or_default();
    assert_eq!(series.len(), 12);
    assert_eq!(series[11]["month"], Utc::now().format("%Y-%m").to_string());
    assert_eq!(series[11]["avg_progress"], 50.0);
    Ok(())
}

#[tokio::test]
async fn department_performance_counts_members_and_hours() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seeded(&app).await?;
    let department = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query("INSERT INTO departments (id, contractor_id, name, created_at, updated_at) VALUES (?, ?, 'Concrete', ?, ?)")
        .bind(department)
        .bind(acme.contractor)
        .bind(now)
        .bind(now)
        .execute(&app.pool)
        .await?;
    sqlx::query("UPDATE users SET department_id = ? WHERE id = ?")
        .bind(department)
        .bind(acme.worker)
        .execute(&app.pool)
        .await?;
    sqlx::query("UPDATE tasks SET department_id = ? WHERE id = ?")
        .bind(department)
        .bind(acme.task)
        .execute(&app.pool)
        .await?;

    let (status, rows) = app
        .get("/api/reports/department-performance", &app.token_for(acme.contractor_user)?)
        .await?;
    assert_eq!(status, StatusCode::OK, "{rows}");
    assert_eq!(rows[0]["department_name"], "Concrete");
    assert_eq!(rows[0]["contractor_name"], "BuildCo");
    assert_eq!(rows[0]["member_count"], 1);
    assert_eq!(rows[0]["total_tasks"], 1);
    assert_eq!(rows[0]["total_hours"], 8.0);
    Ok(())
}

#[tokio::test]
async fn admins_export_reports_as_attachments() -> Result<()> {
    let app = common::spawn_app().await?;
    let acme = seeded(&app).await?;
    let admin = app.token_for(acme.admin)?;

    let request = Request::builder()
        .uri("/api/reports/time-tracking/export")
        .header("authorization", format!("Bearer {admin}"))
        .body(Body::empty())?;
    let response = app.router.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"time-tracking-"), "{disposition}");
    let bytes = body::to_bytes(response.into_body(), 1_048_576).await?;
    let report: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(report["total_hours"], 8.0);

    let (status, _) = app.get("/api/reports/payroll/export", &admin).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
