use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};

mod common;

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let app = common::spawn_app().await?;

    let req = Request::builder()
        .method("GET")
        .uri("/api/health")
        .body(Body::empty())?;
    let (status, body) = app.send(req).await?;

    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");
    assert_eq!(body["db_ok"], true, "expected db_ok: true, got: {body}");
    assert_eq!(body["permissions_provisioned"], true);
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_token() -> Result<()> {
    let app = common::spawn_app().await?;

    let req = Request::builder()
        .method("GET")
        .uri("/api/projects")
        .body(Body::empty())?;
    let (status, body) = app.send(req).await?;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
    Ok(())
}
