use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::json;

use mukhattat::config::{AppConfig, RateSpec};

mod common;
use common::{TestApp, PASSWORD};

fn limited(limit: u32) -> impl FnOnce(&mut AppConfig) {
    move |config| {
        config.login_rate = RateSpec {
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// A login arriving on a socket from `peer`, optionally claiming to be
/// forwarded for `forwarded_for`.
fn login_request(peer: Option<&str>, forwarded_for: Option<&str>, username: &str, password: &str) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("content-type", "application/json");
    if let Some(peer) = peer {
        let addr: SocketAddr = format!("{peer}:40000").parse()?;
        builder = builder.extension(ConnectInfo(addr));
    }
    if let Some(forwarded_for) = forwarded_for {
        builder = builder.header("x-forwarded-for", forwarded_for);
    }
    Ok(builder.body(Body::from(json!({ "username": username, "password": password }).to_string()))?)
}

async fn statuses(app: &TestApp, requests: Vec<Request<Body>>) -> Result<Vec<StatusCode>> {
    let mut seen = Vec::new();
    for request in requests {
        seen.push(app.send(request).await?.0);
    }
    Ok(seen)
}

#[tokio::test]
async fn login_is_throttled_after_the_limit() -> Result<()> {
    let app = common::spawn_app_with(limited(2)).await?;
    common::seed_acme(&app.pool).await?;

    let (status, _) = app.login("acme-admin", "wrong-password").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("acme-admin", PASSWORD).await?;
    assert_eq!(status, StatusCode::OK);

    // Even correct credentials are refused once the window is spent.
    let (status, body) = app.login("acme-admin", PASSWORD).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");

    // Other accounts have their own counters.
    let (status, _) = app.login("w1", PASSWORD).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn rotating_forwarded_headers_do_not_reset_the_count() -> Result<()> {
    let app = common::spawn_app_with(limited(2)).await?;
    common::seed_acme(&app.pool).await?;

    let requests = (0..10)
        .map(|i| login_request(None, Some(&format!("198.51.100.{i}")), "acme-admin", "wrong-password"))
        .collect::<Result<Vec<_>>>()?;
    let seen = statuses(&app, requests).await?;

    assert_eq!(&seen[..2], &[StatusCode::UNAUTHORIZED, StatusCode::UNAUTHORIZED]);
    assert!(seen[2..].iter().all(|status| *status == StatusCode::TOO_MANY_REQUESTS), "{seen:?}");
    Ok(())
}

#[tokio::test]
async fn peer_address_is_counted_across_usernames() -> Result<()> {
    let app = common::spawn_app_with(limited(1)).await?;
    common::seed_acme(&app.pool).await?;

    let (status, _) = app.send(login_request(Some("203.0.113.7"), None, "acme-admin", PASSWORD)?).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(login_request(Some("203.0.113.7"), None, "w1", PASSWORD)?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "same peer, different user");

    // A spoofed header does not move the caller to a fresh bucket.
    let (status, _) = app
        .send(login_request(Some("203.0.113.7"), Some("192.0.2.1"), "w1", PASSWORD)?)
        .await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) = app.send(login_request(Some("198.51.100.4"), None, "w1", PASSWORD)?).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_headers_name_the_client() -> Result<()> {
    let app = common::spawn_app_with(|config| {
        limited(1)(config);
        config.trust_proxy_headers = true;
    })
    .await?;
    common::seed_acme(&app.pool).await?;

    let proxy = Some("10.0.0.2");
    let (status, _) = app
        .send(login_request(proxy, Some("203.0.113.7"), "acme-admin", PASSWORD)?)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(login_request(proxy, Some("203.0.113.7"), "w1", PASSWORD)?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Another client behind the same proxy is not affected.
    let (status, _) = app
        .send(login_request(proxy, Some("198.51.100.4"), "buildco-lead", PASSWORD)?)
        .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}
