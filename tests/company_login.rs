use anyhow::Result;
use axum::http::StatusCode;

use mukhattat::authz::Role;

mod common;
use common::{insert_company, insert_user, Affiliation};

#[tokio::test]
async fn company_login_provisions_one_admin() -> Result<()> {
    let app = common::spawn_app().await?;
    let company = insert_company(&app.pool, "Acme", "acme@x.com", Some("secret-pass")).await?;

    let (status, first) = app.login("acme@x.com", "secret-pass").await?;
    assert_eq!(status, StatusCode::OK, "company login failed: {first}");
    assert_eq!(first["user"]["role"], "COMPANY_ADMIN");
    assert_eq!(first["user"]["company_id"], company.to_string());
    assert!(first["tokens"]["access"].as_str().is_some());

    let (status, second) = app.login("ACME@x.com", "secret-pass").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["user"]["id"], second["user"]["id"], "second login must reuse the admin");

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE company_id = ? AND role = 'COMPANY_ADMIN'")
        .bind(company)
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(admins, 1);

    // The provisioned account has no password of its own.
    let username = first["user"]["username"].as_str().unwrap_or_default().to_string();
    let (status, _) = app.login(&username, "secret-pass").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn company_login_reuses_existing_admin() -> Result<()> {
    let app = common::spawn_app().await?;
    let company = insert_company(&app.pool, "Acme", "acme@x.com", Some("secret-pass")).await?;
    let admin = insert_user(
        &app.pool,
        "acme-admin",
        Role::CompanyAdmin,
        Affiliation {
            company: Some(company),
            ..Affiliation::default()
        },
    )
    .await?;

    let (status, body) = app.login("acme@x.com", "secret-pass").await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["id"], admin.to_string());
    Ok(())
}

#[tokio::test]
async fn failed_logins_do_not_reveal_the_path() -> Result<()> {
    let app = common::spawn_app().await?;
    insert_company(&app.pool, "Acme", "acme@x.com", Some("secret-pass")).await?;
    insert_user(&app.pool, "ada", Role::Worker, Affiliation::default()).await?;

    let (company_status, company_body) = app.login("acme@x.com", "wrong-pass").await?;
    let (user_status, user_body) = app.login("ada", "wrong-pass").await?;
    let (missing_status, missing_body) = app.login("nobody@x.com", "wrong-pass").await?;

    for (status, body) in [
        (company_status, company_body),
        (user_status, user_body),
        (missing_status, missing_body),
    ] {
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_credentials");
    }
    Ok(())
}

#[tokio::test]
async fn user_login_accepts_username_or_email() -> Result<()> {
    let app = common::spawn_app().await?;
    let user = insert_user(&app.pool, "ada", Role::Worker, Affiliation::default()).await?;

    let (status, by_name) = app.login("ada", common::PASSWORD).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, by_email) = app.login("ada@users.test", common::PASSWORD).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_name["user"]["id"], user.to_string());
    assert_eq!(by_email["user"]["id"], user.to_string());
    Ok(())
}
