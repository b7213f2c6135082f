mod common;

use anyhow::Result;
use common::{ADMIN_TOKEN, SIGNIN_TOKEN};
use reqwest::{header, StatusCode};

#[tokio::test]
async fn protected_list_without_token_is_challenged() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/data-sets")).await?;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.headers().get(header::WWW_AUTHENTICATE).and_then(|v| v.to_str().ok()),
        Some("Bearer")
    );
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["errors"][0]["status"], "401");
    Ok(())
}

#[tokio::test]
async fn token_without_role_is_forbidden() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/dashboards"))
        .bearer_auth(SIGNIN_TOKEN)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn admin_token_passes_authorization() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/data-sets"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await?;
    assert!(common::ok_or_no_database(res.status()), "unexpected status: {}", res.status());
    if res.status() == StatusCode::OK {
        assert_eq!(
            res.headers().get(header::VARY).and_then(|v| v.to_str().ok()),
            Some("Authorization")
        );
    }
    Ok(())
}

#[tokio::test]
async fn writes_need_json() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/organisation/type"))
        .bearer_auth(ADMIN_TOKEN)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(r#"{"name":"department"}"#)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let res = client
        .post(server.url("/organisation/type"))
        .bearer_auth(ADMIN_TOKEN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(r#"{"nmae":"department"}"#)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
