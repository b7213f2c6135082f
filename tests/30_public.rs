mod common;

use anyhow::Result;
use reqwest::{header, StatusCode};

#[tokio::test]
async fn spotlight_list_is_public() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/public/dashboards")).await?;

    if res.status() != StatusCode::OK {
        assert!(res.status().is_server_error(), "unexpected status: {}", res.status());
        return Ok(());
    }
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(
        res.headers().get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("max-age=300")
    );
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["page-type"], "browse");
    assert!(body["items"].is_array());
    Ok(())
}

#[tokio::test]
async fn unknown_spotlight_slug_is_404() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/public/dashboards?slug=no-such-dashboard")).await?;

    if res.status().is_server_error() {
        return Ok(());
    }
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["message"], "No dashboard with slug 'no-such-dashboard' exists");
    Ok(())
}

#[tokio::test]
async fn module_types_are_readable_anonymously() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/module-type")).await?;
    assert!(common::ok_or_no_database(res.status()), "unexpected status: {}", res.status());
    Ok(())
}
