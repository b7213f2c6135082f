mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn status_endpoint_responds() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/_status")).await?;

    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn data_set_status_reports_a_count_or_503() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(server.url("/_status/data-sets")).await?;

    let status = res.status();
    let body = res.json::<serde_json::Value>().await?;
    match status {
        StatusCode::OK => {
            let message = body["message"].as_str().unwrap_or_default();
            assert!(message.starts_with("Got ") && message.ends_with(" data sets."), "{}", message);
        }
        StatusCode::SERVICE_UNAVAILABLE => assert_eq!(body["status"], "error"),
        other => panic!("unexpected status: {}", other),
    }
    Ok(())
}
