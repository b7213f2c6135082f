use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::config;

#[derive(Debug, Error)]
pub enum BackdropError {
    #[error("backdrop request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backdrop answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("data set {0} does not exist in backdrop")]
    NotFound(String),
}

fn data_set_url(name: &str) -> String {
    format!("{}/data-sets/{}", config().backdrop.url.trim_end_matches('/'), name)
}

/// Create the backing collection for a new data set
pub async fn create_dataset(name: &str, capped_size: i64) -> Result<(), BackdropError> {
    let backdrop = &config().backdrop;
    if !backdrop.enabled {
        info!("Backdrop disabled, not creating collection for {}", name);
        return Ok(());
    }

    let url = data_set_url(name);
    let response = reqwest::Client::new()
        .post(&url)
        .bearer_auth(&backdrop.create_collection_token)
        .json(&json!({ "capped_size": capped_size }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(BackdropError::Status { status: response.status().as_u16(), url });
    }
    info!("Created backdrop collection {}", name);
    Ok(())
}

/// Drop the backing collection; 404 maps to `BackdropError::NotFound`
pub async fn delete_dataset(name: &str) -> Result<(), BackdropError> {
    let backdrop = &config().backdrop;
    if !backdrop.enabled {
        info!("Backdrop disabled, not deleting collection for {}", name);
        return Ok(());
    }

    let url = data_set_url(name);
    let response = reqwest::Client::new()
        .delete(&url)
        .bearer_auth(&backdrop.create_collection_token)
        .send()
        .await?;

    match response.status() {
        status if status.is_success() => Ok(()),
        reqwest::StatusCode::NOT_FOUND => {
            warn!("Backdrop has no collection named {}", name);
            Err(BackdropError::NotFound(name.to_string()))
        }
        status => Err(BackdropError::Status { status: status.as_u16(), url }),
    }
}
