use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::AuthUser;
use crate::config::config;

#[derive(Debug, Error)]
pub enum SignonError {
    #[error("signon request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: AuthUser,
}

/// `GET {signon_url}/user.json?client_id=..` with the caller's bearer token.
///
/// Any non-200 answer means the token is not recognised.
pub async fn fetch_user(access_token: &str) -> Result<Option<AuthUser>, SignonError> {
    let security = &config().security;
    let url = format!("{}/user.json", security.signon_url.trim_end_matches('/'));

    let response = reqwest::Client::new()
        .get(&url)
        .query(&[("client_id", security.signon_client_id.as_str())])
        .bearer_auth(access_token)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?;

    if response.status() != reqwest::StatusCode::OK {
        warn!("signon rejected token with status {}", response.status());
        return Ok(None);
    }

    let body: UserResponse = response.json().await?;
    debug!("signon resolved token to {}", body.user.email);
    Ok(Some(body.user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signon_user_document_parses() {
        let doc = serde_json::json!({
            "user": {
                "uid": "abc-123",
                "email": "someone@digital.cabinet-office.gov.uk",
                "name": "Some One",
                "organisation_slug": "cabinet-office",
                "permissions": ["signin", "dashboard"]
            }
        });
        let parsed: UserResponse = serde_json::from_value(doc).unwrap();
        assert!(parsed.user.has_permission("dashboard"));
        assert_eq!(parsed.user.uid, "abc-123");
    }
}
