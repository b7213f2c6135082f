use axum::{body::Bytes, extract::Path, http::HeaderMap};
use serde_json::json;
use tracing::info;

use crate::auth::authorize;
use crate::database::models::OAuthUser;
use crate::database::{finish, DatabaseManager};
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{ResourceKind, Verb};

/// `POST /auth/gds/api/users/{uid}/reauth`: signon tells us a user's
/// permissions changed, so forget every token cached for them
pub async fn reauth(headers: HeaderMap, Path(uid): Path<String>, body: Bytes) -> ApiResult {
    authorize(&headers, ResourceKind::SignonUser, Verb::Post, Some(&body)).await?;

    let mut tx = DatabaseManager::begin().await?;
    let result = OAuthUser::purge_user(&mut tx, &uid).await;
    let purged = finish(tx, result).await?;
    info!("Purged {} cached tokens for signon user {}", purged, uid);

    Ok(ApiResponse::json(json!({ "status": "ok" })))
}
