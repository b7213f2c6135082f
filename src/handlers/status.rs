use serde_json::json;
use tracing::error;

use crate::database::models::DataSet;
use crate::database::Repository;
use crate::error::ApiError;
use crate::handlers::resource;
use crate::middleware::{ApiResponse, ApiResult};

/// `GET /_status`
pub async fn status() -> ApiResult {
    Ok(ApiResponse::json(json!({ "status": "ok" })))
}

/// `GET /_status/data-sets`; fails with 503 when the database can't be reached
pub async fn data_sets() -> ApiResult {
    let unavailable = |e: &dyn std::fmt::Display| {
        error!("Database status check failed: {}", e);
        ApiError::service_unavailable("database unavailable")
    };
    let mut conn = resource::connection().await.map_err(|e| unavailable(&e))?;
    let count = Repository::<DataSet>::new("data_sets")
        .count(&mut conn)
        .await
        .map_err(|e| unavailable(&e))?;
    Ok(ApiResponse::json(json!({ "message": format!("Got {} data sets.", count) })))
}
