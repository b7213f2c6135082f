use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

use crate::config::config;

/// Log `METHOD path` on entry and `METHOD path : status secs` once the response is ready
pub async fn request_logger(request: Request, next: Next) -> Response {
    if !config().api.enable_request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let request_id = request
        .headers()
        .get("request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    info!(request_id = request_id.as_deref(), "{} {}", method, path);
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        request_id = request_id.as_deref(),
        status = response.status().as_u16(),
        request_time = elapsed,
        "{} {} : {} {:.6}s",
        method,
        path,
        response.status().as_u16(),
        elapsed
    );
    response
}
