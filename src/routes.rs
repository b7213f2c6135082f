use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::config;
use crate::database::models::{
    Collector, CollectorType, DataGroup, DataSet, DataSource, DataType, ModuleType, Node, NodeType, Provider,
    Transform, TransformType, User,
};
use crate::error::ApiError;
use crate::handlers::resource::{self, Resource};
use crate::handlers::{dashboards, datasets, signon, status};
use crate::middleware::request_logger;

/// The whole HTTP surface
pub fn app() -> Router {
    let router = Router::new()
        .route("/_status", get(status::status))
        .route("/_status/data-sets", get(status::data_sets))
        .merge(data_set_routes())
        .merge(resource_routes::<DataGroup>("/data-groups"))
        .merge(resource_routes::<DataType>("/data-types"))
        .merge(resource_routes::<User>("/users"))
        .merge(resource_routes::<NodeType>("/organisation/type"))
        .merge(resource_routes::<Node>("/organisation/node"))
        .route("/organisation/node/:id/:sub", get(resource::sub::<Node>))
        .merge(resource_routes::<TransformType>("/transform-type"))
        .merge(resource_routes::<Transform>("/transform"))
        .merge(resource_routes::<Provider>("/provider"))
        .merge(resource_routes::<DataSource>("/data-source"))
        .merge(resource_routes::<CollectorType>("/collector-type"))
        .merge(resource_routes::<Collector>("/collector"))
        .merge(resource_routes::<ModuleType>("/module-type"))
        .merge(dashboard_routes())
        .route("/auth/gds/api/users/:uid/reauth", post(signon::reauth))
        .fallback(not_found)
        .layer(middleware::map_response(json_method_not_allowed))
        .layer(DefaultBodyLimit::max(config().api.max_request_size_bytes))
        .layer(middleware::from_fn(request_logger))
        .layer(TraceLayer::new_for_http());

    if config().security.enable_cors {
        router.layer(cors())
    } else {
        router
    }
}

/// `list`/`post` on `path`, `get`/`put` on `path/{id}`
fn resource_routes<R: Resource>(path: &str) -> Router {
    Router::new()
        .route(path, get(resource::list::<R>).post(resource::post::<R>))
        .route(&format!("{}/:id", path), get(resource::get::<R>).put(resource::put::<R>))
}

fn data_set_routes() -> Router {
    Router::new()
        .route("/data-sets", get(datasets::list).post(resource::post::<DataSet>))
        .route(
            "/data-sets/:name",
            get(datasets::detail).put(resource::put::<DataSet>).delete(datasets::delete),
        )
        .route("/data-sets/:name/users", get(datasets::users))
}

fn dashboard_routes() -> Router {
    Router::new()
        .route("/dashboards", get(dashboards::list))
        .route("/dashboard", post(dashboards::create))
        .route("/dashboard/:identifier", get(dashboards::get).put(dashboards::update))
        .route(
            "/dashboard/:identifier/module",
            get(dashboards::list_modules).post(dashboards::add_module),
        )
        .route("/public/dashboards", get(dashboards::spotlight))
        .route("/transactions-explorer-service/:id/dashboard", get(dashboards::by_transaction))
}

fn cors() -> CorsLayer {
    let origins = &config().security.cors_origins;
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

/// axum answers an unrouted method with an empty 405; give it the usual error body
async fn json_method_not_allowed(response: Response) -> Response {
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        return ApiError::method_not_allowed("Method not allowed").into_response();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    const ADMIN_TOKEN: &str = "development-oauth-access-token";
    const SIGNIN_TOKEN: &str = "signin-oauth-access-token";

    async fn send(request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let www_authenticate = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, www_authenticate, body)
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    #[tokio::test]
    async fn status_is_ok() {
        let (status, _, body) = send(request("GET", "/_status", None).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_token_is_401_with_challenge() {
        let (status, challenge, body) = send(request("GET", "/data-sets", None).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.as_deref(), Some("Bearer"));
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn unknown_token_is_401() {
        let (status, _, _) =
            send(request("GET", "/data-sets", Some("not-a-real-token")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn user_without_role_is_403() {
        let (status, _, _) =
            send(request("GET", "/data-sets", Some(SIGNIN_TOKEN)).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = send(
            request("POST", "/auth/gds/api/users/some-uid/reauth", Some(SIGNIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unrecognised_list_parameter_is_400() {
        let (status, _, body) = send(
            request("GET", "/data-sets?flibble=1", Some(ADMIN_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap_or_default().starts_with("Unrecognised parameter(s)"));
    }

    #[tokio::test]
    async fn post_needs_json_content_type() {
        let (status, _, body) = send(
            request("POST", "/data-groups", Some(ADMIN_TOKEN))
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(r#"{"name":"lpa"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["message"], "bad content type");
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (status, _, body) = send(
            request("POST", "/data-groups", Some(ADMIN_TOKEN))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "bad json");
    }

    #[tokio::test]
    async fn schema_violation_is_400() {
        let (status, _, _) = send(
            request("POST", "/data-sets", Some(ADMIN_TOKEN))
                .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
                .body(Body::from(r#"{"data_group":"LPA Group"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unrouted_method_gets_json_405() {
        let (status, _, body) =
            send(request("DELETE", "/data-groups", Some(ADMIN_TOKEN)).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let (status, _, body) = send(request("GET", "/nowhere", None).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }
}
