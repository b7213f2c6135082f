use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;

/// One year, for responses that only change when the underlying record is purged
pub const LONG_CACHE_SECS: u32 = 86400 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoCache,
    MaxAge(u32),
}

impl CachePolicy {
    fn header_value(&self) -> String {
        match self {
            CachePolicy::NoCache => "no-cache, no-store, must-revalidate, max-age=0".to_string(),
            CachePolicy::MaxAge(secs) => format!("max-age={}", secs),
        }
    }
}

/// JSON response with the caching headers every endpoint sets explicitly
#[derive(Debug)]
pub struct ApiResponse {
    pub body: Value,
    pub status: StatusCode,
    pub cache: CachePolicy,
    pub vary_authorization: bool,
    pub allow_any_origin: bool,
}

impl ApiResponse {
    /// 200, never cached, varies on the caller's token
    pub fn json(body: Value) -> Self {
        Self {
            body,
            status: StatusCode::OK,
            cache: CachePolicy::NoCache,
            vary_authorization: true,
            allow_any_origin: false,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn max_age(self, secs: u32) -> Self {
        self.cache(CachePolicy::MaxAge(secs))
    }

    /// Readable from any origin and not keyed on `Authorization`
    pub fn public(mut self) -> Self {
        self.allow_any_origin = true;
        self.vary_authorization = false;
        self
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        let headers = response.headers_mut();

        if let Ok(value) = HeaderValue::from_str(&self.cache.header_value()) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if self.cache == CachePolicy::NoCache {
            headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        }
        if self.vary_authorization {
            headers.insert(header::VARY, HeaderValue::from_static("Authorization"));
        }
        if self.allow_any_origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        response
    }
}

pub type ApiResult = Result<ApiResponse, crate::error::ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn default_response_is_uncached_and_varies_on_token() {
        let response = ApiResponse::json(json!({ "status": "ok" })).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, header::CACHE_CONTROL).unwrap_or_default().contains("no-cache"));
        assert_eq!(header(&response, header::VARY), Some("Authorization"));
        assert_eq!(header(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), None);
    }

    #[test]
    fn public_cached_response() {
        let response = ApiResponse::json(json!([])).max_age(300).public().into_response();
        assert_eq!(header(&response, header::CACHE_CONTROL), Some("max-age=300"));
        assert_eq!(header(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));
        assert_eq!(header(&response, header::VARY), None);
    }
}
