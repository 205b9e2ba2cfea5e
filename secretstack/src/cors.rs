//! Cross-origin request handling
//!
//! Browsers may talk to the emulator directly, so origins are checked against
//! an allowlist before a request reaches the handlers, and allowed origins get
//! the usual `Access-Control-*` response headers.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use url::Url;

use crate::config::ServerConfig;

/// Request headers a browser client may send
pub const CORS_ALLOWED_HEADERS: &[&str] = &[
    "authorization",
    "cache-control",
    "content-length",
    "content-md5",
    "content-type",
    "etag",
    "location",
    "x-amz-acl",
    "x-amz-content-sha256",
    "x-amz-date",
    "x-amz-request-id",
    "x-amz-security-token",
    "x-amz-tagging",
    "x-amz-target",
    "x-amz-user-agent",
    "x-amz-version-id",
    "x-amzn-requestid",
    "amz-sdk-invocation-id",
    "amz-sdk-request",
];

pub const CORS_ALLOWED_METHODS: [Method; 7] = [
    Method::HEAD,
    Method::GET,
    Method::PUT,
    Method::POST,
    Method::DELETE,
    Method::OPTIONS,
    Method::PATCH,
];

/// Response headers readable from browser scripts
pub const CORS_EXPOSE_HEADERS: &[&str] = &["etag", "x-amz-version-id"];

/// Allows every origin when present in the allowlist
const ANY_ORIGIN: &str = "*";

/// Origin allowlist plus the headers advertised to allowed origins
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    /// Add `Access-Control-*` headers to responses
    pub headers_enabled: bool,
    /// Reject requests from origins outside the allowlist
    pub checks_enabled: bool,
    allowed_origins: Vec<String>,
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
}

impl CorsPolicy {
    /// Default policy for a server listening on `port`
    pub fn new(port: u16) -> Self {
        let allowed_origins = vec![
            format!("http://localhost:{}", port),
            format!("https://localhost:{}", port),
            format!("http://127.0.0.1:{}", port),
            format!("https://127.0.0.1:{}", port),
            "https://localhost".to_string(),
            "file://".to_string(),
        ];

        Self {
            headers_enabled: true,
            checks_enabled: true,
            allowed_origins,
            allowed_headers: CORS_ALLOWED_HEADERS.iter().map(|h| h.to_string()).collect(),
            expose_headers: CORS_EXPOSE_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        let mut policy = Self::new(server.port)
            .with_origins(server.cors_allowed_origins.iter().cloned())
            .with_allowed_headers(server.cors_allowed_headers.iter().cloned())
            .with_expose_headers(server.cors_expose_headers.iter().cloned());
        policy.headers_enabled = server.cors;
        policy.checks_enabled = server.cors_checks;
        policy
    }

    pub fn with_origins(mut self, origins: impl IntoIterator<Item = String>) -> Self {
        extend_unique(&mut self.allowed_origins, origins);
        self
    }

    pub fn with_allowed_headers(mut self, headers: impl IntoIterator<Item = String>) -> Self {
        extend_unique(&mut self.allowed_headers, headers);
        self
    }

    pub fn with_expose_headers(mut self, headers: impl IntoIterator<Item = String>) -> Self {
        extend_unique(&mut self.expose_headers, headers);
        self
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == ANY_ORIGIN || allowed == origin)
    }

    /// Whether a request may proceed, judged by `Origin` or else `Referer`.
    /// Requests carrying neither header are not cross-origin and always pass.
    pub fn is_request_allowed(&self, headers: &HeaderMap) -> bool {
        if let Some(origin) = headers.get(header::ORIGIN) {
            return origin
                .to_str()
                .map(|origin| self.is_origin_allowed(origin))
                .unwrap_or(false);
        }

        if let Some(referer) = headers.get(header::REFERER) {
            return referer
                .to_str()
                .ok()
                .and_then(referer_origin)
                .map(|origin| self.is_origin_allowed(&origin))
                .unwrap_or(false);
        }

        true
    }

    /// Response header layer for allowed origins
    pub fn layer(&self) -> CorsLayer {
        let allow_origin = if self.allowed_origins.iter().any(|o| o == ANY_ORIGIN) {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.allowed_origins
                    .iter()
                    .filter_map(|origin| HeaderValue::from_str(origin).ok()),
            )
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(CORS_ALLOWED_METHODS.to_vec())
            .allow_headers(header_names(&self.allowed_headers))
            .expose_headers(header_names(&self.expose_headers))
    }
}

/// `scheme://host[:port]` of a referer URL
fn referer_origin(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let host = url.host_str().unwrap_or_default();
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

fn header_names(names: &[String]) -> Vec<HeaderName> {
    names
        .iter()
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}

fn extend_unique(target: &mut Vec<String>, values: impl IntoIterator<Item = String>) {
    for value in values {
        let value = value.trim().to_string();
        if !value.is_empty() && !target.contains(&value) {
            target.push(value);
        }
    }
}

/// Middleware rejecting requests from origins outside the allowlist
pub async fn enforce_origin(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    if policy.is_request_allowed(request.headers()) {
        return next.run(request).await;
    }

    let origin = request
        .headers()
        .get(header::ORIGIN)
        .or_else(|| request.headers().get(header::REFERER))
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    info!(
        origin = %origin,
        "Blocked CORS request from forbidden origin {}",
        origin
    );
    StatusCode::FORBIDDEN.into_response()
}
