//! HTTP router for SecretStack

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

use secretstack_core::{AwsError, RequestId};
use secretstack_secretsmanager::{error_response, handle_request, SecretsManagerState};

use crate::cors::{enforce_origin, CorsPolicy};

/// Create the main application router
pub fn create_router(state: Arc<SecretsManagerState>, cors: CorsPolicy) -> Router {
    let router = Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .route("/_secretstack/health", get(health_check))
        // JSON 1.1 protocol, dispatched on X-Amz-Target
        .route("/", post(handle_request))
        .with_state(state);

    with_layers(router, cors)
}

/// Wrap `router` in the CORS, panic and tracing layers, innermost first
fn with_layers(mut router: Router, cors: CorsPolicy) -> Router {
    if cors.headers_enabled {
        router = router.layer(cors.layer());
    }
    if cors.checks_enabled {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(cors),
            enforce_origin,
        ));
    }

    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "running", "services": ["secretsmanager"]}))
}

/// Render a handler panic as an `InternalServiceError` instead of dropping the connection
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else {
        "unknown panic"
    };
    error!(panic = %detail, "Request handler panicked");

    let error = AwsError::internal(format!("exception while processing request: {}", detail));
    error_response(&RequestId::new(), &error)
}
