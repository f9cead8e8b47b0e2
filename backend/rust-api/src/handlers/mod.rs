use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ArenaError;
use crate::metrics;
use crate::services::AppState;

pub mod attempts;
pub mod leaderboard;
pub mod quota;

/// JSON error body `{message, status}` for every domain error.
#[derive(Debug)]
pub struct ApiError(pub ArenaError);

impl From<ArenaError> for ApiError {
    fn from(err: ArenaError) -> Self {
        ApiError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ArenaError::NotFound(_) => StatusCode::NOT_FOUND,
            ArenaError::Conflict { .. }
            | ArenaError::InvalidState { .. }
            | ArenaError::InvalidTransition(_) => StatusCode::CONFLICT,
            ArenaError::Validation(_) => StatusCode::BAD_REQUEST,
            ArenaError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ArenaError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let mut body = json!({ "status": status.as_u16() });
        match &self.0 {
            ArenaError::StorageUnavailable(detail) => {
                tracing::error!(error = %detail, "Storage unavailable");
                body["message"] = json!("Service temporarily unavailable, retry later");
            }
            ArenaError::QuotaExceeded { reset_at, .. } => {
                body["message"] = json!(self.0.to_string());
                body["resetAt"] = json!(reset_at);
            }
            other => body["message"] = json!(other.to_string()),
        }

        (status, Json(body)).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = serde_json::Map::new();
    let mut all_healthy = true;

    let checks = [
        ("attempts", probe(state.attempts.ping()).await),
        ("quotas", probe(state.quota_ledger.ping()).await),
        ("progress", probe(state.progress_store.ping()).await),
    ];
    for (name, result) in checks {
        if result.get("status").and_then(|v| v.as_str()) != Some("healthy") {
            all_healthy = false;
        }
        dependencies.insert(name.to_string(), json!(result));
    }

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if all_healthy { "healthy" } else { "degraded" },
            "service": "quizarena-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies
        })),
    )
}

async fn probe<F>(ping: F) -> serde_json::Map<String, serde_json::Value>
where
    F: Future<Output = crate::error::Result<()>>,
{
    let mut result = serde_json::Map::new();
    match tokio::time::timeout(Duration::from_secs(1), ping).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(e.to_string()));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("timeout after 1s"));
        }
    }
    result
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// HTTP Basic auth for /metrics against `metrics_auth` (`user:password`).
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if credentials != state.config.metrics_auth {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
