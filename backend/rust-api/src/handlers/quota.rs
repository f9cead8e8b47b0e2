use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::{
    error::ArenaError,
    middlewares::auth::JwtClaims,
    models::quota::{ConsumeQuotaQuery, QuotaStatus},
    services::AppState,
};

pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(resource): Path<String>,
) -> Result<Json<QuotaStatus>, ApiError> {
    let status = state.quota_ledger.peek(&claims.sub, &resource).await?;
    Ok(Json(status))
}

/// 200 with the status when granted, 429 with the same body when denied,
/// 503 when the ledger could not reach its store.
pub async fn consume_quota(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(resource): Path<String>,
    Query(query): Query<ConsumeQuotaQuery>,
) -> Result<Response, ApiError> {
    let status = state
        .quota_ledger
        .check_and_consume(&claims.sub, &resource, query.cost)
        .await?;

    if status.unavailable {
        return Err(ArenaError::StorageUnavailable(format!("quota store for {}", resource)).into());
    }
    let code = if status.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    Ok((code, Json(status)).into_response())
}
