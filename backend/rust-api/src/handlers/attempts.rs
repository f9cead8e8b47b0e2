use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::{
    error::ArenaError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{AttemptSession, FinishAttemptRequest, StartAttemptResponse, SubmitAnswerRequest},
    services::AppState,
};

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, created) = state
        .attempt_manager
        .start_or_resume(&claims.sub, &quiz_id)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(StartAttemptResponse { created, session })))
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<AttemptSession>, ApiError> {
    let session = state
        .attempt_manager
        .get_owned(&claims.sub, &session_id)
        .await?;
    Ok(Json(session))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<Json<AttemptSession>, ApiError> {
    req.validate()?;
    let session = state
        .attempt_manager
        .submit_answer(&claims.sub, &session_id, req.answer)
        .await?;
    Ok(Json(session))
}

/// The body is optional; an empty one finishes with the answers already stored.
pub async fn finish_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<AttemptSession>, ApiError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        FinishAttemptRequest::default()
    } else {
        serde_json::from_slice::<FinishAttemptRequest>(&body).map_err(|e| {
            ArenaError::validation(format!("Failed to parse JSON request body: {}", e))
        })?
    };
    req.validate()?;

    let session = state
        .attempt_manager
        .finish(
            &claims.sub,
            claims.display_name(),
            &session_id,
            req.answers.unwrap_or_default(),
        )
        .await?;
    Ok(Json(session))
}

pub async fn abandon_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<AttemptSession>, ApiError> {
    let session = state
        .attempt_manager
        .abandon(&claims.sub, &session_id)
        .await?;
    Ok(Json(session))
}
