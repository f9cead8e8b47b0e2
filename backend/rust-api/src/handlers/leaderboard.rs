use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::ApiError;
use crate::{
    middlewares::auth::JwtClaims,
    models::progress::{LeaderboardQuery, LeaderboardResponse},
    models::RankProgress,
    services::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyProgressResponse {
    pub user_id: String,
    pub name: String,
    pub xp: u64,
    pub rank: RankProgress,
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let page = state.progress.leaderboard(&query).await?;
    Ok(Json(page))
}

pub async fn get_rank(
    State(state): State<Arc<AppState>>,
    Path(xp): Path<u64>,
) -> Json<RankProgress> {
    Json(state.progress.rank_for(xp))
}

pub async fn get_my_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<MyProgressResponse>, ApiError> {
    let (progress, rank) = state
        .progress
        .progress_for(&claims.sub, claims.display_name())
        .await?;
    Ok(Json(MyProgressResponse {
        user_id: progress.user_id,
        name: progress.name,
        xp: progress.xp,
        rank,
    }))
}
