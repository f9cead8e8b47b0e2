use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use error::{ArenaError, Result};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        // Rank lookup and the leaderboard are public
        .route("/api/v1/rank/{xp}", get(handlers::leaderboard::get_rank))
        .route(
            "/api/v1/leaderboard",
            get(handlers::leaderboard::get_leaderboard),
        )
        .nest(
            "/api/v1",
            protected_routes().route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/quizzes/{quiz_id}/attempts",
            post(handlers::attempts::start_attempt),
        )
        .route("/attempts/{id}", get(handlers::attempts::get_attempt))
        .route(
            "/attempts/{id}/answers",
            post(handlers::attempts::submit_answer),
        )
        .route(
            "/attempts/{id}/finish",
            post(handlers::attempts::finish_attempt),
        )
        .route(
            "/attempts/{id}/abandon",
            post(handlers::attempts::abandon_attempt),
        )
        .route("/quota/{resource}", get(handlers::quota::get_quota))
        .route(
            "/quota/{resource}/consume",
            post(handlers::quota::consume_quota),
        )
        .route("/progress/me", get(handlers::leaderboard::get_my_progress))
}
