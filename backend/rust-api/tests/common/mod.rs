#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use quizarena_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::AppState,
    utils::time::ManualClock,
};

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: "integration-test-secret".to_string(),
        metrics_auth: "metrics:secret".to_string(),
        ..Config::default()
    }
}

/// In-memory app on a manual clock; no MongoDB or Redis required.
pub fn create_test_app() -> TestApp {
    create_test_app_with(test_config())
}

pub fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = Arc::new(AppState::in_memory(config, clock.clone()).unwrap());
    TestApp {
        router: create_router(state.clone()),
        state,
        clock,
    }
}

impl TestApp {
    pub fn token(&self, user_id: &str, name: &str) -> String {
        JwtService::new(&self.state.config.jwt_secret)
            .generate_token(&JwtClaims::new(user_id, Some(name.to_string()), 3600))
            .unwrap()
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request("GET", uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request("POST", uri, Some(token), body).await
    }

    pub async fn start(&self, token: &str, quiz_id: &str) -> (StatusCode, Value) {
        self.post(&format!("/api/v1/quizzes/{}/attempts", quiz_id), token, None)
            .await
    }
}
