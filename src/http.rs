//! Core HTTP endpoints.
//!
//! Sinks add their own routes via `Sink::build_routes()`.

use axum::{extract::State, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::PipelineProgress;

#[derive(Clone)]
pub struct HttpState {
    pub version: String,
    pub startup_time: i64,
    pub progress: Arc<PipelineProgress>,
}

impl HttpState {
    pub fn new(progress: Arc<PipelineProgress>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            startup_time: chrono::Utc::now().timestamp(),
            progress,
        }
    }
}

/// Health check response.
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub logs_processed: u64,
    pub last_block: u64,
    pub failed_batches: u64,
    /// True once the log source is exhausted
    pub caught_up: bool,
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> Json<HealthResponse> {
    let now = chrono::Utc::now().timestamp();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: now - state.startup_time,
        logs_processed: state.progress.logs(),
        last_block: state.progress.last_block(),
        failed_batches: state.progress.failed_batches(),
        caught_up: state.progress.is_finished(),
    })
}

/// Create the core HTTP router with basic endpoints.
pub fn create_http_router(progress: Arc<PipelineProgress>) -> Router {
    let state = Arc::new(HttpState::new(progress));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_http_router(Arc::new(PipelineProgress::new()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health_response: HealthResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(health_response.status, "healthy");
        assert!(health_response.uptime_seconds >= 0);
        assert_eq!(health_response.logs_processed, 0);
        assert!(!health_response.caught_up);
    }
}
