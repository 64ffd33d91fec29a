//! HTTP surface probed by the orchestrator

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

#[derive(Debug)]
pub struct HttpState {
    pub service_name: String,
    pub started: Instant,
    pub start_time: DateTime<Utc>,
}

impl HttpState {
    pub fn new(service_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            service_name: service_name.into(),
            started: Instant::now(),
            start_time: Utc::now(),
        })
    }
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(info))
        .with_state(state)
}

async fn health(State(state): State<Arc<HttpState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.service_name,
        "uptime": state.started.elapsed().as_secs_f64(),
    }))
}

async fn info(State(state): State<Arc<HttpState>>) -> Json<Value> {
    Json(json!({
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "start_time": state.start_time.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn health_reports_service_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(HttpState::new("vin-decoder")))
                .await
                .ok();
        });

        let body: Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "vin-decoder");
    }
}
