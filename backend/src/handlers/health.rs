use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::services::pipeline::Readiness;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_since: Option<DateTime<Utc>>,
    pub max_parallel_generations: usize,
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = START_TIME
        .get()
        .map(|s| s.elapsed().as_secs_f64())
        .unwrap_or(0.0);

    Json(match &state.readiness {
        Readiness::Ready { pipeline, since } => HealthResponse {
            status: "ready".to_string(),
            uptime,
            reason: None,
            ready_since: Some(*since),
            max_parallel_generations: pipeline.max_parallel_generations(),
        },
        Readiness::NotReady { reason } => HealthResponse {
            status: "not_ready".to_string(),
            uptime,
            reason: Some(reason.clone()),
            ready_since: None,
            max_parallel_generations: state.config.max_parallel_generations,
        },
    })
}

pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "apiVersion": "v1",
        "buildHash": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::AppConfig;
    use crate::services::fakes;

    #[tokio::test]
    async fn reports_readiness() {
        let config = AppConfig {
            max_parallel_generations: 3,
            ..AppConfig::default()
        };
        let h = fakes::harness(&config);
        let state = Arc::new(AppState {
            config: Arc::new(config.clone()),
            readiness: Readiness::Ready {
                pipeline: h.pipeline.clone(),
                since: Utc::now(),
            },
        });
        let Json(body) = health_check(State(state)).await;
        assert_eq!(body.status, "ready");
        assert_eq!(body.max_parallel_generations, 3);
        assert!(body.reason.is_none());

        let state = Arc::new(AppState {
            config: Arc::new(config),
            readiness: Readiness::NotReady {
                reason: "missing model files".to_string(),
            },
        });
        let Json(body) = health_check(State(state)).await;
        assert_eq!(body.status, "not_ready");
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["reason"], "missing model files");
        assert!(v.get("readySince").is_none());
    }
}
