use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pipelines: EnabledPipelines,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct EnabledPipelines {
    pub transcription: bool,
    pub identification: bool,
    pub webhook: bool,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_result<E>(result: Result<(), E>, start: std::time::Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health — dependency status of the document store and the queue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = std::time::Instant::now();
    let db_result = sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map(|_| ());
    let database = ComponentHealth::from_result(db_result, db_start);

    // Both queues share one Redis server.
    let redis_start = std::time::Instant::now();
    let redis = ComponentHealth::from_result(
        state.transcription_queue.health_check().await,
        redis_start,
    );

    let all_healthy = database.is_ok() && redis.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipelines: EnabledPipelines {
            transcription: state.transcription.is_some(),
            identification: state.identification.is_some(),
            webhook: state.webhook.is_some(),
        },
        checks: HealthChecks { database, redis },
    };

    (status_code, Json(response))
}
