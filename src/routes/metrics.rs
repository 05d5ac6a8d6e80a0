use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// State of the scrape endpoint.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queues: Vec<Arc<JobQueue>>,
}

/// Prometheus metrics scrape endpoint.
/// Queue depths are sampled on each scrape.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    for queue in &state.queues {
        match queue.queue_depth().await {
            Ok(depth) => {
                metrics::gauge!("lro_queue_depth", "queue" => queue.name().to_string())
                    .set(depth as f64);
            }
            Err(e) => tracing::warn!(queue = %queue.name(), error = %e, "Failed to read queue depth"),
        }
    }

    state.handle.render()
}
