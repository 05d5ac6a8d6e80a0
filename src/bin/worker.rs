use audio_lro_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db,
    models::job::{IdentificationJobHandle, JobHandle},
    pipeline::{self, PipelineError},
    services::queue::{Delivery, JobQueue, QueueError, WorkerLease, WORKER_LEASE_KEY},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const IDLE_SLEEP_MS: u64 = 1000; // 1 second
const LEASE_TTL: Duration = Duration::from_secs(30);

/// One message taken off either queue.
enum Work {
    Transcription(Delivery<JobHandle>),
    Identification(Delivery<IdentificationJobHandle>),
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting audio LRO worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Stage 2 metrics are served from the worker's own scrape endpoint
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("WORKER_METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    pipeline::metrics::describe();
    tracing::info!(addr = %metrics_addr, "Serving worker metrics");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let state = AppState::build(&config, db_pool).expect("Failed to initialize pipelines");

    let lease = Arc::new(
        WorkerLease::new(&config.redis_url, WORKER_LEASE_KEY, LEASE_TTL)
            .expect("Failed to initialize worker lease"),
    );
    if !wait_for_lease(&lease).await {
        tracing::info!("Worker shutting down before taking the lease");
        return;
    }
    let mut lease_lost = tokio::spawn(keep_lease(lease.clone()));

    // With the lease held, anything in flight belongs to a worker that is gone.
    for queue in [&state.transcription_queue, &state.identification_queue] {
        match queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::warn!(queue = %queue.name(), recovered, "Recovered in-flight jobs")
            }
            Err(e) => tracing::error!(queue = %queue.name(), error = %e, "Failed to recover in-flight jobs"),
        }
    }

    let permits = Arc::new(Semaphore::new(config.worker_concurrency));
    let max_deliveries = config.max_deliveries;

    tracing::info!(
        concurrency = config.worker_concurrency,
        max_deliveries,
        "Worker ready, starting job processing loop"
    );

    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut lease_lost => {
                tracing::error!("Worker lease lost, stopping");
                break;
            }
        };

        match next_work(&state).await {
            Ok(Some(work)) => {
                let state = state.clone();
                tokio::spawn(process(state, work, max_deliveries, permit));
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(IDLE_SLEEP_MS)).await;
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to dequeue job, will retry");
                sleep(Duration::from_millis(IDLE_SLEEP_MS)).await;
            }
        }
    }

    // In-flight handles stay in the processing lists and are recovered by the next lease holder.
    lease_lost.abort();
    if let Err(e) = lease.release().await {
        tracing::warn!(error = %e, "Failed to release worker lease");
    }
    tracing::info!("Worker shutting down");
}

/// Block until this worker holds the lease. `false` if interrupted first.
async fn wait_for_lease(lease: &WorkerLease) -> bool {
    loop {
        match lease.acquire().await {
            Ok(true) => {
                tracing::info!("Worker lease acquired");
                return true;
            }
            Ok(false) => tracing::info!("Another worker holds the lease, waiting"),
            Err(e) => tracing::error!(error = %e, "Failed to acquire worker lease, will retry"),
        }
        tokio::select! {
            _ = sleep(lease.renew_interval()) => {}
            _ = tokio::signal::ctrl_c() => return false,
        }
    }
}

/// Renew the lease until it is lost.
async fn keep_lease(lease: Arc<WorkerLease>) {
    loop {
        sleep(lease.renew_interval()).await;
        match lease.renew().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => tracing::warn!(error = %e, "Failed to renew worker lease"),
        }
    }
}

/// Take the next message, transcriptions first. Queues of disabled
/// pipelines are left alone.
async fn next_work(state: &AppState) -> Result<Option<Work>, QueueError> {
    if state.transcription.is_some() {
        if let Some(delivery) = state.transcription_queue.dequeue().await? {
            return Ok(Some(Work::Transcription(delivery)));
        }
    }
    if state.identification.is_some() {
        if let Some(delivery) = state.identification_queue.dequeue().await? {
            return Ok(Some(Work::Identification(delivery)));
        }
    }
    Ok(None)
}

async fn process(state: AppState, work: Work, max_deliveries: u32, _permit: OwnedSemaphorePermit) {
    let outcome = match work {
        Work::Transcription(delivery) => {
            let Some(pipeline) = state.transcription.as_ref() else {
                return;
            };
            let handle = &delivery.envelope.payload;
            tracing::info!(
                job_url = %handle.poll_url,
                attempt = delivery.envelope.attempt,
                "Processing transcription job"
            );
            let result = pipeline.wait.run(handle).await.map(|transcription| {
                tracing::info!(
                    name = %transcription.name,
                    status = %transcription.status,
                    "Transcription job done"
                );
            });
            settle(&state.transcription_queue, &delivery, result, max_deliveries).await
        }
        Work::Identification(delivery) => {
            let Some(pipeline) = state.identification.as_ref() else {
                return;
            };
            let handle = &delivery.envelope.payload;
            tracing::info!(
                job_url = %handle.job.poll_url,
                recording = %handle.recording_url,
                attempt = delivery.envelope.attempt,
                "Processing identification job"
            );
            let result = pipeline.wait.run(handle).await.map(|identification| {
                tracing::info!(
                    matched = identification.is_some(),
                    "Identification job done"
                );
            });
            settle(&state.identification_queue, &delivery, result, max_deliveries).await
        }
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Failed to update queue after job");
    }
}

/// Complete, redeliver or dead-letter a delivery depending on how its job went.
async fn settle<T: Serialize + Clone>(
    queue: &JobQueue,
    delivery: &Delivery<T>,
    result: Result<(), PipelineError>,
    max_deliveries: u32,
) -> Result<(), QueueError> {
    let attempt = delivery.envelope.attempt;
    match result {
        Ok(()) => queue.complete(delivery).await,
        Err(e) if attempt >= max_deliveries => {
            tracing::error!(
                queue = %queue.name(),
                attempt,
                error = %e,
                "Job failed on its last delivery, dead-lettering"
            );
            metrics::counter!("lro_jobs_dead_lettered_total", "queue" => queue.name().to_string())
                .increment(1);
            queue.dead_letter(delivery).await
        }
        Err(e) => {
            tracing::warn!(
                queue = %queue.name(),
                attempt,
                error = %e,
                "Job failed, redelivering"
            );
            queue.redeliver(delivery).await
        }
    }
}
