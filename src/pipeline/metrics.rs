//! Metric names shared by the server and the worker.

/// Register descriptions for every pipeline metric with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        "lro_jobs_submitted_total",
        "Remote jobs submitted, by kind"
    );
    metrics::describe_counter!(
        "lro_jobs_completed_total",
        "Remote jobs that reached a terminal status, by kind and status"
    );
    metrics::describe_counter!(
        "lro_artifacts_materialized_total",
        "Result artifacts written, by target"
    );
    metrics::describe_counter!("lro_polls_total", "Status polls issued against remote jobs");
    metrics::describe_histogram!(
        "lro_wait_seconds",
        metrics::Unit::Seconds,
        "Time from the first wait to a terminal status"
    );
    metrics::describe_counter!(
        "lro_jobs_dead_lettered_total",
        "Queue messages given up on after their last delivery, by queue"
    );
    metrics::describe_gauge!(
        "lro_queue_depth",
        "Current number of pending handles per queue"
    );
}
