//! Wait loop for remote long-running operations.
//!
//! A job is `Waiting` until a poll returns a terminal status. Every poll is
//! preceded by a sleep whose length the previous response dictated (see
//! [`crate::services::pacing`]). The loop owns its job for the whole wait;
//! dropping the future cancels it.

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::services::pacing::{self, PacingHeaders};

/// Status payload of a remote job.
pub trait LroStatus {
    fn is_terminal(&self) -> bool;
    fn status_label(&self) -> String;
}

/// Decoded status body plus the pacing headers that came with it.
#[derive(Debug, Clone)]
pub struct PollResponse<T> {
    pub body: T,
    pub pacing: PacingHeaders,
}

#[derive(Debug, thiserror::Error)]
#[error("gave up waiting for {job_url} after {waited:?}")]
pub struct PollTimeout {
    pub job_url: String,
    pub waited: Duration,
}

enum PollState<T> {
    Waiting { delay: Duration, polls: u32 },
    Terminal(T),
}

/// Polls one job until it reaches a terminal status.
#[derive(Debug, Clone, Default)]
pub struct Poller {
    max_wait: Option<Duration>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up with [`PollTimeout`] once the next sleep would pass `max_wait`.
    pub fn with_max_wait(max_wait: Option<Duration>) -> Self {
        Self { max_wait }
    }

    /// Wait for the job at `job_url`, calling `fetch` for each status request.
    ///
    /// Terminal payloads are returned as-is whether the job succeeded or
    /// failed. Errors from `fetch` end the wait immediately.
    pub async fn wait<T, E, F, Fut>(
        &self,
        job_url: &str,
        initial_pacing_secs: Option<f64>,
        mut fetch: F,
    ) -> Result<T, E>
    where
        T: LroStatus,
        E: From<PollTimeout>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollResponse<T>, E>>,
    {
        let started = Instant::now();
        let mut state: PollState<T> = PollState::Waiting {
            delay: pacing::initial_delay(initial_pacing_secs),
            polls: 0,
        };

        loop {
            state = match state {
                PollState::Terminal(body) => {
                    let waited = started.elapsed();
                    metrics::histogram!("lro_wait_seconds").record(waited.as_secs_f64());
                    tracing::info!(
                        job_url = %job_url,
                        status = %body.status_label(),
                        waited_secs = waited.as_secs(),
                        "Job reached terminal status"
                    );
                    return Ok(body);
                }
                PollState::Waiting { delay, polls } => {
                    if let Some(max_wait) = self.max_wait {
                        let wake_at = started.elapsed().checked_add(delay);
                        if wake_at.map_or(true, |at| at > max_wait) {
                            return Err(PollTimeout {
                                job_url: job_url.to_string(),
                                waited: started.elapsed(),
                            }
                            .into());
                        }
                    }

                    tracing::info!(
                        job_url = %job_url,
                        delay_secs = delay.as_secs_f64(),
                        "Waiting before polling job"
                    );
                    sleep(delay).await;

                    let response = fetch().await?;
                    metrics::counter!("lro_polls_total").increment(1);

                    if response.body.is_terminal() {
                        PollState::Terminal(response.body)
                    } else {
                        let delay = response.pacing.next_delay(Utc::now());
                        tracing::debug!(
                            job_url = %job_url,
                            status = %response.body.status_label(),
                            polls = polls + 1,
                            quota_remaining = ?response.pacing.quota_remaining,
                            "Job still running"
                        );
                        PollState::Waiting {
                            delay,
                            polls: polls + 1,
                        }
                    }
                }
            };
        }
    }
}
