use chrono::Utc;
use std::sync::Arc;

use crate::models::event::{EventKind, StorageEvent};
use crate::models::job::JobHandle;
use crate::models::transcription::{Transcription, TranscriptionStatus};
use crate::pipeline::PipelineError;
use crate::services::materializer::TranscriptionSink;
use crate::services::poller::Poller;
use crate::services::sas::SignedUrlIssuer;
use crate::services::speech::TranscriptionApi;

/// Stage 1: sign the uploaded recording's URL and start a transcription.
pub struct TranscriptionSubmitStage {
    issuer: SignedUrlIssuer,
    speech: Arc<dyn TranscriptionApi>,
}

impl TranscriptionSubmitStage {
    pub fn new(issuer: SignedUrlIssuer, speech: Arc<dyn TranscriptionApi>) -> Self {
        Self { issuer, speech }
    }

    /// Returns the handle to enqueue, or `None` for events that are not blob
    /// creations.
    pub async fn run(&self, event: &StorageEvent) -> Result<Option<JobHandle>, PipelineError> {
        let EventKind::BlobCreated { url } = event.kind() else {
            tracing::info!(event_type = %event.event_type, "Skipping event");
            return Ok(None);
        };

        let signed_url = self.issuer.sign(&url, Utc::now())?;
        let handle = self.speech.submit(&signed_url).await?;

        metrics::counter!("lro_jobs_submitted_total", "kind" => "transcription").increment(1);
        tracing::info!(
            recording = %url,
            job_url = %handle.poll_url,
            pacing_hint = ?handle.initial_pacing_secs,
            "Transcription is running"
        );
        Ok(Some(handle))
    }
}

/// Stage 2: wait for a transcription and materialize its results.
pub struct TranscriptionWaitStage {
    speech: Arc<dyn TranscriptionApi>,
    poller: Poller,
    sink: TranscriptionSink,
}

impl TranscriptionWaitStage {
    pub fn new(speech: Arc<dyn TranscriptionApi>, poller: Poller, sink: TranscriptionSink) -> Self {
        Self {
            speech,
            poller,
            sink,
        }
    }

    pub async fn run(&self, handle: &JobHandle) -> Result<Transcription, PipelineError> {
        let speech = &self.speech;
        let poll_url = handle.poll_url.as_str();

        let transcription = self
            .poller
            .wait(poll_url, handle.initial_pacing_secs, move || async move {
                speech.status(poll_url).await.map_err(PipelineError::from)
            })
            .await?;

        self.materialize(&transcription).await?;
        Ok(transcription)
    }

    /// Materialize a terminal transcription. Failed jobs are reported once
    /// with whatever results they carry.
    pub async fn materialize(&self, transcription: &Transcription) -> Result<usize, PipelineError> {
        if transcription.status == TranscriptionStatus::Failed {
            tracing::warn!(
                name = %transcription.name,
                message = ?transcription.status_message,
                "Transcription failed"
            );
        }

        let written = self.sink.materialize(transcription).await?;

        metrics::counter!(
            "lro_jobs_completed_total",
            "kind" => "transcription",
            "status" => transcription.status.to_string()
        )
        .increment(1);
        tracing::info!(
            name = %transcription.name,
            status = %transcription.status,
            artifacts = written,
            "Transcription materialized"
        );
        Ok(written)
    }
}

/// Both stages of the transcription pipeline.
pub struct TranscriptionPipeline {
    pub submit: TranscriptionSubmitStage,
    pub wait: TranscriptionWaitStage,
}
