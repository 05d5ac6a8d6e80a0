use futures::future::try_join_all;
use std::sync::Arc;

use crate::models::event::{EventKind, StorageEvent};
use crate::models::identification::{Identification, MAX_PROFILES_PER_REQUEST};
use crate::models::job::{IdentificationJobHandle, JobHandle};
use crate::pipeline::PipelineError;
use crate::services::blob::BlobStore;
use crate::services::materializer::IdentificationMaterializer;
use crate::services::poller::Poller;
use crate::services::speaker::{chunk_profiles, SpeakerApi};

/// Stage 1: fan an uploaded recording out into one identification request
/// per chunk of enrolled profiles.
pub struct IdentificationSubmitStage {
    speaker: Arc<dyn SpeakerApi>,
    blobs: Arc<dyn BlobStore>,
    chunk_size: usize,
}

impl IdentificationSubmitStage {
    pub fn new(speaker: Arc<dyn SpeakerApi>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            speaker,
            blobs,
            chunk_size: MAX_PROFILES_PER_REQUEST,
        }
    }

    /// Returns one handle per chunk that produced an operation; chunks
    /// without one are dropped.
    pub async fn run(
        &self,
        event: &StorageEvent,
    ) -> Result<Vec<IdentificationJobHandle>, PipelineError> {
        let EventKind::BlobCreated { url } = event.kind() else {
            tracing::info!(event_type = %event.event_type, "Skipping event");
            return Ok(Vec::new());
        };

        let (profiles, audio) = tokio::try_join!(
            async { self.speaker.enrolled_profiles().await.map_err(PipelineError::from) },
            async { self.blobs.download(&url).await.map_err(PipelineError::from) },
        )?;

        if profiles.is_empty() {
            tracing::warn!(recording = %url, "No enrolled profiles to identify against");
            return Ok(Vec::new());
        }

        let chunks = chunk_profiles(&profiles, self.chunk_size);
        let requested = chunks.len();
        let operations = try_join_all(
            chunks
                .into_iter()
                .map(|chunk| self.speaker.identify(audio.clone(), chunk)),
        )
        .await?;

        let handles: Vec<IdentificationJobHandle> = operations
            .into_iter()
            .flatten()
            .map(|operation_url| IdentificationJobHandle {
                job: JobHandle::new(operation_url, None),
                recording_url: url.clone(),
            })
            .collect();

        metrics::counter!("lro_jobs_submitted_total", "kind" => "identification")
            .increment(handles.len() as u64);
        tracing::info!(
            recording = %url,
            profiles = profiles.len(),
            requested,
            running = handles.len(),
            "Speaker identification is running"
        );
        Ok(handles)
    }
}

/// Stage 2: wait for one identification operation and store a match.
pub struct IdentificationWaitStage {
    speaker: Arc<dyn SpeakerApi>,
    poller: Poller,
    materializer: IdentificationMaterializer,
}

impl IdentificationWaitStage {
    pub fn new(
        speaker: Arc<dyn SpeakerApi>,
        poller: Poller,
        materializer: IdentificationMaterializer,
    ) -> Self {
        Self {
            speaker,
            poller,
            materializer,
        }
    }

    /// Returns the terminal identification, or `None` when the speaker was
    /// not among the chunk's profiles.
    pub async fn run(
        &self,
        handle: &IdentificationJobHandle,
    ) -> Result<Option<Identification>, PipelineError> {
        let speaker = &self.speaker;
        let operation_url = handle.job.poll_url.as_str();

        let identification = self
            .poller
            .wait(operation_url, handle.job.initial_pacing_secs, move || async move {
                speaker.status(operation_url).await.map_err(PipelineError::from)
            })
            .await?;

        metrics::counter!(
            "lro_jobs_completed_total",
            "kind" => "identification",
            "status" => identification.status.to_string()
        )
        .increment(1);

        if identification.is_unknown_speaker() {
            tracing::info!(
                recording = %handle.recording_url,
                job_url = %operation_url,
                "Unknown speaker"
            );
            return Ok(None);
        }

        self.materializer.materialize(handle, &identification).await?;
        Ok(Some(identification))
    }
}

/// Both stages of the identification pipeline.
pub struct IdentificationPipeline {
    pub submit: IdentificationSubmitStage,
    pub wait: IdentificationWaitStage,
}
