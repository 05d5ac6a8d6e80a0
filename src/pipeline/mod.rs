//! Pipeline stages.
//!
//! Stage 1 turns a storage event into job handles for the queue; stage 2
//! takes one handle off the queue, waits for the remote job and materializes
//! its result. The queue between them is what makes each stage retryable on
//! its own, so the two are never run as a single call.

pub mod identification;
pub mod metrics;
pub mod transcription;

use crate::services::blob::BlobError;
use crate::services::materializer::MaterializeError;
use crate::services::poller::PollTimeout;
use crate::services::sas::SasError;
use crate::services::speaker::SpeakerError;
use crate::services::speech::SpeechError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to sign recording URL: {0}")]
    Sas(#[from] SasError),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error(transparent)]
    Speaker(#[from] SpeakerError),

    #[error("Failed to read recording: {0}")]
    Blob(#[from] BlobError),

    #[error("Failed to materialize result: {0}")]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Timeout(#[from] PollTimeout),
}

impl PipelineError {
    /// Whether the failure came from a remote service rather than from this
    /// process or its own storage.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PipelineError::Speech(_) | PipelineError::Speaker(_) | PipelineError::Timeout(_)
        )
    }
}
