use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::documents::{DocumentStore, PgDocumentStore};
use crate::pipeline::identification::{
    IdentificationPipeline, IdentificationSubmitStage, IdentificationWaitStage,
};
use crate::pipeline::transcription::{
    TranscriptionPipeline, TranscriptionSubmitStage, TranscriptionWaitStage,
};
use crate::services::{
    blob::{BlobClient, BlobError, BlobStore},
    materializer::{
        BlobMaterializer, DocumentMaterializer, IdentificationMaterializer, TranscriptionOutput,
        TranscriptionSink,
    },
    poller::Poller,
    queue::{JobQueue, QueueError, IDENTIFICATIONS_QUEUE, TRANSCRIPTIONS_QUEUE},
    sas::{SasError, SignedUrlIssuer, StorageAccount},
    speaker::{SpeakerClient, SpeakerError},
    speech::{SpeechClient, SpeechError, TranscriptionApi},
    webhook::{WebhookError, WebhookVerifier},
};

/// Shared state of the server and the worker. Disabled pipelines are `None`.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub transcription_queue: Arc<JobQueue>,
    pub identification_queue: Arc<JobQueue>,
    pub transcription: Option<Arc<TranscriptionPipeline>>,
    pub identification: Option<Arc<IdentificationPipeline>>,
    pub webhook: Option<Arc<WebhookVerifier>>,
}

impl AppState {
    /// Construct every client and stage from configuration.
    pub fn build(config: &AppConfig, db: PgPool) -> Result<Self, StartupError> {
        let mut account = StorageAccount::from_connection_string(&config.audio_storage)?;
        if let Some(endpoint) = &config.blob_endpoint {
            account.blob_endpoint = endpoint.trim_end_matches('/').to_string();
        }

        let blobs: Arc<dyn BlobStore> = Arc::new(BlobClient::new(account.clone())?);
        let documents: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(db.clone()));
        let poller = Poller::with_max_wait(config.max_wait());

        let transcription = if config.transcription_enabled {
            let speech: Arc<dyn TranscriptionApi> = Arc::new(SpeechClient::new(
                &config.speech_service_endpoint,
                &config.speech_service_key,
            )?);
            let sink = match config.transcription_output {
                TranscriptionOutput::Blob => TranscriptionSink::Blob(BlobMaterializer::new(
                    blobs.clone(),
                    &config.transcription_container,
                )),
                TranscriptionOutput::Documents => {
                    TranscriptionSink::Documents(DocumentMaterializer::new(
                        documents.clone(),
                        speech.clone(),
                        &config.transcription_collection,
                    ))
                }
            };
            Some(Arc::new(TranscriptionPipeline {
                submit: TranscriptionSubmitStage::new(
                    SignedUrlIssuer::new(account.credential.clone()),
                    speech.clone(),
                ),
                wait: TranscriptionWaitStage::new(speech, poller.clone(), sink),
            }))
        } else {
            None
        };

        let identification = match config.speaker_recognition() {
            Some((endpoint, key)) => {
                let speaker = Arc::new(SpeakerClient::new(endpoint, key)?);
                Some(Arc::new(IdentificationPipeline {
                    submit: IdentificationSubmitStage::new(speaker.clone(), blobs.clone()),
                    wait: IdentificationWaitStage::new(
                        speaker,
                        poller,
                        IdentificationMaterializer::new(documents, &config.speaker_collection),
                    ),
                }))
            }
            None => None,
        };

        let webhook = config
            .webhook_secret
            .as_deref()
            .map(WebhookVerifier::new)
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            db,
            transcription_queue: Arc::new(JobQueue::new(&config.redis_url, TRANSCRIPTIONS_QUEUE)?),
            identification_queue: Arc::new(JobQueue::new(
                &config.redis_url,
                IDENTIFICATIONS_QUEUE,
            )?),
            transcription,
            identification,
            webhook,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid storage settings: {0}")]
    Storage(#[from] SasError),

    #[error("Failed to initialize blob client: {0}")]
    Blob(#[from] BlobError),

    #[error("Failed to initialize speech client: {0}")]
    Speech(#[from] SpeechError),

    #[error("Failed to initialize speaker client: {0}")]
    Speaker(#[from] SpeakerError),

    #[error("Failed to initialize job queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid webhook settings: {0}")]
    Webhook(#[from] WebhookError),
}
