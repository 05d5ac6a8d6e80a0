use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::services::materializer::TranscriptionOutput;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// PostgreSQL connection string (document collections)
    #[garde(length(min = 1))]
    pub database_url: String,

    /// Redis connection string for the stage queues
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// Storage account connection string (`AccountName=..;AccountKey=..`)
    #[garde(length(min = 1))]
    pub audio_storage: String,

    /// Overrides the blob endpoint derived from the connection string
    #[serde(default)]
    #[garde(url)]
    pub blob_endpoint: Option<String>,

    #[serde(default = "default_true")]
    #[garde(skip)]
    pub transcription_enabled: bool,

    /// Container receiving transcription results in `blob` output mode
    #[serde(default = "default_transcription_container")]
    #[garde(length(min = 3, max = 63))]
    pub transcription_container: String,

    #[serde(default = "default_transcription_output")]
    #[garde(skip)]
    pub transcription_output: TranscriptionOutput,

    #[serde(default = "default_transcription_collection")]
    #[garde(length(min = 1))]
    pub transcription_collection: String,

    #[serde(default = "default_speaker_collection")]
    #[garde(length(min = 1))]
    pub speaker_collection: String,

    #[garde(length(min = 1))]
    pub speech_service_key: String,

    #[garde(url)]
    pub speech_service_endpoint: String,

    #[serde(default)]
    #[garde(length(min = 1))]
    pub speaker_recognition_key: Option<String>,

    /// Speaker identification runs only when this is set
    #[serde(default)]
    #[garde(url)]
    pub speaker_recognition_endpoint: Option<String>,

    /// Shared secret for the completion webhook; the route is not mounted without it
    #[serde(default)]
    #[garde(length(min = 1))]
    pub webhook_secret: Option<String>,

    /// Address of the worker's Prometheus scrape endpoint
    #[serde(default = "default_worker_metrics_addr")]
    #[garde(length(min = 1))]
    pub worker_metrics_addr: String,

    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1, max = 1024))]
    pub worker_concurrency: usize,

    /// Deliveries of one queue message before it is dead-lettered
    #[serde(default = "default_max_deliveries")]
    #[garde(range(min = 1))]
    pub max_deliveries: u32,

    /// Upper bound on a single job's wait; unbounded when unset
    #[serde(default)]
    #[garde(range(min = 1))]
    pub max_wait_secs: Option<u64>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_transcription_container() -> String {
    "transcriptions".to_string()
}

fn default_transcription_output() -> TranscriptionOutput {
    TranscriptionOutput::Blob
}

fn default_transcription_collection() -> String {
    "transcriptions".to_string()
}

fn default_speaker_collection() -> String {
    "speakers".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_worker_concurrency() -> usize {
    16
}

fn default_max_deliveries() -> u32 {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Key and endpoint of the speaker recognition service, when both are set.
    pub fn speaker_recognition(&self) -> Option<(&str, &str)> {
        match (&self.speaker_recognition_endpoint, &self.speaker_recognition_key) {
            (Some(endpoint), Some(key)) => Some((endpoint.as_str(), key.as_str())),
            _ => None,
        }
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
