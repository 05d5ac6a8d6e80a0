use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

use crate::services::poller::LroStatus;

pub const DEFAULT_LOCALE: &str = "en-US";

/// Status reported by the transcription service. Values it adds later are
/// treated as still running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum TranscriptionStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Body of `POST /transcriptions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionRequest {
    pub name: String,
    pub description: Option<String>,
    pub recordings_url: String,
    pub locale: String,
    pub models: Option<Vec<serde_json::Value>>,
    pub properties: TranscriptionProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptionProperties {
    pub add_diarization: bool,
    pub add_sentiment: bool,
    pub add_word_level_timestamps: bool,
    pub profanity_filter_mode: String,
    pub punctuation_mode: String,
}

impl TranscriptionRequest {
    /// Fixed job settings: no diarization, sentiment or word timestamps,
    /// unfiltered profanity and automatic punctuation.
    pub fn new(name: String, recordings_url: String) -> Self {
        Self {
            name,
            description: None,
            recordings_url,
            locale: DEFAULT_LOCALE.to_string(),
            models: None,
            properties: TranscriptionProperties {
                add_diarization: false,
                add_sentiment: false,
                add_word_level_timestamps: false,
                profanity_filter_mode: "None".to_string(),
                punctuation_mode: "Automatic".to_string(),
            },
        }
    }
}

/// Transcription job as returned by the status endpoint. Fields this crate
/// does not use are kept in `extra` so the payload passes through unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    #[serde(default)]
    pub name: String,

    pub status: TranscriptionStatus,

    #[serde(default)]
    pub created_date_time: Option<String>,

    #[serde(default)]
    pub recordings_url: Option<String>,

    #[serde(default)]
    pub results_urls: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LroStatus for Transcription {
    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TranscriptionStatus::Succeeded | TranscriptionStatus::Failed
        )
    }

    fn status_label(&self) -> String {
        self.status.to_string()
    }
}

/// Structured error body returned when the service rejects a request.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
