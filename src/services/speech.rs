use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, Response, Url};
use std::time::Duration;

use crate::models::job::JobHandle;
use crate::models::transcription::{RemoteErrorBody, Transcription, TranscriptionRequest};
use crate::services::pacing::{self, PacingHeaders};
use crate::services::poller::PollResponse;

/// Header carrying the cognitive services subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Remote transcription service operations.
#[async_trait]
pub trait TranscriptionApi: Send + Sync {
    /// Start a transcription of the recording at `audio_url`.
    async fn submit(&self, audio_url: &str) -> Result<JobHandle, SpeechError>;

    /// Fetch the current state of a transcription job.
    async fn status(&self, poll_url: &str) -> Result<PollResponse<Transcription>, SpeechError>;

    /// Fetch the JSON body of one named result.
    async fn fetch_result(&self, result_url: &str) -> Result<serde_json::Value, SpeechError>;
}

/// Client for the batch transcription REST API.
pub struct SpeechClient {
    http: Client,
    endpoint: String,
    subscription_key: String,
}

impl SpeechClient {
    pub fn new(endpoint: &str, subscription_key: &str) -> Result<Self, SpeechError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_key: subscription_key.to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<Response, SpeechError> {
        let response = self
            .http
            .get(url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SpeechError::Poll {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl TranscriptionApi for SpeechClient {
    async fn submit(&self, audio_url: &str) -> Result<JobHandle, SpeechError> {
        let name = job_name_from_url(audio_url)
            .ok_or_else(|| SpeechError::InvalidUrl(audio_url.to_string()))?;
        let request = TranscriptionRequest::new(name, audio_url.to_string());

        let response = self
            .http
            .post(format!("{}/transcriptions", self.endpoint))
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteRequestError::from_response(response).await.into());
        }

        handle_from_headers(response.headers(), LOCATION.as_str())
            .ok_or(SpeechError::MissingLocation)
    }

    async fn status(&self, poll_url: &str) -> Result<PollResponse<Transcription>, SpeechError> {
        let response = self.get(poll_url).await?;
        let pacing = PacingHeaders::from_headers(response.headers());
        let body = response.text().await?;

        Ok(PollResponse {
            body: serde_json::from_str(&body)?,
            pacing,
        })
    }

    async fn fetch_result(&self, result_url: &str) -> Result<serde_json::Value, SpeechError> {
        let body = self.get(result_url).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Build a job handle from the poll location header and the optional
/// `retry-after` hint of a submission response.
pub fn handle_from_headers(headers: &HeaderMap, location_header: &str) -> Option<JobHandle> {
    let poll_url = headers
        .get(location_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())?;

    let pacing_hint = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| pacing::parse_retry_after(v, chrono::Utc::now()));

    Some(JobHandle::new(poll_url, pacing_hint))
}

/// Job name for a recording: its file name without the extension.
pub fn job_name_from_url(audio_url: &str) -> Option<String> {
    let url = Url::parse(audio_url).ok()?;
    let file = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    Some(stem.to_string())
}

/// A remote service rejected a request.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[HTTP {status}] {code}: {message}")]
pub struct RemoteRequestError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl RemoteRequestError {
    /// Read the structured error body of a rejected request, falling back to
    /// the raw body text.
    pub async fn from_response(response: Response) -> Self {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        match serde_json::from_str::<RemoteErrorBody>(&text) {
            Ok(body) if body.code.is_some() || body.message.is_some() => Self {
                status,
                code: body.code.unwrap_or_else(|| "Unknown".to_string()),
                message: body.message.unwrap_or_default(),
            },
            _ => Self {
                status,
                code: "Unknown".to_string(),
                message: text,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Transcription request rejected: {0}")]
    Remote(#[from] RemoteRequestError),

    #[error("No location header present in transcription response")]
    MissingLocation,

    #[error("Status request to {url} returned HTTP {status}")]
    Poll { status: u16, url: String },

    #[error("Invalid recording URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse transcription service response: {0}")]
    Parse(#[from] serde_json::Error),
}
