use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

use crate::models::identification::{Identification, IdentificationProfile};
use crate::services::pacing::PacingHeaders;
use crate::services::poller::PollResponse;
use crate::services::speech::{RemoteRequestError, SUBSCRIPTION_KEY_HEADER};

const OPERATION_LOCATION: &str = "operation-location";

/// Remote speaker recognition operations.
#[async_trait]
pub trait SpeakerApi: Send + Sync {
    /// Ids of all profiles that finished enrollment.
    async fn enrolled_profiles(&self) -> Result<Vec<String>, SpeakerError>;

    /// Start identifying the speaker of `audio` among `profile_ids`. Returns
    /// the operation URL, or `None` when the service did not provide one.
    async fn identify(
        &self,
        audio: Bytes,
        profile_ids: &[String],
    ) -> Result<Option<String>, SpeakerError>;

    /// Fetch the current state of an identification operation.
    async fn status(&self, operation_url: &str)
        -> Result<PollResponse<Identification>, SpeakerError>;
}

/// Client for the speaker identification REST API.
pub struct SpeakerClient {
    http: Client,
    endpoint: String,
    subscription_key: String,
}

impl SpeakerClient {
    pub fn new(endpoint: &str, subscription_key: &str) -> Result<Self, SpeakerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_key: subscription_key.to_string(),
        })
    }
}

#[async_trait]
impl SpeakerApi for SpeakerClient {
    async fn enrolled_profiles(&self) -> Result<Vec<String>, SpeakerError> {
        let response = self
            .http
            .get(format!("{}/identificationProfiles", self.endpoint))
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteRequestError::from_response(response).await.into());
        }

        let profiles: Vec<IdentificationProfile> = serde_json::from_str(&response.text().await?)?;
        Ok(profiles
            .into_iter()
            .filter(IdentificationProfile::is_enrolled)
            .map(|p| p.identification_profile_id)
            .collect())
    }

    async fn identify(
        &self,
        audio: Bytes,
        profile_ids: &[String],
    ) -> Result<Option<String>, SpeakerError> {
        let ids = profile_ids.join(",");
        let response = self
            .http
            .post(format!("{}/identify", self.endpoint))
            .query(&[("identificationProfileIds", ids.as_str())])
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(audio)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteRequestError::from_response(response).await.into());
        }

        let operation_url = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        if operation_url.is_none() {
            tracing::warn!(
                profiles = %ids,
                "Identification request returned no operation-location"
            );
        }
        Ok(operation_url)
    }

    async fn status(
        &self,
        operation_url: &str,
    ) -> Result<PollResponse<Identification>, SpeakerError> {
        let response = self
            .http
            .get(operation_url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SpeakerError::Poll {
                status: response.status().as_u16(),
                url: operation_url.to_string(),
            });
        }

        let pacing = PacingHeaders::from_headers(response.headers());
        let body = response.text().await?;
        Ok(PollResponse {
            body: serde_json::from_str(&body)?,
            pacing,
        })
    }
}

/// Split the profile set into batches no larger than `size`; the last batch
/// may be shorter.
pub fn chunk_profiles(profile_ids: &[String], size: usize) -> Vec<&[String]> {
    profile_ids.chunks(size.max(1)).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum SpeakerError {
    #[error("Speaker recognition request rejected: {0}")]
    Remote(#[from] RemoteRequestError),

    #[error("Status request to {url} returned HTTP {status}")]
    Poll { status: u16, url: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse speaker recognition response: {0}")]
    Parse(#[from] serde_json::Error),
}
