use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::time::Duration;

use crate::services::sas::{SharedKeyCredential, StorageAccount};

const STORAGE_API_VERSION: &str = "2018-11-09";
const COPY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Blob storage operations the pipeline needs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create a container. Fails with [`BlobError::ContainerAlreadyExists`]
    /// when it is already there.
    async fn create_container(&self, container: &str) -> Result<(), BlobError>;

    /// Server-side copy of `source_url` into `container/blob`, returning once
    /// the copy has finished.
    async fn copy_from_url(&self, container: &str, blob: &str, source_url: &str)
        -> Result<(), BlobError>;

    /// Download a blob by its URL.
    async fn download(&self, blob_url: &str) -> Result<Bytes, BlobError>;
}

/// Client for the blob service REST API, signing each request with a
/// short-lived account SAS.
pub struct BlobClient {
    http: Client,
    credential: SharedKeyCredential,
    endpoint: String,
}

/// State of a server-side copy as reported by `x-ms-copy-status`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CopyState {
    Pending,
    Success,
    Failed(String),
}

impl BlobClient {
    pub fn new(account: StorageAccount) -> Result<Self, BlobError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            http,
            credential: account.credential,
            endpoint: account.blob_endpoint,
        })
    }

    fn signed_url(&self, raw: &str) -> Result<Url, BlobError> {
        let mut url = Url::parse(raw).map_err(|_| BlobError::InvalidUrl(raw.to_string()))?;
        self.credential.blob_service_sas(Utc::now()).apply(&mut url);
        Ok(url)
    }

    fn blob_url(&self, container: &str, blob: &str) -> Result<Url, BlobError> {
        self.signed_url(&format!("{}/{}/{}", self.endpoint, container, blob))
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("x-ms-version", STORAGE_API_VERSION)
    }

    async fn copy_state(&self, container: &str, blob: &str) -> Result<CopyState, BlobError> {
        let url = self.blob_url(container, blob)?;
        let response = self.request(Method::HEAD, url).send().await?;
        let response = check(response).await?;
        Ok(parse_copy_state(&response))
    }
}

#[async_trait]
impl BlobStore for BlobClient {
    async fn create_container(&self, container: &str) -> Result<(), BlobError> {
        let mut url = self.signed_url(&format!("{}/{}", self.endpoint, container))?;
        url.query_pairs_mut().append_pair("restype", "container");

        let response = self
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0")
            .send()
            .await?;
        check(response).await?;

        tracing::info!(container = %container, "Created blob container");
        Ok(())
    }

    async fn copy_from_url(
        &self,
        container: &str,
        blob: &str,
        source_url: &str,
    ) -> Result<(), BlobError> {
        let url = self.blob_url(container, blob)?;
        let response = self
            .request(Method::PUT, url)
            .header("x-ms-copy-source", source_url)
            .header(CONTENT_LENGTH, "0")
            .send()
            .await?;
        let response = check(response).await?;

        let mut state = parse_copy_state(&response);
        while state == CopyState::Pending {
            tokio::time::sleep(COPY_POLL_INTERVAL).await;
            state = self.copy_state(container, blob).await?;
        }

        match state {
            CopyState::Failed(description) => Err(BlobError::CopyFailed {
                blob: format!("{container}/{blob}"),
                description,
            }),
            _ => Ok(()),
        }
    }

    async fn download(&self, blob_url: &str) -> Result<Bytes, BlobError> {
        let url = self.signed_url(blob_url)?;
        let response = self.request(Method::GET, url).send().await?;
        let response = check(response).await?;
        Ok(response.bytes().await?)
    }
}

fn parse_copy_state(response: &Response) -> CopyState {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    match header("x-ms-copy-status").as_str() {
        "pending" => CopyState::Pending,
        "failed" | "aborted" => CopyState::Failed(header("x-ms-copy-status-description")),
        // Synchronous copies may omit the header entirely.
        _ => CopyState::Success,
    }
}

/// Map non-success responses to [`BlobError`] using the service error code.
async fn check(response: Response) -> Result<Response, BlobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .to_string();

    if status == StatusCode::CONFLICT && code == "ContainerAlreadyExists" {
        return Err(BlobError::ContainerAlreadyExists);
    }

    let message = response.text().await.unwrap_or_default();
    Err(BlobError::Service {
        status: status.as_u16(),
        code,
        message,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Container already exists")]
    ContainerAlreadyExists,

    #[error("Blob service returned HTTP {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Copy into {blob} did not succeed: {description}")]
    CopyFailed { blob: String, description: String },

    #[error("Invalid blob URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}
