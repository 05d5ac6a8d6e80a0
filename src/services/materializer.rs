//! Writes finished job results to durable storage.
//!
//! Targets are named from the job name and result type, so materializing the
//! same result again overwrites blobs and is ignored by the document store.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};

use crate::db::documents::{DocumentError, DocumentStore};
use crate::models::identification::Identification;
use crate::models::job::IdentificationJobHandle;
use crate::models::transcription::Transcription;
use crate::services::blob::{BlobError, BlobStore};
use crate::services::speech::{SpeechError, TranscriptionApi};

/// Where finished transcriptions go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TranscriptionOutput {
    /// Copy each result file into a blob container.
    Blob,
    /// Fetch each result file and store it as a document.
    Documents,
}

impl TranscriptionOutput {
    pub fn parse(value: &str) -> Option<Self> {
        Self::from_str(value.trim()).ok()
    }
}

/// Blob name of one transcription result.
pub fn artifact_blob_name(job_name: &str, artifact: &str) -> String {
    format!("{job_name}.{artifact}.json")
}

/// Idempotency key of one transcription result document.
pub fn document_key(job_name: &str, result_type: &str) -> String {
    format!("{job_name}.{result_type}")
}

/// Copies transcription results into a container.
pub struct BlobMaterializer {
    store: Arc<dyn BlobStore>,
    container: String,
}

impl BlobMaterializer {
    pub fn new(store: Arc<dyn BlobStore>, container: &str) -> Self {
        Self {
            store,
            container: container.to_string(),
        }
    }

    async fn ensure_container(&self) -> Result<(), BlobError> {
        match self.store.create_container(&self.container).await {
            Ok(()) | Err(BlobError::ContainerAlreadyExists) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Copy every result file, returning the blob names written. All copies
    /// run to completion before the first error, if any, is returned.
    pub async fn materialize(
        &self,
        transcription: &Transcription,
    ) -> Result<Vec<String>, MaterializeError> {
        self.ensure_container().await?;

        let copies = transcription.results_urls.iter().map(|(artifact, url)| {
            let blob = artifact_blob_name(&transcription.name, artifact);
            async move {
                tracing::info!(
                    container = %self.container,
                    blob = %blob,
                    "Copying transcription result"
                );
                self.store
                    .copy_from_url(&self.container, &blob, url)
                    .await
                    .map(|()| blob)
            }
        });

        let mut written = Vec::new();
        let mut first_error = None;
        for result in join_all(copies).await {
            match result {
                Ok(blob) => written.push(blob),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::warn!(error = %e, "Additional copy failure"),
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }

        metrics::counter!("lro_artifacts_materialized_total", "target" => "blob")
            .increment(written.len() as u64);
        Ok(written)
    }
}

/// Stores each transcription result as a document.
pub struct DocumentMaterializer {
    store: Arc<dyn DocumentStore>,
    speech: Arc<dyn TranscriptionApi>,
    collection: String,
}

impl DocumentMaterializer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        speech: Arc<dyn TranscriptionApi>,
        collection: &str,
    ) -> Self {
        Self {
            store,
            speech,
            collection: collection.to_string(),
        }
    }

    /// Fetch and insert every result file. Returns the number of new documents.
    pub async fn materialize(&self, transcription: &Transcription) -> Result<usize, MaterializeError> {
        let created_date = normalize_date(transcription.created_date_time.as_deref());
        let recordings_url = transcription
            .recordings_url
            .as_deref()
            .map(strip_query)
            .unwrap_or_default()
            .to_string();

        let mut inserted = 0;
        for (result_type, url) in &transcription.results_urls {
            let body = self.speech.fetch_result(url).await?;
            tracing::info!(
                result_type = %result_type,
                recordings_url = %recordings_url,
                "Fetched transcription result"
            );

            let mut document = Map::new();
            document.insert("createdDate".to_string(), Value::String(created_date.clone()));
            document.insert("recordingsUrl".to_string(), Value::String(recordings_url.clone()));
            document.insert("resultType".to_string(), Value::String(result_type.clone()));
            merge_into(&mut document, body);

            let key = document_key(&transcription.name, result_type);
            if self
                .store
                .insert(&self.collection, &key, &Value::Object(document))
                .await?
            {
                inserted += 1;
                tracing::info!(
                    collection = %self.collection,
                    key = %key,
                    "Stored transcription result"
                );
            } else {
                tracing::info!(key = %key, "Transcription result already stored");
            }
        }

        metrics::counter!("lro_artifacts_materialized_total", "target" => "documents")
            .increment(inserted as u64);
        Ok(inserted)
    }
}

/// Transcription result target chosen by configuration.
pub enum TranscriptionSink {
    Blob(BlobMaterializer),
    Documents(DocumentMaterializer),
}

impl TranscriptionSink {
    pub async fn materialize(&self, transcription: &Transcription) -> Result<usize, MaterializeError> {
        match self {
            TranscriptionSink::Blob(sink) => Ok(sink.materialize(transcription).await?.len()),
            TranscriptionSink::Documents(sink) => sink.materialize(transcription).await,
        }
    }
}

/// Records speaker matches in a document collection.
pub struct IdentificationMaterializer {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl IdentificationMaterializer {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
        }
    }

    /// Store a successful match. Returns `false` without writing when there is
    /// no match or the match was already stored.
    pub async fn materialize(
        &self,
        handle: &IdentificationJobHandle,
        identification: &Identification,
    ) -> Result<bool, MaterializeError> {
        let Some(profile_id) = identification.matched_profile() else {
            tracing::info!(
                recordings_url = %handle.recording_url,
                status = %identification.status,
                "No speaker match to store"
            );
            return Ok(false);
        };

        let mut document = match serde_json::to_value(identification)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        document.insert(
            "createdDate".to_string(),
            Value::String(normalize_date(identification.created_date_time.as_deref())),
        );
        document.insert(
            "recordingsUrl".to_string(),
            Value::String(strip_query(&handle.recording_url).to_string()),
        );

        let key = handle.job.operation_id();
        let inserted = self
            .store
            .insert(&self.collection, key, &Value::Object(document))
            .await?;

        if inserted {
            metrics::counter!("lro_artifacts_materialized_total", "target" => "documents")
                .increment(1);
            tracing::info!(
                collection = %self.collection,
                profile_id = %profile_id,
                recordings_url = %handle.recording_url,
                "Stored speaker identification"
            );
        }
        Ok(inserted)
    }
}

fn merge_into(document: &mut Map<String, Value>, body: Value) {
    match body {
        Value::Object(fields) => document.extend(fields),
        other => {
            document.insert("result".to_string(), other);
        }
    }
}

/// URL without its query string (drops SAS tokens).
pub fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Calendar date (`YYYY-MM-DD`) of a service timestamp; today when the
/// timestamp is missing or unreadable.
pub fn normalize_date(timestamp: Option<&str>) -> String {
    let date = timestamp.and_then(|ts| {
        let ts = ts.trim();
        DateTime::parse_from_rfc3339(ts)
            .map(|at| at.with_timezone(&Utc).date_naive())
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|at| at.date())
                    .ok()
            })
            .or_else(|| ts.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
    });

    date.unwrap_or_else(|| Utc::now().date_naive())
        .format("%Y-%m-%d")
        .to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Document store error: {0}")]
    Document(#[from] DocumentError),

    #[error("Failed to fetch result: {0}")]
    Speech(#[from] SpeechError),

    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_blob_name() {
        assert_eq!(artifact_blob_name("sample", "Transcription"), "sample.Transcription.json");
    }

    #[test]
    fn test_document_key() {
        assert_eq!(document_key("sample", "Transcription"), "sample.Transcription");
        assert_eq!(document_key("a", "Diagnostics"), "a.Diagnostics");
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(
            strip_query("https://acct/audio/a.wav?sv=2018&sig=abc"),
            "https://acct/audio/a.wav"
        );
        assert_eq!(strip_query("https://acct/audio/a.wav"), "https://acct/audio/a.wav");
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date(Some("2019-03-04T23:11:12Z")), "2019-03-04");
        assert_eq!(normalize_date(Some("2019-03-04T23:11:12.1234567")), "2019-03-04");
        assert_eq!(normalize_date(Some("2019-03-04")), "2019-03-04");
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(normalize_date(None), today);
        assert_eq!(normalize_date(Some("garbage")), today);
    }

    #[test]
    fn test_output_mode_parse() {
        assert_eq!(TranscriptionOutput::parse("blob"), Some(TranscriptionOutput::Blob));
        assert_eq!(TranscriptionOutput::parse("documents"), Some(TranscriptionOutput::Documents));
        assert_eq!(TranscriptionOutput::parse("mongo"), None);
    }

    #[test]
    fn test_merge_keeps_result_fields() {
        let mut document = Map::new();
        document.insert("resultType".to_string(), Value::String("Transcription".into()));
        merge_into(&mut document, serde_json::json!({ "AudioFileResults": [] }));
        assert!(document.contains_key("AudioFileResults"));
        assert_eq!(document["resultType"], "Transcription");
    }
}
