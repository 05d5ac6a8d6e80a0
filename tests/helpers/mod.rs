//! In-memory stand-ins for the remote services and stores

#![allow(dead_code)]

use async_trait::async_trait;
use audio_lro_pipeline::db::documents::{DocumentError, DocumentStore};
use audio_lro_pipeline::models::identification::Identification;
use audio_lro_pipeline::models::job::JobHandle;
use audio_lro_pipeline::models::transcription::Transcription;
use audio_lro_pipeline::services::blob::{BlobError, BlobStore};
use audio_lro_pipeline::services::poller::PollResponse;
use audio_lro_pipeline::services::sas::{SharedKeyCredential, SignedUrlIssuer};
use audio_lro_pipeline::services::speaker::{SpeakerApi, SpeakerError};
use audio_lro_pipeline::services::speech::{SpeechError, TranscriptionApi};
use bytes::Bytes;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::fixtures::{ACCOUNT_KEY, ACCOUNT_NAME};

pub fn issuer() -> SignedUrlIssuer {
    SignedUrlIssuer::new(SharedKeyCredential::new(ACCOUNT_NAME, ACCOUNT_KEY).unwrap())
}

/// Transcription service that hands out one job and replays scripted statuses.
pub struct FakeSpeech {
    handle: JobHandle,
    statuses: Mutex<VecDeque<PollResponse<Transcription>>>,
    results: HashMap<String, Value>,
    pub submitted: Mutex<Vec<String>>,
    pub polls: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn new(handle: JobHandle, statuses: Vec<PollResponse<Transcription>>) -> Self {
        Self {
            handle,
            statuses: Mutex::new(statuses.into()),
            results: HashMap::new(),
            submitted: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, url: &str, body: Value) -> Self {
        self.results.insert(url.to_string(), body);
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().unwrap().len()
    }
}

#[async_trait]
impl TranscriptionApi for FakeSpeech {
    async fn submit(&self, audio_url: &str) -> Result<JobHandle, SpeechError> {
        self.submitted.lock().unwrap().push(audio_url.to_string());
        Ok(self.handle.clone())
    }

    async fn status(&self, poll_url: &str) -> Result<PollResponse<Transcription>, SpeechError> {
        self.polls.lock().unwrap().push(poll_url.to_string());
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SpeechError::Poll {
                status: 404,
                url: poll_url.to_string(),
            })
    }

    async fn fetch_result(&self, result_url: &str) -> Result<Value, SpeechError> {
        self.results
            .get(result_url)
            .cloned()
            .ok_or_else(|| SpeechError::Poll {
                status: 404,
                url: result_url.to_string(),
            })
    }
}

/// Speaker service with a fixed set of enrolled profiles.
pub struct FakeSpeaker {
    profiles: Vec<String>,
    statuses: Mutex<HashMap<String, VecDeque<PollResponse<Identification>>>>,
    /// Chunk indexes whose submission comes back without an operation URL.
    without_location: HashSet<usize>,
    pub chunks: Mutex<Vec<Vec<String>>>,
}

impl FakeSpeaker {
    pub fn with_profiles(count: usize) -> Self {
        Self {
            profiles: (0..count).map(|i| format!("profile-{i:02}")).collect(),
            statuses: Mutex::new(HashMap::new()),
            without_location: HashSet::new(),
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn without_location_for(mut self, chunk: usize) -> Self {
        self.without_location.insert(chunk);
        self
    }

    pub fn script(&self, operation_url: &str, statuses: Vec<PollResponse<Identification>>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(operation_url.to_string(), statuses.into());
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().unwrap().iter().map(Vec::len).collect()
    }
}

pub fn operation_url(chunk: usize) -> String {
    format!("https://svc/spid/v1.0/operations/op-{chunk}")
}

#[async_trait]
impl SpeakerApi for FakeSpeaker {
    async fn enrolled_profiles(&self) -> Result<Vec<String>, SpeakerError> {
        Ok(self.profiles.clone())
    }

    async fn identify(
        &self,
        _audio: Bytes,
        profile_ids: &[String],
    ) -> Result<Option<String>, SpeakerError> {
        let mut chunks = self.chunks.lock().unwrap();
        let index = chunks.len();
        chunks.push(profile_ids.to_vec());
        if self.without_location.contains(&index) {
            return Ok(None);
        }
        Ok(Some(operation_url(index)))
    }

    async fn status(
        &self,
        operation_url: &str,
    ) -> Result<PollResponse<Identification>, SpeakerError> {
        self.statuses
            .lock()
            .unwrap()
            .get_mut(operation_url)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| SpeakerError::Poll {
                status: 404,
                url: operation_url.to_string(),
            })
    }
}

/// Blob containers held in memory; copies record their source URL.
#[derive(Default)]
pub struct MemoryBlobs {
    containers: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    pub downloads: Mutex<Vec<String>>,
    failing_sources: Mutex<HashSet<String>>,
    reject_containers: AtomicBool,
}

impl MemoryBlobs {
    /// Copies from `source_url` fail with a 500.
    pub fn fail_copy_from(self, source_url: &str) -> Self {
        self.failing_sources.lock().unwrap().insert(source_url.to_string());
        self
    }

    /// Container creation fails with a 403 instead of succeeding.
    pub fn fail_container_creation(self) -> Self {
        self.reject_containers.store(true, Ordering::SeqCst);
        self
    }

    pub fn blobs(&self, container: &str) -> BTreeMap<String, String> {
        self.containers
            .lock()
            .unwrap()
            .get(container)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn create_container(&self, container: &str) -> Result<(), BlobError> {
        if self.reject_containers.load(Ordering::SeqCst) {
            return Err(BlobError::Service {
                status: 403,
                code: "AuthorizationFailure".to_string(),
                message: container.to_string(),
            });
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(container) {
            return Err(BlobError::ContainerAlreadyExists);
        }
        containers.insert(container.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn copy_from_url(
        &self,
        container: &str,
        blob: &str,
        source_url: &str,
    ) -> Result<(), BlobError> {
        if self.failing_sources.lock().unwrap().contains(source_url) {
            return Err(BlobError::Service {
                status: 500,
                code: "InternalError".to_string(),
                message: source_url.to_string(),
            });
        }
        // Let a failing sibling finish first.
        tokio::task::yield_now().await;

        let mut containers = self.containers.lock().unwrap();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| BlobError::Service {
                status: 404,
                code: "ContainerNotFound".to_string(),
                message: container.to_string(),
            })?;
        blobs.insert(blob.to_string(), source_url.to_string());
        Ok(())
    }

    async fn download(&self, blob_url: &str) -> Result<Bytes, BlobError> {
        self.downloads.lock().unwrap().push(blob_url.to_string());
        Ok(Bytes::from_static(b"RIFF....WAVEfmt "))
    }
}

/// Document collections keyed by idempotency key.
#[derive(Default)]
pub struct MemoryDocuments {
    documents: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryDocuments {
    pub fn collection(&self, collection: &str) -> Vec<(String, Value)> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, key), doc)| (key.clone(), doc.clone()))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn insert(
        &self,
        collection: &str,
        idempotency_key: &str,
        document: &Value,
    ) -> Result<bool, DocumentError> {
        let mut documents = self.documents.lock().unwrap();
        let key = (collection.to_string(), idempotency_key.to_string());
        if documents.contains_key(&key) {
            return Ok(false);
        }
        documents.insert(key, document.clone());
        Ok(true)
    }
}
