use garde::Validate;
use serde::{Deserialize, Serialize};

/// Event type emitted by the storage account when a blob is written.
pub const BLOB_CREATED: &str = "Microsoft.Storage.BlobCreated";

/// Handshake event sent once when the event subscription is registered.
pub const SUBSCRIPTION_VALIDATION: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Storage notification delivered to the ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BlobCreatedData {
    #[garde(url)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationData {
    validation_code: String,
}

/// What the ingest endpoint should do with one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    BlobCreated { url: String },
    SubscriptionValidation { code: String },
    Unrecognized(String),
}

impl StorageEvent {
    pub fn blob_created(url: &str) -> Self {
        Self {
            event_type: BLOB_CREATED.to_string(),
            data: serde_json::json!({ "url": url }),
        }
    }

    /// Classify the event. Blob-created events with a missing or invalid URL
    /// are reported as unrecognized so they are skipped rather than failing the batch.
    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            BLOB_CREATED => match serde_json::from_value::<BlobCreatedData>(self.data.clone()) {
                Ok(data) if data.validate().is_ok() => EventKind::BlobCreated { url: data.url },
                _ => EventKind::Unrecognized(format!("{} (invalid data)", self.event_type)),
            },
            SUBSCRIPTION_VALIDATION => {
                match serde_json::from_value::<ValidationData>(self.data.clone()) {
                    Ok(data) => EventKind::SubscriptionValidation {
                        code: data.validation_code,
                    },
                    Err(_) => EventKind::Unrecognized(self.event_type.clone()),
                }
            }
            other => EventKind::Unrecognized(other.to_string()),
        }
    }
}

/// Ingest payloads arrive either as a single event or as a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    Many(Vec<StorageEvent>),
    One(StorageEvent),
}

impl EventBatch {
    pub fn into_events(self) -> Vec<StorageEvent> {
        match self {
            EventBatch::Many(events) => events,
            EventBatch::One(event) => vec![event],
        }
    }
}
