use serde::{Deserialize, Serialize};

/// Handle to a remote long-running job, carried through the queue from the
/// submit stage to the poll stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobHandle {
    /// Status endpoint of the remote job.
    #[serde(rename = "url")]
    pub poll_url: String,

    /// Delay suggested by the service before the first poll, in seconds.
    #[serde(rename = "sleep", default)]
    pub initial_pacing_secs: Option<f64>,
}

impl JobHandle {
    pub fn new(poll_url: impl Into<String>, initial_pacing_secs: Option<f64>) -> Self {
        Self {
            poll_url: poll_url.into(),
            initial_pacing_secs,
        }
    }

    /// Last path segment of the poll URL, which the remote services use as the
    /// operation id.
    pub fn operation_id(&self) -> &str {
        let path = self.poll_url.split(['?', '#']).next().unwrap_or_default();
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(path)
    }
}

/// Identification results do not say which recording they ran against, so the
/// recording URL travels with the handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentificationJobHandle {
    #[serde(flatten)]
    pub job: JobHandle,

    #[serde(rename = "recordingsUrl")]
    pub recording_url: String,
}

/// Queue element: a handle plus the number of times it has been delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub attempt: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn first(payload: T) -> Self {
        Self { attempt: 1, payload }
    }

    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_wire_format() {
        let handle = JobHandle::new("https://svc/transcriptions/123", Some(30.0));
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "url": "https://svc/transcriptions/123", "sleep": 30.0 })
        );
    }

    #[test]
    fn test_handle_accepts_null_sleep() {
        let handle: JobHandle =
            serde_json::from_str(r#"{"url":"https://svc/transcriptions/1","sleep":null}"#).unwrap();
        assert_eq!(handle.initial_pacing_secs, None);

        let handle: JobHandle = serde_json::from_str(r#"{"url":"https://svc/t/1"}"#).unwrap();
        assert_eq!(handle.initial_pacing_secs, None);
    }

    #[test]
    fn test_identification_handle_is_flat() {
        let handle = IdentificationJobHandle {
            job: JobHandle::new("https://svc/operations/op-1", None),
            recording_url: "https://acct/audio/a.wav".to_string(),
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["url"], "https://svc/operations/op-1");
        assert_eq!(json["recordingsUrl"], "https://acct/audio/a.wav");
    }

    #[test]
    fn test_operation_id() {
        let handle = JobHandle::new("https://svc/operations/op-1?x=1", None);
        assert_eq!(handle.operation_id(), "op-1");
        let handle = JobHandle::new("https://svc/transcriptions/123/", None);
        assert_eq!(handle.operation_id(), "123");
    }

    #[test]
    fn test_envelope_attempts() {
        let envelope = Envelope::first(JobHandle::new("u", None));
        assert_eq!(envelope.attempt, 1);
        assert_eq!(envelope.next_attempt().attempt, 2);
    }
}
