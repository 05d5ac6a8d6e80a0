//! Canned service payloads for pipeline tests

#![allow(dead_code)]

use audio_lro_pipeline::models::identification::Identification;
use audio_lro_pipeline::models::transcription::Transcription;
use audio_lro_pipeline::services::pacing::PacingHeaders;
use audio_lro_pipeline::services::poller::PollResponse;
use serde_json::json;

pub const ACCOUNT_NAME: &str = "acct";
/// base64("key")
pub const ACCOUNT_KEY: &str = "a2V5";
pub const RECORDING_URL: &str = "https://acct.blob.core.windows.net/audio/a.wav";

pub fn retry_after(secs: f64) -> PacingHeaders {
    PacingHeaders {
        retry_after_secs: Some(secs),
        ..Default::default()
    }
}

pub fn transcription_running(name: &str, retry_after_secs: f64) -> PollResponse<Transcription> {
    PollResponse {
        body: serde_json::from_value(json!({
            "name": name,
            "status": "Running",
            "createdDateTime": "2019-03-04T23:11:12Z",
            "resultsUrls": {}
        }))
        .unwrap(),
        pacing: retry_after(retry_after_secs),
    }
}

pub fn transcription_succeeded(name: &str, results: &[(&str, &str)]) -> PollResponse<Transcription> {
    PollResponse {
        body: transcription_body(name, "Succeeded", results),
        pacing: PacingHeaders::default(),
    }
}

pub fn transcription_body(name: &str, status: &str, results: &[(&str, &str)]) -> Transcription {
    let results: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|(artifact, url)| (artifact.to_string(), json!(url)))
        .collect();
    serde_json::from_value(json!({
        "name": name,
        "status": status,
        "createdDateTime": "2019-03-04T23:11:12Z",
        "recordingsUrl": format!("{RECORDING_URL}?sv=2018-11-09&sig=abc"),
        "resultsUrls": results
    }))
    .unwrap()
}

pub fn identification_running(retry_after_secs: f64) -> PollResponse<Identification> {
    PollResponse {
        body: serde_json::from_value(json!({
            "status": "running",
            "createdDateTime": "2019-03-04T23:11:12Z"
        }))
        .unwrap(),
        pacing: retry_after(retry_after_secs),
    }
}

pub fn identification_succeeded(profile_id: &str) -> PollResponse<Identification> {
    PollResponse {
        body: serde_json::from_value(json!({
            "status": "succeeded",
            "createdDateTime": "2019-03-04T23:11:12Z",
            "lastActionDateTime": "2019-03-04T23:12:40Z",
            "processingResult": {
                "identifiedProfileId": profile_id,
                "confidence": "High"
            }
        }))
        .unwrap(),
        pacing: PacingHeaders::default(),
    }
}
