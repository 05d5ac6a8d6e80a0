//! HTTP routes driven through the router without a listener. Database and
//! Redis handles are lazy, so only requests that reach them would fail.

mod fixtures;
mod helpers;

use audio_lro_pipeline::app_state::AppState;
use audio_lro_pipeline::models::job::JobHandle;
use audio_lro_pipeline::pipeline::transcription::{
    TranscriptionPipeline, TranscriptionSubmitStage, TranscriptionWaitStage,
};
use audio_lro_pipeline::routes;
use audio_lro_pipeline::services::materializer::{BlobMaterializer, TranscriptionSink};
use audio_lro_pipeline::services::poller::Poller;
use audio_lro_pipeline::services::queue::{JobQueue, IDENTIFICATIONS_QUEUE, TRANSCRIPTIONS_QUEUE};
use audio_lro_pipeline::services::webhook::{
    WebhookVerifier, EVENT_HEADER, SIGNATURE_HEADER, TRANSCRIPTION_COMPLETION,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

use fixtures::*;
use helpers::*;

const SECRET: &str = "webhook-secret";

struct Harness {
    state: AppState,
    speech: Arc<FakeSpeech>,
    blobs: Arc<MemoryBlobs>,
}

fn harness(webhook_secret: Option<&str>) -> Harness {
    let speech = Arc::new(FakeSpeech::new(
        JobHandle::new("https://svc/transcriptions/1", None),
        Vec::new(),
    ));
    let blobs = Arc::new(MemoryBlobs::default());
    let pipeline = TranscriptionPipeline {
        submit: TranscriptionSubmitStage::new(issuer(), speech.clone()),
        wait: TranscriptionWaitStage::new(
            speech.clone(),
            Poller::new(),
            TranscriptionSink::Blob(BlobMaterializer::new(blobs.clone(), "transcriptions")),
        ),
    };

    let db = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/audio_lro_test")
        .unwrap();
    let state = AppState {
        db,
        transcription_queue: Arc::new(
            JobQueue::new("redis://127.0.0.1:6379", TRANSCRIPTIONS_QUEUE).unwrap(),
        ),
        identification_queue: Arc::new(
            JobQueue::new("redis://127.0.0.1:6379", IDENTIFICATIONS_QUEUE).unwrap(),
        ),
        transcription: Some(Arc::new(pipeline)),
        identification: None,
        webhook: webhook_secret.map(|s| Arc::new(WebhookVerifier::new(s).unwrap())),
    };

    Harness {
        state,
        speech,
        blobs,
    }
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = routes::router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook_request(event: Option<&str>, signature: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/webhooks/transcription")
        .header("content-type", "application/json");
    if let Some(event) = event {
        builder = builder.header(EVENT_HEADER, event);
    }
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_subscription_validation_handshake() {
    let h = harness(None);
    let events = json!([{
        "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
        "data": { "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6" }
    }]);

    let (status, body) = send(h.state, post_json("/api/v1/events", &events)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["validationResponse"], "512d38b6-c7b8-40c8-89fe-f46f9e9622b6");
    assert!(h.speech.submitted().is_empty());
}

#[tokio::test]
async fn test_non_matching_events_are_ignored() {
    let h = harness(None);
    let events = json!([
        { "eventType": "Microsoft.Storage.BlobDeleted", "data": { "url": RECORDING_URL } },
        { "eventType": "Microsoft.Storage.BlobTierChanged", "data": {} }
    ]);

    let (status, body) = send(h.state, post_json("/api/v1/events", &events)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "transcriptions": 0, "identifications": 0, "ignored": 2 }));
    assert!(h.speech.submitted().is_empty());
}

#[tokio::test]
async fn test_malformed_event_body_is_rejected() {
    let h = harness(None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _) = send(h.state, request).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_webhook_not_mounted_without_secret() {
    let h = harness(None);
    let (status, _) = send(
        h.state,
        webhook_request(Some(TRANSCRIPTION_COMPLETION), Some("c2ln"), "{}"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let body = json!({ "name": "a", "status": "Succeeded" }).to_string();
    let forged = WebhookVerifier::new("some-other-secret").unwrap().sign(body.as_bytes());

    let h = harness(Some(SECRET));
    let (status, response) = send(
        h.state,
        webhook_request(Some(TRANSCRIPTION_COMPLETION), Some(&forged), &body),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(response["error"].is_string());

    let h = harness(Some(SECRET));
    let (status, _) = send(h.state, webhook_request(Some(TRANSCRIPTION_COMPLETION), None, &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_requires_completion_event() {
    let body = json!({ "name": "a", "status": "Succeeded" }).to_string();
    let signature = WebhookVerifier::new(SECRET).unwrap().sign(body.as_bytes());

    let h = harness(Some(SECRET));
    let (status, _) = send(h.state, webhook_request(None, Some(&signature), &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let h = harness(Some(SECRET));
    let (status, _) = send(
        h.state,
        webhook_request(Some("TranscriptionCreation"), Some(&signature), &body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signed_completion_is_materialized() {
    let body = json!({
        "name": "a",
        "status": "Succeeded",
        "createdDateTime": "2019-03-04T23:11:12Z",
        "resultsUrls": { "Transcription": "https://svc/r1" }
    })
    .to_string();
    let signature = WebhookVerifier::new(SECRET).unwrap().sign(body.as_bytes());

    let h = harness(Some(SECRET));
    let blobs = h.blobs.clone();
    let (status, response) = send(
        h.state,
        webhook_request(Some(TRANSCRIPTION_COMPLETION), Some(&signature), &body),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["materialized"], 1);
    assert_eq!(blobs.blobs("transcriptions")["a.Transcription.json"], "https://svc/r1");
}

#[tokio::test]
async fn test_unfinished_completion_is_acknowledged() {
    let body = json!({ "name": "a", "status": "Running" }).to_string();
    let signature = WebhookVerifier::new(SECRET).unwrap().sign(body.as_bytes());

    let h = harness(Some(SECRET));
    let blobs = h.blobs.clone();
    let (status, _) = send(
        h.state,
        webhook_request(Some(TRANSCRIPTION_COMPLETION), Some(&signature), &body),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(blobs.blobs("transcriptions").is_empty());
}
