use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::models::event::{EventBatch, EventKind, StorageEvent};
use crate::models::job::Envelope;
use crate::routes::ApiError;

/// Handles enqueued by one ingest request.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub transcriptions: usize,
    pub identifications: usize,
    pub ignored: usize,
}

/// POST /api/v1/events — run the submit stage of every enabled pipeline for
/// each blob-created event and enqueue the resulting handles.
pub async fn receive_events(
    State(state): State<AppState>,
    Json(batch): Json<EventBatch>,
) -> Result<Response, ApiError> {
    let mut summary = IngestSummary::default();

    for event in batch.into_events() {
        match event.kind() {
            EventKind::SubscriptionValidation { code } => {
                tracing::info!("Answering event subscription validation");
                return Ok(Json(json!({ "validationResponse": code })).into_response());
            }
            EventKind::Unrecognized(event_type) => {
                tracing::info!(event_type = %event_type, "Ignoring event");
                summary.ignored += 1;
            }
            EventKind::BlobCreated { url } => {
                tracing::info!(url = %url, "Recording uploaded");
                let (transcriptions, identifications) = tokio::join!(
                    submit_transcription(&state, &event),
                    submit_identification(&state, &event),
                );
                summary.transcriptions += transcriptions?;
                summary.identifications += identifications?;
            }
        }
    }

    Ok(Json(summary).into_response())
}

async fn submit_transcription(state: &AppState, event: &StorageEvent) -> Result<usize, ApiError> {
    let Some(pipeline) = &state.transcription else {
        return Ok(0);
    };
    let Some(handle) = pipeline.submit.run(event).await? else {
        return Ok(0);
    };

    state
        .transcription_queue
        .enqueue(&Envelope::first(handle))
        .await?;
    Ok(1)
}

async fn submit_identification(
    state: &AppState,
    event: &StorageEvent,
) -> Result<usize, ApiError> {
    let Some(pipeline) = &state.identification else {
        return Ok(0);
    };
    let handles = pipeline.submit.run(event).await?;

    for handle in &handles {
        state
            .identification_queue
            .enqueue(&Envelope::first(handle))
            .await?;
    }
    Ok(handles.len())
}
