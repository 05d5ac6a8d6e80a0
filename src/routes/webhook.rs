use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::models::transcription::Transcription;
use crate::routes::ApiError;
use crate::services::poller::LroStatus;
use crate::services::webhook::{EVENT_HEADER, SIGNATURE_HEADER};

/// POST /api/v1/webhooks/transcription — completion callback from the
/// transcription service. Terminal payloads are materialized directly.
pub async fn transcription_completed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let verifier = state.webhook.as_ref().ok_or(ApiError::Disabled("webhook"))?;
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    verifier.verify(header(EVENT_HEADER), header(SIGNATURE_HEADER), &body)?;

    let transcription: Transcription = serde_json::from_slice(&body)?;
    if !transcription.is_terminal() {
        tracing::info!(
            name = %transcription.name,
            status = %transcription.status,
            "Ignoring callback for unfinished transcription"
        );
        return Ok((StatusCode::ACCEPTED, Json(json!({ "materialized": 0 }))));
    }

    let pipeline = state
        .transcription
        .as_ref()
        .ok_or(ApiError::Disabled("transcription"))?;
    let materialized = pipeline.wait.materialize(&transcription).await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "name": transcription.name, "materialized": materialized })),
    ))
}
