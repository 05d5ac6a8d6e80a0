pub mod events;
pub mod health;
pub mod metrics;
pub mod webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::pipeline::PipelineError;
use crate::services::queue::QueueError;
use crate::services::webhook::{WebhookError, EVENT_HEADER, SIGNATURE_HEADER};

/// API routes. The webhook is only mounted when a secret is configured.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/events", post(events::receive_events));

    if state.webhook.is_some() {
        router = router.route(
            "/api/v1/webhooks/transcription",
            post(webhook::transcription_completed),
        );
    }

    router.with_state(state)
}

/// Handler failure, rendered as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Failed to enqueue job: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("Invalid payload: {0}")]
    BadPayload(#[from] serde_json::Error),

    #[error("The {0} pipeline is not enabled")]
    Disabled(&'static str),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(e) if e.is_remote() => StatusCode::BAD_GATEWAY,
            ApiError::Pipeline(_) | ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Webhook(WebhookError::BadSignature)
            | ApiError::Webhook(WebhookError::MissingHeader(SIGNATURE_HEADER)) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Webhook(WebhookError::MissingHeader(EVENT_HEADER))
            | ApiError::Webhook(WebhookError::UnexpectedEvent(_))
            | ApiError::BadPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Webhook(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Disabled(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
