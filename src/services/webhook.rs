use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "x-microsoft-event";
pub const SIGNATURE_HEADER: &str = "x-microsoft-signature";
pub const TRANSCRIPTION_COMPLETION: &str = "TranscriptionCompletion";

/// Verifies completion callbacks signed with a shared secret
/// (base64 HMAC-SHA256 over the raw body).
#[derive(Clone)]
pub struct WebhookVerifier {
    mac: HmacSha256,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Result<Self, WebhookError> {
        if secret.is_empty() {
            return Err(WebhookError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| WebhookError::EmptySecret)?;
        Ok(Self { mac })
    }

    /// Base64 signature of `body`, as the sender computes it.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Check the event type and signature headers of a callback.
    pub fn verify(
        &self,
        event: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        match event {
            Some(TRANSCRIPTION_COMPLETION) => {}
            Some(other) => return Err(WebhookError::UnexpectedEvent(other.to_string())),
            None => return Err(WebhookError::MissingHeader(EVENT_HEADER)),
        }

        let signature = signature.ok_or(WebhookError::MissingHeader(SIGNATURE_HEADER))?;
        let expected = base64::engine::general_purpose::STANDARD
            .decode(signature.trim())
            .map_err(|_| WebhookError::BadSignature)?;

        let mut mac = self.mac.clone();
        mac.update(body);
        // Constant-time comparison.
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::BadSignature)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook secret must not be empty")]
    EmptySecret,

    #[error("Missing header {0}")]
    MissingHeader(&'static str),

    #[error("Unexpected webhook event {0}")]
    UnexpectedEvent(String),

    #[error("Webhook signature does not match")]
    BadSignature,
}
