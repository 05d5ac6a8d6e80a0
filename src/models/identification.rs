use serde::{Deserialize, Serialize};
use strum::Display;

use crate::services::poller::LroStatus;

/// Profile id the service reports when none of the candidates matched.
pub const UNKNOWN_SPEAKER: &str = "00000000-0000-0000-0000-000000000000";

/// Largest number of profiles one identify request may name.
pub const MAX_PROFILES_PER_REQUEST: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IdentificationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Entry of `GET /identificationProfiles`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationProfile {
    pub identification_profile_id: String,
    #[serde(default)]
    pub enrollment_status: String,
}

impl IdentificationProfile {
    pub fn is_enrolled(&self) -> bool {
        self.enrollment_status == "Enrolled"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub identified_profile_id: String,
    #[serde(default)]
    pub confidence: Option<String>,
}

/// Identification operation as returned by its status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    pub status: IdentificationStatus,

    #[serde(default)]
    pub created_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub processing_result: Option<ProcessingResult>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Identification {
    /// Profile id of a successful match, or `None` for failures and the
    /// unknown-speaker sentinel.
    pub fn matched_profile(&self) -> Option<&str> {
        if self.status != IdentificationStatus::Succeeded {
            return None;
        }
        self.processing_result
            .as_ref()
            .map(|r| r.identified_profile_id.as_str())
            .filter(|id| !id.is_empty() && *id != UNKNOWN_SPEAKER)
    }

    pub fn is_unknown_speaker(&self) -> bool {
        self.processing_result
            .as_ref()
            .is_some_and(|r| r.identified_profile_id == UNKNOWN_SPEAKER)
    }
}

impl LroStatus for Identification {
    fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            IdentificationStatus::Succeeded | IdentificationStatus::Failed
        )
    }

    fn status_label(&self) -> String {
        self.status.to_string()
    }
}
