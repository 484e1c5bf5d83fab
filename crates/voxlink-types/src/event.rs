//! Messages exchanged with the remote voice service.
//!
//! Only the handful of event kinds the client acts on are modelled. Any
//! other `type` deserializes to [`InboundEvent::Unknown`] so that new event
//! kinds added by the service never break the client.

use serde::{Deserialize, Serialize};

/// Inbound service event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    /// First acknowledgment of a connection; carries the resume token.
    #[serde(rename = "chat_metadata")]
    ChatMetadata {
        chat_group_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<String>,
    },
    /// A chunk of synthesized audio, base64-encoded.
    #[serde(rename = "audio_output")]
    AudioOutput {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// The human started talking over the assistant.
    #[serde(rename = "user_interruption")]
    UserInterruption,
    /// The service reported an error on this connection.
    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMetadata { .. } => "chat_metadata",
            Self::AudioOutput { .. } => "audio_output",
            Self::UserInterruption => "user_interruption",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Outbound frame sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// A captured microphone chunk, base64-encoded.
    #[serde(rename = "audio_input")]
    AudioInput { data: String },
}
