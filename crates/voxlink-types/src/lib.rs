//! Shared types for the voxlink voice client.
//!
//! This crate holds the types that cross crate boundaries: the inbound
//! service event union, the outbound audio frame, the negotiated audio
//! formats, and the connection state mirrored onto the toggle control.
//!
//! Both `voxlink-voice` (the orchestrator) and `voxlink-server` (the HTTP
//! surface) depend on it; it depends on nothing internal.

use serde::{Deserialize, Serialize};

pub mod audio;
pub mod event;

pub use audio::{AudioFormat, ParseAudioFormatError, PREFERRED_FORMATS};
pub use event::{InboundEvent, OutboundFrame};

/// Transport-level connection state of the session.
///
/// This is the *actual* state, as opposed to the user's intent to be
/// connected, which lives on the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport exists and none is being opened.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A transport is open.
    Connected,
}

impl ConnectionState {
    /// Returns the string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Whether the externally observable "connected" flag is set.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label shown on the toggle while disconnected.
pub const START_LABEL: &str = "Start conversation";

/// Label shown on the toggle while connected.
pub const STOP_LABEL: &str = "Stop conversation";

/// What the single toggle control should display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleView {
    pub connected: bool,
    pub label: String,
    /// Whether the control is rendered in its "active" style.
    pub active: bool,
}

impl ToggleView {
    /// Builds the view that mirrors the given connected flag.
    pub fn for_connected(connected: bool) -> Self {
        let label = if connected { STOP_LABEL } else { START_LABEL };
        Self {
            connected,
            label: label.to_string(),
            active: connected,
        }
    }
}

impl Default for ToggleView {
    fn default() -> Self {
        Self::for_connected(false)
    }
}

/// Point-in-time view of the session, returned by the JSON API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Whether the user wants to be connected.
    pub intended_connected: bool,
    pub resume_enabled: bool,
    /// Resume token captured from the last metadata event, if any.
    pub resume_group_id: Option<String>,
    /// Audio chunks waiting behind the one currently playing.
    pub queued_chunks: usize,
    pub playing: bool,
    /// Whether microphone audio is currently being forwarded.
    pub capturing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_view_mirrors_flag() {
        let on = ToggleView::for_connected(true);
        assert!(on.active);
        assert_eq!(on.label, STOP_LABEL);

        let off = ToggleView::for_connected(false);
        assert!(!off.active);
        assert_eq!(off.label, START_LABEL);
        assert_eq!(off, ToggleView::default());
    }

    #[test]
    fn connection_state_labels() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }

    #[test]
    fn snapshot_serializes_state_in_snake_case() {
        let snapshot = SessionSnapshot {
            state: ConnectionState::Connected,
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["resume_group_id"], serde_json::Value::Null);
    }
}
