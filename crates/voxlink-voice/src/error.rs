use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    /// Handshake or authentication with the voice service failed.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("expected exactly one audio track, found {tracks}")]
    MultiTrack { tracks: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed unexpectedly: {0}")]
    UnexpectedClose(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("failed to decode audio payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The orchestrator task is no longer running.
    #[error("session orchestrator has stopped")]
    Stopped,
}
