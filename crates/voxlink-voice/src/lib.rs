//! Session orchestration for voxlink.
//!
//! Keeps one conversation with the remote voice service alive: opens and
//! reopens the transport, forwards microphone audio to it, plays back the
//! audio it returns and mirrors the connected flag onto the toggle control.
//!
//! The host-facing pieces are traits ([`VoiceClient`], [`MicrophoneProvider`],
//! [`AudioSink`], [`UiReflector`], [`DiagnosticSink`]) so the loop itself can
//! run against fakes. [`ws`] and [`process`] hold the concrete adapters the
//! server wires in.

pub mod capture;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod playback;
pub mod process;
pub mod session;
pub mod transport;
pub mod ui;
pub mod ws;

pub use capture::{
    negotiate_format, validate_single_track, AudioTrack, CapturePipeline, ChunkedRecorder,
    FormatSupport, MediaStream, MicrophoneProvider,
};
pub use config::{CaptureConfig, Credentials, PlaybackConfig, ReconnectPolicy, ServiceConfig};
pub use connection::ConnectionManager;
pub use diagnostics::{
    Diagnostic, DiagnosticKind, DiagnosticSink, RecentDiagnostics, TracingDiagnostics,
};
pub use dispatch::{dispatch, DispatchOutcome};
pub use error::VoiceError;
pub use orchestrator::{Components, Orchestrator, OrchestratorHandle};
pub use playback::{AudioChunk, AudioSink, PlaybackQueue, PlaybackTicket, RenderDone};
pub use process::{ProcessAudioSink, ProcessFormatSupport, ProcessMicrophone};
pub use session::Session;
pub use transport::{
    ClientFactory, ConnectOptions, Transport, TransportEvent, TransportEvents, VoiceClient,
};
pub use ui::{UiReflector, WatchReflector};
pub use ws::WsVoiceClient;
