//! The seam between the orchestrator and the voice service client.
//!
//! A [`VoiceClient`] opens [`Transport`]s. Each transport reports what
//! happens on the wire through a [`TransportEvents`] handle instead of
//! registered callbacks, so the orchestrator can process those events on its
//! own loop, in order, together with everything else.

use crate::capture::MediaStream;
use crate::config::Credentials;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use voxlink_types::InboundEvent;

/// Something that happened on a live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(InboundEvent),
    Error(String),
    Closed { reason: String },
}

/// Options for a single connect attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Resume token from a previous connection, if resumption is enabled.
    pub resume_group_id: Option<String>,
}

/// Work delivered to the orchestrator loop from outside it.
pub(crate) enum Signal {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    ConnectFinished {
        attempt: u64,
        result: Result<Arc<dyn Transport>, VoiceError>,
    },
    ReconnectDue {
        epoch: u64,
    },
    StreamAcquired {
        request: u64,
        result: Result<Box<dyn MediaStream>, VoiceError>,
    },
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Transport { generation, event } => f
                .debug_struct("Transport")
                .field("generation", generation)
                .field("event", event)
                .finish(),
            Signal::ConnectFinished { attempt, result } => f
                .debug_struct("ConnectFinished")
                .field("attempt", attempt)
                .field("ok", &result.is_ok())
                .finish(),
            Signal::ReconnectDue { epoch } => {
                f.debug_struct("ReconnectDue").field("epoch", epoch).finish()
            }
            Signal::StreamAcquired { request, result } => f
                .debug_struct("StreamAcquired")
                .field("request", request)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

/// Handle a transport uses to report its events.
///
/// Events carry the generation of the transport they came from, so events
/// from a transport that has since been replaced are recognised and dropped.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<Signal>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports an event. Returns `false` once the orchestrator has stopped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Signal::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A live bidirectional connection to the voice service.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Queues one base64-encoded audio chunk for sending.
    fn send_audio_input(&self, encoded: String) -> Result<(), VoiceError>;

    /// Requests the connection close. Must be safe to call more than once.
    /// The transport still reports `Closed` when it actually goes away.
    fn close(&self);
}

/// The voice service client library.
#[async_trait]
pub trait VoiceClient: Send + Sync {
    /// Opens a transport. Implementations report `Opened` through `events`
    /// once the connection is usable, either before or after returning.
    async fn connect(
        &self,
        options: ConnectOptions,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, VoiceError>;
}

/// Builds the client lazily, on the first connect attempt.
pub type ClientFactory =
    Box<dyn Fn(&Credentials) -> Result<Arc<dyn VoiceClient>, VoiceError> + Send + Sync>;
