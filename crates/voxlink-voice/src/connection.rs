//! Transport lifecycle for the session.
//!
//! At most one transport is live or being opened at any time. Every connect
//! attempt gets an attempt id and every transport a generation id; results
//! and events that no longer match are stale and are discarded, which is how
//! a disconnect cancels a connect that is still in flight.

use crate::config::Credentials;
use crate::error::VoiceError;
use crate::session::Session;
use crate::transport::{ClientFactory, ConnectOptions, Signal, Transport, TransportEvents, VoiceClient};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use voxlink_types::ConnectionState;

#[derive(Debug)]
struct PendingConnect {
    attempt: u64,
    generation: u64,
    /// `Opened` arrived before the connect result.
    opened: bool,
    reconnect: bool,
}

#[derive(Debug)]
struct ActiveTransport {
    generation: u64,
    transport: Arc<dyn Transport>,
    opened: bool,
}

/// Outcome of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectStart {
    Started { attempt: u64 },
    /// A transport is already live or being opened.
    AlreadyActive,
}

/// Outcome of applying a finished connect attempt.
#[derive(Debug)]
pub(crate) enum ConnectResolution {
    /// The attempt was cancelled or superseded.
    Stale,
    Connected {
        transport: Arc<dyn Transport>,
        /// The transport already reported `Opened`.
        opened: bool,
    },
    Failed {
        error: VoiceError,
        reconnect: bool,
    },
}

/// How an event's generation relates to the manager's transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Generation {
    Active,
    Pending,
    /// A transport the user asked to close.
    Closing,
    Stale,
}

pub struct ConnectionManager {
    credentials: Credentials,
    factory: ClientFactory,
    client: Option<Arc<dyn VoiceClient>>,
    state: ConnectionState,
    next_attempt: u64,
    next_generation: u64,
    pending: Option<PendingConnect>,
    active: Option<ActiveTransport>,
    /// Transports asked to close whose `Closed` has not arrived yet.
    closing: Vec<u64>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("active", &self.active)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub(crate) fn new(
        credentials: Credentials,
        factory: ClientFactory,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self {
            credentials,
            factory,
            client: None,
            state: ConnectionState::Disconnected,
            next_attempt: 0,
            next_generation: 0,
            pending: None,
            active: None,
            closing: Vec::new(),
            signals,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn client(&mut self) -> Result<Arc<dyn VoiceClient>, VoiceError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = (self.factory)(&self.credentials)?;
        debug!("constructed voice service client");
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Starts opening a transport unless one is live or already opening.
    ///
    /// The handshake runs on its own task; its result comes back to the
    /// orchestrator as `Signal::ConnectFinished`.
    pub(crate) fn connect(
        &mut self,
        session: &Session,
        reconnect: bool,
    ) -> Result<ConnectStart, VoiceError> {
        if self.pending.is_some() || self.active.is_some() {
            return Ok(ConnectStart::AlreadyActive);
        }
        let client = self.client()?;

        self.next_attempt += 1;
        self.next_generation += 1;
        let attempt = self.next_attempt;
        let generation = self.next_generation;
        let options = ConnectOptions {
            resume_group_id: session.resume_token_for_connect(),
        };
        info!(
            attempt,
            generation,
            reconnect,
            resuming = options.resume_group_id.is_some(),
            "opening voice transport"
        );

        let events = TransportEvents::new(generation, self.signals.clone());
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let result = client.connect(options, events).await;
            let _ = signals.send(Signal::ConnectFinished { attempt, result });
        });

        self.pending = Some(PendingConnect {
            attempt,
            generation,
            opened: false,
            reconnect,
        });
        self.state = ConnectionState::Connecting;
        Ok(ConnectStart::Started { attempt })
    }

    pub(crate) fn finish_connect(
        &mut self,
        attempt: u64,
        result: Result<Arc<dyn Transport>, VoiceError>,
    ) -> ConnectResolution {
        let pending = match self.pending.take() {
            Some(pending) if pending.attempt == attempt => pending,
            other => {
                self.pending = other;
                if let Ok(transport) = result {
                    debug!(attempt, "closing transport from cancelled connect attempt");
                    transport.close();
                }
                return ConnectResolution::Stale;
            }
        };

        match result {
            Ok(transport) => {
                info!(attempt, generation = pending.generation, "voice transport connected");
                self.active = Some(ActiveTransport {
                    generation: pending.generation,
                    transport: transport.clone(),
                    opened: pending.opened,
                });
                self.state = ConnectionState::Connected;
                ConnectResolution::Connected {
                    transport,
                    opened: pending.opened,
                }
            }
            Err(error) => {
                self.state = ConnectionState::Disconnected;
                ConnectResolution::Failed {
                    error,
                    reconnect: pending.reconnect,
                }
            }
        }
    }

    pub(crate) fn classify(&self, generation: u64) -> Generation {
        if self.active.as_ref().is_some_and(|a| a.generation == generation) {
            Generation::Active
        } else if self.pending.as_ref().is_some_and(|p| p.generation == generation) {
            Generation::Pending
        } else if self.closing.contains(&generation) {
            Generation::Closing
        } else {
            Generation::Stale
        }
    }

    /// Records an `Opened` event. Returns the transport when capture should
    /// start now; `None` if it must wait for the connect result.
    pub(crate) fn mark_opened(&mut self, generation: u64) -> Option<Arc<dyn Transport>> {
        if let Some(active) = self.active.as_mut().filter(|a| a.generation == generation) {
            if active.opened {
                return None;
            }
            active.opened = true;
            return Some(active.transport.clone());
        }
        if let Some(pending) = self.pending.as_mut().filter(|p| p.generation == generation) {
            pending.opened = true;
        }
        None
    }

    /// Drops whatever transport `generation` refers to after it closed.
    pub(crate) fn handle_closed(&mut self, generation: u64) {
        match self.classify(generation) {
            Generation::Active => self.active = None,
            Generation::Pending => self.pending = None,
            Generation::Closing => self.closing.retain(|g| *g != generation),
            Generation::Stale => return,
        }
        if self.active.is_none() && self.pending.is_none() {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Closes the live transport and cancels any connect in flight.
    pub(crate) fn disconnect(&mut self) {
        if let Some(pending) = self.pending.take() {
            info!(attempt = pending.attempt, "cancelled in-flight connect attempt");
        }
        if let Some(active) = self.active.take() {
            info!(generation = active.generation, "closing voice transport");
            active.transport.close();
            self.closing.push(active.generation);
        }
        self.state = ConnectionState::Disconnected;
    }
}
