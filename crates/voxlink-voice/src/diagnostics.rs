//! The single sink every orchestrator error is routed to.
//!
//! Nothing reported here ever stops the process; the toggle's label is the
//! only user-visible state, and diagnostics are for the operator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of records kept by [`RecentDiagnostics`].
pub const DEFAULT_RECENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ConnectionError,
    MultiTrack,
    TransportError,
    UnexpectedClose,
    /// The transport closed after the user asked for it.
    Closed,
    Decode,
    ServiceError,
    CaptureError,
    PlaybackError,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionError => "connection_error",
            Self::MultiTrack => "multi_track",
            Self::TransportError => "transport_error",
            Self::UnexpectedClose => "unexpected_close",
            Self::Closed => "closed",
            Self::Decode => "decode",
            Self::ServiceError => "service_error",
            Self::CaptureError => "capture_error",
            Self::PlaybackError => "playback_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs each diagnostic through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        let kind = diagnostic.kind.as_str();
        match diagnostic.kind {
            DiagnosticKind::Closed => {
                tracing::info!(kind, "{}", diagnostic.message);
            }
            DiagnosticKind::ConnectionError | DiagnosticKind::MultiTrack => {
                tracing::error!(kind, "{}", diagnostic.message);
            }
            _ => {
                tracing::warn!(kind, "{}", diagnostic.message);
            }
        }
    }
}

/// Logs through `tracing` and keeps the most recent records in memory.
#[derive(Debug)]
pub struct RecentDiagnostics {
    capacity: usize,
    // Only held for push/clone; never across an await.
    records: Mutex<VecDeque<Diagnostic>>,
}

impl RecentDiagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Diagnostic> {
        match self.records.lock() {
            Ok(records) => records.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl Default for RecentDiagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

impl DiagnosticSink for RecentDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        TracingDiagnostics.report(diagnostic.clone());
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(diagnostic);
    }
}
