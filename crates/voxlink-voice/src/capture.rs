//! Microphone capture and forwarding to the transport.
//!
//! The recorder produces raw chunks on a fixed interval. A single forwarding
//! task drops empty chunks, base64-encodes the rest and hands them to the
//! transport one at a time, so transmission order always equals capture
//! order.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::VoiceError;
use crate::transport::{Signal, Transport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use voxlink_types::{AudioFormat, PREFERRED_FORMATS};

/// Chunks buffered between the recorder and the forwarding task.
const CHUNK_BUFFER: usize = 64;

/// One input track of a media stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub label: String,
    /// Whether the track can currently deliver audio.
    pub live: bool,
}

/// Grants access to the microphone.
#[async_trait]
pub trait MicrophoneProvider: Send + Sync {
    /// Fails if permission is denied or no device is available.
    async fn get_stream(&self) -> Result<Box<dyn MediaStream>, VoiceError>;
}

/// An acquired microphone stream.
pub trait MediaStream: Send {
    fn audio_tracks(&self) -> Vec<AudioTrack>;

    /// Creates a recorder producing `format` from this stream.
    fn recorder(&mut self, format: AudioFormat) -> Result<Box<dyn ChunkedRecorder>, VoiceError>;

    /// Releases the underlying device. Must be safe to call repeatedly.
    fn release(&mut self);
}

/// Records a stream into fixed-interval chunks.
pub trait ChunkedRecorder: Send {
    /// Starts recording; one chunk is sent per `interval`, possibly empty.
    fn start(
        &mut self,
        interval: Duration,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), VoiceError>;

    /// Stops recording. Must be safe to call repeatedly.
    fn stop(&mut self);
}

/// Reports which audio formats the capture backend can produce.
pub trait FormatSupport: Send + Sync {
    fn is_supported(&self, format: AudioFormat) -> bool;
}

/// Picks the first supported format in preference order, else the fallback.
pub fn negotiate_format(support: &dyn FormatSupport) -> AudioFormat {
    let format = PREFERRED_FORMATS
        .into_iter()
        .find(|format| support.is_supported(*format))
        .unwrap_or(AudioFormat::FALLBACK);
    info!(format = %format, "negotiated audio format");
    format
}

/// Fails unless the stream has exactly one live audio track.
pub fn validate_single_track(stream: &dyn MediaStream) -> Result<(), VoiceError> {
    let tracks = stream
        .audio_tracks()
        .into_iter()
        .filter(|track| track.live)
        .count();
    if tracks == 1 {
        Ok(())
    } else {
        Err(VoiceError::MultiTrack { tracks })
    }
}

struct CaptureHandle {
    stream: Box<dyn MediaStream>,
    recorder: Box<dyn ChunkedRecorder>,
    forwarder: JoinHandle<()>,
}

/// A microphone request whose stream has not come back yet.
struct PendingCapture {
    request: u64,
    transport: Arc<dyn Transport>,
}

/// Microphone capture for the live transport.
///
/// Starting is split in two. [`request`](Self::request) asks for the stream
/// on its own task, because a provider may wait on a permission prompt;
/// [`attach`](Self::attach) finishes the start once the stream arrives back
/// on the orchestrator loop.
pub struct CapturePipeline {
    microphone: Arc<dyn MicrophoneProvider>,
    format: AudioFormat,
    interval: Duration,
    next_request: u64,
    pending: Option<PendingCapture>,
    handle: Option<CaptureHandle>,
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("format", &self.format)
            .field("interval", &self.interval)
            .field("pending", &self.pending.as_ref().map(|p| p.request))
            .field("active", &self.handle.is_some())
            .finish()
    }
}

impl CapturePipeline {
    pub fn new(
        microphone: Arc<dyn MicrophoneProvider>,
        format: AudioFormat,
        interval: Duration,
    ) -> Self {
        Self {
            microphone,
            format,
            interval,
            next_request: 0,
            pending: None,
            handle: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Tears down any running capture and asks for a fresh microphone stream
    /// for `transport`. The stream comes back as `Signal::StreamAcquired`.
    pub(crate) fn request(
        &mut self,
        transport: Arc<dyn Transport>,
        signals: &mpsc::UnboundedSender<Signal>,
    ) -> u64 {
        self.stop();
        self.next_request += 1;
        let request = self.next_request;

        let microphone = self.microphone.clone();
        let signals = signals.clone();
        tokio::spawn(async move {
            let result = microphone.get_stream().await;
            if let Err(mpsc::error::SendError(Signal::StreamAcquired {
                result: Ok(mut stream),
                ..
            })) = signals.send(Signal::StreamAcquired { request, result })
            {
                stream.release();
            }
        });

        self.pending = Some(PendingCapture { request, transport });
        request
    }

    /// Starts recording on the stream acquired for `request`.
    ///
    /// Returns `Ok(false)` when the request was cancelled by a later
    /// [`stop`](Self::stop) or [`request`](Self::request); a stream that
    /// arrives that late is released unused.
    pub(crate) fn attach(
        &mut self,
        request: u64,
        result: Result<Box<dyn MediaStream>, VoiceError>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<bool, VoiceError> {
        let transport = match self.pending.take() {
            Some(pending) if pending.request == request => pending.transport,
            other => {
                self.pending = other;
                if let Ok(mut stream) = result {
                    stream.release();
                }
                return Ok(false);
            }
        };

        let mut stream = result?;
        if let Err(e) = validate_single_track(stream.as_ref()) {
            stream.release();
            return Err(e);
        }

        let mut recorder = match stream.recorder(self.format) {
            Ok(recorder) => recorder,
            Err(e) => {
                stream.release();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        if let Err(e) = recorder.start(self.interval, tx) {
            recorder.stop();
            stream.release();
            return Err(e);
        }

        let forwarder = tokio::spawn(forward_chunks(rx, transport, diagnostics));
        info!(
            request,
            format = %self.format,
            interval_ms = self.interval.as_millis() as u64,
            "microphone capture started"
        );
        self.handle = Some(CaptureHandle {
            stream,
            recorder,
            forwarder,
        });
        Ok(true)
    }

    /// Stops the recorder, releases the stream and discards unsent chunks.
    /// A microphone request still in flight is cancelled.
    pub fn stop(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(request = pending.request, "cancelled microphone request");
        }
        if let Some(mut handle) = self.handle.take() {
            handle.forwarder.abort();
            handle.recorder.stop();
            handle.stream.release();
            info!("microphone capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forwards recorded chunks in order until the recorder or transport goes
/// away.
pub(crate) async fn forward_chunks(
    mut chunks: mpsc::Receiver<Vec<u8>>,
    transport: Arc<dyn Transport>,
    diagnostics: Arc<dyn DiagnosticSink>,
) {
    let mut sequence: u64 = 0;
    while let Some(chunk) = chunks.recv().await {
        if chunk.is_empty() {
            trace!("dropping empty capture chunk");
            continue;
        }
        sequence += 1;
        let encoded = BASE64.encode(&chunk);
        trace!(sequence, bytes = chunk.len(), "sending audio input");
        if let Err(e) = transport.send_audio_input(encoded) {
            diagnostics.report(Diagnostic::new(
                DiagnosticKind::TransportError,
                format!("failed to send audio chunk {sequence}: {e}"),
            ));
            break;
        }
    }
    debug!(sent = sequence, "capture forwarding finished");
}
