//! The session event loop.
//!
//! One tokio task owns the session, the connection manager, the capture
//! pipeline and the playback queue. User commands, transport events, connect
//! results, reconnect timers, acquired microphone streams and render
//! completions are all processed on that task, one at a time, so no state is
//! ever touched from two places at once. Nothing on the loop awaits
//! collaborator work; connects and microphone requests run on their own
//! tasks and report back as signals.

use crate::capture::{
    negotiate_format, CapturePipeline, FormatSupport, MediaStream, MicrophoneProvider,
};
use crate::config::{Credentials, ReconnectPolicy};
use crate::connection::{ConnectResolution, ConnectStart, ConnectionManager, Generation};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::dispatch::dispatch;
use crate::error::VoiceError;
use crate::playback::{AudioSink, PlaybackQueue, PlaybackTicket};
use crate::session::Session;
use crate::transport::{ClientFactory, Signal, Transport, TransportEvent};
use crate::ui::UiReflector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use voxlink_types::{AudioFormat, SessionSnapshot, ToggleView};

/// Commands buffered before `OrchestratorHandle` calls start to wait.
const COMMAND_BUFFER: usize = 32;

/// Everything the orchestrator needs, supplied by the host.
pub struct Components {
    pub credentials: Credentials,
    pub client_factory: ClientFactory,
    pub reconnect: ReconnectPolicy,
    pub resume_enabled: bool,
    pub microphone: Arc<dyn MicrophoneProvider>,
    pub format_support: Arc<dyn FormatSupport>,
    pub chunk_interval: Duration,
    pub sink: Box<dyn AudioSink>,
    pub reflector: Arc<dyn UiReflector>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Toggle,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, clonable command API for a running orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    async fn send(&self, command: Command) -> Result<(), VoiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::Stopped)
    }

    /// Marks the user as wanting a connection and opens one if needed.
    pub async fn connect(&self) -> Result<(), VoiceError> {
        self.send(Command::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), VoiceError> {
        self.send(Command::Disconnect).await
    }

    /// Disconnects if the user currently wants a connection, else connects.
    pub async fn toggle(&self) -> Result<(), VoiceError> {
        self.send(Command::Toggle).await
    }

    /// State after every command sent before this call has been applied.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, VoiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| VoiceError::Stopped)
    }

    /// Disconnects and stops the loop. Returns once teardown is done.
    pub async fn shutdown(&self) -> Result<(), VoiceError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| VoiceError::Stopped)
    }
}

pub struct Orchestrator {
    session: Session,
    connection: ConnectionManager,
    capture: CapturePipeline,
    playback: PlaybackQueue,
    format: AudioFormat,
    policy: ReconnectPolicy,
    reflector: Arc<dyn UiReflector>,
    diagnostics: Arc<dyn DiagnosticSink>,
    commands: mpsc::Receiver<Command>,
    signals: mpsc::UnboundedReceiver<Signal>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    completions: mpsc::UnboundedReceiver<PlaybackTicket>,
    reconnect_attempts: u32,
    /// Bumped whenever pending reconnect timers must be ignored.
    reconnect_epoch: u64,
    /// Connected flag last sent to the reflector.
    published: Option<bool>,
}

impl Orchestrator {
    /// Negotiates the audio format and starts the loop on the current runtime.
    pub fn spawn(components: Components) -> OrchestratorHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let format = negotiate_format(components.format_support.as_ref());
        let (playback, completions) = PlaybackQueue::new(components.sink);

        let orchestrator = Self {
            session: Session::new(components.resume_enabled),
            connection: ConnectionManager::new(
                components.credentials,
                components.client_factory,
                signals_tx.clone(),
            ),
            capture: CapturePipeline::new(
                components.microphone,
                format,
                components.chunk_interval,
            ),
            playback,
            format,
            policy: components.reconnect,
            reflector: components.reflector,
            diagnostics: components.diagnostics,
            commands,
            signals,
            signals_tx,
            completions,
            reconnect_attempts: 0,
            reconnect_epoch: 0,
            published: None,
        };
        tokio::spawn(orchestrator.run());

        OrchestratorHandle {
            commands: commands_tx,
        }
    }

    async fn run(mut self) {
        info!(format = %self.format, "session orchestrator started");
        self.publish_view();
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.disconnect();
                        break;
                    }
                },
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
                Some(ticket) = self.completions.recv() => {
                    self.playback.on_render_complete(ticket);
                }
            }
        }
        info!("session orchestrator stopped");
    }

    /// Returns `false` when the loop should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Toggle => {
                if self.session.intended_connected {
                    self.disconnect();
                } else {
                    self.connect();
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(done) => {
                self.disconnect();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::ConnectFinished { attempt, result } => {
                self.on_connect_finished(attempt, result)
            }
            Signal::Transport { generation, event } => {
                self.on_transport_event(generation, event)
            }
            Signal::StreamAcquired { request, result } => {
                self.on_stream_acquired(request, result)
            }
            Signal::ReconnectDue { epoch } => {
                if epoch != self.reconnect_epoch || !self.session.intended_connected {
                    trace!(epoch, "ignoring cancelled reconnect timer");
                    return;
                }
                self.start_connect(true);
            }
        }
    }

    fn connect(&mut self) {
        self.session.intended_connected = true;
        self.reconnect_attempts = 0;
        self.reconnect_epoch += 1;
        self.start_connect(false);
    }

    fn start_connect(&mut self, reconnect: bool) {
        match self.connection.connect(&self.session, reconnect) {
            Ok(ConnectStart::Started { attempt }) => {
                trace!(attempt, reconnect, "connect attempt started");
            }
            Ok(ConnectStart::AlreadyActive) => {
                debug!("connect requested while a transport is live or opening");
            }
            Err(e) => self.connect_failed(e, reconnect),
        }
        self.publish_view();
    }

    fn connect_failed(&mut self, error: VoiceError, reconnect: bool) {
        self.report(DiagnosticKind::ConnectionError, format!("{error}"));
        if !self.session.intended_connected {
            return;
        }
        if reconnect {
            self.schedule_reconnect();
        } else {
            self.session.intended_connected = false;
        }
    }

    fn schedule_reconnect(&mut self) {
        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        if !self.policy.allows(attempt) {
            warn!(attempts = attempt - 1, "reconnect attempts exhausted");
            self.session.intended_connected = false;
            self.publish_view();
            return;
        }

        let delay = self.policy.delay_for(attempt);
        let epoch = self.reconnect_epoch;
        let signals = self.signals_tx.clone();
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        if delay.is_zero() {
            let _ = signals.send(Signal::ReconnectDue { epoch });
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = signals.send(Signal::ReconnectDue { epoch });
            });
        }
    }

    fn on_connect_finished(
        &mut self,
        attempt: u64,
        result: Result<Arc<dyn Transport>, VoiceError>,
    ) {
        match self.connection.finish_connect(attempt, result) {
            ConnectResolution::Stale => {}
            ConnectResolution::Connected { transport, opened } => {
                self.reconnect_attempts = 0;
                self.publish_view();
                if opened {
                    self.start_capture(transport);
                }
            }
            ConnectResolution::Failed { error, reconnect } => {
                self.connect_failed(error, reconnect);
                self.publish_view();
            }
        }
    }

    fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        let class = self.connection.classify(generation);
        let current = matches!(class, Generation::Active | Generation::Pending);
        match event {
            TransportEvent::Opened => {
                if let Some(transport) = self.connection.mark_opened(generation) {
                    self.start_capture(transport);
                }
            }
            TransportEvent::Message(message) if current => {
                let kind = message.kind();
                let outcome = dispatch(
                    message,
                    &mut self.session,
                    &mut self.playback,
                    self.format,
                    self.diagnostics.as_ref(),
                );
                trace!(generation, kind, ?outcome, "dispatched service event");
            }
            TransportEvent::Error(message) if current => {
                self.report(DiagnosticKind::TransportError, message);
            }
            TransportEvent::Closed { reason } => self.on_closed(generation, class, reason),
            TransportEvent::Message(_) | TransportEvent::Error(_) => {
                trace!(generation, ?class, "dropping event from retired transport");
            }
        }
    }

    fn on_closed(&mut self, generation: u64, class: Generation, reason: String) {
        match class {
            Generation::Stale => {}
            Generation::Closing => {
                self.connection.handle_closed(generation);
                self.report(DiagnosticKind::Closed, format!("connection closed: {reason}"));
            }
            Generation::Active | Generation::Pending => {
                self.connection.handle_closed(generation);
                self.capture.stop();
                self.publish_view();
                if self.session.intended_connected {
                    self.report(
                        DiagnosticKind::UnexpectedClose,
                        format!("{}", VoiceError::UnexpectedClose(reason)),
                    );
                    self.schedule_reconnect();
                } else {
                    self.report(DiagnosticKind::Closed, format!("connection closed: {reason}"));
                }
            }
        }
    }

    fn start_capture(&mut self, transport: Arc<dyn Transport>) {
        let request = self.capture.request(transport, &self.signals_tx);
        trace!(request, "requested microphone stream");
    }

    fn on_stream_acquired(
        &mut self,
        request: u64,
        result: Result<Box<dyn MediaStream>, VoiceError>,
    ) {
        match self
            .capture
            .attach(request, result, self.diagnostics.clone())
        {
            Ok(true) => {}
            Ok(false) => trace!(request, "dropped stream for cancelled capture"),
            Err(e @ VoiceError::MultiTrack { .. }) => {
                self.report(DiagnosticKind::MultiTrack, format!("{e}"));
            }
            Err(e) => self.report(DiagnosticKind::CaptureError, format!("{e}")),
        }
    }

    fn disconnect(&mut self) {
        self.capture.stop();
        self.playback.stop();
        self.session.intended_connected = false;
        self.session.forget_resume_token_if_disabled();
        self.connection.disconnect();
        self.reconnect_epoch += 1;
        self.reconnect_attempts = 0;
        self.publish_view();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.connection.state(),
            intended_connected: self.session.intended_connected,
            resume_enabled: self.session.resume_enabled(),
            resume_group_id: self.session.resume_group_id().map(str::to_owned),
            queued_chunks: self.playback.len(),
            playing: self.playback.is_playing(),
            capturing: self.capture.is_active(),
        }
    }

    fn publish_view(&mut self) {
        let connected = self.connection.state().is_connected();
        if self.published == Some(connected) {
            return;
        }
        self.published = Some(connected);
        debug!(connected, "reflecting connection state");
        self.reflector.reflect(ToggleView::for_connected(connected));
    }

    fn report(&self, kind: DiagnosticKind, message: String) {
        self.diagnostics.report(Diagnostic::new(kind, message));
    }
}
