//! Audio device access through external processes.
//!
//! Capture runs a recorder command (default `arecord`) that writes the
//! encoded stream to stdout; playback pipes each chunk into a player command
//! (default `aplay`). Both are killed when dropped.

use crate::capture::{AudioTrack, ChunkedRecorder, FormatSupport, MediaStream, MicrophoneProvider};
use crate::config::{CaptureConfig, PlaybackConfig};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::VoiceError;
use crate::playback::{AudioChunk, AudioSink, RenderDone};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use voxlink_types::AudioFormat;

/// Upper bound on a single chunk render.
const RENDER_TIMEOUT: Duration = Duration::from_secs(120);

const READ_BUFFER: usize = 4096;

/// The formats the configured recorder can produce.
#[derive(Debug, Clone)]
pub struct ProcessFormatSupport {
    formats: Vec<AudioFormat>,
}

impl ProcessFormatSupport {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            formats: config.formats.clone(),
        }
    }
}

impl FormatSupport for ProcessFormatSupport {
    fn is_supported(&self, format: AudioFormat) -> bool {
        self.formats.contains(&format)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessMicrophone {
    config: CaptureConfig,
}

impl ProcessMicrophone {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MicrophoneProvider for ProcessMicrophone {
    async fn get_stream(&self) -> Result<Box<dyn MediaStream>, VoiceError> {
        if self.config.command.trim().is_empty() {
            return Err(VoiceError::Capture(
                "no recorder command configured".to_string(),
            ));
        }
        Ok(Box::new(ProcessStream {
            config: self.config.clone(),
            released: false,
        }))
    }
}

/// The configured devices, one track each.
#[derive(Debug)]
struct ProcessStream {
    config: CaptureConfig,
    released: bool,
}

impl MediaStream for ProcessStream {
    fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.config
            .devices
            .iter()
            .map(|device| AudioTrack {
                label: device.clone(),
                live: !self.released,
            })
            .collect()
    }

    fn recorder(&mut self, format: AudioFormat) -> Result<Box<dyn ChunkedRecorder>, VoiceError> {
        if !self.config.formats.contains(&format) {
            return Err(VoiceError::Capture(format!(
                "recorder cannot produce {format}"
            )));
        }
        let device = self
            .config
            .devices
            .first()
            .ok_or_else(|| VoiceError::Capture("no capture device configured".to_string()))?;
        let args = self
            .config
            .args
            .iter()
            .map(|arg| arg.replace("{device}", device))
            .collect();
        Ok(Box::new(ProcessRecorder {
            command: self.config.command.clone(),
            args,
            task: None,
        }))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[derive(Debug)]
pub struct ProcessRecorder {
    command: String,
    args: Vec<String>,
    task: Option<JoinHandle<()>>,
}

impl ChunkedRecorder for ProcessRecorder {
    fn start(
        &mut self,
        interval: Duration,
        chunks: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), VoiceError> {
        self.stop();
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Capture(format!("Failed to spawn {}: {}", self.command, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Capture("Failed to open recorder stdout".to_string()))?;

        debug!(command = %self.command, "recorder started");
        self.task = Some(tokio::spawn(read_chunks(child, stdout, interval, chunks)));
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the task drops the child, which kills it.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProcessRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Collects recorder output and emits whatever arrived once per tick.
async fn read_chunks(
    mut child: Child,
    mut stdout: ChildStdout,
    interval: Duration,
    chunks: mpsc::Sender<Vec<u8>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut pending = Vec::new();
    let mut buf = [0u8; READ_BUFFER];
    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) => {
                    warn!(error = %e, "failed to read recorder output");
                    break;
                }
            },
            _ = ticker.tick() => {
                if chunks.send(std::mem::take(&mut pending)).await.is_err() {
                    return;
                }
            }
        }
    }
    if !pending.is_empty() {
        let _ = chunks.send(pending).await;
    }
    match child.wait().await {
        Ok(status) if status.success() => debug!("recorder exited"),
        Ok(status) => warn!(%status, "recorder exited with failure"),
        Err(e) => warn!(error = %e, "failed to wait for recorder"),
    }
}

/// Plays each chunk by piping it into a fresh player process.
pub struct ProcessAudioSink {
    config: PlaybackConfig,
    diagnostics: Arc<dyn DiagnosticSink>,
    current: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ProcessAudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessAudioSink")
            .field("config", &self.config)
            .field("playing", &self.current.is_some())
            .finish()
    }
}

impl ProcessAudioSink {
    pub fn new(config: PlaybackConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            config,
            diagnostics,
            current: None,
        }
    }
}

impl AudioSink for ProcessAudioSink {
    fn play(&mut self, chunk: AudioChunk, done: RenderDone) {
        let config = self.config.clone();
        let diagnostics = self.diagnostics.clone();
        self.current = Some(tokio::spawn(async move {
            if let Err(e) = render(&config, chunk).await {
                diagnostics.report(Diagnostic::new(DiagnosticKind::PlaybackError, format!("{e}")));
            }
            done.finish();
        }));
    }

    fn halt(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }
}

impl Drop for ProcessAudioSink {
    fn drop(&mut self) {
        self.halt();
    }
}

async fn render(config: &PlaybackConfig, chunk: AudioChunk) -> Result<(), VoiceError> {
    let mut child = Command::new(&config.command)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| VoiceError::Playback(format!("Failed to spawn {}: {}", config.command, e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| VoiceError::Playback("Failed to open player stdin".to_string()))?;
    let data = chunk.data;
    // Writing on its own task keeps a full stderr pipe from deadlocking us.
    let write_task = tokio::spawn(async move {
        stdin.write_all(&data).await?;
        stdin.shutdown().await
    });

    let output = tokio::time::timeout(RENDER_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            VoiceError::Playback(format!(
                "player timed out after {} seconds",
                RENDER_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| VoiceError::Playback(format!("Failed to wait for player: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VoiceError::Playback(format!(
            "player exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    match write_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(VoiceError::Playback(format!(
            "Failed to write to player stdin: {}",
            e
        ))),
        Err(e) => Err(VoiceError::Playback(format!("Stdin task failed: {}", e))),
    }
}
