//! Routing of inbound service events.
//!
//! Independent of any transport: it only reads and writes the session and
//! the playback queue, so it can be driven directly in tests.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::VoiceError;
use crate::playback::{AudioChunk, PlaybackQueue};
use crate::session::Session;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::trace;
use voxlink_types::{AudioFormat, InboundEvent};

/// What dispatching an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    ResumeTokenStored,
    AudioQueued { bytes: usize },
    PlaybackStopped,
    ServiceErrorReported,
    DecodeFailed,
    Ignored,
}

pub fn dispatch(
    event: InboundEvent,
    session: &mut Session,
    playback: &mut PlaybackQueue,
    format: AudioFormat,
    diagnostics: &dyn DiagnosticSink,
) -> DispatchOutcome {
    match event {
        InboundEvent::ChatMetadata { chat_group_id, .. } => {
            session.store_resume_token(chat_group_id);
            DispatchOutcome::ResumeTokenStored
        }
        InboundEvent::AudioOutput { data, .. } => match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => {
                let len = bytes.len();
                playback.enqueue(AudioChunk::new(bytes, format));
                DispatchOutcome::AudioQueued { bytes: len }
            }
            Err(e) => {
                diagnostics.report(Diagnostic::new(
                    DiagnosticKind::Decode,
                    format!("dropping audio output: {}", VoiceError::from(e)),
                ));
                DispatchOutcome::DecodeFailed
            }
        },
        InboundEvent::UserInterruption => {
            playback.stop();
            DispatchOutcome::PlaybackStopped
        }
        InboundEvent::Error { code, message } => {
            let message = match code {
                Some(code) => format!("service error {code}: {message}"),
                None => format!("service error: {message}"),
            };
            diagnostics.report(Diagnostic::new(DiagnosticKind::ServiceError, message));
            DispatchOutcome::ServiceErrorReported
        }
        InboundEvent::Unknown => {
            trace!("ignoring unrecognized service event");
            DispatchOutcome::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecentDiagnostics;
    use crate::playback::{AudioSink, RenderDone};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct HoldingSink {
        started: Arc<Mutex<Vec<AudioChunk>>>,
        held: Arc<Mutex<Vec<RenderDone>>>,
    }

    impl AudioSink for HoldingSink {
        fn play(&mut self, chunk: AudioChunk, done: RenderDone) {
            self.started.lock().unwrap().push(chunk);
            self.held.lock().unwrap().push(done);
        }

        fn halt(&mut self) {
            self.held.lock().unwrap().clear();
        }
    }

    fn fixture() -> (Session, PlaybackQueue, HoldingSink, RecentDiagnostics) {
        let sink = HoldingSink::default();
        let (queue, _rx) = PlaybackQueue::new(Box::new(sink.clone()));
        (Session::new(true), queue, sink, RecentDiagnostics::default())
    }

    #[test]
    fn metadata_stores_resume_token() {
        let (mut session, mut queue, _sink, diag) = fixture();
        let outcome = dispatch(
            InboundEvent::ChatMetadata {
                chat_group_id: "grp-7".to_string(),
                chat_id: None,
            },
            &mut session,
            &mut queue,
            AudioFormat::Wav,
            &diag,
        );
        assert_eq!(outcome, DispatchOutcome::ResumeTokenStored);
        assert_eq!(session.resume_group_id(), Some("grp-7"));
    }

    #[test]
    fn audio_output_is_decoded_and_queued() {
        let (mut session, mut queue, sink, diag) = fixture();
        let outcome = dispatch(
            InboundEvent::AudioOutput {
                data: BASE64.encode(b"pcm"),
                id: None,
            },
            &mut session,
            &mut queue,
            AudioFormat::OggOpus,
            &diag,
        );
        assert_eq!(outcome, DispatchOutcome::AudioQueued { bytes: 3 });
        let started = sink.started.lock().unwrap();
        assert_eq!(started[0], AudioChunk::new(b"pcm".to_vec(), AudioFormat::OggOpus));
    }

    #[test]
    fn bad_audio_is_reported_not_queued() {
        let (mut session, mut queue, sink, diag) = fixture();
        let outcome = dispatch(
            InboundEvent::AudioOutput {
                data: "not base64!".to_string(),
                id: None,
            },
            &mut session,
            &mut queue,
            AudioFormat::Wav,
            &diag,
        );
        assert_eq!(outcome, DispatchOutcome::DecodeFailed);
        assert!(sink.started.lock().unwrap().is_empty());
        let recent = diag.recent();
        assert_eq!(recent[0].kind, DiagnosticKind::Decode);
        assert!(recent[0]
            .message
            .starts_with("dropping audio output: failed to decode audio payload:"));
    }

    #[test]
    fn interruption_empties_queue() {
        let (mut session, mut queue, sink, diag) = fixture();
        for data in [b"a", b"b", b"c"] {
            dispatch(
                InboundEvent::AudioOutput {
                    data: BASE64.encode(data),
                    id: None,
                },
                &mut session,
                &mut queue,
                AudioFormat::Wav,
                &diag,
            );
        }
        assert_eq!(queue.len(), 2);

        let outcome = dispatch(
            InboundEvent::UserInterruption,
            &mut session,
            &mut queue,
            AudioFormat::Wav,
            &diag,
        );
        assert_eq!(outcome, DispatchOutcome::PlaybackStopped);
        assert!(queue.is_empty());
        assert!(!queue.is_playing());
        assert_eq!(sink.started.lock().unwrap().len(), 1);
    }

    #[test]
    fn service_errors_go_to_diagnostics_and_unknown_is_ignored() {
        let (mut session, mut queue, _sink, diag) = fixture();
        let outcome = dispatch(
            InboundEvent::Error {
                code: Some("E0100".to_string()),
                message: "bad config".to_string(),
            },
            &mut session,
            &mut queue,
            AudioFormat::Wav,
            &diag,
        );
        assert_eq!(outcome, DispatchOutcome::ServiceErrorReported);
        assert_eq!(diag.recent()[0].message, "service error E0100: bad config");

        let outcome = dispatch(
            InboundEvent::Unknown,
            &mut session,
            &mut queue,
            AudioFormat::Wav,
            &diag,
        );
        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert_eq!(diag.recent().len(), 1);
    }
}
