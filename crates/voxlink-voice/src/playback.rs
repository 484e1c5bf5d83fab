//! Serial playback of inbound audio chunks.
//!
//! Chunks play strictly in arrival order, one at a time. The check "queue
//! non-empty and nothing playing" and the switch to playing happen in the
//! same synchronous call, so two chunks can never render at once.
//!
//! Completion is reported with a [`PlaybackTicket`]. `stop()` bumps the
//! generation, so completions still in flight for discarded chunks no longer
//! match and are ignored.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use voxlink_types::AudioFormat;

/// A bounded unit of decoded, renderable audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }
}

/// Identifies one render started by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackTicket {
    generation: u64,
    sequence: u64,
}

/// Completion handle passed to the sink along with a chunk.
///
/// Reports completion when finished or dropped, so a sink that bails out on
/// an error still lets the queue advance.
#[derive(Debug)]
pub struct RenderDone {
    ticket: PlaybackTicket,
    tx: Option<mpsc::UnboundedSender<PlaybackTicket>>,
}

impl RenderDone {
    pub fn ticket(&self) -> PlaybackTicket {
        self.ticket
    }

    pub fn finish(mut self) {
        self.notify();
    }

    fn notify(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.ticket);
        }
    }
}

impl Drop for RenderDone {
    fn drop(&mut self) {
        self.notify();
    }
}

/// Audio output device.
pub trait AudioSink: Send {
    /// Starts rendering `chunk`. Must not block; completion is reported
    /// through `done`.
    fn play(&mut self, chunk: AudioChunk, done: RenderDone);

    /// Stops any in-progress render immediately.
    fn halt(&mut self);
}

pub struct PlaybackQueue {
    sink: Box<dyn AudioSink>,
    queue: VecDeque<AudioChunk>,
    current: Option<PlaybackTicket>,
    generation: u64,
    next_sequence: u64,
    completions: mpsc::UnboundedSender<PlaybackTicket>,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("queued", &self.queue.len())
            .field("current", &self.current)
            .field("generation", &self.generation)
            .finish()
    }
}

impl PlaybackQueue {
    /// Creates the queue and the receiver its render completions arrive on.
    /// Feed every received ticket back into [`PlaybackQueue::on_render_complete`].
    pub fn new(sink: Box<dyn AudioSink>) -> (Self, mpsc::UnboundedReceiver<PlaybackTicket>) {
        let (completions, rx) = mpsc::unbounded_channel();
        let queue = Self {
            sink,
            queue: VecDeque::new(),
            current: None,
            generation: 0,
            next_sequence: 0,
            completions,
        };
        (queue, rx)
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Chunks waiting behind the one playing.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn enqueue(&mut self, chunk: AudioChunk) {
        trace!(bytes = chunk.data.len(), queued = self.queue.len(), "enqueue audio chunk");
        self.queue.push_back(chunk);
        if !self.is_playing() {
            self.play_next();
        }
    }

    /// Starts the head chunk unless something is already playing.
    pub fn play_next(&mut self) {
        if self.current.is_some() {
            return;
        }
        let Some(chunk) = self.queue.pop_front() else {
            return;
        };
        let ticket = PlaybackTicket {
            generation: self.generation,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.current = Some(ticket);
        self.sink.play(
            chunk,
            RenderDone {
                ticket,
                tx: Some(self.completions.clone()),
            },
        );
    }

    /// Handles a render completion. Returns `false` for stale tickets.
    pub fn on_render_complete(&mut self, ticket: PlaybackTicket) -> bool {
        if self.current != Some(ticket) {
            trace!(?ticket, "ignoring stale render completion");
            return false;
        }
        self.current = None;
        self.play_next();
        true
    }

    /// Halts the current render and discards everything queued.
    pub fn stop(&mut self) {
        if self.current.is_some() || !self.queue.is_empty() {
            debug!(
                discarded = self.queue.len(),
                was_playing = self.current.is_some(),
                "stopping playback"
            );
        }
        self.sink.halt();
        self.queue.clear();
        self.current = None;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        started: Vec<Vec<u8>>,
        pending: Vec<RenderDone>,
        halts: usize,
    }

    #[derive(Clone, Default)]
    struct FakeSink(Arc<Mutex<Recorded>>);

    impl AudioSink for FakeSink {
        fn play(&mut self, chunk: AudioChunk, done: RenderDone) {
            let mut rec = self.0.lock().unwrap();
            assert!(rec.pending.is_empty(), "two chunks rendering at once");
            rec.started.push(chunk.data);
            rec.pending.push(done);
        }

        fn halt(&mut self) {
            let mut rec = self.0.lock().unwrap();
            rec.halts += 1;
            // Halted renders still complete, the way a killed player exits.
            rec.pending.clear();
        }
    }

    fn chunk(byte: u8) -> AudioChunk {
        AudioChunk::new(vec![byte], AudioFormat::Wav)
    }

    impl FakeSink {
        fn complete_current(&self) {
            let done = self.0.lock().unwrap().pending.pop();
            if let Some(done) = done {
                done.finish();
            }
        }

        fn started(&self) -> Vec<Vec<u8>> {
            self.0.lock().unwrap().started.clone()
        }
    }

    fn drain(queue: &mut PlaybackQueue, rx: &mut mpsc::UnboundedReceiver<PlaybackTicket>) {
        while let Ok(ticket) = rx.try_recv() {
            queue.on_render_complete(ticket);
        }
    }

    #[test]
    fn plays_in_arrival_order_without_overlap() {
        let sink = FakeSink::default();
        let (mut queue, mut rx) = PlaybackQueue::new(Box::new(sink.clone()));

        queue.enqueue(chunk(b'A'));
        queue.enqueue(chunk(b'B'));
        queue.enqueue(chunk(b'C'));
        assert_eq!(sink.started(), vec![vec![b'A']]);
        assert!(queue.is_playing());
        assert_eq!(queue.len(), 2);

        for _ in 0..3 {
            sink.complete_current();
            drain(&mut queue, &mut rx);
        }

        assert_eq!(sink.started(), vec![vec![b'A'], vec![b'B'], vec![b'C']]);
        assert!(!queue.is_playing());
        assert!(queue.is_empty());
    }

    #[test]
    fn play_next_is_noop_while_playing_or_empty() {
        let sink = FakeSink::default();
        let (mut queue, _rx) = PlaybackQueue::new(Box::new(sink.clone()));

        queue.play_next();
        assert!(!queue.is_playing());

        queue.enqueue(chunk(1));
        queue.enqueue(chunk(2));
        queue.play_next();
        queue.play_next();
        assert_eq!(sink.started().len(), 1);
    }

    #[test]
    fn stale_completions_after_stop_do_not_resume() {
        let sink = FakeSink::default();
        let (mut queue, mut rx) = PlaybackQueue::new(Box::new(sink.clone()));

        queue.enqueue(chunk(b'A'));
        queue.enqueue(chunk(b'B'));
        queue.enqueue(chunk(b'C'));
        sink.complete_current();
        drain(&mut queue, &mut rx);
        assert!(queue.is_playing(), "B should be rendering");

        queue.stop();
        // The halted render of B reports completion afterwards.
        drain(&mut queue, &mut rx);

        assert!(!queue.is_playing());
        assert!(queue.is_empty());
        assert_eq!(sink.started(), vec![vec![b'A'], vec![b'B']]);
        assert_eq!(sink.0.lock().unwrap().halts, 1);

        queue.enqueue(chunk(b'D'));
        assert_eq!(sink.started().last(), Some(&vec![b'D']));
    }

    #[test]
    fn dropped_render_handle_still_advances() {
        struct DroppingSink(Arc<Mutex<usize>>);
        impl AudioSink for DroppingSink {
            fn play(&mut self, _chunk: AudioChunk, _done: RenderDone) {
                *self.0.lock().unwrap() += 1;
            }
            fn halt(&mut self) {}
        }

        let plays = Arc::new(Mutex::new(0));
        let (mut queue, mut rx) = PlaybackQueue::new(Box::new(DroppingSink(plays.clone())));
        queue.enqueue(chunk(1));
        queue.enqueue(chunk(2));
        drain(&mut queue, &mut rx);
        drain(&mut queue, &mut rx);

        assert_eq!(*plays.lock().unwrap(), 2);
        assert!(!queue.is_playing());
    }

    #[test]
    fn foreign_ticket_is_rejected() {
        let sink = FakeSink::default();
        let (mut queue, _rx) = PlaybackQueue::new(Box::new(sink.clone()));
        queue.enqueue(chunk(1));
        let bogus = PlaybackTicket {
            generation: 99,
            sequence: 0,
        };
        assert!(!queue.on_render_complete(bogus));
        assert!(queue.is_playing());
    }
}
