//! Mirrors the connected flag onto the toggle control.

use tokio::sync::watch;
use voxlink_types::ToggleView;

pub trait UiReflector: Send + Sync {
    fn reflect(&self, view: ToggleView);
}

/// Publishes the toggle view into a `watch` channel.
///
/// Subscribers always see the latest view; intermediate ones may be skipped.
#[derive(Debug, Clone)]
pub struct WatchReflector {
    tx: watch::Sender<ToggleView>,
}

impl WatchReflector {
    pub fn new() -> (Self, watch::Receiver<ToggleView>) {
        let (tx, rx) = watch::channel(ToggleView::default());
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<ToggleView> {
        self.tx.subscribe()
    }
}

impl UiReflector for WatchReflector {
    fn reflect(&self, view: ToggleView) {
        // `send_replace` succeeds even with no live receivers.
        self.tx.send_replace(view);
    }
}
