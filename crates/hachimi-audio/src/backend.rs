//! The platform playback backend contract.

use std::time::Duration;

use async_trait::async_trait;
use hachimi_core::{NowPlaying, PlayEvent, Result, SongItem};
use tokio::sync::mpsc;
use tracing::trace;

/// Sending half of a backend's event stream.
///
/// Cheap to clone and usable from any thread, including non-async audio
/// threads.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<PlayEvent>,
}

impl EventEmitter {
    /// Create an emitter and the receiver the player dispatches from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PlayEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "Event dropped, nobody is listening");
        }
    }
}

/// A native playback pipeline: decode, output device and buffering.
///
/// Transport calls (`play`, `pause`, `stop`) never block and are no-ops
/// when nothing is loaded. Observed transitions are reported through the
/// [`EventEmitter`] handed over in [`initialize`](Self::initialize).
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether playback can start before the whole song is fetched.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Acquire native resources. A failure is fatal to this instance.
    async fn initialize(&self, events: EventEmitter) -> Result<()>;

    /// Fetch and decode `item`, replacing whatever is loaded.
    async fn load(&self, item: &SongItem) -> Result<()>;

    /// Publish metadata to the OS now-playing integration, if any.
    fn set_now_playing(&self, _metadata: &NowPlaying) {}

    fn play(&self);

    fn pause(&self);

    /// Stop output and rewind to the start of the loaded song.
    fn stop(&self);

    async fn seek(&self, position: Duration) -> Result<()>;

    /// Final linear gain in `[0, 1]`, already mixed and faded.
    fn set_output_gain(&self, gain: f32);

    fn is_playing(&self) -> bool;

    fn is_end(&self) -> bool;

    fn position(&self) -> Duration;

    /// Fraction of the current song that has been fetched.
    fn buffered_progress(&self) -> f32 {
        1.0
    }

    /// Tear down threads, timers and native handles. Safe to call repeatedly.
    async fn release(&self);
}
