//! Device-less backend driven by a virtual clock.
//!
//! Position advances with Tokio time while "playing" and `End` is reported
//! when the song's catalogue duration elapses. Nothing is decoded. Useful
//! for servers, CI and tests, where the recorded gain history and
//! now-playing metadata can be inspected.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hachimi_core::{Error, HttpError, NowPlaying, PlayEvent, Result, SongItem};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{EventEmitter, PlaybackBackend};

const GAIN_HISTORY_LIMIT: usize = 4096;

#[derive(Debug)]
struct LoadedSong {
    id: String,
    duration: Duration,
}

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    released: bool,
    events: Option<EventEmitter>,
    song: Option<LoadedSong>,
    playing: bool,
    ended: bool,
    /// Position at `anchor`.
    base: Duration,
    anchor: Option<Instant>,
    generation: u64,
    end_watch: Option<JoinHandle<()>>,
    gain: f32,
    gain_history: VecDeque<f32>,
    now_playing: Option<NowPlaying>,
}

impl State {
    fn position(&self) -> Duration {
        let Some(song) = &self.song else {
            return Duration::ZERO;
        };
        let position = match (self.playing, self.anchor) {
            (true, Some(anchor)) => self.base + anchor.elapsed(),
            _ => self.base,
        };
        position.min(song.duration)
    }

    fn emit(&self, event: PlayEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Freeze the clock and drop any pending end-of-song timer.
    fn halt(&mut self) {
        self.base = self.position();
        self.anchor = None;
        self.playing = false;
        self.generation = self.generation.wrapping_add(1);
        if let Some(watch) = self.end_watch.take() {
            watch.abort();
        }
    }
}

/// Backend without an output device. See the module docs.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    state: Arc<Mutex<State>>,
    load_delay: Duration,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate fetch/decode latency on every load.
    #[must_use]
    pub const fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Last gain pushed by the player.
    pub fn output_gain(&self) -> f32 {
        self.state.lock().gain
    }

    /// Recent gains, oldest first.
    pub fn gain_history(&self) -> Vec<f32> {
        self.state.lock().gain_history.iter().copied().collect()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.state.lock().now_playing.clone()
    }

    pub fn loaded_id(&self) -> Option<String> {
        self.state.lock().song.as_ref().map(|song| song.id.clone())
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    fn schedule_end(&self, state: &mut State) {
        let Some(song) = &state.song else {
            return;
        };
        let duration = song.duration;
        let remaining = duration.saturating_sub(state.base);
        let generation = state.generation;
        let shared = Arc::clone(&self.state);

        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, end of song will not be reported");
            return;
        };

        state.end_watch = Some(runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            let mut state = shared.lock();
            if state.generation != generation || !state.playing {
                return;
            }
            state.halt();
            state.base = duration;
            state.ended = true;
            debug!("Virtual playback reached the end");
            state.emit(PlayEvent::End);
        }));
    }
}

fn validate(item: &SongItem) -> Result<()> {
    match item {
        SongItem::Local { audio, .. } if audio.is_empty() => {
            Err(Error::AudioDecode("Empty audio data".to_string()))
        }
        SongItem::Remote { audio_url, .. }
            if !matches!(audio_url.scheme(), "http" | "https" | "file") =>
        {
            Err(HttpError::InvalidUrl(audio_url.to_string()).into())
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl PlaybackBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    async fn initialize(&self, events: EventEmitter) -> Result<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(Error::Released);
        }
        state.events = Some(events);
        state.initialized = true;
        info!("Headless backend initialized");
        Ok(())
    }

    async fn load(&self, item: &SongItem) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.released {
                return Err(Error::Released);
            }
            if !state.initialized {
                return Err(Error::NotInitialized);
            }
            state.halt();
            state.song = None;
        }

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        validate(item)?;

        let mut state = self.state.lock();
        if state.released {
            return Err(Error::Released);
        }
        state.halt();
        state.song = Some(LoadedSong {
            id: item.id().to_string(),
            duration: item.info().duration(),
        });
        state.base = Duration::ZERO;
        state.ended = false;
        debug!(id = item.id(), duration_secs = item.info().duration_secs, "Song loaded");
        Ok(())
    }

    fn set_now_playing(&self, metadata: &NowPlaying) {
        self.state.lock().now_playing = Some(metadata.clone());
    }

    fn play(&self) {
        let mut state = self.state.lock();
        if state.song.is_none() || state.playing {
            return;
        }
        if state.ended {
            state.base = Duration::ZERO;
            state.ended = false;
        }
        state.halt();
        state.playing = true;
        state.anchor = Some(Instant::now());
        self.schedule_end(&mut state);
        state.emit(PlayEvent::Play);
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if !state.playing {
            return;
        }
        state.halt();
        state.emit(PlayEvent::Pause);
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        let was_playing = state.playing;
        state.halt();
        state.base = Duration::ZERO;
        state.ended = false;
        if was_playing {
            state.emit(PlayEvent::Pause);
        }
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        let mut state = self.state.lock();
        let Some(song) = &state.song else {
            return Err(Error::InvalidArgument("Nothing loaded to seek in".to_string()));
        };
        let position = position.min(song.duration);
        let was_playing = state.playing;

        state.halt();
        state.base = position;
        state.ended = false;
        if was_playing {
            state.playing = true;
            state.anchor = Some(Instant::now());
            self.schedule_end(&mut state);
        }
        state.emit(PlayEvent::Seek(position));
        Ok(())
    }

    fn set_output_gain(&self, gain: f32) {
        let mut state = self.state.lock();
        state.gain = gain;
        if state.gain_history.len() == GAIN_HISTORY_LIMIT {
            state.gain_history.pop_front();
        }
        state.gain_history.push_back(gain);
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn is_end(&self) -> bool {
        self.state.lock().ended
    }

    fn position(&self) -> Duration {
        self.state.lock().position()
    }

    fn buffered_progress(&self) -> f32 {
        if self.state.lock().song.is_some() {
            1.0
        } else {
            0.0
        }
    }

    async fn release(&self) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        state.halt();
        state.released = true;
        state.song = None;
        state.events = None;
        info!("Headless backend released");
    }
}
