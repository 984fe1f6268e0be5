//! The player facade: one backend plus mixer, fades and listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hachimi_core::{
    keys, Error, FadeSettings, NowPlaying, PlayEvent, PreferenceStore, PreferenceStoreExt,
    Result, SongItem,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{EventEmitter, PlaybackBackend};
use crate::fade::FadeController;
use crate::listener::{Listener, ListenerId, ListenerRegistry};
use crate::mixer::MixerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Ready,
    Released,
}

/// Cross-platform player.
///
/// Construct once per session, [`initialize`](Self::initialize) before use
/// and [`release`](Self::release) at the end. A released player cannot be
/// initialized again.
///
/// Transport calls and queries on a player that is not ready (not
/// initialized, nothing prepared, or released) do nothing and report
/// `false`/zero.
pub struct Player {
    backend: Arc<dyn PlaybackBackend>,
    preferences: Arc<dyn PreferenceStore>,
    mixer: Arc<MixerState>,
    fade: FadeController,
    listeners: Arc<ListenerRegistry>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes `initialize` and `prepare`.
    prepare_lock: tokio::sync::Mutex<()>,
    loaded: AtomicBool,
    events: Mutex<Option<EventEmitter>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn new(backend: Arc<dyn PlaybackBackend>, preferences: Arc<dyn PreferenceStore>) -> Self {
        let mixer = Arc::new(MixerState::new());
        let fade = {
            let backend = Arc::clone(&backend);
            let mixer = Arc::clone(&mixer);
            FadeController::new(1.0, move |multiplier| {
                backend.set_output_gain(mixer.output_gain(multiplier));
            })
        };

        Self {
            backend,
            preferences,
            mixer,
            fade,
            listeners: Arc::new(ListenerRegistry::new()),
            lifecycle: Mutex::new(Lifecycle::Created),
            prepare_lock: tokio::sync::Mutex::new(()),
            loaded: AtomicBool::new(false),
            events: Mutex::new(None),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start event dispatch and initialize the backend.
    ///
    /// Initializing a ready player is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.prepare_lock.lock().await;
        match *self.lifecycle.lock() {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Released => return Err(Error::Released),
            Lifecycle::Created => {}
        }

        let (emitter, mut rx) = EventEmitter::channel();
        let listeners = Arc::clone(&self.listeners);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!(event = event.name(), "Dispatching playback event");
                listeners.dispatch(&event);
            }
        });

        if let Err(e) = self.backend.initialize(emitter.clone()).await {
            error!(backend = self.backend.name(), error = %e, "Backend initialization failed");
            dispatcher.abort();
            return Err(e);
        }

        self.mixer.set_replay_gain_enabled(
            self.preferences.get_or(keys::REPLAY_GAIN_ENABLED, true),
        );
        *self.events.lock() = Some(emitter);
        *self.dispatcher.lock() = Some(dispatcher);
        *self.lifecycle.lock() = Lifecycle::Ready;
        self.fade.reapply();

        info!(backend = self.backend.name(), "Player initialized");
        Ok(())
    }

    /// Load `item`, replacing the current song.
    ///
    /// When `fade` is requested, fading is enabled in the preferences and a
    /// song is playing, the current song fades out completely before the new
    /// one is loaded. A load failure is also emitted as [`PlayEvent::Error`].
    pub async fn prepare(&self, item: SongItem, auto_play: bool, fade: bool) -> Result<()> {
        let _guard = self.prepare_lock.lock().await;
        self.ensure_initialized()?;

        let settings = FadeSettings::load(self.preferences.as_ref());
        let fading = fade && settings.is_active();

        if fading && self.loaded.load(Ordering::Acquire) && self.backend.is_playing() {
            debug!("Fading out current song");
            if self.fade.fade_to(0.0, settings, None).finished().await.is_err() {
                debug!("Fade-out was interrupted");
            }
        }

        self.fade.cancel();
        self.backend.stop();
        self.loaded.store(false, Ordering::Release);

        info!(
            id = item.id(),
            title = item.title(),
            format = item.format(),
            remote = item.is_remote(),
            "Preparing song"
        );

        if let Err(e) = self.backend.load(&item).await {
            let source = Arc::new(e);
            error!(id = item.id(), error = %source, "Failed to prepare song");
            self.emit(PlayEvent::Error(Arc::clone(&source)));
            return Err(Error::Prepare {
                id: item.id().to_string(),
                source,
            });
        }
        self.ensure_initialized()?;

        self.mixer.set_replay_gain_db(item.replay_gain_db());
        self.fade
            .set_multiplier(if fading && auto_play { 0.0 } else { 1.0 });
        self.backend.set_now_playing(&NowPlaying::from(&item));
        self.loaded.store(true, Ordering::Release);
        debug!(
            replay_gain_db = item.replay_gain_db(),
            enabled = self.mixer.replay_gain_enabled(),
            "Song prepared"
        );

        if auto_play {
            self.start(settings);
        }
        Ok(())
    }

    /// Start or resume playback, fading in when enabled.
    pub fn play(&self) {
        if !self.is_ready() {
            debug!("Ignoring play: player not ready");
            return;
        }
        self.start(FadeSettings::load(self.preferences.as_ref()));
    }

    fn start(&self, settings: FadeSettings) {
        self.backend.play();
        self.fade.fade_to(1.0, settings, None);
    }

    /// Pause playback. With `fade`, the backend pauses once the fade-out
    /// completes.
    pub fn pause(&self, fade: bool) {
        if !self.is_ready() {
            debug!("Ignoring pause: player not ready");
            return;
        }

        if fade {
            let backend = Arc::clone(&self.backend);
            self.fade.fade_to(
                0.0,
                FadeSettings::load(self.preferences.as_ref()),
                Some(Box::new(move || backend.pause())),
            );
        } else {
            self.fade.cancel();
            self.backend.pause();
        }
    }

    /// Seek, then start playback when `auto_start` is set and the player is
    /// not already playing.
    pub async fn seek(&self, position: Duration, auto_start: bool) -> Result<()> {
        if !self.is_ready() {
            debug!("Ignoring seek: player not ready");
            return Ok(());
        }

        self.backend.seek(position).await?;
        if auto_start && !self.backend.is_playing() {
            self.play();
        }
        Ok(())
    }

    pub fn stop(&self) {
        if !self.is_ready() {
            return;
        }
        self.fade.cancel();
        self.backend.stop();
    }

    pub fn volume(&self) -> f32 {
        self.mixer.volume()
    }

    /// Set the user volume, clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        self.mixer.set_volume(volume);
        debug!(volume = self.mixer.volume(), "Volume changed");
        self.fade.reapply();
    }

    pub fn replay_gain_enabled(&self) -> bool {
        self.mixer.replay_gain_enabled()
    }

    /// Toggle loudness normalization and persist the choice.
    pub fn set_replay_gain_enabled(&self, enabled: bool) -> Result<()> {
        self.mixer.set_replay_gain_enabled(enabled);
        self.fade.reapply();
        self.preferences
            .set_value(keys::REPLAY_GAIN_ENABLED, &enabled)
    }

    /// Fade multiplier currently applied on top of the mixed volume.
    pub fn fade_multiplier(&self) -> f32 {
        self.fade.multiplier()
    }

    /// Gain currently pushed to the backend.
    pub fn output_gain(&self) -> f32 {
        self.mixer.output_gain(self.fade.multiplier())
    }

    /// True once a song has been prepared successfully.
    pub fn is_ready(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Ready && self.loaded.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.is_ready() && self.backend.is_playing()
    }

    pub fn is_end(&self) -> bool {
        self.is_ready() && self.backend.is_end()
    }

    pub fn current_position(&self) -> Duration {
        if self.is_ready() {
            self.backend.position()
        } else {
            Duration::ZERO
        }
    }

    pub fn buffered_progress(&self) -> f32 {
        if self.is_ready() {
            self.backend.buffered_progress()
        } else {
            0.0
        }
    }

    pub fn supports_streaming(&self) -> bool {
        self.backend.supports_streaming()
    }

    pub fn add_listener(&self, listener: impl Listener + 'static) -> ListenerId {
        self.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Stop fades, release the backend and stop event dispatch.
    ///
    /// Calling this more than once is harmless.
    pub async fn release(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Released {
                debug!("Player already released");
                return;
            }
            *lifecycle = Lifecycle::Released;
        }

        self.fade.cancel();
        self.loaded.store(false, Ordering::Release);
        self.events.lock().take();
        self.backend.release().await;
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        info!(backend = self.backend.name(), "Player released");
    }

    fn ensure_initialized(&self) -> Result<()> {
        match *self.lifecycle.lock() {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Created => Err(Error::NotInitialized),
            Lifecycle::Released => Err(Error::Released),
        }
    }

    fn emit(&self, event: PlayEvent) {
        match self.events.lock().as_ref() {
            Some(events) => events.emit(event),
            None => warn!(event = event.name(), "No event channel, dropping event"),
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
    }
}
