//! Player facade integration tests
//!
//! Drives the facade against the headless backend with paused Tokio time,
//! so fades and song ends run on a deterministic virtual clock.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hachimi_audio::{EventEmitter, HeadlessBackend, PlaybackBackend, Player};
use hachimi_core::{
    keys, Error, MemoryPreferences, PlayEvent, PreferenceStore, PreferenceStoreExt, Result,
    SongInfo, SongItem,
};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use url::Url;

// ===== Test Helpers =====

fn song(id: &str, secs: u32) -> SongItem {
    SongItem::local(
        SongInfo::new(id, format!("Song {id}"), "mp3")
            .with_artist("Tester")
            .with_duration_secs(secs),
        vec![0xFFu8; 64],
    )
}

fn preferences(fade_ms: Option<u64>) -> Arc<MemoryPreferences> {
    let prefs = Arc::new(MemoryPreferences::new());
    if let Some(ms) = fade_ms {
        prefs.set_value(keys::FADE_IN_FADE_OUT, &true).unwrap();
        prefs.set_value(keys::FADE_DURATION, &ms).unwrap();
    }
    prefs
}

async fn ready_player(fade_ms: Option<u64>) -> (Player, Arc<HeadlessBackend>, Arc<MemoryPreferences>) {
    let backend = Arc::new(HeadlessBackend::new());
    let prefs = preferences(fade_ms);
    let player = Player::new(backend.clone(), prefs.clone());
    player.initialize().await.unwrap();
    (player, backend, prefs)
}

type EventLog = Arc<Mutex<Vec<&'static str>>>;

fn record_events(player: &Player) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    player.add_listener(move |event: &PlayEvent| sink.lock().push(event.name()));
    log
}

/// Let the dispatcher task deliver queued events.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

struct FailingBackend;

#[async_trait]
impl PlaybackBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn initialize(&self, _events: EventEmitter) -> Result<()> {
        Err(Error::Initialization("no audio session".into()))
    }

    async fn load(&self, _item: &SongItem) -> Result<()> {
        Err(Error::NotInitialized)
    }

    fn play(&self) {}

    fn pause(&self) {}

    fn stop(&self) {}

    async fn seek(&self, _position: Duration) -> Result<()> {
        Ok(())
    }

    fn set_output_gain(&self, _gain: f32) {}

    fn is_playing(&self) -> bool {
        false
    }

    fn is_end(&self) -> bool {
        false
    }

    fn position(&self) -> Duration {
        Duration::ZERO
    }

    async fn release(&self) {}
}

// ===== Lifecycle =====

#[tokio::test]
async fn test_prepare_before_initialize_fails() {
    let player = Player::new(Arc::new(HeadlessBackend::new()), preferences(None));
    let result = player.prepare(song("1", 10), true, false).await;
    assert!(matches!(result, Err(Error::NotInitialized)));
    assert!(!player.is_ready());
}

#[tokio::test]
async fn test_initialize_failure_propagates() {
    let player = Player::new(Arc::new(FailingBackend), preferences(None));
    let result = player.initialize().await;
    assert!(matches!(result, Err(Error::Initialization(_))));
    assert!(matches!(
        player.prepare(song("1", 10), false, false).await,
        Err(Error::NotInitialized)
    ));
}

#[tokio::test]
async fn test_release_twice_and_no_reinitialize() {
    let (player, backend, _) = ready_player(None).await;
    player.initialize().await.unwrap();
    player.prepare(song("1", 10), true, false).await.unwrap();

    player.release().await;
    player.release().await;

    assert!(backend.is_released());
    assert!(!player.is_ready());
    assert!(!player.is_playing());
    assert!(matches!(player.initialize().await, Err(Error::Released)));
    assert!(matches!(
        player.prepare(song("2", 10), true, false).await,
        Err(Error::Released)
    ));
}

#[tokio::test]
async fn test_transport_on_unready_player_is_noop() {
    let (player, backend, _) = ready_player(None).await;

    player.play();
    player.pause(true);
    player.stop();
    player.seek(Duration::from_secs(3), true).await.unwrap();

    assert!(!player.is_playing());
    assert!(!player.is_end());
    assert_eq!(player.current_position(), Duration::ZERO);
    assert_eq!(player.buffered_progress(), 0.0);
    assert!(backend.loaded_id().is_none());
}

// ===== Prepare & events =====

#[tokio::test(start_paused = true)]
async fn test_prepare_auto_play_notifies_every_listener() {
    let (player, backend, _) = ready_player(None).await;
    let first = record_events(&player);
    let second = record_events(&player);

    let item = song("7", 120).with_cover(vec![1u8, 2, 3]);
    player.prepare(item, true, true).await.unwrap();
    settle().await;

    assert!(player.is_ready());
    assert!(player.is_playing());
    assert_eq!(player.output_gain(), 1.0);
    assert_eq!(*first.lock(), vec!["play"]);
    assert_eq!(*second.lock(), vec!["play"]);

    let meta = backend.now_playing().unwrap();
    assert_eq!(meta.title, "Song 7");
    assert_eq!(meta.artist, "Tester");
    assert!(meta.artwork.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_prepare_failure_emits_error_event() {
    let (player, _, _) = ready_player(None).await;
    let log = record_events(&player);

    let broken = SongItem::local(SongInfo::new("bad", "Broken", "mp3"), Vec::new());
    let err = player.prepare(broken, true, false).await.unwrap_err();
    settle().await;

    match err {
        Error::Prepare { id, source } => {
            assert_eq!(id, "bad");
            assert!(matches!(*source, Error::AudioDecode(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(*log.lock(), vec!["error"]);
    assert!(!player.is_ready());
    assert!(!player.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_remote_scheme_is_reported() {
    let (player, _, _) = ready_player(None).await;
    let item = SongItem::remote(
        SongInfo::new("r", "Remote", "flac"),
        Url::parse("gopher://example.com/r.flac").unwrap(),
    );
    let err = player.prepare(item, false, false).await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_end_event_after_song_duration() {
    let (player, _, _) = ready_player(None).await;
    let log = record_events(&player);

    player.prepare(song("short", 2), true, false).await.unwrap();
    sleep(Duration::from_millis(2100)).await;
    settle().await;

    assert!(player.is_end());
    assert!(!player.is_playing());
    assert_eq!(*log.lock(), vec!["play", "end"]);
}

#[tokio::test(start_paused = true)]
async fn test_removed_listener_gets_nothing() {
    let (player, _, _) = ready_player(None).await;
    let kept = record_events(&player);
    let removed: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&removed);
    let id = player.add_listener(move |event: &PlayEvent| sink.lock().push(event.name()));

    assert!(player.remove_listener(id));
    assert!(!player.remove_listener(id));
    player.prepare(song("1", 30), true, false).await.unwrap();
    settle().await;

    assert_eq!(*kept.lock(), vec!["play"]);
    assert!(removed.lock().is_empty());
}

// ===== Fades =====

#[tokio::test(start_paused = true)]
async fn test_fade_in_starts_silent() {
    let (player, backend, _) = ready_player(Some(3000)).await;

    player.prepare(song("1", 60), true, true).await.unwrap();
    assert!(player.fade_multiplier() < 0.01);
    assert!(backend.output_gain() < 0.01);

    sleep(Duration::from_millis(1500)).await;
    assert!((player.fade_multiplier() - 0.5).abs() < 0.05);

    sleep(Duration::from_millis(1600)).await;
    assert_eq!(player.fade_multiplier(), 1.0);
    assert_eq!(backend.output_gain(), 1.0);

    let history = backend.gain_history();
    let start = history.iter().rposition(|gain| *gain == 0.0).unwrap();
    assert!(history[start..].windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_prepare_without_fade_flag_starts_at_full_volume() {
    let (player, backend, _) = ready_player(Some(3000)).await;
    player.prepare(song("1", 60), true, false).await.unwrap();
    assert_eq!(player.fade_multiplier(), 1.0);
    assert_eq!(backend.output_gain(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_pause_with_fade_defers_backend_pause() {
    let (player, _, _) = ready_player(Some(1000)).await;
    let log = record_events(&player);
    player.prepare(song("1", 60), true, false).await.unwrap();

    player.pause(true);
    sleep(Duration::from_millis(500)).await;
    assert!(player.is_playing());

    sleep(Duration::from_millis(600)).await;
    settle().await;
    assert!(!player.is_playing());
    assert_eq!(player.fade_multiplier(), 0.0);
    assert_eq!(*log.lock(), vec!["play", "pause"]);
}

#[tokio::test(start_paused = true)]
async fn test_pause_without_fade_is_immediate() {
    let (player, _, _) = ready_player(Some(1000)).await;
    player.prepare(song("1", 60), true, false).await.unwrap();

    player.pause(false);
    assert!(!player.is_playing());

    player.play();
    assert!(player.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_switching_songs_waits_for_fade_out() {
    let (player, backend, _) = ready_player(Some(1000)).await;
    let log = record_events(&player);
    player.prepare(song("a", 60), true, false).await.unwrap();
    sleep(Duration::from_millis(1200)).await;

    let started = Instant::now();
    player.prepare(song("b", 60), true, true).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(1000));
    settle().await;

    assert_eq!(backend.loaded_id().as_deref(), Some("b"));
    assert!(player.fade_multiplier() < 0.01);
    assert_eq!(*log.lock(), vec!["play", "pause", "play"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_prepares_run_one_at_a_time() {
    let backend = Arc::new(HeadlessBackend::new().with_load_delay(Duration::from_millis(100)));
    let player = Player::new(backend.clone(), preferences(None));
    player.initialize().await.unwrap();
    let log = record_events(&player);

    let started = Instant::now();
    let (a, b, midway) = tokio::join!(
        player.prepare(song("a", 60), true, false),
        player.prepare(song("b", 60), true, false),
        async {
            // Between the two loads: "a" has started, "b" has stopped it.
            sleep(Duration::from_millis(150)).await;
            settle().await;
            log.lock().clone()
        },
    );
    a.unwrap();
    b.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    settle().await;

    assert_eq!(midway, vec!["play", "pause"]);
    assert_eq!(backend.loaded_id().as_deref(), Some("b"));
    assert!(player.is_playing());
    assert_eq!(*log.lock(), vec!["play", "pause", "play"]);
}

// ===== Volume =====

#[tokio::test(start_paused = true)]
async fn test_volume_goes_through_mixer() {
    let (player, backend, _) = ready_player(None).await;
    player.prepare(song("1", 60), true, false).await.unwrap();

    player.set_volume(0.5);
    assert!((backend.output_gain() - 0.5).abs() < 1e-3);

    player.set_volume(2.0);
    assert_eq!(player.volume(), 1.0);
    assert_eq!(backend.output_gain(), 1.0);

    player.set_volume(0.0);
    assert_eq!(backend.output_gain(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_replay_gain_applied_and_toggleable() {
    let (player, backend, prefs) = ready_player(None).await;
    let item = SongItem::local(
        SongInfo::new("loud", "Loud", "mp3")
            .with_duration_secs(60)
            .with_replay_gain_db(-6.0),
        vec![1u8; 8],
    );
    player.prepare(item, true, false).await.unwrap();
    assert!((backend.output_gain() - 0.501).abs() < 1e-3);

    player.set_replay_gain_enabled(false).unwrap();
    assert!(!player.replay_gain_enabled());
    assert_eq!(backend.output_gain(), 1.0);
    assert_eq!(
        prefs.get(keys::REPLAY_GAIN_ENABLED),
        Some(serde_json::Value::Bool(false))
    );
}

#[tokio::test]
async fn test_replay_gain_preference_read_on_initialize() {
    let backend = Arc::new(HeadlessBackend::new());
    let prefs = preferences(None);
    prefs.set_value(keys::REPLAY_GAIN_ENABLED, &false).unwrap();

    let player = Player::new(backend, prefs);
    assert!(player.replay_gain_enabled());
    player.initialize().await.unwrap();
    assert!(!player.replay_gain_enabled());
}

// ===== Seek =====

#[tokio::test(start_paused = true)]
async fn test_seek_with_auto_start() {
    let (player, _, _) = ready_player(None).await;
    let log = record_events(&player);
    player.prepare(song("1", 60), false, false).await.unwrap();
    assert!(!player.is_playing());

    player.seek(Duration::from_secs(20), true).await.unwrap();
    settle().await;

    assert!(player.is_playing());
    assert_eq!(player.current_position(), Duration::from_secs(20));
    assert_eq!(*log.lock(), vec!["seek", "play"]);
}
