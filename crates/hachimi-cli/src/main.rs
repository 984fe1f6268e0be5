//! # Hachimi
//!
//! Command-line player: plays files and URLs in order through the desktop
//! backend (or the headless one), with replay gain and fades.

mod prefs;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hachimi_audio::{DesktopBackend, HeadlessBackend, PlaybackBackend, Player};
use hachimi_core::{FadeSettings, PlayEvent, PreferenceStore};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Extra time allowed for the final fade-out on Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Song length for the headless backend when `--duration-secs` is absent.
const HEADLESS_DEFAULT_SECS: u32 = 180;

/// Command-line arguments for hachimi
#[derive(Parser, Debug)]
#[command(name = "hachimi")]
#[command(about = "Play local files and URLs with replay gain and fades")]
#[command(version)]
struct Args {
    /// Files, or http(s)/file URLs, played in order
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Volume between 0.0 and 1.0
    #[arg(short, long, default_value = "1.0", env = "HACHIMI_VOLUME")]
    volume: f32,

    /// Fade in and out on song changes and pauses
    #[arg(long)]
    fade: bool,

    /// Fade duration in milliseconds
    #[arg(long)]
    fade_ms: Option<u64>,

    /// Ignore replay gain
    #[arg(long)]
    no_replay_gain: bool,

    /// Replay gain in dB applied to every input
    #[arg(long, allow_hyphen_values = true)]
    replay_gain_db: Option<f32>,

    /// Song length in seconds, used by the headless backend
    /// (defaults to 180 with --headless)
    #[arg(long)]
    duration_secs: Option<u32>,

    /// Play on a virtual clock without an audio device
    #[arg(long)]
    headless: bool,

    /// Preferences file (defaults to the platform config directory)
    #[arg(long, env = "HACHIMI_PREFS")]
    prefs: Option<PathBuf>,

    /// Save --fade, --fade-ms and --no-replay-gain to the preferences file
    #[arg(long)]
    save: bool,
}

impl Args {
    fn preference_flags(&self) -> prefs::Flags {
        prefs::Flags {
            file: self.prefs.clone(),
            fade: self.fade,
            fade_ms: self.fade_ms,
            no_replay_gain: self.no_replay_gain,
            save: self.save,
        }
    }

    /// The headless backend ends a song after its tagged duration, so it
    /// needs one even when the input has none.
    fn overrides(&self) -> source::Overrides {
        let duration_secs = match self.duration_secs {
            None if self.headless => Some(HEADLESS_DEFAULT_SECS),
            secs => secs,
        };
        source::Overrides {
            replay_gain_db: self.replay_gain_db,
            duration_secs,
        }
    }
}

enum Outcome {
    Finished,
    Interrupted,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hachimi=info,hachimi_audio=info,hachimi_core=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting Hachimi v{}", env!("CARGO_PKG_VERSION"));
    if args.headless && args.duration_secs.is_none() {
        warn!("No --duration-secs given, headless songs last {HEADLESS_DEFAULT_SECS}s");
    }

    let preferences = prefs::load(&args.preference_flags())?;
    let backend: Arc<dyn PlaybackBackend> = if args.headless {
        Arc::new(HeadlessBackend::new())
    } else {
        Arc::new(DesktopBackend::new())
    };

    let player = Player::new(backend, Arc::clone(&preferences));
    player
        .initialize()
        .await
        .context("Failed to initialize player")?;
    player.set_volume(args.volume);

    let (tx, mut events) = mpsc::unbounded_channel();
    player.add_listener(move |event: &PlayEvent| {
        let _ = tx.send(event.clone());
    });

    let result = play_all(&player, &args, preferences.as_ref(), &mut events).await;
    player.release().await;
    info!("Goodbye");
    result
}

async fn play_all(
    player: &Player,
    args: &Args,
    preferences: &dyn PreferenceStore,
    events: &mut UnboundedReceiver<PlayEvent>,
) -> Result<()> {
    let total = args.inputs.len();
    for (index, input) in args.inputs.iter().enumerate() {
        let item = match source::resolve(input, args.overrides()).await {
            Ok(item) => item,
            Err(e) => {
                warn!("Skipping {input}: {e:#}");
                continue;
            }
        };

        info!(
            "Now playing ({}/{total}): {} - {}",
            index + 1,
            item.title(),
            if item.artist().is_empty() { "Unknown" } else { item.artist() }
        );
        if let Err(e) = player.prepare(item, true, true).await {
            warn!("Skipping {input}: {e}");
            continue;
        }

        if let Outcome::Interrupted = wait_for_song(player, events).await? {
            fade_out(player, preferences, events).await;
            return Ok(());
        }
    }
    Ok(())
}

/// Wait until the current song ends, fails or the user interrupts.
///
/// End and error events only count after this song's `Play`; anything
/// earlier belongs to the previous song.
async fn wait_for_song(player: &Player, events: &mut UnboundedReceiver<PlayEvent>) -> Result<Outcome> {
    let mut started = false;
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PlayEvent::Play) => started = true,
                Some(PlayEvent::End) if started => return Ok(Outcome::Finished),
                Some(PlayEvent::Error(e)) if started => {
                    warn!("Playback failed: {e}");
                    return Ok(Outcome::Finished);
                }
                Some(other) => debug!(event = other.name(), "Player event"),
                None => bail!("Player event channel closed"),
            },
            _ = status.tick() => {
                if player.is_playing() {
                    info!(
                        position_secs = player.current_position().as_secs(),
                        buffered = player.buffered_progress(),
                        "Playing"
                    );
                }
            }
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, stopping");
                return Ok(Outcome::Interrupted);
            }
        }
    }
}

async fn fade_out(
    player: &Player,
    preferences: &dyn PreferenceStore,
    events: &mut UnboundedReceiver<PlayEvent>,
) {
    let settings = FadeSettings::load(preferences);
    let playing = player.is_playing();
    player.pause(true);
    if !playing || !settings.is_active() {
        return;
    }

    let paused = async {
        while let Some(event) = events.recv().await {
            if matches!(event, PlayEvent::Pause) {
                break;
            }
        }
    };
    if tokio::time::timeout(settings.duration + SHUTDOWN_GRACE, paused)
        .await
        .is_err()
    {
        warn!("Fade-out did not finish in time");
    }
}
