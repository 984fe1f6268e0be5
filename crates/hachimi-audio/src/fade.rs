//! Fade controller: sigmoid-eased ramps of the fade multiplier.
//!
//! At most one fade runs at a time. Starting a fade, cancelling, or setting
//! the multiplier directly supersedes the running fade: it writes no more
//! frames, never snaps to its target and never calls its `on_finish`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hachimi_core::{Error, FadeSettings, Result};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Time between fade frames (about 60 Hz).
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

const EASING_STEEPNESS: f32 = 12.0;

/// Callback run once when a fade reaches its target.
pub type OnFinish = Box<dyn FnOnce() + Send + 'static>;

/// Logistic S-curve over `t` in `[0, 1]`, centred on 0.5.
pub fn ease(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 / (1.0 + (-EASING_STEEPNESS * (t - 0.5)).exp())
}

/// Multiplier of a fade from `start` to `target` after `elapsed`.
///
/// Returns exactly `target` once `elapsed >= duration`.
pub fn fade_value(start: f32, target: f32, elapsed: Duration, duration: Duration) -> f32 {
    if elapsed >= duration {
        return target;
    }
    let t = elapsed.as_secs_f32() / duration.as_secs_f32();
    start + (target - start) * ease(t)
}

struct FadeState {
    multiplier: f32,
    generation: u64,
    job: Option<JoinHandle<()>>,
}

impl FadeState {
    /// Invalidate the running fade, if any.
    fn supersede(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        if let Some(job) = self.job.take() {
            job.abort();
        }
        self.generation
    }
}

struct Shared {
    state: Mutex<FadeState>,
    apply: Box<dyn Fn(f32) + Send + Sync>,
}

enum Step {
    Continue,
    Finished,
    Superseded,
}

impl Shared {
    fn set(&self, state: &mut FadeState, multiplier: f32) {
        state.multiplier = multiplier;
        (self.apply)(multiplier);
    }

    fn step(
        &self,
        generation: u64,
        start: f32,
        target: f32,
        elapsed: Duration,
        duration: Duration,
        on_finish: &mut Option<OnFinish>,
    ) -> Step {
        let mut state = self.state.lock();
        if state.generation != generation {
            return Step::Superseded;
        }

        let multiplier = fade_value(start, target, elapsed, duration);
        trace!(multiplier, elapsed_ms = elapsed.as_millis(), "Fade frame");
        self.set(&mut state, multiplier);

        if elapsed < duration {
            return Step::Continue;
        }

        state.job = None;
        if let Some(on_finish) = on_finish.take() {
            on_finish();
        }
        Step::Finished
    }
}

/// Resolves when a fade completes.
///
/// Dropping the ticket does not cancel the fade.
#[derive(Debug)]
pub struct FadeTicket {
    rx: oneshot::Receiver<Result<()>>,
}

impl FadeTicket {
    fn resolved() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self { rx }
    }

    /// Wait for the fade. Resolves to [`Error::Cancelled`] if it was
    /// superseded or cancelled.
    pub async fn finished(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Outcome without waiting: `None` while the fade is still running.
    pub fn try_result(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::Cancelled)),
        }
    }
}

/// Drives the fade multiplier and pushes every new value to `apply`.
///
/// `on_finish` callbacks run while the controller's state is locked; they
/// must not call back into the controller.
pub struct FadeController {
    shared: Arc<Shared>,
}

impl FadeController {
    pub fn new(initial: f32, apply: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(FadeState {
                    multiplier: initial.clamp(0.0, 1.0),
                    generation: 0,
                    job: None,
                }),
                apply: Box::new(apply),
            }),
        }
    }

    /// Current multiplier.
    pub fn multiplier(&self) -> f32 {
        self.shared.state.lock().multiplier
    }

    pub fn is_fading(&self) -> bool {
        self.shared.state.lock().job.is_some()
    }

    /// Ramp the multiplier to `target`, superseding any running fade.
    ///
    /// With fading disabled (or a zero duration) the target is applied and
    /// `on_finish` runs before this returns. Without a Tokio runtime the
    /// fade also degrades to an instant switch.
    pub fn fade_to(
        &self,
        target: f32,
        settings: FadeSettings,
        on_finish: Option<OnFinish>,
    ) -> FadeTicket {
        let target = target.clamp(0.0, 1.0);
        let mut state = self.shared.state.lock();
        let generation = state.supersede();

        let runtime = if settings.is_active() {
            match Handle::try_current() {
                Ok(runtime) => Some(runtime),
                Err(_) => {
                    warn!("No async runtime available, applying fade instantly");
                    None
                }
            }
        } else {
            None
        };

        let Some(runtime) = runtime else {
            self.shared.set(&mut state, target);
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            return FadeTicket::resolved();
        };

        let start = state.multiplier;
        debug!(
            start,
            target,
            duration_ms = settings.duration.as_millis(),
            "Starting fade"
        );

        let (tx, rx) = oneshot::channel();
        let job = runtime.spawn(run_fade(
            Arc::clone(&self.shared),
            generation,
            start,
            target,
            settings.duration,
            on_finish,
            tx,
        ));
        state.job = Some(job);

        FadeTicket { rx }
    }

    /// Abort the running fade, leaving the multiplier at its last value.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if state.job.is_some() {
            debug!(multiplier = state.multiplier, "Fade cancelled");
        }
        state.supersede();
    }

    /// Cancel any fade and jump straight to `multiplier`.
    pub fn set_multiplier(&self, multiplier: f32) {
        let mut state = self.shared.state.lock();
        state.supersede();
        self.shared.set(&mut state, multiplier.clamp(0.0, 1.0));
    }

    /// Push the current multiplier again, e.g. after the volume changed.
    pub fn reapply(&self) {
        let mut state = self.shared.state.lock();
        let multiplier = state.multiplier;
        self.shared.set(&mut state, multiplier);
    }
}

impl Drop for FadeController {
    fn drop(&mut self) {
        self.shared.state.lock().supersede();
    }
}

impl fmt::Debug for FadeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FadeController")
            .field("multiplier", &state.multiplier)
            .field("fading", &state.job.is_some())
            .finish_non_exhaustive()
    }
}

async fn run_fade(
    shared: Arc<Shared>,
    generation: u64,
    start: f32,
    target: f32,
    duration: Duration,
    mut on_finish: Option<OnFinish>,
    done: oneshot::Sender<Result<()>>,
) {
    let started = Instant::now();
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        frames.tick().await;
        match shared.step(
            generation,
            start,
            target,
            started.elapsed(),
            duration,
            &mut on_finish,
        ) {
            Step::Continue => {}
            Step::Finished => {
                debug!(target, "Fade finished");
                let _ = done.send(Ok(()));
                return;
            }
            Step::Superseded => return,
        }
    }
}
