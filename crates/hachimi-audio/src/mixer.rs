//! Volume mixing: replay gain plus user volume to a linear output gain.
//!
//! The final gain pushed to a backend is
//! `mix_volume(replay_gain_db, volume) * fade_multiplier`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::trace;

/// Convert a decibel offset to a linear amplitude multiplier.
pub fn gain_to_multiplier(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Convert a linear amplitude to decibels. Zero maps to negative infinity.
pub fn linear_to_db(value: f32) -> f32 {
    20.0 * value.log10()
}

/// Combine a replay gain offset (dB) with a user volume (linear, 0..=1).
///
/// Always returns a value in `[0, 1]`. A volume of zero, or any input that
/// makes the combined decibel value non-finite, yields silence.
pub fn mix_volume(replay_gain_db: f32, volume: f32) -> f32 {
    let volume_db = linear_to_db(volume);
    let total_db = replay_gain_db + volume_db;

    let gain = if total_db.is_finite() {
        gain_to_multiplier(total_db).clamp(0.0, 1.0)
    } else {
        0.0
    };

    trace!(replay_gain_db, volume, volume_db, total_db, gain, "Mixed volume");
    gain
}

/// Lock-free mixer inputs shared between the player and fade frames.
#[derive(Debug)]
pub struct MixerState {
    volume_bits: AtomicU32,
    replay_gain_db_bits: AtomicU32,
    replay_gain_enabled: AtomicBool,
}

impl Default for MixerState {
    fn default() -> Self {
        Self {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            replay_gain_db_bits: AtomicU32::new(0.0f32.to_bits()),
            replay_gain_enabled: AtomicBool::new(true),
        }
    }
}

impl MixerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// User volume in `[0, 1]`.
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Set the user volume. Clamped to `[0, 1]`; NaN is treated as silence.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Replay gain of the current song, in dB.
    pub fn replay_gain_db(&self) -> f32 {
        f32::from_bits(self.replay_gain_db_bits.load(Ordering::Relaxed))
    }

    pub fn set_replay_gain_db(&self, db: f32) {
        self.replay_gain_db_bits.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn replay_gain_enabled(&self) -> bool {
        self.replay_gain_enabled.load(Ordering::Relaxed)
    }

    pub fn set_replay_gain_enabled(&self, enabled: bool) {
        self.replay_gain_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Replay gain actually applied: zero when normalization is off.
    pub fn effective_replay_gain_db(&self) -> f32 {
        if self.replay_gain_enabled() {
            self.replay_gain_db()
        } else {
            0.0
        }
    }

    /// Gain for the backend given the current fade multiplier.
    pub fn output_gain(&self, fade_multiplier: f32) -> f32 {
        mix_volume(self.effective_replay_gain_db(), self.volume()) * fade_multiplier.clamp(0.0, 1.0)
    }
}
