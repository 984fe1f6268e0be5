//! Session preferences: the saved file with command-line flags on top.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hachimi_core::{keys, FilePreferences, MemoryPreferences, PreferenceStore, PreferenceStoreExt};
use tracing::{debug, warn};

const LAYERED_KEYS: [&str; 3] = [
    keys::FADE_IN_FADE_OUT,
    keys::FADE_DURATION,
    keys::REPLAY_GAIN_ENABLED,
];

/// Flags that override saved preferences for this run.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub file: Option<PathBuf>,
    pub fade: bool,
    pub fade_ms: Option<u64>,
    pub no_replay_gain: bool,
    /// Write the overrides back to the preferences file.
    pub save: bool,
}

impl Flags {
    fn apply(&self, store: &dyn PreferenceStore) -> Result<()> {
        if self.fade {
            store.set_value(keys::FADE_IN_FADE_OUT, &true)?;
        }
        if let Some(ms) = self.fade_ms {
            store.set_value(keys::FADE_DURATION, &ms)?;
        }
        if self.no_replay_gain {
            store.set_value(keys::REPLAY_GAIN_ENABLED, &false)?;
        }
        Ok(())
    }
}

/// Build the store the player reads from.
///
/// Without `--save` the file is only read: overrides land in an in-memory
/// copy, so a one-off `--fade` does not stick. An unreadable default file
/// falls back to defaults with a warning; an explicit `--prefs` path must
/// load.
pub fn load(flags: &Flags) -> Result<Arc<dyn PreferenceStore>> {
    let file = match &flags.file {
        Some(path) => Some(
            FilePreferences::open(path)
                .with_context(|| format!("Failed to open preferences {}", path.display()))?,
        ),
        None => match FilePreferences::open_default() {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Using default preferences: {e}");
                None
            }
        },
    };

    if flags.save {
        if let Some(file) = file {
            flags.apply(&file)?;
            debug!(path = %file.path().display(), "Saved preference overrides");
            return Ok(Arc::new(file));
        }
        warn!("No preferences file available, overrides will not be saved");
    }

    let session = MemoryPreferences::new();
    if let Some(file) = &file {
        for key in LAYERED_KEYS {
            if let Some(value) = file.get(key) {
                session.set(key, value)?;
            }
        }
    }
    flags.apply(&session)?;
    Ok(Arc::new(session))
}
