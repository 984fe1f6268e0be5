//! Persistent user preferences read by the player.
//!
//! Values are stored as JSON so the same store can hold any setting the
//! surrounding client needs; the player only reads the keys in [`keys`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Preference keys consumed by the player.
pub mod keys {
    /// Whether transitions fade in and out.
    pub const FADE_IN_FADE_OUT: &str = "fade_in_fade_out";
    /// Fade duration in milliseconds.
    pub const FADE_DURATION: &str = "fade_duration";
    /// Whether per-song replay gain is applied.
    pub const REPLAY_GAIN_ENABLED: &str = "replay_gain_enabled";
}

pub const DEFAULT_FADE_DURATION_MS: u64 = 3000;

/// A key/value store of JSON preference values.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key. Returns the previous value, if any.
    fn remove(&self, key: &str) -> Result<Option<Value>>;
}

/// Typed access on top of [`PreferenceStore`].
pub trait PreferenceStoreExt: PreferenceStore {
    /// Read `key` as `T`, falling back to `default` when the key is missing
    /// or holds a value of another type.
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(key, error = %e, "Ignoring malformed preference value");
                default
            }),
            None => default,
        }
    }

    fn set_value<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }
}

impl<S: PreferenceStore + ?Sized> PreferenceStoreExt for S {}

/// In-memory preferences. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.write().remove(key))
    }
}

/// Preferences persisted as a single JSON object on disk.
///
/// Every `set`/`remove` rewrites the file.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: RwLock<HashMap<String, Value>>,
}

impl FilePreferences {
    /// Open the preferences file in the platform config directory.
    pub fn open_default() -> Result<Self> {
        let project_dirs = ProjectDirs::from("world", "hachimi", "Hachimi").ok_or_else(|| {
            Error::Preferences("Failed to determine config directory".to_string())
        })?;

        Self::open(project_dirs.config_dir().join("preferences.json"))
    }

    /// Open (or lazily create) the preferences file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(raw) if raw.is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                Error::Preferences(format!("Corrupt preferences file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), entries = values.len(), "Preferences loaded");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Preferences(format!("Failed to create config directory: {e}"))
            })?;
        }
        let raw = serde_json::to_vec_pretty(values)?;
        std::fs::write(&self.path, raw)?;
        debug!(path = %self.path.display(), "Preferences written");
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<Option<Value>> {
        let mut values = self.values.write();
        let previous = values.remove(key);
        if previous.is_some() {
            self.persist(&values)?;
        }
        Ok(previous)
    }
}

/// Fade configuration snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeSettings {
    pub enabled: bool,
    pub duration: Duration,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::from_millis(DEFAULT_FADE_DURATION_MS),
        }
    }
}

impl FadeSettings {
    /// Fading turned off.
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            duration: Duration::ZERO,
        }
    }

    pub const fn enabled(duration: Duration) -> Self {
        Self {
            enabled: true,
            duration,
        }
    }

    /// Read the current fade settings from `store`.
    pub fn load(store: &dyn PreferenceStore) -> Self {
        Self {
            enabled: store.get_or(keys::FADE_IN_FADE_OUT, false),
            duration: Duration::from_millis(
                store.get_or(keys::FADE_DURATION, DEFAULT_FADE_DURATION_MS),
            ),
        }
    }

    /// Whether a fade with these settings produces any frames.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.duration.is_zero()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fade_settings_defaults() {
        let store = MemoryPreferences::new();
        let settings = FadeSettings::load(&store);
        assert!(!settings.enabled);
        assert_eq!(settings.duration, Duration::from_millis(3000));
        assert!(!settings.is_active());
    }

    #[test]
    fn test_fade_settings_from_store() {
        let store = MemoryPreferences::new();
        store.set(keys::FADE_IN_FADE_OUT, json!(true)).unwrap();
        store.set(keys::FADE_DURATION, json!(1200)).unwrap();

        let settings = FadeSettings::load(&store);
        assert_eq!(settings, FadeSettings::enabled(Duration::from_millis(1200)));
        assert!(settings.is_active());
        assert!(!FadeSettings::enabled(Duration::ZERO).is_active());
    }

    #[test]
    fn test_malformed_value_falls_back_to_default() {
        let store = MemoryPreferences::new();
        store.set(keys::FADE_DURATION, json!("soon")).unwrap();
        assert_eq!(store.get_or(keys::FADE_DURATION, 42u64), 42);
    }

    #[test]
    fn test_memory_remove() {
        let store = MemoryPreferences::new();
        store.set_value(keys::REPLAY_GAIN_ENABLED, &false).unwrap();
        assert_eq!(store.remove(keys::REPLAY_GAIN_ENABLED).unwrap(), Some(json!(false)));
        assert_eq!(store.remove(keys::REPLAY_GAIN_ENABLED).unwrap(), None);
        assert!(store.get_or(keys::REPLAY_GAIN_ENABLED, true));
    }

    #[test]
    fn test_file_preferences_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");

        let prefs = FilePreferences::open(&path).unwrap();
        assert!(prefs.get(keys::FADE_IN_FADE_OUT).is_none());
        prefs.set(keys::FADE_IN_FADE_OUT, json!(true)).unwrap();
        prefs.set(keys::FADE_DURATION, json!(500)).unwrap();
        drop(prefs);

        let reopened = FilePreferences::open(&path).unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(
            FadeSettings::load(&reopened),
            FadeSettings::enabled(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_file_preferences_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FilePreferences::open(&path).unwrap_err();
        assert!(matches!(err, Error::Preferences(_)));
    }
}
