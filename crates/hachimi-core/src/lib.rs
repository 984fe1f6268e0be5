//! # hachimi-core
//!
//! Core types, preferences, and error handling for the Hachimi player engine.

pub mod error;
pub mod settings;
pub mod types;

pub use error::{Error, HttpError, Result};
pub use settings::{
    keys, FadeSettings, FilePreferences, MemoryPreferences, PreferenceStore, PreferenceStoreExt,
};
pub use types::*;
