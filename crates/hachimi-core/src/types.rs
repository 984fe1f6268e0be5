//! Core domain types for the player engine.

pub mod event;
pub mod song;

pub use event::PlayEvent;
pub use song::{Artwork, NowPlaying, SongInfo, SongItem};
