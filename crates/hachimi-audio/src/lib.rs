//! # hachimi-audio
//!
//! Playback engine for Hachimi.
//!
//! - [`mixer`]: replay gain and user volume to a linear gain
//! - [`fade`]: sigmoid-eased fade multiplier ramps
//! - [`backend`]: the platform backend trait and its event channel
//! - [`Player`]: the facade tying them together with listeners
//!
//! Backends: [`HeadlessBackend`] everywhere, `DesktopBackend` with the
//! `desktop` feature (cpal + symphonia).

pub mod backend;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod fade;
pub mod headless;
pub mod listener;
pub mod mixer;
pub mod player;

pub use backend::{EventEmitter, PlaybackBackend};
#[cfg(feature = "desktop")]
pub use desktop::DesktopBackend;
pub use fade::{FadeController, FadeTicket, OnFinish};
pub use headless::HeadlessBackend;
pub use listener::{Listener, ListenerId, ListenerRegistry};
pub use mixer::{mix_volume, MixerState};
pub use player::Player;
