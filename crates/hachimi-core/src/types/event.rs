//! Playback events pushed from backends to listeners.

use std::sync::Arc;
use std::time::Duration;

use crate::Error;

/// A transition observed by the playback backend.
///
/// Events are pushed to every registered listener; nothing polls for them.
#[derive(Debug, Clone)]
pub enum PlayEvent {
    /// Output started or resumed.
    Play,
    /// Output paused or stopped before the end of the song.
    Pause,
    /// The song played through to its end.
    End,
    /// Loading or decoding failed. Playback is stopped.
    Error(Arc<Error>),
    /// A seek completed at the given position.
    Seek(Duration),
}

impl PlayEvent {
    /// Short label for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::End => "end",
            Self::Error(_) => "error",
            Self::Seek(_) => "seek",
        }
    }
}

impl From<Error> for PlayEvent {
    fn from(error: Error) -> Self {
        Self::Error(Arc::new(error))
    }
}
