//! Playable song items and the now-playing metadata derived from them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

/// Metadata shared by every song item regardless of where its audio lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SongInfo {
    /// Catalogue ID of the song.
    pub id: String,
    /// Song title.
    pub title: String,
    /// Artist display name.
    pub artist: String,
    /// Duration reported by the catalogue, in seconds.
    pub duration_secs: u32,
    /// Container/codec hint, either an extension (`"mp3"`) or a MIME type.
    pub format: String,
    /// Loudness-normalization offset in decibels.
    pub replay_gain_db: f32,
}

impl SongInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: String::new(),
            duration_secs: 0,
            format: format.into(),
            replay_gain_db: 0.0,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    #[must_use]
    pub const fn with_duration_secs(mut self, duration_secs: u32) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    #[must_use]
    pub const fn with_replay_gain_db(mut self, replay_gain_db: f32) -> Self {
        self.replay_gain_db = replay_gain_db;
        self
    }

    /// Catalogue duration as a [`std::time::Duration`].
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.duration_secs))
    }
}

/// A song ready to be handed to the player.
///
/// `Local` items own their audio in memory and are dropped once playback
/// moves on; `Remote` items only reference a URL.
#[derive(Debug, Clone, PartialEq)]
pub enum SongItem {
    Local {
        info: SongInfo,
        audio: Bytes,
        cover: Option<Bytes>,
    },
    Remote {
        info: SongInfo,
        audio_url: Url,
        cover_url: Option<Url>,
    },
}

impl SongItem {
    /// Create a local item from in-memory audio bytes.
    pub fn local(info: SongInfo, audio: impl Into<Bytes>) -> Self {
        Self::Local {
            info,
            audio: audio.into(),
            cover: None,
        }
    }

    /// Create a remote item streamed from `audio_url`.
    pub const fn remote(info: SongInfo, audio_url: Url) -> Self {
        Self::Remote {
            info,
            audio_url,
            cover_url: None,
        }
    }

    /// Attach cover art bytes. No-op for remote items.
    #[must_use]
    pub fn with_cover(mut self, bytes: impl Into<Bytes>) -> Self {
        if let Self::Local { cover, .. } = &mut self {
            *cover = Some(bytes.into());
        }
        self
    }

    /// Attach a cover art URL. No-op for local items.
    #[must_use]
    pub fn with_cover_url(mut self, url: Url) -> Self {
        if let Self::Remote { cover_url, .. } = &mut self {
            *cover_url = Some(url);
        }
        self
    }

    pub const fn info(&self) -> &SongInfo {
        match self {
            Self::Local { info, .. } | Self::Remote { info, .. } => info,
        }
    }

    pub fn id(&self) -> &str {
        &self.info().id
    }

    pub fn title(&self) -> &str {
        &self.info().title
    }

    pub fn artist(&self) -> &str {
        &self.info().artist
    }

    pub fn format(&self) -> &str {
        &self.info().format
    }

    pub const fn replay_gain_db(&self) -> f32 {
        self.info().replay_gain_db
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Cover art for OS now-playing integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artwork {
    Bytes(Bytes),
    Url(Url),
}

/// Metadata published to the OS media session when a song is prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub artwork: Option<Artwork>,
}

impl From<&SongItem> for NowPlaying {
    fn from(item: &SongItem) -> Self {
        let artwork = match item {
            SongItem::Local { cover, .. } => cover.clone().map(Artwork::Bytes),
            SongItem::Remote { cover_url, .. } => cover_url.clone().map(Artwork::Url),
        };
        Self {
            title: item.title().to_string(),
            artist: item.artist().to_string(),
            artwork,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;

    fn info() -> SongInfo {
        SongInfo::new("7", "Hachimi", "flac")
            .with_artist("Cat")
            .with_duration_secs(215)
            .with_replay_gain_db(-4.5)
    }

    #[test]
    fn test_shared_fields_on_both_variants() {
        let local = SongItem::local(info(), vec![1u8, 2, 3]);
        let remote = SongItem::remote(info(), Url::parse("https://cdn.example/7.flac").unwrap());

        for item in [&local, &remote] {
            assert_eq!(item.format(), "flac");
            assert!((item.replay_gain_db() + 4.5).abs() < f32::EPSILON);
            assert_eq!(item.id(), "7");
        }
        assert!(local.is_local());
        assert!(remote.is_remote());
        assert_eq!(info().duration(), std::time::Duration::from_secs(215));
    }

    #[test]
    fn test_cover_only_applies_to_matching_variant() {
        let url = Url::parse("https://cdn.example/cover.jpg").unwrap();
        let local = SongItem::local(info(), Bytes::from_static(b"abc")).with_cover_url(url.clone());
        assert!(matches!(local, SongItem::Local { cover: None, .. }));

        let remote = SongItem::remote(info(), url.clone()).with_cover(Bytes::from_static(b"png"));
        assert!(matches!(remote, SongItem::Remote { cover_url: None, .. }));
    }

    #[test]
    fn test_now_playing_from_item() {
        let local = SongItem::local(info(), Bytes::from_static(b"abc"))
            .with_cover(Bytes::from_static(b"png"));
        let meta = NowPlaying::from(&local);
        assert_eq!(meta.title, "Hachimi");
        assert_eq!(meta.artist, "Cat");
        assert_eq!(meta.artwork, Some(Artwork::Bytes(Bytes::from_static(b"png"))));

        let cover = Url::parse("https://cdn.example/cover.jpg").unwrap();
        let remote = SongItem::remote(info(), Url::parse("https://cdn.example/7.flac").unwrap())
            .with_cover_url(cover.clone());
        assert_eq!(NowPlaying::from(&remote).artwork, Some(Artwork::Url(cover)));
    }
}
