//! Turning command-line inputs into playable songs.

use std::path::Path;

use anyhow::{Context, Result};
use hachimi_core::{SongInfo, SongItem};
use url::Url;

/// Per-run metadata applied to every input.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub replay_gain_db: Option<f32>,
    pub duration_secs: Option<u32>,
}

/// Resolve `input` to a song. URLs stay remote; anything else is read from
/// disk into memory.
pub async fn resolve(input: &str, overrides: Overrides) -> Result<SongItem> {
    if let Some(url) = parse_url(input) {
        let info = song_info(input, url.path(), overrides);
        return Ok(SongItem::remote(info, url));
    }

    let audio = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {input}"))?;
    let info = song_info(input, input, overrides);
    Ok(SongItem::local(info, audio))
}

/// Only schemes the backends can fetch count as URLs; `C:\music.mp3` parses
/// as a URL with scheme `c`.
fn parse_url(input: &str) -> Option<Url> {
    Url::parse(input)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https" | "file"))
}

fn song_info(id: &str, path: &str, overrides: Overrides) -> SongInfo {
    let path = Path::new(path);
    let title = path
        .file_stem()
        .map_or_else(|| id.to_string(), |stem| stem.to_string_lossy().into_owned());
    let format = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mut info = SongInfo::new(id, title, format);
    if let Some(db) = overrides.replay_gain_db {
        info = info.with_replay_gain_db(db);
    }
    if let Some(secs) = overrides.duration_secs {
        info = info.with_duration_secs(secs);
    }
    info
}
