//! Audio decoding using symphonia.

use std::time::Duration;

use hachimi_core::{Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::Time,
};
use tracing::{debug, warn};

/// Build a probe hint from a song's format, either an extension or a MIME type.
pub fn hint_for(format: &str) -> Hint {
    let format = format.trim().to_ascii_lowercase();
    let mut hint = Hint::new();
    if format.is_empty() {
        return hint;
    }

    if format.contains('/') {
        hint.mime_type(&format);
        let extension = if format.contains("flac") {
            "flac"
        } else if format.contains("mpeg") || format.contains("mp3") {
            "mp3"
        } else if format.contains("mp4") || format.contains("m4a") || format.contains("aac") {
            "m4a"
        } else if format.contains("ogg") || format.contains("vorbis") || format.contains("opus") {
            "ogg"
        } else if format.contains("wav") {
            "wav"
        } else if format.contains("webm") {
            "webm"
        } else {
            return hint;
        };
        hint.with_extension(extension);
    } else {
        hint.with_extension(format.trim_start_matches('.'));
    }
    hint
}

/// Decoder for one in-memory song.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    samples: Option<SampleBuffer<f32>>,
}

impl AudioDecoder {
    /// Probe and open any byte source, such as a download still in progress.
    pub fn from_source(source: Box<dyn MediaSource>, format_hint: &str) -> Result<Self> {
        let source = MediaSourceStream::new(source, MediaSourceStreamOptions::default());
        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(
                &hint_for(format_hint),
                source,
                &format_opts,
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => Error::UnsupportedFormat(format!(
                    "{format_hint}: {what}"
                )),
                other => Error::AudioDecode(format!("Failed to probe format: {other}")),
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::AudioDecode("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::AudioDecode("Unknown sample rate".to_string()))?;
        let channels = track.codec_params.channels.map_or(2, |c| c.count());

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("No decoder for track: {e}")))?;

        debug!(track_id, sample_rate, channels, "Decoder ready");

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            samples: None,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Total duration, when the container reports it.
    pub fn duration(&self) -> Option<Duration> {
        let track = self
            .format
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)?;
        let time_base = track.codec_params.time_base?;
        let frames = track.codec_params.n_frames?;
        let time = time_base.calc_time(frames);
        Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
    }

    /// Decode the next packet into interleaved `f32` samples.
    ///
    /// Returns `Ok(None)` at end of stream. Corrupt packets are skipped.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::ConnectionAborted =>
                {
                    return Err(Error::Cancelled);
                }
                Err(e) => return Err(Error::AudioDecode(format!("Failed to read packet: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(Error::AudioDecode(format!("Decode failed: {e}"))),
            };

            let spec = *decoded.spec();
            self.channels = spec.channels.count();
            let frames = decoded.capacity() as u64;
            let needed = frames as usize * self.channels;
            if self.samples.as_ref().is_some_and(|b| b.capacity() < needed) {
                self.samples = None;
            }
            let buffer = self
                .samples
                .get_or_insert_with(|| SampleBuffer::new(frames, spec));
            buffer.copy_interleaved_ref(decoded);
            return Ok(Some(buffer.samples().to_vec()));
        }
    }

    pub fn seek(&mut self, position: Duration) -> Result<()> {
        let time = Time::new(position.as_secs(), f64::from(position.subsec_nanos()) / 1e9);
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::AudioDecode(format!("Seek failed: {e}")))?;
        self.decoder.reset();
        Ok(())
    }
}
