//! Audio output using cpal.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use hachimi_core::{Error, Result};
use tracing::{debug, error, info, trace};

use super::ring::SampleRing;

/// Samples buffered between the worker and the device (about 2.7 s of
/// 48 kHz stereo).
pub const RING_CAPACITY: usize = 1 << 18;

/// State shared by the backend handle, the worker thread and the device
/// callback.
pub struct StreamShared {
    pub ring: SampleRing,
    gain_bits: AtomicU32,
    playing: AtomicBool,
    ended: AtomicBool,
    frames_played: AtomicU64,
    sample_rate: AtomicU32,
    channels: AtomicU32,
}

impl Default for StreamShared {
    fn default() -> Self {
        Self {
            ring: SampleRing::new(RING_CAPACITY),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            channels: AtomicU32::new(0),
        }
    }
}

impl StreamShared {
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn set_ended(&self, ended: bool) {
        self.ended.store(ended, Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::Relaxed) as usize
    }

    /// Position derived from frames the device has actually consumed.
    pub fn position(&self) -> Duration {
        let rate = self.sample_rate();
        if rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.frames_played.load(Ordering::Relaxed);
        Duration::from_secs_f64(frames as f64 / f64::from(rate))
    }

    pub fn set_position(&self, position: Duration) {
        let frames = (position.as_secs_f64() * f64::from(self.sample_rate())) as u64;
        self.frames_played.store(frames, Ordering::Relaxed);
    }

    fn advance(&self, frames: u64) {
        self.frames_played.fetch_add(frames, Ordering::Relaxed);
    }

    fn set_format(&self, sample_rate: u32, channels: u16) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.channels.store(u32::from(channels), Ordering::Relaxed);
    }
}

/// Fill one device buffer from the ring, applying the output gain.
///
/// Returns the number of whole frames taken from the ring.
fn render(shared: &StreamShared, scratch: &mut Vec<f32>, len: usize, channels: usize) -> u64 {
    scratch.clear();
    scratch.resize(len, 0.0);
    if !shared.is_playing() {
        shared.ring.discard_cleared();
        return 0;
    }

    let read = shared.ring.read(scratch);
    let gain = shared.gain();
    for sample in &mut scratch[..read] {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
    if read < len {
        trace!(needed = len, got = read, "Output underrun");
    }
    (read / channels.max(1)) as u64
}

/// An open output stream on the default device.
///
/// Owns the `cpal::Stream`, which must stay on the thread that created it.
pub struct AudioOutput {
    _stream: Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

impl AudioOutput {
    pub fn open(shared: Arc<StreamShared>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Initialization("No output device found".to_string()))?;
        Self::with_device(&device, shared)
    }

    pub fn with_device(device: &Device, shared: Arc<StreamShared>) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = device
            .default_output_config()
            .map_err(|e| Error::Initialization(format!("Failed to get output config: {e}")))?;
        debug!(?supported, "Default output config");

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        shared.set_format(config.sample_rate.0, config.channels);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(device, &config, shared)?,
            SampleFormat::I16 => build_stream::<i16>(device, &config, shared)?,
            SampleFormat::U16 => build_stream::<u16>(device, &config, shared)?,
            other => {
                return Err(Error::Initialization(format!(
                    "Unsupported sample format: {other:?}"
                )));
            }
        };
        stream
            .play()
            .map_err(|e| Error::Initialization(format!("Failed to start stream: {e}")))?;

        info!(
            device = %device_name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "Audio output opened"
        );

        Ok(Self {
            _stream: stream,
            device_name,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }
}

fn build_stream<T>(device: &Device, config: &StreamConfig, shared: Arc<StreamShared>) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels);
    let mut scratch = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = render(&shared, &mut scratch, data.len(), channels);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(*sample);
                }
                shared.advance(frames);
            },
            |err| error!("Audio stream error: {err}"),
            None,
        )
        .map_err(|e| Error::Initialization(format!("Failed to build stream: {e}")))
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_render_applies_gain() {
        let shared = StreamShared::default();
        shared.set_format(48000, 2);
        shared.ring.write(&[0.5, -0.5, 1.0, -1.0]);
        shared.set_gain(0.5);
        shared.set_playing(true);

        let mut scratch = Vec::new();
        let frames = render(&shared, &mut scratch, 6, 2);
        assert_eq!(frames, 2);
        assert_eq!(scratch, vec![0.25, -0.25, 0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_render_silent_when_paused() {
        let shared = StreamShared::default();
        shared.ring.write(&[0.5; 4]);

        let mut scratch = Vec::new();
        assert_eq!(render(&shared, &mut scratch, 4, 2), 0);
        assert_eq!(scratch, vec![0.0; 4]);
        assert_eq!(shared.ring.available(), 4);
    }

    #[test]
    fn test_paused_render_applies_clear() {
        let shared = StreamShared::default();
        shared.ring.write(&[0.5; 8]);
        shared.ring.clear();
        assert_eq!(shared.ring.free(), RING_CAPACITY - 8);

        let mut scratch = Vec::new();
        render(&shared, &mut scratch, 4, 2);
        assert_eq!(shared.ring.free(), RING_CAPACITY);
    }

    #[test]
    fn test_position_from_frames() {
        let shared = StreamShared::default();
        assert_eq!(shared.position(), Duration::ZERO);

        shared.set_format(48000, 2);
        shared.advance(24000);
        assert_eq!(shared.position(), Duration::from_millis(500));
        shared.set_position(Duration::from_secs(2));
        assert_eq!(shared.position(), Duration::from_secs(2));
    }
}
