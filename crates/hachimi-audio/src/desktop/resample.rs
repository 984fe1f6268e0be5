//! Sample-rate conversion to the output device rate.

use hachimi_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as _};
use tracing::debug;

const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Converts interleaved audio between sample rates.
///
/// Input is buffered until a full chunk is available. Equal rates pass
/// samples through untouched.
pub struct Resampler {
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let channels = channels.max(1);
        let inner = if input_rate == output_rate {
            None
        } else {
            debug!(input_rate, output_rate, channels, "Resampling enabled");
            Some(
                FftFixedIn::new(
                    input_rate as usize,
                    output_rate as usize,
                    CHUNK_FRAMES,
                    SUB_CHUNKS,
                    channels,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {e}")))?,
            )
        };

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed interleaved samples, returning whatever is ready.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if self.inner.is_none() {
            return Ok(input.to_vec());
        }

        for frame in input.chunks_exact(self.channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..CHUNK_FRAMES).collect())
                .collect();
            output.extend(self.run(&chunk, usize::MAX)?);
        }
        Ok(output)
    }

    /// Drain buffered input at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let remaining = self.pending[0].len();
        if self.inner.is_none() || remaining == 0 {
            return Ok(Vec::new());
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut samples = std::mem::take(channel);
                samples.resize(CHUNK_FRAMES, 0.0);
                samples
            })
            .collect();

        let frames = (remaining as u64 * u64::from(self.output_rate) / u64::from(self.input_rate))
            as usize;
        self.run(&chunk, frames)
    }

    pub fn reset(&mut self) {
        if let Some(inner) = &mut self.inner {
            inner.reset();
        }
        self.pending.iter_mut().for_each(Vec::clear);
    }

    /// Resample one chunk and interleave at most `max_frames` frames.
    fn run(&mut self, chunk: &[Vec<f32>], max_frames: usize) -> Result<Vec<f32>> {
        let Some(inner) = &mut self.inner else {
            return Ok(Vec::new());
        };
        let planes = inner
            .process(chunk, None)
            .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;

        let frames = planes.first().map_or(0, Vec::len).min(max_frames);
        let mut output = Vec::with_capacity(frames * self.channels);
        for frame in 0..frames {
            for plane in &planes {
                output.push(plane[frame]);
            }
        }
        Ok(output)
    }
}

/// Map interleaved audio from `from` channels to `to` channels.
///
/// Mono is duplicated to every output channel and anything is averaged
/// down to mono. Otherwise shared channels are copied and extra output
/// channels stay silent.
pub fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let frames = samples.chunks_exact(from);
    let mut output = Vec::with_capacity(frames.len() * to);
    for frame in frames {
        if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            output.extend((0..to).map(|channel| frame.get(channel).copied().unwrap_or(0.0)));
        }
    }
    output
}
