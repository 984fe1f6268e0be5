//! The `audio-engine` thread: owns the output stream and the decoder.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use hachimi_core::{Error, PlayEvent, Result};
use symphonia::core::io::MediaSource;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::decode::AudioDecoder;
use super::output::{AudioOutput, StreamShared};
use super::resample::{remix, Resampler};
use crate::backend::EventEmitter;

/// Decoded samples kept ahead of the device after a load or seek.
const PREFILL_SAMPLES: usize = 16 * 1024;

/// Minimum free ring space before decoding another packet.
const MIN_FREE_SAMPLES: usize = 8 * 1024;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Wait between pumps while playing and the ring cannot take more.
const PUMP_BACKOFF: Duration = Duration::from_millis(2);

/// How long to wait for a command before the next pump.
fn poll_timeout(playing: bool, progressed: bool) -> Duration {
    match (playing, progressed) {
        (true, true) => Duration::ZERO,
        (true, false) => PUMP_BACKOFF,
        (false, _) => IDLE_POLL,
    }
}

pub enum WorkerCommand {
    Load {
        source: Box<dyn MediaSource>,
        format: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Play,
    Pause,
    Stop,
    Seek {
        position: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Decoder plus conversion to the device's channel layout and rate.
struct Pipeline {
    decoder: AudioDecoder,
    resampler: Resampler,
    out_channels: usize,
    exhausted: bool,
}

impl Pipeline {
    fn new(
        source: Box<dyn MediaSource>,
        format: &str,
        out_rate: u32,
        out_channels: usize,
    ) -> Result<Self> {
        let decoder = AudioDecoder::from_source(source, format)?;
        let resampler = Resampler::new(decoder.sample_rate(), out_rate, out_channels)?;
        if let Some(duration) = decoder.duration() {
            debug!(duration_secs = duration.as_secs_f64(), "Track duration");
        }
        Ok(Self {
            decoder,
            resampler,
            out_channels,
            exhausted: false,
        })
    }

    /// Next block of device-ready samples. `None` once the stream and the
    /// resampler are drained.
    fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        if self.exhausted {
            return Ok(None);
        }
        match self.decoder.decode_next()? {
            Some(samples) => {
                let samples = remix(&samples, self.decoder.channels(), self.out_channels);
                self.resampler.process(&samples).map(Some)
            }
            None => {
                self.exhausted = true;
                let tail = self.resampler.flush()?;
                Ok((!tail.is_empty()).then_some(tail))
            }
        }
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.decoder.seek(position)?;
        self.resampler.reset();
        self.exhausted = false;
        Ok(())
    }
}

/// Open the output device on the current thread, report the outcome through
/// `ready`, then serve commands until shutdown.
pub fn run(
    commands: Receiver<WorkerCommand>,
    shared: Arc<StreamShared>,
    events: EventEmitter,
    ready: oneshot::Sender<Result<()>>,
) {
    let output = match AudioOutput::open(Arc::clone(&shared)) {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to open audio output: {e}");
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let out_rate = output.sample_rate();
    let out_channels = usize::from(output.channels());
    Worker::new(commands, shared, events, Some(output), out_rate, out_channels).run();
}

struct Worker {
    commands: Receiver<WorkerCommand>,
    shared: Arc<StreamShared>,
    events: EventEmitter,
    /// Keeps the device stream alive for the worker's lifetime.
    _output: Option<AudioOutput>,
    out_rate: u32,
    out_channels: usize,
    pipeline: Option<Pipeline>,
    /// Samples decoded but not yet accepted by the ring.
    pending: Vec<f32>,
}

impl Worker {
    fn new(
        commands: Receiver<WorkerCommand>,
        shared: Arc<StreamShared>,
        events: EventEmitter,
        output: Option<AudioOutput>,
        out_rate: u32,
        out_channels: usize,
    ) -> Self {
        Self {
            commands,
            shared,
            events,
            _output: output,
            out_rate,
            out_channels,
            pipeline: None,
            pending: Vec::new(),
        }
    }

    fn run(mut self) {
        info!("Audio engine worker started");

        let mut progressed = false;
        loop {
            let timeout = poll_timeout(self.shared.is_playing(), progressed);
            match self.commands.recv_timeout(timeout) {
                Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
            }

            progressed = self.shared.is_playing() && self.pump();
        }

        self.shared.set_playing(false);
        info!("Audio engine worker stopped");
    }

    fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Load {
                source,
                format,
                reply,
            } => {
                let _ = reply.send(self.load(source, &format));
            }
            WorkerCommand::Play => {
                if self.pipeline.is_none() || self.shared.is_playing() {
                    return;
                }
                if self.shared.is_ended() {
                    if let Err(e) = self.rewind(Duration::ZERO) {
                        warn!("Failed to restart song: {e}");
                        return;
                    }
                }
                self.shared.set_playing(true);
                self.events.emit(PlayEvent::Play);
            }
            WorkerCommand::Pause => {
                if self.shared.is_playing() {
                    self.shared.set_playing(false);
                    self.events.emit(PlayEvent::Pause);
                }
            }
            WorkerCommand::Stop => {
                let was_playing = self.shared.is_playing();
                self.shared.set_playing(false);
                if self.pipeline.is_some() {
                    if let Err(e) = self.rewind(Duration::ZERO) {
                        warn!("Failed to rewind on stop: {e}");
                    }
                }
                if was_playing {
                    self.events.emit(PlayEvent::Pause);
                }
            }
            WorkerCommand::Seek { position, reply } => {
                let result = self.rewind(position);
                if result.is_ok() {
                    self.events.emit(PlayEvent::Seek(position));
                }
                let _ = reply.send(result);
            }
            WorkerCommand::Shutdown => {}
        }
    }

    fn load(&mut self, source: Box<dyn MediaSource>, format: &str) -> Result<()> {
        debug!(bytes = ?source.byte_len(), format, "Loading song");
        self.shared.set_playing(false);
        self.reset_buffers();
        self.pipeline = None;

        let pipeline = Pipeline::new(source, format, self.out_rate, self.out_channels)?;
        self.pipeline = Some(pipeline);
        self.shared.set_position(Duration::ZERO);
        self.prefill();
        Ok(())
    }

    fn rewind(&mut self, position: Duration) -> Result<()> {
        let Some(pipeline) = &mut self.pipeline else {
            return Err(Error::InvalidArgument("Nothing loaded to seek in".to_string()));
        };
        pipeline.seek(position)?;
        self.reset_buffers();
        self.shared.set_position(position);
        self.prefill();
        Ok(())
    }

    fn reset_buffers(&mut self) {
        self.shared.ring.clear();
        self.pending.clear();
        self.shared.set_ended(false);
    }

    fn prefill(&mut self) {
        while self.shared.ring.available() < PREFILL_SAMPLES {
            if !self.fill_once() {
                break;
            }
        }
    }

    /// Returns whether any samples moved toward the ring.
    fn pump(&mut self) -> bool {
        if self.shared.ring.free() >= MIN_FREE_SAMPLES && self.fill_once() {
            return true;
        }

        let drained = self.pipeline.as_ref().is_some_and(|p| p.exhausted)
            && self.pending.is_empty()
            && self.shared.ring.is_empty();
        if drained {
            info!("Playback finished");
            self.shared.set_playing(false);
            self.shared.set_ended(true);
            self.events.emit(PlayEvent::End);
        }
        false
    }

    /// Move one block into the ring. Returns false when nothing more can be
    /// produced right now.
    fn fill_once(&mut self) -> bool {
        if !self.pending.is_empty() {
            let written = self.shared.ring.write(&self.pending);
            self.pending.drain(..written);
            return written > 0;
        }

        let Some(pipeline) = &mut self.pipeline else {
            return false;
        };
        match pipeline.next_block() {
            Ok(Some(block)) => {
                let written = self.shared.ring.write(&block);
                self.pending.extend_from_slice(&block[written..]);
                true
            }
            Ok(None) => false,
            Err(Error::Cancelled) => {
                debug!("Source cancelled during playback");
                pipeline.exhausted = true;
                self.shared.set_playing(false);
                false
            }
            Err(e) => {
                error!("Decode error during playback: {e}");
                pipeline.exhausted = true;
                self.shared.set_playing(false);
                self.events.emit(PlayEvent::Error(Arc::new(e)));
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use crate::desktop::stream::{StreamBuffer, StreamingSource};
    use crate::desktop::testing::wav;
    use std::io::Cursor;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// A worker without a device, at the WAV fixture's rate.
    fn worker() -> (Worker, UnboundedReceiver<PlayEvent>) {
        let (_commands_tx, commands) = crossbeam_channel::unbounded();
        let (events, rx) = EventEmitter::channel();
        let shared = Arc::new(StreamShared::default());
        (Worker::new(commands, shared, events, None, 8000, 2), rx)
    }

    fn drain(shared: &StreamShared) -> usize {
        let mut out = vec![0.0f32; 4096];
        let mut total = 0;
        loop {
            let read = shared.ring.read(&mut out);
            if read == 0 {
                return total;
            }
            total += read;
        }
    }

    #[test]
    fn test_poll_timeout() {
        assert_eq!(poll_timeout(true, true), Duration::ZERO);
        assert_eq!(poll_timeout(true, false), PUMP_BACKOFF);
        assert_eq!(poll_timeout(false, true), IDLE_POLL);
    }

    #[test]
    fn test_pump_idles_until_device_drains_the_tail() {
        let (mut worker, mut rx) = worker();
        worker
            .load(Box::new(Cursor::new(wav(8000, 4000))), "wav")
            .unwrap();
        worker.shared.set_playing(true);

        // Decoder is exhausted but the device has not played the tail yet.
        for _ in 0..3 {
            assert!(!worker.pump());
        }
        assert!(worker.shared.is_playing());
        assert!(!worker.shared.is_ended());
        assert!(rx.try_recv().is_err());

        assert_eq!(drain(&worker.shared), 8000);
        assert!(!worker.pump());
        assert!(worker.shared.is_ended());
        assert!(!worker.shared.is_playing());
        assert!(matches!(rx.try_recv().unwrap(), PlayEvent::End));
    }

    #[test]
    fn test_rewind_drops_buffered_audio() {
        let (mut worker, _rx) = worker();
        worker
            .load(Box::new(Cursor::new(wav(8000, 8000))), "wav")
            .unwrap();
        assert_eq!(worker.shared.ring.available(), 16000);

        worker.rewind(Duration::from_millis(500)).unwrap();
        let remaining = drain(&worker.shared);
        assert!(remaining > 0 && remaining < 16000, "remaining = {remaining}");
    }

    #[test]
    fn test_cancelled_stream_stops_without_error_event() {
        let audio = wav(8000, 8000);
        let buffer = Arc::new(StreamBuffer::new(Some(audio.len() as u64)));
        buffer.push(&audio[..4096]);
        let canceller = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                buffer.cancel();
            })
        };

        let (mut worker, mut rx) = worker();
        worker
            .load(Box::new(StreamingSource::new(Arc::clone(&buffer))), "wav")
            .unwrap();
        canceller.join().unwrap();

        assert!(worker.pipeline.as_ref().unwrap().exhausted);
        assert!(!worker.shared.is_playing());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_load_failure_leaves_nothing_loaded() {
        let (mut worker, _rx) = worker();
        let garbage = Box::new(Cursor::new(vec![7u8; 512]));
        assert!(worker.load(garbage, "mp3").is_err());
        assert!(worker.pipeline.is_none());
        assert!(matches!(
            worker.rewind(Duration::ZERO),
            Err(Error::InvalidArgument(_))
        ));
    }
}
