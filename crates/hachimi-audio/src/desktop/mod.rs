//! Desktop backend: cpal output, symphonia decoding, rubato resampling.
//!
//! A dedicated `audio-engine` thread owns the device stream (cpal streams
//! are not `Send`) and receives commands over a channel. Replies that the
//! caller awaits come back over oneshot channels.

mod decode;
mod fetch;
mod output;
mod resample;
mod ring;
mod stream;
#[cfg(test)]
mod testing;
mod worker;

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Sender};
use hachimi_core::{Error, Result, SongItem};
use parking_lot::Mutex;
use symphonia::core::io::MediaSource;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::backend::{EventEmitter, PlaybackBackend};

pub use decode::{hint_for, AudioDecoder};
pub use fetch::{open_stream, read_file_url, Progress};
pub use resample::{remix, Resampler};
pub use stream::{StreamBuffer, StreamingSource};

use output::StreamShared;
use worker::WorkerCommand;

struct WorkerHandle {
    commands: Sender<WorkerCommand>,
    thread: JoinHandle<()>,
}

/// Plays through the default output device.
pub struct DesktopBackend {
    client: reqwest::Client,
    shared: Arc<StreamShared>,
    progress: Arc<Progress>,
    /// Download feeding the current song, if it is streamed.
    stream: Mutex<Option<Arc<StreamBuffer>>>,
    worker: Mutex<Option<WorkerHandle>>,
    released: AtomicBool,
}

impl Default for DesktopBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DesktopBackend {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client for remote songs.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            shared: Arc::new(StreamShared::default()),
            progress: Arc::new(Progress::default()),
            stream: Mutex::new(None),
            worker: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        let worker = self.worker.lock();
        let Some(worker) = worker.as_ref() else {
            return Err(Error::NotInitialized);
        };
        worker
            .commands
            .send(command)
            .map_err(|_| Error::AudioOutput("Audio engine is not running".to_string()))
    }

    fn send_transport(&self, command: WorkerCommand) {
        if let Err(e) = self.send(command) {
            debug!("Transport command ignored: {e}");
        }
    }

    /// Cancel the current download, waking the engine if it waits on it.
    fn replace_stream(&self, next: Option<Arc<StreamBuffer>>) {
        if let Some(previous) = std::mem::replace(&mut *self.stream.lock(), next) {
            previous.cancel();
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<()>>) -> WorkerCommand,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await
            .map_err(|_| Error::AudioOutput("Audio engine stopped before replying".to_string()))?
    }
}

#[async_trait]
impl PlaybackBackend for DesktopBackend {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn initialize(&self, events: EventEmitter) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Released);
        }
        if self.worker.lock().is_some() {
            return Ok(());
        }

        let (commands, command_rx) = unbounded();
        let (ready, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);

        let thread = std::thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || worker::run(command_rx, shared, events, ready))
            .map_err(|e| Error::Initialization(format!("Failed to spawn engine thread: {e}")))?;

        ready_rx.await.map_err(|_| {
            Error::Initialization("Audio engine exited during startup".to_string())
        })??;

        *self.worker.lock() = Some(WorkerHandle { commands, thread });
        info!("Desktop backend initialized");
        Ok(())
    }

    async fn load(&self, item: &SongItem) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Released);
        }

        self.replace_stream(None);
        let source: Box<dyn MediaSource> = match item {
            SongItem::Local { audio, .. } => {
                if audio.is_empty() {
                    return Err(Error::AudioDecode("Empty audio data".to_string()));
                }
                self.progress.set(1.0);
                Box::new(Cursor::new(audio.clone()))
            }
            SongItem::Remote { audio_url, .. } if audio_url.scheme() == "file" => {
                let data = read_file_url(audio_url).await?;
                self.progress.set(1.0);
                Box::new(Cursor::new(data))
            }
            SongItem::Remote { audio_url, .. } => {
                let source =
                    open_stream(&self.client, audio_url, Arc::clone(&self.progress)).await?;
                self.replace_stream(Some(source.buffer()));
                Box::new(source)
            }
        };

        let format = item.format().to_string();
        self.request(|reply| WorkerCommand::Load {
            source,
            format,
            reply,
        })
        .await
    }

    fn play(&self) {
        self.send_transport(WorkerCommand::Play);
    }

    fn pause(&self) {
        self.send_transport(WorkerCommand::Pause);
    }

    fn stop(&self) {
        self.send_transport(WorkerCommand::Stop);
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        self.request(|reply| WorkerCommand::Seek { position, reply })
            .await
    }

    fn set_output_gain(&self, gain: f32) {
        self.shared.set_gain(gain);
    }

    fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    fn is_end(&self) -> bool {
        self.shared.is_ended()
    }

    fn position(&self) -> Duration {
        self.shared.position()
    }

    fn buffered_progress(&self) -> f32 {
        self.progress.get()
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.replace_stream(None);

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = worker.commands.send(WorkerCommand::Shutdown);
        match tokio::task::spawn_blocking(move || worker.thread.join()).await {
            Ok(Ok(())) => info!("Desktop backend released"),
            Ok(Err(_)) => warn!("Audio engine thread panicked"),
            Err(e) => warn!("Failed to join audio engine thread: {e}"),
        }
    }
}

impl Drop for DesktopBackend {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.get_mut().take() {
            stream.cancel();
        }
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.commands.send(WorkerCommand::Shutdown);
        }
    }
}
