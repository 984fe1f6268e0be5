//! A byte source that can be decoded while it is still downloading.
//!
//! The download task appends to a [`StreamBuffer`]; the engine thread reads
//! through a [`StreamingSource`], blocking until the bytes it needs arrive.
//! Reads past the downloaded range wait, so seeking ahead works once the
//! length is known.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use symphonia::core::io::MediaSource;

/// How long a read waits for new bytes before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Received {
    data: Vec<u8>,
    complete: bool,
    failure: Option<String>,
    cancelled: bool,
}

#[derive(Debug)]
pub struct StreamBuffer {
    received: Mutex<Received>,
    arrived: Condvar,
    total: Option<u64>,
}

impl StreamBuffer {
    /// `total` is the advertised body length, if any.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            received: Mutex::new(Received {
                data: Vec::with_capacity(total.map_or(0, |len| len as usize)),
                ..Received::default()
            }),
            arrived: Condvar::new(),
            total,
        }
    }

    pub const fn total(&self) -> Option<u64> {
        self.total
    }

    /// Append a chunk. Returns false once the stream was cancelled.
    pub fn push(&self, chunk: &[u8]) -> bool {
        let mut received = self.received.lock();
        if received.cancelled {
            return false;
        }
        received.data.extend_from_slice(chunk);
        self.arrived.notify_all();
        true
    }

    pub fn finish(&self) {
        self.received.lock().complete = true;
        self.arrived.notify_all();
    }

    pub fn fail(&self, message: String) {
        self.received.lock().failure = Some(message);
        self.arrived.notify_all();
    }

    /// Stop the download and wake any blocked reader with an error.
    pub fn cancel(&self) {
        self.received.lock().cancelled = true;
        self.arrived.notify_all();
    }

    pub fn downloaded(&self) -> usize {
        self.received.lock().data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.received.lock().complete
    }
}

/// Reader over a [`StreamBuffer`] with its own position.
pub struct StreamingSource {
    buffer: Arc<StreamBuffer>,
    position: u64,
}

impl StreamingSource {
    pub const fn new(buffer: Arc<StreamBuffer>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn buffer(&self) -> Arc<StreamBuffer> {
        Arc::clone(&self.buffer)
    }

    fn len(&self) -> Option<u64> {
        self.buffer.total.or_else(|| {
            let received = self.buffer.received.lock();
            received.complete.then_some(received.data.len() as u64)
        })
    }
}

impl Read for StreamingSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let mut received = self.buffer.received.lock();
        loop {
            if received.cancelled {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "download cancelled",
                ));
            }

            let start = usize::try_from(self.position).unwrap_or(usize::MAX);
            if start < received.data.len() {
                let count = out.len().min(received.data.len() - start);
                out[..count].copy_from_slice(&received.data[start..start + count]);
                self.position += count as u64;
                return Ok(count);
            }

            if let Some(failure) = &received.failure {
                return Err(io::Error::other(failure.clone()));
            }
            if received.complete {
                return Ok(0);
            }
            if self
                .buffer
                .arrived
                .wait_for(&mut received, STALL_TIMEOUT)
                .timed_out()
            {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "download stalled",
                ));
            }
        }
    }
}

impl Seek for StreamingSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len().and_then(|len| len.checked_add_signed(delta)),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek outside the stream")
        })?;
        self.position = target;
        Ok(target)
    }
}

impl MediaSource for StreamingSource {
    fn is_seekable(&self) -> bool {
        self.buffer.total.is_some()
    }

    fn byte_len(&self) -> Option<u64> {
        self.buffer.total
    }
}
