//! Fetching remote song audio.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hachimi_core::{Error, HttpError, Result};
use tracing::{debug, info, warn};
use url::Url;

use super::stream::{StreamBuffer, StreamingSource};

/// Download progress shared with the backend's `buffered_progress`.
#[derive(Debug, Default)]
pub struct Progress(AtomicU32);

impl Progress {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, fraction: f32) {
        self.0
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

fn map_reqwest_error(error: &reqwest::Error) -> Error {
    if error.is_timeout() {
        HttpError::Timeout.into()
    } else if error.is_connect() {
        HttpError::ConnectionFailed(error.to_string()).into()
    } else if let Some(status) = error.status() {
        HttpError::StatusError {
            status: status.as_u16(),
            message: error.to_string(),
        }
        .into()
    } else {
        Error::Network(error.to_string())
    }
}

/// Read a `file://` URL into memory.
pub async fn read_file_url(url: &Url) -> Result<Bytes> {
    if url.scheme() != "file" {
        return Err(HttpError::InvalidUrl(url.to_string()).into());
    }
    let path = url
        .to_file_path()
        .map_err(|()| HttpError::InvalidUrl(url.to_string()))?;
    let data = Bytes::from(tokio::fs::read(&path).await?);
    info!(url = %url, bytes = data.len(), "Read song audio");
    Ok(data)
}

/// Start downloading `url` and return a source readable as bytes arrive.
///
/// Resolves once the response headers are in; the body keeps downloading
/// on a background task that updates `progress`.
pub async fn open_stream(
    client: &reqwest::Client,
    url: &Url,
    progress: Arc<Progress>,
) -> Result<StreamingSource> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HttpError::InvalidUrl(url.to_string()).into());
    }
    progress.set(0.0);

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| map_reqwest_error(&e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HttpError::StatusError {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unknown").to_string(),
        }
        .into());
    }

    let buffer = Arc::new(StreamBuffer::new(response.content_length()));
    info!(url = %url, bytes = ?buffer.total(), "Streaming song audio");
    tokio::spawn(download(response, Arc::clone(&buffer), progress));
    Ok(StreamingSource::new(buffer))
}

async fn download(mut response: reqwest::Response, buffer: Arc<StreamBuffer>, progress: Arc<Progress>) {
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if !buffer.push(&chunk) {
                    debug!("Download cancelled");
                    return;
                }
                if let Some(total) = buffer.total().filter(|len| *len > 0) {
                    progress.set(buffer.downloaded() as f32 / total as f32);
                }
            }
            Ok(None) => {
                progress.set(1.0);
                buffer.finish();
                debug!(bytes = buffer.downloaded(), "Download complete");
                return;
            }
            Err(e) => {
                let error = map_reqwest_error(&e);
                warn!("Download failed: {error}");
                buffer.fail(error.to_string());
                return;
            }
        }
    }
}
