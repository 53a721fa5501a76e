//! Streaming bulk-file downloader
//!
//! The response body is written to disk in fixed-size chunks. The sync's
//! [`CancellationToken`] is checked before every chunk write, so cancellation
//! latency is bounded by one chunk's transfer time.
//!
//! Bytes land in a `.part` file next to the destination, named after the sync, and
//! are renamed into place once the transfer finished. A cancelled or failed download
//! removes only its own `.part` file, never a file already at the destination.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Result, SyncError};

/// Byte-level progress callback
pub trait DownloadProgress: Send + Sync {
    fn on_chunk(&self, sync_id: Uuid, downloaded: u64, total: Option<u64>);
}

/// Logs progress at debug level
pub struct TracingProgress;

impl DownloadProgress for TracingProgress {
    fn on_chunk(&self, sync_id: Uuid, downloaded: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => debug!(
                %sync_id,
                downloaded,
                total,
                percent = (downloaded as f64 / total as f64 * 100.0).round(),
                "Download progress"
            ),
            _ => debug!(%sync_id, downloaded, "Download progress"),
        }
    }
}

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct BulkDownloader {
    client: Client,
    chunk_size: usize,
}

impl BulkDownloader {
    pub fn new(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Stream `url` into `dest`
    ///
    /// Returns [`SyncError::Cancelled`] when `cancel` fires mid-download and
    /// [`SyncError::HttpStatus`] for any non-2xx response.
    pub async fn download(
        &self,
        sync_id: Uuid,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        progress: &dyn DownloadProgress,
    ) -> Result<DownloadedFile> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(%sync_id, %url, dest = %dest.display(), "Starting download");

        let part = part_path(dest, sync_id);
        let result = match self.stream_to(sync_id, url, &part, cancel, progress).await {
            Ok(bytes) => tokio::fs::rename(&part, dest)
                .await
                .map(|()| bytes)
                .map_err(SyncError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                info!(%sync_id, bytes, dest = %dest.display(), "Download complete");
                Ok(DownloadedFile {
                    path: dest.to_path_buf(),
                    bytes,
                })
            },
            Err(e) => {
                remove_partial(&part).await;
                if e.is_cancelled() {
                    info!(%sync_id, "Download cancelled, partial file removed");
                } else {
                    warn!(%sync_id, error = %e, "Download failed");
                }
                Err(e)
            },
        }
    }

    async fn stream_to(
        &self,
        sync_id: Uuid,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        progress: &dyn DownloadProgress,
    ) -> Result<u64> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled(sync_id)),
            response = self.client.get(url).send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled(sync_id)),
                next = stream.next() => next,
            };

            match next {
                Some(bytes) => buffer.extend_from_slice(&bytes?),
                None => break,
            }

            while buffer.len() >= self.chunk_size {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled(sync_id));
                }
                file.write_all(&buffer[..self.chunk_size]).await?;
                buffer.drain(..self.chunk_size);
                written += self.chunk_size as u64;
                progress.on_chunk(sync_id, written, total);
            }
        }

        if !buffer.is_empty() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled(sync_id));
            }
            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            progress.on_chunk(sync_id, written, total);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled(sync_id));
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// `<dir>/.<file name>.<sync id>.part`
pub fn part_path(dest: &Path, sync_id: Uuid) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.part", name, sync_id))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}
