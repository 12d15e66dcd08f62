//! Client Connection
//!
//! Each request gets a private reply FIFO. It is opened for reading before
//! the envelope is sent, so the daemon always finds a reader.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tracing::debug;

use crate::config::Config;
use crate::daemon::channel::create_fifo;
use crate::daemon::protocol::{read_frames, Request};
use crate::types::{DocumentId, NewDocument};

use super::ClientError;

/// Distinguishes reply FIFOs created by one process
static REPLY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Private reply FIFO, unlinked on drop
struct ReplyConduit {
    path: PathBuf,
    receiver: pipe::Receiver,
}

impl ReplyConduit {
    fn create(reply_dir: &Path) -> Result<Self, ClientError> {
        let seq = REPLY_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = reply_dir.join(format!("docindex_{}_{}_fifo", std::process::id(), seq));

        // A leftover from an earlier process with the same pid
        let _ = std::fs::remove_file(&path);
        create_fifo(&path).map_err(|e| {
            ClientError::ConnectionFailed(format!(
                "Failed to create reply channel {}: {}",
                path.display(),
                e
            ))
        })?;

        match pipe::OpenOptions::new().read_write(true).open_receiver(&path) {
            Ok(receiver) => Ok(Self { path, receiver }),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(ClientError::ConnectionFailed(format!(
                    "Failed to open reply channel: {}",
                    e
                )))
            }
        }
    }
}

impl Drop for ReplyConduit {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Client of the daemon's request channel
#[derive(Debug, Clone)]
pub struct DaemonClient {
    request_channel: PathBuf,
    reply_dir: PathBuf,
    timeout: Option<Duration>,
}

impl DaemonClient {
    pub fn new(request_channel: impl Into<PathBuf>, reply_dir: impl Into<PathBuf>) -> Self {
        Self {
            request_channel: request_channel.into(),
            reply_dir: reply_dir.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.server.request_channel, &config.server.reply_dir)
    }

    /// Bound the wait for a reply. Without one the client waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and return the daemon's reply text
    pub async fn send(&self, request: &Request) -> Result<String, ClientError> {
        let mut conduit = ReplyConduit::create(&self.reply_dir)?;
        let frame = request
            .to_envelope(conduit.path.to_string_lossy())
            .encode()?;

        debug!(
            "Sending {} to {}",
            request.command(),
            self.request_channel.display()
        );
        let mut sender = pipe::OpenOptions::new()
            .open_sender(&self.request_channel)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.raw_os_error() == Some(libc::ENXIO)
                {
                    ClientError::DaemonNotRunning
                } else {
                    ClientError::ConnectionFailed(e.to_string())
                }
            })?;
        sender
            .write_all(&frame)
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to send request: {}", e)))?;
        drop(sender);

        let read = read_frames(&mut conduit.receiver);
        let payload = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| ClientError::Timeout(timeout))?,
            None => read.await,
        }
        .map_err(|e| ClientError::RequestFailed(format!("Failed to read reply: {}", e)))?;

        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    pub async fn add(&self, doc: NewDocument) -> Result<String, ClientError> {
        self.send(&Request::Add(doc)).await
    }

    pub async fn query(&self, id: DocumentId) -> Result<String, ClientError> {
        self.send(&Request::Query { id }).await
    }

    pub async fn remove(&self, id: DocumentId) -> Result<String, ClientError> {
        self.send(&Request::Remove { id }).await
    }

    pub async fn line_count(
        &self,
        id: DocumentId,
        keyword: impl Into<String>,
    ) -> Result<String, ClientError> {
        self.send(&Request::LineCount {
            id,
            keyword: keyword.into(),
        })
        .await
    }

    pub async fn search(
        &self,
        keyword: impl Into<String>,
        workers: Option<i64>,
    ) -> Result<String, ClientError> {
        self.send(&Request::Search {
            keyword: keyword.into(),
            workers,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<String, ClientError> {
        self.send(&Request::Shutdown).await
    }
}
