//! IPC Server
//!
//! The dispatch loop. Envelopes are read from the shared request channel and
//! handled one at a time, in arrival order; each reply goes to the FIFO named
//! in its envelope.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::channel::{deliver_reply, report_undelivered, RequestChannel};
use super::handler::RequestHandler;
use super::metrics::DaemonMetrics;
use super::protocol::{Envelope, Request, Response};

/// Why the dispatch loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    /// A client sent SHUTDOWN
    Requested,
    /// The process was signalled
    Signalled,
}

/// Outcome of handling a single envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

enum Event {
    Frame(std::io::Result<Vec<u8>>),
    Shutdown,
}

/// Dispatcher reading the shared request FIFO
pub struct IpcServer {
    channel: RequestChannel,
    handler: RequestHandler,
    reply_timeout: Option<Duration>,
    metrics: Arc<DaemonMetrics>,
}

impl IpcServer {
    pub fn new(
        channel: RequestChannel,
        handler: RequestHandler,
        reply_timeout: Option<Duration>,
    ) -> Self {
        let metrics = handler.metrics().clone();
        Self {
            channel,
            handler,
            reply_timeout,
            metrics,
        }
    }

    /// Run the dispatch loop until SHUTDOWN arrives or `shutdown` fires.
    ///
    /// A signal only interrupts the wait for the next envelope; a request
    /// already being handled always runs to completion.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<ServerExit> {
        info!("IPC server listening on: {}", self.channel.path().display());

        loop {
            let event = tokio::select! {
                frame = self.channel.next_envelope() => Event::Frame(frame),
                _ = shutdown.recv() => Event::Shutdown,
            };

            match event {
                Event::Frame(frame) => {
                    let frame = frame.context("Failed to read from request channel")?;
                    if self.process(&frame).await == Flow::Stop {
                        return Ok(ServerExit::Requested);
                    }
                }
                Event::Shutdown => {
                    info!("IPC server shutting down");
                    return Ok(ServerExit::Signalled);
                }
            }
        }
    }

    /// Handle one raw envelope frame, including reply delivery
    async fn process(&mut self, frame: &[u8]) -> Flow {
        self.metrics.requests_total.inc();

        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.requests_malformed.inc();
                warn!("Dropping malformed envelope: {}", e);
                return Flow::Continue;
            }
        };

        let reply_to = PathBuf::from(&envelope.reply_address);
        debug!(
            "Received {} from {} ({:?})",
            envelope.command,
            reply_to.display(),
            envelope.arguments
        );

        let response = match Request::parse(envelope.command, &envelope.arguments) {
            Ok(request) => self.handler.handle(request).await,
            Err(e) => {
                self.metrics.requests_invalid.inc();
                error!("Invalid {} arguments: {}", envelope.command, e);
                Response::InvalidArguments(e.to_string())
            }
        };

        self.reply(&reply_to, &response).await;

        if matches!(response, Response::ShuttingDown) {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    async fn reply(&self, address: &Path, response: &Response) {
        if let Err(e) = deliver_reply(address, response, self.reply_timeout).await {
            self.metrics.replies_undelivered.inc();
            report_undelivered(address, &e);
        }
    }

    /// Persist state, log metrics and tear down the request channel
    pub fn finish(self, cache_snapshot: &Path) -> Result<()> {
        let persisted = self.handler.persist(cache_snapshot);

        match serde_json::to_string(&self.metrics.snapshot()) {
            Ok(json) => info!("Metrics: {}", json),
            Err(e) => warn!("Failed to serialize metrics: {}", e),
        }

        self.channel.release();
        persisted
    }

    pub fn channel_path(&self) -> &Path {
        self.channel.path()
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoundedCache;
    use crate::daemon::channel::create_fifo;
    use crate::daemon::protocol::{read_frames, Command};
    use crate::index::DocumentIndex;
    use crate::search::SearchDispatcher;
    use tempfile::TempDir;
    use tokio::net::unix::pipe;

    fn server(dir: &Path) -> IpcServer {
        let channel = RequestChannel::create(dir.join("requests")).unwrap();
        let handler = RequestHandler::new(
            DocumentIndex::in_memory(10),
            SearchDispatcher::new(dir, 4),
            Box::new(BoundedCache::new(0)),
            1,
            DaemonMetrics::shared(),
        );
        IpcServer::new(channel, handler, Some(Duration::from_secs(2)))
    }

    fn reply_fifo(dir: &Path, name: &str) -> (PathBuf, pipe::Receiver) {
        let path = dir.join(name);
        create_fifo(&path).unwrap();
        let receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)
            .unwrap();
        (path, receiver)
    }

    #[tokio::test]
    async fn test_process_replies_to_named_fifo() {
        let dir = TempDir::new().unwrap();
        let mut server = server(dir.path());
        let (path, mut receiver) = reply_fifo(dir.path(), "reply");

        let frame = Request::Add(crate::types::NewDocument::new("T", "A", "1999", "t.txt"))
            .to_envelope(path.to_string_lossy())
            .encode()
            .unwrap();
        assert_eq!(server.process(&frame).await, Flow::Continue);

        let reply = read_frames(&mut receiver).await.unwrap();
        assert_eq!(reply, b"Document 1 indexed");
        assert_eq!(server.handler().index().len(), 1);
    }

    #[tokio::test]
    async fn test_process_reports_bad_arguments() {
        let dir = TempDir::new().unwrap();
        let mut server = server(dir.path());
        let (path, mut receiver) = reply_fifo(dir.path(), "reply");

        let frame = Envelope::new(Command::Query, path.to_string_lossy(), "abc")
            .encode()
            .unwrap();
        server.process(&frame).await;

        let reply = String::from_utf8(read_frames(&mut receiver).await.unwrap()).unwrap();
        assert!(reply.starts_with("Invalid arguments:"));
    }

    #[tokio::test]
    async fn test_process_drops_malformed_envelope() {
        let dir = TempDir::new().unwrap();
        let mut server = server(dir.path());

        let mut frame = vec![0u8; crate::daemon::protocol::ENVELOPE_SIZE];
        frame[..4].copy_from_slice(&9999u32.to_le_bytes());
        assert_eq!(server.process(&frame).await, Flow::Continue);
        assert_eq!(server.metrics.requests_malformed.get(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let dir = TempDir::new().unwrap();
        let mut server = server(dir.path());
        let (path, mut receiver) = reply_fifo(dir.path(), "reply");

        let frame = Request::Shutdown
            .to_envelope(path.to_string_lossy())
            .encode()
            .unwrap();
        assert_eq!(server.process(&frame).await, Flow::Stop);
        assert_eq!(read_frames(&mut receiver).await.unwrap(), b"Server shutting down");
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let dir = TempDir::new().unwrap();
        let mut server = server(dir.path());
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        assert_eq!(server.run(rx).await.unwrap(), ServerExit::Signalled);

        let channel_path = server.channel_path().to_path_buf();
        server.finish(&dir.path().join("cache.json")).unwrap();
        assert!(!channel_path.exists());
    }

    #[tokio::test]
    async fn test_undeliverable_reply_is_counted() {
        let dir = TempDir::new().unwrap();
        let mut server = server(dir.path());

        let frame = Request::Query { id: 1 }
            .to_envelope(dir.path().join("nobody").to_string_lossy())
            .encode()
            .unwrap();
        assert_eq!(server.process(&frame).await, Flow::Continue);
        assert_eq!(server.metrics.replies_undelivered.get(), 1);
    }
}
