//! FIFO transport
//!
//! The daemon reads fixed-size envelopes from one well-known FIFO shared by
//! every client. Each client creates its own reply FIFO and names it in the
//! envelope; the daemon opens it once, writes the framed reply and closes it.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::protocol::{Response, ENVELOPE_SIZE};

/// Delay between attempts to open a reply FIFO that has no reader yet
const REPLY_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Create a FIFO at `path` with mode 0666 (subject to umask).
pub fn create_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string that outlives the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Server end of the shared request FIFO
#[derive(Debug)]
pub struct RequestChannel {
    path: PathBuf,
    receiver: pipe::Receiver,
}

impl RequestChannel {
    /// Create the request FIFO, replacing any stale one, and open it for reading.
    ///
    /// The FIFO is opened read-write so the daemon never sees end-of-file
    /// while no client happens to be connected.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale request channel {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        create_fifo(&path)?;
        let receiver = match pipe::OpenOptions::new().read_write(true).open_receiver(&path) {
            Ok(receiver) => receiver,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        info!("Request channel ready at {}", path.display());
        Ok(Self { path, receiver })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next complete envelope frame.
    ///
    /// Partial reads are accumulated until a full frame has arrived.
    pub async fn next_envelope(&mut self) -> io::Result<Vec<u8>> {
        let mut frame = vec![0u8; ENVELOPE_SIZE];
        self.receiver.read_exact(&mut frame).await?;
        Ok(frame)
    }

    /// Close the channel and unlink the FIFO so no further client can connect.
    pub fn release(self) {
        info!("Releasing request channel {}", self.path.display());
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Failures delivering a reply. The reply is discarded in every case.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("No reader on reply channel {0} within {1:?}")]
    NoReader(PathBuf, Duration),
    #[error("Failed to open reply channel {0}: {1}")]
    Open(PathBuf, #[source] io::Error),
    #[error("Failed to write reply: {0}")]
    Write(#[from] io::Error),
    #[error("Timed out writing reply after {0:?}")]
    WriteTimeout(Duration),
}

/// Deliver `response` to the reply FIFO at `address`.
///
/// Waits up to `timeout` (forever when `None`) for the client to open its
/// end. Only existing FIFOs are written to.
pub async fn deliver_reply(
    address: &Path,
    response: &Response,
    timeout: Option<Duration>,
) -> Result<(), ReplyError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut sender = loop {
        match pipe::OpenOptions::new().open_sender(address) {
            Ok(sender) => break sender,
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                if let (Some(deadline), Some(t)) = (deadline, timeout) {
                    if Instant::now() >= deadline {
                        return Err(ReplyError::NoReader(address.to_path_buf(), t));
                    }
                }
                tokio::time::sleep(REPLY_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(ReplyError::Open(address.to_path_buf(), e)),
        }
    };

    let frames = response.to_frames();
    match deadline {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::timeout(remaining, sender.write_all(&frames))
                .await
                .map_err(|_| ReplyError::WriteTimeout(timeout.unwrap_or_default()))??;
        }
        None => sender.write_all(&frames).await?,
    }

    debug!("Delivered {} reply bytes to {}", frames.len(), address.display());
    Ok(())
}

/// Log and swallow a delivery failure
pub(crate) fn report_undelivered(address: &Path, err: &ReplyError) {
    warn!("Discarding reply for {}: {}", address.display(), err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::protocol::{read_frames, Command, Envelope};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_request_channel_reads_whole_envelopes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requests");
        let mut channel = RequestChannel::create(&path).unwrap();

        let first = Envelope::new(Command::Query, "/tmp/a", "1").encode().unwrap();
        let second = Envelope::new(Command::Remove, "/tmp/b", "2").encode().unwrap();

        let mut writer = pipe::OpenOptions::new().open_sender(&path).unwrap();
        writer.write_all(&first).await.unwrap();
        writer.write_all(&second).await.unwrap();

        let got = Envelope::decode(&channel.next_envelope().await.unwrap()).unwrap();
        assert_eq!(got.command, Command::Query);
        let got = Envelope::decode(&channel.next_envelope().await.unwrap()).unwrap();
        assert_eq!(got.reply_address, "/tmp/b");

        channel.release();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_envelope_split_across_writes_is_one_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requests");
        let mut channel = RequestChannel::create(&path).unwrap();

        let frame = Envelope::new(Command::LineCount, "/tmp/c", "3|apple")
            .encode()
            .unwrap();
        let mut writer = pipe::OpenOptions::new().open_sender(&path).unwrap();
        let tail = frame[100..].to_vec();
        writer.write_all(&frame[..100]).await.unwrap();

        let writing = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.write_all(&tail).await.unwrap();
            writer
        });

        let got = Envelope::decode(&channel.next_envelope().await.unwrap()).unwrap();
        assert_eq!(got.command, Command::LineCount);
        assert_eq!(got.arguments, "3|apple");
        writing.await.unwrap();
    }

    #[tokio::test]
    async fn test_create_replaces_stale_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requests");
        std::fs::write(&path, "stale").unwrap();

        let channel = RequestChannel::create(&path).unwrap();
        assert_eq!(channel.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_deliver_reply_to_waiting_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reply");
        create_fifo(&path).unwrap();
        let mut receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)
            .unwrap();

        deliver_reply(&path, &Response::Removed(4), Some(Duration::from_secs(1)))
            .await
            .unwrap();

        let payload = read_frames(&mut receiver).await.unwrap();
        assert_eq!(payload, b"Document 4 removed");
    }

    #[tokio::test]
    async fn test_deliver_reply_without_reader_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reply");
        create_fifo(&path).unwrap();

        let err = deliver_reply(&path, &Response::NoMatches, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplyError::NoReader(..)));
    }

    #[tokio::test]
    async fn test_deliver_reply_refuses_missing_or_regular_files() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        assert!(matches!(
            deliver_reply(&missing, &Response::NoMatches, None).await,
            Err(ReplyError::Open(..))
        ));

        let regular = dir.path().join("file.txt");
        std::fs::write(&regular, "").unwrap();
        assert!(matches!(
            deliver_reply(&regular, &Response::NoMatches, None).await,
            Err(ReplyError::Open(..))
        ));
        assert_eq!(std::fs::read_to_string(&regular).unwrap(), "");
    }
}
