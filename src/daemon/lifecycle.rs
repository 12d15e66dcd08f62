//! Daemon Lifecycle Management
//!
//! Handles daemon startup, shutdown, and single-instance guarantees.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cache::BoundedCache;
use crate::config::Config;
use crate::index::DocumentIndex;
use crate::search::SearchDispatcher;

use super::channel::RequestChannel;
use super::handler::RequestHandler;
use super::metrics::DaemonMetrics;
use super::server::{IpcServer, ServerExit};

/// PID file for single-instance guarantee
const PID_FILE_NAME: &str = "docindex.pid";

/// Daemon instance managing all components
pub struct Daemon {
    config: Config,
    server: IpcServer,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    pid_file_path: PathBuf,
}

impl Daemon {
    /// Start the daemon
    ///
    /// Only a held lock or a request channel that cannot be created is fatal.
    pub async fn start(config: Config) -> Result<Self> {
        info!("Starting docindex daemon");

        // Acquire single-instance lock
        let pid_file_path = config.server.data_dir.join(PID_FILE_NAME);
        Self::acquire_lock(&pid_file_path)?;

        match Self::init_server(&config) {
            Ok(server) => {
                let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
                Ok(Self {
                    config,
                    server,
                    shutdown_tx,
                    shutdown_rx,
                    pid_file_path,
                })
            }
            Err(e) => {
                let _ = Self::release_lock(&pid_file_path);
                Err(e)
            }
        }
    }

    fn init_server(config: &Config) -> Result<IpcServer> {
        let document_folder = &config.server.document_folder;
        if let Err(e) = std::fs::create_dir_all(document_folder) {
            warn!(
                "Failed to create document folder {}: {}",
                document_folder.display(),
                e
            );
        }

        let index = DocumentIndex::open(&config.index.file, config.index.capacity);
        let cache = BoundedCache::new(config.cache.capacity);
        let search = SearchDispatcher::new(document_folder, config.search.max_workers);
        let handler = RequestHandler::new(
            index,
            search,
            Box::new(cache),
            config.search.default_workers,
            DaemonMetrics::shared(),
        );

        let channel = RequestChannel::create(&config.server.request_channel).with_context(|| {
            format!(
                "Failed to create request channel {}",
                config.server.request_channel.display()
            )
        })?;

        info!("Daemon initialized");
        info!("Document folder: {}", document_folder.display());
        info!(
            "Index: {}/{} documents",
            handler.index().len(),
            handler.index().capacity()
        );
        info!("Cache size: {}", config.cache.capacity);

        Ok(IpcServer::new(channel, handler, config.server.reply_timeout()))
    }

    /// Sender that stops the dispatch loop when fired
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn request_channel(&self) -> &Path {
        self.server.channel_path()
    }

    /// Run the daemon until SHUTDOWN or a termination signal, then clean up
    pub async fn run(mut self) -> Result<()> {
        info!("Daemon running");

        let signal_tx = self.shutdown_tx.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = terminated() => info!("Received SIGTERM, shutting down"),
            }
            let _ = signal_tx.send(());
        });

        let shutdown_rx = std::mem::replace(&mut self.shutdown_rx, self.shutdown_tx.subscribe());
        let exit = self.server.run(shutdown_rx).await;
        signal_task.abort();

        match &exit {
            Ok(ServerExit::Requested) => info!("Shutdown requested via IPC"),
            Ok(ServerExit::Signalled) => {}
            Err(e) => warn!("Dispatch loop failed: {:#}", e),
        }

        self.shutdown(exit.map(|_| ()))
    }

    /// Shutdown the daemon gracefully
    fn shutdown(self, exit: Result<()>) -> Result<()> {
        info!("Shutting down daemon");

        if let Err(e) = self.server.finish(&self.config.cache.snapshot_file) {
            warn!("Failed to persist state during shutdown: {:#}", e);
        }

        // Release lock
        Self::release_lock(&self.pid_file_path)?;

        info!("Daemon shutdown complete");
        exit
    }

    /// Take the single-instance lock, replacing a PID file left by a dead process
    fn acquire_lock(pid_file_path: &Path) -> Result<()> {
        if let Some(parent) = pid_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        if create_pid_file(pid_file_path).context("Failed to create PID file")? {
            return Ok(());
        }

        if let Some(pid) = read_pid(pid_file_path).filter(|&pid| pid_alive(pid)) {
            anyhow::bail!(
                "Daemon is already running (PID {}). Stop it first or remove {}",
                pid,
                pid_file_path.display()
            );
        }

        warn!("Replacing stale PID file {}", pid_file_path.display());
        std::fs::remove_file(pid_file_path)?;
        if !create_pid_file(pid_file_path).context("Failed to recreate PID file")? {
            anyhow::bail!("Lost the race for {}", pid_file_path.display());
        }
        Ok(())
    }

    fn release_lock(pid_file_path: &Path) -> Result<()> {
        match std::fs::remove_file(pid_file_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Exclusively create the PID file holding our pid. `false` if it already exists.
fn create_pid_file(path: &Path) -> std::io::Result<bool> {
    let opened = OpenOptions::new().write(true).create_new(true).open(path);
    match opened {
        Ok(mut file) => writeln!(file, "{}", std::process::id()).map(|_| true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_pid(pid_file_path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(pid_file_path).ok()?;
    contents.trim().parse().ok()
}

/// Whether `pid` names a live process.
///
/// Zero and values outside `pid_t` would address process groups, so they
/// never count as running.
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 checks existence only; EPERM means it exists under another user
    (unsafe { libc::kill(pid, 0) == 0 })
        || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Resolves once SIGTERM arrives, or never if the handler cannot be installed
async fn terminated() {
    let mut stream = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("SIGTERM will be ignored: {}", e);
            return std::future::pending().await;
        }
    };
    stream.recv().await;
}

/// Check if the daemon is running
pub fn is_daemon_running(data_dir: &Path) -> bool {
    get_daemon_pid(data_dir).is_some()
}

/// Get the PID of the running daemon, if any
pub fn get_daemon_pid(data_dir: &Path) -> Option<u32> {
    read_pid(&data_dir.join(PID_FILE_NAME)).filter(|&pid| pid_alive(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.server.request_channel = dir.join("requests");
        config.server.data_dir = dir.to_path_buf();
        config.server.document_folder = dir.join("documents");
        config.index.file = dir.join("meta_data.txt");
        config.cache.snapshot_file = dir.join("cache.json");
        config
    }

    #[test]
    fn test_pid_lock_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        Daemon::acquire_lock(&pid_path).unwrap();
        assert!(pid_path.exists());
        assert_eq!(read_pid(&pid_path), Some(std::process::id()));

        Daemon::release_lock(&pid_path).unwrap();
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_pid_lock_held_by_live_process() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        Daemon::acquire_lock(&pid_path).unwrap();
        assert!(Daemon::acquire_lock(&pid_path).is_err());
    }

    #[test]
    fn test_stale_pid_lock_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");
        std::fs::write(&pid_path, "not-a-pid\n").unwrap();

        Daemon::acquire_lock(&pid_path).unwrap();
        assert_eq!(read_pid(&pid_path), Some(std::process::id()));
    }

    #[test]
    fn test_pid_zero_or_out_of_range_is_stale() {
        let temp_dir = TempDir::new().unwrap();
        let pid_path = temp_dir.path().join("test.pid");

        for stale in ["0", "2147483648", "4294967295"] {
            std::fs::write(&pid_path, format!("{}\n", stale)).unwrap();
            assert!(!pid_alive(stale.parse().unwrap()));
            Daemon::acquire_lock(&pid_path).unwrap();
            assert_eq!(read_pid(&pid_path), Some(std::process::id()));
        }
    }

    #[test]
    fn test_release_missing_lock_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        Daemon::release_lock(&temp_dir.path().join("absent.pid")).unwrap();
    }

    #[test]
    fn test_is_daemon_running() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_daemon_running(temp_dir.path()));

        Daemon::acquire_lock(&temp_dir.path().join(PID_FILE_NAME)).unwrap();
        assert!(is_daemon_running(temp_dir.path()));
        assert_eq!(get_daemon_pid(temp_dir.path()), Some(std::process::id()));
    }

    #[tokio::test]
    async fn test_start_creates_folder_and_channel() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());

        let daemon = Daemon::start(config.clone()).await.unwrap();
        assert!(config.server.document_folder.is_dir());
        assert!(config.server.request_channel.exists());

        daemon.shutdown_sender().send(()).unwrap();
        tokio::spawn(daemon.run()).await.unwrap().unwrap();

        assert!(!config.server.request_channel.exists());
        assert!(!temp_dir.path().join(PID_FILE_NAME).exists());
        assert!(config.index.file.exists());
    }

    #[tokio::test]
    async fn test_start_fails_without_request_channel() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        config.server.request_channel = temp_dir.path().join("missing").join("requests");

        assert!(Daemon::start(config).await.is_err());
        assert!(!temp_dir.path().join(PID_FILE_NAME).exists());
    }
}
