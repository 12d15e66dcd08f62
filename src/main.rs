//! docindex: local document catalog daemon and client
//!
//! The same binary runs the daemon (`docindex server`) and every client
//! command.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docindex::{
    client::DaemonClient,
    config::{Config, LogFormat},
    daemon::{get_daemon_pid, Daemon},
    types::{DocumentId, NewDocument},
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "docindex")]
#[command(about = "Local document catalog with parallel keyword search")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "docindex.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Give up waiting for a reply after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Server {
        /// Folder document paths are relative to
        document_folder: Option<PathBuf>,

        /// Number of searches to cache (0 disables the cache)
        #[arg(long)]
        cache_size: Option<usize>,
    },

    /// Add a document to the catalog
    Add {
        title: String,
        authors: String,
        year: String,
        /// Path relative to the document folder
        path: String,
    },

    /// Show a document's metadata
    Query { id: DocumentId },

    /// Remove a document from the catalog
    Remove { id: DocumentId },

    /// Count lines of a document containing a keyword
    Lines { id: DocumentId, keyword: String },

    /// List documents containing a keyword
    Search {
        keyword: String,

        /// Number of concurrent workers
        workers: Option<String>,
    },

    /// Ask the daemon to stop
    Shutdown,

    /// Report whether a daemon is running
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Server {
            document_folder,
            cache_size,
        } => run_server(config, document_folder, cache_size).await,
        Commands::Status => show_status(&config),
        command => {
            let timeout = cli.timeout_secs.map(Duration::from_secs);
            let client = DaemonClient::from_config(&config).with_timeout(timeout);
            let reply = send_command(&client, command).await?;
            println!("{}", reply);
            Ok(())
        }
    }
}

fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let level = config.logging.level.raised_by(verbose);
    let builder = FmtSubscriber::builder()
        .with_max_level(tracing::Level::from(level))
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

async fn run_server(
    mut config: Config,
    document_folder: Option<PathBuf>,
    cache_size: Option<usize>,
) -> Result<()> {
    if let Some(folder) = document_folder {
        config.server.document_folder = folder;
    }
    if let Some(size) = cache_size {
        config.cache.capacity = size;
    }

    let daemon = Daemon::start(config)
        .await
        .context("Failed to start daemon")?;
    daemon.run().await
}

async fn send_command(client: &DaemonClient, command: Commands) -> Result<String> {
    let reply = match command {
        Commands::Add {
            title,
            authors,
            year,
            path,
        } => client.add(NewDocument::new(title, authors, year, path)).await?,
        Commands::Query { id } => client.query(id).await?,
        Commands::Remove { id } => client.remove(id).await?,
        Commands::Lines { id, keyword } => client.line_count(id, keyword).await?,
        Commands::Search { keyword, workers } => {
            let workers = workers.map(|w| w.trim().parse::<i64>().unwrap_or(1));
            client.search(keyword, workers).await?
        }
        Commands::Shutdown => client.shutdown().await?,
        Commands::Server { .. } | Commands::Status => {
            anyhow::bail!("Not a client command")
        }
    };
    Ok(reply)
}

fn show_status(config: &Config) -> Result<()> {
    match get_daemon_pid(&config.server.data_dir) {
        Some(pid) => {
            info!("Daemon lock held in {}", config.server.data_dir.display());
            println!("Daemon is running (PID {})", pid);
            println!("Request channel: {}", config.server.request_channel.display());
        }
        None => println!("Daemon is not running"),
    }
    Ok(())
}
