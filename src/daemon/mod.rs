//! Daemon Module
//!
//! The daemon owns the document catalog and serves clients over FIFOs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      docindex daemon                          │
//! │                                                               │
//! │  request FIFO ──▶ IpcServer ──▶ RequestHandler                │
//! │  (shared, all       (one envelope    │                        │
//! │   clients)           at a time)      ├─▶ DocumentIndex        │
//! │                                      ├─▶ ResultCache          │
//! │                                      └─▶ SearchDispatcher     │
//! │                                            │ spawn_blocking   │
//! │                                            ▼ per shard        │
//! │                                         document files        │
//! │                                                               │
//! │  reply FIFO ◀── framed response (one per client request)      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! Start the daemon:
//! ```bash
//! docindex server documents --cache-size 16
//! ```
//!
//! Check status:
//! ```bash
//! docindex status
//! ```
//!
//! Stop the daemon:
//! ```bash
//! docindex shutdown
//! ```

pub mod channel;
pub mod handler;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod server;

pub use channel::{create_fifo, deliver_reply, ReplyError, RequestChannel};
pub use handler::RequestHandler;
pub use lifecycle::{get_daemon_pid, is_daemon_running, Daemon};
pub use metrics::{DaemonMetrics, MetricsSnapshot};
pub use protocol::{
    encode_frames, read_frames, ArgumentError, Command, Envelope, ProtocolError, Request,
    Response,
};
pub use server::{IpcServer, ServerExit};
