//! IPC Protocol Types
//!
//! Requests travel as fixed-size envelopes over the shared request FIFO:
//! a little-endian `u32` payload length, a bincode payload, and zero padding
//! up to [`ENVELOPE_SIZE`]. The frame is smaller than `PIPE_BUF`, so a single
//! write is never interleaved with another client's.
//!
//! Replies are UTF-8 text sent over the client's private FIFO as a sequence of
//! length-prefixed frames of at most [`FRAME_SIZE`] bytes, terminated by a
//! zero-length frame.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::{
    DocumentId, DocumentRecord, NewDocument, SearchResult, MAX_AUTHORS, MAX_PATH, MAX_TITLE,
    MAX_YEAR,
};
use crate::util::truncate_str;

/// Size of every request envelope on the wire
pub const ENVELOPE_SIZE: usize = 1024;
/// Maximum reply address length in bytes
pub const MAX_REPLY_ADDRESS: usize = 256;
/// Maximum argument string length in bytes
pub const MAX_ARGUMENTS: usize = 512;
/// Maximum payload bytes carried by one reply frame
pub const FRAME_SIZE: usize = 1024;
/// Upper bound on a reassembled reply
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;
/// Field separator inside the argument string (never escaped)
pub const ARG_SEPARATOR: char = '|';

const LEN_PREFIX: usize = 4;

/// Command codes carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Command {
    Add = 0,
    Query = 1,
    Remove = 2,
    LineCount = 3,
    Search = 4,
    Shutdown = 5,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Query => "QUERY",
            Self::Remove => "REMOVE",
            Self::LineCount => "LINE_COUNT",
            Self::Search => "SEARCH",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Add,
            1 => Self::Query,
            2 => Self::Remove,
            3 => Self::LineCount,
            4 => Self::Search,
            5 => Self::Shutdown,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelopes that cannot be decoded. These are dropped without a reply.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Envelope frame has wrong size: {0} bytes")]
    BadFrameSize(usize),
    #[error("Declared payload length {0} does not fit in the envelope")]
    PayloadOverflow(usize),
    #[error("Failed to decode envelope: {0}")]
    Decode(#[from] bincode::Error),
    #[error("Unknown command code {0}")]
    UnknownCommand(u32),
    #[error("{field} too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Arguments that do not fit the shape a known command expects
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("ADD expects four non-empty fields: title|authors|year|path")]
    AddFields,
    #[error("invalid document id '{0}'")]
    InvalidId(String),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    command: u32,
    reply_address: String,
    arguments: String,
}

/// One complete request unit: command, reply address and raw arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command: Command,
    /// Path of the client's private reply FIFO
    pub reply_address: String,
    /// `|`-separated command arguments
    pub arguments: String,
}

impl Envelope {
    pub fn new(command: Command, reply_address: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            command,
            reply_address: reply_address.into(),
            arguments: arguments.into(),
        }
    }

    /// Encode into exactly [`ENVELOPE_SIZE`] bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        check_len("reply address", &self.reply_address, MAX_REPLY_ADDRESS)?;
        check_len("arguments", &self.arguments, MAX_ARGUMENTS)?;

        let payload = bincode::serialize(&WireEnvelope {
            command: self.command.code(),
            reply_address: self.reply_address.clone(),
            arguments: self.arguments.clone(),
        })?;
        if payload.len() > ENVELOPE_SIZE - LEN_PREFIX {
            return Err(ProtocolError::PayloadOverflow(payload.len()));
        }

        let mut frame = vec![0u8; ENVELOPE_SIZE];
        frame[..LEN_PREFIX].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        frame[LEN_PREFIX..LEN_PREFIX + payload.len()].copy_from_slice(&payload);
        Ok(frame)
    }

    /// Decode one [`ENVELOPE_SIZE`]-byte frame
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() != ENVELOPE_SIZE {
            return Err(ProtocolError::BadFrameSize(frame.len()));
        }

        let mut len_buf = [0u8; LEN_PREFIX];
        len_buf.copy_from_slice(&frame[..LEN_PREFIX]);
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > ENVELOPE_SIZE - LEN_PREFIX {
            return Err(ProtocolError::PayloadOverflow(len));
        }

        let wire: WireEnvelope = bincode::deserialize(&frame[LEN_PREFIX..LEN_PREFIX + len])?;
        let command = Command::try_from(wire.command)?;
        check_len("reply address", &wire.reply_address, MAX_REPLY_ADDRESS)?;
        check_len("arguments", &wire.arguments, MAX_ARGUMENTS)?;

        Ok(Self {
            command,
            reply_address: wire.reply_address,
            arguments: wire.arguments,
        })
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ProtocolError> {
    if value.len() > max {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// Decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Add(NewDocument),
    Query { id: DocumentId },
    Remove { id: DocumentId },
    LineCount { id: DocumentId, keyword: String },
    /// `workers` is the raw requested count; the server clamps it
    Search { keyword: String, workers: Option<i64> },
    Shutdown,
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Self::Add(_) => Command::Add,
            Self::Query { .. } => Command::Query,
            Self::Remove { .. } => Command::Remove,
            Self::LineCount { .. } => Command::LineCount,
            Self::Search { .. } => Command::Search,
            Self::Shutdown => Command::Shutdown,
        }
    }

    /// Encode the arguments as a `|`-separated string
    pub fn to_arguments(&self) -> String {
        match self {
            // Fields are cut to their stored bounds here so an ADD always fits
            Self::Add(doc) => format!(
                "{}|{}|{}|{}",
                truncate_str(&doc.title, MAX_TITLE),
                truncate_str(&doc.authors, MAX_AUTHORS),
                truncate_str(&doc.year, MAX_YEAR),
                truncate_str(&doc.path, MAX_PATH)
            ),
            Self::Query { id } | Self::Remove { id } => id.to_string(),
            Self::LineCount { id, keyword } => format!("{}|{}", id, keyword),
            Self::Search { keyword, workers: Some(n) } => format!("{}|{}", keyword, n),
            Self::Search { keyword, workers: None } => keyword.clone(),
            Self::Shutdown => String::new(),
        }
    }

    /// Wrap this request in an envelope addressed to `reply_address`
    pub fn to_envelope(&self, reply_address: impl Into<String>) -> Envelope {
        Envelope::new(self.command(), reply_address, self.to_arguments())
    }

    /// Decode the arguments of a known command.
    ///
    /// A search worker count that is not an integer behaves as 1.
    pub fn parse(command: Command, arguments: &str) -> Result<Self, ArgumentError> {
        match command {
            Command::Add => {
                let fields: Vec<&str> = arguments.split(ARG_SEPARATOR).collect();
                if fields.len() != 4 || fields.iter().any(|f| f.is_empty()) {
                    return Err(ArgumentError::AddFields);
                }
                Ok(Self::Add(NewDocument::new(fields[0], fields[1], fields[2], fields[3])))
            }
            Command::Query => Ok(Self::Query {
                id: parse_id(arguments)?,
            }),
            Command::Remove => Ok(Self::Remove {
                id: parse_id(arguments)?,
            }),
            Command::LineCount => {
                let mut fields = arguments.splitn(2, ARG_SEPARATOR);
                let id = parse_id(fields.next().unwrap_or_default())?;
                let keyword = fields.next().unwrap_or_default().to_string();
                Ok(Self::LineCount { id, keyword })
            }
            Command::Search => {
                let mut fields = arguments.splitn(2, ARG_SEPARATOR);
                let keyword = fields.next().unwrap_or_default().to_string();
                let workers = fields
                    .next()
                    .map(|raw| raw.trim().parse::<i64>().unwrap_or(1));
                Ok(Self::Search { keyword, workers })
            }
            Command::Shutdown => Ok(Self::Shutdown),
        }
    }
}

fn parse_id(raw: &str) -> Result<DocumentId, ArgumentError> {
    raw.trim()
        .parse::<DocumentId>()
        .map_err(|_| ArgumentError::InvalidId(raw.to_string()))
}

/// Reply sent back to the client, rendered as text on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Indexed(DocumentId),
    IndexFailed(String),
    Document(DocumentRecord),
    NotFound(DocumentId),
    Removed(DocumentId),
    RemoveFailed { id: DocumentId, reason: String },
    LineCount(usize),
    Matches(SearchResult),
    NoMatches,
    ShuttingDown,
    InvalidArguments(String),
}

impl Response {
    /// Search reply, using the empty marker when nothing matched
    pub fn search(result: SearchResult) -> Self {
        if result.is_empty() {
            Self::NoMatches
        } else {
            Self::Matches(result)
        }
    }

    /// Wire frames for this response
    pub fn to_frames(&self) -> Vec<u8> {
        encode_frames(self.to_string().as_bytes())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed(id) => write!(f, "Document {} indexed", id),
            Self::IndexFailed(reason) => write!(f, "Error indexing document: {}", reason),
            Self::Document(record) => write!(f, "{}", record),
            Self::NotFound(id) => write!(f, "Document {} not found", id),
            Self::Removed(id) => write!(f, "Document {} removed", id),
            Self::RemoveFailed { id, reason } => {
                write!(f, "Error removing document {}: {}", id, reason)
            }
            Self::LineCount(count) => write!(f, "{}", count),
            Self::Matches(result) => write!(f, "{}", result),
            Self::NoMatches => f.write_str("No matches found"),
            Self::ShuttingDown => f.write_str("Server shutting down"),
            Self::InvalidArguments(reason) => write!(f, "Invalid arguments: {}", reason),
        }
    }
}

/// Split `payload` into length-prefixed frames followed by a terminator.
///
/// Frame boundaries are byte offsets and may fall inside a UTF-8 sequence.
pub fn encode_frames(payload: &[u8]) -> Vec<u8> {
    let frames = payload.len().div_ceil(FRAME_SIZE);
    let mut buf = Vec::with_capacity(payload.len() + (frames + 1) * LEN_PREFIX);
    for chunk in payload.chunks(FRAME_SIZE) {
        buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        buf.extend_from_slice(chunk);
    }
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf
}

/// Read frames until the terminator and return the concatenated payload.
pub async fn read_frames<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    loop {
        let mut len_buf = [0u8; LEN_PREFIX];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 {
            return Ok(payload);
        }
        if len > FRAME_SIZE || payload.len() + len > MAX_RESPONSE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Reply frame too large: {} bytes", len),
            ));
        }

        let start = payload.len();
        payload.resize(start + len, 0);
        reader.read_exact(&mut payload[start..]).await?;
    }
}
