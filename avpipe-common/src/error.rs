//! Common error types for avpipe
//!
//! Stream-fatal conditions (missing track, unsupported codec) are distinct
//! variants so the orchestrator can tell which stream failed. Transient
//! conditions such as an empty frame buffer are never represented here.

use crate::events::StreamKind;
use thiserror::Error;

/// Common result type for avpipe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared across the avpipe crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The container has no track of the requested kind
    #[error("No {stream} track available in container")]
    ConfigUnavailable { stream: StreamKind },

    /// The decoder rejected the stream's configuration
    #[error("Unsupported {stream} decoder configuration: codec '{codec}'")]
    UnsupportedConfig { stream: StreamKind, codec: String },

    /// Container parsing failed
    #[error("Demux error: {0}")]
    Demux(String),

    /// Decoder failed on a chunk or could not be opened
    #[error("Decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Operation violated a usage precondition (reentrant read, double track selection)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A channel peer went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error ends the affected stream (no retry is attempted).
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigUnavailable { .. } | Error::UnsupportedConfig { .. } | Error::Demux(_)
        )
    }
}
