//! # avpipe Common Library
//!
//! Shared code for the avpipe crates:
//! - Error type and `Result` alias
//! - Pipeline event types and the broadcast `EventBus`
//! - Bootstrap configuration (TOML) and its layered resolution
//! - Time conversion helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent, PlaybackState, StreamKind};
