//! Event types for the avpipe event system
//!
//! Provides the shared event definitions and the `EventBus` every pipeline
//! component emits on. Events are serializable so an outer surface can forward
//! them without translation.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which elementary stream of the session an operation or event concerns
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Orchestrator-level playback state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Media is playing
    Playing,
    /// Media is paused
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
        }
    }
}

/// Pipeline event types
///
/// Emitted by the pipelines and the control context. Everything here is
/// informational: no component relies on an event being received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A stream reached its buffering target for the first time
    StreamReady {
        stream: StreamKind,
        /// Buffered amount when the target was reached (seconds of audio,
        /// or frame count for video)
        buffered: f64,
    },

    /// Playback state changed (Playing ↔ Paused)
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decoded audio did not fit in the ring buffer and was dropped
    ///
    /// Indicates the decode target / capacity margin is miscalibrated for
    /// this stream. Playback continues in a degraded state.
    AudioOverflow {
        dropped_samples: usize,
        total_dropped: u64,
    },

    /// Stale frames were evicted during frame selection
    FramesDropped {
        count: usize,
        /// Render timestamp that caused the eviction
        timestamp_us: i64,
    },

    /// A render tick found no frame to show
    RenderSkipped { timestamp_us: i64 },

    /// The demuxer reached end of stream
    EndOfStream { stream: StreamKind },

    /// The decoder reported an error for a chunk
    DecoderError { stream: StreamKind, message: String },
}

/// Broadcast bus for pipeline events
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lag and lose
/// old events; emitters never block.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
