//! Rendering target for selected video frames

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::media::DecodedVideoFrame;

/// Something that can show a decoded frame
pub trait FrameSink: Send + Sync + 'static {
    /// Size the target to the stream's display dimensions
    fn configure(&self, width: u32, height: u32);

    fn paint(&self, frame: &DecodedVideoFrame);
}

/// Headless sink that records what would have been shown
#[derive(Debug)]
pub struct CountingFrameSink {
    width: AtomicU32,
    height: AtomicU32,
    painted: AtomicU64,
    last_timestamp_us: AtomicI64,
}

impl Default for CountingFrameSink {
    fn default() -> Self {
        Self {
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            painted: AtomicU64::new(0),
            last_timestamp_us: AtomicI64::new(i64::MIN),
        }
    }
}

impl CountingFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn painted(&self) -> u64 {
        self.painted.load(Ordering::Relaxed)
    }

    pub fn last_timestamp_us(&self) -> Option<i64> {
        match self.last_timestamp_us.load(Ordering::Relaxed) {
            i64::MIN => None,
            ts => Some(ts),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }
}

impl FrameSink for CountingFrameSink {
    fn configure(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
        debug!("Frame sink sized to {}x{}", width, height);
    }

    fn paint(&self, frame: &DecodedVideoFrame) {
        let count = self.painted.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_timestamp_us
            .store(frame.timestamp_us, Ordering::Relaxed);
        trace!(
            timestamp_us = frame.timestamp_us,
            bytes = frame.data.len(),
            "Painted frame"
        );
        if count % 300 == 0 {
            debug!("{} frames painted", count);
        }
    }
}
