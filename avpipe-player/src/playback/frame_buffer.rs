//! Decoded frame buffer and frame selection
//!
//! Frames are held oldest first in presentation order. Selection picks the
//! frame nearest the requested timestamp and evicts everything before it;
//! evicted frames are released to their pool as they leave.

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::media::DecodedVideoFrame;

/// Result of a frame selection
#[derive(Debug)]
pub struct Selection<'a> {
    pub frame: &'a DecodedVideoFrame,
    /// Frames evicted ahead of the chosen one
    pub dropped: usize,
    /// Absolute distance between the chosen frame and the request
    pub delta_us: u64,
}

#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: VecDeque<DecodedVideoFrame>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Timestamps currently held, oldest first
    pub fn timestamps(&self) -> Vec<i64> {
        self.frames.iter().map(|f| f.timestamp_us).collect()
    }

    /// Insert a decoded frame, keeping presentation order
    pub fn push(&mut self, frame: DecodedVideoFrame) {
        match self.frames.back() {
            Some(last) if frame.timestamp_us < last.timestamp_us => {
                warn!(
                    "Out-of-order video frame at {}us (last {}us)",
                    frame.timestamp_us, last.timestamp_us
                );
                let index = self
                    .frames
                    .partition_point(|f| f.timestamp_us <= frame.timestamp_us);
                self.frames.insert(index, frame);
            }
            _ => self.frames.push_back(frame),
        }
    }

    /// Choose the frame closest to `timestamp_us`
    ///
    /// Scans forward while the distance keeps shrinking; on a tie the earlier
    /// frame wins. Frames before the chosen one are released. The chosen
    /// frame stays buffered so consecutive ticks can show it again.
    pub fn choose(&mut self, timestamp_us: i64) -> Option<Selection<'_>> {
        let mut best: Option<(usize, u64)> = None;
        for (index, frame) in self.frames.iter().enumerate() {
            let delta = timestamp_us.abs_diff(frame.timestamp_us);
            match best {
                Some((_, min)) if delta >= min => break,
                _ => best = Some((index, delta)),
            }
        }
        let (index, delta_us) = best?;

        for frame in self.frames.drain(..index) {
            trace!(
                timestamp_us = frame.timestamp_us,
                "Evicting stale video frame"
            );
            frame.release();
        }

        self.frames.front().map(|frame| Selection {
            frame,
            dropped: index,
            delta_us,
        })
    }

    /// Release every buffered frame
    pub fn clear(&mut self) {
        for frame in self.frames.drain(..) {
            frame.release();
        }
    }
}
