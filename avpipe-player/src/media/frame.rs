//! Decoded video frames and the bounded pool that backs them
//!
//! A decoder may only have a small number of frames outstanding at once.
//! Every [`DecodedVideoFrame`] holds a [`FrameLease`]; the lease returns its
//! slot to the pool exactly once, either through [`DecodedVideoFrame::release`]
//! or when the frame is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::trace;

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    outstanding: Mutex<usize>,
    slot_freed: Condvar,
    closed: AtomicBool,
}

impl PoolInner {
    fn release_slot(&self) {
        let mut outstanding = match self.outstanding.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *outstanding = outstanding.saturating_sub(1);
        trace!(outstanding = *outstanding, "Frame slot released");
        self.slot_freed.notify_one();
    }
}

/// Bounded pool of decoded frame slots
///
/// Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: capacity.max(1),
                outstanding: Mutex::new(0),
                slot_freed: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Frames currently held by consumers
    pub fn outstanding(&self) -> usize {
        match self.inner.outstanding.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Take a slot without waiting
    pub fn try_acquire(&self) -> Option<FrameLease> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }
        let mut outstanding = self.inner.outstanding.lock().ok()?;
        if *outstanding >= self.inner.capacity {
            return None;
        }
        *outstanding += 1;
        Some(FrameLease {
            pool: Arc::clone(&self.inner),
        })
    }

    /// Take a slot, blocking the calling thread until one is free
    ///
    /// Only called from decoder threads. Returns `None` once the pool is closed.
    pub fn acquire_blocking(&self) -> Option<FrameLease> {
        let mut outstanding = self.inner.outstanding.lock().ok()?;
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            if *outstanding < self.inner.capacity {
                *outstanding += 1;
                return Some(FrameLease {
                    pool: Arc::clone(&self.inner),
                });
            }
            outstanding = self.inner.slot_freed.wait(outstanding).ok()?;
        }
    }

    /// Wake any blocked acquirers and refuse further leases
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.slot_freed.notify_all();
    }
}

/// Claim on one pool slot; returned on drop
#[derive(Debug)]
pub struct FrameLease {
    pool: Arc<PoolInner>,
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.pool.release_slot();
    }
}

/// One decoded picture
#[derive(Debug)]
pub struct DecodedVideoFrame {
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub width: u32,
    pub height: u32,
    /// Frame payload as produced by the decoder
    pub data: Vec<u8>,
    _lease: FrameLease,
}

impl DecodedVideoFrame {
    pub fn new(
        timestamp_us: i64,
        duration_us: i64,
        width: u32,
        height: u32,
        data: Vec<u8>,
        lease: FrameLease,
    ) -> Self {
        Self {
            timestamp_us,
            duration_us,
            width,
            height,
            data,
            _lease: lease,
        }
    }

    /// Return the frame's slot to its pool
    ///
    /// Consumes the frame, so a frame can never be released twice.
    pub fn release(self) {
        trace!(timestamp_us = self.timestamp_us, "Releasing video frame");
    }
}
