//! Single-producer single-consumer sample ring
//!
//! Shared between the control context (writer) and the real-time audio
//! callback (reader). Both halves are lock-free; counters are atomics so
//! either side can report stats without touching the other.
//!
//! The writer never overwrites unread samples. A write that does not fit is
//! truncated and the remainder counted as dropped.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct RingCounters {
    dropped_samples: AtomicU64,
    underruns: AtomicU64,
    samples_read: AtomicU64,
}

/// Allocate a ring of `capacity` samples and split it
///
/// The writer stays with the audio pipeline; the reader is handed to the
/// audio sink.
pub fn sample_ring(capacity: usize) -> (RingWriter, RingReader) {
    let capacity = capacity.max(1);
    debug!("Creating sample ring with capacity: {} samples", capacity);

    let (prod, cons) = HeapRb::<f32>::new(capacity).split();
    let counters = Arc::new(RingCounters::default());

    (
        RingWriter {
            producer: prod,
            counters: Arc::clone(&counters),
        },
        RingReader {
            consumer: cons,
            counters,
        },
    )
}

/// Producer half of the sample ring
pub struct RingWriter {
    producer: HeapProd<f32>,
    counters: Arc<RingCounters>,
}

impl RingWriter {
    /// Append interleaved samples, returning how many were accepted
    ///
    /// Samples beyond the free space are dropped and counted.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.counters
                .dropped_samples
                .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Append whole interleaved frames, returning samples accepted
    ///
    /// Truncates at a frame boundary so a partial write never shifts the
    /// channel alignment of later reads.
    pub fn write_frames(&mut self, samples: &[f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let fits = (self.producer.vacant_len() / channels) * channels;
        let count = samples.len().min(fits);
        let written = self.producer.push_slice(&samples[..count]);
        if written < samples.len() {
            self.counters
                .dropped_samples
                .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Samples that can be written without dropping
    pub fn available_write(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Samples written and not yet consumed
    pub fn available_read(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    pub fn stats(&self) -> RingStats {
        RingStats::collect(
            &self.counters,
            self.capacity(),
            self.producer.occupied_len(),
        )
    }
}

/// Consumer half of the sample ring
pub struct RingReader {
    consumer: HeapCons<f32>,
    counters: Arc<RingCounters>,
}

impl RingReader {
    /// Pop up to `out.len()` samples, returning how many were read
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let read = self.consumer.pop_slice(out);
        self.counters
            .samples_read
            .fetch_add(read as u64, Ordering::Relaxed);
        read
    }

    /// Fill `out` completely, padding with silence on underrun
    ///
    /// Returns the number of real samples read. Real-time safe: no locks, no
    /// allocation, no logging.
    pub fn read_or_silence(&mut self, out: &mut [f32]) -> usize {
        let read = self.read(out);
        if read < out.len() {
            out[read..].fill(0.0);
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
        }
        read
    }

    pub fn available_read(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    pub fn stats(&self) -> RingStats {
        RingStats::collect(
            &self.counters,
            self.capacity(),
            self.consumer.occupied_len(),
        )
    }

    /// Counter handle that stays valid after the reader moves into a callback
    pub fn counters(&self) -> RingCounterHandle {
        RingCounterHandle {
            counters: Arc::clone(&self.counters),
        }
    }
}

/// Shared read-only view of the ring counters
#[derive(Debug, Clone)]
pub struct RingCounterHandle {
    counters: Arc<RingCounters>,
}

impl RingCounterHandle {
    pub fn underruns(&self) -> u64 {
        self.counters.underruns.load(Ordering::Relaxed)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.counters.dropped_samples.load(Ordering::Relaxed)
    }

    pub fn samples_read(&self) -> u64 {
        self.counters.samples_read.load(Ordering::Relaxed)
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub occupied: usize,
    pub dropped_samples: u64,
    pub underruns: u64,
    pub samples_read: u64,
}

impl RingStats {
    fn collect(counters: &RingCounters, capacity: usize, occupied: usize) -> Self {
        Self {
            capacity,
            occupied,
            dropped_samples: counters.dropped_samples.load(Ordering::Relaxed),
            underruns: counters.underruns.load(Ordering::Relaxed),
            samples_read: counters.samples_read.load(Ordering::Relaxed),
        }
    }

    /// Fill level as a percentage (0-100)
    pub fn fill_percent(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.occupied as f32 / self.capacity as f32) * 100.0
    }
}
