//! Playback: buffering pipelines, the media clock and the control context
//!
//! The audio and video pipelines own their demuxer and decoder; the
//! `MediaWorker` owns both pipelines plus the clock and drives rendering.

pub mod audio_pipeline;
pub mod clock_reporter;
pub mod factory;
pub mod frame_buffer;
pub mod frame_sink;
pub mod media_clock;
pub mod refill;
pub mod ring_buffer;
pub mod video_pipeline;
pub mod worker;

use std::sync::{Mutex, MutexGuard};

pub use audio_pipeline::{AudioBufferParams, AudioPipeline, AudioState};
pub use clock_reporter::{ClockReport, ClockReporter, MediaTimeSource};
pub use factory::{FileMediaFactory, MediaFactory};
pub use frame_sink::{CountingFrameSink, FrameSink};
pub use media_clock::MediaClock;
pub use ring_buffer::{sample_ring, RingCounterHandle, RingReader, RingStats, RingWriter};
pub use video_pipeline::{RenderOutcome, VideoBufferParams, VideoPipeline};
pub use worker::{InitializeDone, MediaWorker, WorkerCommand, WorkerHandle};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
