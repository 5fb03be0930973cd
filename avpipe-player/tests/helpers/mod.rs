//! Test helper modules for avpipe player integration tests
//!
//! Provides in-memory stand-ins for the pipeline's collaborators:
//! - MemoryDemuxer: PullDemuxer over a scripted chunk list
//! - InstantAudioDecoder / DeferredAudioDecoder: audio decoders that decode
//!   synchronously or only when the test says so
//! - scripted_audio_decoder: real threaded decoder with priming and delay
//! - InstantVideoDecoder: frame-pool backed video decoder
//! - MemoryFactory: MediaFactory wiring the above together

#![allow(dead_code)]

pub mod decoders;
pub mod demuxer;
pub mod factory;

use std::time::Duration;

pub use decoders::{
    scripted_audio_decoder, CodecStats, DeferredAudioDecoder, DeferredHandle,
    InstantAudioDecoder, InstantVideoDecoder,
};
pub use demuxer::{audio_config, audio_chunks, video_chunks, video_config, MemoryDemuxer};
pub use factory::MemoryFactory;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// Frames per encoded audio chunk (1024 frames = 21.33 ms at 48 kHz)
pub const CHUNK_FRAMES: usize = 1024;
pub const FRAME_INTERVAL_US: i64 = 40_000;
pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

/// Let spawned refill and output tasks run to quiescence
///
/// Tests run with a paused clock, so this returns as soon as every task is
/// idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
