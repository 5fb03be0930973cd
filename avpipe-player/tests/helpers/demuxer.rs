//! In-memory pull demuxer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use avpipe_common::{Error, Result, StreamKind};
use avpipe_player::demux::PullDemuxer;
use avpipe_player::media::{
    AudioDecoderConfig, ChunkKind, DecoderConfig, EncodedChunk, VideoDecoderConfig,
};

use super::{CHANNELS, CHUNK_FRAMES, FRAME_INTERVAL_US, HEIGHT, SAMPLE_RATE, WIDTH};

pub fn audio_config(codec: &str) -> DecoderConfig {
    DecoderConfig::Audio(AudioDecoderConfig {
        codec: codec.to_string(),
        sample_rate: SAMPLE_RATE,
        channel_count: CHANNELS,
        description: None,
    })
}

pub fn video_config(codec: &str) -> DecoderConfig {
    DecoderConfig::Video(VideoDecoderConfig {
        codec: codec.to_string(),
        display_width: WIDTH,
        display_height: HEIGHT,
        description: None,
    })
}

/// `count` key chunks of `CHUNK_FRAMES` frames each
pub fn audio_chunks(count: usize) -> Vec<EncodedChunk> {
    let duration_us = (CHUNK_FRAMES as i64 * 1_000_000) / SAMPLE_RATE as i64;
    (0..count)
        .map(|i| EncodedChunk {
            kind: ChunkKind::Key,
            timestamp_us: i as i64 * duration_us,
            duration_us,
            payload: vec![0u8; 16],
        })
        .collect()
}

/// `count` frames at `FRAME_INTERVAL_US`, key frame every 10
pub fn video_chunks(count: usize) -> Vec<EncodedChunk> {
    (0..count)
        .map(|i| EncodedChunk {
            kind: if i % 10 == 0 {
                ChunkKind::Key
            } else {
                ChunkKind::Delta
            },
            timestamp_us: i as i64 * FRAME_INTERVAL_US,
            duration_us: FRAME_INTERVAL_US,
            payload: vec![i as u8; 8],
        })
        .collect()
}

/// PullDemuxer over a fixed chunk list
pub struct MemoryDemuxer {
    config: DecoderConfig,
    chunks: VecDeque<EncodedChunk>,
    duration_secs: f64,
    selected: bool,
    reads: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl MemoryDemuxer {
    pub fn new(config: DecoderConfig, chunks: Vec<EncodedChunk>) -> Self {
        let duration_us: i64 = chunks.iter().map(|c| c.duration_us).sum();
        Self {
            config,
            chunks: chunks.into(),
            duration_secs: duration_us as f64 / 1_000_000.0,
            selected: false,
            reads: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
        }
    }

    /// Return a demux error once `reads` chunks have been handed out
    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    /// Counter of `next_chunk` calls that survives boxing the demuxer
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl PullDemuxer for MemoryDemuxer {
    async fn initialize(&mut self, stream: StreamKind) -> Result<()> {
        if self.selected {
            return Err(Error::InvalidState("track already selected".to_string()));
        }
        if self.config.kind() != stream {
            return Err(Error::ConfigUnavailable { stream });
        }
        self.selected = true;
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig> {
        if !self.selected {
            return Err(Error::InvalidState("no track selected".to_string()));
        }
        Ok(self.config.clone())
    }

    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| read >= limit) {
            return Err(Error::Demux("scripted demux failure".to_string()));
        }
        Ok(self.chunks.pop_front())
    }

    fn duration_secs(&self) -> Option<f64> {
        Some(self.duration_secs)
    }
}
