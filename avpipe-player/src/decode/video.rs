//! Passthrough video codec
//!
//! Turns each encoded chunk into a pooled frame carrying the compressed
//! payload. Pixel decoding is left to the frame sink. The pool bounds how
//! many frames can be outstanding; the decoder thread blocks when it is
//! exhausted.

use avpipe_common::{Error, Result};
use tracing::trace;

use super::decoder::{Codec, ThreadedDecoder};
use crate::media::{DecodedVideoFrame, EncodedChunk, FramePool, VideoDecoderConfig};

/// Codec strings this codec will accept
const SUPPORTED_CODECS: &[&str] = &["vp8", "vp09", "av01", "avc1", "avc3", "hvc1", "hev1"];

pub fn is_supported(config: &VideoDecoderConfig) -> bool {
    let family = config.codec.split('.').next().unwrap_or_default();
    config.display_width > 0
        && config.display_height > 0
        && SUPPORTED_CODECS.contains(&family)
}

pub struct PassthroughVideoCodec {
    width: u32,
    height: u32,
    pool: FramePool,
    waiting_for_key: bool,
}

impl PassthroughVideoCodec {
    pub fn new(config: &VideoDecoderConfig, pool: FramePool) -> Self {
        Self {
            width: config.display_width,
            height: config.display_height,
            pool,
            waiting_for_key: true,
        }
    }
}

impl Codec for PassthroughVideoCodec {
    type Config = VideoDecoderConfig;
    type Output = DecodedVideoFrame;

    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<DecodedVideoFrame>> {
        if self.waiting_for_key {
            if !chunk.is_key() {
                return Err(Error::Decode(format!(
                    "delta chunk at {}us before first keyframe",
                    chunk.timestamp_us
                )));
            }
            self.waiting_for_key = false;
        }

        let lease = self
            .pool
            .acquire_blocking()
            .ok_or_else(|| Error::Decode("frame pool closed".to_string()))?;
        trace!(
            timestamp_us = chunk.timestamp_us,
            outstanding = self.pool.outstanding(),
            "Frame decoded"
        );

        Ok(vec![DecodedVideoFrame::new(
            chunk.timestamp_us,
            chunk.duration_us,
            self.width,
            self.height,
            chunk.payload.clone(),
            lease,
        )])
    }
}

impl Drop for PassthroughVideoCodec {
    fn drop(&mut self) {
        self.pool.close();
    }
}

/// Threaded passthrough decoder drawing frames from `pool`
pub fn passthrough_video_decoder(pool: FramePool) -> ThreadedDecoder<PassthroughVideoCodec> {
    ThreadedDecoder::new("video-decoder", is_supported, move |config| {
        Ok(PassthroughVideoCodec::new(config, pool))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ChunkKind;

    fn config(codec: &str) -> VideoDecoderConfig {
        VideoDecoderConfig {
            codec: codec.to_string(),
            display_width: 320,
            display_height: 240,
            description: None,
        }
    }

    fn chunk(kind: ChunkKind, ts: i64) -> EncodedChunk {
        EncodedChunk {
            kind,
            timestamp_us: ts,
            duration_us: 33_333,
            payload: vec![0xAB; 16],
        }
    }

    #[test]
    fn test_supported_codecs() {
        assert!(is_supported(&config("vp8")));
        assert!(is_supported(&config("avc1.64001f")));
        assert!(!is_supported(&config("theora")));
    }

    #[test]
    fn test_rejects_delta_before_key() {
        let mut codec = PassthroughVideoCodec::new(&config("vp8"), FramePool::new(2));
        assert!(codec.decode(&chunk(ChunkKind::Delta, 0)).is_err());

        let frames = codec.decode(&chunk(ChunkKind::Key, 33_333)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_us, 33_333);
        assert_eq!((frames[0].width, frames[0].height), (320, 240));
        assert!(codec.decode(&chunk(ChunkKind::Delta, 66_666)).is_ok());
    }

    #[test]
    fn test_frames_hold_pool_slots() {
        let pool = FramePool::new(4);
        let mut codec = PassthroughVideoCodec::new(&config("vp8"), pool.clone());
        let frames = codec.decode(&chunk(ChunkKind::Key, 0)).unwrap();
        assert_eq!(pool.outstanding(), 1);
        drop(frames);
        assert_eq!(pool.outstanding(), 0);
    }
}
