//! MediaFactory over in-memory doubles

use async_trait::async_trait;
use avpipe_common::{Error, Result};
use avpipe_player::decode::{BoxedAudioDecoder, BoxedVideoDecoder};
use avpipe_player::demux::PullDemuxer;
use avpipe_player::media::FramePool;
use avpipe_player::playback::MediaFactory;

use super::{
    audio_chunks, audio_config, video_chunks, video_config, InstantAudioDecoder,
    InstantVideoDecoder, MemoryDemuxer, CHUNK_FRAMES,
};

/// Location that every open call reports as missing
pub const MISSING: &str = "missing";

/// Opens any location except [`MISSING`] as a synthetic stream
pub struct MemoryFactory {
    audio_chunk_count: usize,
    video_frame_count: usize,
    pool: FramePool,
}

impl MemoryFactory {
    pub fn new(audio_chunk_count: usize, video_frame_count: usize, pool: FramePool) -> Self {
        Self {
            audio_chunk_count,
            video_frame_count,
            pool,
        }
    }
}

fn not_found(location: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not found", location),
    ))
}

#[async_trait]
impl MediaFactory for MemoryFactory {
    async fn open_audio(
        &self,
        location: &str,
    ) -> Result<(Box<dyn PullDemuxer>, BoxedAudioDecoder)> {
        if location == MISSING {
            return Err(not_found(location));
        }
        Ok((
            Box::new(MemoryDemuxer::new(
                audio_config("aac"),
                audio_chunks(self.audio_chunk_count),
            )),
            Box::new(InstantAudioDecoder::new("aac", CHUNK_FRAMES)),
        ))
    }

    async fn open_video(
        &self,
        location: &str,
    ) -> Result<(Box<dyn PullDemuxer>, BoxedVideoDecoder)> {
        if location == MISSING {
            return Err(not_found(location));
        }
        Ok((
            Box::new(MemoryDemuxer::new(
                video_config("vp8"),
                video_chunks(self.video_frame_count),
            )),
            Box::new(InstantVideoDecoder::new("vp8", self.pool.clone())),
        ))
    }
}
