//! Construction of demuxer/decoder pairs for the media worker

use std::path::PathBuf;

use async_trait::async_trait;
use avpipe_common::config::BufferingConfig;
use avpipe_common::{Error, Result};
use tracing::debug;

use crate::decode::{
    passthrough_video_decoder, symphonia_audio_decoder, BoxedAudioDecoder, BoxedVideoDecoder,
};
use crate::demux::{BufferedPullDemuxer, IsoAudioSource, IvfSource, PullDemuxer};
use crate::media::FramePool;

/// Opens media locations into demuxer/decoder pairs
#[async_trait]
pub trait MediaFactory: Send + Sync + 'static {
    async fn open_audio(&self, location: &str)
        -> Result<(Box<dyn PullDemuxer>, BoxedAudioDecoder)>;

    async fn open_video(&self, location: &str)
        -> Result<(Box<dyn PullDemuxer>, BoxedVideoDecoder)>;
}

/// Opens local files: symphonia-readable audio containers and IVF video
#[derive(Debug, Clone)]
pub struct FileMediaFactory {
    lookahead: usize,
    frame_pool_size: usize,
}

impl FileMediaFactory {
    pub fn new(config: &BufferingConfig) -> Self {
        Self {
            lookahead: config.demuxer_lookahead_samples,
            frame_pool_size: config.video_frame_pool_size,
        }
    }
}

#[async_trait]
impl MediaFactory for FileMediaFactory {
    async fn open_audio(
        &self,
        location: &str,
    ) -> Result<(Box<dyn PullDemuxer>, BoxedAudioDecoder)> {
        let path = PathBuf::from(location);
        debug!("Opening audio file: {}", path.display());
        let source = tokio::task::spawn_blocking(move || IsoAudioSource::open(&path))
            .await
            .map_err(|e| Error::Internal(format!("audio open task failed: {}", e)))??;

        Ok((
            Box::new(BufferedPullDemuxer::new(source, self.lookahead)),
            Box::new(symphonia_audio_decoder()),
        ))
    }

    async fn open_video(
        &self,
        location: &str,
    ) -> Result<(Box<dyn PullDemuxer>, BoxedVideoDecoder)> {
        let path = PathBuf::from(location);
        debug!("Opening video file: {}", path.display());
        let source = tokio::task::spawn_blocking(move || IvfSource::open(&path))
            .await
            .map_err(|e| Error::Internal(format!("video open task failed: {}", e)))??;

        let pool = FramePool::new(self.frame_pool_size);
        Ok((
            Box::new(BufferedPullDemuxer::new(source, self.lookahead)),
            Box::new(passthrough_video_decoder(pool)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_files_are_io_errors() {
        let factory = FileMediaFactory::new(&BufferingConfig::default());
        assert!(matches!(
            factory.open_audio("/nonexistent/audio.m4a").await,
            Err(Error::Io(_))
        ));
        assert!(matches!(
            factory.open_video("/nonexistent/video.ivf").await,
            Err(Error::Io(_))
        ));
    }
}
