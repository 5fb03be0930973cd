//! Pull-based demuxer over a push-based sample source
//!
//! Keeps a bounded look-ahead window of ready samples. The source is
//! stopped when the window reaches its target and restarted when it drains
//! below it, so memory stays bounded regardless of container size.

use std::collections::VecDeque;

use async_trait::async_trait;
use avpipe_common::time::ticks_to_micros;
use avpipe_common::{Error, Result, StreamKind};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::source::{Sample, SampleSource, SourceEvent, TrackInfo, TrackMedia};
use crate::media::{
    AudioDecoderConfig, ChunkKind, DecoderConfig, EncodedChunk, VideoDecoderConfig,
};

/// Default look-ahead window in samples
pub const DEFAULT_LOOKAHEAD_SAMPLES: usize = 50;

/// Sequential chunk reader for one stream
///
/// `next_chunk` takes `&mut self`, so at most one read is ever outstanding.
#[async_trait]
pub trait PullDemuxer: Send + 'static {
    /// Parse container metadata and select the first track of `stream`
    async fn initialize(&mut self, stream: StreamKind) -> Result<()>;

    /// Decoder configuration of the selected track
    fn decoder_config(&self) -> Result<DecoderConfig>;

    /// Next chunk in decode order, or `None` once the stream is exhausted
    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>>;

    /// Duration of the selected track, when known
    fn duration_secs(&self) -> Option<f64> {
        None
    }
}

/// [`PullDemuxer`] backed by a [`SampleSource`]
pub struct BufferedPullDemuxer<S: SampleSource> {
    source: S,
    lookahead: usize,
    track: Option<TrackInfo>,
    config: Option<DecoderConfig>,
    ready: VecDeque<Sample>,
    events_tx: mpsc::UnboundedSender<SourceEvent>,
    events_rx: mpsc::UnboundedReceiver<SourceEvent>,
    source_running: bool,
    end_of_stream: bool,
}

impl<S: SampleSource> BufferedPullDemuxer<S> {
    pub fn new(source: S, lookahead: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            source,
            lookahead: lookahead.max(1),
            track: None,
            config: None,
            ready: VecDeque::new(),
            events_tx,
            events_rx,
            source_running: false,
            end_of_stream: false,
        }
    }

    /// Samples currently waiting in the look-ahead window
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_source_running(&self) -> bool {
        self.source_running
    }

    fn start_source(&mut self) {
        if !self.source_running && !self.end_of_stream {
            trace!("Starting {} extraction", self.source.name());
            self.source.start(self.events_tx.clone());
            self.source_running = true;
        }
    }

    fn stop_source(&mut self) {
        if self.source_running {
            trace!(
                "Stopping {} extraction with {} samples ready",
                self.source.name(),
                self.ready.len()
            );
            self.source.stop();
            self.source_running = false;
        }
    }

    fn on_event(&mut self, event: SourceEvent) -> Result<()> {
        match event {
            SourceEvent::Samples(batch) => {
                self.ready.extend(batch);
                if self.ready.len() >= self.lookahead {
                    self.stop_source();
                }
                Ok(())
            }
            SourceEvent::End => {
                debug!("{} reached end of stream", self.source.name());
                self.end_of_stream = true;
                self.source_running = false;
                Ok(())
            }
            SourceEvent::Error(message) => {
                self.source_running = false;
                Err(Error::Demux(message))
            }
        }
    }

    /// Apply everything the source pushed since the last read
    fn drain_pending(&mut self) -> Result<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_event(event)?;
        }
        Ok(())
    }

    fn to_chunk(sample: Sample) -> EncodedChunk {
        EncodedChunk {
            kind: if sample.is_sync {
                ChunkKind::Key
            } else {
                ChunkKind::Delta
            },
            timestamp_us: ticks_to_micros(sample.cts, sample.timescale),
            duration_us: ticks_to_micros(sample.duration as i64, sample.timescale),
            payload: sample.data,
        }
    }
}

/// Normalize container codec strings to decoder codec strings
pub fn normalize_codec(codec: &str) -> String {
    if codec.starts_with("vp08") {
        "vp8".to_string()
    } else {
        codec.to_string()
    }
}

fn build_config(track: &TrackInfo, description: Option<Vec<u8>>) -> DecoderConfig {
    let codec = normalize_codec(&track.codec);
    match track.media {
        TrackMedia::Audio {
            sample_rate,
            channel_count,
        } => DecoderConfig::Audio(AudioDecoderConfig {
            codec,
            sample_rate,
            channel_count,
            description,
        }),
        TrackMedia::Video { width, height } => DecoderConfig::Video(VideoDecoderConfig {
            codec,
            display_width: width,
            display_height: height,
            description,
        }),
    }
}

#[async_trait]
impl<S: SampleSource> PullDemuxer for BufferedPullDemuxer<S> {
    async fn initialize(&mut self, stream: StreamKind) -> Result<()> {
        if self.track.is_some() {
            return Err(Error::InvalidState(format!(
                "{} demuxer already initialized",
                self.source.name()
            )));
        }

        let info = self.source.info().await?;
        let track = info
            .first_track(stream)
            .cloned()
            .ok_or(Error::ConfigUnavailable { stream })?;

        self.source.select_track(track.id)?;
        let config = build_config(&track, self.source.description(track.id));

        info!(
            "Selected {} track {} from {}: codec={}",
            stream,
            track.id,
            self.source.name(),
            config.codec()
        );

        self.config = Some(config);
        self.track = Some(track);
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig> {
        self.config
            .clone()
            .ok_or_else(|| Error::InvalidState("demuxer not initialized".to_string()))
    }

    async fn next_chunk(&mut self) -> Result<Option<EncodedChunk>> {
        if self.track.is_none() {
            return Err(Error::InvalidState("demuxer not initialized".to_string()));
        }

        self.drain_pending()?;
        loop {
            if let Some(sample) = self.ready.pop_front() {
                if self.ready.len() < self.lookahead {
                    self.start_source();
                }
                return Ok(Some(Self::to_chunk(sample)));
            }

            if self.end_of_stream {
                return Ok(None);
            }

            self.start_source();
            match self.events_rx.recv().await {
                Some(event) => self.on_event(event)?,
                None => {
                    self.end_of_stream = true;
                    return Ok(None);
                }
            }
        }
    }

    fn duration_secs(&self) -> Option<f64> {
        self.track.as_ref().and_then(|t| t.duration_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::source::{SampleSink, SourceInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Source that pushes everything it holds, in fixed-size batches, when started
    struct ScriptedSource {
        info: SourceInfo,
        samples: VecDeque<Sample>,
        batch: usize,
        starts: Arc<AtomicUsize>,
        selected: Option<u32>,
    }

    impl ScriptedSource {
        fn audio(total: usize, batch: usize) -> (Self, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let samples = (0..total)
                .map(|i| Sample {
                    track_id: 1,
                    is_sync: true,
                    cts: (i as i64) * 1024,
                    duration: 1024,
                    timescale: 48_000,
                    data: vec![0u8; 8],
                })
                .collect();
            let source = Self {
                info: SourceInfo {
                    tracks: vec![TrackInfo {
                        id: 1,
                        codec: "aac".to_string(),
                        timescale: 48_000,
                        duration: Some(total as u64 * 1024),
                        media: TrackMedia::Audio {
                            sample_rate: 48_000,
                            channel_count: 2,
                        },
                    }],
                },
                samples,
                batch,
                starts: Arc::clone(&starts),
                selected: None,
            };
            (source, starts)
        }
    }

    #[async_trait]
    impl SampleSource for ScriptedSource {
        async fn info(&mut self) -> Result<SourceInfo> {
            Ok(self.info.clone())
        }

        fn select_track(&mut self, track_id: u32) -> Result<()> {
            self.selected = Some(track_id);
            Ok(())
        }

        fn start(&mut self, sink: SampleSink) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            while !self.samples.is_empty() {
                let n = self.batch.min(self.samples.len());
                let batch: Vec<_> = self.samples.drain(..n).collect();
                let _ = sink.send(SourceEvent::Samples(batch));
            }
            let _ = sink.send(SourceEvent::End);
        }

        fn stop(&mut self) {}

        fn description(&self, _track_id: u32) -> Option<Vec<u8>> {
            Some(vec![0x12, 0x10])
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_initialize_builds_audio_config() {
        let (source, _) = ScriptedSource::audio(4, 4);
        let mut demuxer = BufferedPullDemuxer::new(source, DEFAULT_LOOKAHEAD_SAMPLES);
        assert!(matches!(
            demuxer.decoder_config(),
            Err(Error::InvalidState(_))
        ));

        demuxer.initialize(StreamKind::Audio).await.unwrap();
        let config = demuxer.decoder_config().unwrap().into_audio().unwrap();
        assert_eq!(config.codec, "aac");
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.description, Some(vec![0x12, 0x10]));
        assert_eq!(demuxer.duration_secs(), Some(4.0 * 1024.0 / 48_000.0));
    }

    #[tokio::test]
    async fn test_missing_track_is_config_unavailable() {
        let (source, _) = ScriptedSource::audio(4, 4);
        let mut demuxer = BufferedPullDemuxer::new(source, DEFAULT_LOOKAHEAD_SAMPLES);
        let err = demuxer.initialize(StreamKind::Video).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigUnavailable {
                stream: StreamKind::Video
            }
        ));
    }

    #[tokio::test]
    async fn test_reads_in_order_then_none_forever() {
        let (source, _) = ScriptedSource::audio(5, 2);
        let mut demuxer = BufferedPullDemuxer::new(source, DEFAULT_LOOKAHEAD_SAMPLES);
        demuxer.initialize(StreamKind::Audio).await.unwrap();

        let mut timestamps = Vec::new();
        while let Some(chunk) = demuxer.next_chunk().await.unwrap() {
            assert_eq!(chunk.kind, ChunkKind::Key);
            timestamps.push(chunk.timestamp_us);
        }
        assert_eq!(timestamps, vec![0, 21_333, 42_666, 64_000, 85_333]);
        assert!(demuxer.next_chunk().await.unwrap().is_none());
        assert!(demuxer.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_stopped_at_lookahead() {
        let (source, starts) = ScriptedSource::audio(100, 60);
        let mut demuxer = BufferedPullDemuxer::new(source, 50);
        demuxer.initialize(StreamKind::Audio).await.unwrap();

        demuxer.next_chunk().await.unwrap().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(demuxer.ready_len(), 59);
        // Still above target after the read, so the source stays stopped
        assert!(!demuxer.is_source_running());
    }

    #[test]
    fn test_vp08_normalized() {
        assert_eq!(normalize_codec("vp08.00.10.08"), "vp8");
        assert_eq!(normalize_codec("vp8"), "vp8");
        assert_eq!(normalize_codec("avc1.64001f"), "avc1.64001f");
    }
}
