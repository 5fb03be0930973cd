//! Video pipeline
//!
//! Keeps a small buffer of decoded frames ahead of the render position and
//! picks the frame to show for each render tick. Refill passes are
//! triggered by render ticks and by decoder output; concurrent triggers
//! coalesce.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use avpipe_common::config::BufferingConfig;
use avpipe_common::{Error, EventBus, PipelineEvent, Result, StreamKind};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::frame_buffer::FrameBuffer;
use super::frame_sink::FrameSink;
use super::lock_or_recover;
use super::refill::{FirstFill, ReadySignal, RefillGuard};
use crate::decode::{BoxedVideoDecoder, DecoderEvent, OutputReceiver};
use crate::demux::PullDemuxer;
use crate::media::{DecodedVideoFrame, VideoDecoderConfig};

/// Video buffering parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoBufferParams {
    /// Ceiling on decoded frames plus chunks in the decoder
    pub frame_buffer_target: usize,
}

impl Default for VideoBufferParams {
    fn default() -> Self {
        Self {
            frame_buffer_target: 3,
        }
    }
}

impl From<&BufferingConfig> for VideoBufferParams {
    fn from(config: &BufferingConfig) -> Self {
        Self {
            frame_buffer_target: config.video_frame_buffer_target,
        }
    }
}

/// Result of one refill pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillOutcome {
    Full,
    Submitted(usize),
    EndOfStream,
    Stopped,
    Failed,
}

/// What a render tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A frame was selected (and painted if requested)
    Shown { timestamp_us: i64, dropped: usize },
    /// Nothing buffered; the tick was skipped
    Skipped,
}

pub struct VideoPipeline {
    params: VideoBufferParams,
    config: VideoDecoderConfig,
    duration_secs: Option<f64>,
    demuxer: AsyncMutex<Box<dyn PullDemuxer>>,
    decoder: BoxedVideoDecoder,
    frames: Mutex<FrameBuffer>,
    /// Chunks submitted whose decoder event has not been handled yet
    pending_decodes: AtomicUsize,
    sink: Arc<dyn FrameSink>,
    guard: RefillGuard,
    first_fill: FirstFill,
    end_of_stream: AtomicBool,
    stopped: AtomicBool,
    events: EventBus,
    output_task: Mutex<Option<JoinHandle<()>>>,
}

impl VideoPipeline {
    /// Select the video track, size the sink, configure the decoder and begin
    /// the first fill
    pub async fn initialize(
        mut demuxer: Box<dyn PullDemuxer>,
        mut decoder: BoxedVideoDecoder,
        sink: Arc<dyn FrameSink>,
        params: VideoBufferParams,
        events: EventBus,
    ) -> Result<(Arc<Self>, ReadySignal)> {
        demuxer.initialize(StreamKind::Video).await?;
        let config = demuxer.decoder_config()?.into_video()?;

        sink.configure(config.display_width, config.display_height);

        if !decoder.is_config_supported(&config) {
            return Err(Error::UnsupportedConfig {
                stream: StreamKind::Video,
                codec: config.codec.clone(),
            });
        }
        let (output_tx, output_rx) = crate::decode::output_channel();
        decoder.configure(&config, output_tx)?;

        info!(
            "Video pipeline initialized: codec={}, {}x{}",
            config.codec, config.display_width, config.display_height
        );

        let (first_fill, ready) = FirstFill::new(StreamKind::Video);
        let duration_secs = demuxer.duration_secs();
        let pipeline = Arc::new(Self {
            params,
            config,
            duration_secs,
            demuxer: AsyncMutex::new(demuxer),
            decoder,
            frames: Mutex::new(FrameBuffer::new()),
            pending_decodes: AtomicUsize::new(0),
            sink,
            guard: RefillGuard::new(),
            first_fill,
            end_of_stream: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            events,
            output_task: Mutex::new(None),
        });

        let task = Self::spawn_output_task(&pipeline, output_rx);
        *lock_or_recover(&pipeline.output_task) = Some(task);

        pipeline.request_fill();
        Ok((pipeline, ready))
    }

    fn spawn_output_task(
        this: &Arc<Self>,
        mut output_rx: OutputReceiver<DecodedVideoFrame>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            while let Some(event) = output_rx.recv().await {
                let Some(pipeline) = weak.upgrade() else {
                    break;
                };
                match event {
                    DecoderEvent::Output(frame) => {
                        trace!(timestamp_us = frame.timestamp_us, "Video frame decoded");
                        lock_or_recover(&pipeline.frames).push(frame);
                    }
                    DecoderEvent::Drained => trace!("Video chunk decoded to nothing"),
                    DecoderEvent::Error(message) => {
                        error!("Video decoder error: {}", message);
                        pipeline.events.emit(PipelineEvent::DecoderError {
                            stream: StreamKind::Video,
                            message,
                        });
                    }
                }
                // After the push, so the in-flight count never undercounts
                pipeline.complete_decode();
                pipeline.request_fill();
            }
            trace!("Video decoder output closed");
        })
    }

    pub fn config(&self) -> &VideoDecoderConfig {
        &self.config
    }

    pub fn display_width(&self) -> u32 {
        self.config.display_width
    }

    pub fn display_height(&self) -> u32 {
        self.config.display_height
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    pub fn buffered_frames(&self) -> usize {
        lock_or_recover(&self.frames).len()
    }

    pub fn decoder_queue_depth(&self) -> usize {
        self.decoder.queue_depth()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Select the frame for `timestamp_us` and report its timestamp
    ///
    /// Evicts and releases frames older than the chosen one.
    pub fn choose_frame(&self, timestamp_us: i64) -> Option<i64> {
        let mut frames = lock_or_recover(&self.frames);
        let selection = frames.choose(timestamp_us)?;
        if selection.dropped > 0 {
            self.report_dropped(selection.dropped, timestamp_us);
        }
        Some(selection.frame.timestamp_us)
    }

    /// Render tick: select a frame, top up the buffer, paint
    ///
    /// With `paint` false the buffer advances without touching the sink.
    pub fn render(self: &Arc<Self>, timestamp_us: i64, paint: bool) -> RenderOutcome {
        let outcome = {
            let mut frames = lock_or_recover(&self.frames);
            match frames.choose(timestamp_us) {
                Some(selection) => {
                    if selection.dropped > 0 {
                        self.report_dropped(selection.dropped, timestamp_us);
                    }
                    if paint {
                        self.sink.paint(selection.frame);
                    }
                    RenderOutcome::Shown {
                        timestamp_us: selection.frame.timestamp_us,
                        dropped: selection.dropped,
                    }
                }
                None => RenderOutcome::Skipped,
            }
        };

        self.request_fill();

        if outcome == RenderOutcome::Skipped {
            warn!("No video frame for {}us, skipping render", timestamp_us);
            self.events
                .emit(PipelineEvent::RenderSkipped { timestamp_us });
        }
        outcome
    }

    fn report_dropped(&self, count: usize, timestamp_us: i64) {
        debug!("Dropped {} stale video frame(s) at {}us", count, timestamp_us);
        self.events.emit(PipelineEvent::FramesDropped {
            count,
            timestamp_us,
        });
    }

    /// Release buffered frames and stop background work
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(task) = lock_or_recover(&self.output_task).take() {
            task.abort();
        }
        lock_or_recover(&self.frames).clear();
        debug!("Video pipeline shut down");
    }

    /// Request a refill pass, coalescing with one already in flight
    pub fn request_fill(self: &Arc<Self>) {
        if !self.guard.try_begin() {
            trace!("Video refill already in flight, coalesced");
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let outcome = this.fill_pass().await;
                trace!(?outcome, "Video refill pass finished");
                if this.guard.finish() {
                    continue;
                }
                if matches!(outcome, FillOutcome::Failed | FillOutcome::Stopped) {
                    break;
                }
                // Re-check at the next scheduling opportunity whether or not
                // the pass submitted work
                tokio::task::yield_now().await;
                if this.needs_fill() && !this.guard.is_in_flight() && this.guard.try_begin() {
                    continue;
                }
                break;
            }
        });
    }

    /// Buffered frames plus submitted chunks not yet delivered
    fn frames_in_flight(&self) -> usize {
        self.buffered_frames() + self.pending_decodes.load(Ordering::Acquire)
    }

    fn complete_decode(&self) {
        let _ = self
            .pending_decodes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn needs_fill(&self) -> bool {
        !self.is_stopped()
            && !self.is_end_of_stream()
            && self.frames_in_flight() < self.params.frame_buffer_target
    }

    async fn fill_pass(&self) -> FillOutcome {
        if self.is_stopped() {
            return FillOutcome::Stopped;
        }
        let target = self.params.frame_buffer_target;

        let buffered = self.buffered_frames();
        if buffered >= target {
            self.signal_ready(buffered);
            return FillOutcome::Full;
        }
        if self.is_end_of_stream() {
            return FillOutcome::EndOfStream;
        }

        let mut submitted = 0usize;
        while !self.is_stopped() && self.frames_in_flight() < target {
            let next = {
                let mut demuxer = self.demuxer.lock().await;
                demuxer.next_chunk().await
            };

            match next {
                Ok(Some(chunk)) => {
                    trace!(timestamp_us = chunk.timestamp_us, "Submitting video chunk");
                    self.pending_decodes.fetch_add(1, Ordering::AcqRel);
                    if let Err(e) = self.decoder.decode(chunk) {
                        self.complete_decode();
                        error!("Video decoder rejected chunk: {}", e);
                        self.first_fill.fail(e);
                        return FillOutcome::Failed;
                    }
                    submitted += 1;
                }
                Ok(None) => {
                    if !self.end_of_stream.swap(true, Ordering::AcqRel) {
                        info!("Video reached end of stream");
                        self.events.emit(PipelineEvent::EndOfStream {
                            stream: StreamKind::Video,
                        });
                    }
                    self.signal_ready(self.buffered_frames());
                    return FillOutcome::EndOfStream;
                }
                Err(e) => {
                    error!("Video demux failed: {}", e);
                    self.end_of_stream.store(true, Ordering::Release);
                    self.first_fill.fail(e);
                    return FillOutcome::Failed;
                }
            }

            tokio::task::yield_now().await;
        }

        let buffered = self.buffered_frames();
        trace!(
            submitted,
            buffered,
            pending = self.pending_decodes.load(Ordering::Acquire),
            "Video refill pass complete"
        );
        if buffered >= target {
            self.signal_ready(buffered);
        }
        FillOutcome::Submitted(submitted)
    }

    fn signal_ready(&self, buffered: usize) {
        if self.first_fill.complete() {
            info!("Video ready with {} frame(s) buffered", buffered);
            self.events.emit(PipelineEvent::StreamReady {
                stream: StreamKind::Video,
                buffered: buffered as f64,
            });
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        if let Some(task) = lock_or_recover(&self.output_task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_config() {
        let mut config = BufferingConfig::default();
        config.video_frame_buffer_target = 5;
        assert_eq!(
            VideoBufferParams::from(&config).frame_buffer_target,
            5
        );
        assert_eq!(VideoBufferParams::default().frame_buffer_target, 3);
    }
}
