//! Audio pipeline
//!
//! Keeps roughly `decode_target_secs` of decoded audio in the shared sample
//! ring while bounding decoder backlog. Refill passes are triggered by
//! decoder output, by the playback timer, and by `play()`; concurrent
//! triggers coalesce into at most one extra pass.
//!
//! State machine: Idle → Filling (initialized) ↔ Playing. Shutdown returns
//! to Idle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use avpipe_common::config::BufferingConfig;
use avpipe_common::{Error, EventBus, PipelineEvent, Result, StreamKind};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::lock_or_recover;
use super::refill::{FirstFill, ReadySignal, RefillGuard, RefillTimer};
use super::ring_buffer::{sample_ring, RingReader, RingWriter};
use crate::decode::{BoxedAudioDecoder, DecoderEvent, OutputReceiver};
use crate::demux::PullDemuxer;
use crate::media::{AudioDecoderConfig, DecodedAudioBlock};

/// Audio buffering parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioBufferParams {
    /// Seconds of decoded audio to keep in the ring
    pub decode_target_secs: f64,
    /// Ring capacity in seconds; must exceed the decode target
    pub ring_capacity_secs: f64,
    /// Decoder backlog at which refill stops submitting
    pub decoder_queue_max: usize,
}

impl Default for AudioBufferParams {
    fn default() -> Self {
        Self {
            decode_target_secs: 0.3,
            ring_capacity_secs: 0.6,
            decoder_queue_max: 5,
        }
    }
}

impl From<&BufferingConfig> for AudioBufferParams {
    fn from(config: &BufferingConfig) -> Self {
        Self {
            decode_target_secs: config.audio_decode_target_secs,
            ring_capacity_secs: config.audio_ring_capacity_secs,
            decoder_queue_max: config.audio_decoder_queue_max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Idle,
    Filling,
    Playing,
}

/// Result of one refill pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Decoder backlog at its ceiling; decoder output will re-trigger
    Saturated,
    /// Ring already at target
    Healthy,
    /// Chunks were submitted
    Submitted(usize),
    EndOfStream,
    Stopped,
    Failed,
}

/// Interleave planar channels into `out`
///
/// `out.len()` must be a multiple of the plane count; frames beyond the
/// shortest plane are left untouched.
pub fn interleave(planes: &[Vec<f32>], out: &mut [f32]) {
    let channels = planes.len();
    if channels == 0 {
        return;
    }
    for (frame, slot) in out.chunks_exact_mut(channels).enumerate() {
        for (channel, sample) in slot.iter_mut().enumerate() {
            if let Some(value) = planes[channel].get(frame) {
                *sample = *value;
            }
        }
    }
}

pub struct AudioPipeline {
    params: AudioBufferParams,
    config: AudioDecoderConfig,
    duration_secs: Option<f64>,
    demuxer: AsyncMutex<Box<dyn PullDemuxer>>,
    decoder: BoxedAudioDecoder,
    writer: Mutex<RingWriter>,
    reader: Mutex<Option<RingReader>>,
    scratch: Mutex<Vec<f32>>,
    state: Mutex<AudioState>,
    guard: RefillGuard,
    timer: RefillTimer,
    first_fill: FirstFill,
    end_of_stream: AtomicBool,
    dropped_samples: AtomicU64,
    events: EventBus,
    output_task: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPipeline {
    /// Select the audio track, configure the decoder and begin the first fill
    ///
    /// Returns the pipeline and a signal that resolves once the ring first
    /// holds the decode target (or the stream ends first).
    pub async fn initialize(
        mut demuxer: Box<dyn PullDemuxer>,
        mut decoder: BoxedAudioDecoder,
        params: AudioBufferParams,
        events: EventBus,
    ) -> Result<(Arc<Self>, ReadySignal)> {
        demuxer.initialize(StreamKind::Audio).await?;
        let config = demuxer.decoder_config()?.into_audio()?;

        if !decoder.is_config_supported(&config) {
            return Err(Error::UnsupportedConfig {
                stream: StreamKind::Audio,
                codec: config.codec.clone(),
            });
        }
        let (output_tx, output_rx) = crate::decode::output_channel();
        decoder.configure(&config, output_tx)?;

        let channels = config.channel_count.max(1) as usize;
        let frames = (params.ring_capacity_secs * config.sample_rate as f64).round() as usize;
        let (writer, reader) = sample_ring(frames.max(1) * channels);

        info!(
            "Audio pipeline initialized: codec={}, {} Hz, {} channel(s), ring {} samples",
            config.codec,
            config.sample_rate,
            config.channel_count,
            writer.capacity()
        );

        let (first_fill, ready) = FirstFill::new(StreamKind::Audio);
        let duration_secs = demuxer.duration_secs();
        let pipeline = Arc::new(Self {
            params,
            config,
            duration_secs,
            demuxer: AsyncMutex::new(demuxer),
            decoder,
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            scratch: Mutex::new(Vec::new()),
            state: Mutex::new(AudioState::Filling),
            guard: RefillGuard::new(),
            timer: RefillTimer::new(),
            first_fill,
            end_of_stream: AtomicBool::new(false),
            dropped_samples: AtomicU64::new(0),
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
        mut output_rx: OutputReceiver<DecodedAudioBlock>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            while let Some(event) = output_rx.recv().await {
                let Some(pipeline) = weak.upgrade() else {
                    break;
                };
                match event {
                    DecoderEvent::Output(block) => pipeline.buffer_audio_data(&block),
                    DecoderEvent::Drained => trace!("Audio chunk decoded to nothing"),
                    DecoderEvent::Error(message) => {
                        error!("Audio decoder error: {}", message);
                        pipeline.events.emit(PipelineEvent::DecoderError {
                            stream: StreamKind::Audio,
                            message,
                        });
                    }
                }
                pipeline.request_fill();
            }
            trace!("Audio decoder output closed");
        })
    }

    /// Hand out the ring's consumer half (once)
    pub fn take_reader(&self) -> Option<RingReader> {
        lock_or_recover(&self.reader).take()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.config.channel_count
    }

    pub fn config(&self) -> &AudioDecoderConfig {
        &self.config
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    pub fn state(&self) -> AudioState {
        *lock_or_recover(&self.state)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    /// Total samples dropped on ring overflow
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Decoded audio waiting in the ring, in seconds
    pub fn buffered_secs(&self) -> f64 {
        let samples = lock_or_recover(&self.writer).available_read();
        let per_sec = self.config.sample_rate as f64 * self.config.channel_count.max(1) as f64;
        if per_sec <= 0.0 {
            return 0.0;
        }
        samples as f64 / per_sec
    }

    /// Ring fill level (0-100)
    pub fn buffer_health_percent(&self) -> f32 {
        lock_or_recover(&self.writer).stats().fill_percent()
    }

    /// Decoder chunks submitted but not yet decoded
    pub fn decoder_queue_depth(&self) -> usize {
        self.decoder.queue_depth()
    }

    /// Enter Playing and start the refill cadence
    ///
    /// No-op if already playing or shut down.
    pub fn play(self: &Arc<Self>) {
        {
            let mut state = lock_or_recover(&self.state);
            match *state {
                AudioState::Playing => {
                    trace!("Audio already playing");
                    return;
                }
                AudioState::Idle => {
                    warn!("Ignoring play on an idle audio pipeline");
                    return;
                }
                AudioState::Filling => *state = AudioState::Playing,
            }
        }
        info!("Audio playback started");
        self.request_fill();
    }

    /// Leave Playing; the refill timer is cancelled
    pub fn pause(&self) {
        {
            let mut state = lock_or_recover(&self.state);
            if *state != AudioState::Playing {
                trace!("Audio not playing, pause ignored");
                return;
            }
            *state = AudioState::Filling;
        }
        self.timer.cancel();
        info!("Audio playback paused");
    }

    /// Stop all background work
    pub fn shutdown(&self) {
        *lock_or_recover(&self.state) = AudioState::Idle;
        self.timer.cancel();
        if let Some(task) = lock_or_recover(&self.output_task).take() {
            task.abort();
        }
        debug!("Audio pipeline shut down");
    }

    /// Request a refill pass
    ///
    /// Starts a pass on the runtime unless one is in flight, in which case
    /// the request is coalesced into one rerun.
    pub fn request_fill(self: &Arc<Self>) {
        if !self.guard.try_begin() {
            trace!("Audio refill already in flight, coalesced");
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let outcome = this.fill_pass().await;
                trace!(?outcome, "Audio refill pass finished");
                if !this.guard.finish() {
                    break;
                }
            }
        });
    }

    async fn fill_pass(self: &Arc<Self>) -> FillOutcome {
        if self.state() == AudioState::Idle {
            return FillOutcome::Stopped;
        }

        let queue_max = self.params.decoder_queue_max;
        let target = self.params.decode_target_secs;

        if self.decoder.queue_depth() >= queue_max {
            trace!(
                "Audio decoder saturated ({} queued), waiting for output",
                self.decoder.queue_depth()
            );
            return FillOutcome::Saturated;
        }

        let mut buffered = self.buffered_secs();
        if buffered >= target {
            self.on_target_reached(buffered);
            return FillOutcome::Healthy;
        }

        if self.is_end_of_stream() {
            return FillOutcome::EndOfStream;
        }

        let mut submitted = 0usize;
        while buffered < target && self.decoder.queue_depth() < queue_max {
            let next = {
                let mut demuxer = self.demuxer.lock().await;
                demuxer.next_chunk().await
            };

            match next {
                Ok(Some(chunk)) => {
                    trace!(timestamp_us = chunk.timestamp_us, "Submitting audio chunk");
                    if let Err(e) = self.decoder.decode(chunk) {
                        error!("Audio decoder rejected chunk: {}", e);
                        self.first_fill.fail(e);
                        return FillOutcome::Failed;
                    }
                    submitted += 1;
                }
                Ok(None) => {
                    self.mark_end_of_stream(buffered);
                    return FillOutcome::EndOfStream;
                }
                Err(e) => {
                    error!("Audio demux failed: {}", e);
                    self.end_of_stream.store(true, Ordering::Release);
                    self.first_fill.fail(e);
                    return FillOutcome::Failed;
                }
            }

            // Let delivered decoder output reach the ring before re-measuring
            tokio::task::yield_now().await;
            buffered = self.buffered_secs();
        }

        debug!(
            submitted,
            buffered_secs = buffered,
            queue_depth = self.decoder.queue_depth(),
            "Audio refill pass complete"
        );
        if buffered >= target {
            self.signal_ready(buffered);
        }
        FillOutcome::Submitted(submitted)
    }

    fn on_target_reached(self: &Arc<Self>, buffered: f64) {
        if self.state() == AudioState::Playing {
            // Top up again once half the buffered audio has played out
            let weak = Arc::downgrade(self);
            self.timer
                .schedule(Duration::from_secs_f64(buffered / 2.0), async move {
                    if let Some(pipeline) = weak.upgrade() {
                        pipeline.request_fill();
                    }
                });
        }
        self.signal_ready(buffered);
    }

    fn signal_ready(&self, buffered: f64) {
        if self.first_fill.complete() {
            info!("Audio ready with {:.3}s buffered", buffered);
            self.events.emit(PipelineEvent::StreamReady {
                stream: StreamKind::Audio,
                buffered,
            });
        }
    }

    fn mark_end_of_stream(&self, buffered: f64) {
        if !self.end_of_stream.swap(true, Ordering::AcqRel) {
            info!("Audio reached end of stream with {:.3}s buffered", buffered);
            self.events.emit(PipelineEvent::EndOfStream {
                stream: StreamKind::Audio,
            });
        }
        self.signal_ready(buffered);
    }

    /// Interleave a decoded block into the ring
    fn buffer_audio_data(&self, block: &DecodedAudioBlock) {
        let channels = block.channel_count();
        let total = block.sample_count();
        if total == 0 {
            return;
        }
        if channels != self.config.channel_count as usize {
            warn!(
                "Dropping audio block with {} channel(s), stream has {}",
                channels, self.config.channel_count
            );
            return;
        }

        let written = {
            let mut scratch = lock_or_recover(&self.scratch);
            if scratch.len() < total {
                scratch.resize(total, 0.0);
            }
            interleave(&block.planes, &mut scratch[..total]);
            lock_or_recover(&self.writer).write_frames(&scratch[..total], channels)
        };

        if written < total {
            let dropped = total - written;
            let total_dropped =
                self.dropped_samples.fetch_add(dropped as u64, Ordering::Relaxed) + dropped as u64;
            error!(
                "Audio ring overflow: dropped {} samples at {}us ({} total)",
                dropped, block.timestamp_us, total_dropped
            );
            self.events.emit(PipelineEvent::AudioOverflow {
                dropped_samples: dropped,
                total_dropped,
            });
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.timer.cancel();
        if let Some(task) = lock_or_recover(&self.output_task).take() {
            task.abort();
        }
    }
}
