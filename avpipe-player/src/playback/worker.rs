//! Media worker: the control context
//!
//! A single task owns both pipelines, the media clock and the render loop.
//! Everything else talks to it through [`WorkerHandle`] commands; the only
//! state shared with the real-time audio thread is the sample ring, handed
//! out in [`InitializeDone`].

use std::sync::Arc;
use std::time::Duration;

use avpipe_common::config::TomlConfig;
use avpipe_common::{Error, EventBus, PipelineEvent, PlaybackState, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::audio_pipeline::{AudioBufferParams, AudioPipeline};
use super::clock_reporter::ClockReport;
use super::factory::MediaFactory;
use super::frame_sink::FrameSink;
use super::media_clock::MediaClock;
use super::ring_buffer::RingReader;
use super::video_pipeline::{VideoBufferParams, VideoPipeline};

/// Commands accepted by the media worker
pub enum WorkerCommand {
    Initialize {
        audio: String,
        video: String,
        reply: oneshot::Sender<Result<InitializeDone>>,
    },
    Play {
        media_time_secs: f64,
        captured_at: Instant,
    },
    Pause,
    UpdateMediaTime {
        media_time_secs: f64,
        captured_at: Instant,
    },
    Shutdown,
}

/// Successful initialization reply
pub struct InitializeDone {
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Consumer half of the sample ring, for the audio sink
    pub ring: RingReader,
    pub display_width: u32,
    pub display_height: u32,
    pub audio_duration_secs: Option<f64>,
    pub video_duration_secs: Option<f64>,
}

/// Cloneable command sender for a running [`MediaWorker`]
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn from_sender(tx: mpsc::UnboundedSender<WorkerCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::ChannelClosed("media worker has stopped".to_string()))
    }

    /// Open both streams and wait until each has buffered its first fill
    pub async fn initialize(&self, audio: &str, video: &str) -> Result<InitializeDone> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerCommand::Initialize {
            audio: audio.to_string(),
            video: video.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| {
            Error::ChannelClosed("media worker dropped initialize reply".to_string())
        })?
    }

    pub fn play(&self, report: ClockReport) -> Result<()> {
        self.send(WorkerCommand::Play {
            media_time_secs: report.media_time_secs,
            captured_at: report.captured_at,
        })
    }

    pub fn pause(&self) -> Result<()> {
        self.send(WorkerCommand::Pause)
    }

    pub fn update_media_time(&self, report: ClockReport) -> Result<()> {
        self.send(WorkerCommand::UpdateMediaTime {
            media_time_secs: report.media_time_secs,
            captured_at: report.captured_at,
        })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(WorkerCommand::Shutdown)
    }
}

pub struct MediaWorker {
    factory: Arc<dyn MediaFactory>,
    sink: Arc<dyn FrameSink>,
    audio_params: AudioBufferParams,
    video_params: VideoBufferParams,
    render_period: Duration,
    events: EventBus,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    audio: Option<Arc<AudioPipeline>>,
    video: Option<Arc<VideoPipeline>>,
    clock: MediaClock,
    render_ticker: Option<Interval>,
}

impl MediaWorker {
    pub fn new(
        factory: Arc<dyn MediaFactory>,
        sink: Arc<dyn FrameSink>,
        config: &TomlConfig,
        events: EventBus,
    ) -> (Self, WorkerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let worker = Self {
            factory,
            sink,
            audio_params: AudioBufferParams::from(&config.buffering),
            video_params: VideoBufferParams::from(&config.buffering),
            render_period: Duration::from_millis(config.clock.render_interval_ms.max(1)),
            events,
            commands,
            audio: None,
            video: None,
            clock: MediaClock::new(),
            render_ticker: None,
        };
        (worker, WorkerHandle { tx })
    }

    /// Run the worker on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub fn is_playing(&self) -> bool {
        self.render_ticker.is_some()
    }

    pub async fn run(mut self) {
        info!("Media worker started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = next_tick(&mut self.render_ticker) => self.render_tick(),
            }
        }
        self.teardown();
        info!("Media worker stopped");
    }

    async fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Initialize {
                audio,
                video,
                reply,
            } => {
                let result = self.initialize(&audio, &video).await;
                if let Err(e) = &result {
                    error!("Initialization failed: {}", e);
                }
                if reply.send(result).is_err() {
                    warn!("Initialize requester went away before the reply");
                }
            }
            WorkerCommand::Play {
                media_time_secs,
                captured_at,
            } => {
                self.clock.update(media_time_secs, captured_at);
                self.play();
            }
            WorkerCommand::Pause => self.pause(),
            WorkerCommand::UpdateMediaTime {
                media_time_secs,
                captured_at,
            } => {
                trace!(media_time_secs, "Media time update");
                self.clock.update(media_time_secs, captured_at);
            }
            WorkerCommand::Shutdown => {}
        }
    }

    async fn initialize(&mut self, audio_location: &str, video_location: &str) -> Result<InitializeDone> {
        if self.audio.is_some() || self.video.is_some() {
            return Err(Error::InvalidState("media worker already initialized".to_string()));
        }

        let ((audio_demuxer, audio_decoder), (video_demuxer, video_decoder)) = tokio::try_join!(
            self.factory.open_audio(audio_location),
            self.factory.open_video(video_location),
        )?;

        let ((audio, audio_ready), (video, video_ready)) = tokio::try_join!(
            AudioPipeline::initialize(
                audio_demuxer,
                audio_decoder,
                self.audio_params,
                self.events.clone(),
            ),
            VideoPipeline::initialize(
                video_demuxer,
                video_decoder,
                Arc::clone(&self.sink),
                self.video_params,
                self.events.clone(),
            ),
        )?;

        if let Err(e) = tokio::try_join!(audio_ready.wait(), video_ready.wait()) {
            audio.shutdown();
            video.shutdown();
            return Err(e);
        }

        let ring = audio
            .take_reader()
            .ok_or_else(|| Error::Internal("sample ring reader already taken".to_string()))?;

        let done = InitializeDone {
            sample_rate: audio.sample_rate(),
            channel_count: audio.channel_count(),
            ring,
            display_width: video.display_width(),
            display_height: video.display_height(),
            audio_duration_secs: audio.duration_secs(),
            video_duration_secs: video.duration_secs(),
        };
        info!(
            "Media ready: audio {} Hz x{}, video {}x{}",
            done.sample_rate, done.channel_count, done.display_width, done.display_height
        );

        self.audio = Some(audio);
        self.video = Some(video);
        Ok(done)
    }

    fn play(&mut self) {
        if self.render_ticker.is_some() {
            trace!("Already playing");
            return;
        }
        let Some(audio) = &self.audio else {
            warn!("Play before initialization ignored");
            return;
        };
        audio.play();

        let mut ticker = interval(self.render_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.render_ticker = Some(ticker);

        info!("Playback started at {:.3}s", self.clock.now_secs());
        self.emit_state_change(PlaybackState::Paused, PlaybackState::Playing);
    }

    fn pause(&mut self) {
        if self.render_ticker.take().is_none() {
            trace!("Already paused");
            return;
        }
        if let Some(audio) = &self.audio {
            audio.pause();
        }
        info!("Playback paused at {:.3}s", self.clock.now_secs());
        self.emit_state_change(PlaybackState::Playing, PlaybackState::Paused);
    }

    fn render_tick(&mut self) {
        if let Some(video) = &self.video {
            video.render(self.clock.now_us(), true);
        }
    }

    fn emit_state_change(&self, old_state: PlaybackState, new_state: PlaybackState) {
        self.events.emit(PipelineEvent::PlaybackStateChanged {
            old_state,
            new_state,
            timestamp: avpipe_common::time::now(),
        });
    }

    fn teardown(&mut self) {
        self.render_ticker = None;
        if let Some(audio) = self.audio.take() {
            audio.shutdown();
        }
        if let Some(video) = self.video.take() {
            video.shutdown();
        }
        debug!("Media worker pipelines released");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
