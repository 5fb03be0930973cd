//! avpipe player - headless entry point
//!
//! Opens an audio file and an IVF video file, buffers both, and plays them
//! against the audio output clock. Video frames are selected on schedule and
//! handed to a counting sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use avpipe_common::config::{load_config, TomlConfig, CONFIG_ENV_VAR};
use avpipe_common::{EventBus, PipelineEvent};
use avpipe_player::audio::AudioSink;
use avpipe_player::playback::{
    ClockReporter, CountingFrameSink, FileMediaFactory, MediaWorker,
};
use clap::Parser;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for avpipe-player
#[derive(Parser, Debug)]
#[command(name = "avpipe-player")]
#[command(about = "Buffered audio/video playback driven by the audio clock")]
#[command(version)]
struct Args {
    /// Audio file (MP4/M4A, MP3, FLAC, Ogg)
    #[arg(short, long, env = "AVPIPE_AUDIO")]
    audio: PathBuf,

    /// Video file (IVF: VP8, VP9 or AV1)
    #[arg(short = 'V', long, env = "AVPIPE_VIDEO")]
    video: PathBuf,

    /// Configuration file (overrides AVPIPE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long, env = "AVPIPE_PLAY_SECS")]
    play_secs: Option<f64>,

    /// Output volume (0.0-1.0); overrides the configured value
    #[arg(long, env = "AVPIPE_VOLUME")]
    volume: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to load configuration")?;
    if let Some(volume) = args.volume {
        config.output.volume = volume;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config)?;

    info!("Starting avpipe player");
    info!("Audio: {}", args.audio.display());
    info!("Video: {}", args.video.display());

    let events = EventBus::new(256);
    spawn_event_logger(&events);

    let factory = Arc::new(FileMediaFactory::new(&config.buffering));
    let frames = Arc::new(CountingFrameSink::new());
    let (worker, handle) = MediaWorker::new(factory, frames.clone(), &config, events.clone());
    let worker_task = worker.spawn();

    let ready = handle
        .initialize(&args.audio.to_string_lossy(), &args.video.to_string_lossy())
        .await
        .context("Failed to initialize media")?;

    if let Some(duration) = ready.audio_duration_secs {
        info!("Audio duration: {:.2}s", duration);
    }
    if let Some(duration) = ready.video_duration_secs {
        info!("Video duration: {:.2}s", duration);
    }

    let mut sink = AudioSink::new(
        ready.ring,
        ready.sample_rate,
        ready.channel_count,
        config.output.device.as_deref(),
        config.output.volume,
    )
    .context("Failed to open audio output")?;

    let mut reporter = ClockReporter::new(
        Arc::new(sink.clock()),
        Duration::from_millis(config.clock.report_interval_ms),
    );

    handle
        .play(reporter.sample())
        .context("Media worker stopped before play")?;
    sink.play().context("Failed to start audio output")?;
    reporter.start(handle.clone());

    wait_for_stop(args.play_secs).await;

    reporter.stop();
    if let Err(e) = handle.pause() {
        warn!("Failed to pause media worker: {}", e);
    }
    if let Err(e) = sink.pause() {
        warn!("Failed to pause audio output: {}", e);
    }
    if let Err(e) = handle.shutdown() {
        warn!("Failed to stop media worker: {}", e);
    }
    worker_task.await.context("Media worker task failed")?;

    info!(
        "Playback finished: {} frame(s) painted, {} audio underrun(s)",
        frames.painted(),
        sink.underruns()
    );
    Ok(())
}

/// RUST_LOG wins; otherwise the configured level. Optionally mirrors to a file.
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "avpipe_player={level},avpipe_common={level}",
            level = config.logging.level
        ))
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::EndOfStream { stream }) => {
                    info!("{:?} stream fully buffered", stream)
                }
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(event = %json, "Pipeline event"),
                    Err(e) => warn!("Failed to serialize pipeline event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event logger lagged, {} event(s) missed", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn wait_for_stop(play_secs: Option<f64>) {
    let timer = async {
        match play_secs {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                tokio::time::sleep(Duration::from_secs_f64(secs)).await
            }
            _ => std::future::pending().await,
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C, stopping"),
                Err(e) => warn!("Ctrl+C handler failed: {}", e),
            }
        }
        _ = timer => info!("Play time elapsed, stopping"),
    }
}
