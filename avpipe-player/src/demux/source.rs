//! Push-based sample sources
//!
//! A source parses a container and, once started, pushes batches of
//! samples for the selected track until stopped or exhausted. The pull
//! demuxer sits on top and turns this into one-chunk-at-a-time reads.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use avpipe_common::{Result, StreamKind};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// One container sample, in track time units
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub track_id: u32,
    pub is_sync: bool,
    /// Composition timestamp in `timescale` ticks
    pub cts: i64,
    pub duration: u64,
    pub timescale: u32,
    pub data: Vec<u8>,
}

/// Media-specific track properties
#[derive(Debug, Clone, PartialEq)]
pub enum TrackMedia {
    Audio { sample_rate: u32, channel_count: u16 },
    Video { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: u32,
    /// Codec string as stored in the container
    pub codec: String,
    pub timescale: u32,
    /// Track duration in `timescale` ticks, when the container records it
    pub duration: Option<u64>,
    pub media: TrackMedia,
}

impl TrackInfo {
    pub fn kind(&self) -> StreamKind {
        match self.media {
            TrackMedia::Audio { .. } => StreamKind::Audio,
            TrackMedia::Video { .. } => StreamKind::Video,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        if self.timescale == 0 {
            return None;
        }
        self.duration
            .map(|ticks| ticks as f64 / self.timescale as f64)
    }
}

/// Container-level metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    pub tracks: Vec<TrackInfo>,
}

impl SourceInfo {
    /// First track of the given kind
    pub fn first_track(&self, kind: StreamKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}

/// Messages pushed by a started source
#[derive(Debug)]
pub enum SourceEvent {
    Samples(Vec<Sample>),
    End,
    Error(String),
}

pub type SampleSink = mpsc::UnboundedSender<SourceEvent>;

/// Push-based container reader
#[async_trait]
pub trait SampleSource: Send + 'static {
    /// Container metadata, available once the header is parsed
    async fn info(&mut self) -> Result<SourceInfo>;

    /// Restrict extraction to one track
    ///
    /// Only one selection is supported per source.
    fn select_track(&mut self, track_id: u32) -> Result<()>;

    /// Begin or resume pushing samples into `sink`
    fn start(&mut self, sink: SampleSink);

    /// Pause pushing; samples already sent remain in flight
    fn stop(&mut self);

    /// Codec-private setup bytes for a track
    fn description(&self, track_id: u32) -> Option<Vec<u8>>;

    /// Short identifier for logs
    fn name(&self) -> &str;
}

/// Pull one sample at a time from a parsed container
pub(crate) trait PacketReader: Send + 'static {
    fn next_sample(&mut self) -> Result<Option<Sample>>;
}

#[derive(Default)]
struct PumpState {
    running: bool,
    shutdown: bool,
    sink: Option<SampleSink>,
}

struct PumpControl {
    state: Mutex<PumpState>,
    wake: Condvar,
}

/// Background thread that drives a [`PacketReader`] while started
///
/// Reads happen in small batches so a stop request takes effect within one
/// batch.
pub(crate) struct PacketPump {
    control: Arc<PumpControl>,
    thread: Option<JoinHandle<()>>,
}

impl PacketPump {
    pub(crate) fn spawn<R: PacketReader>(name: &str, reader: R, batch_size: usize) -> Result<Self> {
        let control = Arc::new(PumpControl {
            state: Mutex::new(PumpState::default()),
            wake: Condvar::new(),
        });

        let thread_control = Arc::clone(&control);
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(format!("{}-reader", name))
            .spawn(move || pump_loop(&thread_name, reader, &thread_control, batch_size.max(1)))?;

        Ok(Self {
            control,
            thread: Some(thread),
        })
    }

    pub(crate) fn start(&self, sink: SampleSink) {
        if let Ok(mut state) = self.control.state.lock() {
            state.running = true;
            state.sink = Some(sink);
        }
        self.control.wake.notify_all();
    }

    pub(crate) fn stop(&self) {
        if let Ok(mut state) = self.control.state.lock() {
            state.running = false;
        }
    }
}

impl Drop for PacketPump {
    fn drop(&mut self) {
        if let Ok(mut state) = self.control.state.lock() {
            state.shutdown = true;
            state.sink = None;
        }
        self.control.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Sample reader thread panicked");
            }
        }
    }
}

fn pump_loop<R: PacketReader>(name: &str, mut reader: R, control: &PumpControl, batch_size: usize) {
    debug!("{} reader thread started", name);
    loop {
        let sink = {
            let Ok(mut state) = control.state.lock() else {
                return;
            };
            while !state.running && !state.shutdown {
                state = match control.wake.wait(state) {
                    Ok(state) => state,
                    Err(_) => return,
                };
            }
            if state.shutdown {
                debug!("{} reader thread shutting down", name);
                return;
            }
            match state.sink.clone() {
                Some(sink) => sink,
                None => return,
            }
        };

        let mut batch = Vec::with_capacity(batch_size);
        let mut exhausted = false;
        for _ in 0..batch_size {
            match reader.next_sample() {
                Ok(Some(sample)) => batch.push(sample),
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    error!("{} reader failed: {}", name, e);
                    if !batch.is_empty() {
                        let _ = sink.send(SourceEvent::Samples(batch));
                    }
                    let _ = sink.send(SourceEvent::Error(e.to_string()));
                    return;
                }
            }
        }

        if !batch.is_empty() && sink.send(SourceEvent::Samples(batch)).is_err() {
            debug!("{} sample sink closed", name);
            return;
        }
        if exhausted {
            debug!("{} reached end of container", name);
            let _ = sink.send(SourceEvent::End);
            return;
        }
    }
}
