//! Audio output using cpal
//!
//! The sink pulls interleaved `f32` samples from the sample ring on the
//! device callback. The callback never blocks, never allocates and never
//! logs; underruns are filled with silence and counted by the ring.
//!
//! The sink is also the master clock: it counts the frames handed to the
//! device and subtracts the output latency reported by the callback
//! timestamps. `cpal::Stream` cannot cross threads, so the clock lives in a
//! separate shareable [`SinkClock`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use avpipe_common::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::playback::{MediaTimeSource, RingCounterHandle, RingReader};

/// State shared between the device callback and the control side
#[derive(Debug)]
struct SinkShared {
    sample_rate: u32,
    frames_consumed: AtomicU64,
    latency_us: AtomicU64,
    /// `f32` bits
    volume: AtomicU32,
    stream_errors: AtomicU64,
}

impl SinkShared {
    fn new(sample_rate: u32, volume: f32) -> Self {
        Self {
            sample_rate,
            frames_consumed: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
            volume: AtomicU32::new(volume.to_bits()),
            stream_errors: AtomicU64::new(0),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn media_time_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        let played = self.frames_consumed.load(Ordering::Acquire) as f64 / self.sample_rate as f64;
        let latency = self.latency_us.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        (played - latency).max(0.0)
    }
}

/// Cloneable view of the sink's media time
#[derive(Debug, Clone)]
pub struct SinkClock {
    shared: Arc<SinkShared>,
}

impl SinkClock {
    pub fn frames_consumed(&self) -> u64 {
        self.shared.frames_consumed.load(Ordering::Acquire)
    }

    /// Output latency last measured by the device callback
    pub fn latency_secs(&self) -> f64 {
        self.shared.latency_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

impl MediaTimeSource for SinkClock {
    fn media_time_secs(&self) -> f64 {
        self.shared.media_time_secs()
    }
}

/// Real-time audio sink
pub struct AudioSink {
    device_name: String,
    config: StreamConfig,
    stream: Stream,
    shared: Arc<SinkShared>,
    ring: RingCounterHandle,
    playing: bool,
}

impl AudioSink {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open the output device and build a suspended stream over `reader`
    ///
    /// Falls back to the default device when `device_name` is not found.
    pub fn new(
        reader: RingReader,
        sample_rate: u32,
        channels: u16,
        device_name: Option<&str>,
        volume: f32,
    ) -> Result<Self> {
        validate_volume(volume)?;
        if channels == 0 || sample_rate == 0 {
            return Err(Error::AudioOutput(format!(
                "Invalid output format: {} Hz x{}",
                sample_rate, channels
            )));
        }

        let (device, device_name) = open_device(device_name)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        debug!(
            "Audio config: sample_rate={}, channels={}, buffer_size={:?}",
            config.sample_rate.0, config.channels, config.buffer_size
        );

        let shared = Arc::new(SinkShared::new(sample_rate, volume));
        let ring = reader.counters();
        let stream = build_stream(&device, &config, reader, Arc::clone(&shared))?;

        // Start suspended; play() resumes
        stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;

        info!(
            "Audio sink opened on '{}': {} Hz x{}",
            device_name, sample_rate, channels
        );

        Ok(Self {
            device_name,
            config,
            stream,
            shared,
            ring,
            playing: false,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) -> Result<()> {
        if self.playing {
            return Ok(());
        }
        self.stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.playing = true;
        info!("Audio sink playing");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if !self.playing {
            return Ok(());
        }
        self.stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
        self.playing = false;
        info!("Audio sink paused");
        Ok(())
    }

    /// Set output volume (0.0 = silent, 1.0 = full volume)
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        validate_volume(volume)?;
        self.shared.volume.store(volume.to_bits(), Ordering::Relaxed);
        debug!("Volume set to {:.2}", volume);
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    pub fn underruns(&self) -> u64 {
        self.ring.underruns()
    }

    pub fn stream_errors(&self) -> u64 {
        self.shared.stream_errors.load(Ordering::Relaxed)
    }

    pub fn clock(&self) -> SinkClock {
        SinkClock {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause stream on drop: {}", e);
        }
    }
}

fn validate_volume(volume: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&volume) {
        return Err(Error::InvalidState(format!(
            "volume {} outside [0.0, 1.0]",
            volume
        )));
    }
    Ok(())
}

fn open_device(device_name: Option<&str>) -> Result<(Device, String)> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok((device, name.to_string()));
        }
        warn!(
            "Requested device '{}' not found, falling back to default device",
            name
        );
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using default audio device: {}", name);
    Ok((device, name))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    mut reader: RingReader,
    shared: Arc<SinkShared>,
) -> Result<Stream> {
    let channels = config.channels as usize;
    let callback_shared = Arc::clone(&shared);

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                reader.read_or_silence(data);

                let volume = callback_shared.volume();
                if volume < 1.0 {
                    for sample in data.iter_mut() {
                        *sample *= volume;
                    }
                }

                let timestamp = info.timestamp();
                if let Some(latency) = timestamp.playback.duration_since(&timestamp.callback) {
                    callback_shared
                        .latency_us
                        .store(latency.as_micros() as u64, Ordering::Relaxed);
                }
                callback_shared
                    .frames_consumed
                    .fetch_add((data.len() / channels) as u64, Ordering::Release);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                shared.stream_errors.fetch_add(1, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
