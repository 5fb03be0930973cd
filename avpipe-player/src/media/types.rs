//! Core media data types
//!
//! Chunks flow demuxer → decoder exactly once; decoded audio flows decoder →
//! ring buffer and is not retained after interleaving.

use avpipe_common::{Error, Result, StreamKind};

/// Whether a chunk can be decoded without reference to earlier chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// One encoded, timestamped unit of audio or video
///
/// Delivered in decode order. `timestamp_us` is the presentation timestamp and
/// is non-decreasing across consecutive chunks of a well-formed audio stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub kind: ChunkKind,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub payload: Vec<u8>,
}

impl EncodedChunk {
    pub fn is_key(&self) -> bool {
        self.kind == ChunkKind::Key
    }
}

/// Audio decoder configuration, derived once from container metadata
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDecoderConfig {
    /// Codec short name ("aac", "mp3", "flac", ...)
    pub codec: String,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Codec-private setup bytes (AudioSpecificConfig for AAC)
    pub description: Option<Vec<u8>>,
}

/// Video decoder configuration, derived once from container metadata
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDecoderConfig {
    /// Codec string ("vp8", "vp09", "av01", "avc1.64001f", ...)
    pub codec: String,
    pub display_width: u32,
    pub display_height: u32,
    pub description: Option<Vec<u8>>,
}

/// Decoder configuration for either stream kind
///
/// Immutable for the session: no reconfiguration is supported once a stream
/// is initialized.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderConfig {
    Audio(AudioDecoderConfig),
    Video(VideoDecoderConfig),
}

impl DecoderConfig {
    pub fn kind(&self) -> StreamKind {
        match self {
            DecoderConfig::Audio(_) => StreamKind::Audio,
            DecoderConfig::Video(_) => StreamKind::Video,
        }
    }

    pub fn codec(&self) -> &str {
        match self {
            DecoderConfig::Audio(c) => &c.codec,
            DecoderConfig::Video(c) => &c.codec,
        }
    }

    /// Unwrap an audio configuration
    pub fn into_audio(self) -> Result<AudioDecoderConfig> {
        match self {
            DecoderConfig::Audio(c) => Ok(c),
            DecoderConfig::Video(_) => Err(Error::InvalidState(
                "expected an audio decoder config, demuxer produced video".to_string(),
            )),
        }
    }

    /// Unwrap a video configuration
    pub fn into_video(self) -> Result<VideoDecoderConfig> {
        match self {
            DecoderConfig::Video(c) => Ok(c),
            DecoderConfig::Audio(_) => Err(Error::InvalidState(
                "expected a video decoder config, demuxer produced audio".to_string(),
            )),
        }
    }
}

/// Planar floating-point audio for a fixed number of frames
///
/// `planes[c][i]` is sample `i` of channel `c`. All planes have equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBlock {
    pub timestamp_us: i64,
    pub sample_rate: u32,
    pub planes: Vec<Vec<f32>>,
}

impl DecodedAudioBlock {
    pub fn new(timestamp_us: i64, sample_rate: u32, planes: Vec<Vec<f32>>) -> Self {
        debug_assert!(
            planes.windows(2).all(|w| w[0].len() == w[1].len()),
            "audio planes must have equal length"
        );
        Self {
            timestamp_us,
            sample_rate,
            planes,
        }
    }

    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.planes.first().map(|p| p.len()).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }

    /// Interleaved sample count (frames × channels)
    pub fn sample_count(&self) -> usize {
        self.frames() * self.channel_count()
    }

    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as i64 * 1_000_000) / self.sample_rate as i64
    }
}
