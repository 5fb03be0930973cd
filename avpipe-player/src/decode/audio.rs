//! Symphonia-backed audio codec
//!
//! Decodes raw codec packets (no container) into planar f32 blocks.

use avpipe_common::{Error, Result};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_AAC,
    CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_VORBIS,
};
use symphonia::core::formats::Packet;
use tracing::debug;

use super::decoder::{Codec, ThreadedDecoder};
use crate::media::{AudioDecoderConfig, DecodedAudioBlock, EncodedChunk};

/// Map a codec string to symphonia's codec type
///
/// Accepts symphonia short names and the common ISO-BMFF sample entry
/// strings.
pub fn codec_type_for(codec: &str) -> Option<CodecType> {
    let lower = codec.to_ascii_lowercase();
    match lower.as_str() {
        "aac" => Some(CODEC_TYPE_AAC),
        "mp3" => Some(CODEC_TYPE_MP3),
        "flac" | "fla" => Some(CODEC_TYPE_FLAC),
        "vorbis" => Some(CODEC_TYPE_VORBIS),
        s if s.starts_with("mp4a") => Some(CODEC_TYPE_AAC),
        _ => None,
    }
}

fn channel_layout(count: u16) -> Channels {
    match count {
        1 => Channels::FRONT_CENTRE,
        2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
        n => Channels::from_bits((1u32 << n.min(26)) - 1)
            .unwrap_or(Channels::FRONT_LEFT | Channels::FRONT_RIGHT),
    }
}

/// Whether a symphonia decoder is registered for this configuration
pub fn is_supported(config: &AudioDecoderConfig) -> bool {
    config.sample_rate > 0
        && config.channel_count > 0
        && codec_type_for(&config.codec)
            .and_then(|ct| symphonia::default::get_codecs().get_codec(ct))
            .is_some()
}

/// Packet decoder for one audio stream
pub struct SymphoniaAudioCodec {
    decoder: Box<dyn SymphoniaDecoder>,
    sample_rate: u32,
}

impl SymphoniaAudioCodec {
    pub fn open(config: &AudioDecoderConfig) -> Result<Self> {
        let codec_type = codec_type_for(&config.codec).ok_or_else(|| {
            Error::Decode(format!("no decoder for codec '{}'", config.codec))
        })?;

        let mut params = CodecParameters::new();
        params
            .for_codec(codec_type)
            .with_sample_rate(config.sample_rate)
            .with_channels(channel_layout(config.channel_count));
        if let Some(description) = &config.description {
            params.with_extra_data(description.clone().into_boxed_slice());
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        debug!(
            "Opened {} decoder: {} Hz, {} channel(s)",
            config.codec, config.sample_rate, config.channel_count
        );

        Ok(Self {
            decoder,
            sample_rate: config.sample_rate,
        })
    }
}

impl Codec for SymphoniaAudioCodec {
    type Config = AudioDecoderConfig;
    type Output = DecodedAudioBlock;

    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<DecodedAudioBlock>> {
        let packet = Packet::new_from_slice(
            0,
            chunk.timestamp_us.max(0) as u64,
            chunk.duration_us.max(0) as u64,
            &chunk.payload,
        );
        let decoded = self
            .decoder
            .decode(&packet)
            .map_err(|e| Error::Decode(format!("{}", e)))?;

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames();
        if frames == 0 || channels == 0 {
            return Ok(Vec::new());
        }

        let mut planar = SampleBuffer::<f32>::new(frames as u64, spec);
        planar.copy_planar_ref(decoded);
        let planes = planar
            .samples()
            .chunks_exact(frames)
            .take(channels)
            .map(|plane| plane.to_vec())
            .collect();

        let sample_rate = if spec.rate > 0 { spec.rate } else { self.sample_rate };
        Ok(vec![DecodedAudioBlock::new(
            chunk.timestamp_us,
            sample_rate,
            planes,
        )])
    }
}

/// Threaded audio decoder backed by symphonia
pub fn symphonia_audio_decoder() -> ThreadedDecoder<SymphoniaAudioCodec> {
    ThreadedDecoder::new("audio-decoder", is_supported, SymphoniaAudioCodec::open)
}
