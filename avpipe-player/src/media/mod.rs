//! Media data model: encoded chunks, decoder configurations, decoded units

pub mod frame;
pub mod types;

pub use frame::{DecodedVideoFrame, FrameLease, FramePool};
pub use types::{
    AudioDecoderConfig, ChunkKind, DecodedAudioBlock, DecoderConfig, EncodedChunk,
    VideoDecoderConfig,
};
