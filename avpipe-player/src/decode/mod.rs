//! Decoders
//!
//! `decoder` defines the asynchronous decoder contract and the threaded
//! runner; `audio` and `video` provide the codecs behind it.

pub mod audio;
pub mod decoder;
pub mod video;

pub use audio::{symphonia_audio_decoder, SymphoniaAudioCodec};
pub use decoder::{
    output_channel, BoxedAudioDecoder, BoxedVideoDecoder, Codec, Decoder, DecoderEvent,
    OutputReceiver, OutputSender, ThreadedDecoder,
};
pub use video::{passthrough_video_decoder, PassthroughVideoCodec};
