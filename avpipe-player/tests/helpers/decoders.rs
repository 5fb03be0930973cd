//! Decoder doubles

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use avpipe_common::{Error, Result};
use avpipe_player::decode::{Codec, Decoder, DecoderEvent, OutputSender, ThreadedDecoder};
use avpipe_player::media::{
    AudioDecoderConfig, DecodedAudioBlock, DecodedVideoFrame, EncodedChunk, FramePool,
    VideoDecoderConfig,
};

use super::CHUNK_FRAMES;

fn silent_block(chunk: &EncodedChunk, config: &AudioDecoderConfig, frames: usize) -> DecodedAudioBlock {
    let planes = vec![vec![0.25f32; frames]; config.channel_count as usize];
    DecodedAudioBlock::new(chunk.timestamp_us, config.sample_rate, planes)
}

/// Counters shared between a [`ScriptedAudioCodec`] and the test
#[derive(Clone, Default)]
pub struct CodecStats {
    decoded: Arc<AtomicUsize>,
    max_backlog: Arc<AtomicUsize>,
}

impl CodecStats {
    pub fn decoded(&self) -> usize {
        self.decoded.load(Ordering::SeqCst)
    }

    /// Largest number of pulled-but-undecoded chunks seen at decode start
    pub fn max_backlog(&self) -> usize {
        self.max_backlog.load(Ordering::SeqCst)
    }
}

/// Codec run on a real decoder thread
///
/// The first `priming` chunks decode to nothing, like an encoder delay;
/// every decode takes `delay`.
pub struct ScriptedAudioCodec {
    config: AudioDecoderConfig,
    priming: usize,
    delay: Duration,
    reads: Arc<AtomicUsize>,
    stats: CodecStats,
}

impl Codec for ScriptedAudioCodec {
    type Config = AudioDecoderConfig;
    type Output = DecodedAudioBlock;

    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<DecodedAudioBlock>> {
        let backlog = self
            .reads
            .load(Ordering::SeqCst)
            .saturating_sub(self.stats.decoded());
        self.stats.max_backlog.fetch_max(backlog, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let index = self.stats.decoded.fetch_add(1, Ordering::SeqCst);
        if index < self.priming {
            return Ok(Vec::new());
        }
        Ok(vec![silent_block(chunk, &self.config, CHUNK_FRAMES)])
    }
}

/// Threaded decoder over a [`ScriptedAudioCodec`]
///
/// `reads` is the demuxer's read counter, used to measure decoder backlog.
pub fn scripted_audio_decoder(
    codec: &str,
    priming: usize,
    delay: Duration,
    reads: Arc<AtomicUsize>,
) -> (ThreadedDecoder<ScriptedAudioCodec>, CodecStats) {
    let stats = CodecStats::default();
    let codec_stats = stats.clone();
    let codec = codec.to_string();
    let decoder = ThreadedDecoder::new(
        "scripted-audio-decoder",
        move |config: &AudioDecoderConfig| config.codec == codec,
        move |config: &AudioDecoderConfig| {
            Ok(ScriptedAudioCodec {
                config: config.clone(),
                priming,
                delay,
                reads,
                stats: codec_stats,
            })
        },
    );
    (decoder, stats)
}

/// Decodes every chunk on submission; queue depth is always zero
pub struct InstantAudioDecoder {
    codec: String,
    frames_per_chunk: usize,
    config: Option<AudioDecoderConfig>,
    output: Option<OutputSender<DecodedAudioBlock>>,
    decoded: Arc<AtomicUsize>,
}

impl InstantAudioDecoder {
    pub fn new(codec: &str, frames_per_chunk: usize) -> Self {
        Self {
            codec: codec.to_string(),
            frames_per_chunk,
            config: None,
            output: None,
            decoded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn decoded_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.decoded)
    }
}

impl Decoder for InstantAudioDecoder {
    type Config = AudioDecoderConfig;
    type Output = DecodedAudioBlock;

    fn is_config_supported(&self, config: &AudioDecoderConfig) -> bool {
        config.codec == self.codec
    }

    fn configure(
        &mut self,
        config: &AudioDecoderConfig,
        output: OutputSender<DecodedAudioBlock>,
    ) -> Result<()> {
        self.config = Some(config.clone());
        self.output = Some(output);
        Ok(())
    }

    fn decode(&self, chunk: EncodedChunk) -> Result<()> {
        let (Some(config), Some(output)) = (&self.config, &self.output) else {
            return Err(Error::InvalidState("decoder not configured".to_string()));
        };
        self.decoded.fetch_add(1, Ordering::SeqCst);
        let block = silent_block(&chunk, config, self.frames_per_chunk);
        output
            .send(DecoderEvent::Output(block))
            .map_err(|_| Error::ChannelClosed("decoder output".to_string()))
    }

    fn queue_depth(&self) -> usize {
        0
    }
}

#[derive(Default)]
struct DeferredState {
    config: Option<AudioDecoderConfig>,
    output: Option<OutputSender<DecodedAudioBlock>>,
    held: VecDeque<EncodedChunk>,
}

/// Holds submitted chunks until the test releases them
pub struct DeferredAudioDecoder {
    codec: String,
    state: Arc<Mutex<DeferredState>>,
}

/// Test-side control of a [`DeferredAudioDecoder`]
#[derive(Clone)]
pub struct DeferredHandle {
    state: Arc<Mutex<DeferredState>>,
}

impl DeferredAudioDecoder {
    pub fn new(codec: &str) -> (Self, DeferredHandle) {
        let state = Arc::new(Mutex::new(DeferredState::default()));
        (
            Self {
                codec: codec.to_string(),
                state: Arc::clone(&state),
            },
            DeferredHandle { state },
        )
    }
}

impl DeferredHandle {
    /// Chunks submitted but not yet released
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().held.len()
    }

    /// Decode every held chunk and deliver the outputs
    ///
    /// Depth drops before the outputs are sent, matching a real decoder.
    pub fn release_all(&self) -> usize {
        let (blocks, output) = {
            let mut state = self.state.lock().unwrap();
            let config = state.config.clone().expect("configured");
            let chunks: Vec<_> = state.held.drain(..).collect();
            let blocks: Vec<_> = chunks
                .iter()
                .map(|chunk| silent_block(chunk, &config, super::CHUNK_FRAMES))
                .collect();
            (blocks, state.output.clone().expect("configured"))
        };
        let count = blocks.len();
        for block in blocks {
            output.send(DecoderEvent::Output(block)).unwrap();
        }
        count
    }

    /// Deliver a decoder error without consuming any chunk
    pub fn report_error(&self, message: &str) {
        let output = self.state.lock().unwrap().output.clone().expect("configured");
        output
            .send(DecoderEvent::Error(message.to_string()))
            .unwrap();
    }
}

impl Decoder for DeferredAudioDecoder {
    type Config = AudioDecoderConfig;
    type Output = DecodedAudioBlock;

    fn is_config_supported(&self, config: &AudioDecoderConfig) -> bool {
        config.codec == self.codec
    }

    fn configure(
        &mut self,
        config: &AudioDecoderConfig,
        output: OutputSender<DecodedAudioBlock>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.config = Some(config.clone());
        state.output = Some(output);
        Ok(())
    }

    fn decode(&self, chunk: EncodedChunk) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.output.is_none() {
            return Err(Error::InvalidState("decoder not configured".to_string()));
        }
        state.held.push_back(chunk);
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        self.state.lock().unwrap().held.len()
    }
}

/// Video decoder that emits one pooled frame per chunk on submission
pub struct InstantVideoDecoder {
    codec: String,
    pool: FramePool,
    config: Option<VideoDecoderConfig>,
    output: Option<OutputSender<DecodedVideoFrame>>,
    decoded: Arc<AtomicUsize>,
}

impl InstantVideoDecoder {
    pub fn new(codec: &str, pool: FramePool) -> Self {
        Self {
            codec: codec.to_string(),
            pool,
            config: None,
            output: None,
            decoded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn decoded_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.decoded)
    }
}

impl Decoder for InstantVideoDecoder {
    type Config = VideoDecoderConfig;
    type Output = DecodedVideoFrame;

    fn is_config_supported(&self, config: &VideoDecoderConfig) -> bool {
        config.codec == self.codec
    }

    fn configure(
        &mut self,
        config: &VideoDecoderConfig,
        output: OutputSender<DecodedVideoFrame>,
    ) -> Result<()> {
        self.config = Some(config.clone());
        self.output = Some(output);
        Ok(())
    }

    fn decode(&self, chunk: EncodedChunk) -> Result<()> {
        let (Some(config), Some(output)) = (&self.config, &self.output) else {
            return Err(Error::InvalidState("decoder not configured".to_string()));
        };
        let lease = self
            .pool
            .try_acquire()
            .ok_or_else(|| Error::Decode("frame pool exhausted".to_string()))?;
        self.decoded.fetch_add(1, Ordering::SeqCst);
        let frame = DecodedVideoFrame::new(
            chunk.timestamp_us,
            chunk.duration_us,
            config.display_width,
            config.display_height,
            chunk.payload,
            lease,
        );
        output
            .send(DecoderEvent::Output(frame))
            .map_err(|_| Error::ChannelClosed("decoder output".to_string()))
    }

    fn queue_depth(&self) -> usize {
        0
    }
}
