//! Asynchronous decoder abstraction
//!
//! Chunks are submitted with [`Decoder::decode`] and decoded units come back
//! later on the output channel given to [`Decoder::configure`]. The queue
//! depth counts submitted chunks whose decode has not yet completed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use avpipe_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::media::{
    AudioDecoderConfig, DecodedAudioBlock, DecodedVideoFrame, EncodedChunk, VideoDecoderConfig,
};

/// Message delivered on a decoder's output channel
#[derive(Debug)]
pub enum DecoderEvent<T> {
    Output(T),
    /// A chunk finished decoding without producing output
    Drained,
    Error(String),
}

pub type OutputSender<T> = mpsc::UnboundedSender<DecoderEvent<T>>;
pub type OutputReceiver<T> = mpsc::UnboundedReceiver<DecoderEvent<T>>;

/// Create an output channel for a decoder
pub fn output_channel<T>() -> (OutputSender<T>, OutputReceiver<T>) {
    mpsc::unbounded_channel()
}

/// Asynchronous decoder
pub trait Decoder: Send + Sync + 'static {
    type Config: Send + Sync;
    type Output: Send + 'static;

    /// Whether `configure` would accept this configuration
    fn is_config_supported(&self, config: &Self::Config) -> bool;

    /// Prepare for decoding and route outputs to `output`
    fn configure(&mut self, config: &Self::Config, output: OutputSender<Self::Output>)
        -> Result<()>;

    /// Submit one chunk; never blocks on decode work
    fn decode(&self, chunk: EncodedChunk) -> Result<()>;

    /// Submitted chunks not yet fully decoded
    fn queue_depth(&self) -> usize;
}

pub type BoxedAudioDecoder =
    Box<dyn Decoder<Config = AudioDecoderConfig, Output = DecodedAudioBlock>>;
pub type BoxedVideoDecoder =
    Box<dyn Decoder<Config = VideoDecoderConfig, Output = DecodedVideoFrame>>;

/// Synchronous codec run on a [`ThreadedDecoder`]'s worker thread
pub trait Codec: Send + 'static {
    type Config: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    /// Decode one chunk into zero or more outputs
    fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<Self::Output>>;
}

type Opener<C> = Box<dyn FnOnce(&<C as Codec>::Config) -> Result<C> + Send + Sync>;
type SupportCheck<C> = Box<dyn Fn(&<C as Codec>::Config) -> bool + Send + Sync>;

/// [`Decoder`] that runs a [`Codec`] on a dedicated thread
pub struct ThreadedDecoder<C: Codec> {
    name: String,
    supports: SupportCheck<C>,
    opener: Option<Opener<C>>,
    submit: Option<std_mpsc::Sender<EncodedChunk>>,
    queue_depth: Arc<AtomicUsize>,
}

impl<C: Codec> ThreadedDecoder<C> {
    pub fn new<S, O>(name: &str, supports: S, opener: O) -> Self
    where
        S: Fn(&C::Config) -> bool + Send + Sync + 'static,
        O: FnOnce(&C::Config) -> Result<C> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            supports: Box::new(supports),
            opener: Some(Box::new(opener)),
            submit: None,
            queue_depth: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<C: Codec> Decoder for ThreadedDecoder<C> {
    type Config = C::Config;
    type Output = C::Output;

    fn is_config_supported(&self, config: &Self::Config) -> bool {
        (self.supports)(config)
    }

    fn configure(
        &mut self,
        config: &Self::Config,
        output: OutputSender<Self::Output>,
    ) -> Result<()> {
        let opener = self
            .opener
            .take()
            .ok_or_else(|| Error::InvalidState(format!("{} already configured", self.name)))?;
        let mut codec = opener(config)?;

        let (submit_tx, submit_rx) = std_mpsc::channel::<EncodedChunk>();
        let queue_depth = Arc::clone(&self.queue_depth);
        let name = self.name.clone();

        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                debug!("{} thread started", name);
                while let Ok(chunk) = submit_rx.recv() {
                    let result = codec.decode(&chunk);
                    // Depth drops before outputs are delivered so receivers
                    // observe the completed decode
                    queue_depth.fetch_sub(1, Ordering::AcqRel);
                    let delivered = match result {
                        Ok(outputs) if outputs.is_empty() => {
                            output.send(DecoderEvent::Drained).is_ok()
                        }
                        Ok(outputs) => outputs
                            .into_iter()
                            .all(|out| output.send(DecoderEvent::Output(out)).is_ok()),
                        Err(e) => {
                            warn!("{} failed on chunk at {}us: {}", name, chunk.timestamp_us, e);
                            output.send(DecoderEvent::Error(e.to_string())).is_ok()
                        }
                    };
                    if !delivered {
                        break;
                    }
                }
                debug!("{} thread exiting", name);
            })?;

        self.submit = Some(submit_tx);
        Ok(())
    }

    fn decode(&self, chunk: EncodedChunk) -> Result<()> {
        let submit = self
            .submit
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("{} not configured", self.name)))?;
        self.queue_depth.fetch_add(1, Ordering::AcqRel);
        submit.send(chunk).map_err(|_| {
            self.queue_depth.fetch_sub(1, Ordering::AcqRel);
            Error::ChannelClosed(format!("{} worker has exited", self.name))
        })
    }

    fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ChunkKind;

    struct EchoCodec;

    impl Codec for EchoCodec {
        type Config = u32;
        type Output = i64;

        fn decode(&mut self, chunk: &EncodedChunk) -> Result<Vec<i64>> {
            if chunk.payload.is_empty() {
                return Err(Error::Decode("empty chunk".to_string()));
            }
            // Negative timestamps model codec priming: no output yet
            if chunk.timestamp_us < 0 {
                return Ok(Vec::new());
            }
            Ok(vec![chunk.timestamp_us])
        }
    }

    fn chunk(ts: i64, payload: Vec<u8>) -> EncodedChunk {
        EncodedChunk {
            kind: ChunkKind::Key,
            timestamp_us: ts,
            duration_us: 1000,
            payload,
        }
    }

    fn echo_decoder() -> ThreadedDecoder<EchoCodec> {
        ThreadedDecoder::new("echo-decoder", |c: &u32| *c == 7, |_| Ok(EchoCodec))
    }

    #[test]
    fn test_config_support_check() {
        let decoder = echo_decoder();
        assert!(decoder.is_config_supported(&7));
        assert!(!decoder.is_config_supported(&8));
    }

    #[test]
    fn test_decode_before_configure_fails() {
        let decoder = echo_decoder();
        assert!(matches!(
            decoder.decode(chunk(0, vec![1])),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_outputs_in_submission_order() {
        let mut decoder = echo_decoder();
        let (tx, mut rx) = output_channel();
        decoder.configure(&7, tx).unwrap();

        for ts in [0, 10, 20] {
            decoder.decode(chunk(ts, vec![1])).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 3 {
            match rx.recv().await {
                Some(DecoderEvent::Output(ts)) => seen.push(ts),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(seen, vec![0, 10, 20]);
        assert_eq!(decoder.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_codec_error_reported_and_decoding_continues() {
        let mut decoder = echo_decoder();
        let (tx, mut rx) = output_channel();
        decoder.configure(&7, tx).unwrap();

        decoder.decode(chunk(0, Vec::new())).unwrap();
        decoder.decode(chunk(5, vec![1])).unwrap();

        assert!(matches!(rx.recv().await, Some(DecoderEvent::Error(_))));
        assert!(matches!(rx.recv().await, Some(DecoderEvent::Output(5))));
    }

    #[tokio::test]
    async fn test_empty_decode_reports_drained() {
        let mut decoder = echo_decoder();
        let (tx, mut rx) = output_channel();
        decoder.configure(&7, tx).unwrap();

        decoder.decode(chunk(-10, vec![1])).unwrap();
        decoder.decode(chunk(0, vec![1])).unwrap();

        assert!(matches!(rx.recv().await, Some(DecoderEvent::Drained)));
        assert!(matches!(rx.recv().await, Some(DecoderEvent::Output(0))));
        assert_eq!(decoder.queue_depth(), 0);
    }

    #[test]
    fn test_configure_twice_rejected() {
        let mut decoder = echo_decoder();
        let (tx, _rx) = output_channel();
        decoder.configure(&7, tx.clone()).unwrap();
        assert!(matches!(
            decoder.configure(&7, tx),
            Err(Error::InvalidState(_))
        ));
    }
}
