//! Audio sample source backed by symphonia's container readers
//!
//! Handles ISO-BMFF (MP4/M4A) and the other containers registered in
//! symphonia's default probe. Only audio tracks are exposed.

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use avpipe_common::{Error, Result};
use symphonia::core::codecs::{CodecType, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

use super::source::{
    PacketPump, PacketReader, Sample, SampleSink, SampleSource, SourceInfo, TrackInfo, TrackMedia,
};

/// Samples read per batch before re-checking for stop requests
const READ_BATCH: usize = 8;

/// Audio source over a symphonia `FormatReader`
pub struct IsoAudioSource {
    path: PathBuf,
    info: SourceInfo,
    descriptions: Vec<(u32, Vec<u8>)>,
    format: Option<Box<dyn FormatReader>>,
    pump: Option<PacketPump>,
}

impl IsoAudioSource {
    /// Open and probe a container file
    ///
    /// Blocking: performs file IO. Call from a blocking context.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Demux(format!("Failed to probe {}: {}", path.display(), e)))?;
        let format = probed.format;

        let mut tracks = Vec::new();
        let mut descriptions = Vec::new();
        for track in format.tracks() {
            let params = &track.codec_params;
            if params.codec == CODEC_TYPE_NULL {
                continue;
            }
            let (Some(sample_rate), Some(channels)) = (params.sample_rate, params.channels) else {
                debug!("Skipping track {} without audio parameters", track.id);
                continue;
            };

            let timescale = params
                .time_base
                .map(|tb| tb.denom)
                .unwrap_or(sample_rate);
            let numer = params.time_base.map(|tb| tb.numer).unwrap_or(1).max(1);

            tracks.push(TrackInfo {
                id: track.id,
                codec: codec_short_name(params.codec),
                timescale,
                duration: params.n_frames.map(|n| n * numer as u64),
                media: TrackMedia::Audio {
                    sample_rate,
                    channel_count: channels.count() as u16,
                },
            });
            if let Some(extra) = &params.extra_data {
                descriptions.push((track.id, extra.to_vec()));
            }
        }

        info!(
            "Opened {}: {} audio track(s)",
            path.display(),
            tracks.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            info: SourceInfo { tracks },
            descriptions,
            format: Some(format),
            pump: None,
        })
    }
}

/// Decoder-facing name for a symphonia codec type
pub fn codec_short_name(codec: CodecType) -> String {
    symphonia::default::get_codecs()
        .get_codec(codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| format!("unknown-{:?}", codec))
}

#[async_trait]
impl SampleSource for IsoAudioSource {
    async fn info(&mut self) -> Result<SourceInfo> {
        Ok(self.info.clone())
    }

    fn select_track(&mut self, track_id: u32) -> Result<()> {
        let Some(format) = self.format.as_ref() else {
            return Err(Error::InvalidState(format!(
                "track already selected for {}",
                self.path.display()
            )));
        };

        let numer = format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .ok_or_else(|| Error::Demux(format!("no track with id {}", track_id)))?
            .codec_params
            .time_base
            .map(|tb| tb.numer)
            .unwrap_or(1)
            .max(1);
        let timescale = self
            .info
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.timescale)
            .unwrap_or(1);

        let Some(format) = self.format.take() else {
            return Err(Error::Internal("format reader missing".to_string()));
        };
        let reader = IsoPacketReader {
            format,
            track_id,
            numer,
            timescale,
        };
        self.pump = Some(PacketPump::spawn("iso", reader, READ_BATCH)?);
        Ok(())
    }

    fn start(&mut self, sink: SampleSink) {
        if let Some(pump) = &self.pump {
            pump.start(sink);
        }
    }

    fn stop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.stop();
        }
    }

    fn description(&self, track_id: u32) -> Option<Vec<u8>> {
        self.descriptions
            .iter()
            .find(|(id, _)| *id == track_id)
            .map(|(_, bytes)| bytes.clone())
    }

    fn name(&self) -> &str {
        "iso"
    }
}

struct IsoPacketReader {
    format: Box<dyn FormatReader>,
    track_id: u32,
    numer: u32,
    timescale: u32,
}

impl PacketReader for IsoPacketReader {
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(Error::Demux(format!("Failed to read packet: {}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            return Ok(Some(Sample {
                track_id: self.track_id,
                is_sync: true,
                cts: (packet.ts() as i64).saturating_mul(self.numer as i64),
                duration: packet.dur().saturating_mul(self.numer as u64),
                timescale: self.timescale,
                data: packet.buf().to_vec(),
            }));
        }
    }
}
