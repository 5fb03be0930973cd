//! IVF video sample source
//!
//! IVF is the minimal container used for VP8/VP9/AV1 elementary streams:
//! a 32-byte file header followed by frames, each prefixed with a 12-byte
//! header (little-endian payload size and 64-bit timestamp).

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use async_trait::async_trait;
use avpipe_common::{Error, Result};
use tracing::{info, warn};

use super::source::{
    PacketPump, PacketReader, Sample, SampleSink, SampleSource, SourceInfo, TrackInfo, TrackMedia,
};

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;
const READ_BATCH: usize = 4;

/// IVF streams carry a single track
const IVF_TRACK_ID: u32 = 1;

/// Parsed IVF file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    /// Ticks per second
    pub rate: u32,
    /// Ticks per frame
    pub scale: u32,
    pub frame_count: u32,
}

impl IvfHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_LEN || &bytes[0..4] != IVF_SIGNATURE {
            return Err(Error::Demux("not an IVF file".to_string()));
        }
        let header_len = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
        if header_len != FILE_HEADER_LEN {
            warn!("Unusual IVF header length: {}", header_len);
        }

        let header = Self {
            fourcc: [bytes[8], bytes[9], bytes[10], bytes[11]],
            width: u16::from_le_bytes([bytes[12], bytes[13]]),
            height: u16::from_le_bytes([bytes[14], bytes[15]]),
            rate: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            scale: u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            frame_count: u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
        };
        if header.rate == 0 {
            return Err(Error::Demux("IVF header has zero frame rate".to_string()));
        }
        Ok(header)
    }

    /// Codec string for the stream's fourcc
    pub fn codec(&self) -> Result<&'static str> {
        match &self.fourcc {
            b"VP80" => Ok("vp8"),
            b"VP90" => Ok("vp09"),
            b"AV01" => Ok("av01"),
            other => Err(Error::Demux(format!(
                "unsupported IVF fourcc {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// Whether a frame payload starts a keyframe
///
/// VP8 and VP9 expose the frame type in the first header byte. For other
/// codecs only the first frame of the stream is treated as a keyframe.
pub fn is_keyframe(codec: &str, payload: &[u8], first: bool) -> bool {
    let Some(&b0) = payload.first() else {
        return false;
    };
    match codec {
        "vp8" => b0 & 0x01 == 0,
        "vp09" => vp9_is_keyframe(b0),
        _ => first,
    }
}

fn vp9_is_keyframe(b0: u8) -> bool {
    let mut bits = BitCursor { byte: b0, pos: 0 };
    if bits.take(2) != 0b10 {
        return false;
    }
    let profile_low = bits.take(1);
    let profile_high = bits.take(1);
    if (profile_high << 1) | profile_low == 3 {
        // reserved_zero
        bits.take(1);
    }
    if bits.take(1) == 1 {
        // show_existing_frame
        return false;
    }
    bits.take(1) == 0
}

struct BitCursor {
    byte: u8,
    pos: u8,
}

impl BitCursor {
    fn take(&mut self, n: u8) -> u8 {
        let mut value = 0;
        for _ in 0..n {
            let bit = if self.pos < 8 {
                (self.byte >> (7 - self.pos)) & 1
            } else {
                0
            };
            value = (value << 1) | bit;
            self.pos += 1;
        }
        value
    }
}

/// Video source over an IVF file
pub struct IvfSource {
    name: String,
    header: IvfHeader,
    codec: &'static str,
    reader: Option<IvfFrameReader<BufReader<File>>>,
    pump: Option<PacketPump>,
}

impl IvfSource {
    /// Open an IVF file and parse its header
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let mut header_bytes = [0u8; FILE_HEADER_LEN];
        file.read_exact(&mut header_bytes)?;
        let header = IvfHeader::parse(&header_bytes)?;
        let codec = header.codec()?;

        info!(
            "Opened {}: {} {}x{} @ {}/{}, {} frames",
            path.display(),
            codec,
            header.width,
            header.height,
            header.rate,
            header.scale,
            header.frame_count
        );

        Ok(Self {
            name: format!("ivf:{}", path.display()),
            header,
            codec,
            reader: Some(IvfFrameReader::new(file, header, codec)),
            pump: None,
        })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }
}

#[async_trait]
impl SampleSource for IvfSource {
    async fn info(&mut self) -> Result<SourceInfo> {
        Ok(SourceInfo {
            tracks: vec![TrackInfo {
                id: IVF_TRACK_ID,
                codec: self.codec.to_string(),
                timescale: self.header.rate,
                duration: Some(self.header.frame_count as u64 * self.header.scale as u64),
                media: TrackMedia::Video {
                    width: self.header.width as u32,
                    height: self.header.height as u32,
                },
            }],
        })
    }

    fn select_track(&mut self, track_id: u32) -> Result<()> {
        if track_id != IVF_TRACK_ID {
            return Err(Error::Demux(format!("no track with id {}", track_id)));
        }
        let reader = self.reader.take().ok_or_else(|| {
            Error::InvalidState(format!("track already selected for {}", self.name))
        })?;
        self.pump = Some(PacketPump::spawn("ivf", reader, READ_BATCH)?);
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

    fn description(&self, _track_id: u32) -> Option<Vec<u8>> {
        None
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sequential frame reader over IVF frame records
pub(crate) struct IvfFrameReader<R> {
    input: R,
    header: IvfHeader,
    codec: &'static str,
    frames_read: u64,
}

impl<R: Read> IvfFrameReader<R> {
    pub(crate) fn new(input: R, header: IvfHeader, codec: &'static str) -> Self {
        Self {
            input,
            header,
            codec,
            frames_read: 0,
        }
    }

    fn read_frame(&mut self) -> Result<Option<Sample>> {
        let mut frame_header = [0u8; FRAME_HEADER_LEN];
        match self.input.read_exact(&mut frame_header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u32::from_le_bytes([
            frame_header[0],
            frame_header[1],
            frame_header[2],
            frame_header[3],
        ]) as usize;
        let mut pts_bytes = [0u8; 8];
        pts_bytes.copy_from_slice(&frame_header[4..12]);
        let pts = i64::from_le_bytes(pts_bytes);

        let mut data = vec![0u8; size];
        match self.input.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("Truncated IVF frame at index {}", self.frames_read);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let first = self.frames_read == 0;
        self.frames_read += 1;

        Ok(Some(Sample {
            track_id: IVF_TRACK_ID,
            is_sync: is_keyframe(self.codec, &data, first),
            cts: pts.saturating_mul(self.header.scale as i64),
            duration: self.header.scale as u64,
            timescale: self.header.rate,
            data,
        }))
    }
}

impl<R: Read + Send + 'static> PacketReader for IvfFrameReader<R> {
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        self.read_frame()
    }
}
