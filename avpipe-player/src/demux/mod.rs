//! Container demuxing
//!
//! Push-based sample sources (`source`, `iso`, `ivf`) wrapped by the
//! pull-based demuxer the pipelines read from.

pub mod iso;
pub mod ivf;
pub mod pull;
pub mod source;

pub use iso::IsoAudioSource;
pub use ivf::IvfSource;
pub use pull::{BufferedPullDemuxer, PullDemuxer, DEFAULT_LOOKAHEAD_SAMPLES};
pub use source::{SampleSource, SourceInfo, TrackInfo, TrackMedia};
