//! # avpipe Player Library
//!
//! Buffered audio/video playback core.
//!
//! **Pipeline:** a push-based sample source feeds a pull demuxer; each stream
//! keeps a small look-ahead of decoded media (audio in a lock-free sample
//! ring, video in a frame buffer). The audio sink is the master clock and
//! video frames are chosen against it.
//!
//! **Architecture:** symphonia (demux/decode) + ringbuf + cpal, driven by a
//! single tokio control task (`playback::MediaWorker`).

pub mod audio;
pub mod decode;
pub mod demux;
pub mod media;
pub mod playback;

pub use avpipe_common::{Error, Result};
