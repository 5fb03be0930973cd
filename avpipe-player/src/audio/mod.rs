//! Real-time audio output

pub mod output;

pub use output::{AudioSink, SinkClock};
