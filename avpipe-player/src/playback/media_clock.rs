//! Media clock for the control context
//!
//! The audio sink is the master clock. It reports `(media time, instant)`
//! pairs; between reports the control context extrapolates with its own
//! monotonic clock.

use avpipe_common::time::secs_to_micros;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockAnchor {
    pub media_time_secs: f64,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaClock {
    anchor: ClockAnchor,
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock {
    /// Clock anchored at media time zero, now
    pub fn new() -> Self {
        Self {
            anchor: ClockAnchor {
                media_time_secs: 0.0,
                captured_at: Instant::now(),
            },
        }
    }

    /// Replace the anchor
    pub fn update(&mut self, media_time_secs: f64, captured_at: Instant) {
        self.anchor = ClockAnchor {
            media_time_secs,
            captured_at,
        };
    }

    pub fn anchor(&self) -> ClockAnchor {
        self.anchor
    }

    /// Media time at `at`
    ///
    /// Instants before the anchor extrapolate backwards.
    pub fn now_secs_at(&self, at: Instant) -> f64 {
        let anchor = self.anchor;
        if at >= anchor.captured_at {
            anchor.media_time_secs + (at - anchor.captured_at).as_secs_f64()
        } else {
            anchor.media_time_secs - (anchor.captured_at - at).as_secs_f64()
        }
    }

    pub fn now_secs(&self) -> f64 {
        self.now_secs_at(Instant::now())
    }

    /// Current media time in microseconds, the unit of frame timestamps
    pub fn now_us(&self) -> i64 {
        secs_to_micros(self.now_secs())
    }
}
