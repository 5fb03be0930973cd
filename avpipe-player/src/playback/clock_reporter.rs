//! Periodic media-time reports from the audio sink to the control context
//!
//! Only `(media time, instant)` pairs cross the boundary; the control
//! context extrapolates between reports.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::worker::WorkerHandle;

/// Anything that knows the media time currently audible
pub trait MediaTimeSource: Send + Sync + 'static {
    fn media_time_secs(&self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReport {
    pub media_time_secs: f64,
    pub captured_at: Instant,
}

/// Sends one report immediately on start and then one per interval
pub struct ClockReporter {
    source: Arc<dyn MediaTimeSource>,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl ClockReporter {
    pub fn new(source: Arc<dyn MediaTimeSource>, period: Duration) -> Self {
        Self {
            source,
            period,
            task: None,
        }
    }

    /// Read the source now
    pub fn sample(&self) -> ClockReport {
        ClockReport {
            media_time_secs: self.source.media_time_secs(),
            captured_at: Instant::now(),
        }
    }

    pub fn start(&mut self, worker: WorkerHandle) {
        self.stop();

        let source = Arc::clone(&self.source);
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = ClockReport {
                    media_time_secs: source.media_time_secs(),
                    captured_at: Instant::now(),
                };
                trace!(media_time_secs = report.media_time_secs, "Clock report");
                if worker.update_media_time(report).is_err() {
                    debug!("Media worker gone, clock reporter exiting");
                    break;
                }
            }
        }));
        debug!("Clock reporter started ({:?} period)", self.period);
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Clock reporter stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for ClockReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
