//! Refill scheduling primitives shared by the audio and video pipelines
//!
//! A pipeline runs at most one refill pass at a time. Requests arriving
//! while a pass is in flight are coalesced into a single pending flag and
//! the pass runs once more on completion.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use avpipe_common::{Error, Result, StreamKind};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

use super::lock_or_recover;

/// Coalescing in-flight guard for refill passes
#[derive(Debug, Default)]
pub struct RefillGuard {
    in_flight: AtomicBool,
    pending: AtomicBool,
}

impl RefillGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to run a pass
    ///
    /// Returns `false` if a pass is already running; the request is then
    /// remembered and reported by [`RefillGuard::finish`].
    pub fn try_begin(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.pending.store(false, Ordering::Release);
            true
        } else {
            self.pending.store(true, Ordering::Release);
            false
        }
    }

    /// End a pass
    ///
    /// Returns `true` if requests were coalesced during the pass. The caller
    /// then still owns the guard and must run another pass.
    pub fn finish(&self) -> bool {
        if self.pending.swap(false, Ordering::AcqRel) {
            return true;
        }
        self.in_flight.store(false, Ordering::Release);

        // A request may have landed between the swap and the store
        if self.pending.load(Ordering::Acquire)
            && self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.pending.store(false, Ordering::Release);
            return true;
        }
        false
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Single cancellable delayed task
///
/// Scheduling replaces any previously scheduled task, so at most one timer
/// is outstanding.
#[derive(Debug, Default)]
pub struct RefillTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefillTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling any earlier timer
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        trace!("Refill timer scheduled in {:?}", delay);

        let previous = lock_or_recover(&self.handle).replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        let previous = lock_or_recover(&self.handle).take();
        if let Some(previous) = previous {
            previous.abort();
            trace!("Refill timer cancelled");
        }
    }

    /// Whether a timer is scheduled and has not yet fired
    pub fn is_pending(&self) -> bool {
        lock_or_recover(&self.handle)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RefillTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One-shot "first fill reached" notification, producer side
#[derive(Debug)]
pub struct FirstFill {
    tx: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl FirstFill {
    pub fn new(stream: StreamKind) -> (Self, ReadySignal) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            ReadySignal { stream, rx },
        )
    }

    /// Resolve the signal; returns `true` only the first time
    pub fn complete(&self) -> bool {
        match lock_or_recover(&self.tx).take() {
            Some(tx) => {
                let _ = tx.send(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Reject the signal if it has not resolved yet
    pub fn fail(&self, error: Error) -> bool {
        match lock_or_recover(&self.tx).take() {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        lock_or_recover(&self.tx).is_none()
    }
}

/// Resolves once a pipeline first reaches its buffering target
#[derive(Debug)]
pub struct ReadySignal {
    stream: StreamKind,
    rx: oneshot::Receiver<Result<()>>,
}

impl ReadySignal {
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ChannelClosed(format!(
                "{} pipeline dropped before its first fill",
                self.stream
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_guard_rejects_second_pass() {
        let guard = RefillGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        assert!(guard.is_in_flight());
    }

    #[test]
    fn test_guard_coalesces_requests_into_one_rerun() {
        let guard = RefillGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        assert!(!guard.try_begin());

        // Two coalesced requests produce exactly one rerun
        assert!(guard.finish());
        assert!(!guard.finish());
        assert!(!guard.is_in_flight());
        assert!(guard.try_begin());
    }

    #[test]
    fn test_guard_without_requests_releases() {
        let guard = RefillGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.finish());
        assert!(!guard.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let timer = RefillTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reschedule_replaces_previous() {
        let timer = RefillTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            timer.schedule(Duration::from_millis(100), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_fill_resolves_once() {
        let (first_fill, ready) = FirstFill::new(StreamKind::Audio);
        assert!(!first_fill.is_complete());
        assert!(first_fill.complete());
        assert!(!first_fill.complete());
        assert!(!first_fill.fail(Error::Internal("late".to_string())));
        assert!(ready.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_fill_failure_propagates() {
        let (first_fill, ready) = FirstFill::new(StreamKind::Video);
        assert_eq!(ready.stream(), StreamKind::Video);
        first_fill.fail(Error::Demux("truncated".to_string()));
        assert!(matches!(ready.wait().await, Err(Error::Demux(_))));
    }

    #[tokio::test]
    async fn test_dropped_producer_is_channel_closed() {
        let (first_fill, ready) = FirstFill::new(StreamKind::Audio);
        drop(first_fill);
        assert!(matches!(ready.wait().await, Err(Error::ChannelClosed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancel() {
        let timer = RefillTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timer.is_pending());
    }
}
