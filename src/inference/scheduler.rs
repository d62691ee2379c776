//! Frame ticks and cooperative cancellation
//!
//! A [`FrameScheduler`] is the "request next frame" primitive: the loop awaits
//! one tick per cycle and only asks for the next tick after the current cycle
//! has settled. A [`CancellationHandle`] suppresses the next continuation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior};

/// Source of frame ticks.
pub trait FrameScheduler: Send {
    /// Wait for the next tick. Returns `false` once no more ticks will come.
    fn next_tick(&mut self) -> impl Future<Output = bool> + Send;
}

/// Ticks at a fixed frame rate. Overrunning cycles delay the next tick
/// instead of producing a burst.
pub struct IntervalScheduler {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalScheduler {
    pub fn new(target_fps: u32) -> Self {
        Self {
            // tokio intervals reject a zero period
            period: Duration::from_nanos((1_000_000_000u64 / target_fps.max(1) as u64).max(1)),
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl FrameScheduler for IntervalScheduler {
    async fn next_tick(&mut self) -> bool {
        // Created lazily: the interval needs a running runtime
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
        true
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct CancelInner {
    id: u64,
    cancelled: AtomicBool,
    notify: Notify,
}

/// Identifies one running loop's pending continuation. Clones share state.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    inner: Arc<CancelInner>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Invalidate the handle. Returns `true` only for the call that cancelled it.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}
