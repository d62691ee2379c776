//! Per-frame inference loop
//!
//! Each cycle pulls one frame, runs the detector on it when one is loaded,
//! publishes the results, releases the frame and then waits for the next
//! frame tick. Exactly one cycle is in flight at a time: the next tick is only
//! requested after the current detection has settled.

pub mod scheduler;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::camera::{FrameHandle, FrameSource};
use crate::ml::{Detector, DetectorSlot};
use crate::state::StateSink;

pub use scheduler::{CancellationHandle, FrameScheduler, IntervalScheduler};

/// Lifecycle state of the inference loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Not started yet
    #[default]
    Uninitialized,
    /// A detection call is in flight
    Detecting,
    /// Waiting for the next frame tick
    Idle,
    /// Stopped; no further cycles will run
    Canceled,
}

/// Loop state readable from outside the loop task.
#[derive(Clone, Debug, Default)]
pub struct SharedLoopState(Arc<Mutex<LoopState>>);

impl SharedLoopState {
    pub fn get(&self) -> LoopState {
        *self.0.lock()
    }

    fn set(&self, state: LoopState) {
        *self.0.lock() = state;
    }
}

/// Preview hooks for manual render mode.
///
/// With automatic rendering the capture layer presents frames itself and these
/// are never called.
pub trait RenderContext: Send {
    /// Refresh the camera preview before the cycle's work
    fn update_preview(&mut self);
    /// Present the frame once the cycle's work is done
    fn end_frame(&mut self);
}

/// Render context for automatic rendering mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoRender;

impl RenderContext for AutoRender {
    fn update_preview(&mut self) {}
    fn end_frame(&mut self) {}
}

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The source had no new frame
    NoFrame,
    /// Frame pulled and released without detection
    NoDetector,
    /// Results published
    Published { count: usize },
    /// Detection failed; nothing published
    Failed,
    /// Detection settled after cancellation, or the sink rejected it; result dropped
    Stale,
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub frames_pulled: u64,
    pub frames_released: u64,
    pub published: u64,
    pub skipped_no_detector: u64,
    pub failures: u64,
    pub stale_dropped: u64,
}

/// The inference loop. Consumed by [`InferenceLoop::run`].
pub struct InferenceLoop<S, D, P, R = AutoRender> {
    source: S,
    detector: DetectorSlot<D>,
    sink: P,
    render: R,
    autorender: bool,
    cancel: CancellationHandle,
    state: SharedLoopState,
    cycle: u64,
    stats: LoopStats,
}

impl<S, D, P> InferenceLoop<S, D, P, AutoRender>
where
    S: FrameSource,
    D: Detector,
    P: StateSink,
{
    pub fn new(source: S, detector: DetectorSlot<D>, sink: P, cancel: CancellationHandle) -> Self {
        Self {
            source,
            detector,
            sink,
            render: AutoRender,
            autorender: true,
            cancel,
            state: SharedLoopState::default(),
            cycle: 0,
            stats: LoopStats::default(),
        }
    }
}

impl<S, D, P, R> InferenceLoop<S, D, P, R>
where
    S: FrameSource,
    D: Detector,
    P: StateSink,
    R: RenderContext,
{
    /// Use `render` for preview updates. With `autorender` set it is never called.
    pub fn with_render_context<R2: RenderContext>(
        self,
        render: R2,
        autorender: bool,
    ) -> InferenceLoop<S, D, P, R2> {
        InferenceLoop {
            source: self.source,
            detector: self.detector,
            sink: self.sink,
            render,
            autorender,
            cancel: self.cancel,
            state: self.state,
            cycle: self.cycle,
            stats: self.stats,
        }
    }

    /// Report state into `state` instead of a private handle.
    pub fn with_shared_state(mut self, state: SharedLoopState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run cycles on every tick of `scheduler` until cancelled.
    pub async fn run<F: FrameScheduler>(mut self, mut scheduler: F) -> LoopStats {
        let cancel = self.cancel.clone();
        tracing::info!(handle = cancel.id(), autorender = self.autorender, "Inference loop started");
        self.state.set(LoopState::Idle);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let ticked = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                ticked = scheduler.next_tick() => ticked,
            };
            if !ticked {
                if !cancel.is_cancelled() {
                    tracing::info!("Frame scheduler closed, stopping inference loop");
                }
                break;
            }
            if cancel.is_cancelled() {
                break;
            }

            let outcome = self.run_cycle().await;
            tracing::trace!(cycle = self.cycle, ?outcome, "Cycle finished");
            self.state.set(LoopState::Idle);
        }

        self.state.set(LoopState::Canceled);
        tracing::info!(
            handle = cancel.id(),
            cycles = self.stats.cycles,
            published = self.stats.published,
            failures = self.stats.failures,
            "Inference loop stopped"
        );
        self.stats
    }

    /// One cycle: pull, detect, publish, release.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle += 1;
        self.stats.cycles += 1;
        let cycle = self.cycle;

        if !self.autorender {
            self.render.update_preview();
        }

        let outcome = match self.source.next_frame() {
            None => CycleOutcome::NoFrame,
            Some(frame) => {
                self.stats.frames_pulled += 1;
                let outcome = self.detect_and_publish(cycle, &frame).await;
                // Only after detection has settled and results are published
                self.source.release(frame);
                self.stats.frames_released += 1;
                outcome
            }
        };

        if !self.autorender {
            self.render.end_frame();
        }
        outcome
    }

    async fn detect_and_publish(&mut self, cycle: u64, frame: &FrameHandle) -> CycleOutcome {
        let Some(detector) = self.detector.get() else {
            self.stats.skipped_no_detector += 1;
            return CycleOutcome::NoDetector;
        };

        self.state.set(LoopState::Detecting);
        let result = detector.estimate(frame).await;

        if self.cancel.is_cancelled() {
            self.stats.stale_dropped += 1;
            tracing::debug!(cycle, "Detection settled after cancellation, dropping result");
            return CycleOutcome::Stale;
        }

        match result {
            Ok(results) => {
                let count = results.len();
                if self.sink.publish(cycle, results) {
                    self.stats.published += 1;
                    CycleOutcome::Published { count }
                } else {
                    self.stats.stale_dropped += 1;
                    tracing::debug!(cycle, "Overlay state rejected publish");
                    CycleOutcome::Stale
                }
            }
            Err(e) => {
                self.stats.failures += 1;
                tracing::warn!(cycle, frame = frame.id(), "Detection failed: {}", e);
                CycleOutcome::Failed
            }
        }
    }
}
