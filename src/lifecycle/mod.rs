//! Mount/unmount lifecycle of the inference loop
//!
//! Mounting checks the camera permission, starts the loop and loads the
//! detector in the background. Unmounting stops scheduling new cycles; a cycle
//! already in flight finishes on its own and its result is dropped.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::camera::FrameSource;
use crate::error::{CameraError, LifecycleError};
use crate::inference::{
    AutoRender, CancellationHandle, FrameScheduler, InferenceLoop, LoopState, LoopStats,
    RenderContext, SharedLoopState,
};
use crate::ml::{Detector, DetectorLoader, DetectorSlot};
use crate::state::OverlayState;

/// Result of a camera permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Resolves whether the app may use the camera. Consulted once per mount.
pub trait PermissionProvider: Send + Sync {
    fn request_camera(&self) -> impl Future<Output = PermissionStatus> + Send;
}

/// Permission decided up front by the host.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub PermissionStatus);

impl StaticPermission {
    pub fn granted() -> Self {
        Self(PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self(PermissionStatus::Denied)
    }
}

impl PermissionProvider for StaticPermission {
    async fn request_camera(&self) -> PermissionStatus {
        self.0
    }
}

/// What mounting did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// Loop running
    Started,
    /// Permission denied; camera view withheld and no frames pulled
    CameraWithheld,
    /// Permission granted but the camera could not be opened
    CameraUnavailable,
}

/// Everything the loop needs for one mount.
pub struct Mount<L, O, F, R = AutoRender> {
    /// Loads the detector in the background
    pub loader: L,
    /// Opens the frame source once permission is granted
    pub open_source: O,
    pub scheduler: F,
    pub render: R,
    pub autorender: bool,
}

impl<L, O, F> Mount<L, O, F> {
    pub fn new(loader: L, open_source: O, scheduler: F) -> Self {
        Self {
            loader,
            open_source,
            scheduler,
            render: AutoRender,
            autorender: true,
        }
    }
}

impl<L, O, F, R> Mount<L, O, F, R> {
    pub fn with_render_context<R2>(self, render: R2, autorender: bool) -> Mount<L, O, F, R2> {
        Mount {
            loader: self.loader,
            open_source: self.open_source,
            scheduler: self.scheduler,
            render,
            autorender,
        }
    }
}

/// The loop task left behind by an unmount.
pub struct LoopTask {
    handle_id: u64,
    task: JoinHandle<LoopStats>,
}

impl LoopTask {
    /// Wait for the final in-flight cycle to settle.
    pub async fn join(self) -> Option<LoopStats> {
        match self.task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!(handle = self.handle_id, "Inference loop task failed: {}", e);
                None
            }
        }
    }
}

struct ActiveLoop {
    cancel: CancellationHandle,
    task: JoinHandle<LoopStats>,
}

/// Owns the single cancelable loop of a mounted component.
pub struct LifecycleController<D> {
    overlay: OverlayState,
    loop_state: SharedLoopState,
    detector: DetectorSlot<D>,
    active: Option<ActiveLoop>,
}

impl<D: Detector> LifecycleController<D> {
    pub fn new() -> Self {
        Self {
            overlay: OverlayState::new(),
            loop_state: SharedLoopState::default(),
            detector: DetectorSlot::new(),
            active: None,
        }
    }

    /// State the loop publishes into
    pub fn overlay(&self) -> &OverlayState {
        &self.overlay
    }

    /// State of the mounted loop; after unmount, of the last loop.
    pub fn loop_state(&self) -> LoopState {
        self.loop_state.get()
    }

    pub fn detector_ready(&self) -> bool {
        self.detector.is_ready()
    }

    pub fn is_mounted(&self) -> bool {
        self.active.is_some()
    }

    /// Start the loop. Failures to get a camera are reported as outcomes, not errors.
    pub async fn mount<P, L, O, S, F, R>(
        &mut self,
        permission: &P,
        request: Mount<L, O, F, R>,
    ) -> Result<MountOutcome, LifecycleError>
    where
        P: PermissionProvider,
        L: DetectorLoader<Detector = D>,
        O: FnOnce() -> Result<S, CameraError>,
        S: FrameSource + 'static,
        F: FrameScheduler + 'static,
        R: RenderContext + 'static,
    {
        if self.active.is_some() {
            return Err(LifecycleError::AlreadyMounted);
        }

        if permission.request_camera().await == PermissionStatus::Denied {
            tracing::warn!("Camera permission denied, camera view withheld");
            return Ok(MountOutcome::CameraWithheld);
        }

        let source = match (request.open_source)() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Failed to open camera: {}", e);
                return Ok(MountOutcome::CameraUnavailable);
            }
        };

        let cancel = CancellationHandle::new();
        self.overlay.attach();
        // Fresh per loop so a previous loop winding down cannot overwrite it
        self.loop_state = SharedLoopState::default();

        let inference = InferenceLoop::new(source, self.detector.clone(), self.overlay.clone(), cancel.clone())
            .with_render_context(request.render, request.autorender)
            .with_shared_state(self.loop_state.clone());
        let task = tokio::spawn(inference.run(request.scheduler));

        if self.detector.is_ready() {
            tracing::debug!("Detector already loaded, reusing it");
        } else {
            let slot = self.detector.clone();
            let loader = request.loader;
            tokio::spawn(async move {
                match loader.load().await {
                    Ok(detector) => {
                        if slot.install(detector) {
                            tracing::info!("Detector ready");
                        }
                    }
                    Err(e) => tracing::error!("Failed to load detector, no overlay will be shown: {}", e),
                }
            });
        }

        tracing::info!(handle = cancel.id(), "Mounted inference loop");
        self.active = Some(ActiveLoop { cancel, task });
        Ok(MountOutcome::Started)
    }

    /// Stop scheduling new cycles. Returns the loop task so the caller can wait
    /// for the in-flight cycle; `None` (a no-op) when nothing is mounted.
    pub fn unmount(&mut self) -> Option<LoopTask> {
        let active = self.active.take()?;
        active.cancel.cancel();
        self.overlay.detach();
        tracing::info!(handle = active.cancel.id(), "Unmounted inference loop");
        Some(LoopTask {
            handle_id: active.cancel.id(),
            task: active.task,
        })
    }

    /// Unmount and wait for the loop to finish.
    pub async fn shutdown(&mut self) -> Option<LoopStats> {
        self.unmount()?.join().await
    }
}

impl<D: Detector> Default for LifecycleController<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Drop for LifecycleController<D> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            self.overlay.detach();
        }
    }
}
