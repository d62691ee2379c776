//! Application state tying the camera, detector and overlay together
//!
//! The host (here the binary) mounts the app once, polls
//! [`App::render_overlay`] whenever it wants to draw and stops it on exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::camera::{
    CoordinateSpace, DevicePermission, FrameHandle, FrameSource, ResizeMode, ResizeTransform,
    StillImageSource,
};
#[cfg(feature = "camera")]
use crate::camera::CameraFrameSource;
use crate::config::AppConfig;
use crate::error::{CameraError, LifecycleError};
use crate::inference::{IntervalScheduler, LoopStats, RenderContext};
use crate::lifecycle::{LifecycleController, Mount, MountOutcome, PermissionProvider, StaticPermission};
use crate::ml::{OnnxFaceMesh, OnnxFaceMeshLoader, Topology};
use crate::overlay::{Overlay, OverlayRenderer};

/// Frame source chosen from the configuration.
pub enum AppSource {
    Still(StillImageSource),
    #[cfg(feature = "camera")]
    Camera(CameraFrameSource),
}

impl AppSource {
    /// Texture to model mapping of the opened source
    pub fn transform(&self) -> ResizeTransform {
        match self {
            AppSource::Still(source) => *source.transform(),
            #[cfg(feature = "camera")]
            AppSource::Camera(source) => *source.transform(),
        }
    }
}

impl FrameSource for AppSource {
    fn next_frame(&mut self) -> Option<FrameHandle> {
        match self {
            AppSource::Still(source) => source.next_frame(),
            #[cfg(feature = "camera")]
            AppSource::Camera(source) => source.next_frame(),
        }
    }

    fn release(&mut self, frame: FrameHandle) {
        match self {
            AppSource::Still(source) => source.release(frame),
            #[cfg(feature = "camera")]
            AppSource::Camera(source) => source.release(frame),
        }
    }
}

#[cfg(feature = "camera")]
fn open_camera(index: u32, space: CoordinateSpace, mode: ResizeMode) -> Result<AppSource, CameraError> {
    CameraFrameSource::open(index, space, mode).map(AppSource::Camera)
}

#[cfg(not(feature = "camera"))]
fn open_camera(_index: u32, _space: CoordinateSpace, _mode: ResizeMode) -> Result<AppSource, CameraError> {
    Err(CameraError::Unsupported)
}

/// Counts manual-mode preview updates and presented frames.
#[derive(Clone, Default)]
pub struct PreviewCounter {
    previews: Arc<AtomicU64>,
    presented: Arc<AtomicU64>,
}

impl PreviewCounter {
    pub fn previews(&self) -> u64 {
        self.previews.load(Ordering::Relaxed)
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl RenderContext for PreviewCounter {
    fn update_preview(&mut self) {
        self.previews.fetch_add(1, Ordering::Relaxed);
    }

    fn end_frame(&mut self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}

/// Main application state
pub struct App {
    config: AppConfig,
    controller: LifecycleController<OnnxFaceMesh>,
    renderer: OverlayRenderer,
    /// Texture mapping of the opened source; the configured space until then
    transform: Arc<Mutex<ResizeTransform>>,
    preview: PreviewCounter,

    // Cached overlay and the cycle it was rendered from
    overlay: Overlay,
    overlay_cycle: Option<u64>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let renderer = OverlayRenderer::new(
            config.inference.input_size,
            config.platform,
            config.overlay.style,
        );
        let transform = config.coordinate_space().transform(config.camera.resize_mode);
        let overlay = renderer.render(None);

        Self {
            config,
            controller: LifecycleController::new(),
            renderer,
            transform: Arc::new(Mutex::new(transform)),
            preview: PreviewCounter::default(),
            overlay,
            overlay_cycle: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn controller(&self) -> &LifecycleController<OnnxFaceMesh> {
        &self.controller
    }

    /// Mapping from model input back to camera texture coordinates
    pub fn texture_transform(&self) -> ResizeTransform {
        *self.transform.lock()
    }

    /// Ask for the camera, open the frame source and start the loop.
    pub async fn start(&mut self) -> Result<MountOutcome, LifecycleError> {
        if self.config.camera.still_image.is_some() {
            self.mount_with(&StaticPermission::granted()).await
        } else {
            self.mount_with(&DevicePermission).await
        }
    }

    async fn mount_with<P: PermissionProvider>(&mut self, permission: &P) -> Result<MountOutcome, LifecycleError> {
        let config = &self.config;
        let space = config.coordinate_space();
        let mode = config.camera.resize_mode;
        let still_image = config.camera.still_image.clone();
        let camera_index = config.camera.index;

        let source_transform = self.transform.clone();

        let open_source = move || -> Result<AppSource, CameraError> {
            let source = match still_image {
                Some(path) => StillImageSource::open(&path, space.model, mode).map(AppSource::Still)?,
                None => open_camera(camera_index, space, mode)?,
            };
            *source_transform.lock() = source.transform();
            Ok(source)
        };

        let request = Mount::new(
            OnnxFaceMeshLoader::new(config.detector.clone()),
            open_source,
            IntervalScheduler::new(config.inference.target_fps),
        )
        .with_render_context(self.preview.clone(), config.inference.autorender);

        let outcome = self.controller.mount(permission, request).await?;
        tracing::info!(?outcome, platform = ?config.platform, "Camera view mounted");
        Ok(outcome)
    }

    /// Overlay for the latest published detections. Re-rendered only when a
    /// newer cycle has been published.
    pub fn render_overlay(&mut self) -> &Overlay {
        let snapshot = self.controller.overlay().snapshot();
        if self.overlay_cycle != Some(snapshot.cycle) {
            self.overlay = self.renderer.render(snapshot.detections.as_deref());
            self.overlay_cycle = Some(snapshot.cycle);
        }
        &self.overlay
    }

    /// Log a one-line summary of the current overlay.
    pub fn report(&mut self) {
        let loop_state = self.controller.loop_state();
        let detector_ready = self.controller.detector_ready();
        let viewport = self.config.overlay.viewport;
        let snapshot = self.controller.overlay().snapshot();

        let transform = self.texture_transform();
        let overlay = self.render_overlay();
        let entities = overlay.groups.len();
        let primitives = overlay.primitive_count();
        let scale = overlay.viewport_mapping(viewport).scale;

        let face_center = snapshot
            .detections
            .as_deref()
            .and_then(|d| d.iter().find(|d| d.topology == Topology::FaceMesh))
            .map(|face| transform.to_texture(face.bounding_box.center()));

        tracing::info!(
            cycle = snapshot.cycle,
            ?loop_state,
            detector_ready,
            entities,
            primitives,
            viewport_scale = scale,
            ?face_center,
            presented = self.preview.presented(),
            "Overlay"
        );
    }

    /// Unmount and wait for the final cycle.
    pub async fn stop(&mut self) -> Option<LoopStats> {
        self.controller.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Platform, Size, MODEL_INPUT_SIZE};
    use crate::inference::LoopState;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_preview_counter_counts() {
        let mut counter = PreviewCounter::default();
        let observer = counter.clone();
        counter.update_preview();
        counter.end_frame();
        counter.end_frame();
        assert_eq!(observer.previews(), 1);
        assert_eq!(observer.presented(), 2);
    }

    #[test]
    fn test_new_app_renders_empty_overlay() {
        let mut app = App::new(AppConfig {
            platform: Platform::Android,
            ..AppConfig::default()
        });
        let overlay = app.render_overlay();
        assert!(overlay.is_empty());
        assert_eq!(overlay.mirror, -1.0);
    }

    #[tokio::test]
    async fn test_still_image_mount_runs_without_detector() {
        let dir = std::env::temp_dir().join(format!("landmark-camera-app-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let image_path = dir.join("still.png");
        RgbaImage::from_pixel(64, 48, Rgba([128, 128, 128, 255]))
            .save(&image_path)
            .unwrap();

        let mut config = AppConfig::default();
        config.camera.still_image = Some(image_path);
        config.detector.model_path = Some(dir.join("missing.onnx"));
        config.inference.autorender = false;
        config.inference.target_fps = 200;

        let mut app = App::new(config);
        let configured = app.texture_transform();
        assert_eq!(app.start().await, Ok(MountOutcome::Started));
        assert_eq!(app.start().await, Err(LifecycleError::AlreadyMounted));

        // Overlay coordinates map back onto the image, not the configured camera texture
        let opened = app.texture_transform();
        assert_ne!(opened, configured);
        assert_eq!(
            opened,
            ResizeTransform::new(Size::new(64, 48), MODEL_INPUT_SIZE, ResizeMode::Stretch)
        );
        let [x, y] = opened.to_texture([152.0, 200.0]);
        assert!((x - 64.0).abs() < 1e-3);
        assert!((y - 48.0).abs() < 1e-3);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!app.controller().detector_ready());
        assert!(app.render_overlay().is_empty());

        let stats = app.stop().await.unwrap();
        assert!(stats.frames_pulled > 0);
        assert_eq!(stats.frames_pulled, stats.frames_released);
        assert_eq!(stats.published, 0);
        assert_eq!(app.controller().loop_state(), LoopState::Canceled);
        assert!(app.preview.presented() > 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
