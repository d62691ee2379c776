//! Camera capture module
//!
//! Captures frames on a background thread with nokhwa and exposes them as a
//! pull-based [`FrameSource`]: every pull converts the newest captured image
//! into a model-sized tensor.

pub mod frame;
pub mod still;
pub mod transform;

#[cfg(feature = "camera")]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(feature = "camera")]
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "camera")]
use std::time::Duration;

#[cfg(feature = "camera")]
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbaImage;

pub use frame::{FrameConverter, FrameHandle, FrameSource, TensorPool};
pub use still::StillImageSource;
pub use transform::{
    CoordinateSpace, CropRegion, Platform, ResizeMode, ResizeTransform, Size, MODEL_INPUT_SIZE,
};

#[cfg(feature = "camera")]
use crate::error::CameraError;
use crate::lifecycle::{PermissionProvider, PermissionStatus};

/// Camera frame data
pub struct CameraFrame {
    /// RGBA pixels
    pub image: RgbaImage,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    /// Camera index
    pub index: u32,
    /// Camera name
    pub name: String,
}

/// List available cameras
#[cfg(feature = "camera")]
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(camera_list) => camera_list
            .iter()
            .enumerate()
            .map(|(idx, info)| CameraInfo {
                index: idx as u32,
                name: info.human_name().to_string(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

#[cfg(not(feature = "camera"))]
pub fn list_cameras() -> Vec<CameraInfo> {
    Vec::new()
}

/// How long opening the camera may take before giving up
#[cfg(feature = "camera")]
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for the capture thread's open result.
#[cfg(feature = "camera")]
fn wait_ready(ready: &Receiver<Result<(), String>>, timeout: Duration) -> Result<(), CameraError> {
    match ready.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(CameraError::Open(reason)),
        Err(RecvTimeoutError::Timeout) => Err(CameraError::Open("timed out".to_string())),
        // Thread exited without reporting
        Err(RecvTimeoutError::Disconnected) => Err(CameraError::NoDevice),
    }
}

/// Camera capture on a background thread.
///
/// Only the newest frame is kept; older undelivered frames are discarded.
#[cfg(feature = "camera")]
pub struct CameraCapture {
    /// Newest captured frame
    frames: Receiver<CameraFrame>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Frame counter
    frame_count: Arc<AtomicU64>,
}

#[cfg(feature = "camera")]
impl CameraCapture {
    /// Open camera `camera_index` (0 for default) and start capturing.
    ///
    /// Blocks until the capture thread has opened the stream or given up.
    pub fn new(camera_index: u32) -> Result<Self, CameraError> {
        let (sender, frames) = crossbeam_channel::bounded::<CameraFrame>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        let stale = frames.clone();
        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(camera_index, sender, stale, ready_tx, running_clone, frame_count_clone);
            })?;

        let mut capture = Self {
            frames,
            running,
            thread_handle: Some(thread_handle),
            frame_count,
        };
        if let Err(e) = wait_ready(&ready_rx, OPEN_TIMEOUT) {
            capture.stop();
            return Err(e);
        }
        Ok(capture)
    }

    fn open_camera(camera_index: u32) -> Option<nokhwa::Camera> {
        use nokhwa::pixel_format::RgbAFormat;
        use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};

        let index = CameraIndex::Index(camera_index);
        let attempts = [
            RequestedFormatType::AbsoluteHighestResolution,
            RequestedFormatType::HighestResolution(Resolution::new(640, 480)),
            RequestedFormatType::None,
        ];

        for requested in attempts {
            match nokhwa::Camera::new(index.clone(), RequestedFormat::new::<RgbAFormat>(requested)) {
                Ok(camera) => return Some(camera),
                Err(e) => tracing::warn!("Failed to open camera with {:?}: {:?}", requested, e),
            }
        }
        None
    }

    fn capture_thread(
        camera_index: u32,
        sender: Sender<CameraFrame>,
        stale: Receiver<CameraFrame>,
        ready: Sender<Result<(), String>>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        use nokhwa::pixel_format::RgbAFormat;

        tracing::info!(camera_index, "Starting camera capture thread");

        let Some(mut camera) = Self::open_camera(camera_index) else {
            tracing::error!("Failed to open camera with all format attempts");
            running.store(false, Ordering::Release);
            let _ = ready.send(Err(format!("camera {} rejected every format", camera_index)));
            return;
        };

        if let Err(e) = camera.open_stream() {
            tracing::error!("Failed to open camera stream: {:?}", e);
            running.store(false, Ordering::Release);
            let _ = ready.send(Err(format!("stream: {}", e)));
            return;
        }
        let _ = ready.send(Ok(()));

        tracing::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );

        while running.load(Ordering::Acquire) {
            let frame = match camera.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }
            };

            let decoded = match frame.decode_image::<RgbAFormat>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!("Failed to decode frame: {:?}", e);
                    continue;
                }
            };

            let width = frame.resolution().width();
            let height = frame.resolution().height();
            let Some(image) = RgbaImage::from_raw(width, height, decoded.into_raw()) else {
                tracing::warn!(width, height, "Decoded frame has unexpected buffer size");
                continue;
            };

            let camera_frame = CameraFrame {
                image,
                frame_number: frame_count.fetch_add(1, Ordering::Relaxed),
                timestamp: Instant::now(),
            };

            // Newest frame wins
            let _ = stale.try_recv();
            if sender.try_send(camera_frame).is_err() {
                tracing::trace!("Dropped frame, consumer holds the slot");
            }
        }

        let _ = camera.stop_stream();
        tracing::info!("Camera capture thread stopped");
    }

    /// Take the newest captured frame, if one arrived since the last call.
    pub fn take_frame(&self) -> Option<CameraFrame> {
        self.frames.try_recv().ok()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(feature = "camera")]
impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`FrameSource`] backed by a live camera.
#[cfg(feature = "camera")]
pub struct CameraFrameSource {
    capture: CameraCapture,
    converter: FrameConverter,
    space: CoordinateSpace,
    mode: ResizeMode,
}

#[cfg(feature = "camera")]
impl CameraFrameSource {
    pub fn open(camera_index: u32, space: CoordinateSpace, mode: ResizeMode) -> Result<Self, CameraError> {
        let capture = CameraCapture::new(camera_index)?;
        Ok(Self {
            capture,
            converter: FrameConverter::new(space.transform(mode)),
            space,
            mode,
        })
    }

    /// Transform from camera texture to model input currently in use
    pub fn transform(&self) -> &ResizeTransform {
        self.converter.transform()
    }
}

#[cfg(feature = "camera")]
impl FrameSource for CameraFrameSource {
    fn next_frame(&mut self) -> Option<FrameHandle> {
        let frame = self.capture.take_frame()?;
        let texture = Size::new(frame.image.width(), frame.image.height());
        if texture != self.space.texture {
            tracing::debug!(
                expected = ?self.space.texture,
                actual = ?texture,
                "Camera texture size differs from configured size, updating transform"
            );
            self.space.texture = texture;
            self.converter.set_transform(self.space.transform(self.mode));
        }
        Some(self.converter.convert(&frame.image))
    }

    fn release(&mut self, frame: FrameHandle) {
        self.converter.recycle(frame);
        if self.converter.outstanding() > 1 {
            tracing::warn!(
                outstanding = self.converter.outstanding(),
                "More than one camera frame is checked out"
            );
        }
    }
}

/// Grants camera access when the platform exposes at least one camera.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevicePermission;

impl PermissionProvider for DevicePermission {
    async fn request_camera(&self) -> PermissionStatus {
        match tokio::task::spawn_blocking(list_cameras).await {
            Ok(cameras) if !cameras.is_empty() => {
                for camera in &cameras {
                    tracing::info!(index = camera.index, name = %camera.name, "Found camera");
                }
                PermissionStatus::Granted
            }
            Ok(_) => {
                tracing::warn!("No camera available");
                PermissionStatus::Denied
            }
            Err(e) => {
                tracing::warn!("Camera query task failed: {}", e);
                PermissionStatus::Denied
            }
        }
    }
}

#[cfg(all(test, feature = "camera"))]
mod tests {
    use super::*;

    #[test]
    fn test_wait_ready_reports_open_failure() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(Err("camera 3 rejected every format".to_string())).unwrap();
        let result = wait_ready(&rx, Duration::from_secs(1));
        assert!(matches!(result, Err(CameraError::Open(reason)) if reason.contains("camera 3")));
    }

    #[test]
    fn test_wait_ready_thread_gone_is_no_device() {
        let (tx, rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        drop(tx);
        assert!(matches!(wait_ready(&rx, Duration::from_secs(1)), Err(CameraError::NoDevice)));
    }

    #[test]
    fn test_wait_ready_success_and_timeout() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(Ok(())).unwrap();
        assert!(wait_ready(&rx, Duration::from_secs(1)).is_ok());
        assert!(matches!(
            wait_ready(&rx, Duration::from_millis(10)),
            Err(CameraError::Open(_))
        ));
    }
}
