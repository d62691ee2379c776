//! ML inference module
//!
//! Defines the detector capability the inference loop drives and the
//! detection results it publishes. The concrete face-mesh detector runs an
//! ONNX model through ONNX Runtime.

pub mod facemesh;

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::camera::FrameHandle;
use crate::error::{DetectionError, ModelError};

pub use facemesh::{OnnxFaceMesh, OnnxFaceMeshLoader};

/// One landmark in frame tensor pixel coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Per-point confidence, when the model reports one
    pub score: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, ..Default::default() }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn position(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// Axis-aligned bounding region
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub top_left: [f32; 2],
    pub bottom_right: [f32; 2],
}

impl BoundingBox {
    pub fn new(top_left: [f32; 2], bottom_right: [f32; 2]) -> Self {
        Self { top_left, bottom_right }
    }

    /// Smallest box containing every landmark.
    pub fn enclosing(landmarks: &[Landmark]) -> Self {
        let mut min = [f32::MAX, f32::MAX];
        let mut max = [f32::MIN, f32::MIN];
        for l in landmarks {
            min[0] = min[0].min(l.x);
            min[1] = min[1].min(l.y);
            max[0] = max[0].max(l.x);
            max[1] = max[1].max(l.y);
        }
        if landmarks.is_empty() {
            return Self::default();
        }
        Self::new(min, max)
    }

    pub fn width(&self) -> f32 {
        self.bottom_right[0] - self.top_left[0]
    }

    pub fn height(&self) -> f32 {
        self.bottom_right[1] - self.top_left[1]
    }

    pub fn center(&self) -> [f32; 2] {
        [
            (self.top_left[0] + self.bottom_right[0]) / 2.0,
            (self.top_left[1] + self.bottom_right[1]) / 2.0,
        ]
    }
}

/// Layout of a result's landmark list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Dense face mesh (468 points for MediaPipe face mesh)
    FaceMesh,
    /// COCO 17-keypoint body pose
    Pose,
}

/// One detected entity
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    pub bounding_box: BoundingBox,
    pub landmarks: Vec<Landmark>,
    /// Confidence that the entity is present
    pub score: f32,
    pub topology: Topology,
}

impl DetectionResult {
    pub fn face(bounding_box: BoundingBox, landmarks: Vec<Landmark>, score: f32) -> Self {
        Self {
            bounding_box,
            landmarks,
            score,
            topology: Topology::FaceMesh,
        }
    }

    pub fn pose(keypoints: Vec<Landmark>, score: f32) -> Self {
        Self {
            bounding_box: BoundingBox::enclosing(&keypoints),
            landmarks: keypoints,
            score,
            topology: Topology::Pose,
        }
    }
}

/// Produces detections from a single frame. Holds loaded model weights.
pub trait Detector: Send + Sync + 'static {
    fn estimate(
        &self,
        frame: &FrameHandle,
    ) -> impl Future<Output = Result<Vec<DetectionResult>, DetectionError>> + Send;
}

/// Asynchronously loads a [`Detector`].
pub trait DetectorLoader: Send + 'static {
    type Detector: Detector;

    fn load(self) -> impl Future<Output = Result<Self::Detector, ModelError>> + Send;
}

/// Detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Path to the ONNX model. Searched for in `models/` when unset.
    pub model_path: Option<PathBuf>,
    /// Maximum number of simultaneous detections to report
    pub max_faces: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            max_faces: 1,
            intra_threads: 2,
        }
    }
}

/// Set-once holder for the detector, shared between loader and loop.
///
/// Empty until loading completes; read-only afterwards.
pub struct DetectorSlot<D> {
    inner: Arc<OnceLock<Arc<D>>>,
}

impl<D> DetectorSlot<D> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OnceLock::new()),
        }
    }

    /// Install the detector. Returns `false` if one was already installed.
    pub fn install(&self, detector: D) -> bool {
        self.inner.set(Arc::new(detector)).is_ok()
    }

    pub fn get(&self) -> Option<Arc<D>> {
        self.inner.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl<D> Clone for DetectorSlot<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> Default for DetectorSlot<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_slot_installs_once() {
        let slot: DetectorSlot<u32> = DetectorSlot::new();
        let reader = slot.clone();
        assert!(!reader.is_ready());
        assert!(reader.get().is_none());

        assert!(slot.install(7));
        assert!(!slot.install(8));
        assert_eq!(reader.get().as_deref(), Some(&7));
    }

    #[test]
    fn test_bounding_box_enclosing() {
        let points = vec![Landmark::new(10.0, 40.0), Landmark::new(30.0, 20.0), Landmark::new(20.0, 30.0)];
        let bbox = BoundingBox::enclosing(&points);
        assert_eq!(bbox.top_left, [10.0, 20.0]);
        assert_eq!(bbox.bottom_right, [30.0, 40.0]);
        assert_eq!(bbox.width(), 20.0);
        assert_eq!(bbox.center(), [20.0, 30.0]);
        assert_eq!(BoundingBox::enclosing(&[]), BoundingBox::default());
    }

    #[test]
    fn test_detector_config_defaults() {
        let config: DetectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_faces, 1);
        assert_eq!(config.intra_threads, 2);
        assert!(config.model_path.is_none());
    }
}
