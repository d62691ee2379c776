//! Face mesh detector on ONNX Runtime
//!
//! Runs a MediaPipe-compatible face landmark model (192x192 NHWC input,
//! 468 x/y/z landmarks plus a face presence logit) on the frame tensor.
//! Inference runs on the blocking pool so the loop's task only suspends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array4, ArrayView3};
use parking_lot::Mutex;

use super::{BoundingBox, DetectionResult, Detector, DetectorConfig, DetectorLoader, Landmark};
use crate::camera::FrameHandle;
use crate::error::{DetectionError, ModelError};

/// Model input resolution
const MESH_INPUT: usize = 192;
/// Landmarks produced per face
pub const MESH_LANDMARKS: usize = 468;
/// Model file looked up in the models directory
pub const MODEL_FILE: &str = "face_landmark.onnx";

/// Loaded face mesh model
pub struct OnnxFaceMesh {
    session: Arc<Mutex<ort::session::Session>>,
    max_faces: usize,
}

impl OnnxFaceMesh {
    /// Load the model synchronously.
    pub fn load_blocking(config: &DetectorConfig) -> Result<Self, ModelError> {
        let model_path = match &config.model_path {
            Some(path) => path.clone(),
            None => find_model_dir()?.join(MODEL_FILE),
        };
        if !model_path.exists() {
            return Err(ModelError::NotFound(model_path));
        }

        ort::init()
            .with_name("LandmarkCamera")
            .commit()
            .map_err(|e| ModelError::Runtime(format!("Failed to initialize ORT: {}", e)))?;

        let session = ort::session::Session::builder()
            .map_err(|e| ModelError::Runtime(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| ModelError::Runtime(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| ModelError::Runtime(format!("Failed to load {:?}: {}", model_path, e)))?;

        if config.max_faces > 1 {
            tracing::warn!(
                max_faces = config.max_faces,
                "Face mesh model tracks a single face, extra faces are ignored"
            );
        }
        tracing::info!(path = ?model_path, "Loaded face mesh model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            max_faces: config.max_faces.max(1),
        })
    }

    fn run_session(
        session: &Mutex<ort::session::Session>,
        input: Array4<f32>,
    ) -> Result<Vec<Vec<f32>>, DetectionError> {
        let input_tensor = ort::value::Tensor::from_array(input)
            .map_err(|e| DetectionError::Inference(format!("Failed to create tensor: {}", e)))?;

        let mut session = session.lock();
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let mut values = Vec::new();
        for output in outputs.iter() {
            let (_shape, data) = output
                .1
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::InvalidOutput(e.to_string()))?;
            values.push(data.to_vec());
        }
        Ok(values)
    }
}

impl Detector for OnnxFaceMesh {
    async fn estimate(&self, frame: &FrameHandle) -> Result<Vec<DetectionResult>, DetectionError> {
        let tensor = frame.tensor();
        if tensor.shape()[2] != 3 {
            return Err(DetectionError::InvalidInput(tensor.shape().to_vec()));
        }
        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let input = preprocess(tensor)?;

        let session = self.session.clone();
        let outputs = tokio::task::spawn_blocking(move || Self::run_session(&session, input))
            .await
            .map_err(|e| DetectionError::Inference(format!("Inference task failed: {}", e)))??;

        let face = decode_mesh(&outputs, width, height)?;
        Ok(face.into_iter().take(self.max_faces).collect())
    }
}

/// Loads [`OnnxFaceMesh`] off the async runtime.
pub struct OnnxFaceMeshLoader {
    config: DetectorConfig,
}

impl OnnxFaceMeshLoader {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl DetectorLoader for OnnxFaceMeshLoader {
    type Detector = OnnxFaceMesh;

    async fn load(self) -> Result<OnnxFaceMesh, ModelError> {
        tokio::task::spawn_blocking(move || OnnxFaceMesh::load_blocking(&self.config))
            .await
            .map_err(|e| ModelError::Task(e.to_string()))?
    }
}

/// Nearest-neighbour resize of an `H x W x 3` tensor (0..=255) into a
/// `1 x 192 x 192 x 3` NHWC input in `[0, 1]`.
fn preprocess(tensor: ArrayView3<'_, f32>) -> Result<Array4<f32>, DetectionError> {
    let (src_h, src_w, _) = tensor.dim();
    if src_h == 0 || src_w == 0 {
        return Err(DetectionError::InvalidInput(tensor.shape().to_vec()));
    }

    let x_ratio = src_w as f32 / MESH_INPUT as f32;
    let y_ratio = src_h as f32 / MESH_INPUT as f32;

    Ok(Array4::from_shape_fn((1, MESH_INPUT, MESH_INPUT, 3), |(_, y, x, c)| {
        let src_x = ((x as f32 * x_ratio) as usize).min(src_w - 1);
        let src_y = ((y as f32 * y_ratio) as usize).min(src_h - 1);
        tensor[[src_y, src_x, c]] / 255.0
    }))
}

/// Turn raw model outputs into a face in frame tensor coordinates.
///
/// Output 0 holds `468 * 3` landmark values in model input pixels; output 1,
/// when present, holds the face presence logit.
fn decode_mesh(
    outputs: &[Vec<f32>],
    frame_width: f32,
    frame_height: f32,
) -> Result<Option<DetectionResult>, DetectionError> {
    let Some(mesh) = outputs.first() else {
        return Err(DetectionError::InvalidOutput("no outputs".to_string()));
    };
    if mesh.len() != MESH_LANDMARKS * 3 {
        return Err(DetectionError::InvalidOutput(format!(
            "expected {} landmark values, got {}",
            MESH_LANDMARKS * 3,
            mesh.len()
        )));
    }

    let score = match outputs.get(1).and_then(|flag| flag.first()) {
        Some(&logit) => sigmoid(logit),
        None => 1.0,
    };
    if !score.is_finite() {
        return Ok(None);
    }

    let sx = frame_width / MESH_INPUT as f32;
    let sy = frame_height / MESH_INPUT as f32;
    let landmarks: Vec<Landmark> = mesh
        .chunks_exact(3)
        .map(|p| Landmark {
            x: p[0] * sx,
            y: p[1] * sy,
            z: p[2] * sx,
            score: None,
        })
        .collect();

    let bounding_box = BoundingBox::enclosing(&landmarks);
    Ok(Some(DetectionResult::face(bounding_box, landmarks, score)))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Find the models directory
fn find_model_dir() -> Result<PathBuf, ModelError> {
    let mut candidates = Vec::new();

    // Next to the executable, then up to three levels above (cargo target dirs)
    if let Ok(exe_path) = std::env::current_exe() {
        let mut dir = exe_path.parent().map(Path::to_path_buf);
        for _ in 0..4 {
            let Some(current) = dir else { break };
            candidates.push(current.join("models"));
            dir = current.parent().map(Path::to_path_buf);
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("models"));
    }

    if let Some(data_dir) = dirs::data_dir() {
        candidates.push(data_dir.join("landmark-camera").join("models"));
    }

    candidates
        .into_iter()
        .find(|dir| dir.exists())
        .ok_or_else(|| ModelError::NotFound(PathBuf::from("models")))
}
