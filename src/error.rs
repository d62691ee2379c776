//! Error types for camera, model, detection, config and lifecycle failures.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a single detection call.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Frame tensor has unexpected shape {0:?}")]
    InvalidInput(Vec<usize>),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Failed to decode model output: {0}")]
    InvalidOutput(String),
}

/// Errors that can occur while loading a detector.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not found: {0}")]
    NotFound(PathBuf),
    #[error("ONNX Runtime error: {0}")]
    Runtime(String),
    #[error("Model loading task failed: {0}")]
    Task(String),
}

/// Errors from opening the camera.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("No camera available")]
    NoDevice,
    #[error("Failed to open camera: {0}")]
    Open(String),
    #[error("Failed to load still image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Built without camera support (enable the `camera` feature)")]
    Unsupported,
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by the lifecycle hooks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Inference loop is already mounted")]
    AlreadyMounted,
}
