//! Application configuration
//!
//! JSON file with every field defaulted, so a partial (or missing) file
//! gives a working setup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::camera::{CoordinateSpace, Platform, ResizeMode, Size, MODEL_INPUT_SIZE};
use crate::error::ConfigError;
use crate::ml::DetectorConfig;
use crate::overlay::OverlayStyle;
use crate::telemetry::LogConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "LANDMARK_CONFIG";

/// Highest accepted frame tick rate
pub const MAX_TARGET_FPS: u32 = 1000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Target platform; decides texture size and overlay mirroring
    pub platform: Platform,
    pub camera: CameraConfig,
    pub inference: InferenceConfig,
    pub detector: DetectorConfig,
    pub overlay: OverlayConfig,
    pub logging: LogConfig,
}

/// Frame source settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera device index
    pub index: u32,
    /// Overrides the platform's camera texture size
    pub texture_size: Option<Size>,
    pub resize_mode: ResizeMode,
    /// Serve this image instead of opening a camera
    pub still_image: Option<PathBuf>,
}

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Frame ticks per second
    pub target_fps: u32,
    /// When false the loop drives preview updates and frame presentation
    pub autorender: bool,
    /// Model input tensor size
    pub input_size: Size,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            autorender: true,
            input_size: MODEL_INPUT_SIZE,
        }
    }
}

/// Overlay drawing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    #[serde(flatten)]
    pub style: OverlayStyle,
    /// Size of the display area the overlay is fitted into
    pub viewport: Size,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            style: OverlayStyle::default(),
            viewport: Size::new(300, 400),
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(io_error)
    }

    /// Config file to use: explicit argument, then `LANDMARK_CONFIG`, then the
    /// user config directory if a file exists there.
    pub fn resolve_path(arg: Option<PathBuf>) -> Option<PathBuf> {
        arg.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| Self::default_path().filter(|p| p.exists()))
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("landmark-camera");
            p.push("config.json");
            p
        })
    }

    /// Load the resolved config file, or defaults when there is none.
    pub fn load_or_default(arg: Option<PathBuf>) -> Result<Self, ConfigError> {
        match Self::resolve_path(arg) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.inference.target_fps == 0 || self.inference.target_fps > MAX_TARGET_FPS {
            return invalid("inference.target_fps must be within 1..=1000");
        }
        if self.inference.input_size.is_empty() {
            return invalid("inference.input_size must be non-zero");
        }
        if self.camera.texture_size.is_some_and(|s| s.is_empty()) {
            return invalid("camera.texture_size must be non-zero");
        }
        if self.overlay.viewport.is_empty() {
            return invalid("overlay.viewport must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.overlay.style.min_score) {
            return invalid("overlay.min_score must be within [0, 1]");
        }
        if self.detector.max_faces == 0 {
            return invalid("detector.max_faces must be at least 1");
        }
        Ok(())
    }

    /// Texture and model spaces for the configured platform.
    pub fn coordinate_space(&self) -> CoordinateSpace {
        CoordinateSpace::new(
            self.camera.texture_size.unwrap_or_else(|| self.platform.texture_size()),
            self.inference.input_size,
        )
    }
}
