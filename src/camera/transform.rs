//! Coordinate spaces and the texture -> model resize transform
//!
//! Camera textures come in platform-specific sizes. Every frame is cropped and
//! resized into the fixed model input space, and the same transform maps
//! detections back onto the camera texture.

use serde::{Deserialize, Serialize};

/// Width x height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Resolution the detector input tensor is resized to.
pub const MODEL_INPUT_SIZE: Size = Size::new(152, 200);

/// Platform the app runs on. Decides the camera texture size and whether the
/// front camera preview is mirrored relative to the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Desktop,
}

impl Platform {
    /// Platform of the current build target.
    pub fn current() -> Self {
        if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else {
            Platform::Desktop
        }
    }

    /// Horizontal scale applied to the overlay: `1.0` keeps x as-is, `-1.0` flips.
    pub fn mirror_factor(&self) -> f32 {
        match self {
            Platform::Ios => 1.0,
            _ => -1.0,
        }
    }

    /// Camera texture size the capture layer delivers on this platform.
    pub fn texture_size(&self) -> Size {
        match self {
            Platform::Ios => Size::new(1080, 1920),
            _ => Size::new(1600, 1200),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

/// How the camera texture is fitted into the model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Resize the whole texture, ignoring aspect ratio
    #[default]
    Stretch,
    /// Crop the texture to the model aspect ratio around its centre, then resize
    CenterCrop,
}

/// Axis-aligned region in texture pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// The two fixed spaces a frame passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateSpace {
    /// Physical camera texture
    pub texture: Size,
    /// Detector input tensor
    pub model: Size,
}

impl CoordinateSpace {
    pub fn new(texture: Size, model: Size) -> Self {
        Self { texture, model }
    }

    /// Texture space for `platform`, model space fixed at [`MODEL_INPUT_SIZE`].
    pub fn for_platform(platform: Platform) -> Self {
        Self::new(platform.texture_size(), MODEL_INPUT_SIZE)
    }

    pub fn transform(&self, mode: ResizeMode) -> ResizeTransform {
        ResizeTransform::new(self.texture, self.model, mode)
    }
}

/// Deterministic crop + scale from texture space into model space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeTransform {
    crop: CropRegion,
    scale_x: f32,
    scale_y: f32,
    model: Size,
}

impl ResizeTransform {
    pub fn new(texture: Size, model: Size, mode: ResizeMode) -> Self {
        let tw = texture.width.max(1) as f32;
        let th = texture.height.max(1) as f32;
        let mw = model.width.max(1) as f32;
        let mh = model.height.max(1) as f32;

        let crop = match mode {
            ResizeMode::Stretch => CropRegion {
                x: 0.0,
                y: 0.0,
                width: tw,
                height: th,
            },
            ResizeMode::CenterCrop => {
                let model_aspect = mw / mh;
                if tw / th > model_aspect {
                    let width = th * model_aspect;
                    CropRegion {
                        x: (tw - width) / 2.0,
                        y: 0.0,
                        width,
                        height: th,
                    }
                } else {
                    let height = tw / model_aspect;
                    CropRegion {
                        x: 0.0,
                        y: (th - height) / 2.0,
                        width: tw,
                        height,
                    }
                }
            }
        };

        Self {
            crop,
            scale_x: mw / crop.width,
            scale_y: mh / crop.height,
            model,
        }
    }

    /// Region of the texture that ends up in the model input.
    pub fn crop(&self) -> CropRegion {
        self.crop
    }

    /// Crop region rounded to whole pixels: (x, y, width, height).
    pub fn crop_pixels(&self) -> (u32, u32, u32, u32) {
        (
            self.crop.x.round() as u32,
            self.crop.y.round() as u32,
            (self.crop.width.round() as u32).max(1),
            (self.crop.height.round() as u32).max(1),
        )
    }

    pub fn model_size(&self) -> Size {
        self.model
    }

    /// Map a texture pixel position into model space.
    pub fn to_model(&self, point: [f32; 2]) -> [f32; 2] {
        [
            (point[0] - self.crop.x) * self.scale_x,
            (point[1] - self.crop.y) * self.scale_y,
        ]
    }

    /// Map a model-space position (e.g. a detected landmark) back onto the texture.
    pub fn to_texture(&self, point: [f32; 2]) -> [f32; 2] {
        [
            point[0] / self.scale_x + self.crop.x,
            point[1] / self.scale_y + self.crop.y,
        ]
    }
}
