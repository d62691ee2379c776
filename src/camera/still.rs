//! Frame source serving a single decoded image

use std::path::Path;

use image::RgbaImage;

use super::frame::{FrameConverter, FrameHandle, FrameSource};
use super::transform::{ResizeMode, ResizeTransform, Size};
use crate::error::CameraError;

/// Serves the same image on every pull. Useful without a camera.
pub struct StillImageSource {
    image: RgbaImage,
    converter: FrameConverter,
}

impl StillImageSource {
    pub fn open(path: &Path, model: Size, mode: ResizeMode) -> Result<Self, CameraError> {
        let image = image::open(path)?.to_rgba8();
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "Loaded still image"
        );
        Ok(Self::from_image(image, model, mode))
    }

    pub fn from_image(image: RgbaImage, model: Size, mode: ResizeMode) -> Self {
        let texture = Size::new(image.width(), image.height());
        let converter = FrameConverter::new(ResizeTransform::new(texture, model, mode));
        Self { image, converter }
    }

    /// Mapping between this image and the model input
    pub fn transform(&self) -> &ResizeTransform {
        self.converter.transform()
    }

    pub fn texture_size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Option<FrameHandle> {
        Some(self.converter.convert(&self.image))
    }

    fn release(&mut self, frame: FrameHandle) {
        self.converter.recycle(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MODEL_INPUT_SIZE;
    use image::Rgba;

    #[test]
    fn test_serves_model_sized_frames_with_fresh_ids() {
        let image = RgbaImage::from_pixel(320, 240, Rgba([10, 20, 30, 255]));
        let mut source = StillImageSource::from_image(image, MODEL_INPUT_SIZE, ResizeMode::CenterCrop);
        assert_eq!(source.texture_size(), Size::new(320, 240));

        let first = source.next_frame().unwrap();
        assert_eq!((first.width(), first.height()), (152, 200));
        assert_eq!(first.tensor()[[100, 76, 2]], 30.0);
        let first_id = first.id();
        source.release(first);

        let second = source.next_frame().unwrap();
        assert_ne!(second.id(), first_id);
        source.release(second);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = StillImageSource::open(Path::new("does/not/exist.png"), MODEL_INPUT_SIZE, ResizeMode::Stretch);
        assert!(matches!(result, Err(CameraError::Image(_))));
    }
}
