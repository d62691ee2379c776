//! Frame handles and the pull-based frame source contract
//!
//! A [`FrameSource`] hands out one [`FrameHandle`] per pull. The consumer owns
//! the handle until it gives it back with [`FrameSource::release`]; tensor
//! buffers are recycled through a [`TensorPool`] so an unreleased handle shows
//! up as an outstanding buffer.

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::{Array3, ArrayView3};

use super::transform::{ResizeTransform, Size};

/// One camera frame converted to an `height x width x 3` tensor.
///
/// Not `Clone`: exactly one owner at a time.
#[derive(Debug)]
pub struct FrameHandle {
    id: u64,
    tensor: Array3<f32>,
    captured_at: Instant,
}

impl FrameHandle {
    pub fn new(id: u64, tensor: Array3<f32>) -> Self {
        Self {
            id,
            tensor,
            captured_at: Instant::now(),
        }
    }

    /// Sequential id assigned by the source
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tensor(&self) -> ArrayView3<'_, f32> {
        self.tensor.view()
    }

    pub fn width(&self) -> usize {
        self.tensor.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.tensor.shape()[0]
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Give up the handle and take back its buffer.
    pub fn into_tensor(self) -> Array3<f32> {
        self.tensor
    }
}

/// Lazily pulled, non-restartable sequence of camera frames.
pub trait FrameSource: Send {
    /// Pull the next frame, or `None` when no new frame is available yet.
    fn next_frame(&mut self) -> Option<FrameHandle>;

    /// Return a frame obtained from [`FrameSource::next_frame`].
    fn release(&mut self, frame: FrameHandle);
}

/// Recycles tensor buffers of a fixed shape and tracks how many are handed out.
#[derive(Debug)]
pub struct TensorPool {
    shape: (usize, usize, usize),
    free: Vec<Array3<f32>>,
    outstanding: usize,
    capacity: usize,
}

impl TensorPool {
    pub fn new(size: Size, capacity: usize) -> Self {
        Self {
            shape: (size.height as usize, size.width as usize, 3),
            free: Vec::with_capacity(capacity),
            outstanding: 0,
            capacity,
        }
    }

    /// Take a buffer from the pool, allocating when the pool is empty.
    pub fn acquire(&mut self) -> Array3<f32> {
        self.outstanding += 1;
        self.free
            .pop()
            .unwrap_or_else(|| Array3::zeros(self.shape))
    }

    /// Put a buffer back. Buffers of the wrong shape or beyond capacity are dropped.
    pub fn recycle(&mut self, tensor: Array3<f32>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if tensor.dim() == self.shape && self.free.len() < self.capacity {
            self.free.push(tensor);
        }
    }

    /// Buffers handed out and not yet recycled
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// Crops and resizes RGBA camera images into model-sized tensors.
pub struct FrameConverter {
    transform: ResizeTransform,
    pool: TensorPool,
    next_id: u64,
}

impl FrameConverter {
    pub fn new(transform: ResizeTransform) -> Self {
        Self {
            pool: TensorPool::new(transform.model_size(), 3),
            transform,
            next_id: 1,
        }
    }

    pub fn transform(&self) -> &ResizeTransform {
        &self.transform
    }

    /// Replace the transform, e.g. when the camera delivers a different texture size.
    pub fn set_transform(&mut self, transform: ResizeTransform) {
        if transform.model_size() != self.transform.model_size() {
            self.pool = TensorPool::new(transform.model_size(), 3);
        }
        self.transform = transform;
    }

    /// Convert an image into a new frame handle. Pixel values stay in `0..=255`.
    pub fn convert(&mut self, image: &RgbaImage) -> FrameHandle {
        let (x, y, width, height) = self.transform.crop_pixels();
        let width = width.min(image.width().saturating_sub(x)).max(1);
        let height = height.min(image.height().saturating_sub(y)).max(1);
        let model = self.transform.model_size();

        let cropped = imageops::crop_imm(image, x, y, width, height).to_image();
        let resized = imageops::resize(&cropped, model.width, model.height, FilterType::Triangle);

        let mut tensor = self.pool.acquire();
        for (px, py, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[py as usize, px as usize, c]] = pixel[c] as f32;
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        FrameHandle::new(id, tensor)
    }

    /// Take back a frame produced by [`FrameConverter::convert`].
    pub fn recycle(&mut self, frame: FrameHandle) {
        self.pool.recycle(frame.into_tensor());
    }

    /// Frames converted and not yet recycled
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::transform::{ResizeMode, MODEL_INPUT_SIZE};
    use image::Rgba;

    #[test]
    fn test_tensor_pool_recycles() {
        let mut pool = TensorPool::new(Size::new(4, 2), 2);
        let a = pool.acquire();
        assert_eq!(a.dim(), (2, 4, 3));
        assert_eq!(pool.outstanding(), 1);
        pool.recycle(a);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 1);

        let _b = pool.acquire();
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_tensor_pool_drops_wrong_shape() {
        let mut pool = TensorPool::new(Size::new(4, 2), 2);
        let _ = pool.acquire();
        pool.recycle(Array3::zeros((1, 1, 3)));
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_convert_produces_model_sized_tensor() {
        let transform = ResizeTransform::new(Size::new(64, 48), MODEL_INPUT_SIZE, ResizeMode::Stretch);
        let mut converter = FrameConverter::new(transform);
        let image = RgbaImage::from_pixel(64, 48, Rgba([200, 100, 50, 255]));

        let frame = converter.convert(&image);
        assert_eq!(frame.id(), 1);
        assert_eq!(frame.width(), 152);
        assert_eq!(frame.height(), 200);
        let tensor = frame.tensor();
        assert!((tensor[[10, 10, 0]] - 200.0).abs() < 1.0);
        assert!((tensor[[10, 10, 1]] - 100.0).abs() < 1.0);
        assert!((tensor[[10, 10, 2]] - 50.0).abs() < 1.0);
        assert_eq!(converter.outstanding(), 1);

        converter.recycle(frame);
        assert_eq!(converter.outstanding(), 0);
        assert_eq!(converter.convert(&image).id(), 2);
    }

    #[test]
    fn test_convert_center_crop_uses_middle() {
        // Left and right thirds are black, middle is white
        let mut image = RgbaImage::from_pixel(300, 100, Rgba([0, 0, 0, 255]));
        for y in 0..100 {
            for x in 100..200 {
                image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let transform = ResizeTransform::new(Size::new(300, 100), Size::new(10, 10), ResizeMode::CenterCrop);
        let mut converter = FrameConverter::new(transform);
        let frame = converter.convert(&image);
        assert!(frame.tensor()[[5, 5, 0]] > 250.0);
    }
}
