//! # Backbone Input Preprocessing
//!
//! Every path into the network (training, validation, prediction,
//! evaluation and heatmaps) goes through [`Preprocessor::normalize`]:
//!
//! 1. scale intensities to `[0, 1]`,
//! 2. subtract the ImageNet channel means and divide by the channel stds,
//! 3. subtract the per-sample mean.
//!
//! The output is channel-major (`[3, size, size]`).

use crate::errors::{EyeballError, Result};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use image::RgbImage;
use image::imageops::FilterType;
use std::path::Path;

/// ImageNet channel means.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A normalized, channel-major image ready for batching.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    /// Square side length.
    pub size: usize,

    /// `3 * size * size` values, channel-major.
    pub data: Vec<f32>,
}

impl NormalizedImage {
    /// Convert to a `[1, 3, size, size]` tensor.
    pub fn to_tensor<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [1, 3, self.size, self.size]),
            device,
        )
    }
}

/// Decode an image file to RGB.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|source| EyeballError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Deterministic resize-and-normalize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    /// Square model input resolution.
    pub image_size: usize,
}

impl Preprocessor {
    /// New preprocessor for a given resolution.
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    /// Resize to the model resolution; a no-op if already that size.
    pub fn resize(
        &self,
        image: &RgbImage,
    ) -> RgbImage {
        let side = self.image_size as u32;
        if image.dimensions() == (side, side) {
            return image.clone();
        }
        image::imageops::resize(image, side, side, FilterType::Triangle)
    }

    /// Normalize an image already at the model resolution.
    pub fn normalize(
        &self,
        image: &RgbImage,
    ) -> NormalizedImage {
        let (w, h) = image.dimensions();
        debug_assert_eq!((w as usize, h as usize), (self.image_size, self.image_size));

        let plane = (w * h) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                data[c * plane + i] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        let mean = data.iter().sum::<f32>() / data.len() as f32;
        data.iter_mut().for_each(|v| *v -= mean);

        NormalizedImage {
            size: self.image_size,
            data,
        }
    }

    /// Resize then normalize.
    pub fn prepare(
        &self,
        image: &RgbImage,
    ) -> NormalizedImage {
        self.normalize(&self.resize(image))
    }

    /// Decode, resize and normalize a file.
    pub fn prepare_file<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<NormalizedImage> {
        Ok(self.prepare(&load_image(path)?))
    }
}
