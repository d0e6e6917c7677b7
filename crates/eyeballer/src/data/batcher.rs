//! # Screenshot Batching

use crate::data::preprocess::NormalizedImage;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::TensorData;

/// One prepared training or evaluation sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotItem {
    /// The normalized image.
    pub image: NormalizedImage,

    /// Ground truth, `0` / `1` per label.
    pub targets: Vec<i64>,
}

impl ScreenshotItem {
    /// Build from a normalized image and boolean labels.
    pub fn new(
        image: NormalizedImage,
        labels: &[bool],
    ) -> Self {
        Self {
            image,
            targets: labels.iter().map(|&l| l as i64).collect(),
        }
    }
}

/// A batch of samples.
#[derive(Debug, Clone)]
pub struct ScreenshotBatch<B: Backend> {
    /// `[batch, 3, size, size]` normalized images.
    pub images: Tensor<B, 4>,

    /// `[batch, num_labels]` 0/1 targets.
    pub targets: Tensor<B, 2, Int>,
}

/// Stacks [`ScreenshotItem`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenshotBatcher {
    /// Square image side.
    pub image_size: usize,

    /// Number of labels.
    pub num_labels: usize,
}

impl ScreenshotBatcher {
    /// New batcher.
    pub fn new(
        image_size: usize,
        num_labels: usize,
    ) -> Self {
        Self {
            image_size,
            num_labels,
        }
    }
}

/// Stack normalized images into a `[batch, 3, size, size]` tensor.
pub fn stack_images<'a, B: Backend, I>(
    images: I,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4>
where
    I: IntoIterator<Item = &'a NormalizedImage>,
{
    let mut data = Vec::new();
    let mut n = 0;
    for image in images {
        debug_assert_eq!(image.size, image_size);
        data.extend_from_slice(&image.data);
        n += 1;
    }
    Tensor::from_data(
        TensorData::new(data, [n, 3, image_size, image_size]),
        device,
    )
}

impl<B: Backend> Batcher<B, ScreenshotItem, ScreenshotBatch<B>> for ScreenshotBatcher {
    fn batch(
        &self,
        items: Vec<ScreenshotItem>,
        device: &B::Device,
    ) -> ScreenshotBatch<B> {
        let batch_size = items.len();
        let images = stack_images::<B, _>(items.iter().map(|i| &i.image), self.image_size, device);

        let targets: Vec<i64> = items.iter().flat_map(|i| i.targets.clone()).collect();
        let targets = Tensor::from_data(
            TensorData::new(targets, [batch_size, self.num_labels]),
            device,
        );

        ScreenshotBatch { images, targets }
    }
}
