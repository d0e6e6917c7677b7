//! Test fixtures.

use crate::config::EyeballerConfig;
use crate::data::augmentation::AugmentationConfig;
use crate::models::eyeball::{EyeballModel, EyeballModelConfig};
use crate::models::resnet::ResNetConfig;
use burn::backend::NdArray;
use burn::module::Param;
use burn::prelude::{Backend, Tensor};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

pub type TestBackend = NdArray<f32>;

/// A backbone small enough for unit tests.
pub fn tiny_model_config() -> EyeballModelConfig {
    EyeballModelConfig::new()
        .with_backbone(ResNetConfig::new([1, 1, 1, 1]).with_width(8))
        .with_dense1(16)
        .with_dense2(8)
}

pub fn tiny_model<B: Backend>(
    num_labels: usize,
    device: &B::Device,
) -> EyeballModel<B> {
    tiny_model_config().init(num_labels, device)
}

/// Force every score to `sigmoid(bias)` regardless of input.
pub fn constant_output<B: Backend>(
    mut model: EyeballModel<B>,
    bias: f32,
) -> EyeballModel<B> {
    let device = model.output.weight.device();
    let [d_in, d_out] = model.output.weight.dims();
    model.output.weight = Param::from_tensor(Tensor::zeros([d_in, d_out], &device));
    model.output.bias = Some(Param::from_tensor(Tensor::full([d_out], bias, &device)));
    model
}

/// A run config over `root` with the tiny model at 32px.
pub fn tiny_run_config(root: &Path) -> EyeballerConfig {
    EyeballerConfig::new()
        .with_labels_file(root.join("labels.csv"))
        .with_image_dir(root.join("images"))
        .with_checkpoint_file(root.join("weights.mpk"))
        .with_graphs_dir(root.join("graphs"))
        .with_heatmap_dir(root.join("heatmaps"))
        .with_image_size(32)
        .with_predict_batch_size(3)
        .with_pretrained_backbone(None)
        .with_model(tiny_model_config())
        .with_augmentation(AugmentationConfig::new())
}

/// A distinct deterministic test pattern.
pub fn pattern(
    seed: u32,
    size: u32,
) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        Rgb([
            ((x * 13 + seed * 31) % 256) as u8,
            ((y * 7 + seed * 17) % 256) as u8,
            ((x * y + seed * 5) % 256) as u8,
        ])
    })
}

pub fn write_png(
    path: &Path,
    image: &RgbImage,
) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image.save(path).unwrap();
}

/// Write a labelled dataset: `rows` are `(filename, evaluation, labels)`.
///
/// Returns the image directory.
pub fn write_dataset(
    root: &Path,
    label_set: &[String],
    rows: &[(&str, bool, Vec<bool>)],
) -> PathBuf {
    let image_dir = root.join("images");
    std::fs::create_dir_all(&image_dir).unwrap();

    let mut csv = format!("filename,{},evaluation\n", label_set.join(","));
    for (idx, (name, evaluation, labels)) in rows.iter().enumerate() {
        let cells: Vec<&str> = labels
            .iter()
            .map(|&l| if l { "True" } else { "False" })
            .collect();
        csv.push_str(&format!(
            "{name},{},{}\n",
            cells.join(","),
            if *evaluation { "True" } else { "False" }
        ));
        write_png(&image_dir.join(name), &pattern(idx as u32, 40));
    }
    std::fs::write(root.join("labels.csv"), csv).unwrap();
    image_dir
}
