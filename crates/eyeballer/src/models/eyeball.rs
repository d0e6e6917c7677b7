//! # Screenshot Classifier
//!
//! ```text
//! ResNet features
//!   -> global average pool
//!   -> dense(256, relu) -> dropout(0.5)
//!   -> dense(128, relu, L2) -> dropout(0.2)
//!   -> dense(num_labels)
//! ```
//!
//! [`EyeballModel::forward`] returns per-label logits;
//! [`EyeballModel::forward_scores`] applies the sigmoid. Labels are
//! independent, so the loss is binary cross-entropy averaged over every
//! (sample, label) pair, plus an L2 penalty on the 128-wide layer.

use crate::cache::disk::DiskCacheConfig;
use crate::config::EyeballerConfig;
use crate::errors::{EyeballError, Result};
use crate::models::resnet::pretrained::{load_pretrained, resolve_pretrained};
use crate::models::resnet::{ResNet, ResNetConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Int, Tensor};
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::activation::sigmoid;
use std::io::Write;
use std::path::Path;

/// [`EyeballModel`] Config.
#[derive(Config, Debug)]
pub struct EyeballModelConfig {
    /// Feature extractor.
    #[config(default = "ResNetConfig::resnet18()")]
    pub backbone: ResNetConfig,

    /// Width of the first dense layer.
    #[config(default = 256)]
    pub dense1: usize,

    /// Width of the second dense layer.
    #[config(default = 128)]
    pub dense2: usize,

    /// Dropout after the first dense layer.
    #[config(default = 0.5)]
    pub dropout1: f64,

    /// Dropout after the second dense layer.
    #[config(default = 0.2)]
    pub dropout2: f64,

    /// L2 coefficient on the second dense layer's weights.
    #[config(default = 0.01)]
    pub l2_penalty: f64,
}

impl EyeballModelConfig {
    /// Reject architectures that cannot be built.
    pub fn validate(&self) -> Result<()> {
        self.backbone.validate()?;
        if self.dense1 == 0 || self.dense2 == 0 {
            return Err(EyeballError::InvalidConfig(format!(
                "dense widths ({}, {}) must be positive",
                self.dense1, self.dense2
            )));
        }
        for (name, p) in [("dropout1", self.dropout1), ("dropout2", self.dropout2)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EyeballError::InvalidConfig(format!(
                    "{name} ({p}) must be in [0, 1]"
                )));
            }
        }
        if self.l2_penalty < 0.0 {
            return Err(EyeballError::InvalidConfig(format!(
                "l2_penalty ({}) must be non-negative",
                self.l2_penalty
            )));
        }
        Ok(())
    }

    /// Initialize a randomly-weighted [`EyeballModel`].
    pub fn init<B: Backend>(
        &self,
        num_labels: usize,
        device: &B::Device,
    ) -> EyeballModel<B> {
        let features = self.backbone.out_planes();
        EyeballModel {
            backbone: self.backbone.init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense1: LinearConfig::new(features, self.dense1).init(device),
            dropout1: DropoutConfig::new(self.dropout1).init(),
            dense2: LinearConfig::new(self.dense1, self.dense2).init(device),
            dropout2: DropoutConfig::new(self.dropout2).init(),
            output: LinearConfig::new(self.dense2, num_labels).init(device),
            relu: Relu::new(),
            l2_penalty: self.l2_penalty,
            num_labels,
        }
    }
}

/// The screenshot classifier.
#[derive(Module, Debug)]
pub struct EyeballModel<B: Backend> {
    /// Feature extractor.
    pub backbone: ResNet<B>,

    /// Global average pooling.
    pub pool: AdaptiveAvgPool2d,

    /// Dense 256.
    pub dense1: Linear<B>,

    /// Dropout 0.5.
    pub dropout1: Dropout,

    /// Dense 128, L2-regularized.
    pub dense2: Linear<B>,

    /// Dropout 0.2.
    pub dropout2: Dropout,

    /// One logit per label.
    pub output: Linear<B>,

    /// Dense activation.
    pub relu: Relu,

    /// L2 coefficient on `dense2`.
    pub l2_penalty: f64,

    /// Output width.
    pub num_labels: usize,
}

impl<B: Backend> EyeballModel<B> {
    /// Build the model a run configuration describes.
    ///
    /// * With `weights_file` set, those weights are loaded.
    /// * Otherwise the backbone gets `pretrained_backbone` (if any) and the
    ///   head stays random; a warning says so.
    pub fn from_config(
        config: &EyeballerConfig,
        disk_cache: &DiskCacheConfig,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let mut model = config.model.init::<B>(config.num_labels(), device);

        match &config.weights_file {
            Some(path) => {
                model = model.load_weights(path)?;
                tracing::info!(path = %path.display(), "loaded weights");
            }
            None => {
                if let Some(name) = &config.pretrained_backbone {
                    let descriptor = resolve_pretrained(name, &config.model.backbone)?;
                    model.backbone = load_pretrained(model.backbone, &descriptor, disk_cache)?;
                }
                tracing::warn!(
                    "no weights file set; the classifier head is randomly initialized"
                );
            }
        }

        if config.freeze_backbone {
            model = model.freeze_backbone();
        }
        Ok(model)
    }

    /// Exclude the backbone parameters from gradient updates.
    pub fn freeze_backbone(self) -> Self {
        Self {
            backbone: self.backbone.no_grad(),
            ..self
        }
    }

    /// Log the parameter count.
    pub fn summary(&self) {
        tracing::info!(
            params = self.num_params(),
            backbone_params = self.backbone.num_params(),
            labels = self.num_labels,
            "model summary"
        );
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `images`: ``[batch, 3, height, width]`` normalized images.
    ///
    /// # Returns
    ///
    /// ``[batch, num_labels]`` logits.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "channels", "height", "width"];
        let [batch] = INPUT_CONTRACT.unpack_shape(&images, &["batch"], &[("channels", 3)]);

        let x = self.backbone.forward(images);
        let x = self.pool.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);

        let x = self.relu.forward(self.dense1.forward(x));
        let x = self.dropout1.forward(x);
        let x = self.relu.forward(self.dense2.forward(x));
        let x = self.dropout2.forward(x);
        let logits = self.output.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract = shape_contract!["batch", "labels"];
            OUTPUT_CONTRACT.assert_shape(
                &logits,
                &[("batch", batch), ("labels", self.num_labels)],
            );
        });

        logits
    }

    /// Per-label probabilities in `[0, 1]`.
    pub fn forward_scores(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        sigmoid(self.forward(images))
    }

    /// Binary cross-entropy over all labels plus the L2 penalty.
    pub fn loss(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 2, Int>,
    ) -> Tensor<B, 1> {
        let bce = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&logits.device())
            .forward(logits, targets);

        bce + self.l2_term()
    }

    /// ``l2_penalty * ||dense2.weight||^2``.
    pub fn l2_term(&self) -> Tensor<B, 1> {
        self.dense2
            .weight
            .val()
            .powf_scalar(2.0)
            .sum()
            .mul_scalar(self.l2_penalty)
    }

    /// Write the weights to `path`, replacing any existing file.
    ///
    /// The file is written beside `path` and renamed into place.
    pub fn save_weights<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<()> {
        let path = path.as_ref();
        let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = Recorder::<B>::record(&recorder, self.clone().into_record(), ())
            .map_err(|e| weights_error(path, e.to_string()))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| EyeballError::Io(e.error))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "saved weights");
        Ok(())
    }

    /// Replace the weights with those stored at `path`.
    ///
    /// # Errors
    ///
    /// [`EyeballError::WeightsFile`] if the file is unreadable, corrupt, or
    /// was saved for a different architecture or label count.
    pub fn load_weights<P: AsRef<Path>>(
        self,
        path: P,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| weights_error(path, e.to_string()))?;

        let device = self
            .devices()
            .into_iter()
            .next()
            .ok_or_else(|| weights_error(path, "model has no device".to_string()))?;
        let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, bytes, &device)
            .map_err(|e| weights_error(path, e.to_string()))?;

        let expected_params = self.num_params();
        let num_labels = self.num_labels;
        let model = self.load_record(record);

        let stored_labels = model.output.weight.dims()[1];
        if stored_labels != num_labels {
            return Err(weights_error(
                path,
                format!("weights are for {stored_labels} labels, config has {num_labels}"),
            ));
        }
        if model.num_params() != expected_params {
            return Err(weights_error(
                path,
                format!(
                    "weights have {} parameters, model has {expected_params}",
                    model.num_params()
                ),
            ));
        }
        Ok(model)
    }
}

fn weights_error(
    path: &Path,
    reason: String,
) -> EyeballError {
    EyeballError::WeightsFile {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestBackend, tiny_model, tiny_model_config};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model: EyeballModel<TestBackend> = tiny_model(4, &device);

        let images = Tensor::ones([3, 3, 32, 32], &device);
        let logits = model.forward(images.clone());
        assert_eq!(logits.dims(), [3, 4]);

        let scores: Vec<f32> = model.forward_scores(images).into_data().iter::<f32>().collect();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_loss_includes_l2() {
        let device = Default::default();
        let model: EyeballModel<TestBackend> = tiny_model(2, &device);

        let logits = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let targets =
            Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![1i64, 0, 0, 1], [2, 2]), &device);

        let loss: f32 = model.loss(logits, targets).into_scalar();
        let l2: f32 = model.l2_term().into_scalar();
        assert!(l2 > 0.0);
        // BCE of a zero logit is ln(2).
        assert!((loss - (std::f32::consts::LN_2 + l2)).abs() < 1e-4);
    }

    #[test]
    fn test_save_load_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weights.mpk");
        let device = Default::default();

        let model: EyeballModel<TestBackend> = tiny_model(4, &device);
        model.save_weights(&path).unwrap();
        // Overwrite is allowed.
        model.save_weights(&path).unwrap();

        let fresh: EyeballModel<TestBackend> = tiny_model(4, &device);
        let loaded = fresh.load_weights(&path).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        model
            .forward_scores(input.clone())
            .into_data()
            .assert_eq(&loaded.forward_scores(input).into_data(), true);
    }

    #[test]
    fn test_load_weights_errors() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();

        let missing = tiny_model::<TestBackend>(4, &device)
            .load_weights(dir.path().join("missing.mpk"))
            .unwrap_err();
        assert!(matches!(missing, EyeballError::WeightsFile { .. }));

        let corrupt_path = dir.path().join("corrupt.mpk");
        std::fs::write(&corrupt_path, b"not a weights file").unwrap();
        let corrupt = tiny_model::<TestBackend>(4, &device)
            .load_weights(&corrupt_path)
            .unwrap_err();
        assert!(matches!(corrupt, EyeballError::WeightsFile { .. }));

        let three_path = dir.path().join("three.mpk");
        tiny_model::<TestBackend>(3, &device)
            .save_weights(&three_path)
            .unwrap();
        let mismatch = tiny_model::<TestBackend>(4, &device)
            .load_weights(&three_path)
            .unwrap_err();
        assert!(mismatch.to_string().contains("3 labels"));
    }

    #[test]
    fn test_freeze_backbone() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let model: EyeballModel<B> = tiny_model_config().init(2, &device).freeze_backbone();

        assert!(!model.backbone.stem.conv.weight.is_require_grad());
        assert!(model.dense1.weight.is_require_grad());
    }

    #[test]
    fn test_from_config_without_weights() {
        let device = Default::default();
        let config = EyeballerConfig::new()
            .with_image_size(32)
            .with_pretrained_backbone(None)
            .with_model(tiny_model_config());

        let model: EyeballModel<TestBackend> =
            EyeballModel::from_config(&config, &DiskCacheConfig::default(), &device).unwrap();
        assert_eq!(model.num_labels, 4);

        let bad = config.with_weights_file(Some("/nonexistent/weights.mpk".into()));
        let err = EyeballModel::<TestBackend>::from_config(&bad, &DiskCacheConfig::default(), &device)
            .unwrap_err();
        assert!(matches!(err, EyeballError::WeightsFile { .. }));
    }
}
