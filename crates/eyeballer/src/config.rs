//! # Run Configuration
//!
//! [`EyeballerConfig`] names every path and hyperparameter used by the
//! training, prediction, evaluation and heatmap entry points. It is passed
//! explicitly; nothing is read from ambient process state.

use crate::data::augmentation::AugmentationConfig;
use crate::errors::{EyeballError, Result};
use crate::heatmap::HeatmapConfig;
use crate::models::eyeball::EyeballModelConfig;
use burn::config::Config;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// The default label set, in model output order.
pub const DEFAULT_LABELS: [&str; 4] = ["custom404", "login", "webapp", "oldlooking"];

/// The default label set as owned strings.
pub fn default_label_set() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

/// Top-level configuration.
#[derive(Config, Debug)]
pub struct EyeballerConfig {
    /// The label table.
    #[config(default = "PathBuf::from(\"labels.csv\")")]
    pub labels_file: PathBuf,

    /// Directory containing the labelled screenshots.
    #[config(default = "PathBuf::from(\"images\")")]
    pub image_dir: PathBuf,

    /// Weights to load at construction; `None` means random initialization.
    #[config(default = "None")]
    pub weights_file: Option<PathBuf>,

    /// Best-so-far training snapshot.
    #[config(default = "PathBuf::from(\"weights.mpk\")")]
    pub checkpoint_file: PathBuf,

    /// Output directory for charts and histograms.
    #[config(default = "PathBuf::from(\"graphs\")")]
    pub graphs_dir: PathBuf,

    /// Output directory for heatmap overlays.
    #[config(default = "PathBuf::from(\"heatmaps\")")]
    pub heatmap_dir: PathBuf,

    /// Ordered label names; position `k` is model output `k`.
    #[config(default = "default_label_set()")]
    pub label_set: Vec<String>,

    /// Square model input resolution.
    #[config(default = 224)]
    pub image_size: usize,

    /// Fraction of the training partition held out for validation.
    #[config(default = 0.2)]
    pub validation_fraction: f64,

    /// Adam learning rate.
    #[config(default = 5e-4)]
    pub learning_rate: f64,

    /// Images per forward call during prediction and evaluation.
    #[config(default = 16)]
    pub predict_batch_size: usize,

    /// Pretrained backbone weights, as ``{prefab}.{weights}``.
    #[config(default = "Some(\"resnet18.tv_in1k\".to_string())")]
    pub pretrained_backbone: Option<String>,

    /// Exclude the backbone from gradient updates.
    #[config(default = false)]
    pub freeze_backbone: bool,

    /// Network architecture.
    #[config(default = "EyeballModelConfig::new()")]
    pub model: EyeballModelConfig,

    /// Training augmentation.
    #[config(default = "AugmentationConfig::new()")]
    pub augmentation: AugmentationConfig,

    /// Occlusion heatmaps.
    #[config(default = "HeatmapConfig::new()")]
    pub heatmap: HeatmapConfig,
}

impl Default for EyeballerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EyeballerConfig {
    /// Number of labels.
    pub fn num_labels(&self) -> usize {
        self.label_set.len()
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EyeballError::InvalidConfig(msg));

        if self.label_set.is_empty() {
            return invalid("label_set is empty".to_string());
        }
        let unique: BTreeSet<&String> = self.label_set.iter().collect();
        if unique.len() != self.label_set.len() {
            return invalid(format!("label_set has duplicates: {:?}", self.label_set));
        }
        if let Some(reserved) = self
            .label_set
            .iter()
            .find(|l| l.as_str() == "filename" || l.as_str() == "evaluation")
        {
            return invalid(format!("'{reserved}' is a reserved column name"));
        }
        if self.image_size == 0 || self.image_size % 32 != 0 {
            return invalid(format!(
                "image_size ({}) must be a positive multiple of 32",
                self.image_size
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return invalid(format!(
                "validation_fraction ({}) must be in [0, 1)",
                self.validation_fraction
            ));
        }
        if self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning_rate ({}) must be positive",
                self.learning_rate
            ));
        }
        if self.predict_batch_size == 0 {
            return invalid("predict_batch_size must be positive".to_string());
        }
        self.model.validate()?;
        self.augmentation.validate()?;
        self.heatmap.validate(self.image_size)?;
        Ok(())
    }

    /// Resolve an image file name from the label table.
    pub fn image_path(
        &self,
        filename: &str,
    ) -> PathBuf {
        self.image_dir.join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::ResNetConfig;

    #[test]
    fn test_defaults() {
        let config = EyeballerConfig::default();
        assert_eq!(config.labels_file, PathBuf::from("labels.csv"));
        assert_eq!(config.num_labels(), 4);
        assert_eq!(config.label_set[0], "custom404");
        assert_eq!(config.image_size, 224);
        assert!(config.weights_file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects() {
        let config = EyeballerConfig::new().with_image_size(100);
        assert!(matches!(
            config.validate(),
            Err(EyeballError::InvalidConfig(_))
        ));

        let config = EyeballerConfig::new().with_label_set(vec!["a".into(), "a".into()]);
        assert!(config.validate().is_err());

        let config = EyeballerConfig::new().with_label_set(vec!["evaluation".into()]);
        assert!(config.validate().is_err());

        let config = EyeballerConfig::new().with_validation_fraction(1.0);
        assert!(config.validate().is_err());

        let config = EyeballerConfig::new().with_model(
            EyeballModelConfig::new().with_backbone(ResNetConfig::new([0, 2, 2, 2])),
        );
        assert!(matches!(
            config.validate(),
            Err(EyeballError::InvalidConfig(_))
        ));

        let config =
            EyeballerConfig::new().with_model(EyeballModelConfig::new().with_dropout1(1.5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = EyeballerConfig::new()
            .with_image_size(64)
            .with_weights_file(Some(PathBuf::from("w.mpk")));
        config.save(&path).unwrap();

        let loaded = EyeballerConfig::load(&path).unwrap();
        assert_eq!(loaded.image_size, 64);
        assert_eq!(loaded.weights_file, Some(PathBuf::from("w.mpk")));
        assert_eq!(loaded.label_set, config.label_set);
    }
}
