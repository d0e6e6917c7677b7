//! # Training Loop
//!
//! [`Trainer::train`] wires the label store and the augmentation pipeline
//! into seeded, checkpointed training:
//!
//! 1. load the label table, shuffle the training partition with the run
//!    seed and split off the validation subset;
//! 2. each epoch, reorder the training subset with the epoch-order stream
//!    and consume `floor(train / batch_size)` augmented batches;
//! 3. score the (non-augmented) validation subset and checkpoint the
//!    weights whenever the validation loss improves;
//! 4. optionally write `accuracy.svg`, `loss.svg` and
//!    `label_histograms.svg` into `graphs_dir`.
//!
//! Unreadable training images are skipped with a warning and reported on
//! the returned [`TrainingHistory`].

use crate::cache::disk::DiskCacheConfig;
use crate::charts::{
    COLOR_PRIMARY, COLOR_SECONDARY, DataSeries, bucket_counts, histogram_panels, line_chart,
    write_svg,
};
use crate::config::EyeballerConfig;
use crate::data::augmentation::Augmenter;
use crate::data::batcher::{ScreenshotBatch, ScreenshotBatcher, ScreenshotItem};
use crate::data::labels::{LabelRecord, LabelStore};
use crate::data::preprocess::load_image;
use crate::errors::{EyeballError, Result, SkippedImage};
use crate::models::eyeball::EyeballModel;
use crate::rng::{SeedStream, StreamPurpose};
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::ElementConversion;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use image::RgbImage;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Number of buckets in the per-label score histograms.
pub const HISTOGRAM_BUCKETS: usize = 50;

/// Options for one training run.
#[derive(Config, Debug)]
pub struct TrainOptions {
    /// Passes over the training subset.
    #[config(default = 20)]
    pub epochs: usize,

    /// Samples per gradient step.
    #[config(default = 32)]
    pub batch_size: usize,

    /// Run seed; drawn from the OS (and logged) when unset.
    #[config(default = "None")]
    pub seed: Option<u64>,

    /// Write the diagnostic charts.
    #[config(default = false)]
    pub emit_graphs: bool,

    /// Where to write the final weights, in addition to the best-so-far
    /// checkpoint.
    #[config(default = "None")]
    pub final_weights_file: Option<PathBuf>,

    /// Log the model parameter count before training.
    #[config(default = false)]
    pub log_summary: bool,
}

/// Per-epoch statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,

    /// Mean training loss.
    pub train_loss: f64,

    /// Fraction of correct training label-instances at threshold 0.5.
    pub train_accuracy: f64,

    /// Mean validation loss, if there is a validation subset.
    pub valid_loss: Option<f64>,

    /// Validation binary accuracy, if there is a validation subset.
    pub valid_accuracy: Option<f64>,
}

impl EpochStats {
    /// The loss used to pick the best checkpoint.
    pub fn monitored_loss(&self) -> f64 {
        self.valid_loss.unwrap_or(self.train_loss)
    }
}

/// What a training run did.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingHistory {
    /// The resolved run seed.
    pub seed: u64,

    /// Size of the training subset.
    pub train_count: usize,

    /// Size of the validation subset.
    pub valid_count: usize,

    /// One entry per completed epoch.
    pub epochs: Vec<EpochStats>,

    /// 1-based epoch of the saved checkpoint.
    pub best_epoch: Option<usize>,

    /// Images that could not be read, each reported once.
    pub skipped_images: Vec<SkippedImage>,
}

impl TrainingHistory {
    /// Stats of the checkpointed epoch.
    pub fn best(&self) -> Option<&EpochStats> {
        let best = self.best_epoch?;
        self.epochs.iter().find(|e| e.epoch == best)
    }
}

/// A trained model and its history.
#[derive(Debug)]
pub struct TrainingRun<B: AutodiffBackend> {
    /// The model after the last epoch.
    pub model: EyeballModel<B>,

    /// Run statistics.
    pub history: TrainingHistory,
}

#[derive(Serialize)]
struct RunRecord<'a> {
    seed: u64,
    epochs: usize,
    batch_size: usize,
    train_count: usize,
    valid_count: usize,
    config: &'a EyeballerConfig,
}

/// The per-epoch order of a training subset of `len` samples.
pub fn epoch_order(
    seeds: &SeedStream,
    len: usize,
    epoch: usize,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = seeds.fork_keyed(StreamPurpose::EpochOrder, &[epoch as u64]);
    order.shuffle(&mut rng);
    order
}

/// The best-so-far checkpoint.
///
/// Weights are written only when the monitored loss strictly improves, so
/// ties and regressions keep the earlier epoch on disk.
#[derive(Debug)]
struct BestCheckpoint<'a> {
    path: &'a Path,
    loss: f64,
    epoch: Option<usize>,
}

impl<'a> BestCheckpoint<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            loss: f64::INFINITY,
            epoch: None,
        }
    }

    /// Save `model` if `loss` beats every earlier epoch; returns whether it did.
    fn offer<B: Backend>(
        &mut self,
        epoch: usize,
        loss: f64,
        model: &EyeballModel<B>,
    ) -> Result<bool> {
        if loss.is_nan() || loss >= self.loss {
            return Ok(false);
        }
        model.save_weights(self.path)?;
        self.loss = loss;
        self.epoch = Some(epoch);
        Ok(true)
    }
}

/// Collects per-image failures, reporting each path once.
#[derive(Debug, Default)]
struct SkipLog {
    seen: HashSet<PathBuf>,
    skipped: Vec<SkippedImage>,
}

impl SkipLog {
    fn load(
        &mut self,
        path: &Path,
    ) -> Option<RgbImage> {
        match load_image(path) {
            Ok(image) => Some(image),
            Err(err) => {
                if self.seen.insert(path.to_path_buf()) {
                    self.skipped.push(SkippedImage::warn(path, &err));
                }
                None
            }
        }
    }
}

/// Mean loss and accuracy accumulator.
#[derive(Debug, Default)]
struct Meter {
    loss_sum: f64,
    samples: usize,
    correct: usize,
    instances: usize,
}

impl Meter {
    fn update<B: Backend>(
        &mut self,
        loss: Tensor<B, 1>,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 2, Int>,
    ) {
        let [batch, labels] = logits.dims();
        self.loss_sum += loss.into_scalar().elem::<f64>() * batch as f64;
        self.samples += batch;
        self.correct += correct_predictions(logits, targets);
        self.instances += batch * labels;
    }

    fn loss(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.loss_sum / self.samples as f64)
    }

    fn accuracy(&self) -> Option<f64> {
        (self.instances > 0).then(|| self.correct as f64 / self.instances as f64)
    }
}

/// Count label-instances whose thresholded prediction matches the target.
fn correct_predictions<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
) -> usize {
    // sigmoid(x) > 0.5 iff x > 0
    logits
        .greater_elem(0.0)
        .int()
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

/// Seeded, checkpointed training.
#[derive(Debug, Clone)]
pub struct Trainer<B: AutodiffBackend> {
    config: EyeballerConfig,
    disk_cache: DiskCacheConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// New trainer for a run configuration.
    pub fn new(
        config: EyeballerConfig,
        disk_cache: DiskCacheConfig,
        device: B::Device,
    ) -> Self {
        Self {
            config,
            disk_cache,
            device,
        }
    }

    /// The run configuration.
    pub fn config(&self) -> &EyeballerConfig {
        &self.config
    }

    /// Train for `options.epochs` epochs.
    ///
    /// # Errors
    ///
    /// * [`EyeballError::DataNotFound`] / [`EyeballError::LabelTable`] for
    ///   label table failures.
    /// * [`EyeballError::EmptyDataset`] if the training subset is empty, or
    ///   an epoch finds no readable training image.
    /// * [`EyeballError::InvalidConfig`] if the batch size exceeds the
    ///   training subset, or the configuration is inconsistent.
    /// * [`EyeballError::WeightsFile`] if `weights_file` cannot be loaded.
    pub fn train(
        &self,
        options: &TrainOptions,
    ) -> Result<TrainingRun<B>> {
        let config = &self.config;
        config.validate()?;
        if options.batch_size == 0 {
            return Err(EyeballError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }

        let seeds = SeedStream::resolve(options.seed);
        B::seed(seeds.seed());

        let store = LabelStore::load(&config.labels_file, &config.label_set)?;
        let (train, valid) = store.validation_split(&seeds, config.validation_fraction);
        if train.is_empty() {
            return Err(EyeballError::EmptyDataset {
                what: "training subset".to_string(),
            });
        }
        if options.batch_size > train.len() {
            return Err(EyeballError::InvalidConfig(format!(
                "batch_size {} exceeds the {} training images",
                options.batch_size,
                train.len()
            )));
        }
        tracing::info!(
            seed = seeds.seed(),
            train = train.len(),
            validation = valid.len(),
            "dataset split"
        );

        self.write_run_record(&seeds, options, train.len(), valid.len())?;

        let mut skips = SkipLog::default();
        let valid_items = self.prepare_validation(&valid, &mut skips);
        if valid_items.is_empty() {
            tracing::warn!("no validation images; checkpointing on training loss");
        }

        let mut model = EyeballModel::<B>::from_config(config, &self.disk_cache, &self.device)?;
        if options.log_summary {
            model.summary();
        }
        let mut optimizer = AdamConfig::new().init::<B, EyeballModel<B>>();

        let augmenter = Augmenter::new(config.augmentation.clone(), config.image_size);
        let batcher = ScreenshotBatcher::new(config.image_size, config.num_labels());
        let steps = train.len() / options.batch_size;

        let mut history = TrainingHistory {
            seed: seeds.seed(),
            train_count: train.len(),
            valid_count: valid.len(),
            epochs: Vec::with_capacity(options.epochs),
            best_epoch: None,
            skipped_images: Vec::new(),
        };
        let mut best = BestCheckpoint::new(&config.checkpoint_file);
        let mut last_scores = Vec::new();

        for epoch in 1..=options.epochs {
            let order = epoch_order(&seeds, train.len(), epoch);
            let mut meter = Meter::default();

            for step in 0..steps {
                let chunk = &order[step * options.batch_size..(step + 1) * options.batch_size];
                let items: Vec<ScreenshotItem> = chunk
                    .iter()
                    .filter_map(|&idx| {
                        let record = &train[idx];
                        let image = skips.load(&config.image_path(&record.filename))?;
                        let variant =
                            augmenter.variant(&image, &seeds, idx as u64, epoch as u64);
                        Some(ScreenshotItem::new(variant, &record.labels))
                    })
                    .collect();
                if items.is_empty() {
                    continue;
                }

                let batch: ScreenshotBatch<B> = batcher.batch(items, &self.device);
                let logits = model.forward(batch.images);
                let loss = model.loss(logits.clone(), batch.targets.clone());
                meter.update(loss.clone().detach(), logits.detach(), batch.targets);

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(config.learning_rate, model, grads);
            }

            let (Some(train_loss), Some(train_accuracy)) = (meter.loss(), meter.accuracy())
            else {
                return Err(EyeballError::EmptyDataset {
                    what: format!("readable training images (epoch {epoch})"),
                });
            };

            let (valid_meter, scores) = self.score_validation(&model.valid(), &valid_items);
            last_scores = scores;

            let stats = EpochStats {
                epoch,
                train_loss,
                train_accuracy,
                valid_loss: valid_meter.loss(),
                valid_accuracy: valid_meter.accuracy(),
            };
            tracing::info!(
                epoch,
                train_loss = stats.train_loss,
                train_accuracy = stats.train_accuracy,
                valid_loss = ?stats.valid_loss,
                valid_accuracy = ?stats.valid_accuracy,
                "epoch complete"
            );

            let monitored = stats.monitored_loss();
            if best.offer(epoch, monitored, &model)? {
                history.best_epoch = best.epoch;
                tracing::info!(
                    epoch,
                    loss = monitored,
                    path = %config.checkpoint_file.display(),
                    "checkpoint improved"
                );
            }
            history.epochs.push(stats);
        }

        if let Some(path) = &options.final_weights_file {
            model.save_weights(path)?;
            tracing::info!(path = %path.display(), "saved final weights");
        }

        history.skipped_images = skips.skipped;
        if !history.skipped_images.is_empty() {
            tracing::warn!(
                count = history.skipped_images.len(),
                "images were skipped during training"
            );
        }

        if options.emit_graphs {
            self.write_graphs(&history, &last_scores)?;
        }

        Ok(TrainingRun { model, history })
    }

    fn prepare_validation(
        &self,
        records: &[LabelRecord],
        skips: &mut SkipLog,
    ) -> Vec<ScreenshotItem> {
        let preprocessor = crate::data::preprocess::Preprocessor::new(self.config.image_size);
        records
            .iter()
            .filter_map(|record| {
                let image = skips.load(&self.config.image_path(&record.filename))?;
                Some(ScreenshotItem::new(
                    preprocessor.prepare(&image),
                    &record.labels,
                ))
            })
            .collect()
    }

    fn score_validation(
        &self,
        model: &EyeballModel<B::InnerBackend>,
        items: &[ScreenshotItem],
    ) -> (Meter, Vec<Vec<f32>>) {
        let batcher = ScreenshotBatcher::new(self.config.image_size, self.config.num_labels());
        let mut meter = Meter::default();
        let mut scores = Vec::with_capacity(items.len());

        for chunk in items.chunks(self.config.predict_batch_size) {
            let batch: ScreenshotBatch<B::InnerBackend> =
                batcher.batch(chunk.to_vec(), &self.device);
            let logits = model.forward(batch.images);
            let loss = model.loss(logits.clone(), batch.targets.clone());

            let values: Vec<f32> = sigmoid(logits.clone())
                .into_data()
                .iter::<f32>()
                .collect();
            scores.extend(
                values
                    .chunks(self.config.num_labels())
                    .map(|row| row.to_vec()),
            );
            meter.update(loss, logits, batch.targets);
        }
        (meter, scores)
    }

    fn write_run_record(
        &self,
        seeds: &SeedStream,
        options: &TrainOptions,
        train_count: usize,
        valid_count: usize,
    ) -> Result<()> {
        let record = RunRecord {
            seed: seeds.seed(),
            epochs: options.epochs,
            batch_size: options.batch_size,
            train_count,
            valid_count,
            config: &self.config,
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| EyeballError::Io(std::io::Error::other(e)))?;

        std::fs::create_dir_all(&self.config.graphs_dir)?;
        let path = self.config.graphs_dir.join("train_config.json");
        std::fs::write(&path, json)?;
        tracing::debug!(path = %path.display(), "wrote run record");
        Ok(())
    }

    fn write_graphs(
        &self,
        history: &TrainingHistory,
        scores: &[Vec<f32>],
    ) -> Result<()> {
        let dir = &self.config.graphs_dir;
        let series = |name: &str, color: &str, f: &dyn Fn(&EpochStats) -> Option<f64>| {
            DataSeries::new(
                name,
                history
                    .epochs
                    .iter()
                    .filter_map(|e| f(e).map(|v| (e.epoch as f64, v)))
                    .collect(),
                color,
            )
        };

        let accuracy = [
            series("train", COLOR_PRIMARY, &|e| Some(e.train_accuracy)),
            series("validation", COLOR_SECONDARY, &|e| e.valid_accuracy),
        ];
        write_svg(
            dir.join("accuracy.svg"),
            &line_chart("Model accuracy", "epoch", "binary accuracy", &accuracy, Some((0.0, 1.0))),
        )?;

        let loss = [
            series("train", COLOR_PRIMARY, &|e| Some(e.train_loss)),
            series("validation", COLOR_SECONDARY, &|e| e.valid_loss),
        ];
        write_svg(
            dir.join("loss.svg"),
            &line_chart("Model loss", "epoch", "loss", &loss, None),
        )?;

        if scores.is_empty() {
            tracing::warn!("no validation scores; skipping label histograms");
            return Ok(());
        }
        let panels: Vec<(String, Vec<usize>)> = self
            .config
            .label_set
            .iter()
            .enumerate()
            .map(|(k, label)| {
                let column: Vec<f32> = scores.iter().map(|row| row[k]).collect();
                (label.clone(), bucket_counts(&column, HISTOGRAM_BUCKETS))
            })
            .collect();
        write_svg(
            dir.join("label_histograms.svg"),
            &histogram_panels("Validation score distribution", &panels),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::augmentation::AugmentationConfig;
    use crate::testing::{tiny_run_config, write_dataset};
    use burn::backend::{Autodiff, NdArray};
    use hamcrest::prelude::*;

    type B = Autodiff<NdArray<f32>>;

    fn labels() -> Vec<String> {
        vec!["login".to_string(), "webapp".to_string()]
    }

    fn small_dataset(root: &Path) {
        let rows: Vec<(String, bool, Vec<bool>)> = (0..10)
            .map(|i| (format!("img{i}.png"), i >= 8, vec![i % 2 == 0, i % 3 == 0]))
            .collect();
        let rows: Vec<(&str, bool, Vec<bool>)> = rows
            .iter()
            .map(|(name, eval, labels)| (name.as_str(), *eval, labels.clone()))
            .collect();
        write_dataset(root, &labels(), &rows);
    }

    fn trainer(root: &Path) -> Trainer<B> {
        let config = tiny_run_config(root)
            .with_label_set(labels())
            .with_validation_fraction(0.25)
            .with_augmentation(AugmentationConfig::disabled());
        Trainer::new(config, DiskCacheConfig::default(), Default::default())
    }

    #[test]
    fn test_epoch_order() {
        let seeds = SeedStream::new(7);
        let a = epoch_order(&seeds, 20, 1);
        assert_eq!(a, epoch_order(&seeds, 20, 1));
        assert_ne!(a, epoch_order(&seeds, 20, 2));

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_correct_predictions() {
        let device = Default::default();
        let logits = Tensor::<NdArray<f32>, 2>::from_floats([[2.0, -1.0], [-3.0, 0.5]], &device);
        let targets = Tensor::<NdArray<f32>, 2, Int>::from_ints([[1, 1], [0, 1]], &device);
        assert_that!(correct_predictions(logits, targets), equal_to(3));
    }

    #[test]
    fn test_train_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        small_dataset(dir.path());
        // A corrupt training image is skipped, not fatal.
        std::fs::write(dir.path().join("images").join("img1.png"), b"not a png").unwrap();

        let trainer = trainer(dir.path());
        let final_path = dir.path().join("final.mpk");
        let options = TrainOptions::new()
            .with_epochs(2)
            .with_batch_size(2)
            .with_seed(Some(42))
            .with_emit_graphs(true)
            .with_final_weights_file(Some(final_path.clone()))
            .with_log_summary(true);

        let run = trainer.train(&options).unwrap();
        let history = &run.history;

        assert_that!(history.seed, equal_to(42));
        // 8 training-partition rows, 2 of them validation.
        assert_that!(history.train_count, equal_to(6));
        assert_that!(history.valid_count, equal_to(2));
        assert_that!(history.epochs.len(), equal_to(2));
        assert!(history.best_epoch.is_some());
        assert!(history.best().is_some());
        assert_that!(history.skipped_images.len(), equal_to(1));
        assert!(history.skipped_images[0].path.ends_with("img1.png"));

        for stats in &history.epochs {
            assert!(stats.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&stats.train_accuracy));
        }

        let config = trainer.config();
        assert!(config.checkpoint_file.exists());
        assert!(final_path.exists());
        for name in [
            "train_config.json",
            "accuracy.svg",
            "loss.svg",
            "label_histograms.svg",
        ] {
            assert!(config.graphs_dir.join(name).exists(), "missing {name}");
        }

        let record: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(config.graphs_dir.join("train_config.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(record["seed"], 42);

        // The checkpoint loads back into a fresh model.
        let fresh = crate::testing::tiny_model::<NdArray<f32>>(2, &Default::default());
        fresh.load_weights(&config.checkpoint_file).unwrap();
    }

    #[test]
    fn test_best_checkpoint_keeps_earlier_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.mpk");
        let device = Default::default();
        let first = crate::testing::tiny_model::<NdArray<f32>>(2, &device);
        let later = crate::testing::constant_output(
            crate::testing::tiny_model::<NdArray<f32>>(2, &device),
            3.0,
        );

        let mut best = BestCheckpoint::new(&path);
        assert!(best.offer(1, 0.5, &first).unwrap());
        let saved = std::fs::read(&path).unwrap();

        // Worse, then tied: the epoch 1 weights stay on disk.
        assert!(!best.offer(2, 0.8, &later).unwrap());
        assert!(!best.offer(3, 0.5, &later).unwrap());
        assert!(!best.offer(4, f64::NAN, &later).unwrap());
        assert_that!(best.epoch, equal_to(Some(1)));
        assert_eq!(std::fs::read(&path).unwrap(), saved);

        assert!(best.offer(5, 0.3, &later).unwrap());
        assert_that!(best.epoch, equal_to(Some(5)));
        assert_ne!(std::fs::read(&path).unwrap(), saved);
    }

    #[test]
    fn test_no_readable_training_images() {
        let dir = tempfile::tempdir().unwrap();
        small_dataset(dir.path());
        for i in 0..8 {
            std::fs::write(dir.path().join("images").join(format!("img{i}.png")), b"").unwrap();
        }

        let options = TrainOptions::new()
            .with_epochs(1)
            .with_batch_size(2)
            .with_seed(Some(3));
        let trainer = trainer(dir.path());
        let err = trainer.train(&options).unwrap_err();
        assert!(matches!(err, EyeballError::EmptyDataset { .. }), "{err}");
        assert!(!trainer.config().checkpoint_file.exists());
    }

    #[test]
    fn test_batch_larger_than_training_set() {
        let dir = tempfile::tempdir().unwrap();
        small_dataset(dir.path());

        let options = TrainOptions::new()
            .with_epochs(1)
            .with_batch_size(7)
            .with_seed(Some(1));
        assert!(!options.log_summary);
        let err = trainer(dir.path()).train(&options).unwrap_err();
        assert!(matches!(err, EyeballError::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn test_empty_training_set() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &labels(),
            &[("a.png", true, vec![true, false]), ("b.png", true, vec![false, false])],
        );

        let options = TrainOptions::new().with_epochs(1).with_batch_size(1).with_seed(Some(1));
        let err = trainer(dir.path()).train(&options).unwrap_err();
        assert!(matches!(err, EyeballError::EmptyDataset { .. }), "{err}");
    }

    #[test]
    fn test_missing_label_table() {
        let dir = tempfile::tempdir().unwrap();
        let options = TrainOptions::new().with_epochs(1).with_batch_size(1).with_seed(Some(1));
        let err = trainer(dir.path()).train(&options).unwrap_err();
        assert!(matches!(err, EyeballError::DataNotFound { .. }), "{err}");
    }
}
