//! # Prediction
//!
//! [`Predictor`] scores single images, directories and in-memory pixel
//! grids. Every path resizes to the model resolution and applies the same
//! normalization as validation; nothing is randomized.
//!
//! Run the predictor on a non-autodiff backend (or a model passed through
//! `valid()`): dropout is then inactive and repeated calls return identical
//! scores.

use crate::cache::disk::DiskCacheConfig;
use crate::config::EyeballerConfig;
use crate::data::batcher::stack_images;
use crate::data::preprocess::{NormalizedImage, Preprocessor, load_image};
use crate::errors::{EyeballError, Result, SkippedImage};
use crate::models::eyeball::EyeballModel;
use burn::prelude::Backend;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Per-label scores for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// The image file name (or caller-supplied name for in-memory images).
    pub filename: String,

    /// `(label, score)` pairs in label-set order; scores are in `[0, 1]`.
    pub scores: Vec<(String, f32)>,
}

impl PredictionResult {
    /// Score for a label.
    pub fn score(
        &self,
        label: &str,
    ) -> Option<f32> {
        self.scores
            .iter()
            .find(|(name, _)| name == label)
            .map(|&(_, score)| score)
    }

    /// Labels scoring above `threshold`, in label-set order.
    pub fn positive_labels(
        &self,
        threshold: f32,
    ) -> Vec<&str> {
        self.scores
            .iter()
            .filter(|&&(_, score)| score > threshold)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The raw score vector.
    pub fn score_vector(&self) -> Vec<f32> {
        self.scores.iter().map(|&(_, score)| score).collect()
    }
}

/// Results of a batch prediction, plus the images that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionBatch {
    /// One result per readable image, in visiting order.
    pub results: Vec<PredictionResult>,

    /// Entries that were skipped (subdirectories, unreadable images).
    pub skipped: Vec<SkippedImage>,
}

/// List the entries of a prediction target.
///
/// A file yields itself; a directory yields its non-directory entries in
/// lexicographic file-name order, with subdirectories reported as skipped.
pub fn list_targets<P: AsRef<Path>>(path: P) -> Result<(Vec<PathBuf>, Vec<SkippedImage>)> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EyeballError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    if !path.is_dir() {
        return Ok((vec![path.to_path_buf()], Vec::new()));
    }

    let mut entries = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut files = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();
    for entry in entries {
        if entry.is_dir() {
            skipped.push(SkippedImage::warn(&entry, "is a directory"));
        } else {
            files.push(entry);
        }
    }
    Ok((files, skipped))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Deterministic inference over a loaded model.
#[derive(Debug, Clone)]
pub struct Predictor<B: Backend> {
    model: EyeballModel<B>,
    preprocessor: Preprocessor,
    label_set: Vec<String>,
    batch_size: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Wrap a model.
    pub fn new(
        model: EyeballModel<B>,
        config: &EyeballerConfig,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            preprocessor: Preprocessor::new(config.image_size),
            label_set: config.label_set.clone(),
            batch_size: config.predict_batch_size.max(1),
            device,
        }
    }

    /// Build the model a configuration describes and wrap it.
    pub fn from_config(
        config: &EyeballerConfig,
        disk_cache: &DiskCacheConfig,
        device: B::Device,
    ) -> Result<Self> {
        let model = EyeballModel::from_config(config, disk_cache, &device)?;
        Ok(Self::new(model, config, device))
    }

    /// The wrapped model.
    pub fn model(&self) -> &EyeballModel<B> {
        &self.model
    }

    /// The label set, in output order.
    pub fn label_set(&self) -> &[String] {
        &self.label_set
    }

    /// The model-resolution preprocessor.
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Score a single file or every image in a directory.
    ///
    /// # Errors
    ///
    /// [`EyeballError::PathNotFound`] if `path` does not exist.
    pub fn predict<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Vec<PredictionResult>> {
        Ok(self.predict_with_report(path)?.results)
    }

    /// Like [`Predictor::predict`], also returning the skipped entries.
    pub fn predict_with_report<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<PredictionBatch> {
        let (files, mut skipped) = list_targets(path)?;
        let mut batch = self.predict_files(&files);
        skipped.append(&mut batch.skipped);
        batch.skipped = skipped;

        if !batch.skipped.is_empty() {
            tracing::warn!(count = batch.skipped.len(), "entries were skipped");
        }
        Ok(batch)
    }

    /// Score a list of files; unreadable files are skipped.
    pub fn predict_files(
        &self,
        files: &[PathBuf],
    ) -> PredictionBatch {
        let mut batch = PredictionBatch::default();
        let mut pending: Vec<(String, NormalizedImage)> = Vec::with_capacity(self.batch_size);

        for file in files {
            match load_image(file) {
                Ok(image) => pending.push((display_name(file), self.preprocessor.prepare(&image))),
                Err(err) => batch.skipped.push(SkippedImage::warn(file, &err)),
            }
            if pending.len() == self.batch_size {
                self.flush(&mut pending, &mut batch.results);
            }
        }
        self.flush(&mut pending, &mut batch.results);
        batch
    }

    fn flush(
        &self,
        pending: &mut Vec<(String, NormalizedImage)>,
        results: &mut Vec<PredictionResult>,
    ) {
        if pending.is_empty() {
            return;
        }
        let scores = self.score_normalized(pending.iter().map(|(_, image)| image));
        for ((filename, _), scores) in pending.drain(..).zip(scores) {
            results.push(self.result(filename, scores));
        }
    }

    /// Score an in-memory image.
    pub fn predict_on_array(
        &self,
        image: &RgbImage,
        name: &str,
    ) -> PredictionResult {
        let scores = self.score_arrays(std::slice::from_ref(image));
        let scores = scores.into_iter().next().unwrap_or_default();
        self.result(name.to_string(), scores)
    }

    /// Score in-memory images, returning one score vector per image.
    pub fn score_arrays(
        &self,
        images: &[RgbImage],
    ) -> Vec<Vec<f32>> {
        let prepared: Vec<NormalizedImage> = images
            .iter()
            .map(|image| self.preprocessor.prepare(image))
            .collect();
        self.score_normalized(prepared.iter())
    }

    /// Score already-normalized images, one forward call per
    /// `predict_batch_size` images.
    pub fn score_normalized<'a, I>(
        &self,
        images: I,
    ) -> Vec<Vec<f32>>
    where
        I: IntoIterator<Item = &'a NormalizedImage>,
    {
        let images: Vec<&NormalizedImage> = images.into_iter().collect();
        let num_labels = self.label_set.len();
        let mut out = Vec::with_capacity(images.len());

        for chunk in images.chunks(self.batch_size) {
            let input = stack_images::<B, _>(
                chunk.iter().copied(),
                self.preprocessor.image_size,
                &self.device,
            );
            let values: Vec<f32> = self
                .model
                .forward_scores(input)
                .into_data()
                .iter::<f32>()
                .collect();
            out.extend(values.chunks(num_labels).map(|row| row.to_vec()));
        }
        out
    }

    fn result(
        &self,
        filename: String,
        scores: Vec<f32>,
    ) -> PredictionResult {
        PredictionResult {
            filename,
            scores: self.label_set.iter().cloned().zip(scores).collect(),
        }
    }
}
