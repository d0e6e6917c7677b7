//! # Occlusion Heatmaps
//!
//! For each label the model is confident about, a black box is slid over
//! the model-resolution input and every occluded variant is re-scored.
//! Each pixel keeps the lowest score seen among the windows covering it,
//! after an annealing penalty that grows with the distance from the
//! window's center (softening block edges).
//!
//! If no window pushes a label's score to the threshold or below, the
//! sweep is repeated with a larger box; labels that never flip are
//! dropped with a warning.
//!
//! Window placement ([`occlusion_windows`]) is a pure iterator, and the
//! sweep ([`explain_image`]) takes the scorer as a closure, so neither is
//! tied to a model.

use crate::config::EyeballerConfig;
use crate::data::preprocess::load_image;
use crate::errors::{EyeballError, Result};
use crate::inference::Predictor;
use burn::config::Config;
use burn::prelude::Backend;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// [`HeatmapExplainer`] Config.
#[derive(Config, Debug)]
pub struct HeatmapConfig {
    /// Initial occlusion box side, in pixels.
    #[config(default = 28)]
    pub box_size: usize,

    /// Window stride, in pixels.
    #[config(default = 7)]
    pub step: usize,

    /// Box growth between retries.
    #[config(default = 28)]
    pub box_growth: usize,

    /// Largest box tried (also capped at the image size).
    #[config(default = 112)]
    pub max_box_size: usize,

    /// Annealing penalty per pixel of distance from the window center.
    #[config(default = 0.01)]
    pub anneal_rate: f32,

    /// Upper bound on the annealing penalty.
    #[config(default = 0.25)]
    pub anneal_cap: f32,

    /// Labels scoring above this are explained; a sweep succeeds when it
    /// drives the score to or below it.
    #[config(default = 0.5)]
    pub threshold: f32,
}

impl HeatmapConfig {
    /// Check the config against a model resolution.
    pub fn validate(
        &self,
        image_size: usize,
    ) -> Result<()> {
        let invalid = |msg: String| Err(EyeballError::InvalidConfig(msg));
        if self.box_size == 0 || self.step == 0 || self.box_growth == 0 {
            return invalid("heatmap box_size, step and box_growth must be positive".to_string());
        }
        if self.box_size > image_size {
            return invalid(format!(
                "heatmap box_size {} exceeds image_size {image_size}",
                self.box_size
            ));
        }
        if self.max_box_size < self.box_size {
            return invalid(format!(
                "heatmap max_box_size {} is below box_size {}",
                self.max_box_size, self.box_size
            ));
        }
        if self.anneal_rate < 0.0 || self.anneal_cap < 0.0 {
            return invalid("heatmap annealing must be non-negative".to_string());
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return invalid(format!("heatmap threshold {} is not in (0, 1)", self.threshold));
        }
        Ok(())
    }

    /// The box sizes to try, in order.
    pub fn box_sizes(
        &self,
        image_size: usize,
    ) -> Vec<usize> {
        let cap = self.max_box_size.min(image_size);
        let mut sizes = Vec::new();
        let mut size = self.box_size;
        while size <= cap && self.box_growth > 0 {
            sizes.push(size);
            size += self.box_growth;
        }
        sizes
    }
}

/// Origins `(x, y)` of every `box_size` window fully inside a
/// `width x height` image, rows top-to-bottom, columns left-to-right.
pub fn occlusion_windows(
    width: usize,
    height: usize,
    box_size: usize,
    step: usize,
) -> impl Iterator<Item = (usize, usize)> + Clone {
    let positions = move |extent: usize| {
        let count = if box_size > 0 && step > 0 && box_size <= extent {
            (extent - box_size) / step + 1
        } else {
            0
        };
        (0..count).map(move |i| i * step)
    };
    positions(height).flat_map(move |y| positions(width).map(move |x| (x, y)))
}

/// Copy of `image` with a black `box_size` square at `(x, y)`.
pub fn occlude(
    image: &RgbImage,
    x: usize,
    y: usize,
    box_size: usize,
) -> RgbImage {
    let mut out = image.clone();
    let (w, h) = (image.width() as usize, image.height() as usize);
    for py in y..(y + box_size).min(h) {
        for px in x..(x + box_size).min(w) {
            out.put_pixel(px as u32, py as u32, Rgb([0, 0, 0]));
        }
    }
    out
}

/// A square grid of annealed occlusion scores.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatMap {
    /// Side length.
    pub size: usize,

    /// Row-major values.
    pub values: Vec<f32>,
}

impl HeatMap {
    fn new(size: usize) -> Self {
        Self {
            size,
            values: vec![f32::INFINITY; size * size],
        }
    }

    /// Value at `(x, y)`.
    pub fn get(
        &self,
        x: usize,
        y: usize,
    ) -> f32 {
        self.values[y * self.size + x]
    }

    /// Fold one window's score into the running minimum.
    fn merge_window(
        &mut self,
        x: usize,
        y: usize,
        box_size: usize,
        score: f32,
        config: &HeatmapConfig,
    ) {
        let center = (box_size as f32 - 1.0) / 2.0;
        for dy in 0..box_size {
            for dx in 0..box_size {
                let (px, py) = (x + dx, y + dy);
                if px >= self.size || py >= self.size {
                    continue;
                }
                let dist = ((dx as f32 - center).powi(2) + (dy as f32 - center).powi(2)).sqrt();
                let annealed = score + (config.anneal_rate * dist).min(config.anneal_cap);
                let cell = &mut self.values[py * self.size + px];
                *cell = cell.min(annealed);
            }
        }
    }

    /// Pixels no window covered take the unoccluded score.
    fn fill_uncovered(
        &mut self,
        baseline: f32,
    ) {
        for v in self.values.iter_mut().filter(|v| v.is_infinite()) {
            *v = baseline;
        }
    }
}

/// The explanation of one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelHeatmap {
    /// The label.
    pub label: String,

    /// Unoccluded score.
    pub baseline: f32,

    /// Lowest occluded score.
    pub worst: f32,

    /// Box size of the successful sweep.
    pub box_size: usize,

    /// The annealed heat.
    pub heat: HeatMap,
}

/// Explain every confidently-predicted label of a model-resolution image.
///
/// `score` maps a slice of images to one score vector per image (in
/// label-set order); it is called with at most `batch_size` images.
pub fn explain_image<F>(
    image: &RgbImage,
    label_set: &[String],
    config: &HeatmapConfig,
    batch_size: usize,
    mut score: F,
) -> Vec<LabelHeatmap>
where
    F: FnMut(&[RgbImage]) -> Vec<Vec<f32>>,
{
    let size = image.width().min(image.height()) as usize;
    let baseline = score(std::slice::from_ref(image))
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut pending: Vec<usize> = (0..label_set.len())
        .filter(|&k| baseline.get(k).is_some_and(|&s| s > config.threshold))
        .collect();
    let mut explained = Vec::new();

    for box_size in config.box_sizes(size) {
        if pending.is_empty() {
            break;
        }
        let mut heat: Vec<HeatMap> = pending.iter().map(|_| HeatMap::new(size)).collect();
        let mut worst = vec![f32::INFINITY; pending.len()];

        let windows: Vec<(usize, usize)> =
            occlusion_windows(size, size, box_size, config.step).collect();
        for chunk in windows.chunks(batch_size.max(1)) {
            let occluded: Vec<RgbImage> = chunk
                .iter()
                .map(|&(x, y)| occlude(image, x, y, box_size))
                .collect();
            let scores = score(&occluded);
            for (&(x, y), row) in chunk.iter().zip(&scores) {
                for (slot, &k) in pending.iter().enumerate() {
                    let s = row[k];
                    worst[slot] = worst[slot].min(s);
                    heat[slot].merge_window(x, y, box_size, s, config);
                }
            }
        }

        let mut still_pending = Vec::new();
        for ((k, mut heat), worst) in pending.into_iter().zip(heat).zip(worst) {
            if worst <= config.threshold {
                heat.fill_uncovered(baseline[k]);
                tracing::debug!(label = %label_set[k], box_size, worst, "occlusion flipped label");
                explained.push(LabelHeatmap {
                    label: label_set[k].clone(),
                    baseline: baseline[k],
                    worst,
                    box_size,
                    heat,
                });
            } else {
                still_pending.push(k);
            }
        }
        pending = still_pending;
    }

    for k in pending {
        tracing::warn!(
            label = %label_set[k],
            "no occlusion box changed the prediction; omitting heatmap"
        );
    }
    explained.sort_by_key(|h| label_set.iter().position(|l| *l == h.label));
    explained
}

/// Blend a red overlay onto `image`, intensity proportional to each
/// pixel's score drop from the baseline.
pub fn render_overlay(
    image: &RgbImage,
    explanation: &LabelHeatmap,
) -> RgbImage {
    let heat = &explanation.heat;
    let drop = |v: f32| (explanation.baseline - v).max(0.0);
    let peak = heat
        .values
        .iter()
        .map(|&v| drop(v))
        .fold(0.0f32, f32::max);

    RgbImage::from_fn(heat.size as u32, heat.size as u32, |x, y| {
        let base = image.get_pixel(x, y);
        let intensity = if peak > 0.0 {
            drop(heat.get(x as usize, y as usize)) / peak
        } else {
            0.0
        };
        let alpha = 0.7 * intensity;
        let blend = |c: u8, target: f32| ((1.0 - alpha) * c as f32 + alpha * target).round() as u8;
        Rgb([blend(base[0], 255.0), blend(base[1], 0.0), blend(base[2], 0.0)])
    })
}

/// Writes occlusion heatmaps for images, using a [`Predictor`].
#[derive(Debug)]
pub struct HeatmapExplainer<'a, B: Backend> {
    predictor: &'a Predictor<B>,
    config: HeatmapConfig,
    output_dir: PathBuf,
    batch_size: usize,
}

impl<'a, B: Backend> HeatmapExplainer<'a, B> {
    /// New explainer writing into `config.heatmap_dir`.
    pub fn new(
        predictor: &'a Predictor<B>,
        config: &EyeballerConfig,
    ) -> Self {
        Self {
            predictor,
            config: config.heatmap.clone(),
            output_dir: config.heatmap_dir.clone(),
            batch_size: config.predict_batch_size,
        }
    }

    /// Explain an in-memory image (resized to the model resolution).
    pub fn explain(
        &self,
        image: &RgbImage,
    ) -> (RgbImage, Vec<LabelHeatmap>) {
        let resized = self.predictor.preprocessor().resize(image);
        let explained = explain_image(
            &resized,
            self.predictor.label_set(),
            &self.config,
            self.batch_size,
            |images| self.predictor.score_arrays(images),
        );
        (resized, explained)
    }

    /// Write `<heatmap_dir>/<stem>_<label>.png` for each explained label
    /// of the image at `path`; returns the written paths.
    pub fn generate<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        let image = load_image(path)?;
        let (resized, explained) = self.explain(&image);

        if explained.is_empty() {
            tracing::info!(
                path = %path.display(),
                "no heatmap produced: no label was confidently predicted and flipped by occlusion"
            );
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let mut written = Vec::with_capacity(explained.len());
        for explanation in &explained {
            let out = self
                .output_dir
                .join(format!("{stem}_{}.png", explanation.label));
            render_overlay(&resized, explanation)
                .save(&out)
                .map_err(|source| EyeballError::Image {
                    path: out.clone(),
                    source,
                })?;
            tracing::info!(
                label = %explanation.label,
                box_size = explanation.box_size,
                path = %out.display(),
                "wrote heatmap"
            );
            written.push(out);
        }
        Ok(written)
    }
}
