//! # Training Augmentation
//!
//! Stages run in a fixed order, each gated by its own probability:
//! zoom, color, contrast, brightness, random erasing. Every variant ends
//! with the [`Preprocessor`] normalization step.
//!
//! Randomness comes only from the [`SeedStream`] passed in: variant `k` of
//! sample `s` draws from the augmentation stream keyed by `(s, k)`, so the
//! sequence of variants is identical across runs and can be restarted.

use crate::data::preprocess::{NormalizedImage, Preprocessor};
use crate::errors::{EyeballError, Result};
use crate::rng::{SeedStream, StreamPurpose};
use burn::config::Config;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use rand::Rng;
use std::cmp::max;

/// Stage probabilities and ranges.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    /// Zoom probability.
    #[config(default = 0.75)]
    pub zoom_prob: f32,

    /// Smallest zoom factor.
    #[config(default = 0.8)]
    pub zoom_min: f32,

    /// Largest zoom factor.
    #[config(default = 1.2)]
    pub zoom_max: f32,

    /// Color (saturation) probability.
    #[config(default = 0.75)]
    pub color_prob: f32,

    /// Smallest saturation factor.
    #[config(default = 0.5)]
    pub color_min: f32,

    /// Largest saturation factor.
    #[config(default = 1.0)]
    pub color_max: f32,

    /// Contrast probability.
    #[config(default = 0.75)]
    pub contrast_prob: f32,

    /// Smallest contrast factor.
    #[config(default = 0.8)]
    pub contrast_min: f32,

    /// Largest contrast factor.
    #[config(default = 1.0)]
    pub contrast_max: f32,

    /// Brightness probability.
    #[config(default = 0.75)]
    pub brightness_prob: f32,

    /// Smallest brightness factor.
    #[config(default = 0.8)]
    pub brightness_min: f32,

    /// Largest brightness factor.
    #[config(default = 1.2)]
    pub brightness_max: f32,

    /// Random erasing probability.
    #[config(default = 0.75)]
    pub erase_prob: f32,

    /// Largest erased fraction of the image area.
    #[config(default = 0.15)]
    pub erase_max_area: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AugmentationConfig {
    /// A config with every stage disabled.
    pub fn disabled() -> Self {
        Self::new()
            .with_zoom_prob(0.0)
            .with_color_prob(0.0)
            .with_contrast_prob(0.0)
            .with_brightness_prob(0.0)
            .with_erase_prob(0.0)
    }

    /// Check probabilities and ranges.
    pub fn validate(&self) -> Result<()> {
        let probs = [
            ("zoom_prob", self.zoom_prob),
            ("color_prob", self.color_prob),
            ("contrast_prob", self.contrast_prob),
            ("brightness_prob", self.brightness_prob),
            ("erase_prob", self.erase_prob),
        ];
        for (name, p) in probs {
            if !(0.0..=1.0).contains(&p) {
                return Err(EyeballError::InvalidConfig(format!(
                    "augmentation {name} ({p}) must be in [0, 1]"
                )));
            }
        }

        let ranges = [
            ("zoom", self.zoom_min, self.zoom_max),
            ("color", self.color_min, self.color_max),
            ("contrast", self.contrast_min, self.contrast_max),
            ("brightness", self.brightness_min, self.brightness_max),
        ];
        for (name, lo, hi) in ranges {
            if lo <= 0.0 || lo > hi {
                return Err(EyeballError::InvalidConfig(format!(
                    "augmentation {name} range [{lo}, {hi}] must be positive and ordered"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.erase_max_area) {
            return Err(EyeballError::InvalidConfig(format!(
                "augmentation erase_max_area ({}) must be in [0, 1]",
                self.erase_max_area
            )));
        }
        Ok(())
    }
}

/// Seeded augmentation pipeline.
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
    preprocessor: Preprocessor,
}

impl Augmenter {
    /// Build a pipeline for a model resolution.
    pub fn new(
        config: AugmentationConfig,
        image_size: usize,
    ) -> Self {
        Self {
            config,
            preprocessor: Preprocessor::new(image_size),
        }
    }

    /// The normalization step.
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Apply the randomized stages to an image at model resolution.
    pub fn augment(
        &self,
        image: &RgbImage,
        rng: &mut dyn rand::RngCore,
    ) -> RgbImage {
        let cfg = &self.config;
        let mut img = image.clone();
        maybe_zoom(&mut img, cfg.zoom_prob, cfg.zoom_min, cfg.zoom_max, rng);
        maybe_color(&mut img, cfg.color_prob, cfg.color_min, cfg.color_max, rng);
        maybe_contrast(
            &mut img,
            cfg.contrast_prob,
            cfg.contrast_min,
            cfg.contrast_max,
            rng,
        );
        maybe_brightness(
            &mut img,
            cfg.brightness_prob,
            cfg.brightness_min,
            cfg.brightness_max,
            rng,
        );
        maybe_erase(&mut img, cfg.erase_prob, cfg.erase_max_area, rng);
        img
    }

    /// Variant `k` of sample `sample`.
    pub fn variant(
        &self,
        image: &RgbImage,
        seeds: &SeedStream,
        sample: u64,
        k: u64,
    ) -> NormalizedImage {
        let resized = self.preprocessor.resize(image);
        self.variant_of_resized(&resized, seeds, sample, k)
    }

    fn variant_of_resized(
        &self,
        resized: &RgbImage,
        seeds: &SeedStream,
        sample: u64,
        k: u64,
    ) -> NormalizedImage {
        let mut rng = seeds.fork_keyed(StreamPurpose::Augmentation, &[sample, k]);
        let augmented = self.augment(resized, &mut rng);
        self.preprocessor.normalize(&augmented)
    }

    /// The lazy, unbounded sequence of variants of one sample.
    ///
    /// The iterator is `Clone`; a clone restarts from its current position.
    pub fn variants(
        &self,
        image: &RgbImage,
        seeds: SeedStream,
        sample: u64,
    ) -> AugmentedVariants<'_> {
        AugmentedVariants {
            augmenter: self,
            image: self.preprocessor.resize(image),
            seeds,
            sample,
            next: 0,
        }
    }
}

/// Iterator over the variants of one sample.
#[derive(Debug, Clone)]
pub struct AugmentedVariants<'a> {
    augmenter: &'a Augmenter,
    image: RgbImage,
    seeds: SeedStream,
    sample: u64,
    next: u64,
}

impl Iterator for AugmentedVariants<'_> {
    type Item = NormalizedImage;

    fn next(&mut self) -> Option<Self::Item> {
        let k = self.next;
        self.next += 1;
        Some(
            self.augmenter
                .variant_of_resized(&self.image, &self.seeds, self.sample, k),
        )
    }
}

fn gate(
    prob: f32,
    rng: &mut dyn rand::RngCore,
) -> bool {
    // Always draw, so a skipped stage does not shift later stages.
    let roll: f32 = rng.random_range(0.0..1.0);
    prob > 0.0 && roll < prob
}

fn factor(
    lo: f32,
    hi: f32,
    rng: &mut dyn rand::RngCore,
) -> f32 {
    rng.random_range(lo..=hi)
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn blend_pixel(
    p: &mut Rgb<u8>,
    base: [f32; 3],
    f: f32,
) {
    for c in 0..3 {
        let v = base[c] + f * (p[c] as f32 - base[c]);
        p[c] = v.round().clamp(0.0, 255.0) as u8;
    }
}

/// Scale about the center; crop when enlarging, pad with black when shrinking.
pub(crate) fn maybe_zoom(
    img: &mut RgbImage,
    prob: f32,
    min_scale: f32,
    max_scale: f32,
    rng: &mut dyn rand::RngCore,
) {
    if !gate(prob, rng) {
        return;
    }
    let scale = factor(min_scale, max_scale, rng);
    let (w, h) = img.dimensions();
    let new_w = max(1, (w as f32 * scale).round() as u32);
    let new_h = max(1, (h as f32 * scale).round() as u32);
    if (new_w, new_h) == (w, h) {
        return;
    }

    let resized = image::imageops::resize(img, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::new(w, h);
    let dx = (w as i64 - new_w as i64) / 2;
    let dy = (h as i64 - new_h as i64) / 2;
    image::imageops::replace(&mut canvas, &resized, dx, dy);
    *img = canvas;
}

/// Blend toward per-pixel grayscale.
pub(crate) fn maybe_color(
    img: &mut RgbImage,
    prob: f32,
    lo: f32,
    hi: f32,
    rng: &mut dyn rand::RngCore,
) {
    if !gate(prob, rng) {
        return;
    }
    let f = factor(lo, hi, rng);
    for p in img.pixels_mut() {
        let g = luma(p);
        blend_pixel(p, [g, g, g], f);
    }
}

/// Blend toward the mean gray level.
pub(crate) fn maybe_contrast(
    img: &mut RgbImage,
    prob: f32,
    lo: f32,
    hi: f32,
    rng: &mut dyn rand::RngCore,
) {
    if !gate(prob, rng) {
        return;
    }
    let f = factor(lo, hi, rng);
    let n = (img.width() * img.height()).max(1) as f32;
    let mean = img.pixels().map(luma).sum::<f32>() / n;
    for p in img.pixels_mut() {
        blend_pixel(p, [mean, mean, mean], f);
    }
}

/// Blend toward black.
pub(crate) fn maybe_brightness(
    img: &mut RgbImage,
    prob: f32,
    lo: f32,
    hi: f32,
    rng: &mut dyn rand::RngCore,
) {
    if !gate(prob, rng) {
        return;
    }
    let f = factor(lo, hi, rng);
    for p in img.pixels_mut() {
        blend_pixel(p, [0.0; 3], f);
    }
}

/// Fill a random rectangle with uniform noise.
pub(crate) fn maybe_erase(
    img: &mut RgbImage,
    prob: f32,
    max_area: f32,
    rng: &mut dyn rand::RngCore,
) {
    if !gate(prob, rng) || max_area <= 0.0 {
        return;
    }
    let (w, h) = img.dimensions();
    let area = factor(0.0, max_area, rng) * (w * h) as f32;
    let aspect = factor(0.5, 2.0, rng);
    let rw = ((area * aspect).sqrt().round() as u32).clamp(1, w);
    let rh = ((area / aspect).sqrt().round() as u32).clamp(1, h);
    let x0 = rng.random_range(0..=w - rw);
    let y0 = rng.random_range(0..=h - rh);

    for y in y0..y0 + rh {
        for x in x0..x0 + rw {
            let noise: [u8; 3] = [rng.random(), rng.random(), rng.random()];
            img.put_pixel(x, y, Rgb(noise));
        }
    }
}
