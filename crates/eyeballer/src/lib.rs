#![warn(missing_docs)]
//!# eyeballer - Screenshot Triage Models
//!
//! Multi-label classification of website screenshots for reconnaissance
//! triage ("custom 404", "login page", "webapp", "old looking", ...).
//!
//! ## Notable Components
//!
//! * [`config`] - the explicit run configuration.
//! * [`data`] - label table, augmentation, preprocessing and batching.
//!   * [`data::labels`] - the persistent label table and its partitions.
//!   * [`data::augmentation`] - seeded, restartable augmentation pipeline.
//!   * [`data::preprocess`] - backbone input normalization.
//! * [`models`] - network definitions.
//!   * [`models::resnet`] - the `ResNet` feature extractor.
//!   * [`models::eyeball`] - the classifier core (backbone + dense head).
//! * [`training`] - the seeded, checkpointed training loop.
//! * [`inference`] - single image, directory and in-memory prediction.
//! * [`evaluation`] - multi-label metrics over held-out data.
//! * [`heatmap`] - occlusion-sensitivity explainer.
//! * [`cache`] - pretrained weight download cache.
//! * [`charts`] - SVG training and evaluation charts.
//! * [`errors`] - the crate error type.
//! * [`logging`] - `tracing` subscriber setup.
//! * [`rng`] - purpose-keyed seed streams.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod charts;
pub mod config;
pub mod data;
pub mod errors;
pub mod evaluation;
pub mod heatmap;
pub mod inference;
pub mod logging;
pub mod models;
pub mod rng;
pub mod training;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EyeballerConfig;
pub use errors::{EyeballError, Result};
