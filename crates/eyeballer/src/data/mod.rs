//! # Screenshot Data
//!
//! * [`labels`] - the label table and its training / evaluation partitions.
//! * [`augmentation`] - seeded training-time image transforms.
//! * [`preprocess`] - decode, resize and normalize for the backbone.
//! * [`batcher`] - turn prepared samples into tensors.

pub mod augmentation;
pub mod batcher;
pub mod labels;
pub mod preprocess;
