//! # Pretrained Weight Cache
//!
//! Pretrained backbone weights are fetched once and kept under
//! `~/.cache/eyeballer/weights/`.

pub mod disk;
pub mod weights;
