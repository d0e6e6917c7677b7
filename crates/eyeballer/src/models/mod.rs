//! # Networks
//!
//! * [`resnet`] - the `ResNet` feature extractor and its pretrained weights.
//! * [`eyeball`] - the multi-label classifier built on top of it.

pub mod eyeball;
pub mod resnet;
