//! # `ResNet` Feature Extractor
//!
//! A `ResNet` with `BasicBlock` residual units and no classification head;
//! [`resnet_model::ResNet::forward`] returns the final feature map.
//!
//! Weights published for torchvision `ResNet-18` / `ResNet-34` can be loaded
//! through [`pytorch_stubs`].

pub mod basic_block;
pub mod conv_norm;
pub mod layer_block;
pub mod pretrained;
pub mod pytorch_stubs;
pub mod resnet_model;
pub mod util;

pub use resnet_model::{ResNet, ResNetConfig};
