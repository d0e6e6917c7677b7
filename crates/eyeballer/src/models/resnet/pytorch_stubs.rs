#![allow(missing_docs)]
//! # Torchvision `ResNet` Weight Stubs
//!
//! Parameter-only mirrors of the torchvision `ResNet` module tree. The
//! `burn-import` recorder cannot infer stateless modules (activations,
//! pooling) from a weights file, so weights are loaded into these stubs and
//! then copied onto a [`ResNet`] built from config.

use crate::errors::{EyeballError, Result};
use crate::models::resnet::basic_block::BasicBlock;
use crate::models::resnet::conv_norm::ConvNorm;
use crate::models::resnet::layer_block::LayerBlock;
use crate::models::resnet::resnet_model::ResNet;
use burn::module::Module;
use burn::nn::BatchNorm;
use burn::nn::conv::{Conv2d, Conv2dRecord};
use burn::nn::BatchNormRecord;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::Path;

/// Load torchvision weights onto a [`ResNet`].
///
/// The fully-connected head in the file is ignored.
pub fn load_pytorch_weights<B: Backend>(
    resnet: ResNet<B>,
    path: &Path,
) -> Result<ResNet<B>> {
    let device = resnet
        .devices()
        .into_iter()
        .next()
        .ok_or_else(|| pretrained_error(path, "model has no device".to_string()))?;
    let record = load_resnet_stub_record::<B>(path, &device)?;
    record.copy_weights(resnet)
}

/// Load a [`ResNetStubRecord`] from a torchvision weights file.
pub fn load_resnet_stub_record<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<ResNetStubRecord<B>> {
    let load_args = LoadArgs::new(path.to_path_buf())
        .with_key_remap(r"downsample\.0", "downsample.conv")
        .with_key_remap(r"downsample\.1", "downsample.bn")
        .with_key_remap(r"^layer([1-4])\.", "layer$1.blocks.");

    PyTorchFileRecorder::<FullPrecisionSettings>::new()
        .load(load_args, device)
        .map_err(|e| pretrained_error(path, e.to_string()))
}

fn pretrained_error(
    path: &Path,
    reason: String,
) -> EyeballError {
    EyeballError::Pretrained {
        name: path.display().to_string(),
        reason,
    }
}

fn check_len(
    what: &str,
    stub: usize,
    target: usize,
) -> Result<()> {
    if stub != target {
        return Err(EyeballError::Pretrained {
            name: what.to_string(),
            reason: format!("weights have {stub} blocks, model has {target}"),
        });
    }
    Ok(())
}

/// Copy a conv + batch norm record pair onto a [`ConvNorm`].
pub fn copy_conv_norm_weights<B: Backend>(
    conv: Conv2dRecord<B>,
    bn: BatchNormRecord<B, 2>,
    target: ConvNorm<B>,
) -> ConvNorm<B> {
    ConvNorm {
        conv: target.conv.load_record(conv),
        norm: target.norm.load_record(bn),
    }
}

#[derive(Module, Debug)]
pub struct ResNetStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub layer1: LayerBlockStub<B>,
    pub layer2: LayerBlockStub<B>,
    pub layer3: LayerBlockStub<B>,
    pub layer4: LayerBlockStub<B>,
}

impl<B: Backend> ResNetStubRecord<B> {
    pub fn copy_weights(
        self,
        target: ResNet<B>,
    ) -> Result<ResNet<B>> {
        Ok(ResNet {
            stem: copy_conv_norm_weights(self.conv1, self.bn1, target.stem),
            layer1: self.layer1.copy_weights("layer1", target.layer1)?,
            layer2: self.layer2.copy_weights("layer2", target.layer2)?,
            layer3: self.layer3.copy_weights("layer3", target.layer3)?,
            layer4: self.layer4.copy_weights("layer4", target.layer4)?,
            ..target
        })
    }
}

#[derive(Module, Debug)]
pub struct LayerBlockStub<B: Backend> {
    pub blocks: Vec<BasicBlockStub<B>>,
}

impl<B: Backend> LayerBlockStubRecord<B> {
    pub fn copy_weights(
        self,
        name: &str,
        target: LayerBlock<B>,
    ) -> Result<LayerBlock<B>> {
        check_len(name, self.blocks.len(), target.blocks.len())?;
        Ok(LayerBlock {
            blocks: self
                .blocks
                .into_iter()
                .zip(target.blocks)
                .map(|(s, t)| s.copy_weights(name, t))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

#[derive(Module, Debug)]
pub struct DownsampleStub<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

#[derive(Module, Debug)]
pub struct BasicBlockStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub downsample: Option<DownsampleStub<B>>,
}

impl<B: Backend> BasicBlockStubRecord<B> {
    pub fn copy_weights(
        self,
        name: &str,
        target: BasicBlock<B>,
    ) -> Result<BasicBlock<B>> {
        let downsample = match (self.downsample, target.downsample) {
            (Some(stub), Some(ds)) => Some(copy_conv_norm_weights(stub.conv, stub.bn, ds)),
            (None, None) => None,
            (stub, ds) => {
                return Err(EyeballError::Pretrained {
                    name: name.to_string(),
                    reason: format!(
                        "downsample mismatch: weights {}, model {}",
                        stub.is_some(),
                        ds.is_some()
                    ),
                });
            }
        };

        Ok(BasicBlock {
            conv_norm1: copy_conv_norm_weights(self.conv1, self.bn1, target.conv_norm1),
            conv_norm2: copy_conv_norm_weights(self.conv2, self.bn2, target.conv_norm2),
            downsample,
            ..target
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::resnet_model::ResNetConfig;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;

    type B = NdArray<f32>;

    fn tiny() -> ResNetConfig {
        ResNetConfig::new([1, 1, 1, 1]).with_width(4)
    }

    /// Build a stub record from a model, as if read from disk.
    fn stub_from(model: &ResNet<B>) -> ResNetStubRecord<B> {
        let layer = |l: &LayerBlock<B>| LayerBlockStubRecord {
            blocks: l
                .blocks
                .iter()
                .map(|b| BasicBlockStubRecord {
                    conv1: b.conv_norm1.conv.clone().into_record(),
                    bn1: b.conv_norm1.norm.clone().into_record(),
                    conv2: b.conv_norm2.conv.clone().into_record(),
                    bn2: b.conv_norm2.norm.clone().into_record(),
                    downsample: b.downsample.as_ref().map(|d| DownsampleStubRecord {
                        conv: d.conv.clone().into_record(),
                        bn: d.norm.clone().into_record(),
                    }),
                })
                .collect(),
        };
        ResNetStubRecord {
            conv1: model.stem.conv.clone().into_record(),
            bn1: model.stem.norm.clone().into_record(),
            layer1: layer(&model.layer1),
            layer2: layer(&model.layer2),
            layer3: layer(&model.layer3),
            layer4: layer(&model.layer4),
        }
    }

    #[test]
    fn test_copy_weights() {
        let device = Default::default();
        let source: ResNet<B> = tiny().init(&device);
        let target: ResNet<B> = tiny().init(&device);

        let copied = stub_from(&source).copy_weights(target).unwrap();

        let input = Tensor::<B, 4>::ones([1, 3, 32, 32], &device);
        let expected = source.forward(input.clone());
        let actual = copied.forward(input);
        expected.into_data().assert_eq(&actual.into_data(), true);
    }

    #[test]
    fn test_copy_weights_block_mismatch() {
        let device = Default::default();
        let source: ResNet<B> = tiny().init(&device);
        let target: ResNet<B> = ResNetConfig::new([2, 1, 1, 1]).with_width(4).init(&device);

        let err = stub_from(&source).copy_weights(target).unwrap_err();
        assert!(err.to_string().contains("layer1"));
    }
}
