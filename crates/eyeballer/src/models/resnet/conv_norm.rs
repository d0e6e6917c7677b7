//! # Conv + `BatchNorm`
use crate::models::resnet::util::CONV_INTO_RELU_INITIALIZER;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm`] Config.
#[derive(Config, Debug)]
pub struct ConvNormConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,
}

impl From<Conv2dConfig> for ConvNormConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self { conv }
    }
}

impl ConvNormConfig {
    /// A bias-free square conv with symmetric padding.
    pub fn square(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_initializer(CONV_INTO_RELU_INITIALIZER)
            .with_bias(false)
            .into()
    }

    /// Initialize a [`ConvNorm`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm<B> {
        ConvNorm {
            norm: BatchNormConfig::new(self.conv.channels[1]).init(device),
            conv: self.conv.init(device),
        }
    }
}

/// [`Conv2d`] followed by [`BatchNorm`].
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    /// Convolution.
    pub conv: Conv2d<B>,

    /// Normalization.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.conv.weight.dims()[1] * self.conv.groups
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    /// Stride of the convolution.
    pub fn stride(&self) -> usize {
        self.conv.stride[0]
    }

    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        self.norm.forward(x)
    }
}
