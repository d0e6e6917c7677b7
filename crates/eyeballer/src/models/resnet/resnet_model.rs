//! # `ResNet` Core Model
use crate::errors::{EyeballError, Result};
use crate::models::resnet::conv_norm::{ConvNorm, ConvNormConfig};
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Tensor};

/// Total spatial reduction of the stem and the four layers.
pub const RESNET_REDUCTION: usize = 32;

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of blocks in each of the four layers.
    pub blocks: [usize; 4],

    /// Width of the stem and the first layer; doubled per layer.
    #[config(default = 64)]
    pub width: usize,
}

impl ResNetConfig {
    /// `ResNet-18`.
    pub fn resnet18() -> Self {
        Self::new([2, 2, 2, 2])
    }

    /// `ResNet-34`.
    pub fn resnet34() -> Self {
        Self::new([3, 4, 6, 3])
    }

    /// Check that every layer has at least one block and the width is positive.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(EyeballError::InvalidConfig(
                "backbone width must be positive".to_string(),
            ));
        }
        if let Some(layer) = self.blocks.iter().position(|&b| b == 0) {
            return Err(EyeballError::InvalidConfig(format!(
                "backbone layer{} has no blocks: {:?}",
                layer + 1,
                self.blocks
            )));
        }
        Ok(())
    }

    /// Channels of the output feature map.
    pub fn out_planes(&self) -> usize {
        self.width * 8
    }

    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let w = self.width;
        let layer = |idx: usize, in_planes: usize, out_planes: usize, stride: usize| {
            LayerBlockConfig::build(self.blocks[idx], in_planes, out_planes, stride).init(device)
        };

        ResNet {
            // 7x7 conv, /2
            stem: ConvNormConfig::square(3, w, 7, 2, 3).init(device),
            relu: Relu::new(),
            // 3x3 maxpool, /2
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),

            layer1: layer(0, w, w, 1),
            layer2: layer(1, w, w * 2, 2),
            layer3: layer(2, w * 2, w * 4, 2),
            layer4: layer(3, w * 4, w * 8, 2),
        }
    }
}

/// `ResNet` feature extractor.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Input conv/norm.
    pub stem: ConvNorm<B>,

    /// Stem activation.
    pub relu: Relu,

    /// Stem pooling.
    pub maxpool: MaxPool2d,

    /// Layer 1.
    pub layer1: LayerBlock<B>,

    /// Layer 2.
    pub layer2: LayerBlock<B>,

    /// Layer 3.
    pub layer3: LayerBlock<B>,

    /// Layer 4.
    pub layer4: LayerBlock<B>,
}

impl<B: Backend> ResNet<B> {
    /// Channels of the output feature map.
    pub fn out_planes(&self) -> usize {
        self.layer4.out_planes()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height=out_height*32, width=out_width*32]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` feature map.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract = shape_contract![
            "batch",
            "channels",
            "out_height" * "reduction",
            "out_width" * "reduction"
        ];
        let [batch, out_height, out_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "out_height", "out_width"],
            &[("channels", 3), ("reduction", RESNET_REDUCTION)],
        );

        let x = self.stem.forward(input);
        let x = self.relu.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!["batch", "out_planes", "out_height", "out_width"];
            OUTPUT_CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", batch),
                    ("out_planes", self.out_planes()),
                    ("out_height", out_height),
                    ("out_width", out_width),
                ],
            );
        });

        x
    }
}
