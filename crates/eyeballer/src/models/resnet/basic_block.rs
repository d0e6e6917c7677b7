//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is two 3x3 conv/norm layers with a residual connection.
//! When the block changes stride or width, the residual passes through a
//! 1x1 conv/norm downsample.

use crate::models::resnet::conv_norm::{ConvNorm, ConvNormConfig};
use crate::models::resnet::util::stride_div_output_resolution;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::Relu;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Config.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// Input channels.
    pub in_planes: usize,

    /// Output channels.
    pub out_planes: usize,

    /// Stride of the first conv and the downsample.
    #[config(default = 1)]
    pub stride: usize,
}

impl BasicBlockConfig {
    /// Does this block need a downsample on the residual path?
    pub fn needs_downsample(&self) -> bool {
        self.stride != 1 || self.in_planes != self.out_planes
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride)
    }

    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        let downsample = if self.needs_downsample() {
            Some(ConvNormConfig::square(self.in_planes, self.out_planes, 1, self.stride, 0).init(device))
        } else {
            None
        };

        BasicBlock {
            conv_norm1: ConvNormConfig::square(self.in_planes, self.out_planes, 3, self.stride, 1)
                .init(device),
            conv_norm2: ConvNormConfig::square(self.out_planes, self.out_planes, 3, 1, 1)
                .init(device),
            downsample,
            relu: Relu::new(),
        }
    }
}

/// Basic Block for `ResNet`.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First conv/norm; carries the stride.
    pub conv_norm1: ConvNorm<B>,

    /// Second conv/norm.
    pub conv_norm2: ConvNorm<B>,

    /// Optional residual downsample.
    pub downsample: Option<ConvNorm<B>>,

    /// Activation.
    pub relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    /// Input channels.
    pub fn in_planes(&self) -> usize {
        self.conv_norm1.in_channels()
    }

    /// Output channels.
    pub fn out_planes(&self) -> usize {
        self.conv_norm2.out_channels()
    }

    /// Block stride.
    pub fn stride(&self) -> usize {
        self.conv_norm1.stride()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract = shape_contract![
            "batch",
            "in_planes",
            "out_height" * "stride",
            "out_width" * "stride"
        ];
        let [batch, out_height, out_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.conv_norm1.forward(input);
        let x = self.relu.forward(x);
        let x = self.conv_norm2.forward(x);
        let x = self.relu.forward(x + identity);

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

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::{ShapeContract, shape_contract};
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_basic_block_config() {
        let config = BasicBlockConfig::new(16, 16);
        assert!(!config.needs_downsample());
        assert_eq!(config.output_resolution([16, 16]), [16, 16]);

        let config = config.with_stride(2);
        assert!(config.needs_downsample());
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);

        assert!(BasicBlockConfig::new(16, 32).needs_downsample());
    }

    #[test]
    fn test_basic_block_forward_no_downsample() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(4, 4).init(&device);
        assert!(block.downsample.is_none());
        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.out_planes(), 4);
        assert_eq!(block.stride(), 1);

        let output = block.forward(Tensor::ones([2, 4, 8, 8], &device));
        assert_eq!(output.dims(), [2, 4, 8, 8]);
    }

    #[test]
    fn test_basic_block_forward_downsample_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(2, 4).with_stride(2).init(&device);
        assert!(block.downsample.is_some());

        let output = block.forward(Tensor::ones([2, 2, 8, 8], &device));

        static CONTRACT: ShapeContract =
            shape_contract!["batch", "out_channels", "out_height", "out_width"];
        CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 4),
                ("out_width", 4),
            ],
        );
    }
}
