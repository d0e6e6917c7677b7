//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is a sequence of [`BasicBlock`]s; only the first block
//! changes width or stride.

use crate::models::resnet::basic_block::{BasicBlock, BasicBlockConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<BasicBlockConfig>,
}

impl LayerBlockConfig {
    /// Build a config of `num_blocks` blocks.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        out_planes: usize,
        stride: usize,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    BasicBlockConfig::new(in_planes, out_planes).with_stride(stride)
                } else {
                    BasicBlockConfig::new(out_planes, out_planes)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check that the blocks chain.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.blocks.is_empty() {
            return Err("blocks is empty".to_string());
        }
        for (idx, pair) in self.blocks.windows(2).enumerate() {
            if pair[0].out_planes != pair[1].in_planes {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx,
                    pair[0].out_planes,
                    idx + 1,
                    pair[1].in_planes,
                ));
            }
        }
        Ok(())
    }

    /// Initialize a new [`LayerBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        LayerBlock {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// Layer block.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    /// Input channels.
    pub fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    /// Output channels.
    pub fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    /// Effective stride.
    pub fn stride(&self) -> usize {
        self.blocks.iter().map(|b| b.stride()).product()
    }

    /// Apply the layer block.
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

        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));

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
    use burn::backend::NdArray;

    #[test]
    fn test_build() {
        let config = LayerBlockConfig::build(3, 8, 16, 2);
        assert_eq!(config.blocks.len(), 3);
        assert_eq!(config.blocks[0].stride, 2);
        assert_eq!(config.blocks[1].in_planes, 16);
        assert_eq!(config.blocks[2].stride, 1);
        config.try_validate().unwrap();
    }

    #[test]
    fn test_try_validate() {
        assert!(LayerBlockConfig::new(vec![]).try_validate().is_err());

        let config = LayerBlockConfig::new(vec![
            BasicBlockConfig::new(4, 8),
            BasicBlockConfig::new(4, 8),
        ]);
        let err = config.try_validate().unwrap_err();
        assert!(err.contains("block[0].out_planes(8) != block[1].in_planes(4)"));
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: LayerBlock<B> = LayerBlockConfig::build(2, 4, 8, 2).init(&device);
        assert_eq!(layer.in_planes(), 4);
        assert_eq!(layer.out_planes(), 8);
        assert_eq!(layer.stride(), 2);

        let output = layer.forward(Tensor::ones([1, 4, 8, 8], &device));
        assert_eq!(output.dims(), [1, 8, 4, 4]);
    }
}
