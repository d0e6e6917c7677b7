//! # `ResNet` Utilities
use bimm_contracts::{ShapeContract, shape_contract};
use burn::nn::Initializer;

/// Conv initializer for convolutions feeding a `ReLU`.
pub const CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: std::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Get the output resolution for a given input resolution.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    static CONTRACT: ShapeContract = shape_contract!["height_out" * "stride", "width_out" * "stride"];
    CONTRACT.unpack_shape(
        &input_resolution,
        &["height_out", "width_out"],
        &[("stride", stride)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_div_output_resolution() {
        assert_eq!(stride_div_output_resolution([32, 64], 2), [16, 32]);
        assert_eq!(stride_div_output_resolution([7, 7], 1), [7, 7]);
    }

    #[test]
    #[should_panic]
    fn test_stride_div_output_resolution_panics() {
        stride_div_output_resolution([7, 8], 2);
    }
}
