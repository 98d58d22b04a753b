//! Depthwise convolution (`DPTWISE`): as [`crate::ops::conv`], but each
//! output channel convolves against its own single-channel kernel
//! instead of reducing over all input channels.

use crate::ops::conv::{apply_bias, effective_shift_bias, ConvGeometry, ConvParams};
use crate::ops::OutputDtype;
use crate::rounding::dpu_round;
use crate::activation::apply;

/// MAC phase for depthwise conv: `img[src_h][src_w][c]`,
/// `weights[c][kh][kw]` (one input channel per output channel, so
/// `oc == ic`), producing `result64[dst_h][dst_w][c]`.
pub fn mac_depthwise(img: &[i64], weights: &[i64], geom: &ConvGeometry) -> Vec<i64> {
    let (dst_h, dst_w, channels) = (geom.dst_h(), geom.dst_w(), geom.ic());
    let (kh, kw) = (geom.kernel_h, geom.kernel_w);
    let src_w = geom.src_w();
    let mut out = vec![0i64; dst_h * dst_w * channels];
    for i in 0..dst_h {
        for j in 0..dst_w {
            for c in 0..channels {
                let mut acc = 0i64;
                for kh_i in 0..kh {
                    for kw_i in 0..kw {
                        let src_row = i * geom.stride_h + kh_i;
                        let src_col = j * geom.stride_w + kw_i;
                        let img_idx = (src_row * src_w + src_col) * channels + c;
                        let w_idx = (c * kh + kh_i) * kw + kw_i;
                        acc += img[img_idx] * weights[w_idx];
                    }
                }
                out[(i * dst_w + j) * channels + c] = acc;
            }
        }
    }
    out
}

/// Runs the depthwise MAC -> bias -> activation pipeline (no tile
/// reorder; `DPTWISE` never sets `tile_en`).
pub fn depthwise_convolve(img: &[i64], weights: &[i64], bias: &[i64], geom: &ConvGeometry, params: &ConvParams) -> Vec<i64> {
    let mut result = mac_depthwise(img, weights, geom);
    apply_bias(&mut result, bias, geom.ic(), params);
    let divisor = 2f64.powi(params.shift_cut as i32 + 1);
    result
        .iter()
        .map(|&v| {
            let x = v as f64 / divisor;
            let activated = apply(params.activation, x, params.activation_params);
            let rounded = dpu_round(activated);
            params.out_dtype.saturate(rounded as i64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{ActivationKind, ActivationParams};

    fn geometry() -> ConvGeometry {
        ConvGeometry {
            kernel_h: 3,
            kernel_w: 3,
            stride_h: 1,
            stride_w: 1,
            oh_iter: 1,
            ow_iter: 1,
            ic_iter: 1,
            oc_iter: 1,
            tile_ohg: 2,
            tile_owg: 2,
            tile_icg: 1,
            tile_ocg: 1,
            ohp: 1,
            owp: 1,
            icp: 1,
            ocp: 1,
            ow_offset: 0,
            icg_offset: 0,
            pad_left: 0,
            pad_right: 0,
            pad_top: 0,
            pad_bottom: 0,
        }
    }

    #[test]
    fn depthwise_sums_per_channel_window_against_its_own_kernel() {
        let geom = geometry();
        // 1 channel, 4x4 src -> 2x2 dst via a 3x3 kernel that is all ones.
        let img: Vec<i64> = (0..16).collect();
        let weights = vec![1i64; 9];
        let bias = vec![0i64];
        let params = ConvParams {
            shift_bias: 0,
            double_before_bias: false,
            shift_cut: 0,
            activation: ActivationKind::None,
            activation_params: ActivationParams::default(),
            out_dtype: crate::ops::OutputDtype::Int16,
            tile_scale: 0,
        };
        let raw = mac_depthwise(&img, &weights, &geom);
        // top-left 3x3 window sum: 0+1+2+4+5+6+8+9+10 = 45
        assert_eq!(raw[0], 45);
        let out = depthwise_convolve(&img, &weights, &bias, &geom, &params);
        // shift_cut=0 -> divisor 2, no bias doubling, no activation: round(45/2)=23 (dpu_round(22.5)=23)
        assert_eq!(out[0], 23);
    }

    #[test]
    fn effective_shift_bias_is_shared_with_conv() {
        assert_eq!(effective_shift_bias(33), -1);
    }
}
