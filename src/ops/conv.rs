//! Convolution kernel (C8): `CONVINIT` + `CONVADDR` + `CONV`, the
//! central subsystem per spec §4.7.

use crate::activation::{apply, ActivationKind, ActivationParams};
use crate::ops::tile_reorder;
use crate::ops::OutputDtype;
use crate::rounding::dpu_round;

/// The parameters stashed by a `CONVINIT`, read by the following `CONV`.
#[derive(Debug, Clone, Copy)]
pub struct ConvGeometry {
    /// Kernel window height/width.
    pub kernel_h: usize,
    /// Kernel window height/width.
    pub kernel_w: usize,
    /// Stride height/width.
    pub stride_h: usize,
    /// Stride height/width.
    pub stride_w: usize,
    /// Output-height iteration count.
    pub oh_iter: usize,
    /// Output-width iteration count.
    pub ow_iter: usize,
    /// Input-channel iteration count.
    pub ic_iter: usize,
    /// Output-channel iteration count.
    pub oc_iter: usize,
    /// Output-height tile group size.
    pub tile_ohg: usize,
    /// Output-width tile group size.
    pub tile_owg: usize,
    /// Input-channel tile group size.
    pub tile_icg: usize,
    /// Output-channel tile group size.
    pub tile_ocg: usize,
    /// Output-height pixel parallelism (from the target descriptor).
    pub ohp: usize,
    /// Output-width pixel parallelism (from the target descriptor).
    pub owp: usize,
    /// Input-channel parallelism (from the target descriptor).
    pub icp: usize,
    /// Output-channel parallelism (from the target descriptor).
    pub ocp: usize,
    /// Trailing output-width elements this conv does not produce
    /// (partial final tile).
    pub ow_offset: usize,
    /// Trailing input-channel elements this conv does not consume.
    pub icg_offset: usize,
    /// Implicit zero-padding applied to the input tile's left/right
    /// edge before the MAC phase (spec §4.7).
    pub pad_left: usize,
    /// Implicit zero-padding applied to the input tile's left/right
    /// edge before the MAC phase (spec §4.7).
    pub pad_right: usize,
    /// Implicit zero-padding applied to the input tile's top/bottom
    /// edge before the MAC phase (spec §4.7).
    pub pad_top: usize,
    /// Implicit zero-padding applied to the input tile's top/bottom
    /// edge before the MAC phase (spec §4.7).
    pub pad_bottom: usize,
}

impl ConvGeometry {
    /// `dst_h = oh_iter * tile_ohg * ohp`.
    pub const fn dst_h(&self) -> usize {
        self.oh_iter * self.tile_ohg * self.ohp
    }

    /// `dst_w = ow_iter * tile_owg * owp - ow_offset`.
    pub const fn dst_w(&self) -> usize {
        self.ow_iter * self.tile_owg * self.owp - self.ow_offset
    }

    /// `ic = ic_iter * tile_icg * icp - icg_offset`.
    pub const fn ic(&self) -> usize {
        self.ic_iter * self.tile_icg * self.icp - self.icg_offset
    }

    /// `oc = oc_iter * tile_ocg * ocp`.
    pub const fn oc(&self) -> usize {
        self.oc_iter * self.tile_ocg * self.ocp
    }

    /// `src_h = (dst_h - 1) * stride_h + kernel_h`.
    pub const fn src_h(&self) -> usize {
        (self.dst_h() - 1) * self.stride_h + self.kernel_h
    }

    /// `src_w = (dst_w - 1) * stride_w + kernel_w`.
    pub const fn src_w(&self) -> usize {
        (self.dst_w() - 1) * self.stride_w + self.kernel_w
    }

    /// Height of the physical (unpadded) input region fetched from the
    /// bank: `src_h` minus the implicit top/bottom padding.
    pub const fn raw_h(&self) -> usize {
        self.src_h() - self.pad_top - self.pad_bottom
    }

    /// Width of the physical (unpadded) input region fetched from the
    /// bank: `src_w` minus the implicit left/right padding.
    pub const fn raw_w(&self) -> usize {
        self.src_w() - self.pad_left - self.pad_right
    }
}

/// Bias/activation/output parameters, also stashed by `CONVINIT`.
#[derive(Debug, Clone, Copy)]
pub struct ConvParams {
    /// Post-MAC bias right-shift exponent, as encoded on the wire
    /// (`>= 32` means a negative shift of `32 - shift_bias`).
    pub shift_bias: u32,
    /// Whether this generation doubles the accumulator before adding
    /// the shifted bias (most do).
    pub double_before_bias: bool,
    /// Shift applied after the bias add, before activation:
    /// `x = result / 2^(shift_cut + 1)`.
    pub shift_cut: u32,
    /// The non-linearity to apply.
    pub activation: ActivationKind,
    /// Parameters the activation needs beyond `x` itself.
    pub activation_params: ActivationParams,
    /// Output dtype's saturating range.
    pub out_dtype: OutputDtype,
    /// Tile-reorder scale (0/1 disables; 2 is the only supported value).
    pub tile_scale: usize,
}

/// Resolves the wire-encoded `shift_bias` to a signed exponent:
/// `shift_bias >= 32` encodes a negative shift of `32 - shift_bias`.
///
/// Per spec §4.7/§7, a non-negative `shift_bias` greater than 20 is a
/// fatal parameter error; this function only does the sign resolution,
/// leaving the `<= 20` validation to the caller (who has the
/// instruction index for the error).
pub const fn effective_shift_bias(shift_bias: u32) -> i32 {
    if shift_bias >= 32 {
        32 - shift_bias as i32
    } else {
        shift_bias as i32
    }
}

/// Padding phase: embeds the physical `[raw_h][raw_w][ic]` fetch
/// buffer into the full `[src_h][src_w][ic]` tile the MAC phase reads,
/// zero-filling the `pad_left`/`pad_right`/`pad_top`/`pad_bottom`
/// border per spec §4.7. A no-op copy when the geometry carries no
/// padding.
pub fn pad_image(raw: &[i64], ic: usize, geom: &ConvGeometry) -> Vec<i64> {
    if geom.pad_left == 0 && geom.pad_right == 0 && geom.pad_top == 0 && geom.pad_bottom == 0 {
        return raw.to_vec();
    }
    let (src_h, src_w) = (geom.src_h(), geom.src_w());
    let (raw_h, raw_w) = (geom.raw_h(), geom.raw_w());
    let mut out = vec![0i64; src_h * src_w * ic];
    for row in 0..raw_h {
        let dst_row = row + geom.pad_top;
        let dst_start = (dst_row * src_w + geom.pad_left) * ic;
        let raw_start = row * raw_w * ic;
        out[dst_start..dst_start + raw_w * ic].copy_from_slice(&raw[raw_start..raw_start + raw_w * ic]);
    }
    out
}

/// MAC phase: `img[src_h][src_w][ic]`, `weights[oc][kh][kw][ic]`,
/// producing `result64[dst_h][dst_w][oc]` as `i64`.
pub fn mac(img: &[i64], weights: &[i64], geom: &ConvGeometry) -> Vec<i64> {
    let (dst_h, dst_w, ic, oc) = (geom.dst_h(), geom.dst_w(), geom.ic(), geom.oc());
    let (kh, kw) = (geom.kernel_h, geom.kernel_w);
    let src_w = geom.src_w();
    let mut out = vec![0i64; dst_h * dst_w * oc];
    for i in 0..dst_h {
        for j in 0..dst_w {
            for k in 0..oc {
                let mut acc = 0i64;
                for kh_i in 0..kh {
                    for kw_i in 0..kw {
                        let src_row = i * geom.stride_h + kh_i;
                        let src_col = j * geom.stride_w + kw_i;
                        for c in 0..ic {
                            let img_idx = (src_row * src_w + src_col) * ic + c;
                            let w_idx = ((k * kh + kh_i) * kw + kw_i) * ic + c;
                            acc += img[img_idx] * weights[w_idx];
                        }
                    }
                }
                out[(i * dst_w + j) * oc + k] = acc;
            }
        }
    }
    out
}

/// Bias phase: `result *= 2` (if `double_before_bias`), then
/// `result += floor(bias * 2^effective_shift_bias)`, per output channel.
pub fn apply_bias(result: &mut [i64], bias: &[i64], oc: usize, params: &ConvParams) {
    let shift = effective_shift_bias(params.shift_bias);
    for (idx, v) in result.iter_mut().enumerate() {
        let k = idx % oc;
        if params.double_before_bias {
            *v *= 2;
        }
        let biased = (bias[k] as f64 * 2f64.powi(shift)).floor() as i64;
        *v += biased;
    }
}

/// Activation + shift_cut + DPU-round + saturate phase.
pub fn activate_and_cast(result: &[i64], params: &ConvParams) -> Vec<i64> {
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

/// `conv_elewadd_fusion` phase: adds an `IFM_ELEW` stream into the MAC
/// result in place, before the bias phase, per spec §4.7's "additional
/// elementwise input stream" (the stream shares the output's `(dst_h,
/// dst_w, oc)` shape, one value per output position/channel).
pub fn apply_elewadd(result: &mut [i64], elew: &[i64]) {
    debug_assert_eq!(result.len(), elew.len());
    for (v, e) in result.iter_mut().zip(elew.iter()) {
        *v += *e;
    }
}

/// Runs the full MAC -> bias -> activation -> (optional) tile-reorder
/// pipeline, returning the output buffer and its `(h, w, oc)` shape.
pub fn convolve(
    img: &[i64],
    weights: &[i64],
    bias: &[i64],
    geom: &ConvGeometry,
    params: &ConvParams,
) -> (Vec<i64>, usize, usize, usize) {
    let mut result = mac(img, weights, geom);
    apply_bias(&mut result, bias, geom.oc(), params);
    let activated = activate_and_cast(&result, params);

    if params.tile_scale >= 2 {
        tile_reorder::reorder(&activated, geom.dst_h(), geom.dst_w(), geom.oc(), params.tile_scale)
    } else {
        (activated, geom.dst_h(), geom.dst_w(), geom.oc())
    }
}
