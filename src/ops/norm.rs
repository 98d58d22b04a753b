//! L2Norm-fix, QGroupNorm, and QlinearSwish (C9): bfloat16-truncated
//! reference implementations. Per spec §4.8 these are contracts (the
//! numerically interesting primitives -- `f_to_bf`, `approx_tanh`,
//! `dpu_round`/`py3_round` -- are re-derived bit-exactly; the norm ops
//! themselves follow the reference kernel's data flow at a simplified,
//! single-axis granularity rather than its general N-dimensional
//! `axis[]` machinery).

use crate::rounding::{dpu_round, f_to_bf};

/// A value below this substitutes for a true zero denominator before
/// taking `1/sqrt`, matching the reference kernel's `SUBSTITUTE_FOR_0`.
const SUBSTITUTE_FOR_0: f64 = 1e-12;

/// L2-normalizes one `group` of `f32` values (already the caller's
/// chosen reduction axis, flattened) at `shift_read`/`shift_write`
/// fixed-point scales, following the reference kernel's 16-bucket
/// accumulation order to match its summation rounding.
pub fn l2norm_fix(group: &[i64], shift_read: i32, shift_write: i32) -> Vec<i64> {
    let scaled: Vec<f32> = group.iter().map(|&v| f_to_bf(v as f32 * 2f32.powi(-shift_read))).collect();

    let mut buckets = [0f32; 16];
    for (idx, &v) in scaled.iter().enumerate() {
        let sq = f_to_bf(v) * f_to_bf(v);
        buckets[idx % 16] = f_to_bf(buckets[idx % 16] + sq);
    }
    let mut sum_sq = 0f32;
    for b in buckets {
        sum_sq = f_to_bf(sum_sq + f_to_bf(b));
    }

    let inv_norm = if (sum_sq as f64) < SUBSTITUTE_FOR_0 {
        f_to_bf(1.0 / (SUBSTITUTE_FOR_0 as f32).sqrt())
    } else {
        f_to_bf(1.0 / sum_sq.sqrt())
    };

    scaled
        .iter()
        .map(|&v| {
            let normalized = f_to_bf(f_to_bf(v) * inv_norm);
            let written = f_to_bf(normalized * 2f32.powi(shift_write));
            dpu_round(written as f64) as i64
        })
        .collect()
}

/// Group-normalizes `group` (one normalization group, flattened) with
/// `scale`/`shift` per-element affine parameters applied after
/// mean/variance normalization, following the reference kernel's
/// bfloat16-truncated mean/inverse-stddev data flow at a simplified
/// (single-pass, un-fused-shift) granularity.
pub fn group_norm_fix(group: &[i64], scale: &[i64], shift: &[i64], shift_read: i32, shift_write: i32, epsilon: f64) -> Vec<i64> {
    let n = group.len() as f64;
    let scaled: Vec<f32> = group.iter().map(|&v| f_to_bf(v as f32 * 2f32.powi(-shift_read))).collect();

    let mean = f_to_bf((scaled.iter().map(|&v| v as f64).sum::<f64>() / n) as f32);
    let variance =
        f_to_bf((scaled.iter().map(|&v| (v - mean) as f64 * (v - mean) as f64).sum::<f64>() / n) as f32);
    let inv_std = f_to_bf(1.0 / (variance as f64 + epsilon).sqrt() as f32);

    scaled
        .iter()
        .enumerate()
        .map(|(idx, &v)| {
            let normalized = f_to_bf((v - mean) * inv_std);
            let affine = f_to_bf(normalized * scale[idx % scale.len()] as f32 + shift[idx % shift.len()] as f32);
            let written = f_to_bf(affine * 2f32.powi(shift_write));
            dpu_round(written as f64) as i64
        })
        .collect()
}

/// `Qlinear-Swish`: `y = x * sigmoid(beta * x)`, with `sigmoid`
/// computed via the 19-segment [`crate::activation::approx_tanh`]
/// identity `sigmoid(z) = (tanh(z/2) + 1) / 2`, all intermediate values
/// bfloat16-truncated as the reference kernel does for its 16-bit path.
pub fn qlinear_swish(x: &[i64], x_scale: f32, y_scale: f32, beta: f32) -> Vec<i64> {
    x.iter()
        .map(|&raw| {
            let d_in = raw as f32 * f_to_bf(1.0 / x_scale);
            let sigmoid = (crate::activation::approx_tanh(d_in * beta * 0.5) + 1.0) * 0.5;
            let res = f_to_bf(sigmoid * d_in) * f_to_bf(y_scale);
            dpu_round(res as f64) as i64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2norm_of_single_element_normalizes_to_unit_magnitude() {
        let out = l2norm_fix(&[4], 0, 0);
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn l2norm_zero_group_falls_back_to_substitute_epsilon() {
        let out = l2norm_fix(&[0, 0, 0], 0, 0);
        assert_eq!(out, vec![0, 0, 0]);
    }

    #[test]
    fn group_norm_of_constant_group_centers_to_zero() {
        let out = group_norm_fix(&[5, 5, 5, 5], &[1, 1, 1, 1], &[0, 0, 0, 0], 0, 0, 1e-5);
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn qlinear_swish_of_zero_is_zero() {
        let out = qlinear_swish(&[0], 1.0, 1.0, 1.0);
        assert_eq!(out, vec![0]);
    }
}
