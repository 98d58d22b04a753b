//! Max / average / max-reduce pooling, shared by the `POOL` and ALU
//! `AVEPOOL`/`MAXPOOL`/`MAXREDUCE` sub-modes.

use crate::ops::{OutputDtype, PoolKind};
use crate::rounding::dpu_round;
use crate::worker::{for_each_row_mut, WorkerMode};

/// The `<multi_factor, shift_factor>` DPU-approximate reciprocal for an
/// average pool's `kh x kw` window: `1/(kh*kw) ~= multi_factor /
/// 2^shift_factor`.
///
/// The five common window sizes use hand-tuned constants from the
/// reference kernel; anything else falls back to the same
/// minimize-absolute-error search it performs at a model's compile time.
pub fn avg_factor_table(kh: u32, kw: u32) -> (u32, u32) {
    match (kh, kw) {
        (3, 3) => (7, 6),
        (5, 5) => (10, 8),
        (6, 6) => (7, 8),
        (7, 7) => (21, 10),
        (14, 14) => (21, 12),
        _ => search_avg_factors(kh, kw),
    }
}

fn search_avg_factors(kh: u32, kw: u32) -> (u32, u32) {
    let rec = (kh * kw) as f64;
    let max_factor = (rec * 128.0).log2().ceil() as u32;
    let mut multi_factor = 0u32;
    let mut shift_factor = 0u32;
    let mut diff = 1.0f64;
    for shift in 0..max_factor {
        let factor = (2f64.powi(shift as i32) / rec).round();
        let diff_ = (factor / 2f64.powi(shift as i32) - 1.0 / rec).abs();
        if diff_ < diff {
            multi_factor = factor as u32;
            diff = diff_;
            shift_factor = shift;
        }
    }
    (multi_factor, shift_factor)
}

/// Parameters for one pool instruction, already resolved from the ISA
/// fields and the engine's current fixed-point bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct PoolParams {
    /// `MAX`, `AVG`, or `MAX_REDUCE`.
    pub kind: PoolKind,
    /// Window height/width.
    pub kernel_h: u32,
    /// Window height/width.
    pub kernel_w: u32,
    /// Horizontal/vertical stride.
    pub stride_h: u32,
    /// Horizontal/vertical stride.
    pub stride_w: u32,
    /// `fix_point_output - fix_point_input`, the post-accumulate rescale
    /// exponent (`pow_shift = 2^shift_pool`).
    pub shift_pool: i32,
    /// The output dtype's saturating cast.
    pub out_dtype: OutputDtype,
}

/// Runs one pool instruction over an HWC `input` of shape `(src_h,
/// src_w, channels)`, producing an HWC output of shape `(dst_h, dst_w,
/// channels)` where `dst_h = (src_h - kernel_h)/stride_h + 1` (caller
/// already applied any padding to `input`).
pub fn pool(
    input: &[i64],
    src_h: usize,
    src_w: usize,
    channels: usize,
    params: PoolParams,
    mode: WorkerMode,
) -> Vec<i64> {
    let dst_h = (src_h - params.kernel_h as usize) / params.stride_h as usize + 1;
    let dst_w = (src_w - params.kernel_w as usize) / params.stride_w as usize + 1;
    let mut output = vec![0i64; dst_h * dst_w * channels];

    let (multi_factor, shift_factor) = match params.kind {
        PoolKind::Avg => avg_factor_table(params.kernel_h, params.kernel_w),
        _ => (0, 0),
    };

    for_each_row_mut(&mut output, dst_w * channels, mode, |oh, row| {
        for ow in 0..dst_w {
            for c in 0..channels {
                let base_h = oh * params.stride_h as usize;
                let base_w = ow * params.stride_w as usize;
                let acc = match params.kind {
                    PoolKind::Max | PoolKind::MaxReduce => {
                        let mut m = i64::MIN;
                        for kh in 0..params.kernel_h as usize {
                            for kw in 0..params.kernel_w as usize {
                                let idx = ((base_h + kh) * src_w + (base_w + kw)) * channels + c;
                                m = m.max(input[idx]);
                            }
                        }
                        m
                    }
                    PoolKind::Avg => {
                        let mut sum = 0i64;
                        for kh in 0..params.kernel_h as usize {
                            for kw in 0..params.kernel_w as usize {
                                let idx = ((base_h + kh) * src_w + (base_w + kw)) * channels + c;
                                sum += input[idx];
                            }
                        }
                        sum
                    }
                };

                let rescaled = match params.kind {
                    PoolKind::Avg => {
                        let approx = acc as f64 * multi_factor as f64 / 2f64.powi(shift_factor as i32);
                        dpu_round(approx * 2f64.powi(params.shift_pool))
                    }
                    PoolKind::Max | PoolKind::MaxReduce => dpu_round(acc as f64 * 2f64.powi(params.shift_pool)),
                };

                row[ow * channels + c] = params.out_dtype.saturate(rescaled as i64);
            }
        }
    });

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_factor_table_matches_known_windows() {
        assert_eq!(avg_factor_table(3, 3), (7, 6));
        assert_eq!(avg_factor_table(5, 5), (10, 8));
        assert_eq!(avg_factor_table(6, 6), (7, 8));
        assert_eq!(avg_factor_table(7, 7), (21, 10));
        assert_eq!(avg_factor_table(14, 14), (21, 12));
    }

    #[test]
    fn avg_factor_search_approximates_reciprocal_closely() {
        let (multi, shift) = avg_factor_table(2, 2);
        let approx = multi as f64 / 2f64.powi(shift as i32);
        assert!((approx - 0.25).abs() < 0.01);
    }

    #[test]
    fn max_pool_picks_window_maximum() {
        // 1 channel, 4x4 input, 2x2 kernel, stride 2.
        let input: Vec<i64> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let params = PoolParams {
            kind: PoolKind::Max,
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 2,
            stride_w: 2,
            shift_pool: 0,
            out_dtype: OutputDtype::Int8,
        };
        let out = pool(&input, 4, 4, 1, params, WorkerMode::Normal);
        assert_eq!(out, vec![6, 8, 14, 16]);
    }

    #[test]
    fn avg_pool_of_constant_block_returns_that_constant() {
        let input = vec![4i64; 9]; // 3x3, all equal
        let params = PoolParams {
            kind: PoolKind::Avg,
            kernel_h: 3,
            kernel_w: 3,
            stride_h: 3,
            stride_w: 3,
            shift_pool: 0,
            out_dtype: OutputDtype::Int8,
        };
        let out = pool(&input, 3, 3, 1, params, WorkerMode::Normal);
        assert_eq!(out, vec![4]);
    }

    #[test]
    fn normal_and_threaded_pool_agree() {
        let input: Vec<i64> = (0..64).collect();
        let params = PoolParams {
            kind: PoolKind::Max,
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 2,
            stride_w: 2,
            shift_pool: 0,
            out_dtype: OutputDtype::Int16,
        };
        let normal = pool(&input, 8, 8, 1, params, WorkerMode::Normal);
        let threaded = pool(&input, 8, 8, 1, params, WorkerMode::Threaded);
        assert_eq!(normal, threaded);
    }
}
