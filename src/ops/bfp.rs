//! Block floating-point quantization (C9).
//!
//! Ported from the original CPU reference kernel's `BFPCPUKernel` /
//! `BFPPrimeCPUKernel`: a block of `f32`s shares one biased exponent,
//! every element is rounded to an `m_bits`-wide signed mantissa and
//! rescaled, with NaN/Inf passed through unchanged and an upshift when
//! any element's rounded mantissa would overflow `m_bits`.

use crate::rounding::RoundMode;

fn biased_exponent(v: f32) -> u32 {
    (v.to_bits() & 0x7f80_0000) >> 23
}

fn max_biased_exponent(values: &[f32]) -> u32 {
    let mut max_exp = 0u32;
    for &v in values {
        let mut exp = biased_exponent(v);
        if exp == 0xff {
            // NaN/Inf do not participate in the shared-exponent search.
            exp = 0;
        }
        max_exp = max_exp.max(exp);
    }
    max_exp
}

fn round_with_mode(x: f64, mode: RoundMode) -> f64 {
    match mode {
        RoundMode::Std => crate::rounding::std_round(x),
        RoundMode::Dpu => crate::rounding::dpu_round(x),
        RoundMode::Py3 => crate::rounding::py3_round(x),
    }
}

/// Quantizes one block of `bit_width`-wide BFP values (`m_bits = bit_width - 9`
/// mantissa bits, 1 sign bit, 8 shared exponent bits).
///
/// Returns the quantized `f32` values in the same order as `block`.
/// `+-0`/NaN/Inf pass through unchanged, matching the reference kernel.
pub fn quantize_block(block: &[f32], bit_width: u32, mode: RoundMode) -> Vec<f32> {
    let mut shared_exp = max_biased_exponent(block);
    let mut shared_exp_value = shared_exp as i32 - 127;
    let m_bits = bit_width as i32 - 9;
    let mut scale = 2f64.powi(shared_exp_value - (m_bits - 1));

    // Detect overflow of the widest (shared-exponent) element and
    // upshift once if any rounded mantissa would not fit in m_bits.
    for &v in block {
        let exp = biased_exponent(v);
        if exp == shared_exp {
            let x = round_with_mode(v as f64 / scale, mode);
            if !(-128.0..128.0).contains(&x) {
                shared_exp += 1;
                shared_exp_value += 1;
                scale *= 2.0;
                break;
            }
        }
    }

    let max_v = 2f64.powi(shared_exp_value) * (2f64.powi(m_bits) - 1.0);
    let min_v = -(2f64.powi(shared_exp_value)) * 2f64.powi(m_bits);

    block
        .iter()
        .map(|&v| {
            let exp = biased_exponent(v);
            if exp == 0xff {
                return v;
            }
            let x = round_with_mode(v as f64 / scale, mode) * scale;
            x.clamp(min_v, max_v) as f32
        })
        .collect()
}

/// The shared exponent (unbiased) [`quantize_block`] would use for `block`.
pub fn shared_exponent_value(block: &[f32]) -> i32 {
    max_biased_exponent(block) as i32 - 127
}

/// Right-shifts a `num_tail_bits`-wide mantissa `x` with half-rounding
/// per `mode`, saturating at `upper_bound`. Ported from the reference
/// kernel's `round_bits`, used by [`bfp_prime_block`].
pub fn round_bits(sign: i32, x: u32, num_tail_bits: u32, upper_bound: u32, mode: RoundMode) -> u32 {
    if num_tail_bits == 0 {
        return x;
    }
    if num_tail_bits > 25 {
        return 0;
    }
    let half = 1u32 << (num_tail_bits - 1);
    let tail = x & ((1u32 << num_tail_bits) - 1);
    let ret = x >> num_tail_bits;
    if ret == upper_bound {
        return ret;
    }
    if tail < half {
        ret
    } else if tail > half {
        ret + 1
    } else {
        match mode {
            RoundMode::Std => ret + 1,
            RoundMode::Dpu => {
                if sign == -1 {
                    ret
                } else {
                    ret + 1
                }
            }
            RoundMode::Py3 => {
                if ret % 2 == 1 {
                    ret + 1
                } else {
                    ret
                }
            }
        }
    }
}

/// BFP-Prime: per-sub-block right-shifts bounded by `2^sub_block_shift_bits - 1`,
/// each sub-block's shift being the (capped) difference between the
/// block's shared exponent and that sub-block's own max exponent.
pub fn bfp_prime_block(
    block: &[f32],
    bit_width: u32,
    sub_block_size: usize,
    sub_block_shift_bits: u32,
    mode: RoundMode,
) -> Vec<f32> {
    const M_FLOAT: u32 = 23;
    let m_bfp = bit_width - 9;
    let exp_bias = 127i32;
    let shared_exp = max_biased_exponent(block);

    let shift_upper_bound = (1u32 << sub_block_shift_bits) - 1;
    let mut out = vec![0f32; block.len()];

    for (sub_idx, sub_block) in block.chunks(sub_block_size).enumerate() {
        let max_sub_exp = max_biased_exponent(sub_block);
        let shift = if shared_exp.saturating_sub(max_sub_exp) > shift_upper_bound {
            shift_upper_bound
        } else {
            shared_exp - max_sub_exp
        };

        for (j, &v) in sub_block.iter().enumerate() {
            let idx = sub_idx * sub_block_size + j;
            let bits = v.to_bits();
            let exp = (bits & 0x7f80_0000) >> M_FLOAT;
            let mantissa = if exp == 0 {
                0u32
            } else {
                (bits & 0x007f_ffff) | (1u32 << M_FLOAT)
            };
            let sign = if bits & 0x8000_0000 != 0 { -1i32 } else { 1i32 };
            let num_bits_shifting = (shared_exp as i64 - shift as i64 - exp as i64 + M_FLOAT as i64
                - m_bfp as i64
                + 1) as u32;
            let rounded_mantissa = round_bits(sign, mantissa, num_bits_shifting, (1u32 << (m_bfp + 1)) - 1, mode);

            out[idx] = if shared_exp == 0xff {
                f32::NAN
            } else {
                let exponent = shared_exp as i64 - exp_bias as i64 - shift as i64 + 1 - m_bfp as i64;
                sign as f32 * 2f64.powi(exponent as i32) as f32 * rounded_mantissa as f32
            };
        }
    }
    out
}
