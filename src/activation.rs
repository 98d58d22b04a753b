//! Post-MAC activation functions shared by the convolution, ALU, and
//! depthwise kernels.

use crate::rounding::f_to_bf;

/// The non-linearity applied after the bias/shift_cut phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActivationKind {
    /// `y = x`.
    None,
    /// `y = max(x, 0)`.
    Relu,
    /// `y = (x<0) ? x*26/256 : x`.
    Leaky,
    /// `y = clamp(x, 0, 6*16)`.
    Relu6,
    /// `y = (x<0) ? x * prelu_in / 2^prelu_shift : x`.
    Prelu,
    /// Hard sigmoid.
    HSigmoid,
    /// Hard swish, `dr(x) * dr(hsigmoid(x)) * 2^-shift_hswish`.
    HSwish,
    /// Batch-norm-only (identity affine already folded into bias/shift).
    Bn,
    /// Batch-norm followed by `ReLU`.
    BnRelu,
}

impl ActivationKind {
    /// Resolves the ISA's raw `act_type` field value to a kind.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => ActivationKind::None,
            1 => ActivationKind::Relu,
            2 => ActivationKind::Prelu,
            3 => ActivationKind::Leaky,
            4 => ActivationKind::Relu6,
            5 => ActivationKind::HSigmoid,
            6 => ActivationKind::HSwish,
            7 => ActivationKind::Bn,
            8 => ActivationKind::BnRelu,
            _ => return None,
        })
    }
}

/// Parameters an activation needs beyond the input value itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationParams {
    /// `PRELU`'s per-channel multiplier numerator.
    pub prelu_in: i64,
    /// `PRELU`'s right-shift applied to `prelu_in`.
    pub prelu_shift: u32,
    /// `H-SIGMOID`'s input-side shift.
    pub hsigmoid_in: u32,
    /// `H-SIGMOID`'s output-side shift.
    pub shift_hsigmoid: u32,
    /// `H-SWISH`'s output-side shift.
    pub shift_hswish: u32,
}

/// Generation-specific "downward round" primitive shared with the ALU.
///
/// DPU hardware implements hard-sigmoid's multiply-then-shift with a
/// plain floor rather than a rounding divide; `dr` names that floor so
/// call sites read the same as the spec's activation table.
fn dr(x: f64) -> f64 {
    x.floor()
}

fn hsigmoid_raw(x: f64, params: ActivationParams) -> f64 {
    let biased = dr(x) * 2731.0 + 3.0 * 2731.0 * 2f64.powi(params.hsigmoid_in as i32);
    biased.clamp(0.0, 2f64.powi(32)) * 2f64.powi(-(params.shift_hsigmoid as i32))
}

/// Applies `kind` to `x`, returning the activated value prior to the
/// final DPU-round + saturate cast (performed by the caller, since the
/// output dtype range differs by kernel and generation).
pub fn apply(kind: ActivationKind, x: f64, params: ActivationParams) -> f64 {
    match kind {
        ActivationKind::None | ActivationKind::Bn => x,
        ActivationKind::Relu | ActivationKind::BnRelu => x.max(0.0),
        ActivationKind::Leaky => {
            if x < 0.0 {
                x * 26.0 / 256.0
            } else {
                x
            }
        }
        ActivationKind::Relu6 => x.clamp(0.0, 6.0 * 16.0),
        ActivationKind::Prelu => {
            if x < 0.0 {
                x * (params.prelu_in as f64) / 2f64.powi(params.prelu_shift as i32)
            } else {
                x
            }
        }
        ActivationKind::HSigmoid => hsigmoid_raw(x, params),
        ActivationKind::HSwish => {
            let hsigmoid_x = dr(hsigmoid_raw(x, params));
            dr(x) * hsigmoid_x * 2f64.powi(-(params.shift_hswish as i32))
        }
    }
}

/// The 19-segment piecewise-linear tanh approximation used by h-swish
/// and qlinear-swish. `inp` is first truncated to bfloat16 precision,
/// as is the returned value.
pub fn approx_tanh(inp1: f32) -> f32 {
    let inp = f_to_bf(inp1);
    let out = if inp >= 3.0 {
        1.0
    } else if inp >= 2.0 {
        0.03125 * inp + 0.90625
    } else if inp >= 1.75 {
        0.125 * inp + 0.71875
    } else if inp >= 1.5 {
        0.125 * inp + 0.72265625
    } else if inp >= 1.25 {
        0.25 * inp + 0.53515625
    } else if inp >= 1.0 {
        0.25 * inp + 0.52734375
    } else if inp >= 0.75 {
        0.5 * inp + 0.265625
    } else if inp >= 0.625 {
        0.5 * inp + 0.25390625
    } else if inp >= 0.5 {
        0.5 * inp + 0.25
    } else if inp > -0.5 {
        inp
    } else if inp > -0.625 {
        0.5 * inp - 0.25
    } else if inp > -0.75 {
        0.5 * inp - 0.25390625
    } else if inp > -1.0 {
        0.5 * inp - 0.265625
    } else if inp > -1.25 {
        0.25 * inp - 0.52734375
    } else if inp > -1.5 {
        0.25 * inp - 0.53515625
    } else if inp > -1.75 {
        0.125 * inp - 0.72265625
    } else if inp > -2.0 {
        0.125 * inp - 0.71875
    } else if inp > -3.0 {
        0.03125 * inp - 0.90625
    } else {
        -1.0
    };
    f_to_bf(out)
}
