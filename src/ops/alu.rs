//! The ALU umbrella op (`ALUINIT` + `ALU`): dispatches to one of 19
//! `alu_exec_mode_t` sub-modes, each a tight fixed-point reference
//! reusing the pool/depthwise/elementwise/activation kernels where the
//! sub-mode is exactly one of those in disguise.

use crate::activation::{apply, ActivationKind, ActivationParams};
use crate::error::SimError;
use crate::ops::conv::{ConvGeometry, ConvParams};
use crate::ops::elew::{elew, ElewParams};
use crate::ops::pool::{pool, PoolParams};
use crate::ops::{dwconv, AluExecMode, OutputDtype};
use crate::rounding::dpu_round;
use crate::worker::WorkerMode;
use dpu_isa::SimReason;

/// The parameters an `ALUINIT` stashes for the following `ALU`,
/// covering every implemented sub-mode. Fields irrelevant to the
/// active `mode` are simply unused.
#[derive(Debug, Clone)]
pub struct AluInitState {
    /// Which sub-kernel this ALU instruction runs.
    pub mode: AluExecMode,
    /// Shared conv-style geometry, used by `DWCV`/`DWCVB0`/`DWCVW16B0`.
    pub geometry: Option<ConvGeometry>,
    /// Shared conv-style bias/activation/output params for the
    /// depthwise sub-modes.
    pub conv_params: Option<ConvParams>,
    /// Pool window/stride/rescale params for `AVEPOOL`/`MAXPOOL`/`MAXREDUCE`.
    pub pool_params: Option<PoolParams>,
    /// Per-input shift/activation/output params for `ELEW_ADD`/`ELEW_MUL`/`ELEW_DIV`.
    pub elew_params: Option<ElewParams>,
    /// `PRELU`'s and `LEAKYRELU`'s and `HSIGMOID`'s activation kind/params.
    pub activation: ActivationKind,
    /// Parameters the activation needs beyond the input value.
    pub activation_params: ActivationParams,
    /// Output dtype's saturating range, for sub-modes that cast directly.
    pub out_dtype: OutputDtype,
}

/// `AluExecMode`s this implementation executes bit-accurately. The
/// remainder (`InstanceNormFirst`/`Second`, `LayerNorm`, `Reduction`,
/// `L2Norm`) are contract-level, see [`crate::ops::norm`], and are
/// dispatched separately by the engine.
pub const fn is_implemented(mode: AluExecMode) -> bool {
    matches!(
        mode,
        AluExecMode::Dwcv
            | AluExecMode::Dwcvb0
            | AluExecMode::Dwcvw16b0
            | AluExecMode::Prelu
            | AluExecMode::Leakyrelu
            | AluExecMode::Hsigmoid
            | AluExecMode::Avepool
            | AluExecMode::Maxpool
            | AluExecMode::Maxreduce
            | AluExecMode::ElewAdd
            | AluExecMode::ElewMul
            | AluExecMode::ElewDiv
            | AluExecMode::Macc
            | AluExecMode::Comp
    )
}

/// Runs a `DWCV`/`DWCVB0`/`DWCVW16B0` sub-mode: per-channel depthwise
/// convolution, with bias forced to zero for the `B0` (bias-free) variants.
pub fn dwcv(img: &[i64], weights: &[i64], bias: &[i64], state: &AluInitState) -> Result<Vec<i64>, SimError> {
    let geom = state.geometry.as_ref().ok_or_else(missing("geometry"))?;
    let params = state.conv_params.as_ref().ok_or_else(missing("conv_params"))?;
    let zero_bias;
    let bias = match state.mode {
        AluExecMode::Dwcvb0 | AluExecMode::Dwcvw16b0 => {
            zero_bias = vec![0i64; geom.ic()];
            &zero_bias
        }
        _ => bias,
    };
    Ok(dwconv::depthwise_convolve(img, weights, bias, geom, params))
}

/// Runs `AVEPOOL`/`MAXPOOL`/`MAXREDUCE`.
pub fn pool_mode(input: &[i64], src_h: usize, src_w: usize, channels: usize, state: &AluInitState) -> Result<Vec<i64>, SimError> {
    let params = *state.pool_params.as_ref().ok_or_else(missing("pool_params"))?;
    Ok(pool(input, src_h, src_w, channels, params, WorkerMode::Normal))
}

/// Runs `PRELU`/`LEAKYRELU`/`HSIGMOID` as a plain elementwise map.
pub fn activation_mode(input: &[i64], state: &AluInitState) -> Vec<i64> {
    input
        .iter()
        .map(|&v| {
            let activated = apply(state.activation, v as f64, state.activation_params);
            state.out_dtype.saturate(dpu_round(activated) as i64)
        })
        .collect()
}

/// Runs `ELEW_ADD`/`ELEW_MUL`.
pub fn elew_mode(inputs: &[&[i64]], state: &AluInitState) -> Result<Vec<i64>, SimError> {
    let params = state.elew_params.as_ref().ok_or_else(missing("elew_params"))?;
    elew(inputs, params)
}

/// `ELEW_DIV`: per-element divide, `shift_read[0]`/`shift_read[1]`
/// applied to numerator/denominator before the divide, then
/// `shift_write`, activation, saturate -- the same pipeline as
/// [`elew`], substituted to division in place of add/multiply.
pub fn elew_div(numerator: &[i64], denominator: &[i64], state: &AluInitState) -> Result<Vec<i64>, SimError> {
    let params = state.elew_params.as_ref().ok_or_else(missing("elew_params"))?;
    if numerator.len() != denominator.len() {
        return Err(SimError::new(SimReason::DimensionMismatch, 0, "ELEW_DIV operands must share length"));
    }
    let shift_n = params.shift_read.first().copied().unwrap_or(0);
    let shift_d = params.shift_read.get(1).copied().unwrap_or(0);
    let mut out = Vec::with_capacity(numerator.len());
    for (&n, &d) in numerator.iter().zip(denominator) {
        let n = n as f64 / 2f64.powi(shift_n as i32);
        let d = d as f64 / 2f64.powi(shift_d as i32);
        let quotient = if d == 0.0 { 0.0 } else { n / d };
        let written = quotient / 2f64.powi(params.shift_write as i32);
        let activated = apply(params.activation, written, params.activation_params);
        out.push(params.out_dtype.saturate(dpu_round(activated) as i64));
    }
    Ok(out)
}

/// `MACC`: elementwise multiply-accumulate, `out[i] = round(a[i]*b[i] / 2^shift)`.
pub fn macc(a: &[i64], b: &[i64], shift: u32, out_dtype: OutputDtype) -> Result<Vec<i64>, SimError> {
    if a.len() != b.len() {
        return Err(SimError::new(SimReason::DimensionMismatch, 0, "MACC operands must share length"));
    }
    Ok(a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let product = (x * y) as f64 / 2f64.powi(shift as i32);
            out_dtype.saturate(dpu_round(product) as i64)
        })
        .collect())
}

/// `COMP`: elementwise comparison, `out[i] = (a[i] cmp b[i]) ? 1 : 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    /// `a > b`.
    Greater,
    /// `a >= b`.
    GreaterEq,
    /// `a == b`.
    Equal,
}

/// Runs a `COMP` sub-mode.
pub fn comp(a: &[i64], b: &[i64], op: CompOp) -> Result<Vec<i64>, SimError> {
    if a.len() != b.len() {
        return Err(SimError::new(SimReason::DimensionMismatch, 0, "COMP operands must share length"));
    }
    Ok(a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let hit = match op {
                CompOp::Greater => x > y,
                CompOp::GreaterEq => x >= y,
                CompOp::Equal => x == y,
            };
            i64::from(hit)
        })
        .collect())
}

fn missing(field: &'static str) -> impl Fn() -> SimError {
    move || SimError::with_field(SimReason::KernelParamOutOfRange, 0, field, format!("ALU sub-mode requires `{field}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::PoolKind;

    #[test]
    fn macc_multiplies_and_shifts() {
        let a = [4i64, 6];
        let b = [2i64, 2];
        let out = macc(&a, &b, 1, OutputDtype::Int16).unwrap();
        // 4*2/2=4, 6*2/2=6
        assert_eq!(out, vec![4, 6]);
    }

    #[test]
    fn comp_greater_produces_indicator() {
        let a = [1i64, 5, 3];
        let b = [2i64, 5, 1];
        let out = comp(&a, &b, CompOp::Greater).unwrap();
        assert_eq!(out, vec![0, 0, 1]);
    }

    #[test]
    fn elew_div_applies_shifts_before_dividing() {
        let state = AluInitState {
            mode: AluExecMode::ElewDiv,
            geometry: None,
            conv_params: None,
            pool_params: None,
            elew_params: Some(ElewParams {
                kind: crate::ops::ElewKind::Add,
                shift_read: vec![1, 0],
                shift_write: 0,
                activation: ActivationKind::None,
                activation_params: ActivationParams::default(),
                out_dtype: OutputDtype::Int16,
            }),
            activation: ActivationKind::None,
            activation_params: ActivationParams::default(),
            out_dtype: OutputDtype::Int16,
        };
        // numerator 16 >>1 = 8, denominator 4 -> 8/4=2
        let out = elew_div(&[16], &[4], &state).unwrap();
        assert_eq!(out, vec![2]);
    }

    #[test]
    fn pool_mode_delegates_to_max_pool() {
        let state = AluInitState {
            mode: AluExecMode::Maxpool,
            geometry: None,
            conv_params: None,
            pool_params: Some(PoolParams {
                kind: PoolKind::Max,
                kernel_h: 2,
                kernel_w: 2,
                stride_h: 2,
                stride_w: 2,
                shift_pool: 0,
                out_dtype: OutputDtype::Int8,
            }),
            elew_params: None,
            activation: ActivationKind::None,
            activation_params: ActivationParams::default(),
            out_dtype: OutputDtype::Int8,
        };
        let input: Vec<i64> = vec![1, 2, 3, 4];
        let out = pool_mode(&input, 2, 2, 1, &state).unwrap();
        assert_eq!(out, vec![4]);
    }

    #[test]
    fn is_implemented_excludes_norm_submodes() {
        assert!(!is_implemented(AluExecMode::LayerNorm));
        assert!(!is_implemented(AluExecMode::L2Norm));
        assert!(is_implemented(AluExecMode::Dwcv));
    }
}
