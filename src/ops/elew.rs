//! Element-wise add/multiply (`ELEW`): N-way (2-4 inputs) with
//! per-input `shift_read`, a single `shift_write`, activation, and
//! saturate.

use crate::activation::{apply, ActivationKind, ActivationParams};
use crate::error::SimError;
use crate::ops::{ElewKind, OutputDtype};
use crate::rounding::dpu_round;
use dpu_isa::SimReason;

/// Parameters for one `ELEW` instruction.
#[derive(Debug, Clone)]
pub struct ElewParams {
    /// `Add` or `Mult`.
    pub kind: ElewKind,
    /// Per-input right-shift applied before combining, one per input.
    pub shift_read: Vec<u32>,
    /// Right-shift applied to the combined result before activation.
    pub shift_write: u32,
    /// The non-linearity to apply after `shift_write`.
    pub activation: ActivationKind,
    /// Parameters the activation needs beyond the input value.
    pub activation_params: ActivationParams,
    /// Output dtype's saturating range.
    pub out_dtype: OutputDtype,
}

/// Combines `inputs` (2-4 equal-length buffers) element-wise.
pub fn elew(inputs: &[&[i64]], params: &ElewParams) -> Result<Vec<i64>, SimError> {
    if !(2..=4).contains(&inputs.len()) {
        return Err(SimError::with_field(
            SimReason::KernelParamOutOfRange,
            0,
            "n_inputs",
            format!("ELEW requires 2-4 inputs, got {}", inputs.len()),
        ));
    }
    if inputs.len() != params.shift_read.len() {
        return Err(SimError::with_field(
            SimReason::KernelParamOutOfRange,
            0,
            "shift_read",
            "shift_read must have one entry per input",
        ));
    }
    let len = inputs[0].len();
    if inputs.iter().any(|i| i.len() != len) {
        return Err(SimError::new(SimReason::DimensionMismatch, 0, "ELEW inputs must share length"));
    }

    let mut out = Vec::with_capacity(len);
    for idx in 0..len {
        let combined = match params.kind {
            ElewKind::Add => inputs
                .iter()
                .zip(&params.shift_read)
                .map(|(buf, &shift)| (buf[idx] as f64) / 2f64.powi(shift as i32))
                .sum::<f64>(),
            ElewKind::Mult => inputs
                .iter()
                .zip(&params.shift_read)
                .map(|(buf, &shift)| (buf[idx] as f64) / 2f64.powi(shift as i32))
                .product::<f64>(),
        };
        let written = combined / 2f64.powi(params.shift_write as i32);
        let activated = apply(params.activation, written, params.activation_params);
        let rounded = dpu_round(activated);
        out.push(params.out_dtype.saturate(rounded as i64));
    }
    Ok(out)
}
