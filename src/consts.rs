//! Simulator-wide constants.

/// DDR regions are always allocated in multiples of this many bytes.
pub const DDR_ALIGN: u64 = 4096;

/// `DDR::mark_used` line granularity is `hp_width * LINE_GRANULARITY_FACTOR`.
pub const LINE_GRANULARITY_FACTOR: u64 = 16;

/// Default high-performance bus width in bytes, overridable by config.
pub const DEFAULT_HP_WIDTH: usize = 16;

/// `shift_bias` values at or above this threshold encode a negative
/// shift of `32 - shift_bias` rather than being out of range.
pub const SHIFT_BIAS_NEGATIVE_ENCODING: u32 = 32;

/// The largest `shift_bias` accepted without the negative-shift reinterpretation.
pub const SHIFT_BIAS_MAX: u32 = 20;

/// DPUV4E aligns conv output width to this many pixels.
pub const AIE_W: usize = 14;
