use std::fmt;

/// The fatal-error taxonomy the simulator aborts with.
///
/// Every leaf failure named in the error handling design maps to one
/// discriminant here: program-structure errors, addressing errors,
/// parameter errors, internal invariants, and I/O errors. The
/// simulator never recovers from one of these; it logs the reason,
/// the instruction index, and the offending field, then aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum SimReason {
    /// The byte can't be mapped to any known `SimReason`.
    UnknownSimReason = 0x00,
    /// The opcode byte does not map to any instruction in the generation's ISA table.
    UnknownOpcode = 0x01,
    /// The generation name does not match any supported generation.
    UnknownGeneration = 0x02,
    /// `CONV` ran with `conv_remaining == 0`.
    ConvNumExhausted = 0x03,
    /// `CONVINIT` decoded while the previous conv's `conv_remaining` was still non-zero.
    ConvInitWhileBusy = 0x04,
    /// `CONVADDR`'s `addr_type` field does not match any known entry kind.
    InvalidConvAddrType = 0x05,
    /// A word of `mc_code` does not match what `ac_code` would have encoded.
    CodeMismatch = 0x06,
    /// A bank id is not present in the access whitelist for this op's direction.
    BankNotWhitelisted = 0x07,
    /// A `reg_id` was not present in the program's `reg_id -> size` map.
    RegNotAllocated = 0x08,
    /// A DDR access's `offset + size` exceeds the reg's allocated size.
    DdrOutOfRange = 0x09,
    /// A kernel size or stride fell outside the target's instruction-limit whitelist.
    KernelParamOutOfRange = 0x0a,
    /// `shift_bias` exceeded 20 without being a recognized negative-shift encoding (>= 32).
    ShiftBiasOutOfRange = 0x0b,
    /// The decoded activation kind is not in the target's supported-activation set.
    ActivationUnsupported = 0x0c,
    /// Two operands that must share a dimension (e.g. channel count vs. bank width) disagree.
    DimensionMismatch = 0x0d,
    /// An internal buffer index fell outside its backing allocation.
    BufferOverrun = 0x0e,
    /// An address was not aligned to the required width (HP bus width, 4 KiB reg granularity, ...).
    AlignmentViolation = 0x0f,
    /// Reading or writing a dump trace file failed.
    DumpIoError = 0x10,
    /// `DPUV3ME` `CONV`'s `dest_mode` field was `0`, which is undocumented and rejected.
    UndocumentedDestMode = 0x11,
    /// The `reverse_kernel_iterate` capped-pair reconstruction did not match the logical kernel size.
    KernelIterateMismatch = 0x12,
}

impl fmt::Display for SimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for SimReason {}

impl From<u8> for SimReason {
    fn from(b: u8) -> Self {
        use SimReason::*;
        match b {
            0x01 => UnknownOpcode,
            0x02 => UnknownGeneration,
            0x03 => ConvNumExhausted,
            0x04 => ConvInitWhileBusy,
            0x05 => InvalidConvAddrType,
            0x06 => CodeMismatch,
            0x07 => BankNotWhitelisted,
            0x08 => RegNotAllocated,
            0x09 => DdrOutOfRange,
            0x0a => KernelParamOutOfRange,
            0x0b => ShiftBiasOutOfRange,
            0x0c => ActivationUnsupported,
            0x0d => DimensionMismatch,
            0x0e => BufferOverrun,
            0x0f => AlignmentViolation,
            0x10 => DumpIoError,
            0x11 => UndocumentedDestMode,
            0x12 => KernelIterateMismatch,
            _ => UnknownSimReason,
        }
    }
}
