/// The decoded type of an instruction, independent of its generation's
/// raw opcode encoding.
///
/// Setup ops stash parameters into shared engine state; action ops
/// consume that state and perform the kernel; debug ops are
/// side-effect-only trace dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum InstType {
    /// Convolution parameter setup.
    ConvInit,
    /// Convolution address-plan entry; zero or more per `CONVINIT`.
    ConvAddr,
    /// Convolution execute.
    Conv,
    /// ALU parameter setup.
    AluInit,
    /// ALU address-plan entry.
    AluAddr,
    /// ALU execute (umbrella op, see `exec_mode`).
    Alu,
    /// Pool parameter setup.
    PoolInit,
    /// Pool execute.
    Pool,
    /// 1-D pool execute.
    Pool1d,
    /// Depthwise-conv parameter setup.
    DwInit,
    /// Depthwise-conv execute.
    Dptwise,
    /// Element-wise parameter setup.
    ElewInit,
    /// Element-wise execute.
    Elew,
    /// DDR -> bank tile load.
    Load,
    /// Bank -> DDR tile save.
    Save,
    /// Dump a single bank to a trace file (no correctness effect).
    DumpBank,
    /// Dump the whole DDR image to a trace file (no correctness effect).
    DumpDdr,
    /// Dump a DDR slice to a trace file (no correctness effect).
    DumpDdrSlice,
    /// Program terminator.
    End,
}

impl InstType {
    /// Setup ops stash their fields into shared engine state and have
    /// no direct memory effect of their own.
    pub const fn is_setup(self) -> bool {
        matches!(
            self,
            InstType::ConvInit
                | InstType::ConvAddr
                | InstType::AluInit
                | InstType::AluAddr
                | InstType::PoolInit
                | InstType::DwInit
                | InstType::ElewInit
        )
    }

    /// Action ops invoke a kernel using the most recently stashed setup
    /// state, then clear the pending address plan.
    pub const fn is_action(self) -> bool {
        matches!(
            self,
            InstType::Conv
                | InstType::Alu
                | InstType::Pool
                | InstType::Pool1d
                | InstType::Dptwise
                | InstType::Elew
                | InstType::Load
                | InstType::Save
        )
    }

    /// Debug ops emit trace files and never affect the DDR image.
    pub const fn is_debug(self) -> bool {
        matches!(
            self,
            InstType::DumpBank | InstType::DumpDdr | InstType::DumpDdrSlice
        )
    }
}
