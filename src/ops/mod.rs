//! Arithmetic kernels: C7 (data movement), C8 (convolution), C9 (ALU /
//! pooling / depthwise / element-wise / BFP), C10 (tile reorder).

pub mod alu;
pub mod bfp;
pub mod conv;
pub mod dwconv;
pub mod elew;
pub mod load_save;
pub mod norm;
pub mod pool;
pub mod tile_reorder;

/// The kind of one `CONVADDR`/`ALUADDR` address-plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    /// Successive input-row base addresses.
    Ifm,
    /// Weight-tile base pointer.
    Wgt,
    /// Bias-tile base pointer.
    Bias,
    /// Successive output-row base addresses.
    Ofm,
    /// Elementwise-fusion input stream (`conv_elewadd_fusion`).
    IfmElew,
}

impl AddrType {
    /// Resolves the ISA's raw `addr_type` field value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => AddrType::Ifm,
            1 => AddrType::Wgt,
            2 => AddrType::Bias,
            3 => AddrType::Ofm,
            4 => AddrType::IfmElew,
            _ => return None,
        })
    }
}

/// One entry accumulated between a `CONVINIT`/`ALUINIT` and its
/// `CONV`/`ALU`.
#[derive(Debug, Clone, Copy)]
pub struct AddrPlanEntry {
    /// Which stream this entry feeds.
    pub addr_type: AddrType,
    /// Number of rows this entry covers.
    pub h_num: u32,
    /// Base bank/DDR address.
    pub mt_addr: u32,
    /// Stride within a row.
    pub jump: u32,
    /// Stride between rows.
    pub jump_endl: u32,
    /// When set on an `OFM` entry, this entry skips `h_num` output rows
    /// instead of describing a write target.
    pub invalid: bool,
}

/// `conv_exec_mode_t` from the original ALU/CONV umbrella dispatch,
/// supplemented in full per `SPEC_FULL.md` E6: only `Conv` and
/// `ConvElewaddFusion` get bit-accurate numeric kernels here; the rest
/// decode but are explicitly rejected at dispatch, rather than
/// silently mis-executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConvExecMode {
    /// Plain convolution.
    Conv,
    /// Fully connected (treated as a conv with 1x1 spatial extent upstream).
    Fc,
    /// Matrix multiply.
    Matmul,
    /// Transposed matrix multiply.
    MatmulT,
    /// Softmax.
    Softmax,
    /// Sigmoid.
    Sigmoid,
    /// Tanh.
    TanH,
    /// Elementwise add fused into the conv datapath.
    Eadd,
    /// Elementwise multiply fused into the conv datapath.
    Emul,
    /// Multiply-accumulate reduction.
    Macc,
    /// Layer normalization.
    LayerNorm,
    /// Gated linear unit.
    Glu,
    /// Gaussian error linear unit.
    Gelu,
    /// Convolution fused with an elementwise-add input stream
    /// (`IFM_ELEW` address-plan entries participate).
    ConvElewaddFusion,
}

impl ConvExecMode {
    /// Resolves the ISA's raw `exec_mode` field value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => ConvExecMode::Conv,
            1 => ConvExecMode::Fc,
            2 => ConvExecMode::Matmul,
            3 => ConvExecMode::MatmulT,
            4 => ConvExecMode::Softmax,
            5 => ConvExecMode::Sigmoid,
            6 => ConvExecMode::TanH,
            7 => ConvExecMode::Eadd,
            8 => ConvExecMode::Emul,
            9 => ConvExecMode::Macc,
            10 => ConvExecMode::LayerNorm,
            11 => ConvExecMode::Glu,
            12 => ConvExecMode::Gelu,
            13 => ConvExecMode::ConvElewaddFusion,
            _ => return None,
        })
    }

    /// Whether this implementation executes `mode` bit-accurately.
    pub const fn is_implemented(self) -> bool {
        matches!(self, ConvExecMode::Conv | ConvExecMode::ConvElewaddFusion)
    }
}

/// `alu_exec_mode_t`, supplemented in full per `SPEC_FULL.md` E6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AluExecMode {
    /// Depthwise convolution.
    Dwcv,
    /// Parametric ReLU.
    Prelu,
    /// Average pool.
    Avepool,
    /// Max pool.
    Maxpool,
    /// Leaky ReLU.
    Leakyrelu,
    /// Max reduce.
    Maxreduce,
    /// Bias-free depthwise convolution.
    Dwcvb0,
    /// Hard sigmoid.
    Hsigmoid,
    /// Depthwise convolution with a 16-wide weight layout and no bias.
    Dwcvw16b0,
    /// Multiply-accumulate.
    Macc,
    /// Comparison.
    Comp,
    /// Elementwise add.
    ElewAdd,
    /// Elementwise multiply.
    ElewMul,
    /// Instance norm, first pass (mean/variance accumulation).
    InstanceNormFirst,
    /// Instance norm, second pass (normalize and scale).
    InstanceNormSecond,
    /// Layer norm.
    LayerNorm,
    /// Generic reduction.
    Reduction,
    /// Elementwise divide.
    ElewDiv,
    /// L2 norm.
    L2Norm,
}

impl AluExecMode {
    /// Resolves the ISA's raw `exec_mode` field value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => AluExecMode::Dwcv,
            1 => AluExecMode::Prelu,
            2 => AluExecMode::Avepool,
            3 => AluExecMode::Maxpool,
            4 => AluExecMode::Leakyrelu,
            5 => AluExecMode::Maxreduce,
            6 => AluExecMode::Dwcvb0,
            7 => AluExecMode::Hsigmoid,
            8 => AluExecMode::Dwcvw16b0,
            9 => AluExecMode::Macc,
            10 => AluExecMode::Comp,
            11 => AluExecMode::ElewAdd,
            12 => AluExecMode::ElewMul,
            13 => AluExecMode::InstanceNormFirst,
            14 => AluExecMode::InstanceNormSecond,
            15 => AluExecMode::LayerNorm,
            16 => AluExecMode::Reduction,
            17 => AluExecMode::ElewDiv,
            18 => AluExecMode::L2Norm,
            _ => return None,
        })
    }
}

/// `pool_type_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Max pool.
    Max,
    /// Average pool (DPU-approximate reciprocal).
    Avg,
    /// Max reduce (degenerate pool over the whole remaining extent).
    MaxReduce,
}

/// `elew_type_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElewKind {
    /// N-way add.
    Add,
    /// N-way multiply.
    Mult,
}

/// The integer range a kernel's final DPU-round + saturate cast targets.
///
/// Fixed-point MAC and activation are carried in 64-bit integers and
/// doubles respectively; only the last cast narrows to the tensor's
/// declared output dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDtype {
    /// Signed 8-bit, `[-128, 127]`.
    Int8,
    /// Unsigned 8-bit, `[0, 255]`.
    UInt8,
    /// Signed 16-bit, `[-32768, 32767]`.
    Int16,
    /// Unsigned 16-bit, `[0, 65535]`.
    UInt16,
    /// Signed 4-bit, `[-8, 7]` (DPU4F).
    Int4,
}

impl OutputDtype {
    /// The inclusive `(min, max)` range this dtype saturates to.
    pub const fn range(self) -> (i64, i64) {
        match self {
            OutputDtype::Int8 => (-128, 127),
            OutputDtype::UInt8 => (0, 255),
            OutputDtype::Int16 => (-32768, 32767),
            OutputDtype::UInt16 => (0, 65535),
            OutputDtype::Int4 => (-8, 7),
        }
    }

    /// Clamps `x` into this dtype's range.
    pub const fn saturate(self, x: i64) -> i64 {
        let (lo, hi) = self.range();
        if x < lo {
            lo
        } else if x > hi {
            hi
        } else {
            x
        }
    }
}
