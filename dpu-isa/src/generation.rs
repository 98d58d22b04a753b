/// A supported DPU accelerator generation.
///
/// Every other entity in the simulator -- target parameters, the ISA
/// table, the instruction decoder, the kernels themselves -- is
/// parameterized by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum Generation {
    /// DPUv2, the general-purpose baseline generation.
    DpuV2,
    /// DPUv3e.
    DpuV3e,
    /// DPUv3me, adds CB/HBM dual-destination store.
    DpuV3me,
    /// DPUv4e, adds multi-batch packing inside one `CONV`.
    DpuV4e,
    /// DPU4F, 4-bit ("nibble") weights and activations.
    Dpu4f,
    /// XVDPU.
    XvDpu,
    /// XV2DPU, adds kernel-reversal address reconstruction.
    Xv2Dpu,
    /// XV3DPU, same kernel-reversal family as XV2DPU.
    Xv3Dpu,
}

impl Generation {
    /// All generations this crate knows the name of, in a stable order.
    pub const ALL: [Generation; 8] = [
        Generation::DpuV2,
        Generation::DpuV3e,
        Generation::DpuV3me,
        Generation::DpuV4e,
        Generation::Dpu4f,
        Generation::XvDpu,
        Generation::Xv2Dpu,
        Generation::Xv3Dpu,
    ];

    /// Short name as it appears in subgraph fingerprints / config files.
    pub const fn name(self) -> &'static str {
        match self {
            Generation::DpuV2 => "DPUV2",
            Generation::DpuV3e => "DPUV3E",
            Generation::DpuV3me => "DPUV3ME",
            Generation::DpuV4e => "DPUV4E",
            Generation::Dpu4f => "DPU4F",
            Generation::XvDpu => "XVDPU",
            Generation::Xv2Dpu => "XV2DPU",
            Generation::Xv3Dpu => "XV3DPU",
        }
    }

    /// Whether this generation reconstructs kernel size from
    /// `kh_iter`/`kw_iter` via `reverse_kernel_iterate` (spec open question).
    pub const fn reverses_kernel_iterate(self) -> bool {
        matches!(self, Generation::Xv2Dpu | Generation::Xv3Dpu)
    }

    /// Whether `CONV` packs multiple batches side by side via `batch_num`.
    pub const fn supports_batch_packing(self) -> bool {
        matches!(self, Generation::DpuV4e)
    }

    /// Whether bank storage is nibble-packed (two 4-bit values per byte).
    pub const fn is_nibble_packed(self) -> bool {
        matches!(self, Generation::Dpu4f)
    }
}

impl core::str::FromStr for Generation {
    type Err = crate::SimReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Generation::ALL
            .into_iter()
            .find(|g| g.name().eq_ignore_ascii_case(s))
            .ok_or(crate::SimReason::UnknownGeneration)
    }
}
