//! Input program model (C6 input / §6 external interfaces).

use std::collections::BTreeMap;

use dpu_isa::SimReason;

use crate::error::SimError;

/// One input or output tensor attached to a subgraph.
#[derive(Debug, Clone)]
pub struct TensorAttr {
    /// DDR reg this tensor lives in.
    pub reg_id: u32,
    /// Byte offset within the reg.
    pub ddr_addr: u64,
    /// Free-form placement tag from the descriptor (e.g. `"DDR"`, `"BANK"`).
    pub location: String,
    /// DDR-side strides, arbitrary (not necessarily packed).
    pub stride: Vec<usize>,
    /// Host-side batch shape.
    pub batch_shape: Vec<usize>,
}

/// One child subgraph: one superlayer's assembly and packed machine code.
#[derive(Debug, Clone, Default)]
pub struct ChildSubgraph {
    /// Human-readable assembly-code lines for this superlayer.
    pub ac_code: Vec<String>,
    /// Packed binary machine code, the decoder's actual input.
    pub mc_code: Vec<u8>,
    /// Input tensors attached to this child.
    pub inputs: Vec<TensorAttr>,
    /// Output tensors attached to this child.
    pub outputs: Vec<TensorAttr>,
}

/// A compiled program: `reg_id -> size` map, optional CONST content,
/// the target-selecting fingerprint, and the child subgraphs that
/// actually carry instructions.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    /// Allocation size for every DDR reg this program touches.
    pub reg_sizes: BTreeMap<u32, u64>,
    /// Initial content for `CONST` regs.
    pub const_contents: BTreeMap<u32, Vec<u8>>,
    /// 64-bit fingerprint selecting the target descriptor.
    pub dpu_fingerprint: u64,
    /// Child subgraphs, executed in order.
    pub children: Vec<ChildSubgraph>,
}

impl Subgraph {
    /// Cross-checks each 4-byte word of `mc_code` against what decoding
    /// `ac_code` and re-encoding would have produced. Mismatches are
    /// fatal per spec §6's "Input program" contract.
    pub fn verify_code_consistency(
        &self,
        child_index: usize,
        decode_and_reencode: impl Fn(&[String]) -> Result<Vec<u8>, SimError>,
    ) -> Result<(), SimError> {
        let child = self.children.get(child_index).ok_or_else(|| {
            SimError::new(SimReason::BufferOverrun, 0, format!("no child subgraph {child_index}"))
        })?;
        let reencoded = decode_and_reencode(&child.ac_code)?;
        if reencoded != child.mc_code {
            return Err(SimError::new(
                SimReason::CodeMismatch,
                0,
                format!("child {child_index}: re-encoded ac_code does not match mc_code byte-for-byte"),
            ));
        }
        Ok(())
    }
}
