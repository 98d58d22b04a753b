use crate::field::{FieldMap, FieldStringMap};
use crate::generation::Generation;
use crate::inst_type::InstType;

/// A single decoded instruction.
///
/// Field maps are keyed by the static field name from the ISA table
/// rather than a generated per-opcode struct, because the field set is
/// genuinely per-generation and per-opcode data, not a fixed Rust type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    /// The decoded instruction type.
    pub opcode: InstType,
    /// The generation this instruction was decoded against.
    pub generation: Generation,
    /// Dependency counter: what this instruction depends on.
    pub dpdon: u32,
    /// Dependency counter: what depends on this instruction.
    pub dpdby: u32,
    /// Decoded integer field values, keyed by field name.
    pub field_values: FieldMap,
    /// Decoded symbolic field values, keyed by field name (debug-dump use).
    pub field_strings: FieldStringMap,
    /// Index of this instruction within its program, in decode order.
    pub index: usize,
}

impl Instruction {
    /// Reads an integer field, panicking if the field was not part of
    /// this instruction's spec. Kernel code calls this only for fields
    /// the ISA table guarantees are present for the matched opcode; a
    /// missing field there is a bug in the ISA table, not bad input.
    pub fn field(&self, name: &str) -> u32 {
        *self
            .field_values
            .get(name)
            .unwrap_or_else(|| panic!("instruction {:?} has no field `{name}`", self.opcode))
    }

    /// Reads an integer field, returning `None` if absent -- for fields
    /// that are genuinely optional depending on sub-mode.
    pub fn field_opt(&self, name: &str) -> Option<u32> {
        self.field_values.get(name).copied()
    }

    /// Reads a field as a signed value, sign-extending from `bits` wide.
    pub fn field_signed(&self, name: &str, bits: u32) -> i64 {
        let raw = self.field(name) as i64;
        let sign_bit = 1i64 << (bits - 1);
        if raw & sign_bit != 0 {
            raw - (1i64 << bits)
        } else {
            raw
        }
    }
}
