//! Bit-packed instruction formats for the DPU accelerator family.
//!
//! This crate owns the pieces that are generation-agnostic bit
//! plumbing: the [`Generation`] tag, the [`InstType`] opcode space, the
//! [`Instruction`] record produced by decoding, and the [`SimReason`]
//! error taxonomy shared with the interpreter crate. It does not know
//! how to execute an instruction -- only how to recognize and carry one.

#![warn(missing_docs)]

mod decoder;
mod field;
mod generation;
mod inst_type;
mod instruction;
mod isa_table;
mod sim_reason;
mod word;

pub use decoder::{decode_program, encode_instruction, DecodeError};
pub use field::{FieldMap, FieldSpec, FieldStringMap, FieldValue, FieldWordMap};
pub use generation::Generation;
pub use inst_type::InstType;
pub use instruction::Instruction;
pub use isa_table::{InstSpec, IsaTable};
pub use sim_reason::SimReason;
pub use word::extract_bits;
