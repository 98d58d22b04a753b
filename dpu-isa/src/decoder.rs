use std::fmt;

use crate::field::FieldMap;
use crate::generation::Generation;
use crate::instruction::Instruction;
use crate::isa_table::IsaTable;
use crate::sim_reason::SimReason;
use crate::word::{bytes_from_words, words_from_bytes};

/// An error produced while decoding a program's `mc_code` byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte stream's length was not a multiple of 4.
    UnalignedLength { trailing_bytes: usize },
    /// The opcode field did not resolve to a known instruction.
    UnknownOpcode { index: usize, opcode_value: u32 },
    /// The program ended mid-instruction (fewer words remained than `word_count`).
    TruncatedInstruction { index: usize, expected_words: usize, available_words: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnalignedLength { trailing_bytes } => {
                write!(f, "program length leaves {trailing_bytes} trailing byte(s)")
            }
            DecodeError::UnknownOpcode { index, opcode_value } => {
                write!(f, "instruction {index}: unknown opcode 0x{opcode_value:02x}")
            }
            DecodeError::TruncatedInstruction { index, expected_words, available_words } => {
                write!(
                    f,
                    "instruction {index}: expected {expected_words} word(s), only {available_words} remained"
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<&DecodeError> for SimReason {
    fn from(err: &DecodeError) -> Self {
        match err {
            DecodeError::UnalignedLength { .. } => SimReason::AlignmentViolation,
            DecodeError::UnknownOpcode { .. } => SimReason::UnknownOpcode,
            DecodeError::TruncatedInstruction { .. } => SimReason::BufferOverrun,
        }
    }
}

/// Decodes a whole program's `mc_code` byte stream into an ordered
/// sequence of instruction records, preserving program order.
///
/// `dpdon`/`dpdby` are read from fixed fields present on every
/// instruction regardless of opcode (word 0, bits `[16,24)` and
/// `[8,16)` respectively on the baseline encoding), ahead of the
/// opcode-specific field list.
pub fn decode_program(
    bytes: &[u8],
    generation: Generation,
    table: &IsaTable,
) -> Result<Vec<Instruction>, DecodeError> {
    let (words, trailing) = words_from_bytes(bytes);
    if trailing != 0 {
        return Err(DecodeError::UnalignedLength { trailing_bytes: trailing });
    }

    let mut out = Vec::new();
    let mut cursor = 0usize;
    let mut index = 0usize;

    while cursor < words.len() {
        let word0 = words[cursor];
        let opcode_value = table.opcode_value_of(word0);
        let spec = table
            .lookup(opcode_value)
            .ok_or(DecodeError::UnknownOpcode { index, opcode_value })?;

        if cursor + spec.word_count > words.len() {
            return Err(DecodeError::TruncatedInstruction {
                index,
                expected_words: spec.word_count,
                available_words: words.len() - cursor,
            });
        }
        let inst_words = &words[cursor..cursor + spec.word_count];

        let dpdon = crate::word::extract_bits(word0, 16, 8);
        let dpdby = crate::word::extract_bits(word0, 8, 8);

        let mut field_values = FieldMap::new();
        let mut field_strings = crate::field::FieldStringMap::new();
        for field in &spec.fields {
            let value = field.read(inst_words);
            if field.is_symbolic {
                field_strings.insert(field.name, value.to_string());
            }
            field_values.insert(field.name, value);
        }

        out.push(Instruction {
            opcode: spec.inst_type,
            generation,
            dpdon,
            dpdby,
            field_values,
            field_strings,
            index,
        });

        cursor += spec.word_count;
        index += 1;
    }

    Ok(out)
}

/// Re-encodes a decoded instruction back into its raw 32-bit words,
/// the way the decoder would have produced them from `mc_code`.
///
/// Used by the round-trip check in spec.md's testable property 1: each
/// instruction's re-encoding must equal the accompanying `mc_code`
/// byte-for-byte.
pub fn encode_instruction(instruction: &Instruction, table: &IsaTable) -> Vec<u8> {
    let spec = table.spec_for(instruction.opcode).unwrap_or_else(|| {
        panic!("encode_instruction: no spec for {:?} in this table", instruction.opcode)
    });

    let mut words = vec![0u32; spec.word_count];
    if !words.is_empty() {
        words[0] |= spec.opcode_value << 24;
        words[0] |= (instruction.dpdon & 0xff) << 16;
        words[0] |= (instruction.dpdby & 0xff) << 8;
    }
    for field in &spec.fields {
        let value = instruction.field(field.name).wrapping_add(field.minus);
        field.word_map.deposit(&mut words, value);
    }
    bytes_from_words(&words)
}
