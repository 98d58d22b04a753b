use std::collections::BTreeMap;

use crate::field::{BitSlice, FieldSpec, FieldWordMap};
use crate::generation::Generation;
use crate::inst_type::InstType;
use crate::word::extract_bits;

/// Shorthand for one non-symbolic, single-word field.
fn f(name: &'static str, word_index: usize, pos: u32, len: u32) -> FieldSpec {
    FieldSpec { name, word_map: FieldWordMap::single(word_index, pos, len), minus: 0, is_symbolic: false }
}

/// Static description of one instruction: its opcode value, its word
/// count, and its field list with bit position/length and data type.
#[derive(Debug, Clone)]
pub struct InstSpec {
    /// Raw opcode value as it appears in the opcode field.
    pub opcode_value: u32,
    /// Decoded instruction type.
    pub inst_type: InstType,
    /// Number of 32-bit words this instruction occupies.
    pub word_count: usize,
    /// Ordered field list.
    pub fields: Vec<FieldSpec>,
}

/// Per-generation static description of every instruction: opcode,
/// word count, and field list with bit position/length and data type.
///
/// The opcode field's own position/length is generation-specific (it
/// is always the high bits of word 0 in every generation this crate
/// supports, but the exact width varies), so it is stored alongside
/// the per-opcode table rather than hard-coded in the decoder.
#[derive(Debug, Clone)]
pub struct IsaTable {
    generation: Generation,
    opcode_slice: BitSlice,
    by_opcode: BTreeMap<u32, InstSpec>,
}

impl IsaTable {
    /// Builds an empty table for `generation` whose opcode field is the
    /// bit-slice `opcode_slice` of word 0.
    pub fn new(generation: Generation, opcode_slice: BitSlice) -> Self {
        Self { generation, opcode_slice, by_opcode: BTreeMap::new() }
    }

    /// Registers one instruction's spec, keyed by its opcode value.
    pub fn insert(&mut self, spec: InstSpec) {
        self.by_opcode.insert(spec.opcode_value, spec);
    }

    /// The generation this table describes.
    pub fn generation(self) -> Generation {
        self.generation
    }

    /// Reads the raw opcode value out of an instruction's first word.
    pub fn opcode_value_of(&self, word0: u32) -> u32 {
        extract_bits(word0, self.opcode_slice.pos, self.opcode_slice.len)
    }

    /// Looks up the spec for a raw opcode value.
    pub fn lookup(&self, opcode_value: u32) -> Option<&InstSpec> {
        self.by_opcode.get(&opcode_value)
    }

    /// Finds the spec whose `inst_type` matches, for re-encoding a
    /// decoded instruction back to its opcode value and field layout.
    pub fn spec_for(&self, inst_type: InstType) -> Option<&InstSpec> {
        self.by_opcode.values().find(|spec| spec.inst_type == inst_type)
    }

    /// Builds the instruction table for `generation`: the common
    /// DPUV2-family layout, widened with whatever extra fields that
    /// generation's `CONVINIT`/`CONV` carry (spec §4.1's "per-generation
    /// instruction format" requirement). Every generation shares the
    /// same opcode slice -- 32-bit opcodes in the high byte of word 0
    /// (bits 24..32), the same field-packing shape `fuel_asm::Instruction`
    /// uses for its own single-byte opcode -- only the field lists and
    /// word counts of a handful of opcodes vary.
    pub fn for_generation(generation: Generation) -> Self {
        let mut table = Self::common(generation);
        if generation.supports_batch_packing() {
            Self::add_batch_packing_fields(&mut table);
        }
        if generation.reverses_kernel_iterate() {
            Self::add_kernel_iterate_fields(&mut table);
        }
        if generation.is_nibble_packed() {
            Self::add_calt_mode_field(&mut table);
        }
        table
    }

    /// `DPUV4E` packs multiple batches side by side inside one `CONV`;
    /// `CONVINIT` grows a trailing word carrying `batch_num`/`stride_batch`.
    fn add_batch_packing_fields(table: &mut Self) {
        let spec = table.by_opcode.get_mut(&0x10).expect("ConvInit registered");
        spec.word_count = 7;
        spec.fields.push(f("batch_num", 6, 24, 8));
        spec.fields.push(f("stride_batch", 6, 8, 16));
    }

    /// `XV2DPU`/`XV3DPU` reconstruct kernel size from `kh_iter`/`kw_iter`
    /// rather than carrying `kernel_h`/`kernel_w` directly (spec's
    /// `reverse_kernel_iterate` open question); `CONVINIT` grows a
    /// trailing word carrying the two iterate counts.
    fn add_kernel_iterate_fields(table: &mut Self) {
        let spec = table.by_opcode.get_mut(&0x10).expect("ConvInit registered");
        spec.word_count = spec.word_count.max(7);
        spec.fields.push(f("kh_iter", 6, 4, 4));
        spec.fields.push(f("kw_iter", 6, 0, 4));
    }

    /// `DPU4F`'s 4-bit weights/activations need a `calt_mode` selector on
    /// `CONV` to pick the nibble-packing layout (spec's nibble-addressing
    /// open question).
    fn add_calt_mode_field(table: &mut Self) {
        let spec = table.by_opcode.get_mut(&0x12).expect("Conv registered");
        spec.word_count = 2;
        spec.fields.push(FieldSpec { name: "calt_mode", word_map: FieldWordMap::single(1, 0, 2), minus: 0, is_symbolic: true });
    }

    /// Builds the shared DPUV2-family table every generation starts
    /// from, before per-generation deltas are layered on top.
    fn common(generation: Generation) -> Self {
        let mut table = Self::new(generation, BitSlice { word_index: 0, pos: 24, len: 8 });

        table.insert(InstSpec {
            opcode_value: 0x10,
            inst_type: InstType::ConvInit,
            word_count: 6,
            fields: vec![
                f("kernel_h", 0, 12, 6),
                f("kernel_w", 0, 6, 6),
                f("stride_h", 0, 0, 6),
                f("stride_w", 1, 26, 6),
                f("ic_iter", 1, 20, 6),
                f("oc_iter", 1, 14, 6),
                f("oh_iter", 1, 8, 6),
                f("ow_iter", 1, 2, 6),
                f("tile_icg", 2, 26, 6),
                f("tile_ocg", 2, 20, 6),
                f("tile_ohg", 2, 14, 6),
                f("tile_owg", 2, 8, 6),
                f("pad_left", 2, 2, 6),
                f("pad_right", 3, 26, 6),
                f("pad_top", 3, 20, 6),
                f("pad_bottom", 3, 14, 6),
                f("conv_num", 3, 2, 12),
                FieldSpec { name: "exec_mode", word_map: FieldWordMap::single(1, 0, 2), minus: 0, is_symbolic: true },
                f("prelu_in", 4, 16, 16),
                f("prelu_shift", 4, 10, 6),
                f("hsigmoid_in", 4, 4, 6),
                f("shift_hsigmoid", 5, 26, 6),
                f("shift_hswish", 5, 20, 6),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x11,
            inst_type: InstType::ConvAddr,
            word_count: 2,
            fields: vec![
                FieldSpec { name: "addr_type", word_map: FieldWordMap::single(0, 22, 2), minus: 0, is_symbolic: true },
                f("h_num", 0, 16, 6),
                f("invalid", 0, 15, 1),
                f("jump", 0, 8, 7),
                f("jump_endl", 0, 0, 8),
                f("mt_addr", 1, 0, 32),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x12,
            inst_type: InstType::Conv,
            word_count: 1,
            fields: vec![
                f("shift_bias", 0, 18, 6),
                f("shift_cut", 0, 12, 6),
                FieldSpec { name: "act_type", word_map: FieldWordMap::single(0, 8, 4), minus: 0, is_symbolic: true },
                f("tile_en", 0, 7, 1),
                f("dest_mode", 0, 5, 2),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x20,
            inst_type: InstType::Load,
            word_count: 4,
            fields: vec![
                f("bank_id", 0, 16, 8),
                f("bank_addr", 0, 0, 16),
                f("channel", 1, 24, 8),
                f("length", 1, 12, 12),
                f("block_num", 1, 0, 12),
                f("jump_read", 2, 16, 16),
                f("jump_write", 2, 0, 16),
                f("jump_write_endl", 3, 16, 16),
                f("reg_id", 3, 8, 8),
                f("const_en", 3, 7, 1),
                f("const_value", 3, 0, 7),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x21,
            inst_type: InstType::Save,
            word_count: 4,
            fields: vec![
                f("bank_id", 0, 16, 8),
                f("bank_addr", 0, 0, 16),
                f("channel", 1, 24, 8),
                f("length", 1, 12, 12),
                f("block_num", 1, 0, 12),
                f("jump_read", 2, 16, 16),
                f("jump_write", 2, 0, 16),
                f("reg_id", 3, 16, 8),
                f("argmax", 3, 8, 1),
                f("const_en", 3, 7, 1),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x30,
            inst_type: InstType::PoolInit,
            word_count: 2,
            fields: vec![
                f("kernel_h", 0, 20, 6),
                f("kernel_w", 0, 14, 6),
                f("stride_h", 0, 8, 6),
                f("stride_w", 0, 2, 6),
                FieldSpec { name: "pool_type", word_map: FieldWordMap::single(1, 28, 2), minus: 0, is_symbolic: true },
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x31,
            inst_type: InstType::Pool,
            word_count: 1,
            fields: vec![f("shift_cut", 0, 8, 6)],
        });

        table.insert(InstSpec {
            opcode_value: 0x40,
            inst_type: InstType::ElewInit,
            word_count: 1,
            fields: vec![
                FieldSpec { name: "elew_type", word_map: FieldWordMap::single(0, 16, 2), minus: 0, is_symbolic: true },
                f("num", 0, 8, 4),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x41,
            inst_type: InstType::Elew,
            word_count: 1,
            fields: vec![f("shift_write", 0, 8, 6)],
        });

        table.insert(InstSpec {
            opcode_value: 0x50,
            inst_type: InstType::AluInit,
            word_count: 2,
            fields: vec![
                FieldSpec { name: "exec_mode", word_map: FieldWordMap::single(0, 24, 5), minus: 0, is_symbolic: true },
                f("kernel_h", 0, 18, 6),
                f("kernel_w", 0, 12, 6),
                f("stride_h", 0, 6, 6),
                f("stride_w", 0, 0, 6),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x51,
            inst_type: InstType::AluAddr,
            word_count: 2,
            fields: vec![
                f("h_num", 0, 16, 6),
                f("jump", 0, 8, 7),
                f("jump_endl", 0, 0, 8),
                f("mt_addr", 1, 0, 32),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x52,
            inst_type: InstType::Alu,
            word_count: 1,
            fields: vec![f("shift_cut", 0, 8, 6)],
        });

        table.insert(InstSpec {
            opcode_value: 0x60,
            inst_type: InstType::DwInit,
            word_count: 3,
            fields: vec![
                f("kernel_h", 0, 20, 6),
                f("kernel_w", 0, 14, 6),
                f("stride_h", 0, 8, 6),
                f("stride_w", 0, 2, 6),
                f("prelu_in", 1, 16, 16),
                f("prelu_shift", 1, 10, 6),
                f("hsigmoid_in", 1, 4, 6),
                f("shift_hsigmoid", 2, 26, 6),
                f("shift_hswish", 2, 20, 6),
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0x61,
            inst_type: InstType::Dptwise,
            word_count: 1,
            fields: vec![
                f("shift_bias", 0, 18, 6),
                f("shift_cut", 0, 12, 6),
                FieldSpec { name: "act_type", word_map: FieldWordMap::single(0, 8, 4), minus: 0, is_symbolic: true },
            ],
        });

        table.insert(InstSpec {
            opcode_value: 0xe0,
            inst_type: InstType::DumpBank,
            word_count: 1,
            fields: vec![f("bank_id", 0, 0, 8)],
        });
        table.insert(InstSpec {
            opcode_value: 0xe1,
            inst_type: InstType::DumpDdr,
            word_count: 1,
            fields: vec![],
        });
        table.insert(InstSpec {
            opcode_value: 0xe2,
            inst_type: InstType::DumpDdrSlice,
            word_count: 2,
            fields: vec![f("reg_id", 0, 0, 8)],
        });

        table.insert(InstSpec {
            opcode_value: 0xff,
            inst_type: InstType::End,
            word_count: 1,
            fields: vec![],
        });

        table
    }
}
