//! `LOAD`/`SAVE` (C7): moves tiles between DDR and banks.

use dpu_isa::SimReason;

use crate::bank::BankStore;
use crate::ddr::DdrStore;
use crate::error::SimError;
use crate::rounding::dpu_round;

/// How a `LOAD`'s destination tile is populated.
#[derive(Debug, Clone, Copy)]
pub enum LoadFill {
    /// Read `block_num` blocks of `length` bytes from DDR, `jump_read`
    /// bytes apart, zero-padding `pad_start`/`pad_end` bytes on each side.
    Ddr {
        /// Bytes of zero padding written before each DDR-sourced block.
        pad_start: usize,
        /// Bytes of zero padding written after each DDR-sourced block.
        pad_end: usize,
        /// When `Some`, padded bytes repeat this value instead of zero
        /// (the ISA's `pad_idx` broadcast-value mode).
        pad_value: Option<u8>,
    },
    /// Fill the whole destination tile with a literal constant byte,
    /// never touching DDR (the ISA's `const_value`/`broadcast` mode).
    Const(u8),
}

/// Parameters for one `LOAD` instruction.
#[derive(Debug, Clone, Copy)]
pub struct LoadParams {
    /// Source DDR reg.
    pub reg_id: u32,
    /// Source DDR byte offset.
    pub ddr_addr: u64,
    /// Destination bank id.
    pub bank_id: u32,
    /// Destination bank line address.
    pub bank_addr: usize,
    /// Bytes read per block (channel width of one row).
    pub length: usize,
    /// Number of rows.
    pub block_num: usize,
    /// Byte stride between successive DDR rows.
    pub jump_read: usize,
    /// Byte stride between successive bank-write rows within a line.
    pub jump_write: usize,
    /// Line stride between successive bank-write rows.
    pub jump_write_endl: usize,
    /// When set, every loaded byte `b` is rescaled to
    /// `round(b * avg_factor / 2^avg_shift)` before the write, the
    /// average-pool-compensation ingress mode.
    pub avg_rescale: Option<(i64, u32)>,
}

/// Executes one `LOAD`: DDR (or a constant) into a bank.
pub fn load(ddr: &DdrStore, banks: &mut BankStore, fill: LoadFill, params: LoadParams) -> Result<(), SimError> {
    let bank_width = banks.width(params.bank_id)?;
    if params.length > bank_width {
        return Err(SimError::with_field(
            SimReason::KernelParamOutOfRange,
            0,
            "length",
            format!("load length {} exceeds bank width {bank_width}", params.length),
        ));
    }

    for block in 0..params.block_num {
        let mut row = vec![0u8; params.length];
        match fill {
            LoadFill::Const(value) => row.fill(value),
            LoadFill::Ddr { pad_start, pad_end, pad_value } => {
                let body_len = params.length.saturating_sub(pad_start + pad_end);
                let offset = params.ddr_addr + (block * params.jump_read) as u64;
                let bytes = ddr.read(params.reg_id, offset, body_len as u64)?;
                if let Some(v) = pad_value {
                    row.fill(v);
                }
                row[pad_start..pad_start + body_len].copy_from_slice(bytes);
            }
        }

        if let Some((factor, shift)) = params.avg_rescale {
            for b in row.iter_mut() {
                let scaled = dpu_round(*b as i64 as f64 * factor as f64 / 2f64.powi(shift as i32));
                *b = scaled.clamp(0.0, 255.0) as u8;
            }
        }

        let line = params.bank_addr + block * params.jump_write_endl.max(1) / bank_width.max(1);
        let col = block * params.jump_write % bank_width.max(1);
        let mut dest = banks.read(params.bank_id, line, bank_width)?.to_vec();
        let n = row.len().min(bank_width - col.min(bank_width));
        dest[col..col + n].copy_from_slice(&row[..n]);
        banks.write(params.bank_id, line, &dest)?;
    }
    Ok(())
}

/// Parameters for one `SAVE` instruction.
#[derive(Debug, Clone, Copy)]
pub struct SaveParams {
    /// Source bank id.
    pub bank_id: u32,
    /// Source bank line address.
    pub bank_addr: usize,
    /// Destination DDR reg.
    pub reg_id: u32,
    /// Destination DDR byte offset.
    pub ddr_addr: u64,
    /// Bytes written per block.
    pub length: usize,
    /// Number of rows.
    pub block_num: usize,
    /// Byte stride between successive DDR rows.
    pub jump_write: usize,
    /// Byte stride between successive bank-read rows within a line.
    pub jump_read: usize,
    /// Line stride between successive bank-read rows.
    pub jump_read_endl: usize,
}

/// How `SAVE` derives its written bytes.
#[derive(Debug, Clone, Copy)]
pub enum SaveMode {
    /// Copies bytes straight through.
    Copy,
    /// Writes a literal constant (`const_en`), never touching the bank.
    Const(u8),
    /// Replaces the channel dimension with the index (as a byte) of the
    /// greatest channel value per spatial position, `channels`-wide.
    ///
    /// Tie-break on equal maxima is an open question upstream (see
    /// `DESIGN.md`); this picks the first (lowest-index) maximum.
    ArgMax {
        /// Channel count each block is read as, for the reduction.
        channels: usize,
    },
}

/// Executes one `SAVE`: a bank (or a constant) into DDR. Every written
/// byte range is marked used via [`DdrStore::mark_used`].
pub fn save(banks: &BankStore, ddr: &mut DdrStore, mode: SaveMode, params: SaveParams) -> Result<(), SimError> {
    let bank_width = banks.width(params.bank_id)?;

    for block in 0..params.block_num {
        let line = params.bank_addr + block * params.jump_read_endl.max(1) / bank_width.max(1);
        let col = block * params.jump_read % bank_width.max(1);

        let row = match mode {
            SaveMode::Const(v) => vec![v; params.length],
            SaveMode::Copy => {
                let src = banks.read(params.bank_id, line, bank_width)?;
                let n = params.length.min(bank_width - col.min(bank_width));
                src[col..col + n].to_vec()
            }
            SaveMode::ArgMax { channels } => {
                let src = banks.read(params.bank_id, line, bank_width)?;
                let n = (channels).min(bank_width - col.min(bank_width));
                let window = &src[col..col + n];
                let mut best_idx = 0u8;
                let mut best_val = window.first().copied().unwrap_or(0);
                for (idx, &v) in window.iter().enumerate().skip(1) {
                    if v > best_val {
                        best_val = v;
                        best_idx = idx as u8;
                    }
                }
                vec![best_idx; params.length]
            }
        };

        let offset = params.ddr_addr + (block * params.jump_write) as u64;
        ddr.write(params.reg_id, offset, &row)?;
        ddr.mark_used(params.reg_id, offset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{BankGroup, BankGroupKind, TargetParams};
    use dpu_isa::Generation;
    use std::collections::{BTreeMap, BTreeSet};

    fn target() -> TargetParams {
        TargetParams {
            generation: Generation::DpuV2,
            processor_type: "test".into(),
            hp_width: 16,
            bank_groups: vec![BankGroup {
                name: "IFM0".into(),
                kind: BankGroupKind::Ifm,
                base_bank_id: 0,
                bank_num: 1,
                bank_width: 16,
                bank_depth: 4,
            }],
            access_whitelist_sources: BTreeMap::new(),
            instr_limit_sources: BTreeMap::new(),
            supported_activations: BTreeSet::new(),
            icp: 16,
            ocp: 16,
            ohp: 1,
            owp: 1,
        }
    }

    #[test]
    fn load_const_fills_destination_without_touching_ddr() {
        let ddr = DdrStore::new(16);
        let mut banks = BankStore::from_target(&target());
        let params = LoadParams {
            reg_id: 0,
            ddr_addr: 0,
            bank_id: 0,
            bank_addr: 0,
            length: 16,
            block_num: 1,
            jump_read: 0,
            jump_write: 0,
            jump_write_endl: 16,
            avg_rescale: None,
        };
        load(&ddr, &mut banks, LoadFill::Const(7), params).unwrap();
        assert_eq!(banks.read(0, 0, 16).unwrap(), [7u8; 16]);
    }

    #[test]
    fn load_from_ddr_round_trips() {
        let mut ddr = DdrStore::initial([(0, 4096)], [], 16);
        ddr.write(0, 0, &(0..16).collect::<Vec<u8>>()).unwrap();
        let mut banks = BankStore::from_target(&target());
        let params = LoadParams {
            reg_id: 0,
            ddr_addr: 0,
            bank_id: 0,
            bank_addr: 0,
            length: 16,
            block_num: 1,
            jump_read: 16,
            jump_write: 0,
            jump_write_endl: 16,
            avg_rescale: None,
        };
        load(&ddr, &mut banks, LoadFill::Ddr { pad_start: 0, pad_end: 0, pad_value: None }, params).unwrap();
        assert_eq!(banks.read(0, 0, 16).unwrap(), &(0..16).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn save_marks_written_region_used() {
        let mut banks = BankStore::from_target(&target());
        banks.write(0, 0, &[9u8; 16]).unwrap();
        let mut ddr = DdrStore::initial([(0, 4096)], [], 16);
        let params = SaveParams {
            bank_id: 0,
            bank_addr: 0,
            reg_id: 0,
            ddr_addr: 0,
            length: 16,
            block_num: 1,
            jump_write: 16,
            jump_read: 0,
            jump_read_endl: 16,
        };
        save(&banks, &mut ddr, SaveMode::Copy, params).unwrap();
        assert_eq!(ddr.read(0, 0, 16).unwrap(), [9u8; 16]);
    }

    #[test]
    fn save_argmax_picks_first_max_index() {
        let mut banks = BankStore::from_target(&target());
        banks.write(0, 0, &[1, 5, 5, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let mut ddr = DdrStore::initial([(0, 4096)], [], 16);
        let params = SaveParams {
            bank_id: 0,
            bank_addr: 0,
            reg_id: 0,
            ddr_addr: 0,
            length: 1,
            block_num: 1,
            jump_write: 1,
            jump_read: 0,
            jump_read_endl: 16,
        };
        save(&banks, &mut ddr, SaveMode::ArgMax { channels: 4 }, params).unwrap();
        assert_eq!(ddr.read(0, 0, 1).unwrap(), [1]);
    }
}
