//! DDR store (C2): a variable set of named byte buffers ("regs").

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use dpu_isa::SimReason;

use crate::consts::{DDR_ALIGN, LINE_GRANULARITY_FACTOR};
use crate::error::{EngineError, SimError};

/// One DDR region: `{id, size, data, used, used-line set}`.
///
/// Invariant: `size % 4096 == 0`.
#[derive(Debug, Clone)]
pub struct Reg {
    id: u32,
    data: Vec<u8>,
    used: bool,
    used_lines: BTreeSet<u64>,
}

impl Reg {
    fn new(id: u32, size: u64) -> Self {
        debug_assert_eq!(size % DDR_ALIGN, 0, "reg size must be 4 KiB aligned");
        Self { id, data: vec![0u8; size as usize], used: false, used_lines: BTreeSet::new() }
    }
}

/// The output format for a DDR dump, per spec §6's persisted-state
/// formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// One decimal integer per line, padded.
    Dec,
    /// Raw bytes.
    Bin,
    /// Fixed-width hex lines, little-endian byte order within a line.
    HexContSmallEnd,
    /// Fixed-width hex lines, big-endian byte order within a line.
    HexContBigEnd,
    /// `HexContSmallEnd` with a `<reg>-<offset>:` prefix on every line.
    HexContSmallEndDdrAddr,
    /// `HexContBigEnd` with a `<bank>-<addr>:` prefix on every line.
    HexContBigEndBankAddr,
}

/// Variable set of named byte buffers ("regs"), each 4 KiB-aligned;
/// random-access read/write; initial-value seeding; save/restore.
///
/// All operations are single-threaded with respect to the execution
/// engine -- there is no internal locking.
#[derive(Debug, Default)]
pub struct DdrStore {
    regs: BTreeMap<u32, Reg>,
    hp_width: usize,
}

impl DdrStore {
    /// Creates an empty store with the given HP bus width.
    pub fn new(hp_width: usize) -> Self {
        Self { regs: BTreeMap::new(), hp_width }
    }

    /// Allocates a zeroed buffer of `ceil(size/4096)*4096` bytes for
    /// every `reg_id -> size` entry, then copies in any provided CONST
    /// content. Mirrors spec §4.2's `initial(subgraph)`.
    pub fn initial<'a>(
        reg_sizes: impl IntoIterator<Item = (u32, u64)>,
        const_contents: impl IntoIterator<Item = (u32, &'a [u8])>,
        hp_width: usize,
    ) -> Self {
        let mut store = Self::new(hp_width);
        for (id, size) in reg_sizes {
            let aligned = size.div_ceil(DDR_ALIGN) * DDR_ALIGN;
            store.regs.insert(id, Reg::new(id, aligned));
        }
        for (id, bytes) in const_contents {
            if let Some(reg) = store.regs.get_mut(&id) {
                let n = bytes.len().min(reg.data.len());
                reg.data[..n].copy_from_slice(&bytes[..n]);
            }
        }
        store
    }

    /// Bytes allocated for `reg_id`.
    pub fn get_size(&self, reg_id: u32) -> Result<u64, SimError> {
        self.regs
            .get(&reg_id)
            .map(|r| r.data.len() as u64)
            .ok_or_else(|| SimError::new(SimReason::RegNotAllocated, 0, format!("reg {reg_id} not allocated")))
    }

    fn check_bounds(&self, reg_id: u32, offset: u64, len: u64) -> Result<&Reg, SimError> {
        let reg = self
            .regs
            .get(&reg_id)
            .ok_or_else(|| SimError::new(SimReason::RegNotAllocated, 0, format!("reg {reg_id} not allocated")))?;
        let size = reg.data.len() as u64;
        if offset.checked_add(len).map(|end| end > size).unwrap_or(true) {
            return Err(SimError::new(
                SimReason::DdrOutOfRange,
                0,
                format!("reg {reg_id}: offset {offset} + size {len} exceeds {size}"),
            ));
        }
        Ok(reg)
    }

    /// Reads `len` bytes at `(reg_id, offset)`.
    pub fn read(&self, reg_id: u32, offset: u64, len: u64) -> Result<&[u8], SimError> {
        self.check_bounds(reg_id, offset, len)?;
        let reg = &self.regs[&reg_id];
        Ok(&reg.data[offset as usize..(offset + len) as usize])
    }

    /// Writes `bytes` at `(reg_id, offset)` and marks the written lines used.
    pub fn write(&mut self, reg_id: u32, offset: u64, bytes: &[u8]) -> Result<(), SimError> {
        self.check_bounds(reg_id, offset, bytes.len() as u64)?;
        let hp_width = self.hp_width;
        let reg = self.regs.get_mut(&reg_id).expect("checked above");
        let start = offset as usize;
        reg.data[start..start + bytes.len()].copy_from_slice(bytes);
        reg.used = true;
        drop(reg);
        self.mark_used(reg_id, offset)?;
        let _ = hp_width;
        Ok(())
    }

    /// Records the coarse line of a DDR write, at `hp_width * 16` granularity.
    pub fn mark_used(&mut self, reg_id: u32, offset: u64) -> Result<(), SimError> {
        let line_bytes = self.hp_width as u64 * LINE_GRANULARITY_FACTOR;
        let reg = self
            .regs
            .get_mut(&reg_id)
            .ok_or_else(|| SimError::new(SimReason::RegNotAllocated, 0, format!("reg {reg_id} not allocated")))?;
        reg.used_lines.insert(offset / line_bytes.max(1));
        Ok(())
    }

    fn format_line(bytes: &[u8], format: DumpFormat, prefix: Option<String>) -> String {
        let hex = |bytes: &[u8], reverse: bool| -> String {
            let mut bytes = bytes.to_vec();
            if reverse {
                bytes.reverse();
            }
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        };
        let body = match format {
            DumpFormat::Dec => bytes.iter().map(|b| format!("{b:3}")).collect::<Vec<_>>().join(" "),
            DumpFormat::Bin => String::new(),
            DumpFormat::HexContSmallEnd | DumpFormat::HexContSmallEndDdrAddr => hex(bytes, true),
            DumpFormat::HexContBigEnd | DumpFormat::HexContBigEndBankAddr => hex(bytes, false),
        };
        match prefix {
            Some(p) => format!("{p} : {body}"),
            None => body,
        }
    }

    /// Dumps each reg in `format` to `path`. `skip_code_regs` excludes
    /// regs flagged as holding instruction code rather than tensor data.
    pub fn save_all(
        &self,
        path: &Path,
        format: DumpFormat,
        skip_code_regs: &BTreeSet<u32>,
    ) -> Result<(), EngineError> {
        let mut file = std::fs::File::create(path)?;
        for (id, reg) in &self.regs {
            if skip_code_regs.contains(id) {
                continue;
            }
            if format == DumpFormat::Bin {
                file.write_all(&reg.data)?;
                continue;
            }
            for (line_idx, chunk) in reg.data.chunks(self.hp_width.max(1)).enumerate() {
                let prefix = match format {
                    DumpFormat::HexContSmallEndDdrAddr | DumpFormat::HexContBigEndBankAddr => {
                        Some(format!("{id}-{:010x}", line_idx * self.hp_width.max(1)))
                    }
                    _ => None,
                };
                writeln!(file, "{}", Self::format_line(chunk, format, prefix))?;
            }
        }
        Ok(())
    }

    /// Partial dump of `[(reg_id, offset, size), ...]`; offsets are
    /// rounded down to HP width, sizes rounded up.
    pub fn save_slice(
        &self,
        path: &Path,
        slices: &[(u32, u64, u64)],
        format: DumpFormat,
    ) -> Result<(), EngineError> {
        let mut file = std::fs::File::create(path)?;
        let hp = self.hp_width.max(1) as u64;
        for &(reg_id, offset, size) in slices {
            let aligned_offset = (offset / hp) * hp;
            let aligned_end = (offset + size).div_ceil(hp) * hp;
            let reg = self.regs.get(&reg_id).ok_or_else(|| {
                EngineError::Fatal(SimError::new(SimReason::RegNotAllocated, 0, format!("reg {reg_id} not allocated")))
            })?;
            let end = aligned_end.min(reg.data.len() as u64);
            for chunk_start in (aligned_offset..end).step_by(hp as usize) {
                let chunk_end = (chunk_start + hp).min(end);
                let chunk = &reg.data[chunk_start as usize..chunk_end as usize];
                let prefix = match format {
                    DumpFormat::HexContSmallEndDdrAddr | DumpFormat::HexContBigEndBankAddr => {
                        Some(format!("{reg_id}-{chunk_start:010x}"))
                    }
                    _ => None,
                };
                writeln!(file, "{}", Self::format_line(chunk, format, prefix))?;
            }
        }
        Ok(())
    }
}
