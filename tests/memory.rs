//! Integration coverage for the DDR <-> bank memory model (C2/C3) and
//! the `LOAD`/`SAVE` kernels (C7) that move tiles between them.

use dpu_sim::bank::BankStore;
use dpu_sim::ddr::DdrStore;
use dpu_sim::ops::load_save::{load, save, LoadFill, LoadParams, SaveMode, SaveParams};
use dpu_sim::target::{BankGroup, BankGroupKind, TargetParams};
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
            bank_num: 2,
            bank_width: 16,
            bank_depth: 8,
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
fn ddr_to_bank_to_ddr_round_trips_through_a_different_register() {
    let mut ddr = DdrStore::initial([(0, 4096), (1, 4096)], [], 16);
    let payload: Vec<u8> = (0..64u8).collect();
    ddr.write(0, 0, &payload).unwrap();

    let mut banks = BankStore::from_target(&target());
    let load_params = LoadParams {
        reg_id: 0,
        ddr_addr: 0,
        bank_id: 0,
        bank_addr: 0,
        length: 16,
        block_num: 4,
        jump_read: 16,
        jump_write: 0,
        jump_write_endl: 16,
        avg_rescale: None,
    };
    load(&ddr, &mut banks, LoadFill::Ddr { pad_start: 0, pad_end: 0, pad_value: None }, load_params).unwrap();
    for block in 0..4 {
        assert_eq!(banks.read(0, block, 16).unwrap(), &payload[block * 16..block * 16 + 16]);
    }

    let save_params = SaveParams {
        bank_id: 0,
        bank_addr: 0,
        reg_id: 1,
        ddr_addr: 0,
        length: 16,
        block_num: 4,
        jump_write: 16,
        jump_read: 0,
        jump_read_endl: 16,
    };
    save(&banks, &mut ddr, SaveMode::Copy, save_params).unwrap();
    assert_eq!(ddr.read(1, 0, 64).unwrap(), &payload[..]);
}

#[test]
fn save_marks_every_written_block_used_not_just_the_first() {
    let mut banks = BankStore::from_target(&target());
    for line in 0..4 {
        banks.write(0, line, &[line as u8 + 1; 16]).unwrap();
    }
    let mut ddr = DdrStore::initial([(0, 4096)], [], 16);
    let params = SaveParams {
        bank_id: 0,
        bank_addr: 0,
        reg_id: 0,
        ddr_addr: 0,
        length: 16,
        block_num: 4,
        jump_write: 16,
        jump_read: 0,
        jump_read_endl: 16,
    };
    save(&banks, &mut ddr, SaveMode::Copy, params).unwrap();
    for block in 0..4 {
        assert_eq!(ddr.read(0, (block * 16) as u64, 16).unwrap(), [block as u8 + 1; 16]);
    }
}

#[test]
fn bank_writes_wrap_on_depth_and_load_respects_it() {
    let mut ddr = DdrStore::initial([(0, 4096)], [], 16);
    ddr.write(0, 0, &[9u8; 16]).unwrap();
    let mut banks = BankStore::from_target(&target());
    let params = LoadParams {
        reg_id: 0,
        ddr_addr: 0,
        bank_id: 0,
        bank_addr: 8, // bank_depth is 8, so this wraps to line 0
        length: 16,
        block_num: 1,
        jump_read: 0,
        jump_write: 0,
        jump_write_endl: 16,
        avg_rescale: None,
    };
    load(&ddr, &mut banks, LoadFill::Ddr { pad_start: 0, pad_end: 0, pad_value: None }, params).unwrap();
    assert_eq!(banks.read(0, 0, 16).unwrap(), [9u8; 16]);
}

#[test]
fn load_const_never_touches_an_unallocated_ddr_reg() {
    let ddr = DdrStore::new(16);
    let mut banks = BankStore::from_target(&target());
    let params = LoadParams {
        reg_id: 99,
        ddr_addr: 0,
        bank_id: 1,
        bank_addr: 0,
        length: 16,
        block_num: 1,
        jump_read: 0,
        jump_write: 0,
        jump_write_endl: 16,
        avg_rescale: None,
    };
    load(&ddr, &mut banks, LoadFill::Const(3), params).unwrap();
    assert_eq!(banks.read(1, 0, 16).unwrap(), [3u8; 16]);
}
