//! Testable property 1: decoding a program and re-encoding every
//! instruction must reproduce the original `mc_code` byte-for-byte.

use dpu_isa::{decode_program, encode_instruction, Generation, InstType, IsaTable};

fn roundtrip(bytes: &[u8], table: &IsaTable) {
    let decoded = decode_program(bytes, Generation::DpuV2, table).expect("decode must succeed");
    let mut reencoded = Vec::new();
    for inst in &decoded {
        reencoded.extend(encode_instruction(inst, table));
    }
    assert_eq!(reencoded, bytes);
}

#[test]
fn conv_init_addr_conv_end_program_round_trips() {
    let table = IsaTable::for_generation(Generation::DpuV2);

    // CONVINIT: opcode 0x10, 6 words (the last two carry the activation
    // parameters, left zero here).
    let mut conv_init = [0u32; 6];
    conv_init[0] = (0x10 << 24) | (3 << 12) | (3 << 6) | 1; // kernel_h=3 kernel_w=3 stride_h=1
    conv_init[1] = (1 << 26) | (16 << 20) | (16 << 14) | (1 << 8) | (1 << 2); // stride_w ic_iter oc_iter oh_iter ow_iter
    conv_init[2] = (1 << 26) | (1 << 20) | (1 << 14) | (1 << 8); // tile_icg/ocg/ohg/owg, pad_left=0
    conv_init[3] = 5u32 << 2; // conv_num=5, pad bits 0

    // CONVADDR: opcode 0x11, 2 words.
    let mut conv_addr = [0u32; 2];
    conv_addr[0] = (0x11 << 24) | (0u32 << 22) | (4 << 16); // addr_type=Ifm h_num=4
    conv_addr[1] = 0x1000;

    // CONV: opcode 0x12, 1 word.
    let conv = [(0x12 << 24) | (2 << 18) | (1 << 12) | (0 << 8) | (0 << 7) | (0 << 5)];

    // END: opcode 0xff, 1 word.
    let end = [0xffu32 << 24];

    let mut bytes = Vec::new();
    for words in [&conv_init[..], &conv_addr[..], &conv[..], &end[..]] {
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
    }

    roundtrip(&bytes, &table);

    let decoded = decode_program(&bytes, Generation::DpuV2, &table).unwrap();
    assert_eq!(decoded.len(), 4);
    assert_eq!(decoded[0].opcode, InstType::ConvInit);
    assert_eq!(decoded[0].field("kernel_h"), 3);
    assert_eq!(decoded[0].field("conv_num"), 5);
    assert_eq!(decoded[1].opcode, InstType::ConvAddr);
    assert_eq!(decoded[1].field("mt_addr"), 0x1000);
    assert_eq!(decoded[2].opcode, InstType::Conv);
    assert_eq!(decoded[2].field("shift_bias"), 2);
    assert_eq!(decoded[3].opcode, InstType::End);
}

#[test]
fn load_and_save_instructions_round_trip() {
    let table = IsaTable::for_generation(Generation::DpuV2);

    let mut load = [0u32; 4];
    load[0] = (0x20 << 24) | (7 << 16) | 100; // bank_id=7 bank_addr=100
    load[1] = (16 << 24) | (64 << 12) | 8; // channel=16 length=64 block_num=8
    load[2] = (1 << 16) | 2; // jump_read=1 jump_write=2
    load[3] = (3 << 16) | (5 << 8); // jump_write_endl=3 reg_id=5

    let mut save = [0u32; 4];
    save[0] = (0x21 << 24) | (9 << 16) | 200;
    save[1] = (16 << 24) | (32 << 12) | 4;
    save[2] = (1 << 16) | 1;
    save[3] = (6 << 16) | (1 << 8);

    let mut bytes = Vec::new();
    for words in [&load[..], &save[..]] {
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
    }
    roundtrip(&bytes, &table);

    let decoded = decode_program(&bytes, Generation::DpuV2, &table).unwrap();
    assert_eq!(decoded[0].opcode, InstType::Load);
    assert_eq!(decoded[0].field("bank_id"), 7);
    assert_eq!(decoded[0].field("reg_id"), 5);
    assert_eq!(decoded[1].opcode, InstType::Save);
    assert_eq!(decoded[1].field("reg_id"), 6);
}

#[test]
fn unaligned_and_unknown_opcode_are_rejected() {
    let table = IsaTable::for_generation(Generation::DpuV2);
    assert!(decode_program(&[0u8; 2], Generation::DpuV2, &table).is_err());
    let unknown = (0xabu32 << 24).to_le_bytes();
    assert!(decode_program(&unknown, Generation::DpuV2, &table).is_err());
}
