// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Hardware encoding definitions.
//!
//! Every bit position the encoder emits is declared here as an explicit
//! {offset, width} range over little-endian byte buffers (bit 0 = LSB of
//! byte 0), instead of relying on packed-struct layout. `encode.rs` writes
//! the fields through `bitview`; `schedule_instr_groups.rs` sizes them.

use crate::ir::*;
use std::ops::Range;

/// Instruction groups feeding the instruction cache must end on this
/// boundary.
pub const ISA_ICACHE_ALIGN: u32 = 8;

/// Word-padding filler byte.
pub const PAD_BYTE: u8 = 0xff;

/// First byte of an alignment-padding run: 0xf0 tag plus the word count.
pub fn align_pad_byte(words: u32) -> u8 {
    assert!(words > 0 && words < 16);
    0xf0 | words as u8
}

/* Instruction group header. Two bytes, or three when extended. */

pub const HEADER_EXT: Range<usize> = 0..1;
pub const HEADER_ALUTYPE: Range<usize> = 1..3;
pub const HEADER_CC: Range<usize> = 3..5;
/// Phase-presence summary.
pub const HEADER_OPORG: Range<usize> = 5..8;
/// Occupied-phase mask.
pub const HEADER_OPCNT: Range<usize> = 8..14;
pub const HEADER_END: Range<usize> = 14..15;
/// Extended byte: repeat - 1.
pub const HEADER_RPT: Range<usize> = 16..20;

pub fn exec_cond_encoding(cond: ExecCond) -> u64 {
    match cond {
        ExecCond::PeTrue => 0,
        ExecCond::P0True => 1,
        ExecCond::PeAny => 2,
        ExecCond::P0False => 3,
    }
}

pub fn alutype_encoding(alu: GroupAlu) -> u64 {
    match alu {
        GroupAlu::Main => 0,
        GroupAlu::Bitwise => 1,
        GroupAlu::Control => 2,
    }
}

pub fn oporg_encoding(phase: Phase) -> u64 {
    phase as u64
}

/* Register banks. */

/// Pixel-output registers alias into the special bank.
pub const PIXOUT0_OFFSET: u32 = 32;
pub const PIXOUT4_OFFSET: u32 = 164;
pub const PIXOUT_GROUP: u32 = 4;
/// Internal registers alias into the special bank.
pub const INTERNAL0_OFFSET: u32 = 36;

/// Bank number and encoded index of a hardware register.
pub fn reg_bank_encoding(class: RegClass, index: u32) -> (u32, u32) {
    match class {
        RegClass::Temp => (0, index),
        RegClass::Coeff => (1, index),
        RegClass::Shared => (2, index),
        RegClass::Special => (3, index),
        RegClass::Internal => (3, INTERNAL0_OFFSET + index),
        RegClass::PixOut => {
            if index < PIXOUT_GROUP {
                (3, PIXOUT0_OFFSET + index)
            } else {
                (3, PIXOUT4_OFFSET + (index - PIXOUT_GROUP))
            }
        }
        RegClass::Const => (5, index),
        RegClass::VtxIn => (4, index),
        RegClass::Ssa => panic!("Virtual registers cannot be encoded"),
        RegClass::VtxOut => panic!("Vertex outputs are written through UVSW"),
    }
}

/* Internal selector encodings, one field per selector in the ISS byte. */

pub const ISS_IS1: Range<usize> = 0..1;
pub const ISS_IS2: Range<usize> = 1..3;
pub const ISS_IS3: Range<usize> = 3..4;
pub const ISS_IS4: Range<usize> = 4..6;
pub const ISS_IS5: Range<usize> = 6..8;

/// Encoded value of one internal selector routing choice.
pub fn iss_encoding(slot: usize, io: Io) -> u64 {
    match (slot, io) {
        // IS1: phase-2 test input A.
        (1, Io::Ft0) => 0,
        (1, Io::Fte) => 1,
        // IS2: phase-2 test input B.
        (2, Io::Ft1) => 0,
        (2, Io::S1) => 1,
        (2, Io::Ftt) => 2,
        // IS3: phase-2 pack input.
        (3, Io::Ft0) => 0,
        (3, Io::Fte) => 1,
        // IS4/IS5: W0/W1 writeback source.
        (4 | 5, Io::Ft0) => 0,
        (4 | 5, Io::Ft1) => 1,
        (4 | 5, Io::Ft2) => 2,
        (4 | 5, Io::Fte) => 3,
        _ => panic!("Unsupported routing {} for IS{}", io, slot),
    }
}

/// IS0 source-mux selection.
pub fn mux_encoding(io: Io) -> u64 {
    match io {
        Io::S0 => 0,
        Io::S1 => 1,
        Io::S2 => 2,
        Io::S3 => 3,
        Io::S4 => 4,
        Io::S5 => 5,
        _ => panic!("Unsupported mux source {}", io),
    }
}

/* Main-ALU phase-0 instruction bodies. */

pub const P0_OPCODE: Range<usize> = 0..3;
/// Modifier byte follows.
pub const P0_EXT: Range<usize> = 3..4;
pub const P0_SAT: Range<usize> = 4..5;
pub const P0_LP: Range<usize> = 5..6;
/// Extension byte source-modifier bits.
pub const P0_S0_ABS: Range<usize> = 8..9;
pub const P0_S0_NEG: Range<usize> = 9..10;
pub const P0_S0_FLR: Range<usize> = 10..11;
pub const P0_S1_ABS: Range<usize> = 11..12;
pub const P0_S1_NEG: Range<usize> = 12..13;
pub const P0_S2_ABS: Range<usize> = 13..14;
pub const P0_S2_NEG: Range<usize> = 14..15;

pub fn p0_op_encoding(op: AluOp) -> u64 {
    match op {
        AluOp::Mbyp => 0,
        AluOp::Fadd => 1,
        AluOp::Fmul => 2,
        AluOp::Fmad => 3,
        AluOp::Add64 => 4,
        _ => panic!("Not a phase-0 ALU op"),
    }
}

/* Phase-2 test unit. */

pub const TST_OP: Range<usize> = 0..4;
pub const TST_TYPE: Range<usize> = 4..6;
/// Test output target: 0 = P0, 1 = FTT only.
pub const TST_PDST: Range<usize> = 8..9;

pub fn tst_op_encoding(mods: AluOpMods) -> u64 {
    if mods.contains(AluOpMods::Z) {
        0
    } else if mods.contains(AluOpMods::GZ) {
        1
    } else if mods.contains(AluOpMods::GEZ) {
        2
    } else if mods.contains(AluOpMods::E) {
        3
    } else if mods.contains(AluOpMods::G) {
        4
    } else if mods.contains(AluOpMods::GE) {
        5
    } else if mods.contains(AluOpMods::NE) {
        6
    } else if mods.contains(AluOpMods::L) {
        7
    } else if mods.contains(AluOpMods::LE) {
        8
    } else {
        panic!("TST without a test-op modifier")
    }
}

pub fn tst_type_encoding(mods: AluOpMods) -> u64 {
    if mods.contains(AluOpMods::U32) {
        1
    } else if mods.contains(AluOpMods::S32) {
        2
    } else {
        // F32 is the default.
        0
    }
}

/* Phase-2 move unit. */

/// Condition source: 0 = unconditional, 1 = FTT.
pub const MOVC_COND: Range<usize> = 0..2;
pub const MOVC_W0: Range<usize> = 8..9;
pub const MOVC_W1: Range<usize> = 9..10;

/* Phase-2 pack unit. */

pub const PCK_FORMAT: Range<usize> = 0..5;
pub const PCK_SCALE: Range<usize> = 5..6;
pub const PCK_ROUNDZERO: Range<usize> = 6..7;

pub const PCK_FORMAT_U8888: u64 = 0;

/* Backend instruction bodies. */

pub const BACKEND_OPCODE: Range<usize> = 0..4;

pub fn backend_op_encoding(op: BackendOp) -> u64 {
    match op {
        BackendOp::UvswWrite => 0,
        BackendOp::UvswEmit => 1,
        BackendOp::UvswEndtask => 2,
        BackendOp::UvswEmitThenEndtask => 3,
        BackendOp::UvswWriteThenEmitThenEndtask => 4,
        BackendOp::Ld => 5,
        BackendOp::FitrpPixel => 6,
    }
}

/// UVSW writes carry the vertex-output index in their second byte.
pub const UVSW_DST: Range<usize> = 8..16;

pub const LD_DRC: Range<usize> = 8..9;
pub const LD_BURST: Range<usize> = 9..13;

pub const FITRP_DRC: Range<usize> = 8..9;
pub const FITRP_COUNT: Range<usize> = 9..13;
pub const FITRP_FCNORM: Range<usize> = 13..14;
pub const FITRP_SAT: Range<usize> = 14..15;

/* Control instruction bodies. */

pub const CTRL_OPCODE: Range<usize> = 0..3;

pub fn ctrl_op_encoding(op: CtrlOp) -> u64 {
    match op {
        CtrlOp::Nop => 0,
        CtrlOp::Wdf => 1,
        CtrlOp::Br => 2,
        CtrlOp::End => panic!("END is a pseudo-op"),
    }
}

pub const NOP_END: Range<usize> = 3..4;
pub const WDF_DRC: Range<usize> = 3..4;
pub const BR_ANYINST: Range<usize> = 3..4;
pub const BR_ALLINST: Range<usize> = 4..5;
/// Signed byte offset to the target block, relative to the branch group.
pub const BR_OFFSET: Range<usize> = 8..40;

/* Bitwise instruction bodies. */

pub const BITWISE_OPCODE: Range<usize> = 0..3;
pub const BYP0_IMM_PRESENT: Range<usize> = 3..4;
pub const BYP0_IMM: Range<usize> = 8..40;

pub fn bitwise_op_encoding(op: BitwiseOp) -> u64 {
    match op {
        BitwiseOp::Byp0 => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixout_aliases_into_special_bank() {
        assert_eq!(reg_bank_encoding(RegClass::PixOut, 0), (3, 32));
        assert_eq!(reg_bank_encoding(RegClass::PixOut, 3), (3, 35));
        assert_eq!(reg_bank_encoding(RegClass::PixOut, 4), (3, 164));
        assert_eq!(reg_bank_encoding(RegClass::Internal, 2), (3, 38));
    }

    #[test]
    fn iss_fields_tile_one_byte() {
        assert_eq!(ISS_IS1.start, 0);
        assert_eq!(ISS_IS1.end, ISS_IS2.start);
        assert_eq!(ISS_IS2.end, ISS_IS3.start);
        assert_eq!(ISS_IS3.end, ISS_IS4.start);
        assert_eq!(ISS_IS4.end, ISS_IS5.start);
        assert_eq!(ISS_IS5.end, 8);
    }

    #[test]
    fn align_pad_tags() {
        assert_eq!(align_pad_byte(1), 0xf1);
        assert_eq!(align_pad_byte(3), 0xf3);
    }
}
