// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Operation and register-class description tables.
//!
//! Everything the builder, validator, grouping pass and encoder need to know
//! about an operation lives here: operand counts, the co-issue phase, the
//! symbolic I/O slots each operand binds to, supported reference types and
//! modifiers, and required operand widths. The encoding variant tables at the
//! bottom describe the selectable operand field layouts of the instruction
//! group encoding.

use crate::ir::*;
use bitflags::bitflags;

bitflags! {
    /// Reference type sets for operand validation.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct RefTypes: u8 {
        const VAL = 1 << 0;
        const IMM = 1 << 1;
        const REG = 1 << 2;
        const REGARRAY = 1 << 3;
        const IO = 1 << 4;
        const DRC = 1 << 5;
    }
}

impl RefTypes {
    pub fn matches(&self, r: &Ref) -> bool {
        match r {
            Ref::None => false,
            Ref::Val(_) => self.contains(RefTypes::VAL),
            Ref::Imm(_) => self.contains(RefTypes::IMM),
            Ref::Reg(_) => self.contains(RefTypes::REG),
            Ref::Regarray(_) => self.contains(RefTypes::REGARRAY),
            Ref::Io(_) => self.contains(RefTypes::IO),
            Ref::Drc(_) => self.contains(RefTypes::DRC),
        }
    }
}

const RT_REG: RefTypes = RefTypes::REG;
const RT_REG_REGARRAY: RefTypes = RefTypes::REG.union(RefTypes::REGARRAY);
const RT_ANY_SRC: RefTypes = RefTypes::REG
    .union(RefTypes::REGARRAY)
    .union(RefTypes::IMM)
    .union(RefTypes::VAL)
    .union(RefTypes::IO);
const RT_VAL: RefTypes = RefTypes::VAL;
const RT_IO: RefTypes = RefTypes::IO;
const RT_DRC: RefTypes = RefTypes::DRC;
const RT_REGARRAY: RefTypes = RefTypes::REGARRAY;

bitflags! {
    /// Source I/O slots a register class can feed.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct IoSrcs: u8 {
        const S0 = 1 << 0;
        const S1 = 1 << 1;
        const S2 = 1 << 2;
        const S3 = 1 << 3;
        const S4 = 1 << 4;
        const S5 = 1 << 5;
    }
}

const IO_SRCS_ALL: IoSrcs = IoSrcs::all();
const IO_SRCS_LOWER: IoSrcs = IoSrcs::S0.union(IoSrcs::S1).union(IoSrcs::S2);
const IO_SRCS_NONE: IoSrcs = IoSrcs::empty();

impl IoSrcs {
    pub fn supports(&self, io: Io) -> bool {
        let bit = match io {
            Io::S0 => IoSrcs::S0,
            Io::S1 => IoSrcs::S1,
            Io::S2 => IoSrcs::S2,
            Io::S3 => IoSrcs::S3,
            Io::S4 => IoSrcs::S4,
            Io::S5 => IoSrcs::S5,
            _ => return false,
        };
        self.contains(bit)
    }
}

pub struct RegClassInfo {
    pub name: &'static str,
    /// Register prefix used when printing.
    pub prefix: &'static str,
    /// Number of hardware registers; 0 for the unbounded virtual class.
    pub num: u32,
    pub supported_io_srcs: IoSrcs,
}

pub fn reg_class_info(class: RegClass) -> &'static RegClassInfo {
    match class {
        RegClass::Ssa => &RegClassInfo {
            name: "ssa",
            prefix: "s",
            num: 0,
            supported_io_srcs: IO_SRCS_ALL,
        },
        RegClass::Temp => &RegClassInfo {
            name: "temp",
            prefix: "r",
            num: 248,
            supported_io_srcs: IO_SRCS_ALL,
        },
        RegClass::Coeff => &RegClassInfo {
            name: "coeff",
            prefix: "cf",
            num: 4096,
            supported_io_srcs: IO_SRCS_ALL,
        },
        RegClass::Shared => &RegClassInfo {
            name: "shared",
            prefix: "sh",
            num: 4096,
            supported_io_srcs: IO_SRCS_ALL,
        },
        RegClass::Special => &RegClassInfo {
            name: "special",
            prefix: "sr",
            num: 240,
            supported_io_srcs: IO_SRCS_LOWER,
        },
        RegClass::Internal => &RegClassInfo {
            name: "internal",
            prefix: "i",
            num: 8,
            supported_io_srcs: IO_SRCS_LOWER,
        },
        RegClass::Const => &RegClassInfo {
            name: "const",
            prefix: "sc",
            num: 240,
            supported_io_srcs: IO_SRCS_ALL,
        },
        RegClass::PixOut => &RegClassInfo {
            name: "pixout",
            prefix: "po",
            num: 8,
            supported_io_srcs: IO_SRCS_LOWER,
        },
        RegClass::VtxIn => &RegClassInfo {
            name: "vtxin",
            prefix: "vi",
            num: 248,
            supported_io_srcs: IO_SRCS_ALL,
        },
        RegClass::VtxOut => &RegClassInfo {
            name: "vtxout",
            prefix: "vo",
            num: 256,
            supported_io_srcs: IO_SRCS_NONE,
        },
    }
}

/// Required operand width in registers: 1 for a scalar register, N for an
/// N-register array, 0 when any width is accepted.
pub type OperandSize = u8;

pub struct AluOpInfo {
    pub name: &'static str,
    pub num_dsts: usize,
    pub num_srcs: usize,
    /// Co-issue phase; pseudo-ops have none and must be lowered away.
    pub phase: Option<Phase>,
    /// Symbolic I/O slot each destination/source binds to in a group.
    pub io_dst: &'static [Io],
    pub io_src: &'static [Io],
    pub supported_op_mods: AluOpMods,
    pub supported_dst_types: &'static [RefTypes],
    pub supported_src_types: &'static [RefTypes],
    /// Source slots that may carry FLR/ABS/NEG modifiers.
    pub src_mod_slots: &'static [bool],
    pub dst_size: &'static [OperandSize],
    pub src_size: &'static [OperandSize],
    /// Source slots whose register advances with the repeat count.
    pub src_repeat_mask: u8,
}

const ALU_TEST_MODS: AluOpMods = AluOpMods::Z
    .union(AluOpMods::GZ)
    .union(AluOpMods::GEZ)
    .union(AluOpMods::E)
    .union(AluOpMods::G)
    .union(AluOpMods::GE)
    .union(AluOpMods::NE)
    .union(AluOpMods::L)
    .union(AluOpMods::LE);
const ALU_TYPE_MODS: AluOpMods = AluOpMods::F32
    .union(AluOpMods::U32)
    .union(AluOpMods::S32);

const ALU_MODS_NONE: AluOpMods = AluOpMods::empty();
const ALU_MODS_FLOAT: AluOpMods = AluOpMods::LP.union(AluOpMods::SAT);
const ALU_MODS_TST: AluOpMods = ALU_TEST_MODS.union(ALU_TYPE_MODS);
const ALU_MODS_PCK: AluOpMods = AluOpMods::SCALE.union(AluOpMods::ROUNDZERO);

pub fn alu_op_info(op: AluOp) -> &'static AluOpInfo {
    match op {
        AluOp::Mbyp => &AluOpInfo {
            name: "mbyp",
            num_dsts: 1,
            num_srcs: 1,
            phase: Some(Phase::P0),
            io_dst: &[Io::Ft0],
            io_src: &[Io::S0],
            supported_op_mods: ALU_MODS_NONE,
            // Single-register subarrays pass through the bypass too.
            supported_dst_types: &[RT_REG_REGARRAY],
            supported_src_types: &[RT_REG_REGARRAY],
            src_mod_slots: &[true],
            dst_size: &[0],
            src_size: &[0],
            src_repeat_mask: 0,
        },
        AluOp::Fadd => &AluOpInfo {
            name: "fadd",
            num_dsts: 1,
            num_srcs: 2,
            phase: Some(Phase::P0),
            io_dst: &[Io::Ft0],
            io_src: &[Io::S0, Io::S1],
            supported_op_mods: ALU_MODS_FLOAT,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG, RT_REG],
            src_mod_slots: &[true, true],
            dst_size: &[1],
            src_size: &[1, 1],
            src_repeat_mask: 0,
        },
        AluOp::Fmul => &AluOpInfo {
            name: "fmul",
            num_dsts: 1,
            num_srcs: 2,
            phase: Some(Phase::P0),
            io_dst: &[Io::Ft0],
            io_src: &[Io::S0, Io::S1],
            supported_op_mods: ALU_MODS_FLOAT,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG, RT_REG],
            src_mod_slots: &[true, true],
            dst_size: &[1],
            src_size: &[1, 1],
            src_repeat_mask: 0,
        },
        AluOp::Fmad => &AluOpInfo {
            name: "fmad",
            num_dsts: 1,
            num_srcs: 3,
            phase: Some(Phase::P0),
            io_dst: &[Io::Ft0],
            io_src: &[Io::S0, Io::S1, Io::S2],
            supported_op_mods: ALU_MODS_FLOAT,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG, RT_REG, RT_REG],
            src_mod_slots: &[true, true, true],
            dst_size: &[1],
            src_size: &[1, 1, 1],
            src_repeat_mask: 0,
        },
        AluOp::Add64 => &AluOpInfo {
            name: "add64",
            num_dsts: 1,
            num_srcs: 3,
            phase: Some(Phase::P0),
            io_dst: &[Io::Ft0],
            // The 64-bit source pairs occupy S0/S1 and S2/S3; the fourth
            // physical source always lands on S3.
            io_src: &[Io::S0, Io::S2, Io::None],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REGARRAY],
            supported_src_types: &[RT_REGARRAY, RT_REGARRAY, RT_IO],
            src_mod_slots: &[true, true, false],
            dst_size: &[2],
            src_size: &[2, 2, 0],
            src_repeat_mask: 0,
        },
        AluOp::Tst => &AluOpInfo {
            name: "tst",
            num_dsts: 1,
            num_srcs: 2,
            phase: Some(Phase::P2Tst),
            io_dst: &[Io::Ftt],
            io_src: &[Io::S0, Io::S1],
            supported_op_mods: ALU_MODS_TST,
            supported_dst_types: &[RT_IO],
            supported_src_types: &[RT_REG, RT_REG],
            src_mod_slots: &[false, false],
            dst_size: &[0],
            src_size: &[1, 1],
            src_repeat_mask: 0,
        },
        AluOp::Movc => &AluOpInfo {
            name: "movc",
            num_dsts: 1,
            num_srcs: 2,
            phase: Some(Phase::P2Mov),
            io_dst: &[Io::Ft2],
            // The value source always routes through S1 and the FTE bypass.
            io_src: &[Io::None, Io::S1],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_IO, RT_REG],
            src_mod_slots: &[false, false],
            dst_size: &[1],
            src_size: &[0, 1],
            src_repeat_mask: 0,
        },
        AluOp::PckU8888 => &AluOpInfo {
            name: "pck.u8888",
            num_dsts: 1,
            num_srcs: 1,
            phase: Some(Phase::P2Pck),
            io_dst: &[Io::Ft2],
            io_src: &[Io::S0],
            supported_op_mods: ALU_MODS_PCK,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REGARRAY],
            src_mod_slots: &[false],
            dst_size: &[1],
            src_size: &[4],
            src_repeat_mask: 0b1,
        },

        AluOp::Mov => &AluOpInfo {
            name: "mov",
            num_dsts: 1,
            num_srcs: 1,
            phase: None,
            io_dst: &[Io::None],
            io_src: &[Io::None],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REG_REGARRAY],
            supported_src_types: &[RT_ANY_SRC],
            src_mod_slots: &[false],
            dst_size: &[0],
            src_size: &[0],
            src_repeat_mask: 0,
        },
        AluOp::Cmov => &AluOpInfo {
            name: "cmov",
            num_dsts: 1,
            num_srcs: 2,
            phase: None,
            io_dst: &[Io::None],
            io_src: &[Io::None, Io::None],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG, RT_REG],
            src_mod_slots: &[false, false],
            dst_size: &[1],
            src_size: &[1, 1],
            src_repeat_mask: 0,
        },
        AluOp::Fabs => &AluOpInfo {
            name: "fabs",
            num_dsts: 1,
            num_srcs: 1,
            phase: None,
            io_dst: &[Io::None],
            io_src: &[Io::None],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG],
            src_mod_slots: &[false],
            dst_size: &[1],
            src_size: &[1],
            src_repeat_mask: 0,
        },
        AluOp::Fneg => &AluOpInfo {
            name: "fneg",
            num_dsts: 1,
            num_srcs: 1,
            phase: None,
            io_dst: &[Io::None],
            io_src: &[Io::None],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG],
            src_mod_slots: &[false],
            dst_size: &[1],
            src_size: &[1],
            src_repeat_mask: 0,
        },
        AluOp::Fnabs => &AluOpInfo {
            name: "fnabs",
            num_dsts: 1,
            num_srcs: 1,
            phase: None,
            io_dst: &[Io::None],
            io_src: &[Io::None],
            supported_op_mods: ALU_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG],
            src_mod_slots: &[false],
            dst_size: &[1],
            src_size: &[1],
            src_repeat_mask: 0,
        },
    }
}

pub struct BackendOpInfo {
    pub name: &'static str,
    pub num_dsts: usize,
    pub num_srcs: usize,
    pub io_dst: &'static [Io],
    pub io_src: &'static [Io],
    pub supported_op_mods: BackendOpMods,
    pub supported_dst_types: &'static [RefTypes],
    pub supported_src_types: &'static [RefTypes],
    pub dst_size: &'static [OperandSize],
    pub src_size: &'static [OperandSize],
}

const BACKEND_MODS_NONE: BackendOpMods = BackendOpMods::empty();
const BACKEND_MODS_FITRP: BackendOpMods = BackendOpMods::FCNORM.union(BackendOpMods::SAT);

pub fn backend_op_info(op: BackendOp) -> &'static BackendOpInfo {
    match op {
        BackendOp::UvswWrite => &BackendOpInfo {
            name: "uvsw.write",
            num_dsts: 1,
            num_srcs: 1,
            // The vertex-output index is encoded in the instruction body, not
            // the group destination field.
            io_dst: &[Io::None],
            io_src: &[Io::S0],
            supported_op_mods: BACKEND_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG],
            dst_size: &[1],
            src_size: &[1],
        },
        BackendOp::UvswEmit => &BackendOpInfo {
            name: "uvsw.emit",
            num_dsts: 0,
            num_srcs: 0,
            io_dst: &[],
            io_src: &[],
            supported_op_mods: BACKEND_MODS_NONE,
            supported_dst_types: &[],
            supported_src_types: &[],
            dst_size: &[],
            src_size: &[],
        },
        BackendOp::UvswEndtask => &BackendOpInfo {
            name: "uvsw.endtask",
            num_dsts: 0,
            num_srcs: 0,
            io_dst: &[],
            io_src: &[],
            supported_op_mods: BACKEND_MODS_NONE,
            supported_dst_types: &[],
            supported_src_types: &[],
            dst_size: &[],
            src_size: &[],
        },
        BackendOp::UvswEmitThenEndtask => &BackendOpInfo {
            name: "uvsw.emitthenendtask",
            num_dsts: 0,
            num_srcs: 0,
            io_dst: &[],
            io_src: &[],
            supported_op_mods: BACKEND_MODS_NONE,
            supported_dst_types: &[],
            supported_src_types: &[],
            dst_size: &[],
            src_size: &[],
        },
        BackendOp::UvswWriteThenEmitThenEndtask => &BackendOpInfo {
            name: "uvsw.writethenemitthenendtask",
            num_dsts: 1,
            num_srcs: 1,
            io_dst: &[Io::None],
            io_src: &[Io::S0],
            supported_op_mods: BACKEND_MODS_NONE,
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_REG],
            dst_size: &[1],
            src_size: &[1],
        },
        BackendOp::Ld => &BackendOpInfo {
            name: "ld",
            num_dsts: 1,
            num_srcs: 3,
            io_dst: &[Io::W0],
            // The 64-bit address pair occupies S0/S1; the DRC slot and burst
            // length live in the instruction body.
            io_src: &[Io::None, Io::None, Io::S0],
            supported_op_mods: BACKEND_MODS_NONE,
            supported_dst_types: &[RT_REG_REGARRAY],
            supported_src_types: &[RT_DRC, RT_VAL, RT_REGARRAY],
            dst_size: &[0],
            src_size: &[0, 0, 2],
        },
        BackendOp::FitrpPixel => &BackendOpInfo {
            name: "fitrp.pixel",
            num_dsts: 1,
            num_srcs: 4,
            io_dst: &[Io::W0],
            io_src: &[Io::None, Io::S0, Io::S2, Io::None],
            supported_op_mods: BACKEND_MODS_FITRP,
            supported_dst_types: &[RT_REG_REGARRAY],
            supported_src_types: &[RT_DRC, RT_REGARRAY, RT_REGARRAY, RT_VAL],
            dst_size: &[0],
            src_size: &[0, 0, 4, 0],
        },
    }
}

pub struct CtrlOpInfo {
    pub name: &'static str,
    pub num_dsts: usize,
    pub num_srcs: usize,
    /// Branches target a block.
    pub has_target: bool,
    /// Can terminate a basic block.
    pub ends_block: bool,
    pub supported_op_mods: CtrlOpMods,
    pub supported_src_types: &'static [RefTypes],
}

const CTRL_MODS_NONE: CtrlOpMods = CtrlOpMods::empty();
const CTRL_MODS_BR: CtrlOpMods = CtrlOpMods::ALLINST.union(CtrlOpMods::ANYINST);

pub fn ctrl_op_info(op: CtrlOp) -> &'static CtrlOpInfo {
    match op {
        CtrlOp::Nop => &CtrlOpInfo {
            name: "nop",
            num_dsts: 0,
            num_srcs: 0,
            has_target: false,
            ends_block: true,
            supported_op_mods: CtrlOpMods::END,
            supported_src_types: &[],
        },
        CtrlOp::Wdf => &CtrlOpInfo {
            name: "wdf",
            num_dsts: 0,
            num_srcs: 1,
            has_target: false,
            ends_block: false,
            supported_op_mods: CTRL_MODS_NONE,
            supported_src_types: &[RT_DRC],
        },
        CtrlOp::Br => &CtrlOpInfo {
            name: "br",
            num_dsts: 0,
            num_srcs: 0,
            has_target: true,
            ends_block: true,
            supported_op_mods: CTRL_MODS_BR,
            supported_src_types: &[],
        },
        CtrlOp::End => &CtrlOpInfo {
            name: "end",
            num_dsts: 0,
            num_srcs: 0,
            has_target: false,
            ends_block: true,
            supported_op_mods: CTRL_MODS_NONE,
            supported_src_types: &[],
        },
    }
}

pub struct BitwiseOpInfo {
    pub name: &'static str,
    pub num_dsts: usize,
    pub num_srcs: usize,
    pub phase: Phase,
    pub io_dst: &'static [Io],
    pub io_src: &'static [Io],
    pub supported_dst_types: &'static [RefTypes],
    pub supported_src_types: &'static [RefTypes],
}

pub fn bitwise_op_info(op: BitwiseOp) -> &'static BitwiseOpInfo {
    match op {
        BitwiseOp::Byp0 => &BitwiseOpInfo {
            name: "byp0",
            num_dsts: 1,
            num_srcs: 1,
            phase: Phase::P0,
            io_dst: &[Io::Ft0],
            // The raw value is carried in the instruction body.
            io_src: &[Io::None],
            supported_dst_types: &[RT_REG],
            supported_src_types: &[RT_VAL],
        },
    }
}

/* Operand encoding variants. */

#[derive(Clone, Copy, Debug)]
pub struct RegDstInfo {
    pub num_dsts: usize,
    pub bank_bits: [u32; ISA_DSTS],
    pub index_bits: [u32; ISA_DSTS],
    pub bytes: u32,
}

pub const REG_DST_INFOS: [RegDstInfo; 5] = [
    RegDstInfo {
        num_dsts: 1,
        bank_bits: [1, 0],
        index_bits: [6, 0],
        bytes: 1,
    },
    RegDstInfo {
        num_dsts: 1,
        bank_bits: [3, 0],
        index_bits: [11, 0],
        bytes: 2,
    },
    RegDstInfo {
        num_dsts: 2,
        bank_bits: [1, 1],
        index_bits: [7, 6],
        bytes: 2,
    },
    RegDstInfo {
        num_dsts: 2,
        bank_bits: [3, 2],
        index_bits: [8, 8],
        bytes: 3,
    },
    RegDstInfo {
        num_dsts: 2,
        bank_bits: [3, 3],
        index_bits: [11, 11],
        bytes: 4,
    },
];

#[derive(Clone, Copy, Debug)]
pub struct RegSrcInfo {
    pub num_srcs: usize,
    /// Width of the IS0 source mux field (lower sources only).
    pub mux_bits: u32,
    pub bank_bits: [u32; ISA_SRCS / 2],
    pub index_bits: [u32; ISA_SRCS / 2],
    pub bytes: u32,
}

pub const REG_LOWER_SRC_INFOS: [RegSrcInfo; 8] = [
    RegSrcInfo {
        num_srcs: 1,
        mux_bits: 0,
        bank_bits: [1, 0, 0],
        index_bits: [6, 0, 0],
        bytes: 1,
    },
    RegSrcInfo {
        num_srcs: 1,
        mux_bits: 2,
        bank_bits: [3, 0, 0],
        index_bits: [8, 0, 0],
        bytes: 2,
    },
    RegSrcInfo {
        num_srcs: 2,
        mux_bits: 2,
        bank_bits: [2, 2, 0],
        index_bits: [5, 5, 0],
        bytes: 2,
    },
    RegSrcInfo {
        num_srcs: 2,
        mux_bits: 3,
        bank_bits: [3, 3, 0],
        index_bits: [8, 8, 0],
        bytes: 4,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 3,
        bank_bits: [2, 2, 2],
        index_bits: [7, 7, 6],
        bytes: 4,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 3,
        bank_bits: [3, 3, 3],
        index_bits: [8, 8, 8],
        bytes: 5,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 3,
        bank_bits: [3, 3, 3],
        index_bits: [11, 11, 11],
        bytes: 6,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 3,
        bank_bits: [3, 3, 3],
        index_bits: [13, 13, 13],
        bytes: 7,
    },
];

pub const REG_UPPER_SRC_INFOS: [RegSrcInfo; 8] = [
    RegSrcInfo {
        num_srcs: 1,
        mux_bits: 0,
        bank_bits: [1, 0, 0],
        index_bits: [6, 0, 0],
        bytes: 1,
    },
    RegSrcInfo {
        num_srcs: 1,
        mux_bits: 0,
        bank_bits: [3, 0, 0],
        index_bits: [8, 0, 0],
        bytes: 2,
    },
    RegSrcInfo {
        num_srcs: 2,
        mux_bits: 0,
        bank_bits: [2, 2, 0],
        index_bits: [6, 6, 0],
        bytes: 2,
    },
    RegSrcInfo {
        num_srcs: 2,
        mux_bits: 0,
        bank_bits: [3, 3, 0],
        index_bits: [8, 8, 0],
        bytes: 3,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 0,
        bank_bits: [2, 2, 2],
        index_bits: [7, 7, 6],
        bytes: 4,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 0,
        bank_bits: [3, 3, 3],
        index_bits: [8, 8, 8],
        bytes: 5,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 0,
        bank_bits: [3, 3, 3],
        index_bits: [11, 11, 11],
        bytes: 6,
    },
    RegSrcInfo {
        num_srcs: 3,
        mux_bits: 0,
        bank_bits: [3, 3, 3],
        index_bits: [13, 13, 13],
        bytes: 7,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_tables_fit_their_bytes() {
        for row in &REG_DST_INFOS {
            let bits: u32 = (0..row.num_dsts)
                .map(|i| row.bank_bits[i] + row.index_bits[i])
                .sum();
            assert!(bits <= row.bytes * 8);
        }
        for row in REG_LOWER_SRC_INFOS.iter().chain(&REG_UPPER_SRC_INFOS) {
            let bits: u32 = row.mux_bits
                + (0..row.num_srcs)
                    .map(|i| row.bank_bits[i] + row.index_bits[i])
                    .sum::<u32>();
            assert!(bits <= row.bytes * 8);
        }
    }

    #[test]
    fn variant_tables_grow_monotonically() {
        for w in REG_DST_INFOS.windows(2) {
            assert!(w[0].bytes <= w[1].bytes);
        }
        for t in [&REG_LOWER_SRC_INFOS, &REG_UPPER_SRC_INFOS] {
            for w in t.windows(2) {
                assert!(w[0].bytes <= w[1].bytes);
            }
        }
    }

    #[test]
    fn op_info_operand_arrays_match_counts() {
        for op in [
            AluOp::Mbyp,
            AluOp::Fadd,
            AluOp::Fmul,
            AluOp::Fmad,
            AluOp::Add64,
            AluOp::Tst,
            AluOp::Movc,
            AluOp::PckU8888,
            AluOp::Mov,
            AluOp::Cmov,
            AluOp::Fabs,
            AluOp::Fneg,
            AluOp::Fnabs,
        ] {
            let info = alu_op_info(op);
            assert_eq!(info.io_dst.len(), info.num_dsts);
            assert_eq!(info.io_src.len(), info.num_srcs);
            assert_eq!(info.supported_dst_types.len(), info.num_dsts);
            assert_eq!(info.supported_src_types.len(), info.num_srcs);
            assert_eq!(info.src_mod_slots.len(), info.num_srcs);
            assert_eq!(info.dst_size.len(), info.num_dsts);
            assert_eq!(info.src_size.len(), info.num_srcs);
            assert_eq!(op.is_pseudo(), info.phase.is_none());
        }
    }
}
