// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Instruction-level IR.
//!
//! A [`Shader`] owns every IR entity in id-indexed arenas: basic blocks,
//! instructions, registers, register arrays and (after grouping) instruction
//! groups. Relationships between entities are plain data — a register records
//! the `(instruction, operand)` pairs that write and use it, a block records
//! the branches that target it — and the accessors on `Shader` keep those
//! records consistent whenever instructions are created, deleted or have
//! their operands rewritten.

use crate::bitset::BitSet;
use bitflags::bitflags;
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct InstrId(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RegId(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RegArrayId(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GroupId(pub u32);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Number of hardware DRC slots.
pub const ROGUE_DRCS: usize = 2;

/// Coefficient registers are used in groups of 4.
pub const ROGUE_COEFF_ALIGN: u32 = 4;

/// All registers are 32 bits.
pub const ROGUE_REG_SIZE_BYTES: u32 = 4;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum RegClass {
    Ssa = 0,
    Temp,
    Coeff,
    Shared,
    Special,
    Internal,
    Const,
    PixOut,
    VtxIn,
    VtxOut,
}

pub const REG_CLASS_COUNT: usize = 10;

impl RegClass {
    pub const ALL: [RegClass; REG_CLASS_COUNT] = [
        RegClass::Ssa,
        RegClass::Temp,
        RegClass::Coeff,
        RegClass::Shared,
        RegClass::Special,
        RegClass::Internal,
        RegClass::Const,
        RegClass::PixOut,
        RegClass::VtxIn,
        RegClass::VtxOut,
    ];

}

bitflags! {
    /// ALU operation modifiers, in application priority order.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct AluOpMods: u32 {
        const LP = 1 << 0;
        const SAT = 1 << 1;
        const SCALE = 1 << 2;
        const ROUNDZERO = 1 << 3;

        /// Test == 0.
        const Z = 1 << 4;
        /// Test > 0.
        const GZ = 1 << 5;
        /// Test >= 0.
        const GEZ = 1 << 6;
        /// Test a == b.
        const E = 1 << 7;
        /// Test a > b.
        const G = 1 << 8;
        /// Test a >= b.
        const GE = 1 << 9;
        /// Test a != b.
        const NE = 1 << 10;
        /// Test a < b.
        const L = 1 << 11;
        /// Test a <= b.
        const LE = 1 << 12;

        const F32 = 1 << 13;
        const U32 = 1 << 14;
        const S32 = 1 << 15;
    }
}

bitflags! {
    /// ALU source modifiers. If several are set, FLR applies first, then ABS,
    /// then NEG.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct AluSrcMods: u32 {
        const FLR = 1 << 0;
        const ABS = 1 << 1;
        const NEG = 1 << 2;
    }
}

bitflags! {
    /// ALU destination (element) modifiers.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct AluDstMods: u32 {
        const E0 = 1 << 0;
        const E1 = 1 << 1;
        const E2 = 1 << 2;
        const E3 = 1 << 3;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct BackendOpMods: u32 {
        /// Fixed-point texture data, convert to float.
        const FCNORM = 1 << 0;
        /// Saturate output.
        const SAT = 1 << 1;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct CtrlOpMods: u32 {
        /// Branch if all instances take the condition.
        const ALLINST = 1 << 0;
        /// Branch if any instance takes the condition.
        const ANYINST = 1 << 1;
        /// End of program.
        const END = 1 << 2;
    }
}

/// Instruction execution conditions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExecCond {
    #[default]
    PeTrue,
    P0True,
    PeAny,
    P0False,
}

/// Symbolic I/O slots: sources, destinations, internal selectors,
/// feedthroughs, the test output and the predicate register.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Io {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    W0,
    W1,
    Is0,
    Is1,
    Is2,
    Is3,
    Is4,
    Is5,
    Ft0,
    Ft1,
    Ft2,
    Fte,
    Ftt,
    P0,
    None,
}

impl Io {
    pub fn is_src(&self) -> bool {
        matches!(self, Io::S0 | Io::S1 | Io::S2 | Io::S3 | Io::S4 | Io::S5)
    }

    pub fn is_dst(&self) -> bool {
        matches!(self, Io::W0 | Io::W1)
    }

    pub fn is_iss(&self) -> bool {
        matches!(
            self,
            Io::Is0 | Io::Is1 | Io::Is2 | Io::Is3 | Io::Is4 | Io::Is5
        )
    }

    pub fn is_ft(&self) -> bool {
        matches!(self, Io::Ft0 | Io::Ft1 | Io::Ft2 | Io::Fte)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Io::None)
    }

    pub fn src_index(&self) -> usize {
        match self {
            Io::S0 => 0,
            Io::S1 => 1,
            Io::S2 => 2,
            Io::S3 => 3,
            Io::S4 => 4,
            Io::S5 => 5,
            _ => panic!("Io is not a source"),
        }
    }

    pub fn dst_index(&self) -> usize {
        match self {
            Io::W0 => 0,
            Io::W1 => 1,
            _ => panic!("Io is not a destination"),
        }
    }

    pub fn iss_index(&self) -> usize {
        match self {
            Io::Is0 => 0,
            Io::Is1 => 1,
            Io::Is2 => 2,
            Io::Is3 => 3,
            Io::Is4 => 4,
            Io::Is5 => 5,
            _ => panic!("Io is not an internal selector"),
        }
    }
}

/// ALU operations. Pseudo-ops are rewritten into real ops by the lowering
/// passes and never reach grouping.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AluOp {
    Mbyp,
    Fadd,
    Fmul,
    Fmad,
    Add64,
    Tst,
    Movc,
    PckU8888,

    Mov,
    Cmov,
    Fabs,
    Fneg,
    Fnabs,
}

impl AluOp {
    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            AluOp::Mov | AluOp::Cmov | AluOp::Fabs | AluOp::Fneg | AluOp::Fnabs
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackendOp {
    UvswWrite,
    UvswEmit,
    UvswEndtask,
    UvswEmitThenEndtask,
    UvswWriteThenEmitThenEndtask,
    Ld,
    FitrpPixel,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CtrlOp {
    Nop,
    Wdf,
    Br,

    End,
}

impl CtrlOp {
    pub fn is_pseudo(&self) -> bool {
        matches!(self, CtrlOp::End)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BitwiseOp {
    Byp0,
}

/// Operand reference. Every source and destination slot is a `Ref`; passes
/// rewrite them in place through [`Shader::instr_set_src`] /
/// [`Shader::instr_set_dst`] so the use/write records stay consistent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ref {
    None,
    /// Raw value that is not a register and will be encoded as-is.
    Val(u32),
    /// Immediate that is expected to be replaced with a register reference.
    Imm(u32),
    Reg(RegId),
    Regarray(RegArrayId),
    Io(Io),
    Drc(u8),
}

impl Ref {
    pub fn is_none(&self) -> bool {
        matches!(self, Ref::None)
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, Ref::Imm(_))
    }

    pub fn is_reg(&self) -> bool {
        matches!(self, Ref::Reg(_))
    }

    pub fn is_regarray(&self) -> bool {
        matches!(self, Ref::Regarray(_))
    }

    pub fn is_reg_or_regarray(&self) -> bool {
        self.is_reg() || self.is_regarray()
    }

    pub fn as_reg(&self) -> Option<RegId> {
        match self {
            Ref::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_regarray(&self) -> Option<RegArrayId> {
        match self {
            Ref::Regarray(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_io(&self) -> Option<Io> {
        match self {
            Ref::Io(io) => Some(*io),
            _ => None,
        }
    }

    pub fn as_imm(&self) -> Option<u32> {
        match self {
            Ref::Imm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_val(&self) -> Option<u32> {
        match self {
            Ref::Val(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_drc(&self) -> Option<u8> {
        match self {
            Ref::Drc(d) => Some(*d),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Dst {
    pub dst_ref: Ref,
    pub dst_mods: AluDstMods,
}

impl Default for Ref {
    fn default() -> Ref {
        Ref::None
    }
}

impl Dst {
    pub fn new(dst_ref: Ref) -> Dst {
        Dst {
            dst_ref,
            dst_mods: AluDstMods::empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Src {
    pub src_ref: Ref,
    pub src_mods: AluSrcMods,
}

impl Src {
    pub fn new(src_ref: Ref) -> Src {
        Src {
            src_ref,
            src_mods: AluSrcMods::empty(),
        }
    }
}

/// A destination and a source are trivially equal when they name the same
/// object and neither carries modifiers.
pub fn dst_src_equal(dst: &Dst, src: &Src) -> bool {
    dst.dst_mods.is_empty() && src.src_mods.is_empty() && dst.dst_ref == src.src_ref
}

#[derive(Clone, Debug)]
pub struct AluInstr {
    pub op: AluOp,
    pub mods: AluOpMods,
    pub dsts: Vec<Dst>,
    pub srcs: Vec<Src>,
}

#[derive(Clone, Debug)]
pub struct BackendInstr {
    pub op: BackendOp,
    pub mods: BackendOpMods,
    pub dsts: Vec<Dst>,
    pub srcs: Vec<Src>,
}

#[derive(Clone, Debug)]
pub struct CtrlInstr {
    pub op: CtrlOp,
    pub mods: CtrlOpMods,
    pub dsts: Vec<Dst>,
    pub srcs: Vec<Src>,
    pub target_block: Option<BlockId>,
}

#[derive(Clone, Debug)]
pub struct BitwiseInstr {
    pub op: BitwiseOp,
    pub dsts: Vec<Dst>,
    pub srcs: Vec<Src>,
}

#[derive(Clone, Debug)]
pub enum InstrOp {
    Alu(AluInstr),
    Backend(BackendInstr),
    Ctrl(CtrlInstr),
    Bitwise(BitwiseInstr),
}

/// Hardware co-issue phases within an instruction group.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    P0 = 0,
    P1,
    P2Pck,
    P2Tst,
    P2Mov,
    Backend,
}

pub const PHASE_COUNT: usize = 6;

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::P0,
        Phase::P1,
        Phase::P2Pck,
        Phase::P2Tst,
        Phase::P2Mov,
        Phase::Backend,
    ];

    /// Control instructions cannot be co-issued; they occupy phase 0 alone.
    pub const CTRL: Phase = Phase::P0;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GroupAlu {
    Main,
    Bitwise,
    Control,
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub id: InstrId,
    /// Creation-order index; dense program order after trimming.
    pub index: u32,
    pub block: BlockId,
    pub exec_cond: ExecCond,
    pub repeat: u32,
    pub end: bool,
    /// Group the next instruction together with this one. Set by a scheduling
    /// heuristic that does not exist yet; grouping refuses it.
    pub group_next: bool,
    pub comment: Option<String>,
    /// Set once the shader is grouped.
    pub group: Option<(GroupId, Phase)>,
    pub op: InstrOp,
}

impl Instr {
    pub fn dsts(&self) -> &[Dst] {
        match &self.op {
            InstrOp::Alu(alu) => &alu.dsts,
            InstrOp::Backend(be) => &be.dsts,
            InstrOp::Ctrl(ctrl) => &ctrl.dsts,
            InstrOp::Bitwise(bw) => &bw.dsts,
        }
    }

    pub fn dsts_mut(&mut self) -> &mut [Dst] {
        match &mut self.op {
            InstrOp::Alu(alu) => &mut alu.dsts,
            InstrOp::Backend(be) => &mut be.dsts,
            InstrOp::Ctrl(ctrl) => &mut ctrl.dsts,
            InstrOp::Bitwise(bw) => &mut bw.dsts,
        }
    }

    pub fn srcs(&self) -> &[Src] {
        match &self.op {
            InstrOp::Alu(alu) => &alu.srcs,
            InstrOp::Backend(be) => &be.srcs,
            InstrOp::Ctrl(ctrl) => &ctrl.srcs,
            InstrOp::Bitwise(bw) => &bw.srcs,
        }
    }

    pub fn srcs_mut(&mut self) -> &mut [Src] {
        match &mut self.op {
            InstrOp::Alu(alu) => &mut alu.srcs,
            InstrOp::Backend(be) => &mut be.srcs,
            InstrOp::Ctrl(ctrl) => &mut ctrl.srcs,
            InstrOp::Bitwise(bw) => &mut bw.srcs,
        }
    }

    pub fn as_alu(&self) -> Option<&AluInstr> {
        match &self.op {
            InstrOp::Alu(alu) => Some(alu),
            _ => None,
        }
    }

    pub fn as_alu_mut(&mut self) -> Option<&mut AluInstr> {
        match &mut self.op {
            InstrOp::Alu(alu) => Some(alu),
            _ => None,
        }
    }

    pub fn as_backend(&self) -> Option<&BackendInstr> {
        match &self.op {
            InstrOp::Backend(be) => Some(be),
            _ => None,
        }
    }

    pub fn as_ctrl(&self) -> Option<&CtrlInstr> {
        match &self.op {
            InstrOp::Ctrl(ctrl) => Some(ctrl),
            _ => None,
        }
    }

    pub fn as_ctrl_mut(&mut self) -> Option<&mut CtrlInstr> {
        match &mut self.op {
            InstrOp::Ctrl(ctrl) => Some(ctrl),
            _ => None,
        }
    }

    pub fn as_bitwise(&self) -> Option<&BitwiseInstr> {
        match &self.op {
            InstrOp::Bitwise(bw) => Some(bw),
            _ => None,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        match &self.op {
            InstrOp::Alu(alu) => alu.op.is_pseudo(),
            InstrOp::Backend(_) => false,
            InstrOp::Ctrl(ctrl) => ctrl.op.is_pseudo(),
            InstrOp::Bitwise(_) => false,
        }
    }

    /// Whether this is a NOP carrying the end-of-program modifier.
    pub fn is_nop_end(&self) -> bool {
        match &self.op {
            InstrOp::Ctrl(ctrl) => {
                ctrl.op == CtrlOp::Nop && ctrl.mods.contains(CtrlOpMods::END)
            }
            _ => false,
        }
    }

    pub fn add_comment(&mut self, comment: &str) {
        match &mut self.comment {
            Some(c) => {
                c.push_str(", ");
                c.push_str(comment);
            }
            None => self.comment = Some(comment.to_string()),
        }
    }
}

/// A `(instruction, operand index)` pair recording one write or use site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefLoc {
    pub instr: InstrId,
    pub slot: usize,
}

#[derive(Clone, Debug)]
pub struct Reg {
    pub class: RegClass,
    pub index: u32,
    /// Component of a vector SSA register, interned in its own namespace.
    pub component: Option<u8>,
    /// Register array this register is part of, if any.
    pub regarray: Option<RegArrayId>,
    pub writes: Vec<RefLoc>,
    pub uses: Vec<RefLoc>,
}

impl Reg {
    pub fn is_unused(&self) -> bool {
        self.writes.is_empty() && self.uses.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RegArray {
    pub regs: Vec<RegId>,
    pub parent: Option<RegArrayId>,
    pub children: Vec<RegArrayId>,
    pub component: Option<u8>,
    pub writes: Vec<RefLoc>,
    pub uses: Vec<RefLoc>,
}

impl RegArray {
    pub fn size(&self) -> u32 {
        self.regs.len() as u32
    }

    pub fn is_unused(&self) -> bool {
        self.writes.is_empty() && self.uses.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub index: u32,
    pub label: Option<String>,
    pub instrs: Vec<InstrId>,
    /// Branch instructions that target this block.
    pub uses: Vec<InstrId>,
    /// Instruction groups, populated by grouping.
    pub groups: Vec<GroupId>,
}

/// A DRC transaction: a data request (acquire) and the WDF that waits on it.
#[derive(Clone, Copy, Debug)]
pub struct DrcTrxn {
    pub acquire: InstrId,
    pub release: Option<InstrId>,
}

pub const ISA_SRCS: usize = 6;
pub const ISA_DSTS: usize = 2;
pub const ISA_ISSS: usize = 6;

/// Maps symbolic I/O slots to the registers (or further I/O slots) that feed
/// them for one instruction group.
#[derive(Clone, Debug)]
pub struct IoSel {
    pub srcs: [Ref; ISA_SRCS],
    pub dsts: [Ref; ISA_DSTS],
    pub iss: [Ref; ISA_ISSS],
}

impl Default for IoSel {
    fn default() -> IoSel {
        IoSel {
            srcs: [Ref::None; ISA_SRCS],
            dsts: [Ref::None; ISA_DSTS],
            iss: [Ref::None; ISA_ISSS],
        }
    }
}

impl IoSel {
    pub fn ref_for(&self, io: Io) -> &Ref {
        if io.is_src() {
            &self.srcs[io.src_index()]
        } else if io.is_dst() {
            &self.dsts[io.dst_index()]
        } else if io.is_iss() {
            &self.iss[io.iss_index()]
        } else {
            panic!("Unsupported io slot");
        }
    }

    pub fn ref_for_mut(&mut self, io: Io) -> &mut Ref {
        if io.is_src() {
            &mut self.srcs[io.src_index()]
        } else if io.is_dst() {
            &mut self.dsts[io.dst_index()]
        } else if io.is_iss() {
            &mut self.iss[io.iss_index()]
        } else {
            panic!("Unsupported io slot");
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GroupHeader {
    /// Bitmask over [`Phase`] of occupied phases.
    pub phases: u8,
    pub exec_cond: ExecCond,
    pub alu: Option<GroupAlu>,
    pub end: bool,
    pub repeat: u32,
}

/// Byte sizes of the encoded fields of a group, and its final placement.
#[derive(Clone, Debug, Default)]
pub struct GroupSize {
    pub header: u32,
    pub instrs: [u32; PHASE_COUNT],
    pub lower_srcs: u32,
    pub upper_srcs: u32,
    pub iss: u32,
    pub dsts: u32,
    /// Padding to make the total size a whole word (2 bytes).
    pub word_padding: u32,
    /// Padding to align the following group in memory.
    pub align_padding: u32,
    pub total: u32,
    pub offset: u32,
}

/// Encoding variant table rows selected during size calculation, so the
/// encoder emits exactly the layout that was sized.
#[derive(Clone, Copy, Debug, Default)]
pub struct EncodeInfo {
    pub lower_src_index: Option<usize>,
    pub upper_src_index: Option<usize>,
    pub dst_index: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Group {
    pub block: BlockId,
    pub index: u32,
    pub instrs: [Option<InstrId>; PHASE_COUNT],
    pub io_sel: IoSel,
    pub header: GroupHeader,
    pub size: GroupSize,
    pub encode_info: EncodeInfo,
}

/// Insertion point used by the builder: before `block.instrs[ip]`.
#[derive(Clone, Copy, Debug)]
pub struct Cursor {
    pub block: BlockId,
    pub ip: usize,
}

impl Cursor {
    pub fn block_start(block: BlockId) -> Cursor {
        Cursor { block, ip: 0 }
    }

    pub fn block_end(shader: &Shader, block: BlockId) -> Cursor {
        Cursor {
            block,
            ip: shader.block(block).instrs.len(),
        }
    }

    pub fn before_instr(shader: &Shader, instr: InstrId) -> Cursor {
        let block = shader.instr(instr).block;
        Cursor {
            block,
            ip: shader.instr_pos(instr),
        }
    }

    pub fn after_instr(shader: &Shader, instr: InstrId) -> Cursor {
        let block = shader.instr(instr).block;
        Cursor {
            block,
            ip: shader.instr_pos(instr) + 1,
        }
    }
}

const REG_CACHE_KEY_COMPONENT_BITS: u32 = 3;
const REG_CACHE_KEY_INDEX_BITS: u32 = 28;

/// Packed 32-bit interning key: component / index / vec flag.
fn reg_cache_key(index: u32, component: Option<u8>) -> u32 {
    match component {
        None => {
            assert!(index < (1 << (REG_CACHE_KEY_COMPONENT_BITS + REG_CACHE_KEY_INDEX_BITS)));
            index
        }
        Some(c) => {
            assert!(u32::from(c) < (1 << REG_CACHE_KEY_COMPONENT_BITS));
            assert!(index < (1 << REG_CACHE_KEY_INDEX_BITS));
            u32::from(c) | (index << REG_CACHE_KEY_COMPONENT_BITS) | (1 << 31)
        }
    }
}

/// Packed 64-bit regarray interning key: register key / class / size.
fn regarray_cache_key(
    size: u32,
    class: RegClass,
    start_index: u32,
    component: Option<u8>,
) -> u64 {
    let reg_key = reg_cache_key(start_index, component);
    u64::from(reg_key) | ((class as u64) << 32) | ((size as u64) << 40)
}

pub struct Shader {
    pub stage: ShaderStage,
    pub name: String,
    pub is_grouped: bool,

    blocks: Vec<Block>,
    block_order: Vec<BlockId>,
    instrs: Vec<Option<Instr>>,
    regs: Vec<Option<Reg>>,
    regarrays: Vec<Option<RegArray>>,
    groups: Vec<Group>,

    class_regs: [Vec<RegId>; REG_CLASS_COUNT],
    regs_used: [BitSet; REG_CLASS_COUNT],
    reg_cache: FxHashMap<(RegClass, u32), RegId>,
    regarray_cache: FxHashMap<u64, RegArrayId>,

    pub drc_trxns: [Vec<DrcTrxn>; ROGUE_DRCS],
    imm_uses: Vec<RefLoc>,

    next_instr: u32,
    next_block: u32,
}

impl Shader {
    pub fn new(stage: ShaderStage) -> Shader {
        Shader {
            stage,
            name: String::new(),
            is_grouped: false,
            blocks: Vec::new(),
            block_order: Vec::new(),
            instrs: Vec::new(),
            regs: Vec::new(),
            regarrays: Vec::new(),
            groups: Vec::new(),
            class_regs: Default::default(),
            regs_used: Default::default(),
            reg_cache: FxHashMap::default(),
            regarray_cache: FxHashMap::default(),
            drc_trxns: Default::default(),
            imm_uses: Vec::new(),
            next_instr: 0,
            next_block: 0,
        }
    }

    /* Blocks. */

    pub fn block_create(&mut self, label: Option<&str>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            index: self.next_block,
            label: label.map(|l| l.to_string()),
            instrs: Vec::new(),
            uses: Vec::new(),
            groups: Vec::new(),
        });
        self.next_block += 1;
        self.block_order.push(id);
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.block_order.clone()
    }

    pub fn first_block(&self) -> BlockId {
        *self.block_order.first().expect("Shader has no blocks")
    }

    pub fn last_block(&self) -> BlockId {
        *self.block_order.last().expect("Shader has no blocks")
    }

    /* Instructions. */

    pub fn instr_exists(&self, id: InstrId) -> bool {
        self.instrs[id.0 as usize].is_some()
    }

    pub fn reg_exists(&self, id: RegId) -> bool {
        self.regs[id.0 as usize].is_some()
    }

    pub fn regarray_exists(&self, id: RegArrayId) -> bool {
        self.regarrays[id.0 as usize].is_some()
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        self.instrs[id.0 as usize]
            .as_ref()
            .expect("Use of deleted instruction")
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        self.instrs[id.0 as usize]
            .as_mut()
            .expect("Use of deleted instruction")
    }

    /// All instruction ids in block order, instruction order.
    pub fn instr_ids(&self) -> Vec<InstrId> {
        let mut ids = Vec::new();
        for b in &self.block_order {
            ids.extend_from_slice(&self.block(*b).instrs);
        }
        ids
    }

    pub fn num_instrs(&self) -> usize {
        self.block_order
            .iter()
            .map(|b| self.block(*b).instrs.len())
            .sum()
    }

    fn instr_pos(&self, id: InstrId) -> usize {
        let block = self.instr(id).block;
        self.block(block)
            .instrs
            .iter()
            .position(|i| *i == id)
            .expect("Instruction is not in its block")
    }

    /// Creates an instruction and inserts it at the cursor position, linking
    /// its writes and uses. Returns the id and the advanced cursor.
    pub fn instr_insert(&mut self, cursor: Cursor, op: InstrOp) -> (InstrId, Cursor) {
        let id = InstrId(self.instrs.len() as u32);
        let instr = Instr {
            id,
            index: self.next_instr,
            block: cursor.block,
            exec_cond: ExecCond::default(),
            repeat: 1,
            end: false,
            group_next: false,
            comment: None,
            group: None,
            op,
        };
        self.next_instr += 1;
        self.instrs.push(Some(instr));
        let block = self.block_mut(cursor.block);
        assert!(cursor.ip <= block.instrs.len());
        block.instrs.insert(cursor.ip, id);

        self.link_instr(id);

        (
            id,
            Cursor {
                block: cursor.block,
                ip: cursor.ip + 1,
            },
        )
    }

    pub fn instr_delete(&mut self, id: InstrId) {
        // Deleting a DRC acquire takes its WDF release with it.
        let mut releases = Vec::new();
        for slot in 0..ROGUE_DRCS {
            for trxn in &self.drc_trxns[slot] {
                if trxn.acquire == id {
                    if let Some(r) = trxn.release {
                        releases.push(r);
                    }
                }
            }
        }
        for r in releases {
            self.instr_delete(r);
        }

        self.unlink_instr(id);
        let pos = self.instr_pos(id);
        let block = self.instr(id).block;
        self.block_mut(block).instrs.remove(pos);
        self.instrs[id.0 as usize] = None;
    }

    /* Use/write/imm/drc/block-use link maintenance. */

    fn link_instr(&mut self, id: InstrId) {
        let dst_refs: Vec<Ref> = self.instr(id).dsts().iter().map(|d| d.dst_ref).collect();
        let src_refs: Vec<Ref> = self.instr(id).srcs().iter().map(|s| s.src_ref).collect();

        for (i, r) in dst_refs.iter().enumerate() {
            self.link_dst(id, i, *r);
        }
        for (i, r) in src_refs.iter().enumerate() {
            self.link_src(id, i, *r);
        }

        let ctrl_info = match &self.instr(id).op {
            InstrOp::Ctrl(ctrl) => Some((ctrl.op, ctrl.target_block)),
            _ => None,
        };
        let is_backend = matches!(&self.instr(id).op, InstrOp::Backend(_));

        if let Some((op, target)) = ctrl_info {
            if let Some(target) = target {
                self.block_mut(target).uses.push(id);
            }
            if op == CtrlOp::Wdf {
                let drc = src_refs[0]
                    .as_drc()
                    .expect("WDF source must be a DRC reference");
                self.link_drc_release(id, drc);
            }
        } else if is_backend {
            for r in &src_refs {
                if let Ref::Drc(drc) = r {
                    self.link_drc_acquire(id, *drc);
                }
            }
        }
    }

    fn unlink_instr(&mut self, id: InstrId) {
        let dst_refs: Vec<Ref> = self.instr(id).dsts().iter().map(|d| d.dst_ref).collect();
        let src_refs: Vec<Ref> = self.instr(id).srcs().iter().map(|s| s.src_ref).collect();

        for (i, r) in dst_refs.iter().enumerate() {
            self.unlink_dst(id, i, *r);
        }
        for (i, r) in src_refs.iter().enumerate() {
            self.unlink_src(id, i, *r);
        }

        let ctrl_info = match &self.instr(id).op {
            InstrOp::Ctrl(ctrl) => Some((ctrl.op, ctrl.target_block)),
            _ => None,
        };
        let is_backend = matches!(&self.instr(id).op, InstrOp::Backend(_));

        if let Some((op, target)) = ctrl_info {
            if let Some(target) = target {
                self.block_mut(target).uses.retain(|u| *u != id);
            }
            if op == CtrlOp::Wdf {
                for slot in 0..ROGUE_DRCS {
                    for trxn in &mut self.drc_trxns[slot] {
                        if trxn.release == Some(id) {
                            trxn.release = None;
                        }
                    }
                }
            }
        } else if is_backend {
            for slot in 0..ROGUE_DRCS {
                self.drc_trxns[slot].retain(|t| t.acquire != id);
            }
        }
    }

    fn link_dst(&mut self, id: InstrId, slot: usize, r: Ref) {
        let loc = RefLoc { instr: id, slot };
        match r {
            Ref::Reg(reg) => self.reg_mut(reg).writes.push(loc),
            Ref::Regarray(ra) => self.regarray_mut(ra).writes.push(loc),
            Ref::Imm(_) => panic!("Immediates cannot be destinations"),
            Ref::None | Ref::Val(_) | Ref::Io(_) | Ref::Drc(_) => (),
        }
    }

    fn unlink_dst(&mut self, id: InstrId, slot: usize, r: Ref) {
        let loc = RefLoc { instr: id, slot };
        match r {
            Ref::Reg(reg) => self.reg_mut(reg).writes.retain(|l| *l != loc),
            Ref::Regarray(ra) => self.regarray_mut(ra).writes.retain(|l| *l != loc),
            _ => (),
        }
    }

    fn link_src(&mut self, id: InstrId, slot: usize, r: Ref) {
        let loc = RefLoc { instr: id, slot };
        match r {
            Ref::Reg(reg) => self.reg_mut(reg).uses.push(loc),
            Ref::Regarray(ra) => self.regarray_mut(ra).uses.push(loc),
            Ref::Imm(_) => self.imm_uses.push(loc),
            Ref::None | Ref::Val(_) | Ref::Io(_) | Ref::Drc(_) => (),
        }
    }

    fn unlink_src(&mut self, id: InstrId, slot: usize, r: Ref) {
        let loc = RefLoc { instr: id, slot };
        match r {
            Ref::Reg(reg) => self.reg_mut(reg).uses.retain(|l| *l != loc),
            Ref::Regarray(ra) => self.regarray_mut(ra).uses.retain(|l| *l != loc),
            Ref::Imm(_) => self.imm_uses.retain(|l| *l != loc),
            _ => (),
        }
    }

    fn link_drc_acquire(&mut self, id: InstrId, drc: u8) {
        let slot = usize::from(drc);
        assert!(slot < ROGUE_DRCS);
        self.drc_trxns[slot].push(DrcTrxn {
            acquire: id,
            release: None,
        });
    }

    fn link_drc_release(&mut self, id: InstrId, drc: u8) {
        let slot = usize::from(drc);
        assert!(slot < ROGUE_DRCS);
        // Pair with the oldest unreleased transaction; a WDF with nothing to
        // wait on is caught by the validator.
        for trxn in &mut self.drc_trxns[slot] {
            if trxn.release.is_none() {
                trxn.release = Some(id);
                return;
            }
        }
    }

    /// Pending immediate source locations, in insertion order.
    pub fn imm_uses(&self) -> Vec<RefLoc> {
        self.imm_uses.clone()
    }

    /* Operand rewriting. */

    pub fn instr_set_src(&mut self, id: InstrId, slot: usize, new_ref: Ref) {
        let old = self.instr(id).srcs()[slot].src_ref;
        if old == new_ref {
            return;
        }
        assert!(
            !matches!(old, Ref::Drc(_)) && !matches!(new_ref, Ref::Drc(_)),
            "DRC references cannot be rewritten"
        );
        self.unlink_src(id, slot, old);
        self.instr_mut(id).srcs_mut()[slot].src_ref = new_ref;
        self.link_src(id, slot, new_ref);
    }

    pub fn instr_set_dst(&mut self, id: InstrId, slot: usize, new_ref: Ref) {
        let old = self.instr(id).dsts()[slot].dst_ref;
        if old == new_ref {
            return;
        }
        self.unlink_dst(id, slot, old);
        self.instr_mut(id).dsts_mut()[slot].dst_ref = new_ref;
        self.link_dst(id, slot, new_ref);
    }

    /// Repoints every write and use of `old` at `new`, then deletes `old`.
    pub fn reg_replace(&mut self, old: RegId, new: RegId) {
        assert!(old != new);
        let writes = self.reg(old).writes.clone();
        for w in writes {
            self.instr_set_dst(w.instr, w.slot, Ref::Reg(new));
        }
        let uses = self.reg(old).uses.clone();
        for u in uses {
            self.instr_set_src(u.instr, u.slot, Ref::Reg(new));
        }
        self.reg_delete(old);
    }

    /// Repoints every write and use of `old` (and of its subarrays) at `new`
    /// (and matching subarrays of `new`), then deletes `old`.
    pub fn regarray_replace(&mut self, old: RegArrayId, new: RegArrayId) {
        assert!(old != new);
        assert!(self.regarray(old).parent.is_none());

        let new_class = self.regarray_class(new);
        let new_start = self.regarray_start(new);
        let old_start = self.regarray_start(old);

        let writes = self.regarray(old).writes.clone();
        for w in writes {
            self.instr_set_dst(w.instr, w.slot, Ref::Regarray(new));
        }
        let uses = self.regarray(old).uses.clone();
        for u in uses {
            self.instr_set_src(u.instr, u.slot, Ref::Regarray(new));
        }

        let children = self.regarray(old).children.clone();
        for child in children {
            let child_size = self.regarray(child).size();
            // For vector arrays the containment offset is in components.
            let offset = match self.regarray(old).component {
                None => self.regarray_start(child) - old_start,
                Some(c) => {
                    u32::from(self.regarray(child).component.unwrap()) - u32::from(c)
                }
            };
            let new_child =
                self.regarray_cached(child_size, new_class, new_start + offset);
            let writes = self.regarray(child).writes.clone();
            for w in writes {
                self.instr_set_dst(w.instr, w.slot, Ref::Regarray(new_child));
            }
            let uses = self.regarray(child).uses.clone();
            for u in uses {
                self.instr_set_src(u.instr, u.slot, Ref::Regarray(new_child));
            }
            self.regarray_delete(child);
        }

        self.regarray_delete(old);
    }

    /// Replaces a pending immediate source with a register reference.
    pub fn imm_use_replace(&mut self, loc: RefLoc, new_reg: RegId) {
        let old = self.instr(loc.instr).srcs()[loc.slot].src_ref;
        assert!(old.is_imm());
        self.instr_set_src(loc.instr, loc.slot, Ref::Reg(new_reg));
    }

    /* Registers. */

    pub fn reg(&self, id: RegId) -> &Reg {
        self.regs[id.0 as usize]
            .as_ref()
            .expect("Use of deleted register")
    }

    pub fn reg_mut(&mut self, id: RegId) -> &mut Reg {
        self.regs[id.0 as usize]
            .as_mut()
            .expect("Use of deleted register")
    }

    pub fn class_reg_ids(&self, class: RegClass) -> Vec<RegId> {
        self.class_regs[class as usize].clone()
    }

    pub fn reg_is_used(&self, class: RegClass, index: u32) -> bool {
        self.regs_used[class as usize].get(index as usize)
    }

    /// Interning cache lookup without creating the register.
    pub fn reg_lookup(&self, class: RegClass, index: u32, component: Option<u8>) -> Option<RegId> {
        let key = reg_cache_key(index, component);
        self.reg_cache.get(&(class, key)).copied()
    }

    /// Indices marked used in a class's usage bitset, ascending.
    pub fn used_reg_indices(&self, class: RegClass) -> Vec<u32> {
        self.regs_used[class as usize]
            .iter()
            .map(|i| i as u32)
            .collect()
    }

    fn reg_cached_keyed(&mut self, class: RegClass, index: u32, component: Option<u8>) -> RegId {
        let key = reg_cache_key(index, component);
        if let Some(&id) = self.reg_cache.get(&(class, key)) {
            return id;
        }
        let id = RegId(self.regs.len() as u32);
        self.regs.push(Some(Reg {
            class,
            index,
            component,
            regarray: None,
            writes: Vec::new(),
            uses: Vec::new(),
        }));
        self.class_regs[class as usize].push(id);
        if component.is_none() {
            self.regs_used[class as usize].set(index as usize, true);
        }
        self.reg_cache.insert((class, key), id);
        id
    }

    pub fn reg_cached(&mut self, class: RegClass, index: u32) -> RegId {
        self.reg_cached_keyed(class, index, None)
    }

    pub fn ssa_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Ssa, index)
    }

    pub fn temp_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Temp, index)
    }

    pub fn coeff_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Coeff, index)
    }

    pub fn shared_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Shared, index)
    }

    pub fn special_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Special, index)
    }

    pub fn internal_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Internal, index)
    }

    pub fn const_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::Const, index)
    }

    pub fn pixout_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::PixOut, index)
    }

    pub fn vtxin_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::VtxIn, index)
    }

    pub fn vtxout_reg(&mut self, index: u32) -> RegId {
        self.reg_cached(RegClass::VtxOut, index)
    }

    pub fn ssa_vec_reg(&mut self, index: u32, component: u8) -> RegId {
        self.reg_cached_keyed(RegClass::Ssa, index, Some(component))
    }

    /// Moves a register to a new class and/or index, keeping the interning
    /// cache, class lists and usage bitset consistent. Returns false if the
    /// register already had that placement.
    pub fn reg_set(&mut self, id: RegId, class: RegClass, index: u32) -> bool {
        let (old_class, old_index, component) = {
            let reg = self.reg(id);
            (reg.class, reg.index, reg.component)
        };
        if old_class == class && old_index == index {
            return false;
        }

        let old_key = reg_cache_key(old_index, component);
        let new_key = reg_cache_key(index, component);
        assert!(
            !self.reg_cache.contains_key(&(class, new_key)),
            "Register target placement is already interned"
        );

        self.reg_cache.remove(&(old_class, old_key));
        if component.is_none() {
            self.regs_used[old_class as usize].set(old_index as usize, false);
        }
        if old_class != class {
            self.class_regs[old_class as usize].retain(|r| *r != id);
            self.class_regs[class as usize].push(id);
        }

        let reg = self.reg_mut(id);
        reg.class = class;
        reg.index = index;

        self.reg_cache.insert((class, new_key), id);
        if component.is_none() {
            self.regs_used[class as usize].set(index as usize, true);
        }
        true
    }

    /// Like [`Shader::reg_set`], for rewriting a virtual register onto an
    /// unoccupied hardware index.
    pub fn reg_rewrite(&mut self, id: RegId, class: RegClass, index: u32) -> bool {
        assert!(!self.reg_is_used(class, index));
        self.reg_set(id, class, index)
    }

    pub fn reg_delete(&mut self, id: RegId) {
        assert!(self.reg(id).is_unused());
        let (class, index, component, regarray) = {
            let reg = self.reg(id);
            (reg.class, reg.index, reg.component, reg.regarray)
        };
        assert!(regarray.is_none(), "Register is part of a regarray");
        let key = reg_cache_key(index, component);
        self.reg_cache.remove(&(class, key));
        self.class_regs[class as usize].retain(|r| *r != id);
        if component.is_none() {
            self.regs_used[class as usize].set(index as usize, false);
        }
        self.regs[id.0 as usize] = None;
    }

    /// Number of hardware registers of a class the shader occupies: one past
    /// the highest used index, since hardware register banks are programmed
    /// as contiguous windows.
    pub fn count_used_regs(&self, class: RegClass) -> u32 {
        self.regs_used[class as usize]
            .last()
            .map_or(0, |l| l as u32 + 1)
    }

    /* Register arrays. */

    pub fn regarray(&self, id: RegArrayId) -> &RegArray {
        self.regarrays[id.0 as usize]
            .as_ref()
            .expect("Use of deleted regarray")
    }

    pub fn regarray_mut(&mut self, id: RegArrayId) -> &mut RegArray {
        self.regarrays[id.0 as usize]
            .as_mut()
            .expect("Use of deleted regarray")
    }

    pub fn regarray_ids(&self) -> Vec<RegArrayId> {
        (0..self.regarrays.len() as u32)
            .map(RegArrayId)
            .filter(|id| self.regarrays[id.0 as usize].is_some())
            .collect()
    }

    pub fn regarray_class(&self, id: RegArrayId) -> RegClass {
        self.reg(self.regarray(id).regs[0]).class
    }

    pub fn regarray_start(&self, id: RegArrayId) -> u32 {
        self.reg(self.regarray(id).regs[0]).index
    }

    fn regarray_cached_keyed(
        &mut self,
        size: u32,
        class: RegClass,
        start_index: u32,
        component: Option<u8>,
    ) -> RegArrayId {
        assert!(size > 0);
        let key = regarray_cache_key(size, class, start_index, component);
        if let Some(&id) = self.regarray_cache.get(&key) {
            return id;
        }

        // Ordinary arrays span consecutive register indices; vector SSA
        // arrays share their def's index and span components.
        let regs: Vec<RegId> = (0..size)
            .map(|i| match component {
                None => self.reg_cached_keyed(class, start_index + i, None),
                Some(c) => self.reg_cached_keyed(class, start_index, Some(c + i as u8)),
            })
            .collect();

        let id = RegArrayId(self.regarrays.len() as u32);
        self.regarrays.push(Some(RegArray {
            regs: regs.clone(),
            parent: None,
            children: Vec::new(),
            component,
            writes: Vec::new(),
            uses: Vec::new(),
        }));
        self.regarray_cache.insert(key, id);

        // Establish the one-level containment tree: adopt this array into a
        // wider existing array, or adopt narrower existing arrays into it.
        let range = match component {
            None => start_index..start_index + size,
            Some(c) => u32::from(c)..u32::from(c) + size,
        };
        let mut parent = None;
        let mut adopted = Vec::new();
        for other in self.regarray_ids() {
            if other == id || self.regarray_class(other) != class {
                continue;
            }
            let other_comp = self.regarray(other).component;
            match (component, other_comp) {
                (None, None) => (),
                (Some(_), Some(_)) => {
                    // Vector arrays only nest within the same def.
                    if self.regarray_start(other) != start_index {
                        continue;
                    }
                }
                _ => continue,
            }
            let orange = match other_comp {
                None => {
                    let ostart = self.regarray_start(other);
                    ostart..ostart + self.regarray(other).size()
                }
                Some(c) => u32::from(c)..u32::from(c) + self.regarray(other).size(),
            };
            if orange.start <= range.start
                && orange.end >= range.end
                && orange != range
                && self.regarray(other).parent.is_none()
            {
                parent = Some(other);
            } else if range.start <= orange.start
                && range.end >= orange.end
                && self.regarray(other).parent.is_none()
            {
                adopted.push(other);
            }
        }

        if let Some(p) = parent {
            self.regarray_mut(id).parent = Some(p);
            self.regarray_mut(p).children.push(id);
            for r in &regs {
                self.reg_mut(*r).regarray = Some(p);
            }
        } else {
            for r in &regs {
                self.reg_mut(*r).regarray = Some(id);
            }
            for a in adopted {
                // Containment stays one level deep: grandchildren re-parent
                // onto the new root.
                let grandchildren = std::mem::take(&mut self.regarray_mut(a).children);
                self.regarray_mut(a).parent = Some(id);
                self.regarray_mut(id).children.push(a);
                for g in grandchildren {
                    self.regarray_mut(g).parent = Some(id);
                    self.regarray_mut(id).children.push(g);
                }
                let aregs = self.regarray(a).regs.clone();
                for r in aregs {
                    self.reg_mut(r).regarray = Some(id);
                }
            }
        }

        id
    }

    /// Re-interns an array under its registers' current class and placement.
    /// Used when a whole array has been renamed in place.
    pub fn regarray_retarget_cache(&mut self, id: RegArrayId, old_class: RegClass, old_start: u32) {
        let (size, component) = {
            let ra = self.regarray(id);
            (ra.size(), ra.component)
        };
        let old_key = regarray_cache_key(size, old_class, old_start, component);
        if self.regarray_cache.get(&old_key) == Some(&id) {
            self.regarray_cache.remove(&old_key);
        }
        let new_key = regarray_cache_key(
            size,
            self.regarray_class(id),
            self.regarray_start(id),
            component,
        );
        self.regarray_cache.insert(new_key, id);
    }

    pub fn regarray_cached(&mut self, size: u32, class: RegClass, start_index: u32) -> RegArrayId {
        self.regarray_cached_keyed(size, class, start_index, None)
    }

    pub fn ssa_regarray(&mut self, size: u32, start_index: u32) -> RegArrayId {
        self.regarray_cached(size, RegClass::Ssa, start_index)
    }

    pub fn temp_regarray(&mut self, size: u32, start_index: u32) -> RegArrayId {
        self.regarray_cached(size, RegClass::Temp, start_index)
    }

    pub fn coeff_regarray(&mut self, size: u32, start_index: u32) -> RegArrayId {
        self.regarray_cached(size, RegClass::Coeff, start_index)
    }

    pub fn shared_regarray(&mut self, size: u32, start_index: u32) -> RegArrayId {
        self.regarray_cached(size, RegClass::Shared, start_index)
    }

    pub fn ssa_vec_regarray(&mut self, size: u32, start_index: u32, component: u8) -> RegArrayId {
        self.regarray_cached_keyed(size, RegClass::Ssa, start_index, Some(component))
    }

    pub fn regarray_delete(&mut self, id: RegArrayId) {
        assert!(self.regarray(id).is_unused());
        let (parent, children, component, regs) = {
            let ra = self.regarray(id);
            (
                ra.parent,
                ra.children.clone(),
                ra.component,
                ra.regs.clone(),
            )
        };
        assert!(children.is_empty(), "Regarray still has children");

        let class = self.regarray_class(id);
        let start = self.regarray_start(id);
        let key = regarray_cache_key(regs.len() as u32, class, start, component);
        self.regarray_cache.remove(&key);

        if let Some(p) = parent {
            self.regarray_mut(p).children.retain(|c| *c != id);
        } else {
            for r in regs {
                self.reg_mut(r).regarray = None;
                if self.reg(r).is_unused() {
                    self.reg_delete(r);
                }
            }
        }
        self.regarrays[id.0 as usize] = None;
    }

    /// Rebuilds the interning caches from the live registers and arrays.
    /// Needed after dense renumbering has moved many registers at once.
    pub fn rebuild_regarray_cache(&mut self) {
        self.regarray_cache.clear();
        for id in self.regarray_ids() {
            let class = self.regarray_class(id);
            let start = self.regarray_start(id);
            let (size, component) = {
                let ra = self.regarray(id);
                (ra.size(), ra.component)
            };
            let key = regarray_cache_key(size, class, start, component);
            self.regarray_cache.insert(key, id);
        }
    }

    /* Groups. */

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0 as usize]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut Group {
        &mut self.groups[id.0 as usize]
    }

    pub fn group_create(&mut self, block: BlockId) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(Group {
            block,
            index: id.0,
            instrs: [None; PHASE_COUNT],
            io_sel: IoSel::default(),
            header: GroupHeader::default(),
            size: GroupSize::default(),
            encode_info: EncodeInfo::default(),
        });
        self.block_mut(block).groups.push(id);
        id
    }

    /// All group ids in block order, group order.
    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids = Vec::new();
        for b in &self.block_order {
            ids.extend_from_slice(&self.block(*b).groups);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn reg_interning_identity() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let a = s.ssa_reg(3);
        let b = s.ssa_reg(3);
        assert_eq!(a, b);

        let t = s.temp_reg(3);
        assert_ne!(a, t);

        let v0 = s.ssa_vec_reg(3, 0);
        let v1 = s.ssa_vec_reg(3, 1);
        assert_ne!(v0, v1);
        assert_eq!(v0, s.ssa_vec_reg(3, 0));

        let ra = s.ssa_regarray(2, 10);
        assert_eq!(ra, s.ssa_regarray(2, 10));
        assert_ne!(ra, s.ssa_regarray(2, 12));
    }

    #[test]
    fn regarray_containment() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let parent = s.ssa_regarray(4, 0);
        let child = s.ssa_regarray(2, 2);
        assert_eq!(s.regarray(child).parent, Some(parent));
        assert!(s.regarray(parent).children.contains(&child));
        let r2 = s.ssa_reg(2);
        assert_eq!(s.reg(r2).regarray, Some(parent));
    }

    #[test]
    fn use_write_tracking() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (s0, s1, s2) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let fmul = b.fmul(Ref::Reg(s2), Ref::Reg(s0), Ref::Reg(s1));

        assert_eq!(s.reg(s2).writes, vec![RefLoc { instr: fmul, slot: 0 }]);
        assert_eq!(s.reg(s0).uses, vec![RefLoc { instr: fmul, slot: 0 }]);
        assert_eq!(s.reg(s1).uses, vec![RefLoc { instr: fmul, slot: 1 }]);

        s.instr_set_src(fmul, 1, Ref::Reg(s0));
        assert!(s.reg(s1).uses.is_empty());
        assert_eq!(s.reg(s0).uses.len(), 2);

        s.instr_delete(fmul);
        assert!(s.reg(s0).is_unused());
        assert!(s.reg(s2).is_unused());
    }

    #[test]
    fn reg_replace_moves_all_sites() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let i0 = b.fadd(Ref::Reg(b_reg), Ref::Reg(a), Ref::Reg(a));
        let i1 = b.fmul(Ref::Reg(c), Ref::Reg(b_reg), Ref::Reg(a));

        let fresh = s.temp_reg(7);
        s.reg_replace(b_reg, fresh);
        assert_eq!(s.instr(i0).dsts()[0].dst_ref, Ref::Reg(fresh));
        assert_eq!(s.instr(i1).srcs()[0].src_ref, Ref::Reg(fresh));
        assert!(s.regs[b_reg.0 as usize].is_none());
    }

    #[test]
    fn reg_set_updates_cache_and_bitset() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let r = s.ssa_reg(5);
        assert!(s.reg_is_used(RegClass::Ssa, 5));
        assert!(s.reg_set(r, RegClass::Temp, 9));
        assert!(!s.reg_is_used(RegClass::Ssa, 5));
        assert!(s.reg_is_used(RegClass::Temp, 9));
        assert_eq!(s.temp_reg(9), r);
        assert_eq!(s.count_used_regs(RegClass::Temp), 10);
    }

    #[test]
    fn branches_track_block_uses() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let b0 = s.block_create(None);
        let b1 = s.block_create(Some("exit"));
        let mut b = Builder::new(&mut s, Cursor::block_start(b0));
        let br = b.br(b1);

        assert_eq!(s.block(b1).uses, vec![br]);
        s.instr_delete(br);
        assert!(s.block(b1).uses.is_empty());
    }

    #[test]
    fn drc_transactions_pair_with_wdf() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let addr = s.ssa_regarray(2, 0);
        let data = s.ssa_reg(2);
        let cursor = Cursor::block_end(&s, block);
        let mut b = Builder::new(&mut s, cursor);
        let ld = b.ld(Ref::Reg(data), Ref::Drc(0), 1, Ref::Regarray(addr));
        let wdf = b.wdf(0);

        assert_eq!(s.drc_trxns[0].len(), 1);
        assert_eq!(s.drc_trxns[0][0].acquire, ld);
        assert_eq!(s.drc_trxns[0][0].release, Some(wdf));

        s.instr_delete(ld);
        assert!(s.drc_trxns[0].is_empty());
        // The WDF release went with it.
        assert_eq!(s.num_instrs(), 0);
        let _ = wdf;
    }
}
