// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Cursor-positioned instruction builder.
//!
//! All passes and the translator create instructions through a [`Builder`] so
//! insertion, operand linking and cursor advancement happen in one place.

use crate::info::*;
use crate::ir::*;

pub struct Builder<'a> {
    pub shader: &'a mut Shader,
    cursor: Cursor,
}

impl<'a> Builder<'a> {
    pub fn new(shader: &'a mut Shader, cursor: Cursor) -> Builder<'a> {
        Builder { shader, cursor }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    fn push(&mut self, op: InstrOp) -> InstrId {
        let (id, cursor) = self.shader.instr_insert(self.cursor, op);
        self.cursor = cursor;
        id
    }

    fn alu(&mut self, op: AluOp, dsts: Vec<Dst>, srcs: Vec<Src>) -> InstrId {
        let info = alu_op_info(op);
        assert_eq!(dsts.len(), info.num_dsts);
        assert_eq!(srcs.len(), info.num_srcs);
        self.push(InstrOp::Alu(AluInstr {
            op,
            mods: AluOpMods::empty(),
            dsts,
            srcs,
        }))
    }

    fn backend(&mut self, op: BackendOp, dsts: Vec<Dst>, srcs: Vec<Src>) -> InstrId {
        let info = backend_op_info(op);
        assert_eq!(dsts.len(), info.num_dsts);
        assert_eq!(srcs.len(), info.num_srcs);
        self.push(InstrOp::Backend(BackendInstr {
            op,
            mods: BackendOpMods::empty(),
            dsts,
            srcs,
        }))
    }

    fn ctrl(
        &mut self,
        op: CtrlOp,
        srcs: Vec<Src>,
        target_block: Option<BlockId>,
    ) -> InstrId {
        let info = ctrl_op_info(op);
        assert_eq!(srcs.len(), info.num_srcs);
        assert_eq!(target_block.is_some(), info.has_target);
        self.push(InstrOp::Ctrl(CtrlInstr {
            op,
            mods: CtrlOpMods::empty(),
            dsts: Vec::new(),
            srcs,
            target_block,
        }))
    }

    /* ALU */

    pub fn mbyp(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.alu(AluOp::Mbyp, vec![Dst::new(dst)], vec![Src::new(src)])
    }

    pub fn fadd(&mut self, dst: Ref, s0: Ref, s1: Ref) -> InstrId {
        self.alu(
            AluOp::Fadd,
            vec![Dst::new(dst)],
            vec![Src::new(s0), Src::new(s1)],
        )
    }

    pub fn fmul(&mut self, dst: Ref, s0: Ref, s1: Ref) -> InstrId {
        self.alu(
            AluOp::Fmul,
            vec![Dst::new(dst)],
            vec![Src::new(s0), Src::new(s1)],
        )
    }

    pub fn fmad(&mut self, dst: Ref, s0: Ref, s1: Ref, s2: Ref) -> InstrId {
        self.alu(
            AluOp::Fmad,
            vec![Dst::new(dst)],
            vec![Src::new(s0), Src::new(s1), Src::new(s2)],
        )
    }

    pub fn add64(&mut self, dst: Ref, s0: Ref, s1: Ref, carry: Ref) -> InstrId {
        self.alu(
            AluOp::Add64,
            vec![Dst::new(dst)],
            vec![Src::new(s0), Src::new(s1), Src::new(carry)],
        )
    }

    pub fn tst(&mut self, dst: Ref, s0: Ref, s1: Ref) -> InstrId {
        self.alu(
            AluOp::Tst,
            vec![Dst::new(dst)],
            vec![Src::new(s0), Src::new(s1)],
        )
    }

    pub fn movc(&mut self, dst: Ref, cond: Ref, val: Ref) -> InstrId {
        self.alu(
            AluOp::Movc,
            vec![Dst::new(dst)],
            vec![Src::new(cond), Src::new(val)],
        )
    }

    pub fn pck_u8888(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.alu(AluOp::PckU8888, vec![Dst::new(dst)], vec![Src::new(src)])
    }

    pub fn mov(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.alu(AluOp::Mov, vec![Dst::new(dst)], vec![Src::new(src)])
    }

    pub fn cmov(&mut self, dst: Ref, src_true: Ref, src_false: Ref) -> InstrId {
        self.alu(
            AluOp::Cmov,
            vec![Dst::new(dst)],
            vec![Src::new(src_true), Src::new(src_false)],
        )
    }

    pub fn fabs(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.alu(AluOp::Fabs, vec![Dst::new(dst)], vec![Src::new(src)])
    }

    pub fn fneg(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.alu(AluOp::Fneg, vec![Dst::new(dst)], vec![Src::new(src)])
    }

    pub fn fnabs(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.alu(AluOp::Fnabs, vec![Dst::new(dst)], vec![Src::new(src)])
    }

    /* Backend */

    pub fn uvsw_write(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.backend(
            BackendOp::UvswWrite,
            vec![Dst::new(dst)],
            vec![Src::new(src)],
        )
    }

    pub fn uvsw_emit(&mut self) -> InstrId {
        self.backend(BackendOp::UvswEmit, Vec::new(), Vec::new())
    }

    pub fn uvsw_endtask(&mut self) -> InstrId {
        self.backend(BackendOp::UvswEndtask, Vec::new(), Vec::new())
    }

    pub fn uvsw_emitthenendtask(&mut self) -> InstrId {
        self.backend(BackendOp::UvswEmitThenEndtask, Vec::new(), Vec::new())
    }

    pub fn uvsw_writethenemitthenendtask(&mut self, dst: Ref, src: Ref) -> InstrId {
        self.backend(
            BackendOp::UvswWriteThenEmitThenEndtask,
            vec![Dst::new(dst)],
            vec![Src::new(src)],
        )
    }

    pub fn ld(&mut self, dst: Ref, drc: Ref, burst_len: u32, addr: Ref) -> InstrId {
        self.backend(
            BackendOp::Ld,
            vec![Dst::new(dst)],
            vec![Src::new(drc), Src::new(Ref::Val(burst_len)), Src::new(addr)],
        )
    }

    pub fn fitrp_pixel(
        &mut self,
        dst: Ref,
        drc: Ref,
        coeffs: Ref,
        wcoeffs: Ref,
        count: u32,
    ) -> InstrId {
        self.backend(
            BackendOp::FitrpPixel,
            vec![Dst::new(dst)],
            vec![
                Src::new(drc),
                Src::new(coeffs),
                Src::new(wcoeffs),
                Src::new(Ref::Val(count)),
            ],
        )
    }

    /* Control */

    pub fn nop(&mut self) -> InstrId {
        self.ctrl(CtrlOp::Nop, Vec::new(), None)
    }

    pub fn wdf(&mut self, drc: u8) -> InstrId {
        self.ctrl(CtrlOp::Wdf, vec![Src::new(Ref::Drc(drc))], None)
    }

    pub fn br(&mut self, target: BlockId) -> InstrId {
        self.ctrl(CtrlOp::Br, Vec::new(), Some(target))
    }

    pub fn end(&mut self) -> InstrId {
        self.ctrl(CtrlOp::End, Vec::new(), None)
    }

    /* Bitwise */

    pub fn byp0(&mut self, dst: Ref, val: u32) -> InstrId {
        let info = bitwise_op_info(BitwiseOp::Byp0);
        assert_eq!(info.num_dsts, 1);
        self.push(InstrOp::Bitwise(BitwiseInstr {
            op: BitwiseOp::Byp0,
            dsts: vec![Dst::new(dst)],
            srcs: vec![Src::new(Ref::Val(val))],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_inserts_in_order() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let i0 = b.fmul(Ref::Reg(c), Ref::Reg(a), Ref::Reg(b_reg));
        let i1 = b.end(); // appended after i0
        assert_eq!(s.block(block).instrs, vec![i0, i1]);

        // Insert between the two.
        let cursor = Cursor::before_instr(&s, i1);
        let mut b = Builder::new(&mut s, cursor);
        let i2 = b.nop();
        assert_eq!(s.block(block).instrs, vec![i0, i2, i1]);
    }

    #[test]
    fn op_operand_counts_enforced() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let r = s.ssa_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let id = b.mbyp(Ref::Reg(r), Ref::Reg(r));
        assert_eq!(s.instr(id).dsts().len(), 1);
        assert_eq!(s.instr(id).srcs().len(), 1);
    }
}
