// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Early pseudo-op lowering, before register allocation.
//!
//! MOV picks its real opcode from where the data flows: a plain register copy
//! is a main-ALU bypass, a read-only special register goes through the
//! phase-2 conditional-move path, an unresolved immediate is materialized by
//! the bitwise unit, and a vertex-output destination uses the dedicated
//! vertex store write. FABS/FNEG/FNABS are bypasses with source modifiers;
//! END becomes a NOP carrying the end-of-program modifier. The replacement is
//! fully wired before the pseudo-instruction is deleted.

use crate::builder::Builder;
use crate::ir::*;

fn merge_comment(shader: &mut Shader, to: InstrId, from: InstrId, what: &str) {
    let comment = shader.instr(from).comment.clone();
    if let Some(c) = comment {
        shader.instr_mut(to).add_comment(&c);
    }
    shader.instr_mut(to).add_comment(what);
}

fn carry_common(shader: &mut Shader, to: InstrId, from: InstrId) {
    let (exec_cond, repeat) = {
        let f = shader.instr(from);
        (f.exec_cond, f.repeat)
    };
    let t = shader.instr_mut(to);
    t.exec_cond = exec_cond;
    t.repeat = repeat;
}

fn lower_mov(shader: &mut Shader, mov: InstrId) {
    let dst = shader.instr(mov).dsts()[0];
    let src = shader.instr(mov).srcs()[0];

    let dst_is_vtxout = matches!(
        dst.dst_ref,
        Ref::Reg(r) if shader.reg(r).class == RegClass::VtxOut
    );
    let src_is_special = matches!(
        src.src_ref,
        Ref::Reg(r) if shader.reg(r).class == RegClass::Special
    );

    let cursor = Cursor::before_instr(shader, mov);
    let mut b = Builder::new(shader, cursor);

    let new = if dst_is_vtxout {
        b.uvsw_write(dst.dst_ref, src.src_ref)
    } else if let Ref::Imm(v) = src.src_ref {
        // Not covered by a constant register; materialize through the
        // bitwise unit.
        b.byp0(dst.dst_ref, v)
    } else if src_is_special {
        b.movc(dst.dst_ref, Ref::Io(Io::None), src.src_ref)
    } else {
        b.mbyp(dst.dst_ref, src.src_ref)
    };

    carry_common(shader, new, mov);
    merge_comment(shader, new, mov, "mov");
    shader.instr_delete(mov);
}

fn lower_to_mbyp(shader: &mut Shader, id: InstrId, mods: AluSrcMods, what: &str) {
    let dst = shader.instr(id).dsts()[0];
    let src = shader.instr(id).srcs()[0];

    let cursor = Cursor::before_instr(shader, id);
    let mut b = Builder::new(shader, cursor);
    let new = b.mbyp(dst.dst_ref, src.src_ref);
    shader.instr_mut(new).srcs_mut()[0].src_mods = mods;

    carry_common(shader, new, id);
    merge_comment(shader, new, id, what);
    shader.instr_delete(id);
}

fn lower_end(shader: &mut Shader, id: InstrId) {
    let cursor = Cursor::before_instr(shader, id);
    let mut b = Builder::new(shader, cursor);
    let nop = b.nop();
    {
        let instr = shader.instr_mut(nop);
        instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
        instr.end = true;
    }
    merge_comment(shader, nop, id, "end");
    shader.instr_delete(id);
}

pub fn lower_pseudo_ops(shader: &mut Shader) -> bool {
    let mut progress = false;

    for id in shader.instr_ids() {
        if !shader.instr_exists(id) {
            continue;
        }
        let alu_op = shader.instr(id).as_alu().map(|alu| alu.op);
        let ctrl_op = shader.instr(id).as_ctrl().map(|ctrl| ctrl.op);
        match alu_op {
            Some(AluOp::Mov) => {
                lower_mov(shader, id);
                progress = true;
            }
            Some(AluOp::Fabs) => {
                lower_to_mbyp(shader, id, AluSrcMods::ABS, "fabs");
                progress = true;
            }
            Some(AluOp::Fneg) => {
                lower_to_mbyp(shader, id, AluSrcMods::NEG, "fneg");
                progress = true;
            }
            Some(AluOp::Fnabs) => {
                lower_to_mbyp(shader, id, AluSrcMods::NEG | AluSrcMods::ABS, "fnabs");
                progress = true;
            }
            // CMOV needs allocated registers; the late pass handles it.
            _ => {
                if ctrl_op == Some(CtrlOp::End) {
                    lower_end(shader, id);
                    progress = true;
                }
            }
        }
    }

    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn mov_reg_becomes_mbyp() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, d) = (s.ssa_reg(0), s.ssa_reg(1));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mov(Ref::Reg(d), Ref::Reg(a));

        assert!(lower_pseudo_ops(&mut s));
        let ids = s.instr_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(s.instr(ids[0]).as_alu().unwrap().op, AluOp::Mbyp);
        // The source use was rewired to the replacement.
        assert_eq!(s.reg(a).uses.len(), 1);
        assert_eq!(s.reg(a).uses[0].instr, ids[0]);
    }

    #[test]
    fn mov_imm_becomes_byp0() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let d = s.ssa_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mov(Ref::Reg(d), Ref::Imm(0xdeadbeef));

        assert!(lower_pseudo_ops(&mut s));
        let ids = s.instr_ids();
        let bw = s.instr(ids[0]).as_bitwise().unwrap();
        assert_eq!(bw.op, BitwiseOp::Byp0);
        assert_eq!(bw.srcs[0].src_ref, Ref::Val(0xdeadbeef));
        assert!(s.imm_uses().is_empty());
    }

    #[test]
    fn mov_special_becomes_movc() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let special = s.special_reg(33);
        let d = s.ssa_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mov(Ref::Reg(d), Ref::Reg(special));

        assert!(lower_pseudo_ops(&mut s));
        let ids = s.instr_ids();
        let alu = s.instr(ids[0]).as_alu().unwrap();
        assert_eq!(alu.op, AluOp::Movc);
        assert_eq!(alu.srcs[1].src_ref, Ref::Reg(special));
    }

    #[test]
    fn mov_vtxout_becomes_uvsw_write() {
        let mut s = Shader::new(ShaderStage::Vertex);
        let block = s.block_create(None);
        let vo = s.vtxout_reg(2);
        let a = s.ssa_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mov(Ref::Reg(vo), Ref::Reg(a));

        assert!(lower_pseudo_ops(&mut s));
        let ids = s.instr_ids();
        let be = s.instr(ids[0]).as_backend().unwrap();
        assert_eq!(be.op, BackendOp::UvswWrite);
        assert_eq!(be.dsts[0].dst_ref, Ref::Reg(vo));
    }

    #[test]
    fn fnabs_sets_both_modifiers() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, d) = (s.ssa_reg(0), s.ssa_reg(1));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.fnabs(Ref::Reg(d), Ref::Reg(a));

        assert!(lower_pseudo_ops(&mut s));
        let ids = s.instr_ids();
        let alu = s.instr(ids[0]).as_alu().unwrap();
        assert_eq!(alu.op, AluOp::Mbyp);
        assert_eq!(alu.srcs[0].src_mods, AluSrcMods::NEG | AluSrcMods::ABS);
    }

    #[test]
    fn end_becomes_nop_end() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.end();

        assert!(lower_pseudo_ops(&mut s));
        let ids = s.instr_ids();
        assert!(s.instr(ids[0]).is_nop_end());
        assert!(s.instr(ids[0]).end);
    }
}
