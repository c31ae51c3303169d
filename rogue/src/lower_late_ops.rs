// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Late pseudo-op lowering, after register allocation.
//!
//! The hardware has no single conditional-move opcode, so CMOV becomes a pair
//! of bypasses predicated on P0, both writing the same (now physical)
//! destination. This is only legal once the destination is no longer in SSA
//! form.

use crate::builder::Builder;
use crate::ir::*;

fn lower_cmov(shader: &mut Shader, cmov: InstrId) {
    let dst = shader.instr(cmov).dsts()[0];
    let src_true = shader.instr(cmov).srcs()[0];
    let src_false = shader.instr(cmov).srcs()[1];
    let comment = shader.instr(cmov).comment.clone();

    let cursor = Cursor::before_instr(shader, cmov);
    let mut b = Builder::new(shader, cursor);
    let t = b.mbyp(dst.dst_ref, src_true.src_ref);
    let f = b.mbyp(dst.dst_ref, src_false.src_ref);

    shader.instr_mut(t).exec_cond = ExecCond::P0True;
    shader.instr_mut(f).exec_cond = ExecCond::P0False;
    for id in [t, f] {
        if let Some(c) = &comment {
            shader.instr_mut(id).add_comment(c);
        }
        shader.instr_mut(id).add_comment("cmov");
    }

    shader.instr_delete(cmov);
}

pub fn lower_late_ops(shader: &mut Shader) -> bool {
    let mut progress = false;

    for id in shader.instr_ids() {
        if !shader.instr_exists(id) {
            continue;
        }
        if matches!(&shader.instr(id).op, InstrOp::Alu(alu) if alu.op == AluOp::Cmov) {
            lower_cmov(shader, id);
            progress = true;
        }
    }

    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn cmov_becomes_predicated_mbyp_pair() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (dst, t, f) = (s.temp_reg(0), s.temp_reg(1), s.temp_reg(2));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.cmov(Ref::Reg(dst), Ref::Reg(t), Ref::Reg(f));

        assert!(lower_late_ops(&mut s));
        let ids = s.instr_ids();
        assert_eq!(ids.len(), 2);

        let first = s.instr(ids[0]);
        let second = s.instr(ids[1]);
        assert_eq!(first.exec_cond, ExecCond::P0True);
        assert_eq!(second.exec_cond, ExecCond::P0False);
        assert_eq!(first.dsts()[0].dst_ref, Ref::Reg(dst));
        assert_eq!(second.dsts()[0].dst_ref, Ref::Reg(dst));
        assert_eq!(s.reg(dst).writes.len(), 2);

        assert!(!lower_late_ops(&mut s));
    }
}
