// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Copy propagation over MOV pseudo-instructions.
//!
//! Forward: when a MOV's source is (at most) singly written and its
//! destination is a singly-written SSA register, every use of the destination
//! can read the source directly. Backward: when a MOV writes a hardware
//! register from a singly-written SSA source, the single producer of that
//! source can write the hardware register directly. Vertex outputs only take
//! the backward rule when the producer is itself a MOV, because the physical
//! write mechanism for that register class differs.

use crate::info::*;
use crate::ir::*;

/// Whether every use of a register tolerates being replaced by a reference to
/// a register of class `new_class`, given which source I/O slots that class
/// can feed.
///
/// Note: the accumulator starts out false, so this never approves a
/// replacement; hardware-register forwarding is effectively disabled. This
/// reproduces the reference behavior; see DESIGN.md before "fixing" it.
fn can_replace_reg_use(shader: &Shader, use_loc: RefLoc, new_class: RegClass) -> bool {
    let mut can_replace = false;
    let info = reg_class_info(new_class);
    let instr = shader.instr(use_loc.instr);

    let io_src = match &instr.op {
        InstrOp::Alu(alu) => alu_op_info(alu.op).io_src.get(use_loc.slot).copied(),
        InstrOp::Backend(be) => backend_op_info(be.op).io_src.get(use_loc.slot).copied(),
        InstrOp::Bitwise(bw) => bitwise_op_info(bw.op).io_src.get(use_loc.slot).copied(),
        InstrOp::Ctrl(_) => None,
    };
    if let Some(io_src) = io_src {
        can_replace &= info.supported_io_srcs.supports(io_src);
    }

    can_replace
}

fn try_forward(shader: &mut Shader, mov: InstrId) -> bool {
    let dst_ref = shader.instr(mov).dsts()[0].dst_ref;
    let src_ref = shader.instr(mov).srcs()[0].src_ref;

    match (dst_ref, src_ref) {
        (Ref::Reg(dst), Ref::Reg(src)) => {
            if shader.reg(src).writes.len() > 1 {
                return false;
            }
            if shader.reg(dst).class != RegClass::Ssa || shader.reg(dst).writes.len() != 1 {
                return false;
            }
            if shader.reg(src).class != RegClass::Ssa {
                let uses = shader.reg(dst).uses.clone();
                let src_class = shader.reg(src).class;
                if !uses
                    .iter()
                    .all(|u| can_replace_reg_use(shader, *u, src_class))
                {
                    return false;
                }
            }

            let uses = shader.reg(dst).uses.clone();
            for u in uses {
                shader.instr_set_src(u.instr, u.slot, Ref::Reg(src));
            }
            shader.instr_delete(mov);
            true
        }
        (Ref::Regarray(dst), Ref::Regarray(src)) => {
            let standalone = |s: &Shader, ra: RegArrayId| {
                s.regarray(ra).parent.is_none() && s.regarray(ra).children.is_empty()
            };
            if !standalone(shader, dst) || !standalone(shader, src) {
                return false;
            }
            if shader.regarray(dst).size() != shader.regarray(src).size() {
                return false;
            }
            if shader.regarray(src).writes.len() > 1 {
                return false;
            }
            if shader.regarray_class(dst) != RegClass::Ssa
                || shader.regarray(dst).writes.len() != 1
            {
                return false;
            }

            let uses = shader.regarray(dst).uses.clone();
            for u in uses {
                shader.instr_set_src(u.instr, u.slot, Ref::Regarray(src));
            }
            shader.instr_delete(mov);
            true
        }
        _ => false,
    }
}

fn try_backward(shader: &mut Shader, mov: InstrId) -> bool {
    let dst_ref = shader.instr(mov).dsts()[0].dst_ref;
    let src_ref = shader.instr(mov).srcs()[0].src_ref;

    let (Ref::Reg(dst), Ref::Reg(src)) = (dst_ref, src_ref) else {
        return false;
    };

    let dst_class = shader.reg(dst).class;
    if dst_class == RegClass::Ssa {
        return false;
    }
    if shader.reg(src).class != RegClass::Ssa || shader.reg(src).writes.len() != 1 {
        return false;
    }
    if shader.reg(dst).writes.len() != 1 {
        return false;
    }

    let producer = shader.reg(src).writes[0];
    if producer.instr == mov {
        return false;
    }

    // Vertex outputs are written through a dedicated mechanism; only another
    // MOV can be retargeted at them.
    if dst_class == RegClass::VtxOut {
        let is_mov = matches!(
            &shader.instr(producer.instr).op,
            InstrOp::Alu(alu) if alu.op == AluOp::Mov
        );
        if !is_mov {
            return false;
        }
    }

    shader.instr_set_dst(producer.instr, producer.slot, Ref::Reg(dst));
    shader.instr_delete(mov);
    true
}

pub fn copy_prop(shader: &mut Shader) -> bool {
    let mut progress = false;

    for id in shader.instr_ids() {
        if !shader.instr_exists(id) {
            continue;
        }
        let is_mov = matches!(
            &shader.instr(id).op,
            InstrOp::Alu(alu) if alu.op == AluOp::Mov
        );
        if !is_mov {
            continue;
        }
        progress |= try_forward(shader, id) || try_backward(shader, id);
    }

    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn forward_propagates_ssa_copies() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c, d) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2), s.ssa_reg(3));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let def = b.fadd(Ref::Reg(a), Ref::Reg(c), Ref::Reg(d));
        let mov = b.mov(Ref::Reg(b_reg), Ref::Reg(a));
        let use_instr = b.fmul(Ref::Reg(d), Ref::Reg(b_reg), Ref::Reg(b_reg));
        let _ = def;

        assert!(copy_prop(&mut s));
        assert!(!s.instr_exists(mov));
        assert_eq!(s.instr(use_instr).srcs()[0].src_ref, Ref::Reg(a));
        assert_eq!(s.instr(use_instr).srcs()[1].src_ref, Ref::Reg(a));

        // Idempotence: a second run makes no further progress.
        assert!(!copy_prop(&mut s));
    }

    #[test]
    fn hardware_register_forwarding_is_disabled() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let special = s.special_reg(1);
        let (a, d) = (s.ssa_reg(0), s.ssa_reg(1));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let mov = b.mov(Ref::Reg(a), Ref::Reg(special));
        let _use_instr = b.fmul(Ref::Reg(d), Ref::Reg(a), Ref::Reg(a));

        // The always-false replacement guard keeps the copy.
        assert!(!copy_prop(&mut s));
        assert!(s.instr_exists(mov));
    }

    #[test]
    fn backward_retargets_producer_at_hardware_dst() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, x, y) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let po = s.pixout_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let producer = b.fmul(Ref::Reg(a), Ref::Reg(x), Ref::Reg(y));
        let mov = b.mov(Ref::Reg(po), Ref::Reg(a));

        assert!(copy_prop(&mut s));
        assert!(!s.instr_exists(mov));
        assert_eq!(s.instr(producer).dsts()[0].dst_ref, Ref::Reg(po));
    }

    #[test]
    fn backward_vtxout_requires_mov_producer() {
        let mut s = Shader::new(ShaderStage::Vertex);
        let block = s.block_create(None);
        let (a, x, y) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let vo = s.vtxout_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let _producer = b.fmul(Ref::Reg(a), Ref::Reg(x), Ref::Reg(y));
        let mov = b.mov(Ref::Reg(vo), Ref::Reg(a));

        // fmul cannot write a vertex output directly.
        assert!(!copy_prop(&mut s));
        assert!(s.instr_exists(mov));
    }
}
