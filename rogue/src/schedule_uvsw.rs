// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! UVSW scheduling for vertex shaders.
//!
//! After the last vertex store write, the task must emit its outputs and
//! signal completion. The emit is placed directly after the last write, the
//! end-of-task before the shader end, and adjacent write/emit/endtask runs
//! collapse into the combined opcodes.

use crate::builder::Builder;
use crate::ir::*;

fn last_uvsw_write(shader: &Shader) -> Option<InstrId> {
    shader
        .instr_ids()
        .into_iter()
        .rev()
        .find(|id| {
            matches!(
                &shader.instr(*id).op,
                InstrOp::Backend(be) if be.op == BackendOp::UvswWrite
            )
        })
}

fn end_cursor(shader: &Shader) -> Cursor {
    let last = shader.last_block();
    let instrs = &shader.block(last).instrs;
    if let Some(&tail) = instrs.last() {
        let instr = shader.instr(tail);
        if instr.end || instr.is_nop_end() {
            return Cursor::before_instr(shader, tail);
        }
    }
    Cursor::block_end(shader, last)
}

/// Whether `second` immediately follows `first` within one block.
fn adjacent(shader: &Shader, first: InstrId, second: InstrId) -> bool {
    let block = shader.instr(first).block;
    if shader.instr(second).block != block {
        return false;
    }
    let instrs = &shader.block(block).instrs;
    let pos = instrs.iter().position(|i| *i == first).unwrap();
    instrs.get(pos + 1) == Some(&second)
}

pub fn schedule_uvsw(shader: &mut Shader, latency_hiding: bool) -> bool {
    if latency_hiding {
        unimplemented!("UVSW latency hiding");
    }
    if shader.stage != ShaderStage::Vertex {
        return false;
    }

    let Some(write) = last_uvsw_write(shader) else {
        // Nothing stored; the task still has to end.
        let cursor = end_cursor(shader);
        let mut b = Builder::new(shader, cursor);
        let endtask = b.uvsw_endtask();
        shader.instr_mut(endtask).add_comment("end_vertex_task");
        return true;
    };

    let cursor = Cursor::after_instr(shader, write);
    let mut b = Builder::new(shader, cursor);
    let emit = b.uvsw_emit();

    let cursor = end_cursor(shader);
    let mut b = Builder::new(shader, cursor);
    let mut endtask = b.uvsw_endtask();

    if adjacent(shader, emit, endtask) {
        let cursor = Cursor::before_instr(shader, emit);
        let mut b = Builder::new(shader, cursor);
        let combined = b.uvsw_emitthenendtask();
        shader.instr_delete(emit);
        shader.instr_delete(endtask);
        endtask = combined;

        if adjacent(shader, write, endtask) {
            let dst = shader.instr(write).dsts()[0].dst_ref;
            let src = shader.instr(write).srcs()[0].src_ref;
            let comment = shader.instr(write).comment.clone();
            let cursor = Cursor::before_instr(shader, write);
            let mut b = Builder::new(shader, cursor);
            let combined = b.uvsw_writethenemitthenendtask(dst, src);
            if let Some(c) = comment {
                shader.instr_mut(combined).add_comment(&c);
            }
            shader.instr_delete(write);
            shader.instr_delete(endtask);
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn fragment_shaders_are_untouched() {
        let mut s = Shader::new(ShaderStage::Fragment);
        s.block_create(None);
        assert!(!schedule_uvsw(&mut s, false));
    }

    #[test]
    fn adjacent_write_collapses_fully() {
        let mut s = Shader::new(ShaderStage::Vertex);
        let block = s.block_create(None);
        let vo = s.vtxout_reg(0);
        let a = s.temp_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.uvsw_write(Ref::Reg(vo), Ref::Reg(a));
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }

        assert!(schedule_uvsw(&mut s, false));
        let ids = s.instr_ids();
        assert_eq!(ids.len(), 2);
        let be = s.instr(ids[0]).as_backend().unwrap();
        assert_eq!(be.op, BackendOp::UvswWriteThenEmitThenEndtask);
        assert_eq!(be.dsts[0].dst_ref, Ref::Reg(vo));
        assert!(s.instr(ids[1]).is_nop_end());
    }

    #[test]
    fn distant_write_keeps_separate_emit() {
        let mut s = Shader::new(ShaderStage::Vertex);
        let block = s.block_create(None);
        let vo = s.vtxout_reg(0);
        let (a, c) = (s.temp_reg(0), s.temp_reg(1));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.uvsw_write(Ref::Reg(vo), Ref::Reg(a));
        b.mbyp(Ref::Reg(c), Ref::Reg(a));
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }

        assert!(schedule_uvsw(&mut s, false));
        let ops: Vec<_> = s
            .instr_ids()
            .into_iter()
            .map(|id| match &s.instr(id).op {
                InstrOp::Backend(be) => Some(be.op),
                _ => None,
            })
            .collect();
        // write, emit, mbyp, endtask, nop.end
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0], Some(BackendOp::UvswWrite));
        assert_eq!(ops[1], Some(BackendOp::UvswEmit));
        assert_eq!(ops[3], Some(BackendOp::UvswEndtask));
    }

    #[test]
    fn no_writes_still_ends_task() {
        let mut s = Shader::new(ShaderStage::Vertex);
        let block = s.block_create(None);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }

        assert!(schedule_uvsw(&mut s, false));
        let ids = s.instr_ids();
        let be = s.instr(ids[0]).as_backend().unwrap();
        assert_eq!(be.op, BackendOp::UvswEndtask);
    }
}
