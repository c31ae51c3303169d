// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! WDF scheduling.
//!
//! Every data request holds a DRC slot until a WDF waits on it. Each
//! unreleased transaction gets its WDF inserted directly before the first
//! instruction that reads a register the request writes, or at the end of the
//! shader when nothing reads it.

use crate::builder::Builder;
use crate::ir::*;

fn written_regs(shader: &Shader, id: InstrId) -> Vec<RegId> {
    let mut regs = Vec::new();
    for dst in shader.instr(id).dsts() {
        match dst.dst_ref {
            Ref::Reg(r) => regs.push(r),
            Ref::Regarray(ra) => regs.extend_from_slice(&shader.regarray(ra).regs),
            _ => (),
        }
    }
    regs
}

fn reads_any(shader: &Shader, id: InstrId, regs: &[RegId]) -> bool {
    for src in shader.instr(id).srcs() {
        match src.src_ref {
            Ref::Reg(r) => {
                if regs.contains(&r) {
                    return true;
                }
            }
            Ref::Regarray(ra) => {
                if shader.regarray(ra).regs.iter().any(|r| regs.contains(r)) {
                    return true;
                }
            }
            _ => (),
        }
    }
    false
}

/// Cursor for the fallback position: the end of the shader, before its
/// end-of-program instruction.
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

pub fn schedule_wdf(shader: &mut Shader, latency_hiding: bool) -> bool {
    if latency_hiding {
        unimplemented!("WDF latency hiding");
    }

    let mut progress = false;

    for slot in 0..ROGUE_DRCS {
        // Transactions are registered in program order; pairing each new WDF
        // with the oldest unreleased transaction keeps the slot discipline.
        for trxn in shader.drc_trxns[slot].clone() {
            if trxn.release.is_some() {
                continue;
            }

            let written = written_regs(shader, trxn.acquire);
            let ids = shader.instr_ids();
            let acquire_pos = ids
                .iter()
                .position(|i| *i == trxn.acquire)
                .expect("DRC acquire is not in the shader");

            let reader = ids[acquire_pos + 1..]
                .iter()
                .copied()
                .find(|i| reads_any(shader, *i, &written));

            let cursor = match reader {
                Some(reader) => Cursor::before_instr(shader, reader),
                None => end_cursor(shader),
            };
            let mut b = Builder::new(shader, cursor);
            let wdf = b.wdf(slot as u8);
            shader.instr_mut(wdf).add_comment("wait_for_data");
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
    #[should_panic]
    fn latency_hiding_is_unimplemented() {
        let mut s = Shader::new(ShaderStage::Fragment);
        schedule_wdf(&mut s, true);
    }

    #[test]
    fn wdf_lands_before_first_reader() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let addr = s.ssa_regarray(2, 0);
        let (data, other, out) = (s.ssa_reg(2), s.ssa_reg(3), s.ssa_reg(4));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let ld = b.ld(Ref::Reg(data), Ref::Drc(0), 1, Ref::Regarray(addr));
        let unrelated = b.mbyp(Ref::Reg(other), Ref::Reg(other));
        let reader = b.fmul(Ref::Reg(out), Ref::Reg(data), Ref::Reg(data));

        assert!(schedule_wdf(&mut s, false));

        let ids = s.instr_ids();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], ld);
        assert_eq!(ids[1], unrelated);
        assert!(matches!(
            &s.instr(ids[2]).op,
            InstrOp::Ctrl(ctrl) if ctrl.op == CtrlOp::Wdf
        ));
        assert_eq!(ids[3], reader);
        assert_eq!(s.drc_trxns[0][0].release, Some(ids[2]));

        // Released transactions are left alone.
        assert!(!schedule_wdf(&mut s, false));
    }

    #[test]
    fn wdf_falls_back_to_shader_end() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let addr = s.ssa_regarray(2, 0);
        let data = s.ssa_reg(2);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.ld(Ref::Reg(data), Ref::Drc(0), 1, Ref::Regarray(addr));
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }

        assert!(schedule_wdf(&mut s, false));
        let ids = s.instr_ids();
        // ld, wdf, nop.end
        assert_eq!(ids.len(), 3);
        assert!(matches!(
            &s.instr(ids[1]).op,
            InstrOp::Ctrl(ctrl) if ctrl.op == CtrlOp::Wdf
        ));
        assert!(s.instr(ids[2]).is_nop_end());
    }
}
