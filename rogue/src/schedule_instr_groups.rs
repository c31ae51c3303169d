// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Instruction grouping.
//!
//! Packs instructions into co-issue groups, lowers each instruction's
//! symbolic I/O slots onto the group's source/destination/internal-selector
//! map, computes encoded byte sizes from the operand variant tables, and lays
//! the groups out in memory with instruction-cache alignment.
//!
//! The scheduling policy just puts single instructions into groups for now;
//! the `group_next` flag exists in the data model but no heuristic sets it,
//! and multi-instruction groups are refused.

use crate::info::*;
use crate::ir::*;
use crate::isa;

fn instr_phase(shader: &Shader, id: InstrId) -> (Phase, GroupAlu) {
    match &shader.instr(id).op {
        InstrOp::Alu(alu) => {
            let phase = alu_op_info(alu.op)
                .phase
                .unwrap_or_else(|| panic!("Pseudo-op {:?} reached grouping", alu.op));
            (phase, GroupAlu::Main)
        }
        InstrOp::Backend(_) => (Phase::Backend, GroupAlu::Main),
        InstrOp::Ctrl(ctrl) => {
            assert!(!ctrl.op.is_pseudo(), "Pseudo-op reached grouping");
            (Phase::CTRL, GroupAlu::Control)
        }
        InstrOp::Bitwise(bw) => (bitwise_op_info(bw.op).phase, GroupAlu::Bitwise),
    }
}

/// Places a source operand. 64-bit register pairs occupy their slot and the
/// following one.
fn place_src(shader: &Shader, io_sel: &mut IoSel, io: Io, r: Ref) {
    if !io.is_src() {
        return;
    }
    *io_sel.ref_for_mut(io) = r;
    if let Ref::Regarray(ra) = r {
        if shader.regarray(ra).size() == 2 {
            io_sel.srcs[io.src_index() + 1] = r;
        }
    }
}

/// Routes a feedthrough destination through W0/W1 via IS4/IS5.
fn place_ft_dst(io_sel: &mut IoSel, w: Io, ft: Io, r: Ref) {
    *io_sel.ref_for_mut(w) = r;
    let is = if w == Io::W0 { Io::Is4 } else { Io::Is5 };
    *io_sel.ref_for_mut(is) = Ref::Io(ft);
}

fn lower_alu_io(shader: &Shader, io_sel: &mut IoSel, alu: &AluInstr) {
    let info = alu_op_info(alu.op);

    for (i, dst) in alu.dsts.iter().enumerate() {
        match info.io_dst[i] {
            ft @ (Io::Ft0 | Io::Ft1 | Io::Ft2) => {
                place_ft_dst(io_sel, Io::W0, ft, dst.dst_ref)
            }
            Io::Ftt | Io::None => (),
            io => panic!("Unsupported ALU destination io {}", io),
        }
    }
    for (i, src) in alu.srcs.iter().enumerate() {
        place_src(shader, io_sel, info.io_src[i], src.src_ref);
    }

    match alu.op {
        AluOp::Add64 => {
            // The high result word comes back on FT1 through W1.
            io_sel.dsts[1] = alu.dsts[0].dst_ref;
            io_sel.iss[Io::Is5.iss_index()] = Ref::Io(Io::Ft1);
        }
        AluOp::Movc => {
            // The value source always routes through S1 and the FTE bypass.
            io_sel.iss[Io::Is0.iss_index()] = Ref::Io(Io::S1);
        }
        AluOp::Tst => {
            io_sel.iss[Io::Is0.iss_index()] = Ref::Io(Io::S0);
            io_sel.iss[Io::Is1.iss_index()] = Ref::Io(Io::Fte);
            io_sel.iss[Io::Is2.iss_index()] = Ref::Io(Io::S1);
        }
        AluOp::PckU8888 => {
            io_sel.iss[Io::Is0.iss_index()] = Ref::Io(Io::S0);
            io_sel.iss[Io::Is3.iss_index()] = Ref::Io(Io::Fte);
        }
        _ => (),
    }
}

fn lower_backend_io(shader: &Shader, io_sel: &mut IoSel, be: &BackendInstr) {
    let info = backend_op_info(be.op);
    for (i, dst) in be.dsts.iter().enumerate() {
        if info.io_dst[i] == Io::W0 {
            io_sel.dsts[0] = dst.dst_ref;
        }
    }
    for (i, src) in be.srcs.iter().enumerate() {
        place_src(shader, io_sel, info.io_src[i], src.src_ref);
    }
}

fn lower_bitwise_io(io_sel: &mut IoSel, bw: &BitwiseInstr) {
    let info = bitwise_op_info(bw.op);
    if info.io_dst[0] == Io::Ft0 {
        place_ft_dst(io_sel, Io::W0, Io::Ft0, bw.dsts[0].dst_ref);
    }
}

fn lower_instr_group_io(shader: &mut Shader, gid: GroupId, id: InstrId) {
    let mut io_sel = shader.group(gid).io_sel.clone();
    match &shader.instr(id).op {
        InstrOp::Alu(alu) => lower_alu_io(shader, &mut io_sel, alu),
        InstrOp::Backend(be) => lower_backend_io(shader, &mut io_sel, be),
        InstrOp::Bitwise(bw) => lower_bitwise_io(&mut io_sel, bw),
        // Control operands are encoded in the instruction body.
        InstrOp::Ctrl(_) => (),
    }
    shader.group_mut(gid).io_sel = io_sel;
}

/* Size calculation. */

pub(crate) fn bits_for(val: u32) -> u32 {
    (32 - val.leading_zeros()).max(1)
}

/// Bank/index encoding of an operand reference.
fn operand_encoding(shader: &Shader, r: &Ref) -> (u32, u32) {
    match r {
        Ref::Reg(reg) => {
            let reg = shader.reg(*reg);
            isa::reg_bank_encoding(reg.class, reg.index)
        }
        Ref::Regarray(ra) => {
            isa::reg_bank_encoding(shader.regarray_class(*ra), shader.regarray_start(*ra))
        }
        _ => panic!("Operand reference is not a register"),
    }
}

/// Bank/index of one source slot. The second slot of a 64-bit pair encodes
/// the high half of the same array.
pub(crate) fn src_operand_encoding(
    shader: &Shader,
    srcs: &[Ref; ISA_SRCS],
    slot: usize,
) -> Option<(u32, u32)> {
    if srcs[slot].is_none() {
        return None;
    }
    let (bank, mut index) = operand_encoding(shader, &srcs[slot]);
    if slot > 0 && srcs[slot] == srcs[slot - 1] && srcs[slot].is_regarray() {
        index += 1;
    }
    Some((bank, index))
}

/// Bank/index of one destination slot; W1 of a 64-bit result pair encodes
/// the high half.
pub(crate) fn dst_operand_encoding(
    shader: &Shader,
    dsts: &[Ref; ISA_DSTS],
    slot: usize,
) -> Option<(u32, u32)> {
    if dsts[slot].is_none() {
        return None;
    }
    let (bank, mut index) = operand_encoding(shader, &dsts[slot]);
    if slot == 1 && dsts[1] == dsts[0] && dsts[1].is_regarray() {
        index += 1;
    }
    Some((bank, index))
}

fn select_src_variant(
    shader: &Shader,
    table: &'static [RegSrcInfo],
    srcs: &[Ref; ISA_SRCS],
    slots: std::ops::Range<usize>,
    mux: Option<u64>,
) -> Option<usize> {
    let count = srcs[slots.clone()]
        .iter()
        .rposition(|r| !r.is_none())
        .map(|p| p + 1)
        .unwrap_or(0);
    if count == 0 && mux.is_none() {
        return None;
    }

    let mux_bits = mux.map_or(0, |m| bits_for(m as u32));
    'variant: for (v, row) in table.iter().enumerate() {
        if row.num_srcs < count || row.mux_bits < mux_bits {
            continue;
        }
        for i in 0..count {
            let Some((bank, index)) = src_operand_encoding(shader, srcs, slots.start + i)
            else {
                continue;
            };
            if row.bank_bits[i] < bits_for(bank) || row.index_bits[i] < bits_for(index) {
                continue 'variant;
            }
        }
        return Some(v);
    }
    unreachable!("No source encoding variant fits")
}

fn select_dst_variant(shader: &Shader, dsts: &[Ref; ISA_DSTS]) -> Option<usize> {
    let count = dsts
        .iter()
        .rposition(|r| !r.is_none())
        .map(|p| p + 1)
        .unwrap_or(0);
    if count == 0 {
        return None;
    }

    'variant: for (v, row) in REG_DST_INFOS.iter().enumerate() {
        if row.num_dsts < count {
            continue;
        }
        for i in 0..count {
            let Some((bank, index)) = dst_operand_encoding(shader, dsts, i) else {
                continue;
            };
            if row.bank_bits[i] < bits_for(bank) || row.index_bits[i] < bits_for(index) {
                continue 'variant;
            }
        }
        return Some(v);
    }
    unreachable!("No destination encoding variant fits")
}

/// Encoded byte size of one instruction body: a closed per-opcode switch, not
/// a formula.
fn instr_size(shader: &Shader, id: InstrId) -> u32 {
    let instr = shader.instr(id);
    match &instr.op {
        InstrOp::Alu(alu) => match alu.op {
            AluOp::Mbyp => {
                if alu.srcs[0].src_mods.is_empty() {
                    1
                } else {
                    2
                }
            }
            AluOp::Fadd | AluOp::Fmul | AluOp::Fmad => {
                if alu.srcs.iter().all(|s| s.src_mods.is_empty()) {
                    1
                } else {
                    2
                }
            }
            AluOp::Add64 => 1,
            AluOp::Tst => 2,
            AluOp::Movc => 2,
            AluOp::PckU8888 => 2,
            _ => panic!("Pseudo-op has no encoding"),
        },
        InstrOp::Backend(be) => match be.op {
            BackendOp::UvswWrite => 2,
            BackendOp::UvswEmit => 1,
            BackendOp::UvswEndtask => 1,
            BackendOp::UvswEmitThenEndtask => 1,
            BackendOp::UvswWriteThenEmitThenEndtask => 2,
            BackendOp::Ld => 2,
            BackendOp::FitrpPixel => 2,
        },
        InstrOp::Ctrl(ctrl) => match ctrl.op {
            CtrlOp::Nop => 1,
            CtrlOp::Wdf => 1,
            CtrlOp::Br => 5,
            CtrlOp::End => panic!("Pseudo-op has no encoding"),
        },
        InstrOp::Bitwise(bw) => match bw.op {
            // Opcode byte plus the 32-bit immediate.
            BitwiseOp::Byp0 => 5,
        },
    }
}

fn calc_group_size(shader: &mut Shader, gid: GroupId) {
    let header_extended = {
        let h = &shader.group(gid).header;
        h.alu != Some(GroupAlu::Main)
            || h.end
            || h.repeat > 1
            || h.exec_cond != ExecCond::PeTrue
    };
    let header = if header_extended { 3 } else { 2 };

    let mut instrs = [0u32; PHASE_COUNT];
    for phase in Phase::ALL {
        if let Some(id) = shader.group(gid).instrs[phase as usize] {
            instrs[phase as usize] = instr_size(shader, id);
        }
    }

    let io_sel = shader.group(gid).io_sel.clone();
    let mux = match io_sel.iss[Io::Is0.iss_index()] {
        Ref::Io(io) => Some(isa::mux_encoding(io)),
        Ref::None => None,
        ref r => panic!("IS0 must select a source, not {:?}", r),
    };

    let lower = select_src_variant(shader, &REG_LOWER_SRC_INFOS, &io_sel.srcs, 0..3, mux);
    let upper = select_src_variant(shader, &REG_UPPER_SRC_INFOS, &io_sel.srcs, 3..6, None);
    let dst = select_dst_variant(shader, &io_sel.dsts);
    let iss_used = io_sel.iss[1..].iter().any(|r| !r.is_none());

    let lower_srcs = lower.map_or(0, |v| REG_LOWER_SRC_INFOS[v].bytes);
    let upper_srcs = upper.map_or(0, |v| REG_UPPER_SRC_INFOS[v].bytes);
    let dsts = dst.map_or(0, |v| REG_DST_INFOS[v].bytes);
    let iss = if iss_used { 1 } else { 0 };

    let unpadded =
        header + instrs.iter().sum::<u32>() + lower_srcs + upper_srcs + iss + dsts;
    let word_padding = unpadded % 2;

    let group = shader.group_mut(gid);
    group.encode_info = EncodeInfo {
        lower_src_index: lower,
        upper_src_index: upper,
        dst_index: dst,
    };
    group.size = GroupSize {
        header,
        instrs,
        lower_srcs,
        upper_srcs,
        iss,
        dsts,
        word_padding,
        align_padding: 0,
        total: unpadded + word_padding,
        offset: 0,
    };
}

/// Lays groups out sequentially, then pads the last two groups so the final
/// group both starts and ends on the icache boundary. Only the trailing
/// boundary is hardware-constrained; shifting only the last group would
/// misalign its start.
fn finalize_group_offsets(shader: &mut Shader) {
    let ids = shader.group_ids();
    if ids.is_empty() {
        return;
    }

    let mut offset = 0;
    for gid in &ids {
        let group = shader.group_mut(*gid);
        group.size.offset = offset;
        offset += group.size.total;
    }

    let last = *ids.last().unwrap();
    if ids.len() >= 2 {
        let start = shader.group(last).size.offset;
        let shift = (isa::ISA_ICACHE_ALIGN - start % isa::ISA_ICACHE_ALIGN)
            % isa::ISA_ICACHE_ALIGN;
        if shift != 0 {
            let second_last = ids[ids.len() - 2];
            let group = shader.group_mut(second_last);
            group.size.align_padding += shift;
            group.size.total += shift;
            shader.group_mut(last).size.offset += shift;
        }
    }

    let end = shader.group(last).size.offset + shader.group(last).size.total;
    let pad = (isa::ISA_ICACHE_ALIGN - end % isa::ISA_ICACHE_ALIGN) % isa::ISA_ICACHE_ALIGN;
    if pad != 0 {
        let group = shader.group_mut(last);
        group.size.align_padding += pad;
        group.size.total += pad;
    }
}

pub fn schedule_instr_groups(shader: &mut Shader, multi_instr_groups: bool) -> bool {
    if multi_instr_groups {
        unimplemented!("Multi-instruction groups");
    }
    assert!(!shader.is_grouped);

    for bid in shader.block_ids() {
        for id in shader.block(bid).instrs.clone() {
            if shader.instr(id).group_next {
                // The data model carries the flag but nothing sets it yet.
                unimplemented!("Multi-instruction groups");
            }
            let (phase, alu) = instr_phase(shader, id);
            let gid = shader.group_create(bid);

            {
                let (exec_cond, end, repeat) = {
                    let i = shader.instr(id);
                    (i.exec_cond, i.end, i.repeat)
                };
                let group = shader.group_mut(gid);
                group.instrs[phase as usize] = Some(id);
                group.header = GroupHeader {
                    phases: 1 << phase as u8,
                    exec_cond,
                    alu: Some(alu),
                    end,
                    repeat,
                };
            }
            shader.instr_mut(id).group = Some((gid, phase));

            lower_instr_group_io(shader, gid, id);
            calc_group_size(shader, gid);
        }
    }

    finalize_group_offsets(shader);
    shader.is_grouped = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    fn grouped_fixture() -> Shader {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c) = (s.temp_reg(0), s.temp_reg(1), s.temp_reg(2));
        let po = s.pixout_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.fmul(Ref::Reg(c), Ref::Reg(a), Ref::Reg(b_reg));
        b.mbyp(Ref::Reg(po), Ref::Reg(c));
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }
        assert!(schedule_instr_groups(&mut s, false));
        s
    }

    #[test]
    fn one_group_per_instruction() {
        let s = grouped_fixture();
        assert!(s.is_grouped);
        let groups = s.group_ids();
        assert_eq!(groups.len(), 3);
        for gid in &groups {
            let group = s.group(*gid);
            let members = group.instrs.iter().flatten().count();
            assert_eq!(members, 1);
        }
    }

    #[test]
    fn feedthrough_dsts_route_through_w0() {
        let s = grouped_fixture();
        let groups = s.group_ids();
        let fmul = s.group(groups[0]);
        assert!(fmul.io_sel.dsts[0].is_reg());
        assert_eq!(fmul.io_sel.iss[Io::Is4.iss_index()], Ref::Io(Io::Ft0));
        assert!(fmul.io_sel.srcs[0].is_reg());
        assert!(fmul.io_sel.srcs[1].is_reg());
    }

    #[test]
    fn last_group_is_icache_aligned() {
        let s = grouped_fixture();
        let groups = s.group_ids();
        let last = s.group(*groups.last().unwrap());
        let end = last.size.offset + last.size.total;
        assert_eq!(end % isa::ISA_ICACHE_ALIGN, 0);
        assert_eq!(last.size.offset % isa::ISA_ICACHE_ALIGN, 0);

        let second = s.group(groups[groups.len() - 2]);
        assert_eq!(second.size.offset + second.size.total, last.size.offset);
    }

    #[test]
    fn group_sizes_are_even() {
        let s = grouped_fixture();
        for gid in s.group_ids() {
            let size = &s.group(gid).size;
            assert_eq!(size.total % 2, 0);
            let sum = size.header
                + size.instrs.iter().sum::<u32>()
                + size.lower_srcs
                + size.upper_srcs
                + size.iss
                + size.dsts
                + size.word_padding
                + size.align_padding;
            assert_eq!(size.total, sum);
        }
    }

    #[test]
    fn add64_occupies_both_source_pairs() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let dst = s.temp_regarray(2, 0);
        let s0 = s.temp_regarray(2, 2);
        let s1 = s.temp_regarray(2, 4);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.add64(
            Ref::Regarray(dst),
            Ref::Regarray(s0),
            Ref::Regarray(s1),
            Ref::Io(Io::None),
        );
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }
        assert!(schedule_instr_groups(&mut s, false));

        let groups = s.group_ids();
        let add = s.group(groups[0]);
        // First pair on S0/S1, second pair on S2/S3: the fourth source
        // always lands on S3.
        assert_eq!(add.io_sel.srcs[0], Ref::Regarray(s0));
        assert_eq!(add.io_sel.srcs[1], Ref::Regarray(s0));
        assert_eq!(add.io_sel.srcs[2], Ref::Regarray(s1));
        assert_eq!(add.io_sel.srcs[3], Ref::Regarray(s1));
        // Result pair through W0/W1.
        assert_eq!(add.io_sel.dsts[0], Ref::Regarray(dst));
        assert_eq!(add.io_sel.dsts[1], Ref::Regarray(dst));
        assert_eq!(add.io_sel.iss[Io::Is4.iss_index()], Ref::Io(Io::Ft0));
        assert_eq!(add.io_sel.iss[Io::Is5.iss_index()], Ref::Io(Io::Ft1));
        // Upper sources were needed, so the field must be sized.
        assert!(add.size.upper_srcs > 0);
    }

    #[test]
    #[should_panic]
    fn multi_instr_groups_are_refused() {
        let mut s = Shader::new(ShaderStage::Fragment);
        schedule_instr_groups(&mut s, true);
    }
}
