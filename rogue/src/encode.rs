// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Binary encoding of grouped shaders.
//!
//! Groups are serialized strictly in block/group order: header, then the
//! present instructions in reverse phase order, then the lower-source,
//! upper-source, internal-selector and destination maps (each only when
//! sized), then padding. Every field goes through the explicit bit ranges in
//! `isa.rs`.

use crate::info::*;
use crate::ir::*;
use crate::isa;
use crate::schedule_instr_groups::{dst_operand_encoding, src_operand_encoding};
use bitview::{BitMutView, BitMutViewable};

fn encode_header(shader: &Shader, gid: GroupId, out: &mut Vec<u8>) {
    let group = shader.group(gid);
    let header = &group.header;
    let extended = group.size.header == 3;

    let mut buf = [0u8; 3];
    {
        let mut v = BitMutView::new(&mut buf);
        v.set_field(isa::HEADER_EXT, u64::from(extended));
        v.set_field(
            isa::HEADER_ALUTYPE,
            isa::alutype_encoding(header.alu.expect("Group has no ALU type")),
        );
        v.set_field(isa::HEADER_CC, isa::exec_cond_encoding(header.exec_cond));
        let phase = header.phases.trailing_zeros();
        v.set_field(isa::HEADER_OPORG, isa::oporg_encoding(Phase::ALL[phase as usize]));
        v.set_field(isa::HEADER_OPCNT, u64::from(header.phases));
        v.set_field(isa::HEADER_END, u64::from(header.end));
        if extended {
            v.set_field(isa::HEADER_RPT, u64::from(header.repeat - 1));
        }
    }
    out.extend_from_slice(&buf[..group.size.header as usize]);
}

fn encode_alu_instr(shader: &Shader, group: &Group, id: InstrId, out: &mut Vec<u8>) {
    let instr = shader.instr(id);
    let alu = instr.as_alu().unwrap();
    let size = instr_encoded_size(shader, group, id);
    let mut buf = vec![0u8; size];
    let mut v = BitMutView::new(&mut buf[..]);

    match alu.op {
        AluOp::Mbyp | AluOp::Fadd | AluOp::Fmul | AluOp::Fmad | AluOp::Add64 => {
            v.set_field(isa::P0_OPCODE, isa::p0_op_encoding(alu.op));
            v.set_field(isa::P0_EXT, u64::from(size == 2));
            v.set_field(isa::P0_SAT, u64::from(alu.mods.contains(AluOpMods::SAT)));
            v.set_field(isa::P0_LP, u64::from(alu.mods.contains(AluOpMods::LP)));
            if size == 2 {
                let mod_bits = [
                    (isa::P0_S0_ABS, 0, AluSrcMods::ABS),
                    (isa::P0_S0_NEG, 0, AluSrcMods::NEG),
                    (isa::P0_S0_FLR, 0, AluSrcMods::FLR),
                    (isa::P0_S1_ABS, 1, AluSrcMods::ABS),
                    (isa::P0_S1_NEG, 1, AluSrcMods::NEG),
                    (isa::P0_S2_ABS, 2, AluSrcMods::ABS),
                    (isa::P0_S2_NEG, 2, AluSrcMods::NEG),
                ];
                for (range, slot, m) in mod_bits {
                    let set = alu
                        .srcs
                        .get(slot)
                        .map_or(false, |s| s.src_mods.contains(m));
                    v.set_field(range, u64::from(set));
                }
            }
        }
        AluOp::Tst => {
            v.set_field(isa::TST_OP, isa::tst_op_encoding(alu.mods));
            v.set_field(isa::TST_TYPE, isa::tst_type_encoding(alu.mods));
            let to_p0 = alu.dsts[0].dst_ref == Ref::Io(Io::P0);
            v.set_field(isa::TST_PDST, u64::from(!to_p0));
        }
        AluOp::Movc => {
            let cond = match alu.srcs[0].src_ref {
                Ref::Io(Io::None) => 0,
                Ref::Io(Io::Ftt) => 1,
                ref r => panic!("Unsupported MOVC condition {:?}", r),
            };
            v.set_field(isa::MOVC_COND, cond as u64);
            v.set_field(isa::MOVC_W0, 1u64);
            v.set_field(isa::MOVC_W1, 0u64);
        }
        AluOp::PckU8888 => {
            v.set_field(isa::PCK_FORMAT, isa::PCK_FORMAT_U8888);
            v.set_field(isa::PCK_SCALE, u64::from(alu.mods.contains(AluOpMods::SCALE)));
            v.set_field(
                isa::PCK_ROUNDZERO,
                u64::from(alu.mods.contains(AluOpMods::ROUNDZERO)),
            );
        }
        _ => panic!("Pseudo-op has no encoding"),
    }

    out.extend_from_slice(&buf);
}

fn encode_backend_instr(shader: &Shader, group: &Group, id: InstrId, out: &mut Vec<u8>) {
    let instr = shader.instr(id);
    let be = instr.as_backend().unwrap();
    let size = instr_encoded_size(shader, group, id);
    let mut buf = vec![0u8; size];
    let mut v = BitMutView::new(&mut buf[..]);

    v.set_field(isa::BACKEND_OPCODE, isa::backend_op_encoding(be.op));
    match be.op {
        BackendOp::UvswWrite | BackendOp::UvswWriteThenEmitThenEndtask => {
            let vtxout = be.dsts[0]
                .dst_ref
                .as_reg()
                .expect("UVSW write destination must be a register");
            assert_eq!(shader.reg(vtxout).class, RegClass::VtxOut);
            v.set_field(isa::UVSW_DST, u64::from(shader.reg(vtxout).index));
        }
        BackendOp::Ld => {
            let drc = be.srcs[0].src_ref.as_drc().unwrap();
            let burst = be.srcs[1].src_ref.as_val().unwrap();
            v.set_field(isa::LD_DRC, u64::from(drc));
            v.set_field(isa::LD_BURST, u64::from(burst));
        }
        BackendOp::FitrpPixel => {
            let drc = be.srcs[0].src_ref.as_drc().unwrap();
            let count = be.srcs[3].src_ref.as_val().unwrap();
            v.set_field(isa::FITRP_DRC, u64::from(drc));
            v.set_field(isa::FITRP_COUNT, u64::from(count));
            v.set_field(
                isa::FITRP_FCNORM,
                u64::from(be.mods.contains(BackendOpMods::FCNORM)),
            );
            v.set_field(isa::FITRP_SAT, u64::from(be.mods.contains(BackendOpMods::SAT)));
        }
        BackendOp::UvswEmit | BackendOp::UvswEndtask | BackendOp::UvswEmitThenEndtask => (),
    }

    out.extend_from_slice(&buf);
}

fn encode_ctrl_instr(shader: &Shader, group: &Group, id: InstrId, out: &mut Vec<u8>) {
    let instr = shader.instr(id);
    let ctrl = instr.as_ctrl().unwrap();
    let size = instr_encoded_size(shader, group, id);
    let mut buf = vec![0u8; size];
    let mut v = BitMutView::new(&mut buf[..]);

    v.set_field(isa::CTRL_OPCODE, isa::ctrl_op_encoding(ctrl.op));
    match ctrl.op {
        CtrlOp::Nop => {
            v.set_field(isa::NOP_END, u64::from(ctrl.mods.contains(CtrlOpMods::END)));
        }
        CtrlOp::Wdf => {
            let drc = ctrl.srcs[0].src_ref.as_drc().unwrap();
            v.set_field(isa::WDF_DRC, u64::from(drc));
        }
        CtrlOp::Br => {
            v.set_field(
                isa::BR_ANYINST,
                u64::from(ctrl.mods.contains(CtrlOpMods::ANYINST)),
            );
            v.set_field(
                isa::BR_ALLINST,
                u64::from(ctrl.mods.contains(CtrlOpMods::ALLINST)),
            );
            let target = ctrl.target_block.expect("Branch without a target");
            let target_group = *shader
                .block(target)
                .groups
                .first()
                .expect("Branch target has no instruction groups");
            let target_offset = shader.group(target_group).size.offset;
            let rel = i64::from(target_offset) - i64::from(group.size.offset);
            v.set_field(isa::BR_OFFSET, (rel as i32) as u32 as u64);
        }
        CtrlOp::End => panic!("Pseudo-op has no encoding"),
    }

    out.extend_from_slice(&buf);
}

fn encode_bitwise_instr(shader: &Shader, group: &Group, id: InstrId, out: &mut Vec<u8>) {
    let instr = shader.instr(id);
    let bw = instr.as_bitwise().unwrap();
    let size = instr_encoded_size(shader, group, id);
    let mut buf = vec![0u8; size];
    let mut v = BitMutView::new(&mut buf[..]);

    v.set_field(isa::BITWISE_OPCODE, isa::bitwise_op_encoding(bw.op));
    match bw.op {
        BitwiseOp::Byp0 => {
            let imm = bw.srcs[0].src_ref.as_val().unwrap();
            v.set_field(isa::BYP0_IMM_PRESENT, 1u64);
            v.set_field(isa::BYP0_IMM, u64::from(imm));
        }
    }

    out.extend_from_slice(&buf);
}

fn instr_encoded_size(shader: &Shader, group: &Group, id: InstrId) -> usize {
    let (_, phase) = shader.instr(id).group.expect("Instruction is not grouped");
    group.size.instrs[phase as usize] as usize
}

fn encode_instr(shader: &Shader, group: &Group, id: InstrId, out: &mut Vec<u8>) {
    match &shader.instr(id).op {
        InstrOp::Alu(_) => encode_alu_instr(shader, group, id, out),
        InstrOp::Backend(_) => encode_backend_instr(shader, group, id, out),
        InstrOp::Ctrl(_) => encode_ctrl_instr(shader, group, id, out),
        InstrOp::Bitwise(_) => encode_bitwise_instr(shader, group, id, out),
    }
}

/// Packs one source block: the IS0 mux (lower sources only) followed by each
/// slot's bank and index fields, LSB first.
fn encode_srcs(
    shader: &Shader,
    row: &RegSrcInfo,
    srcs: &[Ref; ISA_SRCS],
    base_slot: usize,
    mux: Option<u64>,
    out: &mut Vec<u8>,
) {
    let mut buf = vec![0u8; row.bytes as usize];
    let mut pos = 0usize;
    {
        let mut v = BitMutView::new(&mut buf[..]);
        if row.mux_bits > 0 {
            v.set_bit_range_u64(pos..pos + row.mux_bits as usize, mux.unwrap_or(0));
        }
        pos += row.mux_bits as usize;
        for i in 0..row.num_srcs {
            let slot = base_slot + i;
            if slot < ISA_SRCS {
                if let Some((bank, index)) = src_operand_encoding(shader, srcs, slot) {
                    v.set_bit_range_u64(pos..pos + row.bank_bits[i] as usize, u64::from(bank));
                    v.set_bit_range_u64(
                        pos + row.bank_bits[i] as usize
                            ..pos + (row.bank_bits[i] + row.index_bits[i]) as usize,
                        u64::from(index),
                    );
                }
            }
            pos += (row.bank_bits[i] + row.index_bits[i]) as usize;
        }
    }
    out.extend_from_slice(&buf);
}

fn encode_dsts(shader: &Shader, row: &RegDstInfo, dsts: &[Ref; ISA_DSTS], out: &mut Vec<u8>) {
    let mut buf = vec![0u8; row.bytes as usize];
    let mut pos = 0usize;
    {
        let mut v = BitMutView::new(&mut buf[..]);
        for i in 0..row.num_dsts {
            if i < ISA_DSTS {
                if let Some((bank, index)) = dst_operand_encoding(shader, dsts, i) {
                    v.set_bit_range_u64(pos..pos + row.bank_bits[i] as usize, u64::from(bank));
                    v.set_bit_range_u64(
                        pos + row.bank_bits[i] as usize
                            ..pos + (row.bank_bits[i] + row.index_bits[i]) as usize,
                        u64::from(index),
                    );
                }
            }
            pos += (row.bank_bits[i] + row.index_bits[i]) as usize;
        }
    }
    out.extend_from_slice(&buf);
}

fn encode_iss(group: &Group, out: &mut Vec<u8>) {
    let mut byte = [0u8; 1];
    {
        let mut v = BitMutView::new(&mut byte);
        let fields = [
            (1, isa::ISS_IS1),
            (2, isa::ISS_IS2),
            (3, isa::ISS_IS3),
            (4, isa::ISS_IS4),
            (5, isa::ISS_IS5),
        ];
        for (slot, range) in fields {
            if let Ref::Io(io) = group.io_sel.iss[slot] {
                v.set_field(range, isa::iss_encoding(slot, io));
            }
        }
    }
    out.push(byte[0]);
}

fn encode_group(shader: &Shader, gid: GroupId, out: &mut Vec<u8>) {
    let group = shader.group(gid);
    assert_eq!(
        out.len() as u32,
        group.size.offset,
        "Group offset does not match the encoded stream"
    );

    encode_header(shader, gid, out);

    for phase in Phase::ALL.iter().rev() {
        if let Some(id) = group.instrs[*phase as usize] {
            encode_instr(shader, group, id, out);
        }
    }

    if let Some(v) = group.encode_info.lower_src_index {
        let mux = match group.io_sel.iss[Io::Is0.iss_index()] {
            Ref::Io(io) => Some(isa::mux_encoding(io)),
            _ => None,
        };
        encode_srcs(shader, &REG_LOWER_SRC_INFOS[v], &group.io_sel.srcs, 0, mux, out);
    }
    if let Some(v) = group.encode_info.upper_src_index {
        encode_srcs(shader, &REG_UPPER_SRC_INFOS[v], &group.io_sel.srcs, 3, None, out);
    }
    if group.size.iss > 0 {
        encode_iss(group, out);
    }
    if let Some(v) = group.encode_info.dst_index {
        encode_dsts(shader, &REG_DST_INFOS[v], &group.io_sel.dsts, out);
    }

    for _ in 0..group.size.word_padding {
        out.push(isa::PAD_BYTE);
    }
    if group.size.align_padding > 0 {
        out.push(isa::align_pad_byte(group.size.align_padding / 2));
        for _ in 1..group.size.align_padding {
            out.push(isa::PAD_BYTE);
        }
    }

    assert_eq!(
        out.len() as u32,
        group.size.offset + group.size.total,
        "Encoded group size does not match its computed size"
    );
}

/// Serializes a grouped shader into its binary instruction stream.
pub fn encode_shader(shader: &Shader) -> Vec<u8> {
    assert!(shader.is_grouped, "Only grouped shaders can be encoded");

    let mut out = Vec::new();
    for gid in shader.group_ids() {
        encode_group(shader, gid, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::schedule_instr_groups::schedule_instr_groups;

    fn encode_fixture() -> (Shader, Vec<u8>) {
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
        let bin = encode_shader(&s);
        (s, bin)
    }

    #[test]
    fn binary_length_matches_group_layout() {
        let (s, bin) = encode_fixture();
        let last = *s.group_ids().last().unwrap();
        let end = s.group(last).size.offset + s.group(last).size.total;
        assert_eq!(bin.len() as u32, end);
        assert_eq!(bin.len() % isa::ISA_ICACHE_ALIGN as usize, 0);
        assert!(!bin.is_empty());
    }

    #[test]
    fn header_carries_end_flag_and_alutype() {
        let (s, bin) = encode_fixture();
        let last = *s.group_ids().last().unwrap();
        let offset = s.group(last).size.offset as usize;
        // Extended 3-byte header for the control group.
        assert_eq!(bin[offset] & 1, 1);
        // ALU type control (2) in bits 1..3.
        assert_eq!((bin[offset] >> 1) & 0x3, 2);
        // End bit: bit 6 of byte 1.
        assert_eq!((bin[offset + 1] >> 6) & 1, 1);
    }

    #[test]
    fn alignment_padding_is_tagged() {
        let (s, bin) = encode_fixture();
        let last = *s.group_ids().last().unwrap();
        let group = s.group(last);
        assert!(group.size.align_padding > 0);
        let pad_start =
            (group.size.offset + group.size.total - group.size.align_padding) as usize;
        assert_eq!(bin[pad_start], 0xf0 | (group.size.align_padding / 2) as u8);
        for b in &bin[pad_start + 1..] {
            assert_eq!(*b, isa::PAD_BYTE);
        }
    }

    #[test]
    fn deterministic_output() {
        let (_, bin0) = encode_fixture();
        let (_, bin1) = encode_fixture();
        assert_eq!(bin0, bin1);
    }

    #[test]
    fn branch_offsets_are_block_relative() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let b0 = s.block_create(None);
        let b1 = s.block_create(None);
        let mut b = Builder::new(&mut s, Cursor::block_start(b0));
        b.br(b1);
        let mut b = Builder::new(&mut s, Cursor::block_start(b1));
        let nop = b.nop();
        {
            let instr = s.instr_mut(nop);
            instr.as_ctrl_mut().unwrap().mods |= CtrlOpMods::END;
            instr.end = true;
        }
        assert!(schedule_instr_groups(&mut s, false));
        let bin = encode_shader(&s);

        // Branch group: 3-byte header plus a 5-byte body.
        let groups = s.group_ids();
        let br_group = s.group(groups[0]);
        assert_eq!(br_group.size.offset, 0);
        assert_eq!(br_group.size.header, 3);
        // Ctrl opcode 2 in the low bits of the body.
        assert_eq!(bin[3] & 0x7, 2);
        // Relative offset to the target block's first group.
        let target_offset = s.group(groups[1]).size.offset;
        let rel = u32::from_le_bytes([bin[4], bin[5], bin[6], bin[7]]);
        assert_eq!(rel, target_offset);
    }
}
