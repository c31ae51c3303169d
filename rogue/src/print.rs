// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! IR pretty-printing for pass debug output and validator dumps.

use crate::info::*;
use crate::ir::*;
use std::fmt;
use std::fmt::Write;

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

impl fmt::Display for ExecCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecCond::PeTrue => write!(f, "pe_true"),
            ExecCond::P0True => write!(f, "p0_true"),
            ExecCond::PeAny => write!(f, "pe_any"),
            ExecCond::P0False => write!(f, "p0_false"),
        }
    }
}

impl fmt::Display for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Io::S0 => "s0",
            Io::S1 => "s1",
            Io::S2 => "s2",
            Io::S3 => "s3",
            Io::S4 => "s4",
            Io::S5 => "s5",
            Io::W0 => "w0",
            Io::W1 => "w1",
            Io::Is0 => "is0",
            Io::Is1 => "is1",
            Io::Is2 => "is2",
            Io::Is3 => "is3",
            Io::Is4 => "is4",
            Io::Is5 => "is5",
            Io::Ft0 => "ft0",
            Io::Ft1 => "ft1",
            Io::Ft2 => "ft2",
            Io::Fte => "fte",
            Io::Ftt => "ftt",
            Io::P0 => "p0",
            Io::None => "_",
        };
        write!(f, "{}", s)
    }
}

fn alu_op_mods_str(mods: AluOpMods) -> String {
    let names = [
        (AluOpMods::LP, "lp"),
        (AluOpMods::SAT, "sat"),
        (AluOpMods::SCALE, "scale"),
        (AluOpMods::ROUNDZERO, "roundzero"),
        (AluOpMods::Z, "z"),
        (AluOpMods::GZ, "gz"),
        (AluOpMods::GEZ, "gez"),
        (AluOpMods::E, "e"),
        (AluOpMods::G, "g"),
        (AluOpMods::GE, "ge"),
        (AluOpMods::NE, "ne"),
        (AluOpMods::L, "l"),
        (AluOpMods::LE, "le"),
        (AluOpMods::F32, "f32"),
        (AluOpMods::U32, "u32"),
        (AluOpMods::S32, "s32"),
    ];
    let mut s = String::new();
    for (m, name) in names {
        if mods.contains(m) {
            s.push('.');
            s.push_str(name);
        }
    }
    s
}

fn ctrl_op_mods_str(mods: CtrlOpMods) -> String {
    let names = [
        (CtrlOpMods::ALLINST, "allinst"),
        (CtrlOpMods::ANYINST, "anyinst"),
        (CtrlOpMods::END, "end"),
    ];
    let mut s = String::new();
    for (m, name) in names {
        if mods.contains(m) {
            s.push('.');
            s.push_str(name);
        }
    }
    s
}

fn backend_op_mods_str(mods: BackendOpMods) -> String {
    let names = [
        (BackendOpMods::FCNORM, "fcnorm"),
        (BackendOpMods::SAT, "sat"),
    ];
    let mut s = String::new();
    for (m, name) in names {
        if mods.contains(m) {
            s.push('.');
            s.push_str(name);
        }
    }
    s
}

impl Shader {
    pub fn reg_str(&self, id: RegId) -> String {
        let reg = self.reg(id);
        let prefix = reg_class_info(reg.class).prefix;
        match reg.component {
            Some(c) => format!("{}{}.{}", prefix, reg.index, c),
            None => format!("{}{}", prefix, reg.index),
        }
    }

    pub fn regarray_str(&self, id: RegArrayId) -> String {
        let ra = self.regarray(id);
        let class = self.regarray_class(id);
        let start = self.regarray_start(id);
        let prefix = reg_class_info(class).prefix;
        let comp = match ra.component {
            Some(c) => format!(".{}", c),
            None => String::new(),
        };
        format!(
            "{{{}{}..{}{}}}",
            prefix,
            start,
            start + ra.size() - 1,
            comp
        )
    }

    pub fn ref_str(&self, r: &Ref) -> String {
        match r {
            Ref::None => "_".to_string(),
            Ref::Val(v) => format!("#{}", v),
            Ref::Imm(v) => format!("0x{:08x}", v),
            Ref::Reg(reg) => self.reg_str(*reg),
            Ref::Regarray(ra) => self.regarray_str(*ra),
            Ref::Io(io) => io.to_string(),
            Ref::Drc(d) => format!("drc{}", d),
        }
    }

    fn src_str(&self, src: &Src) -> String {
        let mut s = self.ref_str(&src.src_ref);
        if src.src_mods.contains(AluSrcMods::ABS) {
            s = format!("|{}|", s);
        }
        if src.src_mods.contains(AluSrcMods::NEG) {
            s = format!("-{}", s);
        }
        if src.src_mods.contains(AluSrcMods::FLR) {
            s = format!("flr({})", s);
        }
        s
    }

    fn dst_str(&self, dst: &Dst) -> String {
        let mut s = self.ref_str(&dst.dst_ref);
        if !dst.dst_mods.is_empty() {
            s.push_str(".e");
            for (m, c) in [
                (AluDstMods::E0, '0'),
                (AluDstMods::E1, '1'),
                (AluDstMods::E2, '2'),
                (AluDstMods::E3, '3'),
            ] {
                if dst.dst_mods.contains(m) {
                    s.push(c);
                }
            }
        }
        s
    }

    pub fn instr_str(&self, id: InstrId) -> String {
        let instr = self.instr(id);
        let mut s = String::new();

        match instr.exec_cond {
            ExecCond::PeTrue => (),
            ExecCond::P0True => s.push_str("if(p0) "),
            ExecCond::P0False => s.push_str("if(!p0) "),
            ExecCond::PeAny => s.push_str("ifany "),
        }

        match &instr.op {
            InstrOp::Alu(alu) => {
                s.push_str(alu_op_info(alu.op).name);
                s.push_str(&alu_op_mods_str(alu.mods));
            }
            InstrOp::Backend(be) => {
                s.push_str(backend_op_info(be.op).name);
                s.push_str(&backend_op_mods_str(be.mods));
            }
            InstrOp::Ctrl(ctrl) => {
                s.push_str(ctrl_op_info(ctrl.op).name);
                s.push_str(&ctrl_op_mods_str(ctrl.mods));
            }
            InstrOp::Bitwise(bw) => {
                s.push_str(bitwise_op_info(bw.op).name);
            }
        }

        let mut operands = Vec::new();
        for dst in instr.dsts() {
            operands.push(self.dst_str(dst));
        }
        for src in instr.srcs() {
            operands.push(self.src_str(src));
        }
        if let InstrOp::Ctrl(ctrl) = &instr.op {
            if let Some(target) = ctrl.target_block {
                operands.push(format!("block{}", self.block(target).index));
            }
        }
        if !operands.is_empty() {
            s.push(' ');
            s.push_str(&operands.join(", "));
        }

        if instr.repeat > 1 {
            s.push_str(&format!(" (x{})", instr.repeat));
        }
        if instr.end {
            s.push_str(" [end]");
        }
        if let Some(c) = &instr.comment {
            s.push_str(&format!(" /* {} */", c));
        }
        s
    }

    fn write_groups(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for gid in self.group_ids() {
            let group = self.group(gid);
            writeln!(
                f,
                "    g{} @{} (+{}b):",
                group.index, group.size.offset, group.size.total
            )?;
            for phase in Phase::ALL {
                if let Some(instr) = group.instrs[phase as usize] {
                    writeln!(
                        f,
                        "        p{}: {}",
                        phase as usize,
                        self.instr_str(instr)
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "shader \"{}\" ({})", self.name, self.stage)?;
        if self.is_grouped {
            return self.write_groups(f);
        }
        for bid in self.block_ids() {
            let block = self.block(bid);
            let mut label = String::new();
            if let Some(l) = &block.label {
                write!(label, " \"{}\"", l).unwrap();
            }
            writeln!(f, "    block{}{}:", block.index, label)?;
            for instr in &block.instrs {
                writeln!(
                    f,
                    "        {}: {}",
                    self.instr(*instr).index,
                    self.instr_str(*instr)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn instr_formatting() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(Some("main"));
        let (a, b_reg, c) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let fmul = b.fmul(Ref::Reg(c), Ref::Reg(a), Ref::Reg(b_reg));
        let mov = b.mov(Ref::Reg(a), Ref::Imm(0x3f800000));

        assert_eq!(s.instr_str(fmul), "fmul s2, s0, s1");
        assert_eq!(s.instr_str(mov), "mov s0, 0x3f800000");

        s.instr_mut(fmul)
            .as_alu_mut()
            .unwrap()
            .srcs[0]
            .src_mods = AluSrcMods::NEG | AluSrcMods::ABS;
        assert_eq!(s.instr_str(fmul), "fmul s2, -|s0|, s1");

        let text = s.to_string();
        assert!(text.contains("block0 \"main\":"));
    }
}
