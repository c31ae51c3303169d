// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Shader validation.
//!
//! Re-walks the whole shader after every pass and checks the structural
//! invariants the passes rely on: operand counts and types against the op
//! info tables, single static assignment, exact bidirectional consistency of
//! the use/write records, interning cache and usage bitset consistency,
//! regarray nesting, DRC transaction pairing, and (once grouped) group
//! layout. Failures abort with a full IR dump by default and can be
//! downgraded to logging for debugging.

use crate::compile::{CompilerOptions, DebugFlags};
use crate::info::*;
use crate::ir::*;
use crate::isa;
use rustc_hash::FxHashMap;

struct Validator<'a> {
    shader: &'a Shader,
    errors: Vec<String>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    fn instr_error(&mut self, id: InstrId, msg: &str) {
        self.errors
            .push(format!("instr {}: {}: {}", id.0, self.shader.instr_str(id), msg));
    }

    fn ref_size(&self, r: &Ref) -> Option<u32> {
        match r {
            Ref::Reg(_) => Some(1),
            Ref::Regarray(ra) => Some(self.shader.regarray(*ra).size()),
            _ => None,
        }
    }

    fn validate_operand_sizes(
        &mut self,
        id: InstrId,
        expected: &[OperandSize],
        refs: Vec<Ref>,
        what: &str,
    ) {
        for (i, r) in refs.iter().enumerate() {
            let want = expected[i];
            if want == 0 {
                continue;
            }
            if let Some(size) = self.ref_size(r) {
                if size != u32::from(want) {
                    self.instr_error(
                        id,
                        &format!("{} {} has size {}, expected {}", what, i, size, want),
                    );
                }
            }
        }
    }

    fn validate_instr(&mut self, id: InstrId) {
        let instr = self.shader.instr(id);

        if instr.repeat == 0 {
            self.instr_error(id, "repeat count of zero");
        }

        match &instr.op {
            InstrOp::Alu(alu) => {
                let info = alu_op_info(alu.op);
                if alu.dsts.len() != info.num_dsts || alu.srcs.len() != info.num_srcs {
                    self.instr_error(id, "operand count does not match the op info");
                    return;
                }
                if !info.supported_op_mods.contains(alu.mods) {
                    self.instr_error(id, "unsupported op modifiers");
                }
                for (i, dst) in alu.dsts.iter().enumerate() {
                    if !info.supported_dst_types[i].matches(&dst.dst_ref) {
                        self.instr_error(id, &format!("unsupported dst {} reference type", i));
                    }
                }
                for (i, src) in alu.srcs.iter().enumerate() {
                    if !info.supported_src_types[i].matches(&src.src_ref) {
                        self.instr_error(id, &format!("unsupported src {} reference type", i));
                    }
                    if !src.src_mods.is_empty() && !info.src_mod_slots[i] {
                        self.instr_error(id, &format!("src {} cannot carry modifiers", i));
                    }
                }
                if instr.repeat > 1 && info.src_repeat_mask == 0 {
                    self.instr_error(id, "op does not support repeat");
                }
                self.validate_operand_sizes(
                    id,
                    info.dst_size,
                    alu.dsts.iter().map(|d| d.dst_ref).collect(),
                    "dst",
                );
                self.validate_operand_sizes(
                    id,
                    info.src_size,
                    alu.srcs.iter().map(|s| s.src_ref).collect(),
                    "src",
                );
            }
            InstrOp::Backend(be) => {
                let info = backend_op_info(be.op);
                if be.dsts.len() != info.num_dsts || be.srcs.len() != info.num_srcs {
                    self.instr_error(id, "operand count does not match the op info");
                    return;
                }
                if !info.supported_op_mods.contains(be.mods) {
                    self.instr_error(id, "unsupported op modifiers");
                }
                for (i, dst) in be.dsts.iter().enumerate() {
                    if !info.supported_dst_types[i].matches(&dst.dst_ref) {
                        self.instr_error(id, &format!("unsupported dst {} reference type", i));
                    }
                }
                for (i, src) in be.srcs.iter().enumerate() {
                    if !info.supported_src_types[i].matches(&src.src_ref) {
                        self.instr_error(id, &format!("unsupported src {} reference type", i));
                    }
                }
                self.validate_operand_sizes(
                    id,
                    info.dst_size,
                    be.dsts.iter().map(|d| d.dst_ref).collect(),
                    "dst",
                );
                self.validate_operand_sizes(
                    id,
                    info.src_size,
                    be.srcs.iter().map(|s| s.src_ref).collect(),
                    "src",
                );
            }
            InstrOp::Ctrl(ctrl) => {
                let info = ctrl_op_info(ctrl.op);
                if ctrl.srcs.len() != info.num_srcs || ctrl.dsts.len() != info.num_dsts {
                    self.instr_error(id, "operand count does not match the op info");
                    return;
                }
                if !info.supported_op_mods.contains(ctrl.mods) {
                    self.instr_error(id, "unsupported op modifiers");
                }
                if ctrl.target_block.is_some() != info.has_target {
                    self.instr_error(id, "branch target mismatch");
                }
                for (i, src) in ctrl.srcs.iter().enumerate() {
                    if !info.supported_src_types[i].matches(&src.src_ref) {
                        self.instr_error(id, &format!("unsupported src {} reference type", i));
                    }
                }
            }
            InstrOp::Bitwise(bw) => {
                let info = bitwise_op_info(bw.op);
                if bw.dsts.len() != info.num_dsts || bw.srcs.len() != info.num_srcs {
                    self.instr_error(id, "operand count does not match the op info");
                    return;
                }
                for (i, dst) in bw.dsts.iter().enumerate() {
                    if !info.supported_dst_types[i].matches(&dst.dst_ref) {
                        self.instr_error(id, &format!("unsupported dst {} reference type", i));
                    }
                }
                for (i, src) in bw.srcs.iter().enumerate() {
                    if !info.supported_src_types[i].matches(&src.src_ref) {
                        self.instr_error(id, &format!("unsupported src {} reference type", i));
                    }
                }
            }
        }
    }

    fn validate_blocks(&mut self) {
        let blocks = self.shader.block_ids();
        if blocks.is_empty() {
            self.error("shader has no blocks".to_string());
            return;
        }

        for bid in &blocks {
            let block = self.shader.block(*bid);
            for (pos, id) in block.instrs.iter().enumerate() {
                let is_branch = matches!(
                    &self.shader.instr(*id).op,
                    InstrOp::Ctrl(ctrl) if ctrl_op_info(ctrl.op).has_target
                );
                if is_branch && pos + 1 != block.instrs.len() {
                    self.instr_error(*id, "branch is not the last instruction of its block");
                }
                if self.shader.instr(*id).block != *bid {
                    self.instr_error(*id, "instruction block back-reference is wrong");
                }
            }
            // Branch back-references.
            for user in &block.uses {
                let targets = matches!(
                    &self.shader.instr(*user).op,
                    InstrOp::Ctrl(ctrl) if ctrl.target_block == Some(*bid)
                );
                if !targets {
                    self.instr_error(*user, "stale block use record");
                }
            }
        }

        let last_block = self.shader.block(*blocks.last().unwrap());
        match last_block.instrs.last() {
            None => self.error("final block is empty".to_string()),
            Some(tail) => {
                let instr = self.shader.instr(*tail);
                let ends = instr.end
                    || instr.is_nop_end()
                    || matches!(&instr.op, InstrOp::Ctrl(c) if c.op == CtrlOp::End);
                if !ends {
                    self.instr_error(*tail, "shader does not end with an end instruction");
                }
            }
        }
    }

    fn validate_ssa(&mut self) {
        for reg in self.shader.class_reg_ids(RegClass::Ssa) {
            if self.shader.reg(reg).writes.len() > 1 {
                self.error(format!(
                    "SSA register {} has {} writes",
                    self.shader.reg_str(reg),
                    self.shader.reg(reg).writes.len()
                ));
            }
        }
        for ra in self.shader.regarray_ids() {
            if self.shader.regarray_class(ra) == RegClass::Ssa
                && self.shader.regarray(ra).writes.len() > 1
            {
                self.error(format!(
                    "SSA regarray {} has {} writes",
                    self.shader.regarray_str(ra),
                    self.shader.regarray(ra).writes.len()
                ));
            }
        }
    }

    fn validate_links(&mut self) {
        let mut reg_writes: FxHashMap<RegId, Vec<RefLoc>> = FxHashMap::default();
        let mut reg_uses: FxHashMap<RegId, Vec<RefLoc>> = FxHashMap::default();
        let mut ra_writes: FxHashMap<RegArrayId, Vec<RefLoc>> = FxHashMap::default();
        let mut ra_uses: FxHashMap<RegArrayId, Vec<RefLoc>> = FxHashMap::default();
        let mut imm_locs: Vec<RefLoc> = Vec::new();

        for id in self.shader.instr_ids() {
            let instr = self.shader.instr(id);
            for (slot, dst) in instr.dsts().iter().enumerate() {
                let loc = RefLoc { instr: id, slot };
                match dst.dst_ref {
                    Ref::Reg(r) => reg_writes.entry(r).or_default().push(loc),
                    Ref::Regarray(ra) => ra_writes.entry(ra).or_default().push(loc),
                    _ => (),
                }
            }
            for (slot, src) in instr.srcs().iter().enumerate() {
                let loc = RefLoc { instr: id, slot };
                match src.src_ref {
                    Ref::Reg(r) => reg_uses.entry(r).or_default().push(loc),
                    Ref::Regarray(ra) => ra_uses.entry(ra).or_default().push(loc),
                    Ref::Imm(_) => imm_locs.push(loc),
                    _ => (),
                }
            }
        }

        let sort = |mut v: Vec<RefLoc>| {
            v.sort_by_key(|l| (l.instr, l.slot));
            v
        };

        for class in RegClass::ALL {
            for reg in self.shader.class_reg_ids(class) {
                let expect_w = sort(reg_writes.remove(&reg).unwrap_or_default());
                let expect_u = sort(reg_uses.remove(&reg).unwrap_or_default());
                let have_w = sort(self.shader.reg(reg).writes.clone());
                let have_u = sort(self.shader.reg(reg).uses.clone());
                if expect_w != have_w {
                    self.error(format!(
                        "register {} write records do not match its referents",
                        self.shader.reg_str(reg)
                    ));
                }
                if expect_u != have_u {
                    self.error(format!(
                        "register {} use records do not match its referents",
                        self.shader.reg_str(reg)
                    ));
                }
            }
        }
        for (reg, _) in reg_writes.iter().chain(reg_uses.iter()) {
            if !self.shader.reg_exists(*reg) {
                self.error(format!("reference to deleted register {:?}", reg));
            }
        }

        for ra in self.shader.regarray_ids() {
            let expect_w = sort(ra_writes.remove(&ra).unwrap_or_default());
            let expect_u = sort(ra_uses.remove(&ra).unwrap_or_default());
            let have_w = sort(self.shader.regarray(ra).writes.clone());
            let have_u = sort(self.shader.regarray(ra).uses.clone());
            if expect_w != have_w || expect_u != have_u {
                self.error(format!(
                    "regarray {} access records do not match its referents",
                    self.shader.regarray_str(ra)
                ));
            }
        }

        let mut expect_imm = sort(imm_locs);
        let mut have_imm = self.shader.imm_uses();
        have_imm.sort_by_key(|l| (l.instr, l.slot));
        expect_imm.sort_by_key(|l| (l.instr, l.slot));
        if expect_imm != have_imm {
            self.error("pending immediate list does not match immediate sources".to_string());
        }
    }

    fn validate_reg_cache(&mut self) {
        for class in RegClass::ALL {
            let mut live_indices: Vec<u32> = Vec::new();
            for reg in self.shader.class_reg_ids(class) {
                let (index, component) = {
                    let r = self.shader.reg(reg);
                    (r.index, r.component)
                };
                if self.shader.reg_lookup(class, index, component) != Some(reg) {
                    self.error(format!(
                        "register {} is not interned under its own key",
                        self.shader.reg_str(reg)
                    ));
                }
                if component.is_none() {
                    live_indices.push(index);
                    if !self.shader.reg_is_used(class, index) {
                        self.error(format!(
                            "register {} index not marked used",
                            self.shader.reg_str(reg)
                        ));
                    }
                }
            }
            live_indices.sort_unstable();
            let used = self.shader.used_reg_indices(class);
            for idx in &used {
                if live_indices.binary_search(idx).is_err() {
                    self.error(format!(
                        "{} index {} marked used without an owning register",
                        reg_class_info(class).name,
                        idx
                    ));
                }
            }
        }
    }

    fn validate_regarrays(&mut self) {
        let arrays = self.shader.regarray_ids();
        for ra in &arrays {
            let class = self.shader.regarray_class(*ra);
            let regs = self.shader.regarray(*ra).regs.clone();
            let is_vec = self.shader.regarray(*ra).component.is_some();

            for (k, reg) in regs.iter().enumerate() {
                let r = self.shader.reg(*reg);
                if r.class != class {
                    self.error(format!(
                        "regarray {} mixes register classes",
                        self.shader.regarray_str(*ra)
                    ));
                }
                let contiguous = if is_vec {
                    r.index == self.shader.regarray_start(*ra)
                        && r.component
                            == Some(
                                self.shader.regarray(*ra).component.unwrap() + k as u8,
                            )
                } else {
                    r.index == self.shader.regarray_start(*ra) + k as u32
                };
                if !contiguous {
                    self.error(format!(
                        "regarray {} registers are not contiguous",
                        self.shader.regarray_str(*ra)
                    ));
                }
            }

            if let Some(parent) = self.shader.regarray(*ra).parent {
                if self.shader.regarray(parent).parent.is_some() {
                    self.error(format!(
                        "regarray {} nests deeper than one level",
                        self.shader.regarray_str(*ra)
                    ));
                }
                if !self.shader.regarray(parent).children.contains(ra) {
                    self.error(format!(
                        "regarray {} missing from its parent's children",
                        self.shader.regarray_str(*ra)
                    ));
                }
            }
        }

        // Overlapping-but-not-nested virtual arrays are malformed. (Temp
        // arrays may alias after allocation.)
        for (i, a) in arrays.iter().enumerate() {
            if self.shader.regarray_class(*a) != RegClass::Ssa {
                continue;
            }
            for b in arrays.iter().skip(i + 1) {
                if self.shader.regarray_class(*b) != RegClass::Ssa {
                    continue;
                }
                if self.shader.regarray(*a).component.is_some()
                    != self.shader.regarray(*b).component.is_some()
                {
                    continue;
                }
                let (s0, e0, s1, e1) = if self.shader.regarray(*a).component.is_some() {
                    if self.shader.regarray_start(*a) != self.shader.regarray_start(*b) {
                        continue;
                    }
                    (
                        u32::from(self.shader.regarray(*a).component.unwrap()),
                        u32::from(self.shader.regarray(*a).component.unwrap())
                            + self.shader.regarray(*a).size(),
                        u32::from(self.shader.regarray(*b).component.unwrap()),
                        u32::from(self.shader.regarray(*b).component.unwrap())
                            + self.shader.regarray(*b).size(),
                    )
                } else {
                    (
                        self.shader.regarray_start(*a),
                        self.shader.regarray_start(*a) + self.shader.regarray(*a).size(),
                        self.shader.regarray_start(*b),
                        self.shader.regarray_start(*b) + self.shader.regarray(*b).size(),
                    )
                };
                let overlap = s0 < e1 && s1 < e0;
                let nested = (s0 <= s1 && e1 <= e0) || (s1 <= s0 && e0 <= e1);
                if overlap && !nested {
                    self.error(format!(
                        "regarrays {} and {} overlap without nesting",
                        self.shader.regarray_str(*a),
                        self.shader.regarray_str(*b)
                    ));
                }
            }
        }
    }

    fn validate_drc(&mut self) {
        let order: FxHashMap<InstrId, usize> = self
            .shader
            .instr_ids()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut releases: Vec<InstrId> = Vec::new();
        for slot in 0..ROGUE_DRCS {
            for trxn in &self.shader.drc_trxns[slot] {
                if !order.contains_key(&trxn.acquire) {
                    self.error(format!("DRC {} transaction acquire is not in the shader", slot));
                    continue;
                }
                if let Some(release) = trxn.release {
                    releases.push(release);
                    let is_wdf = matches!(
                        &self.shader.instr(release).op,
                        InstrOp::Ctrl(ctrl) if ctrl.op == CtrlOp::Wdf
                    );
                    if !is_wdf {
                        self.instr_error(release, "DRC release is not a WDF");
                        continue;
                    }
                    let drc = self.shader.instr(release).srcs()[0].src_ref.as_drc();
                    if drc != Some(slot as u8) {
                        self.instr_error(release, "WDF waits on the wrong DRC slot");
                    }
                    if order[&release] <= order[&trxn.acquire] {
                        self.instr_error(release, "WDF precedes its data request");
                    }
                }
            }
        }

        for id in self.shader.instr_ids() {
            let is_wdf = matches!(
                &self.shader.instr(id).op,
                InstrOp::Ctrl(ctrl) if ctrl.op == CtrlOp::Wdf
            );
            if is_wdf && !releases.contains(&id) {
                self.instr_error(id, "WDF is not paired with any data request");
            }
        }
    }

    fn validate_groups(&mut self) {
        let groups = self.shader.group_ids();
        if groups.is_empty() {
            self.error("grouped shader has no instruction groups".to_string());
            return;
        }

        let mut offset = 0;
        for gid in &groups {
            let group = self.shader.group(*gid);

            let mut phases = 0u8;
            for phase in Phase::ALL {
                if let Some(id) = group.instrs[phase as usize] {
                    phases |= 1 << phase as u8;
                    if self.shader.instr(id).group != Some((*gid, phase)) {
                        self.instr_error(id, "instruction group back-reference is wrong");
                    }
                    if self.shader.instr(id).is_pseudo() {
                        self.instr_error(id, "pseudo-op survived into a group");
                    }
                }
            }
            if phases != group.header.phases {
                self.error(format!("group {} phase mask is stale", group.index));
            }
            if phases == 0 {
                self.error(format!("group {} is empty", group.index));
            }
            if group.header.alu.is_none() {
                self.error(format!("group {} has no ALU type", group.index));
            }

            for r in group
                .io_sel
                .srcs
                .iter()
                .chain(group.io_sel.dsts.iter())
            {
                let class = match r {
                    Ref::Reg(reg) => Some(self.shader.reg(*reg).class),
                    Ref::Regarray(ra) => Some(self.shader.regarray_class(*ra)),
                    _ => None,
                };
                if class == Some(RegClass::Ssa) {
                    self.error(format!(
                        "group {} routes a virtual register",
                        group.index
                    ));
                }
            }

            let sum = group.size.header
                + group.size.instrs.iter().sum::<u32>()
                + group.size.lower_srcs
                + group.size.upper_srcs
                + group.size.iss
                + group.size.dsts
                + group.size.word_padding
                + group.size.align_padding;
            if sum != group.size.total {
                self.error(format!("group {} size fields do not sum", group.index));
            }
            if group.size.offset != offset {
                self.error(format!("group {} offset is not sequential", group.index));
            }
            offset = group.size.offset + group.size.total;
        }

        let last = self.shader.group(*groups.last().unwrap());
        let end = last.size.offset + last.size.total;
        if end % isa::ISA_ICACHE_ALIGN != 0 {
            self.error("final group does not end on the icache boundary".to_string());
        }
        if last.size.offset % isa::ISA_ICACHE_ALIGN != 0 {
            self.error("final group does not start on the icache boundary".to_string());
        }
    }

    fn run(mut self) -> Vec<String> {
        self.validate_blocks();
        for id in self.shader.instr_ids() {
            self.validate_instr(id);
        }
        self.validate_ssa();
        self.validate_links();
        self.validate_reg_cache();
        self.validate_regarrays();
        self.validate_drc();
        if self.shader.is_grouped {
            self.validate_groups();
        }
        self.errors
    }
}

/// Collects every invariant violation. Pure: identical shaders produce
/// identical error lists.
pub fn validate_collect(shader: &Shader) -> Vec<String> {
    Validator {
        shader,
        errors: Vec::new(),
    }
    .run()
}

/// Validates after a pass; fatal on failure unless downgraded.
pub fn validate_shader(shader: &Shader, when: &str, opts: &CompilerOptions) {
    if opts.debug.contains(DebugFlags::VLD_SKIP) {
        return;
    }
    let errors = validate_collect(shader);
    if errors.is_empty() {
        return;
    }
    if opts.debug.contains(DebugFlags::VLD_NONFATAL) {
        for e in &errors {
            eprintln!("validation ({}): {}", when, e);
        }
        return;
    }
    panic!(
        "Validation failed ({}):\n{}\n{}",
        when,
        errors.join("\n"),
        shader
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    fn valid_shader() -> Shader {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2));
        let po = s.pixout_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.fadd(Ref::Reg(c), Ref::Reg(a), Ref::Reg(b_reg));
        b.mov(Ref::Reg(po), Ref::Reg(c));
        b.end();
        s
    }

    #[test]
    fn valid_shader_has_no_errors() {
        let s = valid_shader();
        assert!(validate_collect(&s).is_empty());
    }

    #[test]
    fn validation_is_deterministic() {
        let mut s = valid_shader();
        // Manufacture a double write to an SSA register.
        let block = s.first_block();
        let c = s.ssa_reg(2);
        let a = s.ssa_reg(0);
        let cursor = Cursor::block_start(block);
        let mut b = Builder::new(&mut s, cursor);
        b.mbyp(Ref::Reg(c), Ref::Reg(a));

        let first = validate_collect(&s);
        let second = validate_collect(&s);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn detects_double_ssa_write() {
        let mut s = valid_shader();
        let block = s.first_block();
        let c = s.ssa_reg(2);
        let a = s.ssa_reg(0);
        let cursor = Cursor::block_start(block);
        let mut b = Builder::new(&mut s, cursor);
        b.mbyp(Ref::Reg(c), Ref::Reg(a));

        let errors = validate_collect(&s);
        assert!(errors.iter().any(|e| e.contains("writes")));
    }

    #[test]
    fn detects_missing_end() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let a = s.ssa_reg(0);
        let special = s.special_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mbyp(Ref::Reg(a), Ref::Reg(special));

        let errors = validate_collect(&s);
        assert!(errors.iter().any(|e| e.contains("end instruction")));
    }

    #[test]
    fn detects_stray_wdf() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.wdf(0);
        b.end();

        let errors = validate_collect(&s);
        assert!(errors.iter().any(|e| e.contains("not paired")));
    }

    #[test]
    fn detects_unsupported_operand_type() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let a = s.ssa_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        // fmul cannot take an immediate source.
        b.fmul(Ref::Reg(a), Ref::Imm(1), Ref::Reg(a));
        b.end();

        let errors = validate_collect(&s);
        assert!(errors.iter().any(|e| e.contains("reference type")));
    }

    #[test]
    fn nonfatal_mode_does_not_abort() {
        let mut s = Shader::new(ShaderStage::Fragment);
        s.block_create(None);
        let opts = CompilerOptions {
            debug: DebugFlags::VLD_NONFATAL,
            color: false,
        };
        // Empty final block is invalid, but only logged.
        validate_shader(&s, "test", &opts);
    }
}
