// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Register allocation.
//!
//! SSA registers and regarrays are allocation units with live ranges from
//! their (single) write to their last use. Units are split into three
//! coloring classes by contiguity stride (1/2/4), an interference graph is
//! built over overlapping ranges, and units are greedily colored onto the
//! shared temp bank at stride-aligned bases. Parent regarrays are colored and
//! rewritten before standalone registers, because an array rewrite can occupy
//! temp indices the standalone rewrites must observe. Spilling is not
//! implemented; running out of temp registers is fatal.

use crate::info::reg_class_info;
use crate::ir::*;

#[derive(Clone, Copy)]
enum UnitKind {
    Array(RegArrayId),
    Reg(RegId),
}

struct AllocUnit {
    kind: UnitKind,
    size: u32,
    stride: u32,
    start: u32,
    end: u32,
    base: u32,
}

fn range_of(shader: &Shader, writes: &[RefLoc], uses: &[RefLoc]) -> (u32, u32) {
    // No write means the value is externally supplied; ~0 keeps it out of
    // every overlap.
    let start = writes
        .iter()
        .map(|w| shader.instr(w.instr).index)
        .min()
        .unwrap_or(u32::MAX);
    let end = uses
        .iter()
        .map(|u| shader.instr(u.instr).index)
        .max()
        .unwrap_or(start);
    (start, end)
}

/// Combined live range of a parent array: its own accesses plus those of its
/// subarrays and member registers.
fn array_range(shader: &Shader, id: RegArrayId) -> (u32, u32) {
    let mut writes = shader.regarray(id).writes.clone();
    let mut uses = shader.regarray(id).uses.clone();
    for child in &shader.regarray(id).children {
        writes.extend_from_slice(&shader.regarray(*child).writes);
        uses.extend_from_slice(&shader.regarray(*child).uses);
    }
    for reg in &shader.regarray(id).regs {
        writes.extend_from_slice(&shader.reg(*reg).writes);
        uses.extend_from_slice(&shader.reg(*reg).uses);
    }
    range_of(shader, &writes, &uses)
}

fn stride_for_size(size: u32) -> u32 {
    match size {
        1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => panic!("Unsupported allocation unit size {}", size),
    }
}

fn ranges_overlap(s0: u32, e0: u32, s1: u32, e1: u32) -> bool {
    !(e0 <= s1 || e1 <= s0)
}

pub fn regalloc(shader: &mut Shader) -> bool {
    let num_temps = reg_class_info(RegClass::Temp).num;

    // Temp indices that were occupied before allocation are fixed-purpose
    // and never colorable.
    let pre_used: Vec<bool> = (0..num_temps)
        .map(|i| shader.reg_is_used(RegClass::Temp, i))
        .collect();

    // Parent regarrays first, then standalone registers.
    let mut units: Vec<AllocUnit> = Vec::new();
    for id in shader.regarray_ids() {
        if shader.regarray_class(id) != RegClass::Ssa || shader.regarray(id).parent.is_some() {
            continue;
        }
        let size = shader.regarray(id).size();
        let (start, end) = array_range(shader, id);
        units.push(AllocUnit {
            kind: UnitKind::Array(id),
            size,
            stride: stride_for_size(size),
            start,
            end,
            base: 0,
        });
    }
    for reg in shader.class_reg_ids(RegClass::Ssa) {
        if shader.reg(reg).regarray.is_some() {
            continue;
        }
        let (start, end) = {
            let r = shader.reg(reg);
            range_of(shader, &r.writes, &r.uses)
        };
        units.push(AllocUnit {
            kind: UnitKind::Reg(reg),
            size: 1,
            stride: 1,
            start,
            end,
            base: 0,
        });
    }

    if units.is_empty() {
        return false;
    }

    // Greedy coloring over the interference graph.
    for i in 0..units.len() {
        let mut assigned = None;
        let mut base = 0;
        while base + units[i].size <= num_temps {
            let clashes_fixed =
                (base..base + units[i].size).any(|idx| pre_used[idx as usize]);
            let clashes_live = units[..i].iter().any(|other| {
                ranges_overlap(units[i].start, units[i].end, other.start, other.end)
                    && ranges_overlap(base, base + units[i].size, other.base, other.base + other.size)
            });
            if !clashes_fixed && !clashes_live {
                assigned = Some(base);
                break;
            }
            base += units[i].stride;
        }
        match assigned {
            Some(base) => units[i].base = base,
            None => unreachable!("Register allocation requires spilling, which is not implemented"),
        }
    }

    // Rewrite the IR. Where the target temp registers are still untouched the
    // virtual registers are renamed in place; aliased targets go through the
    // cached temp objects instead.
    for unit in &units {
        match unit.kind {
            UnitKind::Array(id) => {
                let is_vec = shader.regarray(id).component.is_some();
                let all_free = (unit.base..unit.base + unit.size)
                    .all(|idx| !shader.reg_is_used(RegClass::Temp, idx));
                if !is_vec && all_free {
                    let old_start = shader.regarray_start(id);
                    let children: Vec<(RegArrayId, u32)> = shader
                        .regarray(id)
                        .children
                        .iter()
                        .map(|c| (*c, shader.regarray_start(*c)))
                        .collect();
                    let regs = shader.regarray(id).regs.clone();
                    for (k, reg) in regs.iter().enumerate() {
                        shader.reg_rewrite(*reg, RegClass::Temp, unit.base + k as u32);
                    }
                    shader.regarray_retarget_cache(id, RegClass::Ssa, old_start);
                    for (child, child_start) in children {
                        shader.regarray_retarget_cache(child, RegClass::Ssa, child_start);
                    }
                } else {
                    let new = shader.temp_regarray(unit.size, unit.base);
                    shader.regarray_replace(id, new);
                }
            }
            UnitKind::Reg(reg) => {
                if !shader.reg_is_used(RegClass::Temp, unit.base) {
                    shader.reg_rewrite(reg, RegClass::Temp, unit.base);
                } else {
                    let new = shader.temp_reg(unit.base);
                    shader.reg_replace(reg, new);
                }
            }
        }
    }

    shader.rebuild_regarray_cache();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::trim::trim;

    fn alloc(shader: &mut Shader) {
        trim(shader);
        assert!(regalloc(shader));
    }

    #[test]
    fn interfering_units_do_not_share_registers() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c, d) = (s.ssa_reg(0), s.ssa_reg(1), s.ssa_reg(2), s.ssa_reg(3));
        let special = s.special_reg(0);
        let po = s.pixout_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mbyp(Ref::Reg(a), Ref::Reg(special));
        b.mbyp(Ref::Reg(b_reg), Ref::Reg(special));
        b.fmul(Ref::Reg(c), Ref::Reg(a), Ref::Reg(b_reg));
        b.fmul(Ref::Reg(d), Ref::Reg(c), Ref::Reg(b_reg));
        b.mbyp(Ref::Reg(po), Ref::Reg(d));

        alloc(&mut s);

        let (ia, ib) = (s.reg(a).index, s.reg(b_reg).index);
        assert_eq!(s.reg(a).class, RegClass::Temp);
        assert_eq!(s.reg(b_reg).class, RegClass::Temp);
        assert_ne!(ia, ib, "simultaneously live values share a temp");
        // c and d die early and reuse a's slot through the register cache.
        let _ = (c, d);
    }

    #[test]
    fn dead_value_slot_is_reused() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, c) = (s.ssa_reg(0), s.ssa_reg(1));
        let special = s.special_reg(0);
        let po = s.pixout_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.mbyp(Ref::Reg(a), Ref::Reg(special));
        b.mbyp(Ref::Reg(c), Ref::Reg(a));
        b.mbyp(Ref::Reg(po), Ref::Reg(c));

        alloc(&mut s);

        // a dies where c is defined, so c aliases onto the same temp and the
        // cached register object carries both writes.
        assert_eq!(s.reg(a).class, RegClass::Temp);
        assert_eq!(s.reg(a).index, 0);
        assert_eq!(s.reg(a).writes.len(), 2);
        assert!(!s.reg_exists(c));
    }

    #[test]
    fn arrays_are_contiguous_and_aligned() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let pair = s.ssa_regarray(2, 0);
        let quad = s.ssa_vec_regarray(4, 2, 0);
        let lone = s.ssa_reg(3);
        let packed = s.ssa_reg(4);
        let special = s.special_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.add64(
            Ref::Regarray(pair),
            Ref::Regarray(pair),
            Ref::Regarray(pair),
            Ref::Io(Io::None),
        );
        b.pck_u8888(Ref::Reg(packed), Ref::Regarray(quad));
        b.mbyp(Ref::Reg(lone), Ref::Reg(special));

        alloc(&mut s);

        for id in s.regarray_ids() {
            assert_eq!(s.regarray_class(id), RegClass::Temp);
            let start = s.regarray_start(id);
            let size = s.regarray(id).size();
            if s.regarray(id).parent.is_none() {
                assert_eq!(start % stride_for_size(size), 0, "array base not aligned");
            }
            let indices: Vec<u32> = s
                .regarray(id)
                .regs
                .iter()
                .map(|r| s.reg(*r).index)
                .collect();
            for (k, idx) in indices.iter().enumerate() {
                assert_eq!(*idx, start + k as u32, "array registers not contiguous");
            }
        }
    }

    #[test]
    #[should_panic]
    fn running_out_of_temps_is_fatal() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let special = s.special_reg(0);
        let num = reg_class_info(RegClass::Temp).num;
        // More simultaneously-live values than there are temps.
        let regs: Vec<RegId> = (0..=num).map(|i| s.ssa_reg(i)).collect();
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        for r in &regs {
            b.mbyp(Ref::Reg(*r), Ref::Reg(special));
        }
        let sink = s.pixout_reg(0);
        let last = s.last_block();
        let cursor = Cursor::block_end(&s, last);
        let mut b = Builder::new(&mut s, cursor);
        for r in &regs {
            b.mbyp(Ref::Reg(sink), Ref::Reg(*r));
        }

        trim(&mut s);
        regalloc(&mut s);
    }
}
