// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Dense renumbering of blocks, instructions and virtual/temp registers, so
//! later passes (live ranges in particular) can use indices directly.

use crate::ir::*;

#[derive(Clone, Copy)]
enum TrimUnit {
    Reg(RegId),
    Array(RegArrayId),
}

/// Renumbers the registers of one class densely, keeping relative order.
/// Registers belonging to an array move with their (whole) array; vector
/// arrays share a single index.
fn trim_regs(shader: &mut Shader, class: RegClass) -> bool {
    let mut units: Vec<(u32, TrimUnit, u32)> = Vec::new(); // (key, unit, width)

    for id in shader.regarray_ids() {
        if shader.regarray_class(id) != class || shader.regarray(id).parent.is_some() {
            continue;
        }
        let width = match shader.regarray(id).component {
            Some(_) => 1,
            None => shader.regarray(id).size(),
        };
        units.push((shader.regarray_start(id), TrimUnit::Array(id), width));
    }
    for reg in shader.class_reg_ids(class) {
        if shader.reg(reg).regarray.is_some() {
            continue;
        }
        units.push((shader.reg(reg).index, TrimUnit::Reg(reg), 1));
    }

    // Ascending by current index: every unit moves down (or stays), so the
    // target placement is always free by the time it is assigned.
    units.sort_by_key(|(key, _, _)| *key);

    let mut progress = false;
    let mut next = 0;
    for (_, unit, width) in units {
        match unit {
            TrimUnit::Reg(reg) => {
                progress |= shader.reg_set(reg, class, next);
            }
            TrimUnit::Array(id) => {
                let regs = shader.regarray(id).regs.clone();
                let is_vec = shader.regarray(id).component.is_some();
                for (k, reg) in regs.iter().enumerate() {
                    let index = if is_vec { next } else { next + k as u32 };
                    progress |= shader.reg_set(*reg, class, index);
                }
            }
        }
        next += width;
    }

    progress
}

pub fn trim(shader: &mut Shader) -> bool {
    let mut progress = false;

    for (i, bid) in shader.block_ids().into_iter().enumerate() {
        let block = shader.block_mut(bid);
        if block.index != i as u32 {
            block.index = i as u32;
            progress = true;
        }
    }

    for (i, id) in shader.instr_ids().into_iter().enumerate() {
        let instr = shader.instr_mut(id);
        if instr.index != i as u32 {
            instr.index = i as u32;
            progress = true;
        }
    }

    let mut regs_progress = false;
    regs_progress |= trim_regs(shader, RegClass::Ssa);
    regs_progress |= trim_regs(shader, RegClass::Temp);
    if regs_progress {
        shader.rebuild_regarray_cache();
    }

    progress | regs_progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn renumbers_sparse_registers_densely() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, b_reg, c) = (s.ssa_reg(10), s.ssa_reg(20), s.ssa_reg(30));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.fadd(Ref::Reg(c), Ref::Reg(a), Ref::Reg(b_reg));

        assert!(trim(&mut s));
        assert_eq!(s.reg(a).index, 0);
        assert_eq!(s.reg(b_reg).index, 1);
        assert_eq!(s.reg(c).index, 2);
        // The interning cache followed the renumbering.
        assert_eq!(s.reg_lookup(RegClass::Ssa, 0, None), Some(a));
        assert_eq!(s.reg_lookup(RegClass::Ssa, 10, None), None);

        assert!(!trim(&mut s));
    }

    #[test]
    fn arrays_move_as_units() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let pair = s.ssa_regarray(2, 8);
        let lone = s.ssa_reg(4);
        let dst = s.ssa_reg(12);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        b.add64(
            Ref::Regarray(pair),
            Ref::Regarray(pair),
            Ref::Regarray(pair),
            Ref::Io(Io::None),
        );
        b.mbyp(Ref::Reg(dst), Ref::Reg(lone));

        assert!(trim(&mut s));
        // lone(4) < pair(8,9) < dst(12) keeps relative order.
        assert_eq!(s.reg(lone).index, 0);
        assert_eq!(s.regarray_start(pair), 1);
        assert_eq!(s.reg(dst).index, 3);
        assert_eq!(
            s.regarray(pair).regs.iter().map(|r| s.reg(*r).index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn renumbers_instruction_and_block_indices() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let r = s.ssa_reg(0);
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let i0 = b.mbyp(Ref::Reg(r), Ref::Reg(r));
        let i1 = b.nop();
        s.instr_delete(i0);

        assert!(trim(&mut s));
        assert_eq!(s.instr(i1).index, 0);
    }
}
