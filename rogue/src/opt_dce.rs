// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Dead-code elimination: drops no-op copies, then registers and register
//! arrays of the virtual and temp classes that no instruction references.

use crate::ir::*;

fn instr_is_self_copy(shader: &Shader, id: InstrId) -> bool {
    let instr = shader.instr(id);
    match &instr.op {
        InstrOp::Alu(alu) if matches!(alu.op, AluOp::Mov | AluOp::Mbyp) => {
            dst_src_equal(&alu.dsts[0], &alu.srcs[0])
        }
        _ => false,
    }
}

pub fn dce(shader: &mut Shader) -> bool {
    let mut progress = false;

    for id in shader.instr_ids() {
        if shader.instr_exists(id) && instr_is_self_copy(shader, id) {
            shader.instr_delete(id);
            progress = true;
        }
    }

    // Unused regarrays go first: deleting a parent array releases its member
    // registers. Children must go before their parents.
    loop {
        let mut array_progress = false;
        for id in shader.regarray_ids() {
            if !shader.regarray_exists(id) {
                continue;
            }
            let class = shader.regarray_class(id);
            if !matches!(class, RegClass::Ssa | RegClass::Temp) {
                continue;
            }
            if shader.regarray(id).is_unused() && shader.regarray(id).children.is_empty() {
                shader.regarray_delete(id);
                array_progress = true;
            }
        }
        if !array_progress {
            break;
        }
        progress = true;
    }

    for class in [RegClass::Ssa, RegClass::Temp] {
        for reg in shader.class_reg_ids(class) {
            if !shader.reg_exists(reg) {
                continue;
            }
            if shader.reg(reg).is_unused() && shader.reg(reg).regarray.is_none() {
                shader.reg_delete(reg);
                progress = true;
            }
        }
    }

    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn removes_self_copies_and_dead_regs() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let block = s.block_create(None);
        let (a, dead) = (s.ssa_reg(0), s.ssa_reg(1));
        let mut b = Builder::new(&mut s, Cursor::block_start(block));
        let self_copy = b.mov(Ref::Reg(a), Ref::Reg(a));
        let _ = dead;

        assert!(dce(&mut s));
        assert!(!s.instr_exists(self_copy));

        // Confluence: no unused SSA/Temp register survives.
        for class in [RegClass::Ssa, RegClass::Temp] {
            for reg in s.class_reg_ids(class) {
                assert!(!s.reg(reg).is_unused() || s.reg(reg).regarray.is_some());
            }
        }
        assert!(s.class_reg_ids(RegClass::Ssa).is_empty());

        assert!(!dce(&mut s));
    }

    #[test]
    fn removes_dead_vector_arrays() {
        let mut s = Shader::new(ShaderStage::Fragment);
        let _block = s.block_create(None);
        let _ra = s.ssa_vec_regarray(4, 0, 0);

        assert!(dce(&mut s));
        assert!(s.regarray_ids().is_empty());
        assert!(s.class_reg_ids(RegClass::Ssa).is_empty());
    }
}
