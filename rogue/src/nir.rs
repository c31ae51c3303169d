// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! The NIR module shape this backend consumes.
//!
//! The real front end (SPIR-V translation and generic NIR optimization) is an
//! external collaborator; what arrives here is a single-function shader in
//! SSA form, blocks in order, instructions in order, with the lowering this
//! backend relies on already applied. `spirv.rs` produces this form for the
//! offline tool and the tests build it directly.

use crate::ir::ShaderStage;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DefId(pub u32);

/// An SSA value definition. 32- and 64-bit scalars and vectors thereof.
#[derive(Clone, Copy, Debug)]
pub struct Def {
    pub bit_size: u8,
    pub num_components: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AluOp {
    Mov,
    FAbs,
    FNeg,
    FNabs,
    FMul,
    FFma,
    IAdd,
    PackUnorm4x8,
    Vec2,
    Vec3,
    Vec4,
}

impl AluOp {
    pub fn num_srcs(&self) -> usize {
        match self {
            AluOp::Mov | AluOp::FAbs | AluOp::FNeg | AluOp::FNabs | AluOp::PackUnorm4x8 => 1,
            AluOp::FMul | AluOp::IAdd | AluOp::Vec2 => 2,
            AluOp::FFma | AluOp::Vec3 => 3,
            AluOp::Vec4 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Intrinsic {
    LoadInput,
    StoreOutput,
    LoadGlobalConstant,
    LoadVulkanDescriptor,
}

/// Named constant parameters attached to intrinsic instructions.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntrinsicParams {
    pub location: u32,
    pub component: u32,
    pub desc_set: u32,
    pub binding: u32,
    pub base: u32,
}

#[derive(Clone, Debug)]
pub enum Instr {
    LoadConst {
        def: DefId,
        /// One 32-bit word per component; 64-bit values take two words,
        /// low word first.
        values: Vec<u32>,
    },
    Alu {
        op: AluOp,
        def: DefId,
        srcs: Vec<DefId>,
    },
    Intrinsic {
        op: Intrinsic,
        def: Option<DefId>,
        srcs: Vec<DefId>,
        params: IntrinsicParams,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub instrs: Vec<Instr>,
}

#[derive(Clone, Debug)]
pub struct Shader {
    pub stage: ShaderStage,
    pub name: String,
    pub defs: Vec<Def>,
    pub blocks: Vec<Block>,
}

impl Shader {
    pub fn new(stage: ShaderStage, name: &str) -> Shader {
        Shader {
            stage,
            name: name.to_string(),
            defs: Vec::new(),
            blocks: vec![Block::default()],
        }
    }

    pub fn def(&self, id: DefId) -> &Def {
        &self.defs[id.0 as usize]
    }

    pub fn add_def(&mut self, bit_size: u8, num_components: u8) -> DefId {
        assert!(matches!(bit_size, 32 | 64));
        assert!((1..=4).contains(&num_components));
        let id = DefId(self.defs.len() as u32);
        self.defs.push(Def {
            bit_size,
            num_components,
        });
        id
    }

    fn push(&mut self, instr: Instr) {
        self.blocks.last_mut().unwrap().instrs.push(instr);
    }

    pub fn load_const(&mut self, bit_size: u8, values: &[u32]) -> DefId {
        let comps = match bit_size {
            32 => values.len(),
            64 => {
                assert!(values.len() % 2 == 0);
                values.len() / 2
            }
            _ => panic!("Unsupported bit size"),
        };
        let def = self.add_def(bit_size, comps as u8);
        self.push(Instr::LoadConst {
            def,
            values: values.to_vec(),
        });
        def
    }

    pub fn alu(&mut self, op: AluOp, bit_size: u8, num_components: u8, srcs: &[DefId]) -> DefId {
        assert_eq!(srcs.len(), op.num_srcs());
        let def = self.add_def(bit_size, num_components);
        self.push(Instr::Alu {
            op,
            def,
            srcs: srcs.to_vec(),
        });
        def
    }

    pub fn load_input(&mut self, location: u32, component: u32) -> DefId {
        let def = self.add_def(32, 1);
        self.push(Instr::Intrinsic {
            op: Intrinsic::LoadInput,
            def: Some(def),
            srcs: Vec::new(),
            params: IntrinsicParams {
                location,
                component,
                ..Default::default()
            },
        });
        def
    }

    pub fn store_output(&mut self, location: u32, component: u32, value: DefId) {
        self.push(Instr::Intrinsic {
            op: Intrinsic::StoreOutput,
            def: None,
            srcs: vec![value],
            params: IntrinsicParams {
                location,
                component,
                ..Default::default()
            },
        });
    }

    pub fn load_global_constant(&mut self, addr: DefId, num_components: u8) -> DefId {
        let def = self.add_def(32, num_components);
        self.push(Instr::Intrinsic {
            op: Intrinsic::LoadGlobalConstant,
            def: Some(def),
            srcs: vec![addr],
            params: IntrinsicParams::default(),
        });
        def
    }

    /// Loads the 64-bit address of a descriptor through the descriptor-set
    /// table.
    pub fn load_vulkan_descriptor(&mut self, desc_set: u32, binding: u32) -> DefId {
        let def = self.add_def(64, 1);
        self.push(Instr::Intrinsic {
            op: Intrinsic::LoadVulkanDescriptor,
            def: Some(def),
            srcs: Vec::new(),
            params: IntrinsicParams {
                desc_set,
                binding,
                ..Default::default()
            },
        });
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_simple_shader() {
        let mut nir = Shader::new(ShaderStage::Fragment, "test");
        let c = nir.load_const(32, &[0x3f800000]);
        let i = nir.load_input(0, 0);
        let m = nir.alu(AluOp::FMul, 32, 1, &[c, i]);
        nir.store_output(0, 0, m);

        assert_eq!(nir.blocks.len(), 1);
        assert_eq!(nir.blocks[0].instrs.len(), 4);
        assert_eq!(nir.def(m).bit_size, 32);
        assert_eq!(nir.def(c).num_components, 1);
    }
}
