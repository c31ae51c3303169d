// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! NIR→IR translation.
//!
//! Walks the NIR function body in block order, instruction order, lazily
//! declaring one SSA register per 32-bit scalar def and a regarray for
//! vectors and 64-bit values (two 32-bit halves, low first). The set of
//! translated opcodes and intrinsics is closed; anything else panics rather
//! than producing silently wrong output.

use crate::builder::Builder;
use crate::compile::{BuildCtx, BuildData, PipelineLayout};
use crate::ir::*;
use crate::nir;
use rustc_hash::FxHashMap;

struct ShaderFromNir<'a> {
    nir: &'a nir::Shader,
    layout: &'a PipelineLayout,
    stage_data: &'a BuildData,
    next_ssa_idx: &'a mut u32,
    ssa_map: FxHashMap<nir::DefId, Ref>,
}

impl<'a> ShaderFromNir<'a> {
    fn alloc_idx(&mut self, count: u32) -> u32 {
        let idx = *self.next_ssa_idx;
        *self.next_ssa_idx += count;
        idx
    }

    /// Declares the IR value for a NIR def: a scalar SSA register, a vector
    /// regarray, or a 2-register low/high pair for 64-bit scalars.
    fn def_ref(&mut self, s: &mut Shader, def: nir::DefId) -> Ref {
        let d = *self.nir.def(def);
        let r = match (d.bit_size, d.num_components) {
            (32, 1) => Ref::Reg(s.ssa_reg(self.alloc_idx(1))),
            (32, n) => {
                let idx = self.alloc_idx(1);
                Ref::Regarray(s.ssa_vec_regarray(u32::from(n), idx, 0))
            }
            (64, 1) => {
                let idx = self.alloc_idx(2);
                Ref::Regarray(s.ssa_regarray(2, idx))
            }
            _ => panic!(
                "Unsupported NIR def: {}x{} bits",
                d.num_components, d.bit_size
            ),
        };
        let prev = self.ssa_map.insert(def, r);
        assert!(prev.is_none(), "NIR def translated twice");
        r
    }

    fn src_ref(&self, def: nir::DefId) -> Ref {
        *self
            .ssa_map
            .get(&def)
            .expect("NIR source used before definition")
    }

    fn load_const(&mut self, b: &mut Builder, def: nir::DefId, values: &[u32]) {
        let dst = self.def_ref(b.shader, def);
        match dst {
            Ref::Reg(_) => {
                assert_eq!(values.len(), 1);
                let mov = b.mov(dst, Ref::Imm(values[0]));
                b.shader.instr_mut(mov).add_comment("load_const");
            }
            Ref::Regarray(ra) => {
                let d = self.nir.def(def);
                if d.bit_size == 64 {
                    let idx = b.shader.regarray_start(ra);
                    for (i, v) in values.iter().enumerate() {
                        let elem = b.shader.regarray_cached(1, RegClass::Ssa, idx + i as u32);
                        let mov = b.mov(Ref::Regarray(elem), Ref::Imm(*v));
                        b.shader.instr_mut(mov).add_comment("load_const");
                    }
                } else {
                    let idx = b.shader.regarray_start(ra);
                    for (i, v) in values.iter().enumerate() {
                        let elem = b.shader.ssa_vec_regarray(1, idx, i as u8);
                        let mov = b.mov(Ref::Regarray(elem), Ref::Imm(*v));
                        b.shader.instr_mut(mov).add_comment("load_const");
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    fn alu(&mut self, b: &mut Builder, op: nir::AluOp, def: nir::DefId, srcs: &[nir::DefId]) {
        match op {
            nir::AluOp::Mov => {
                let src = self.src_ref(srcs[0]);
                let dst = self.def_ref(b.shader, def);
                b.mov(dst, src);
            }
            nir::AluOp::FAbs => {
                let src = self.src_ref(srcs[0]);
                let dst = self.def_ref(b.shader, def);
                b.fabs(dst, src);
            }
            nir::AluOp::FNeg => {
                let src = self.src_ref(srcs[0]);
                let dst = self.def_ref(b.shader, def);
                b.fneg(dst, src);
            }
            nir::AluOp::FNabs => {
                let src = self.src_ref(srcs[0]);
                let dst = self.def_ref(b.shader, def);
                b.fnabs(dst, src);
            }
            nir::AluOp::FMul => {
                let (s0, s1) = (self.src_ref(srcs[0]), self.src_ref(srcs[1]));
                let dst = self.def_ref(b.shader, def);
                b.fmul(dst, s0, s1);
            }
            nir::AluOp::FFma => {
                let (s0, s1, s2) = (
                    self.src_ref(srcs[0]),
                    self.src_ref(srcs[1]),
                    self.src_ref(srcs[2]),
                );
                let dst = self.def_ref(b.shader, def);
                b.fmad(dst, s0, s1, s2);
            }
            nir::AluOp::IAdd => {
                assert!(
                    self.nir.def(def).bit_size == 64,
                    "iadd is only supported for 64-bit values"
                );
                let (s0, s1) = (self.src_ref(srcs[0]), self.src_ref(srcs[1]));
                let dst = self.def_ref(b.shader, def);
                b.add64(dst, s0, s1, Ref::Io(Io::None));
            }
            nir::AluOp::PackUnorm4x8 => {
                let src = self.src_ref(srcs[0]);
                assert!(src.is_regarray(), "pack_unorm_4x8 source must be a vec4");
                let dst = self.def_ref(b.shader, def);
                let pck = b.pck_u8888(dst, src);
                let alu = b.shader.instr_mut(pck).as_alu_mut().unwrap();
                alu.mods = AluOpMods::SCALE | AluOpMods::ROUNDZERO;
                b.shader.instr_mut(pck).repeat = 4;
            }
            nir::AluOp::Vec2 | nir::AluOp::Vec3 | nir::AluOp::Vec4 => {
                let num = op.num_srcs();
                let src_refs: Vec<Ref> = srcs.iter().map(|s| self.src_ref(*s)).collect();
                let dst = self.def_ref(b.shader, def);
                let ra = dst.as_regarray().expect("vecN destination must be a vector");
                let idx = b.shader.regarray_start(ra);
                for (c, src) in src_refs.iter().enumerate().take(num) {
                    let elem = b.shader.ssa_vec_regarray(1, idx, c as u8);
                    let mov = b.mov(Ref::Regarray(elem), *src);
                    b.shader.instr_mut(mov).add_comment("vecN");
                }
            }
        }
    }

    fn load_input_fs(&mut self, b: &mut Builder, def: nir::DefId, params: &nir::IntrinsicParams) {
        let args = &self.stage_data.fs.iterator_args;
        let coeff_index = args.coeff_index(params.location, params.component) * ROGUE_COEFF_ALIGN;
        let wcoeff_index = args.w_iterator() * ROGUE_COEFF_ALIGN;

        let coeffs = b.shader.coeff_regarray(ROGUE_COEFF_ALIGN, coeff_index);
        let wcoeffs = b.shader.coeff_regarray(ROGUE_COEFF_ALIGN, wcoeff_index);
        let dst = self.def_ref(b.shader, def);
        let fitrp = b.fitrp_pixel(
            dst,
            Ref::Drc(0),
            Ref::Regarray(coeffs),
            Ref::Regarray(wcoeffs),
            1,
        );
        b.shader.instr_mut(fitrp).add_comment("load_input_fs");
    }

    fn load_input_vs(&mut self, b: &mut Builder, def: nir::DefId, params: &nir::IntrinsicParams) {
        let index = self
            .stage_data
            .vs
            .inputs
            .input_index(params.location, params.component);
        let vtxin = b.shader.vtxin_reg(index);
        let dst = self.def_ref(b.shader, def);
        let mov = b.mov(dst, Ref::Reg(vtxin));
        b.shader.instr_mut(mov).add_comment("load_input_vs");
    }

    fn store_output_fs(&mut self, b: &mut Builder, value: Ref, params: &nir::IntrinsicParams) {
        let index = params.location * 4 + params.component;
        let pixout = b.shader.pixout_reg(index);
        let mov = b.mov(Ref::Reg(pixout), value);
        b.shader.instr_mut(mov).add_comment("store_output_fs");
    }

    fn store_output_vs(&mut self, b: &mut Builder, value: Ref, params: &nir::IntrinsicParams) {
        let index = self
            .stage_data
            .vs
            .outputs
            .output_index(params.location, params.component);
        let vtxout = b.shader.vtxout_reg(index);
        let mov = b.mov(Ref::Reg(vtxout), value);
        b.shader.instr_mut(mov).add_comment("store_output_vs");
    }

    fn load_global_constant(&mut self, b: &mut Builder, def: nir::DefId, addr: nir::DefId) {
        let addr_ref = self.src_ref(addr);
        assert!(addr_ref.is_regarray(), "64-bit address must be a regarray");
        let d = *self.nir.def(def);
        let dst = self.def_ref(b.shader, def);
        let ld = b.ld(dst, Ref::Drc(0), u32::from(d.num_components), addr_ref);
        b.shader.instr_mut(ld).add_comment("load_global_constant");
    }

    /// Materializes a 64-bit immediate as a fresh SSA register pair.
    fn imm64(&mut self, b: &mut Builder, value: u64) -> Ref {
        let idx = self.alloc_idx(2);
        let pair = b.shader.ssa_regarray(2, idx);
        let lo = b.shader.regarray_cached(1, RegClass::Ssa, idx);
        let hi = b.shader.regarray_cached(1, RegClass::Ssa, idx + 1);
        b.mov(Ref::Regarray(lo), Ref::Imm(value as u32));
        b.mov(Ref::Regarray(hi), Ref::Imm((value >> 32) as u32));
        Ref::Regarray(pair)
    }

    /// Expands a descriptor load into the table-walk sequence: offset the
    /// descriptor-set table base by the set, load the set's table entry, then
    /// offset by the binding and load the descriptor address.
    fn load_vulkan_descriptor(
        &mut self,
        b: &mut Builder,
        def: nir::DefId,
        params: &nir::IntrinsicParams,
    ) {
        let table_base = b
            .shader
            .shared_regarray(2, self.layout.desc_set_table_sh_reg);

        // desc_set_offset = desc_set * sizeof(address)
        let desc_set_offset = u64::from(params.desc_set) * 8;
        let offset = self.imm64(b, desc_set_offset);
        let entry_addr_idx = self.alloc_idx(2);
        let entry_addr = b.shader.ssa_regarray(2, entry_addr_idx);
        let add = b.add64(
            Ref::Regarray(entry_addr),
            Ref::Regarray(table_base),
            offset,
            Ref::Io(Io::None),
        );
        b.shader.instr_mut(add).add_comment("desc_set_table_entry_addr");

        let entry_idx = self.alloc_idx(2);
        let entry = b.shader.ssa_regarray(2, entry_idx);
        let ld = b.ld(Ref::Regarray(entry), Ref::Drc(0), 2, Ref::Regarray(entry_addr));
        b.shader.instr_mut(ld).add_comment("desc_set_table_entry");

        // desc_offset = binding primary offset * sizeof(uint32)
        let primary = self
            .layout
            .binding_primary_offset(params.desc_set, params.binding);
        let desc_offset = u64::from(primary) * u64::from(ROGUE_REG_SIZE_BYTES);
        let offset = self.imm64(b, desc_offset);
        let desc_addr_idx = self.alloc_idx(2);
        let desc_addr = b.shader.ssa_regarray(2, desc_addr_idx);
        let add = b.add64(
            Ref::Regarray(desc_addr),
            Ref::Regarray(entry),
            offset,
            Ref::Io(Io::None),
        );
        b.shader.instr_mut(add).add_comment("desc_addr");

        let dst = self.def_ref(b.shader, def);
        let ld = b.ld(dst, Ref::Drc(0), 2, Ref::Regarray(desc_addr));
        b.shader.instr_mut(ld).add_comment("load_vulkan_descriptor");
    }

    fn intrinsic(
        &mut self,
        b: &mut Builder,
        op: nir::Intrinsic,
        def: Option<nir::DefId>,
        srcs: &[nir::DefId],
        params: &nir::IntrinsicParams,
    ) {
        match op {
            nir::Intrinsic::LoadInput => {
                let def = def.expect("load_input has a destination");
                match self.nir.stage {
                    ShaderStage::Fragment => self.load_input_fs(b, def, params),
                    ShaderStage::Vertex => self.load_input_vs(b, def, params),
                }
            }
            nir::Intrinsic::StoreOutput => {
                let value = self.src_ref(srcs[0]);
                match self.nir.stage {
                    ShaderStage::Fragment => self.store_output_fs(b, value, params),
                    ShaderStage::Vertex => self.store_output_vs(b, value, params),
                }
            }
            nir::Intrinsic::LoadGlobalConstant => {
                let def = def.expect("load_global_constant has a destination");
                self.load_global_constant(b, def, srcs[0]);
            }
            nir::Intrinsic::LoadVulkanDescriptor => {
                let def = def.expect("load_vulkan_descriptor has a destination");
                self.load_vulkan_descriptor(b, def, params);
            }
        }
    }

    fn run(mut self, shader: &mut Shader) {
        for nir_block in &self.nir.blocks {
            let block = shader.block_create(None);
            let cursor = Cursor::block_start(block);
            let mut b = Builder::new(shader, cursor);
            for instr in &nir_block.instrs {
                match instr {
                    nir::Instr::LoadConst { def, values } => {
                        self.load_const(&mut b, *def, values)
                    }
                    nir::Instr::Alu { op, def, srcs } => self.alu(&mut b, *op, *def, srcs),
                    nir::Instr::Intrinsic {
                        op,
                        def,
                        srcs,
                        params,
                    } => self.intrinsic(&mut b, *op, *def, srcs, params),
                }
            }
        }

        // Terminate the program.
        let last = shader.last_block();
        let cursor = Cursor::block_end(shader, last);
        let mut b = Builder::new(shader, cursor);
        b.end();
    }
}

/// Translates one NIR shader into the instruction-level IR.
pub fn nir_to_rogue(ctx: &mut BuildCtx, nir: &nir::Shader) -> Shader {
    let mut shader = Shader::new(nir.stage);
    shader.name = nir.name.clone();

    let state = ShaderFromNir {
        nir,
        layout: &ctx.pipeline_layout,
        stage_data: &ctx.stage_data,
        next_ssa_idx: &mut ctx.next_ssa_idx,
        ssa_map: FxHashMap::default(),
    };
    state.run(&mut shader);

    shader
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{Compiler, CompilerOptions, DeviceInfo};

    fn ctx_for<'a>(compiler: &'a Compiler) -> BuildCtx<'a> {
        BuildCtx::new(compiler, PipelineLayout::default())
    }

    #[test]
    fn translate_fmul_chain() {
        let mut nir = nir::Shader::new(ShaderStage::Fragment, "t");
        let c = nir.load_const(32, &[0x3f800000]);
        let i = nir.load_input(0, 0);
        let m = nir.alu(nir::AluOp::FMul, 32, 1, &[c, i]);
        nir.store_output(0, 0, m);

        let compiler = Compiler::new(DeviceInfo::default(), CompilerOptions::default());
        let mut ctx = ctx_for(&compiler);
        crate::compile::collect_io_data(&mut ctx, &nir);
        let s = nir_to_rogue(&mut ctx, &nir);

        // mov(imm), fitrp, fmul, mov(pixout), end
        assert_eq!(s.num_instrs(), 5);
        let ids = s.instr_ids();
        assert!(matches!(
            &s.instr(ids[1]).op,
            InstrOp::Backend(be) if be.op == BackendOp::FitrpPixel
        ));
        assert!(s.instr(ids[4]).as_ctrl().unwrap().op == CtrlOp::End);
        // The immediate is on the pending list until constreg runs.
        assert_eq!(s.imm_uses().len(), 1);
    }

    #[test]
    #[should_panic]
    fn iadd32_is_unsupported() {
        let mut nir = nir::Shader::new(ShaderStage::Fragment, "t");
        let a = nir.load_const(32, &[1]);
        let b = nir.load_const(32, &[2]);
        nir.alu(nir::AluOp::IAdd, 32, 1, &[a, b]);

        let compiler = Compiler::new(DeviceInfo::default(), CompilerOptions::default());
        let mut ctx = ctx_for(&compiler);
        let _ = nir_to_rogue(&mut ctx, &nir);
    }

    #[test]
    fn translate_descriptor_load() {
        use crate::compile::{DescBinding, DescSetLayout};

        let mut nir = nir::Shader::new(ShaderStage::Fragment, "t");
        let d = nir.load_vulkan_descriptor(0, 1);
        let v = nir.load_global_constant(d, 1);
        nir.store_output(0, 0, v);

        let compiler = Compiler::new(DeviceInfo::default(), CompilerOptions::default());
        let mut ctx = ctx_for(&compiler);
        ctx.pipeline_layout = PipelineLayout {
            desc_set_table_sh_reg: 0,
            sets: vec![DescSetLayout {
                bindings: vec![
                    DescBinding {
                        binding: 0,
                        primary_offset: 0,
                    },
                    DescBinding {
                        binding: 1,
                        primary_offset: 4,
                    },
                ],
            }],
        };
        crate::compile::collect_io_data(&mut ctx, &nir);
        let s = nir_to_rogue(&mut ctx, &nir);

        let lds: Vec<InstrId> = s
            .instr_ids()
            .into_iter()
            .filter(|i| {
                matches!(&s.instr(*i).op, InstrOp::Backend(be) if be.op == BackendOp::Ld)
            })
            .collect();
        // Table entry, descriptor address, and the actual constant load.
        assert_eq!(lds.len(), 3);
        assert_eq!(s.drc_trxns[0].len(), 3);
    }
}
