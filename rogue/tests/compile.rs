// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! End-to-end compilation scenarios.

use rogue::compile::*;
use rogue::encode::encode_shader;
use rogue::from_nir::nir_to_rogue;
use rogue::ir::*;
use rogue::nir;
use rogue::spirv;
use rogue::validate::validate_collect;

fn compiler() -> Compiler {
    Compiler::new(DeviceInfo::default(), CompilerOptions::default())
}

/// Runs the pass pipeline by hand so the final IR can be inspected before
/// encoding.
fn compile_inspect(nir: &nir::Shader, layout: PipelineLayout) -> (Shader, Vec<u8>) {
    let compiler = compiler();
    let mut ctx = BuildCtx::new(&compiler, layout);
    collect_io_data(&mut ctx, nir);
    let mut shader = nir_to_rogue(&mut ctx, nir);
    shader_passes(&mut shader, &compiler.options);
    let binary = encode_shader(&shader);
    (shader, binary)
}

#[test]
fn round_trip_const_store() {
    // load_const(1.0) -> store_output resolves to constant register 64 with
    // no immediate left to materialize.
    let mut nir = nir::Shader::new(ShaderStage::Fragment, "round_trip");
    let one = nir.load_const(32, &[0x3f800000]);
    nir.store_output(0, 0, one);

    let (shader, binary) = compile_inspect(&nir, PipelineLayout::default());

    assert!(validate_collect(&shader).is_empty());
    for id in shader.instr_ids() {
        let instr = shader.instr(id);
        for src in instr.srcs() {
            assert!(!src.src_ref.is_imm(), "immediate survived constreg");
        }
        if let Some(alu) = instr.as_alu() {
            assert_ne!(alu.op, AluOp::Mov, "MOV pseudo-op survived lowering");
        }
    }
    // The copy reads the 1.0f constant register directly.
    let c64 = shader
        .reg_lookup(RegClass::Const, 64, None)
        .expect("constant register 64 not interned");
    let reads_c64 = shader.instr_ids().iter().any(|id| {
        shader.instr(*id)
            .srcs()
            .iter()
            .any(|s| s.src_ref == Ref::Reg(c64))
    });
    assert!(reads_c64);

    assert!(!binary.is_empty());
    assert_eq!(binary.len() % 8, 0);
}

#[test]
fn fragment_input_fmul_output() {
    // One scalar input through fmul to pixout 0.
    let mut nir = nir::Shader::new(ShaderStage::Fragment, "fs");
    let input = nir.load_input(0, 0);
    let sq = nir.alu(nir::AluOp::FMul, 32, 1, &[input, input]);
    nir.store_output(0, 0, sq);

    let compiler = compiler();
    let mut ctx = BuildCtx::new(&compiler, PipelineLayout::default());
    collect_io_data(&mut ctx, &nir);
    let mut shader = nir_to_rogue(&mut ctx, &nir);
    shader_passes(&mut shader, &compiler.options);
    let binary = encode_shader(&shader);

    assert!(validate_collect(&shader).is_empty());
    assert!(!binary.is_empty());
    assert!(shader.count_used_regs(RegClass::Temp) >= 1);

    // The interpolation's data request is waited on before its first reader.
    let ids = shader.instr_ids();
    let wdf_pos = ids
        .iter()
        .position(|id| {
            matches!(&shader.instr(*id).op, InstrOp::Ctrl(c) if c.op == CtrlOp::Wdf)
        })
        .expect("no WDF scheduled");
    let fitrp_pos = ids
        .iter()
        .position(|id| {
            matches!(&shader.instr(*id).op, InstrOp::Backend(b) if b.op == BackendOp::FitrpPixel)
        })
        .expect("no interpolation instruction");
    assert!(fitrp_pos < wdf_pos);
}

#[test]
fn vertex_output_collapses_to_combined_uvsw() {
    let mut nir = nir::Shader::new(ShaderStage::Vertex, "vs");
    let input = nir.load_input(0, 0);
    nir.store_output(0, 0, input);

    let (shader, binary) = compile_inspect(&nir, PipelineLayout::default());

    assert!(validate_collect(&shader).is_empty());
    let has_combined = shader.instr_ids().iter().any(|id| {
        matches!(
            &shader.instr(*id).op,
            InstrOp::Backend(b) if b.op == BackendOp::UvswWriteThenEmitThenEndtask
        )
    });
    assert!(has_combined, "vertex store did not collapse into the combined op");
    assert_eq!(binary.len() % 8, 0);
}

#[test]
fn descriptor_table_walk_compiles() {
    let mut nir = nir::Shader::new(ShaderStage::Fragment, "desc");
    let desc = nir.load_vulkan_descriptor(0, 1);
    let value = nir.load_global_constant(desc, 1);
    nir.store_output(0, 0, value);

    let layout = PipelineLayout {
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
    let (shader, binary) = compile_inspect(&nir, layout);

    assert!(validate_collect(&shader).is_empty());
    // Three chained loads, each waited on.
    let lds = shader
        .instr_ids()
        .iter()
        .filter(|id| {
            matches!(&shader.instr(**id).op, InstrOp::Backend(b) if b.op == BackendOp::Ld)
        })
        .count();
    let wdfs = shader
        .instr_ids()
        .iter()
        .filter(|id| {
            matches!(&shader.instr(**id).op, InstrOp::Ctrl(c) if c.op == CtrlOp::Wdf)
        })
        .count();
    assert_eq!(lds, 3);
    assert_eq!(wdfs, 3);
    for slot in 0..ROGUE_DRCS {
        for trxn in &shader.drc_trxns[slot] {
            assert!(trxn.release.is_some(), "unreleased DRC transaction");
        }
    }
    assert_eq!(binary.len() % 8, 0);
}

#[test]
fn groups_lay_out_contiguously() {
    let mut nir = nir::Shader::new(ShaderStage::Fragment, "layout");
    let input = nir.load_input(0, 0);
    let sq = nir.alu(nir::AluOp::FMul, 32, 1, &[input, input]);
    nir.store_output(0, 0, sq);

    let (shader, binary) = compile_inspect(&nir, PipelineLayout::default());

    let groups = shader.group_ids();
    assert!(groups.len() >= 2);
    let mut expected_offset = 0;
    for gid in &groups {
        let g = shader.group(*gid);
        assert_eq!(g.size.offset, expected_offset);
        expected_offset += g.size.total;
    }
    assert_eq!(binary.len() as u32, expected_offset);

    let last = shader.group(*groups.last().unwrap());
    let second = shader.group(groups[groups.len() - 2]);
    assert_eq!(second.size.offset + second.size.total, last.size.offset);
    assert_eq!((last.size.offset + last.size.total) % 8, 0);
    assert_eq!(last.size.offset % 8, 0);
}

#[test]
fn spirv_module_compiles_to_binary() {
    // A hand-assembled "out = in * 1.0" fragment module.
    let mut words: Vec<u32> = vec![spirv::SPIRV_MAGIC, 0x0001_0000, 0, 20, 0];
    let mut op = |opcode: u16, operands: &[u32]| {
        let mut v = vec![((operands.len() as u32 + 1) << 16) | u32::from(opcode)];
        v.extend_from_slice(operands);
        v
    };

    let main_str = u32::from_le_bytes(*b"main");
    words.extend(op(17, &[1])); // OpCapability Shader
    words.extend(op(14, &[0, 1])); // OpMemoryModel
    words.extend(op(15, &[4, 1, main_str, 0, 2, 3])); // OpEntryPoint Fragment %1 "main"
    words.extend(op(16, &[1, 7])); // OpExecutionMode OriginUpperLeft
    words.extend(op(71, &[2, 30, 0])); // OpDecorate %2 Location 0
    words.extend(op(71, &[3, 30, 0])); // OpDecorate %3 Location 0
    words.extend(op(19, &[4])); // %4 = OpTypeVoid
    words.extend(op(33, &[5, 4])); // %5 = OpTypeFunction %4
    words.extend(op(22, &[6, 32])); // %6 = OpTypeFloat 32
    words.extend(op(32, &[7, 1, 6])); // %7 = ptr Input float
    words.extend(op(32, &[8, 3, 6])); // %8 = ptr Output float
    words.extend(op(59, &[7, 2, 1])); // %2 = OpVariable Input
    words.extend(op(59, &[8, 3, 3])); // %3 = OpVariable Output
    words.extend(op(43, &[6, 9, 0x3f800000])); // %9 = 1.0f
    words.extend(op(54, &[4, 1, 0, 5])); // OpFunction
    words.extend(op(248, &[10])); // OpLabel
    words.extend(op(61, &[6, 11, 2])); // %11 = OpLoad %2
    words.extend(op(133, &[6, 12, 11, 9])); // %12 = OpFMul %11 %9
    words.extend(op(62, &[3, 12])); // OpStore %3 %12
    words.extend(op(253, &[])); // OpReturn
    words.extend(op(56, &[])); // OpFunctionEnd

    let nir = spirv::spirv_to_nir(&words, ShaderStage::Fragment, "main").unwrap();
    let compiler = compiler();
    let mut ctx = BuildCtx::new(&compiler, PipelineLayout::default());
    let binary = compile_nir_shader(&mut ctx, &nir);

    assert!(!binary.is_empty());
    assert_eq!(binary.len() % 8, 0);
    assert!(ctx.common_data(ShaderStage::Fragment).temps >= 1);
    assert_eq!(ctx.common_data(ShaderStage::Fragment).coeffs, 8);
}
