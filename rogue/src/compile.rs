// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Build context and compilation driver.
//!
//! A [`BuildCtx`] is owned by one caller for the lifetime of one multi-stage
//! pipeline compile. It carries the pipeline configuration coming from the
//! driver, the per-stage build data fed back to it, and the SSA index
//! allocator shared by every stage of the compile.

use crate::encode;
use crate::from_nir;
use crate::ir::*;
use crate::lower_late_ops::lower_late_ops;
use crate::lower_pseudo_ops::lower_pseudo_ops;
use crate::nir;
use crate::opt_constreg::constreg;
use crate::opt_copy_prop::copy_prop;
use crate::opt_dce::dce;
use crate::regalloc::regalloc;
use crate::schedule_instr_groups::schedule_instr_groups;
use crate::schedule_uvsw::schedule_uvsw;
use crate::schedule_wdf::schedule_wdf;
use crate::trim::trim;
use crate::validate::validate_shader;
use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DebugFlags: u32 {
        const NIR = 1 << 0;
        const NIR_PASSES = 1 << 1;
        const IR = 1 << 2;
        const IR_PASSES = 1 << 3;
        const IR_DETAILS = 1 << 4;
        /// Skip validation entirely.
        const VLD_SKIP = 1 << 5;
        /// Log validation failures instead of aborting.
        const VLD_NONFATAL = 1 << 6;
    }
}

/// Set-once diagnostics configuration, threaded through the build context
/// instead of living in process-global state.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompilerOptions {
    pub debug: DebugFlags,
    pub color: bool,
}

/// Device capability info. Referenced for identification only; this core does
/// not interpret it.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
}

impl Default for DeviceInfo {
    fn default() -> DeviceInfo {
        DeviceInfo {
            name: "rogue".to_string(),
        }
    }
}

pub struct Compiler {
    pub dev_info: DeviceInfo,
    pub options: CompilerOptions,
}

impl Compiler {
    pub fn new(dev_info: DeviceInfo, options: CompilerOptions) -> Compiler {
        Compiler { dev_info, options }
    }
}

/// Driver-facing failures. Everything inside the compiler core is fatal; only
/// front-end and input problems propagate as results.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("SPIR-V parse error: {0}")]
    Spirv(String),
    #[error("unsupported shader input: {0}")]
    Unsupported(String),
}

/* Pipeline configuration from the driver. */

#[derive(Clone, Debug, Default)]
pub struct DescBinding {
    pub binding: u32,
    /// Offset of the binding's primary descriptor within the set, in
    /// 32-bit units.
    pub primary_offset: u32,
}

#[derive(Clone, Debug, Default)]
pub struct DescSetLayout {
    pub bindings: Vec<DescBinding>,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineLayout {
    /// First of the two shared registers holding the 64-bit descriptor-set
    /// table base address.
    pub desc_set_table_sh_reg: u32,
    pub sets: Vec<DescSetLayout>,
}

impl PipelineLayout {
    pub fn binding_primary_offset(&self, desc_set: u32, binding: u32) -> u32 {
        let set = self
            .sets
            .get(desc_set as usize)
            .unwrap_or_else(|| panic!("Descriptor set {} not in pipeline layout", desc_set));
        set.bindings
            .iter()
            .find(|b| b.binding == binding)
            .unwrap_or_else(|| panic!("Binding {}.{} not in pipeline layout", desc_set, binding))
            .primary_offset
    }
}

/* Per-stage build data fed back to the driver. */

#[derive(Clone, Copy, Debug, Default)]
pub struct CommonBuildData {
    pub temps: u32,
    pub internals: u32,
    pub coeffs: u32,
    pub shareds: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MsaaMode {
    #[default]
    Pixel,
    Selective,
    Full,
}

/// Fragment-shader iterator assignments: which coefficient registers each
/// varying's plane equations land in. The W coefficients always occupy
/// iterator 0.
#[derive(Clone, Debug, Default)]
pub struct IteratorArgs {
    /// (location, component count, base iterator index)
    entries: Vec<(u32, u32, u32)>,
    pub num_fpu_iterators: u32,
}

impl IteratorArgs {
    pub fn w_iterator(&self) -> u32 {
        0
    }

    /// Iterator index of one varying component; multiply by
    /// [`ROGUE_COEFF_ALIGN`] for the coefficient register base.
    pub fn coeff_index(&self, location: u32, component: u32) -> u32 {
        for (loc, comps, base) in &self.entries {
            if *loc == location {
                assert!(component < *comps);
                return base + component;
            }
        }
        panic!("Location {} has no iterator", location);
    }

    pub fn num_coeffs(&self) -> u32 {
        self.num_fpu_iterators * ROGUE_COEFF_ALIGN
    }
}

#[derive(Clone, Debug, Default)]
pub struct FsBuildData {
    pub iterator_args: IteratorArgs,
    pub msaa_mode: MsaaMode,
    pub phas: bool,
}

/// Vertex input register assignments: 4 vtxin registers per attribute slot.
#[derive(Clone, Debug, Default)]
pub struct VertexInputs {
    entries: Vec<(u32, u32, u32)>,
    pub num_input_regs: u32,
}

impl VertexInputs {
    pub fn input_index(&self, location: u32, component: u32) -> u32 {
        for (loc, comps, base) in &self.entries {
            if *loc == location {
                assert!(component < *comps);
                return base + component;
            }
        }
        panic!("Attribute {} has no vertex input assignment", location);
    }
}

/// Vertex output (UVSW) assignments. Position occupies the first 4 entries.
#[derive(Clone, Debug, Default)]
pub struct VertexOutputs {
    entries: Vec<(u32, u32, u32)>,
    pub num_outputs: u32,
}

impl VertexOutputs {
    pub fn output_index(&self, location: u32, component: u32) -> u32 {
        for (loc, comps, base) in &self.entries {
            if *loc == location {
                assert!(component < *comps);
                return base + component;
            }
        }
        panic!("Output {} has no vertex output assignment", location);
    }
}

#[derive(Clone, Debug, Default)]
pub struct VsBuildData {
    pub inputs: VertexInputs,
    pub outputs: VertexOutputs,
    pub num_varyings: u32,
}

#[derive(Clone, Debug, Default)]
pub struct BuildData {
    pub fs: FsBuildData,
    pub vs: VsBuildData,
}

fn stage_index(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Fragment => 1,
    }
}

pub struct BuildCtx<'a> {
    pub compiler: &'a Compiler,
    pub pipeline_layout: PipelineLayout,
    pub stage_data: BuildData,
    pub common_data: [CommonBuildData; 2],
    pub next_ssa_idx: u32,
}

impl<'a> BuildCtx<'a> {
    pub fn new(compiler: &'a Compiler, pipeline_layout: PipelineLayout) -> BuildCtx<'a> {
        BuildCtx {
            compiler,
            pipeline_layout,
            stage_data: BuildData::default(),
            common_data: Default::default(),
            next_ssa_idx: 0,
        }
    }

    pub fn common_data(&self, stage: ShaderStage) -> &CommonBuildData {
        &self.common_data[stage_index(stage)]
    }

    pub fn common_data_mut(&mut self, stage: ShaderStage) -> &mut CommonBuildData {
        &mut self.common_data[stage_index(stage)]
    }
}

/* I/O data collection. */

fn collect_io_locations(nir: &nir::Shader, op: nir::Intrinsic) -> Vec<(u32, u32)> {
    // (location, component count), sorted by location.
    let mut locs: Vec<(u32, u32)> = Vec::new();
    for block in &nir.blocks {
        for instr in &block.instrs {
            if let nir::Instr::Intrinsic { op: iop, params, .. } = instr {
                if *iop != op {
                    continue;
                }
                let comps = params.component + 1;
                match locs.iter_mut().find(|(l, _)| *l == params.location) {
                    Some((_, c)) => *c = (*c).max(comps),
                    None => locs.push((params.location, comps)),
                }
            }
        }
    }
    locs.sort_by_key(|(l, _)| *l);
    locs
}

fn collect_io_data_fs(ctx: &mut BuildCtx, nir: &nir::Shader) {
    let mut args = IteratorArgs::default();
    // Iterator 0 is always the W plane.
    let mut next = 1;
    for (location, comps) in collect_io_locations(nir, nir::Intrinsic::LoadInput) {
        args.entries.push((location, comps, next));
        next += comps;
    }
    args.num_fpu_iterators = next;
    ctx.stage_data.fs = FsBuildData {
        iterator_args: args,
        msaa_mode: MsaaMode::Pixel,
        phas: false,
    };
}

fn collect_io_data_vs(ctx: &mut BuildCtx, nir: &nir::Shader) {
    let mut inputs = VertexInputs::default();
    let mut next = 0;
    for (location, comps) in collect_io_locations(nir, nir::Intrinsic::LoadInput) {
        inputs.entries.push((location, comps, next));
        next += comps;
    }
    inputs.num_input_regs = next;

    let mut outputs = VertexOutputs::default();
    let mut next = 0;
    let mut num_varyings = 0;
    for (location, comps) in collect_io_locations(nir, nir::Intrinsic::StoreOutput) {
        outputs.entries.push((location, comps, next));
        next += comps;
        // Location 0 is the position slot; everything else is a varying.
        if location != 0 {
            num_varyings += comps;
        }
    }
    outputs.num_outputs = next;

    ctx.stage_data.vs = VsBuildData {
        inputs,
        outputs,
        num_varyings,
    };
}

pub fn collect_io_data(ctx: &mut BuildCtx, nir: &nir::Shader) {
    match nir.stage {
        ShaderStage::Fragment => collect_io_data_fs(ctx, nir),
        ShaderStage::Vertex => collect_io_data_vs(ctx, nir),
    }
}

/* Pass driver. */

fn run_pass<F>(shader: &mut Shader, name: &str, opts: &CompilerOptions, pass: F) -> bool
where
    F: FnOnce(&mut Shader) -> bool,
{
    let progress = pass(shader);
    if progress {
        if opts.debug.contains(DebugFlags::IR_PASSES) {
            eprintln!("{}", name);
            eprintln!("{}", shader);
        }
        validate_shader(shader, name, opts);
    }
    progress
}

/// Runs the full pass pipeline on a translated shader.
pub fn shader_passes(shader: &mut Shader, opts: &CompilerOptions) {
    loop {
        let mut progress = false;
        progress |= run_pass(shader, "constreg", opts, constreg);
        progress |= run_pass(shader, "copy_prop", opts, copy_prop);
        progress |= run_pass(shader, "dce", opts, dce);
        if !progress {
            break;
        }
    }

    run_pass(shader, "lower_pseudo_ops", opts, lower_pseudo_ops);
    run_pass(shader, "schedule_wdf", opts, |s| schedule_wdf(s, false));
    run_pass(shader, "schedule_uvsw", opts, |s| schedule_uvsw(s, false));
    run_pass(shader, "trim", opts, trim);
    run_pass(shader, "regalloc", opts, regalloc);
    run_pass(shader, "lower_late_ops", opts, lower_late_ops);
    run_pass(shader, "dce", opts, dce);
    run_pass(shader, "schedule_instr_groups", opts, |s| {
        schedule_instr_groups(s, false)
    });
}

/// Compiles one NIR shader to its binary instruction stream and records the
/// per-class register counts in the build context.
pub fn compile_nir_shader(ctx: &mut BuildCtx, nir: &nir::Shader) -> Vec<u8> {
    let opts = ctx.compiler.options;

    collect_io_data(ctx, nir);
    let mut shader = from_nir::nir_to_rogue(ctx, nir);
    if opts.debug.contains(DebugFlags::IR) {
        eprintln!("{}", shader);
    }
    validate_shader(&mut shader, "nir_to_rogue", &opts);

    shader_passes(&mut shader, &opts);

    let binary = encode::encode_shader(&shader);

    *ctx.common_data_mut(shader.stage) = CommonBuildData {
        temps: shader.count_used_regs(RegClass::Temp),
        internals: shader.count_used_regs(RegClass::Internal),
        coeffs: match shader.stage {
            ShaderStage::Fragment => ctx.stage_data.fs.iterator_args.num_coeffs(),
            ShaderStage::Vertex => shader.count_used_regs(RegClass::Coeff),
        },
        shareds: shader.count_used_regs(RegClass::Shared),
    };

    binary
}
