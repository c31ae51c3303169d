// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Offline shader compiler: SPIR-V in, raw instruction stream out.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rogue::compile::{BuildCtx, Compiler, CompilerOptions, DeviceInfo, PipelineLayout};
use rogue::compile::compile_nir_shader;
use rogue::ir::ShaderStage;
use rogue::spirv;
use std::fs;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Stage {
    Frag,
    Vert,
}

impl From<Stage> for ShaderStage {
    fn from(stage: Stage) -> ShaderStage {
        match stage {
            Stage::Frag => ShaderStage::Fragment,
            Stage::Vert => ShaderStage::Vertex,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rogue_compiler", about = "Offline Rogue shader compiler.")]
struct Args {
    /// Shader stage
    #[arg(long, value_enum)]
    stage: Stage,

    /// Input SPIR-V binary
    #[arg(long)]
    file: PathBuf,

    /// Entry point name
    #[arg(long, default_value = "main")]
    entry: String,

    /// Output file
    #[arg(long, default_value = "out.bin")]
    out: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let stage = ShaderStage::from(args.stage);

    let bytes = fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let words = spirv::words_from_bytes(&bytes)?;
    let nir = spirv::spirv_to_nir(&words, stage, &args.entry)?;

    let compiler = Compiler::new(DeviceInfo::default(), CompilerOptions::default());
    let mut ctx = BuildCtx::new(&compiler, PipelineLayout::default());
    let binary = compile_nir_shader(&mut ctx, &nir);

    fs::write(&args.out, &binary)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    let data = ctx.common_data(stage);
    eprintln!(
        "{}: {} bytes, {} temps, {} coeffs",
        args.out.display(),
        binary.len(),
        data.temps,
        data.coeffs
    );
    Ok(())
}
