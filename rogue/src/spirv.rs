// Copyright © 2024 Imagination GPU driver contributors.
// SPDX-License-Identifier: MIT

//! Minimal SPIR-V front end for the offline compiler.
//!
//! Parses exactly the module shapes the backend's closed translator accepts:
//! one entry point, scalar 32-bit loads/stores of decorated input/output
//! variables, 32/64-bit constants, FMul/IAdd, the GLSL.std.450 Fma/FAbs/
//! PackUnorm4x8 instructions and vector construction. Anything else is a
//! front-end error, reported as a result rather than aborting: unlike the
//! compiler core, malformed input files are an expected failure mode here.

use crate::compile::CompileError;
use crate::ir::ShaderStage;
use crate::nir;
use rustc_hash::FxHashMap;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/* Opcodes of the supported subset. */
const OP_SOURCE: u16 = 3;
const OP_SOURCE_EXTENSION: u16 = 4;
const OP_NAME: u16 = 5;
const OP_MEMBER_NAME: u16 = 6;
const OP_EXT_INST_IMPORT: u16 = 11;
const OP_EXT_INST: u16 = 12;
const OP_MEMORY_MODEL: u16 = 14;
const OP_ENTRY_POINT: u16 = 15;
const OP_EXECUTION_MODE: u16 = 16;
const OP_CAPABILITY: u16 = 17;
const OP_TYPE_VOID: u16 = 19;
const OP_TYPE_BOOL: u16 = 20;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_POINTER: u16 = 32;
const OP_TYPE_FUNCTION: u16 = 33;
const OP_CONSTANT: u16 = 43;
const OP_CONSTANT_COMPOSITE: u16 = 44;
const OP_FUNCTION: u16 = 54;
const OP_FUNCTION_END: u16 = 56;
const OP_VARIABLE: u16 = 59;
const OP_LOAD: u16 = 61;
const OP_STORE: u16 = 62;
const OP_DECORATE: u16 = 71;
const OP_COMPOSITE_CONSTRUCT: u16 = 80;
const OP_IADD: u16 = 128;
const OP_FMUL: u16 = 133;
const OP_LABEL: u16 = 248;
const OP_RETURN: u16 = 253;

const DECORATION_LOCATION: u32 = 30;
const DECORATION_COMPONENT: u32 = 31;

const STORAGE_CLASS_INPUT: u32 = 1;
const STORAGE_CLASS_OUTPUT: u32 = 3;

const EXEC_MODEL_VERTEX: u32 = 0;
const EXEC_MODEL_FRAGMENT: u32 = 4;

const GLSL_FABS: u32 = 4;
const GLSL_FMA: u32 = 50;
const GLSL_PACK_UNORM_4X8: u32 = 55;

#[derive(Clone, Copy, Debug)]
enum Type {
    Void,
    Bool,
    Int { bits: u8 },
    Float { bits: u8 },
    Vector { component: u32, count: u8 },
    Pointer { storage: u32, pointee: u32 },
    Function,
}

#[derive(Clone, Copy, Default)]
struct Var {
    storage: u32,
    pointee: u32,
    location: u32,
    component: u32,
}

struct Parser<'a> {
    words: &'a [u32],
    stage: ShaderStage,
    entry: &'a str,

    types: FxHashMap<u32, Type>,
    constants: FxHashMap<u32, (u32, Vec<u32>)>,
    variables: FxHashMap<u32, Var>,
    locations: FxHashMap<u32, u32>,
    components: FxHashMap<u32, u32>,
    glsl_set: Option<u32>,
    entry_fn: Option<u32>,

    defs: FxHashMap<u32, nir::DefId>,
}

fn err(msg: impl Into<String>) -> CompileError {
    CompileError::Spirv(msg.into())
}

impl<'a> Parser<'a> {
    fn type_of(&self, id: u32) -> Result<Type, CompileError> {
        self.types
            .get(&id)
            .copied()
            .ok_or_else(|| err(format!("unknown type id %{}", id)))
    }

    fn scalar_bits(&self, type_id: u32) -> Result<u8, CompileError> {
        match self.type_of(type_id)? {
            Type::Float { bits } | Type::Int { bits } => Ok(bits),
            t => Err(err(format!("expected a scalar type, got {:?}", t))),
        }
    }

    fn def_of(&self, id: u32) -> Result<nir::DefId, CompileError> {
        if let Some(def) = self.defs.get(&id) {
            return Ok(*def);
        }
        Err(err(format!("use of undefined result id %{}", id)))
    }

    /// Materializes module-level constants at first use.
    fn operand_def(
        &mut self,
        shader: &mut nir::Shader,
        id: u32,
    ) -> Result<nir::DefId, CompileError> {
        if let Some(def) = self.defs.get(&id) {
            return Ok(*def);
        }
        if let Some((type_id, words)) = self.constants.get(&id).cloned() {
            let bits = self.scalar_bits(type_id)?;
            let def = shader.load_const(bits, &words);
            self.defs.insert(id, def);
            return Ok(def);
        }
        self.def_of(id)
    }

    fn parse_preamble(&mut self) -> Result<(), CompileError> {
        let mut pc = 5;
        while pc < self.words.len() {
            let word = self.words[pc];
            let wc = (word >> 16) as usize;
            let op = (word & 0xffff) as u16;
            if wc == 0 || pc + wc > self.words.len() {
                return Err(err("truncated instruction stream"));
            }
            let operands = &self.words[pc + 1..pc + wc];

            match op {
                OP_CAPABILITY | OP_MEMORY_MODEL | OP_EXECUTION_MODE | OP_SOURCE
                | OP_SOURCE_EXTENSION | OP_NAME | OP_MEMBER_NAME => (),
                OP_EXT_INST_IMPORT => {
                    let name = decode_string(&operands[1..]);
                    if name == "GLSL.std.450" {
                        self.glsl_set = Some(operands[0]);
                    }
                }
                OP_ENTRY_POINT => {
                    let model = operands[0];
                    let name = decode_string(&operands[2..]);
                    if name == self.entry {
                        let want = match self.stage {
                            ShaderStage::Vertex => EXEC_MODEL_VERTEX,
                            ShaderStage::Fragment => EXEC_MODEL_FRAGMENT,
                        };
                        if model != want {
                            return Err(err(format!(
                                "entry point \"{}\" has execution model {}, expected {}",
                                name, model, want
                            )));
                        }
                        self.entry_fn = Some(operands[1]);
                    }
                }
                OP_DECORATE => {
                    let target = operands[0];
                    match operands[1] {
                        DECORATION_LOCATION => {
                            self.locations.insert(target, operands[2]);
                        }
                        DECORATION_COMPONENT => {
                            self.components.insert(target, operands[2]);
                        }
                        _ => (),
                    }
                }
                OP_TYPE_VOID => {
                    self.types.insert(operands[0], Type::Void);
                }
                OP_TYPE_BOOL => {
                    self.types.insert(operands[0], Type::Bool);
                }
                OP_TYPE_INT => {
                    self.types.insert(
                        operands[0],
                        Type::Int {
                            bits: operands[1] as u8,
                        },
                    );
                }
                OP_TYPE_FLOAT => {
                    self.types.insert(
                        operands[0],
                        Type::Float {
                            bits: operands[1] as u8,
                        },
                    );
                }
                OP_TYPE_VECTOR => {
                    self.types.insert(
                        operands[0],
                        Type::Vector {
                            component: operands[1],
                            count: operands[2] as u8,
                        },
                    );
                }
                OP_TYPE_POINTER => {
                    self.types.insert(
                        operands[0],
                        Type::Pointer {
                            storage: operands[1],
                            pointee: operands[2],
                        },
                    );
                }
                OP_TYPE_FUNCTION => {
                    self.types.insert(operands[0], Type::Function);
                }
                OP_CONSTANT => {
                    self.constants
                        .insert(operands[1], (operands[0], operands[2..].to_vec()));
                }
                OP_CONSTANT_COMPOSITE => {
                    // Flatten: component constants must already exist.
                    let mut words = Vec::new();
                    for c in &operands[2..] {
                        let (_, w) = self
                            .constants
                            .get(c)
                            .ok_or_else(|| err("composite of a non-constant"))?;
                        words.extend_from_slice(w);
                    }
                    self.constants.insert(operands[1], (operands[0], words));
                }
                OP_VARIABLE => {
                    let pointer_type = operands[0];
                    let Type::Pointer { storage, pointee } = self.type_of(pointer_type)? else {
                        return Err(err("variable with a non-pointer type"));
                    };
                    self.variables.insert(
                        operands[1],
                        Var {
                            storage,
                            pointee,
                            location: self.locations.get(&operands[1]).copied().unwrap_or(0),
                            component: self.components.get(&operands[1]).copied().unwrap_or(0),
                        },
                    );
                }
                OP_FUNCTION => break,
                _ => {
                    return Err(err(format!("unsupported SPIR-V opcode {}", op)));
                }
            }
            pc += wc;
        }
        Ok(())
    }

    fn parse_body(&mut self, shader: &mut nir::Shader) -> Result<(), CompileError> {
        // Skip to the entry point's function.
        let entry_fn = self
            .entry_fn
            .ok_or_else(|| err(format!("entry point \"{}\" not found", self.entry)))?;

        let mut pc = 5;
        let mut in_entry = false;
        while pc < self.words.len() {
            let word = self.words[pc];
            let wc = (word >> 16) as usize;
            let op = (word & 0xffff) as u16;
            if wc == 0 || pc + wc > self.words.len() {
                return Err(err("truncated instruction stream"));
            }
            let operands = &self.words[pc + 1..pc + wc];
            pc += wc;

            match op {
                OP_FUNCTION => {
                    in_entry = operands[1] == entry_fn;
                    continue;
                }
                OP_FUNCTION_END => {
                    in_entry = false;
                    continue;
                }
                _ => (),
            }
            if !in_entry {
                continue;
            }

            match op {
                OP_LABEL | OP_RETURN => (),
                OP_LOAD => {
                    let (result_type, result, pointer) = (operands[0], operands[1], operands[2]);
                    let var = self
                        .variables
                        .get(&pointer)
                        .copied()
                        .ok_or_else(|| err("load from a non-variable pointer"))?;
                    if var.storage != STORAGE_CLASS_INPUT {
                        return Err(err("load from a non-input variable"));
                    }
                    match self.type_of(result_type)? {
                        Type::Float { bits: 32 } => (),
                        t => {
                            return Err(CompileError::Unsupported(format!(
                                "load of {:?}; only 32-bit scalar loads are implemented",
                                t
                            )))
                        }
                    }
                    let def = shader.load_input(var.location, var.component);
                    self.defs.insert(result, def);
                }
                OP_STORE => {
                    let (pointer, object) = (operands[0], operands[1]);
                    let var = self
                        .variables
                        .get(&pointer)
                        .copied()
                        .ok_or_else(|| err("store to a non-variable pointer"))?;
                    if var.storage != STORAGE_CLASS_OUTPUT {
                        return Err(err("store to a non-output variable"));
                    }
                    let value = self.operand_def(shader, object)?;
                    if shader.def(value).bit_size != 32 || shader.def(value).num_components != 1 {
                        return Err(CompileError::Unsupported(
                            "only 32-bit scalar stores are implemented".to_string(),
                        ));
                    }
                    shader.store_output(var.location, var.component, value);
                }
                OP_FMUL => {
                    let (result_type, result) = (operands[0], operands[1]);
                    let bits = self.scalar_bits(result_type)?;
                    let a = self.operand_def(shader, operands[2])?;
                    let b = self.operand_def(shader, operands[3])?;
                    let def = shader.alu(nir::AluOp::FMul, bits, 1, &[a, b]);
                    self.defs.insert(result, def);
                }
                OP_IADD => {
                    let (result_type, result) = (operands[0], operands[1]);
                    let bits = self.scalar_bits(result_type)?;
                    let a = self.operand_def(shader, operands[2])?;
                    let b = self.operand_def(shader, operands[3])?;
                    let def = shader.alu(nir::AluOp::IAdd, bits, 1, &[a, b]);
                    self.defs.insert(result, def);
                }
                OP_COMPOSITE_CONSTRUCT => {
                    let (result_type, result) = (operands[0], operands[1]);
                    let Type::Vector { component, count } = self.type_of(result_type)? else {
                        return Err(err("composite construct of a non-vector"));
                    };
                    if self.scalar_bits(component)? != 32 {
                        return Err(err("only 32-bit vectors are implemented"));
                    }
                    let srcs: Vec<nir::DefId> = operands[2..]
                        .iter()
                        .map(|o| self.operand_def(shader, *o))
                        .collect::<Result<_, _>>()?;
                    let op = match count {
                        2 => nir::AluOp::Vec2,
                        3 => nir::AluOp::Vec3,
                        4 => nir::AluOp::Vec4,
                        n => return Err(err(format!("unsupported vector width {}", n))),
                    };
                    let def = shader.alu(op, 32, count, &srcs);
                    self.defs.insert(result, def);
                }
                OP_EXT_INST => {
                    let (result_type, result, set, ext_op) =
                        (operands[0], operands[1], operands[2], operands[3]);
                    if Some(set) != self.glsl_set {
                        return Err(err("extended instruction from an unknown set"));
                    }
                    let args = &operands[4..];
                    let def = match ext_op {
                        GLSL_FABS => {
                            let a = self.operand_def(shader, args[0])?;
                            let bits = self.scalar_bits(result_type)?;
                            shader.alu(nir::AluOp::FAbs, bits, 1, &[a])
                        }
                        GLSL_FMA => {
                            let bits = self.scalar_bits(result_type)?;
                            let a = self.operand_def(shader, args[0])?;
                            let b = self.operand_def(shader, args[1])?;
                            let c = self.operand_def(shader, args[2])?;
                            shader.alu(nir::AluOp::FFma, bits, 1, &[a, b, c])
                        }
                        GLSL_PACK_UNORM_4X8 => {
                            let v = self.operand_def(shader, args[0])?;
                            shader.alu(nir::AluOp::PackUnorm4x8, 32, 1, &[v])
                        }
                        _ => {
                            return Err(err(format!(
                                "unsupported GLSL.std.450 instruction {}",
                                ext_op
                            )))
                        }
                    };
                    self.defs.insert(result, def);
                }
                OP_VARIABLE => {
                    return Err(err("function-local variables are not implemented"));
                }
                _ => {
                    return Err(err(format!("unsupported SPIR-V opcode {}", op)));
                }
            }
        }
        Ok(())
    }
}

fn decode_string(words: &[u32]) -> String {
    let mut bytes = Vec::new();
    'outer: for w in words {
        for b in w.to_le_bytes() {
            if b == 0 {
                break 'outer;
            }
            bytes.push(b);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Reinterprets a SPIR-V binary as words, handling byte order via the magic.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, CompileError> {
    if bytes.len() % 4 != 0 {
        return Err(err("binary size is not a multiple of 4"));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&m) if m.swap_bytes() == SPIRV_MAGIC => {
            Ok(words.into_iter().map(u32::swap_bytes).collect())
        }
        _ => Err(err("bad SPIR-V magic")),
    }
}

/// Translates a SPIR-V module into the NIR form the backend consumes.
pub fn spirv_to_nir(
    words: &[u32],
    stage: ShaderStage,
    entry: &str,
) -> Result<nir::Shader, CompileError> {
    if words.len() < 5 || words[0] != SPIRV_MAGIC {
        return Err(err("bad SPIR-V module header"));
    }

    let mut parser = Parser {
        words,
        stage,
        entry,
        types: FxHashMap::default(),
        constants: FxHashMap::default(),
        variables: FxHashMap::default(),
        locations: FxHashMap::default(),
        components: FxHashMap::default(),
        glsl_set: None,
        entry_fn: None,
        defs: FxHashMap::default(),
    };

    let mut shader = nir::Shader::new(stage, entry);
    parser.parse_preamble()?;
    parser.parse_body(&mut shader)?;
    Ok(shader)
}

#[cfg(test)]
pub mod test_module {
    //! Tiny SPIR-V module builder used by the tests.

    pub struct ModuleBuilder {
        words: Vec<u32>,
        next_id: u32,
    }

    impl ModuleBuilder {
        pub fn new() -> ModuleBuilder {
            ModuleBuilder {
                words: vec![super::SPIRV_MAGIC, 0x0001_0000, 0, 100, 0],
                next_id: 1,
            }
        }

        pub fn id(&mut self) -> u32 {
            let id = self.next_id;
            self.next_id += 1;
            id
        }

        pub fn op(&mut self, opcode: u16, operands: &[u32]) {
            self.words
                .push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
            self.words.extend_from_slice(operands);
        }

        pub fn op_string(&mut self, opcode: u16, pre: &[u32], s: &str, post: &[u32]) {
            let mut operands = pre.to_vec();
            let bytes = s.as_bytes();
            let mut chunks = bytes.chunks(4).peekable();
            let mut needs_terminator = true;
            while let Some(c) = chunks.next() {
                let mut w = [0u8; 4];
                w[..c.len()].copy_from_slice(c);
                operands.push(u32::from_le_bytes(w));
                if chunks.peek().is_none() && c.len() < 4 {
                    needs_terminator = false;
                }
            }
            if needs_terminator {
                operands.push(0);
            }
            operands.extend_from_slice(post);
            self.op(opcode, &operands);
        }

        pub fn finish(mut self) -> Vec<u32> {
            self.words[3] = self.next_id;
            self.words
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_module::ModuleBuilder;
    use super::*;

    /// fragment: out = in * 1.0
    fn simple_fragment_module(entry: &str) -> Vec<u32> {
        let mut m = ModuleBuilder::new();
        let main_fn = m.id();
        let (void_t, fn_t, float_t) = (m.id(), m.id(), m.id());
        let (in_ptr_t, out_ptr_t) = (m.id(), m.id());
        let (in_var, out_var) = (m.id(), m.id());
        let one = m.id();
        let (label, loaded, product) = (m.id(), m.id(), m.id());

        m.op(OP_CAPABILITY, &[1 /* Shader */]);
        m.op(OP_MEMORY_MODEL, &[0, 1]);
        m.op_string(OP_ENTRY_POINT, &[EXEC_MODEL_FRAGMENT, main_fn], entry, &[in_var, out_var]);
        m.op(OP_EXECUTION_MODE, &[main_fn, 7 /* OriginUpperLeft */]);
        m.op(OP_DECORATE, &[in_var, DECORATION_LOCATION, 0]);
        m.op(OP_DECORATE, &[out_var, DECORATION_LOCATION, 0]);
        m.op(OP_TYPE_VOID, &[void_t]);
        m.op(OP_TYPE_FUNCTION, &[fn_t, void_t]);
        m.op(OP_TYPE_FLOAT, &[float_t, 32]);
        m.op(OP_TYPE_POINTER, &[in_ptr_t, STORAGE_CLASS_INPUT, float_t]);
        m.op(OP_TYPE_POINTER, &[out_ptr_t, STORAGE_CLASS_OUTPUT, float_t]);
        m.op(OP_VARIABLE, &[in_ptr_t, in_var, STORAGE_CLASS_INPUT]);
        m.op(OP_VARIABLE, &[out_ptr_t, out_var, STORAGE_CLASS_OUTPUT]);
        m.op(OP_CONSTANT, &[float_t, one, 0x3f800000]);
        m.op(OP_FUNCTION, &[void_t, main_fn, 0, fn_t]);
        m.op(OP_LABEL, &[label]);
        m.op(OP_LOAD, &[float_t, loaded, in_var]);
        m.op(OP_FMUL, &[float_t, product, loaded, one]);
        m.op(OP_STORE, &[out_var, product]);
        m.op(OP_RETURN, &[]);
        m.op(OP_FUNCTION_END, &[]);
        m.finish()
    }

    #[test]
    fn translates_simple_fragment_shader() {
        let words = simple_fragment_module("main");
        let nir = spirv_to_nir(&words, ShaderStage::Fragment, "main").unwrap();

        let instrs = &nir.blocks[0].instrs;
        // load_input, load_const, fmul, store_output
        assert_eq!(instrs.len(), 4);
        assert!(matches!(
            &instrs[0],
            nir::Instr::Intrinsic { op: nir::Intrinsic::LoadInput, .. }
        ));
        assert!(matches!(&instrs[1], nir::Instr::LoadConst { values, .. }
            if values == &vec![0x3f800000]));
        assert!(matches!(
            &instrs[2],
            nir::Instr::Alu { op: nir::AluOp::FMul, .. }
        ));
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let words = simple_fragment_module("main");
        let result = spirv_to_nir(&words, ShaderStage::Fragment, "other");
        assert!(matches!(result, Err(CompileError::Spirv(_))));
    }

    #[test]
    fn wrong_stage_is_an_error() {
        let words = simple_fragment_module("main");
        assert!(spirv_to_nir(&words, ShaderStage::Vertex, "main").is_err());
    }

    #[test]
    fn byte_order_is_detected() {
        let words = simple_fragment_module("main");
        let be_bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let decoded = words_from_bytes(&be_bytes).unwrap();
        assert_eq!(decoded, words);

        assert!(words_from_bytes(&[1, 2, 3]).is_err());
        assert!(words_from_bytes(&[0; 8]).is_err());
    }

    #[test]
    fn unsupported_opcode_is_an_error() {
        let mut m = ModuleBuilder::new();
        m.op(OP_CAPABILITY, &[1]);
        m.op(1234, &[0]);
        let words = m.finish();
        assert!(spirv_to_nir(&words, ShaderStage::Fragment, "main").is_err());
    }
}
