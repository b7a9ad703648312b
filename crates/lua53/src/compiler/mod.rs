// Lua 5.3 bytecode compiler
// source -> tokens -> AST -> register bytecode
mod code;
mod expr;
mod fold;
mod func_state;
pub mod parse_lua_number;
pub mod parser;
mod stmt;

use std::fs::File;
use std::io::{Read, Write};
use std::ops::BitOr;
use std::path::Path;
use std::rc::Rc;

use log::debug;

use crate::compiler::parser::{ScanConfig, SyntaxError, parse_chunk};
use crate::lua_value::Chunk;
use crate::lua_value::chunk_serializer::{dump, is_binary_chunk, undump};
use crate::lua_vm::{ErrorKind, LuaError, LuaResult};

pub use code::{fb2int, int2fb};

pub type CompileResult<T> = Result<T, SyntaxError>;

/// Compiler switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileMode(u32);

impl CompileMode {
    /// Leave sources, line info and names out of dumped chunks.
    pub const STRIP_DEBUG_INFO: CompileMode = CompileMode(1);
    /// Keep comments in the token stream.
    pub const SCAN_COMMENTS: CompileMode = CompileMode(1 << 1);
    /// Disable constant folding and dead code elimination.
    pub const NO_FOLD: CompileMode = CompileMode(1 << 2);
    /// Disable the peephole pass.
    pub const NO_PEEPHOLE: CompileMode = CompileMode(1 << 3);

    pub fn contains(self, other: CompileMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CompileMode {
    type Output = CompileMode;

    fn bitor(self, rhs: CompileMode) -> CompileMode {
        CompileMode(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    pub mode: CompileMode,
}

fn read_all<R: Read>(mut reader: R, name: &str) -> LuaResult<Vec<u8>> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|e| LuaError::runtime(ErrorKind::Load, format!("cannot read {}: {}", name, e)))?;
    Ok(data)
}

impl Compiler {
    pub fn new(mode: CompileMode) -> Self {
        Compiler { mode }
    }

    /// Compiles Lua source. `name` is the chunk name (`=stdin`, `@file.lua`,
    /// or the source text itself).
    pub fn compile<R: Read>(&self, reader: R, name: &str) -> LuaResult<Rc<Chunk>> {
        let src = read_all(reader, name)?;
        self.compile_bytes(&src, name)
    }

    pub fn compile_bytes(&self, src: &[u8], name: &str) -> LuaResult<Rc<Chunk>> {
        let config = ScanConfig {
            scan_comments: self.mode.contains(CompileMode::SCAN_COMMENTS),
        };
        let file = parse_chunk(src, name, config)?;
        let chunk = stmt::gen_main(&file, self.mode)?;
        debug!("compiled {}: {} functions", name, count_functions(&chunk));
        Ok(Rc::new(chunk))
    }

    pub fn compile_file(&self, path: impl AsRef<Path>) -> LuaResult<Rc<Chunk>> {
        let path = path.as_ref();
        let name = format!("@{}", path.display());
        let file = File::open(path)
            .map_err(|e| LuaError::runtime(ErrorKind::Load, format!("cannot open {}: {}", path.display(), e)))?;
        self.compile(file, &name)
    }

    /// Writes `chunk` as a precompiled binary chunk.
    pub fn dump<W: Write>(&self, mut writer: W, chunk: &Chunk) -> LuaResult<()> {
        let data = dump(chunk, self.mode.contains(CompileMode::STRIP_DEBUG_INFO));
        debug!("dumping {} ({} bytes)", chunk.source, data.len());
        writer
            .write_all(&data)
            .map_err(|e| LuaError::runtime(ErrorKind::Load, format!("cannot write chunk: {}", e)))
    }

    /// Reads and validates a precompiled binary chunk.
    pub fn undump<R: Read>(&self, reader: R, name: &str) -> LuaResult<Chunk> {
        let data = read_all(reader, name)?;
        let chunk = undump(&data, name)?;
        chunk.validate()?;
        Ok(chunk)
    }

    /// Loads either source or a binary chunk.
    pub fn load<R: Read>(&self, reader: R, name: &str) -> LuaResult<Rc<Chunk>> {
        let data = read_all(reader, name)?;
        self.load_bytes(&data, name)
    }

    pub fn load_bytes(&self, data: &[u8], name: &str) -> LuaResult<Rc<Chunk>> {
        if is_binary_chunk(data) {
            let chunk = undump(data, name)?;
            chunk.validate()?;
            Ok(Rc::new(chunk))
        } else {
            self.compile_bytes(data, name)
        }
    }
}

fn count_functions(chunk: &Chunk) -> usize {
    1 + chunk.child_protos.iter().map(|c| count_functions(c)).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_value::LuaValue;
    use crate::lua_vm::opcode::OpCode;

    fn compile_mode(src: &str, mode: CompileMode) -> Rc<Chunk> {
        let chunk = Compiler::new(mode).compile(src.as_bytes(), "=test").unwrap();
        chunk.validate().unwrap();
        chunk
    }

    fn compile(src: &str) -> Rc<Chunk> {
        compile_mode(src, CompileMode::default())
    }

    fn compile_err(src: &str) -> String {
        Compiler::default()
            .compile(src.as_bytes(), "=test")
            .unwrap_err()
            .to_string()
    }

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        chunk.code.iter().filter_map(|i| i.opcode()).collect()
    }

    #[test]
    fn test_main_function_shape() {
        let chunk = compile("");
        assert!(chunk.is_vararg);
        assert_eq!(chunk.upvalue_descs.len(), 1);
        assert_eq!(chunk.upvalue_descs[0].name, "_ENV");
        assert!(chunk.upvalue_descs[0].in_stack);
        assert_eq!(ops(&chunk), vec![OpCode::Return]);
        assert!(chunk.max_stack_size >= 2);
    }

    #[test]
    fn test_folded_local() {
        let chunk = compile("local x = 2 * 3 + 1");
        assert_eq!(ops(&chunk), vec![OpCode::LoadK, OpCode::Return]);
        assert!(matches!(chunk.constants[0], LuaValue::Integer(7)));
    }

    #[test]
    fn test_dead_branches_removed() {
        let chunk = compile("if false then print(1) end while false do print(2) end");
        assert_eq!(ops(&chunk), vec![OpCode::Return]);
        let chunk = compile("if true then x = 1 else x = 2 end");
        assert_eq!(ops(&chunk), vec![OpCode::SetTabUp, OpCode::Return]);
    }

    #[test]
    fn test_no_fold_keeps_arith() {
        let chunk = compile_mode("local x = 2 * 3", CompileMode::NO_FOLD);
        assert!(ops(&chunk).contains(&OpCode::Mul));
    }

    #[test]
    fn test_global_access_uses_env() {
        let chunk = compile("x = y");
        assert_eq!(
            ops(&chunk),
            vec![OpCode::GetTabUp, OpCode::SetTabUp, OpCode::Return]
        );
    }

    #[test]
    fn test_table_constructor() {
        let chunk = compile("local t = {1, 2, 3, x = 4}");
        let code = &chunk.code;
        assert_eq!(code[0].opcode(), Some(OpCode::NewTable));
        assert_eq!(fb2int(code[0].get_b()), 3);
        assert_eq!(fb2int(code[0].get_c()), 1);
        let setlist = code
            .iter()
            .find(|i| i.opcode() == Some(OpCode::SetList))
            .unwrap();
        assert_eq!(setlist.get_b(), 3);
        assert_eq!(setlist.get_c(), 1);
    }

    #[test]
    fn test_setlist_blocks() {
        let items: Vec<String> = (1..=60).map(|i| i.to_string()).collect();
        let chunk = compile(&format!("local t = {{{}}}", items.join(", ")));
        let blocks: Vec<(u32, u32)> = chunk
            .code
            .iter()
            .filter(|i| i.opcode() == Some(OpCode::SetList))
            .map(|i| (i.get_b(), i.get_c()))
            .collect();
        assert_eq!(blocks, vec![(50, 1), (10, 2)]);
    }

    #[test]
    fn test_open_call_in_constructor() {
        let chunk = compile("local t = {1, f()}");
        let setlist = chunk
            .code
            .iter()
            .find(|i| i.opcode() == Some(OpCode::SetList))
            .unwrap();
        assert_eq!(setlist.get_b(), 0);
        let call = chunk
            .code
            .iter()
            .find(|i| i.opcode() == Some(OpCode::Call))
            .unwrap();
        assert_eq!(call.get_c(), 0);
    }

    #[test]
    fn test_tail_call() {
        let chunk = compile("return f(1)");
        let code = &chunk.code;
        let n = code.len();
        assert_eq!(code[n - 3].opcode(), Some(OpCode::TailCall));
        assert_eq!(code[n - 2].opcode(), Some(OpCode::Return));
        assert_eq!(code[n - 2].get_b(), 0);
        let chunk = compile("return (f(1))");
        assert!(!ops(&chunk).contains(&OpCode::TailCall));
    }

    #[test]
    fn test_comparison_value() {
        let chunk = compile("local a, b = ... local c = a < b");
        assert!(ops(&chunk).ends_with(&[
            OpCode::Lt,
            OpCode::Jmp,
            OpCode::LoadBool,
            OpCode::LoadBool,
            OpCode::Return
        ]));
    }

    #[test]
    fn test_swap_assignment() {
        let chunk = compile("local a, b = 1, 2 a, b = b, a");
        let moves: Vec<(u32, u32)> = chunk
            .code
            .iter()
            .filter(|i| i.opcode() == Some(OpCode::Move))
            .map(|i| (i.get_a(), i.get_b()))
            .collect();
        assert_eq!(moves, vec![(2, 1), (3, 0), (1, 3), (0, 2)]);
    }

    #[test]
    fn test_numeric_for_layout() {
        let chunk = compile("for i = 1, 10 do local x = i end");
        let code = &chunk.code;
        let prep = code
            .iter()
            .position(|i| i.opcode() == Some(OpCode::ForPrep))
            .unwrap();
        let lp = code
            .iter()
            .position(|i| i.opcode() == Some(OpCode::ForLoop))
            .unwrap();
        assert_eq!(prep as i32 + 1 + code[prep].get_sbx(), lp as i32);
        assert_eq!(lp as i32 + 1 + code[lp].get_sbx(), prep as i32 + 1);
        let names: Vec<&str> = chunk.loc_vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["(for index)", "(for limit)", "(for step)", "i", "x"]
        );
    }

    #[test]
    fn test_generic_for_layout() {
        let chunk = compile("for k, v in pairs(t) do end");
        let code = &chunk.code;
        let call = code
            .iter()
            .position(|i| i.opcode() == Some(OpCode::TForCall))
            .unwrap();
        assert_eq!(code[call].get_c(), 2);
        assert_eq!(code[call + 1].opcode(), Some(OpCode::TForLoop));
        assert_eq!(code[call + 1].get_a(), code[call].get_a() + 2);
    }

    #[test]
    fn test_captured_local_closes_on_loop_exit() {
        let chunk = compile("while g do local x = 1 f = function() return x end end");
        let closes = chunk
            .code
            .iter()
            .filter(|i| i.opcode() == Some(OpCode::Jmp) && i.get_a() != 0)
            .count();
        assert_eq!(closes, 1);
        let inner = &chunk.child_protos[0];
        assert_eq!(inner.upvalue_descs[0].name, "x");
        assert!(inner.upvalue_descs[0].in_stack);
    }

    #[test]
    fn test_nested_upvalues() {
        let chunk = compile("local a = 1 return function() return function() return a end end");
        let mid = &chunk.child_protos[0];
        let inner = &mid.child_protos[0];
        assert!(mid.upvalue_descs[0].in_stack);
        assert!(!inner.upvalue_descs[0].in_stack);
        assert_eq!(inner.upvalue_descs[0].index, 0);
    }

    #[test]
    fn test_method_definition() {
        let chunk = compile("function obj.m:go(a) return self, a end");
        let f = &chunk.child_protos[0];
        assert_eq!(f.param_count, 2);
        assert_eq!(f.loc_vars[0].name, "self");
    }

    #[test]
    fn test_goto_errors() {
        let msg = compile_err("goto l local x ::l:: print(x)");
        assert_eq!(msg, "test:1: <goto l> at line 1 jumps into the scope of local 'x'");
        let msg = compile_err("do goto nowhere end");
        assert_eq!(msg, "test:1: no visible label 'nowhere' for <goto> at line 1");
        let msg = compile_err("::a:: ::a::");
        assert_eq!(msg, "test:1: label 'a' already defined on line 1");
        // a label at the end of a block is outside the scope of its locals
        compile("do goto l local x ::l:: end");
        compile("for i = 1, 3 do if i == 2 then goto continue end ::continue:: end");
    }

    #[test]
    fn test_register_limit() {
        let names: Vec<String> = (0..201).map(|i| format!("v{}", i)).collect();
        let msg = compile_err(&format!("local {}", names.join(", ")));
        assert!(msg.contains("too many local variables (limit is 200) in main function"));
    }

    #[test]
    fn test_peephole_can_be_disabled() {
        let src = "local a local b local c = a";
        let optimized = compile(src);
        let plain = compile_mode(src, CompileMode::NO_PEEPHOLE);
        assert!(optimized.code.len() < plain.code.len());
        let nils = optimized
            .code
            .iter()
            .filter(|i| i.opcode() == Some(OpCode::LoadNil))
            .count();
        assert_eq!(nils, 1);
    }

    #[test]
    fn test_load_accepts_binary() {
        let compiler = Compiler::default();
        let chunk = compile("local s = 'hi' return s .. '!'");
        let mut data = Vec::new();
        compiler.dump(&mut data, &chunk).unwrap();
        let loaded = compiler.load(data.as_slice(), "=bin").unwrap();
        assert_eq!(loaded.code, chunk.code);
        assert_eq!(loaded.constants.len(), chunk.constants.len());
        let bad = compiler.load(&b"\x1bLua\x52"[..], "=bad").unwrap_err();
        assert!(bad.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_stripped_dump_drops_debug_info() {
        let compiler = Compiler::new(CompileMode::STRIP_DEBUG_INFO);
        let chunk = compile("local a = 1 return a");
        let mut data = Vec::new();
        compiler.dump(&mut data, &chunk).unwrap();
        let loaded = compiler.undump(data.as_slice(), "=stripped").unwrap();
        assert!(loaded.loc_vars.is_empty());
        assert!(loaded.line_info.is_empty());
        assert_eq!(
            loaded.code.iter().map(|i| i.as_u32()).collect::<Vec<_>>(),
            chunk.code.iter().map(|i| i.as_u32()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_instruction_operands_in_range() {
        let chunk = compile(
            "local t = setmetatable({}, {__index = function(t, k) return k * 2 end})
             local s = 0
             for i = 1, 10, 2 do s = s + t[i] end
             repeat local y = s s = s - 1 until y < 3
             return s, ...",
        );
        for child in chunk.child_protos.iter() {
            child.validate().unwrap();
        }
        let last = chunk.code[chunk.code.len() - 2];
        assert_eq!(last.opcode(), Some(OpCode::Return));
        assert_eq!(last.get_b(), 0);
    }
}
