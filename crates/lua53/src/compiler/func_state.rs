// Per-function code generation state: registers, scopes, locals, upvalues,
// labels and pending gotos (after lparser.c FuncState / BlockCnt).

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::compiler::code;
use crate::compiler::parser::{Position, SyntaxError};
use crate::compiler::{CompileMode, CompileResult};
use crate::lua_value::{Chunk, LocVar, LuaValue, UpvalueDesc};
use crate::lua_vm::lua_limits::{MAXREGS, MAXUPVAL, MAXVARS};

/// Key of the constant pool side map. Floats are keyed by bit pattern so
/// `0.0` and `-0.0` stay distinct, and never collide with integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Vec<u8>),
}

impl ConstKey {
    pub fn of(value: &LuaValue) -> Option<ConstKey> {
        Some(match value {
            LuaValue::Nil => ConstKey::Nil,
            LuaValue::Boolean(b) => ConstKey::Bool(*b),
            LuaValue::Integer(i) => ConstKey::Int(*i),
            LuaValue::Float(f) => ConstKey::Float(f.to_bits()),
            LuaValue::String(s) => ConstKey::Str(s.as_bytes().to_vec()),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockCnt {
    /// index of the first label of this block
    pub first_label: usize,
    /// index of the first pending goto of this block
    pub first_goto: usize,
    /// number of active locals outside the block
    pub nactvar: u32,
    /// some local of the block is captured by a closure
    pub has_upval: bool,
    pub is_loop: bool,
}

/// A label or a pending goto.
#[derive(Debug, Clone)]
pub struct LabelDesc {
    pub name: SmolStr,
    pub pc: usize,
    pub line: u32,
    /// active locals at that position
    pub nactvar: u32,
}

/// Where a name lives, seen from the current function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLoc {
    Local(u32),
    Upval(u32),
    Global,
}

pub struct FuncState {
    /// enclosing function, `None` for the main chunk
    pub parent: Option<Box<FuncState>>,
    pub chunk: Chunk,
    pub mode: CompileMode,
    pub blocks: Vec<BlockCnt>,
    /// `chunk.loc_vars` index of every declared local; the first
    /// `nactvar` are in scope and local `i` lives in register `i`
    pub actvar: Vec<usize>,
    pub nactvar: u32,
    /// first free register
    pub freereg: u32,
    pub pending_gotos: Vec<LabelDesc>,
    pub labels: Vec<LabelDesc>,
    /// pc of the last jump target
    pub last_target: usize,
    /// temporaries may not be folded away by the peephole pass
    pub locktmp: bool,
    /// line given to emitted instructions
    pub line: u32,
    constants: HashMap<ConstKey, u32, ahash::RandomState>,
    pub(crate) fold_cache: HashMap<usize, Option<LuaValue>, ahash::RandomState>,
}

impl FuncState {
    pub fn new(source: SmolStr, mode: CompileMode) -> Self {
        FuncState {
            parent: None,
            chunk: Chunk::new(source),
            mode,
            blocks: Vec::new(),
            actvar: Vec::new(),
            nactvar: 0,
            freereg: 0,
            pending_gotos: Vec::new(),
            labels: Vec::new(),
            last_target: 0,
            locktmp: false,
            line: 1,
            constants: HashMap::default(),
            fold_cache: HashMap::default(),
        }
    }

    /// State of the main chunk: vararg, with `_ENV` as its only upvalue.
    pub fn new_main(source: SmolStr, mode: CompileMode) -> Self {
        let mut fs = FuncState::new(source, mode);
        fs.chunk.is_vararg = true;
        fs.chunk.upvalue_descs.push(UpvalueDesc {
            name: SmolStr::new_static("_ENV"),
            in_stack: true,
            index: 0,
        });
        fs
    }

    pub fn pc(&self) -> usize {
        self.chunk.code.len()
    }

    pub fn is_main(&self) -> bool {
        self.parent.is_none()
    }

    /// Error at the line currently being compiled.
    pub fn error(&self, msg: impl Into<String>) -> SyntaxError {
        self.error_at(self.line, msg)
    }

    pub fn error_at(&self, line: u32, msg: impl Into<String>) -> SyntaxError {
        SyntaxError::new(Position::new(self.chunk.source.clone(), line, 0), msg)
    }

    fn limit_error(&self, what: &str, limit: usize) -> SyntaxError {
        let owner = if self.is_main() {
            "main function".to_string()
        } else {
            format!("function at line {}", self.chunk.line_defined)
        };
        self.error(format!("too many {} (limit is {}) in {}", what, limit, owner))
    }

    // ---------------------------------------------------------------
    // registers

    pub fn reserve_regs(&mut self, n: u32) -> CompileResult<u32> {
        let first = self.freereg;
        let top = first + n;
        if top > MAXREGS {
            return Err(self.error("function or expression needs too many registers"));
        }
        if top > self.chunk.max_stack_size as u32 {
            self.chunk.max_stack_size = top as u8;
        }
        self.freereg = top;
        Ok(first)
    }

    /// Makes sure `n` registers above the first free one fit in the frame.
    pub fn check_stack(&mut self, n: u32) -> CompileResult<()> {
        let top = self.freereg + n;
        if top > MAXREGS {
            return Err(self.error("function or expression needs too many registers"));
        }
        if top > self.chunk.max_stack_size as u32 {
            self.chunk.max_stack_size = top as u8;
        }
        Ok(())
    }

    /// Whether `reg` is a temporary the peephole pass may discard.
    pub fn is_dead_temp(&self, reg: u32) -> bool {
        reg >= self.nactvar && !self.locktmp
    }

    // ---------------------------------------------------------------
    // constants

    pub fn add_constant(&mut self, value: LuaValue) -> u32 {
        let Some(key) = ConstKey::of(&value) else {
            return 0;
        };
        if let Some(&idx) = self.constants.get(&key) {
            return idx;
        }
        let idx = self.chunk.constants.len() as u32;
        self.chunk.constants.push(value);
        self.constants.insert(key, idx);
        idx
    }

    // ---------------------------------------------------------------
    // locals

    /// Declares a local; it becomes visible with `adjust_locals`.
    pub fn new_local(&mut self, name: &str) -> CompileResult<()> {
        if self.actvar.len() + 1 > MAXVARS {
            return Err(self.limit_error("local variables", MAXVARS));
        }
        self.chunk.loc_vars.push(LocVar {
            name: SmolStr::new(name),
            start_pc: 0,
            end_pc: 0,
        });
        self.actvar.push(self.chunk.loc_vars.len() - 1);
        Ok(())
    }

    /// Brings the last `n` declared locals into scope.
    pub fn adjust_locals(&mut self, n: u32) {
        let pc = self.pc() as u32;
        for i in self.nactvar..self.nactvar + n {
            if let Some(&lv) = self.actvar.get(i as usize) {
                self.chunk.loc_vars[lv].start_pc = pc;
            }
        }
        self.nactvar += n;
    }

    /// Ends the scope of every local from `level` up.
    pub fn remove_vars(&mut self, level: u32) {
        let pc = self.pc() as u32;
        for i in level..self.nactvar {
            if let Some(&lv) = self.actvar.get(i as usize) {
                self.chunk.loc_vars[lv].end_pc = pc;
            }
        }
        self.actvar.truncate(level as usize);
        self.nactvar = level;
    }

    pub fn local_name(&self, reg: u32) -> Option<&SmolStr> {
        let lv = *self.actvar.get(reg as usize)?;
        self.chunk.loc_vars.get(lv).map(|v| &v.name)
    }

    fn find_local(&self, name: &str) -> Option<u32> {
        (0..self.nactvar)
            .rev()
            .find(|&reg| self.local_name(reg).is_some_and(|n| n == name))
    }

    fn find_upval(&self, name: &str) -> Option<u32> {
        self.chunk
            .upvalue_descs
            .iter()
            .position(|uv| uv.name == name)
            .map(|i| i as u32)
    }

    fn new_upval(&mut self, name: &str, in_stack: bool, index: u32) -> CompileResult<u32> {
        if self.chunk.upvalue_descs.len() + 1 > MAXUPVAL {
            return Err(self.limit_error("upvalues", MAXUPVAL));
        }
        self.chunk.upvalue_descs.push(UpvalueDesc {
            name: SmolStr::new(name),
            in_stack,
            index: index as u8,
        });
        Ok(self.chunk.upvalue_descs.len() as u32 - 1)
    }

    /// Marks the block owning local `reg` as needing to close upvalues.
    fn mark_upval(&mut self, reg: u32) {
        if let Some(bl) = self.blocks.iter_mut().rev().find(|bl| bl.nactvar <= reg) {
            bl.has_upval = true;
        }
    }

    /// Resolves `name` to a local, an upvalue (created on demand along the
    /// chain of enclosing functions) or a global.
    pub fn resolve(&mut self, name: &str) -> CompileResult<VarLoc> {
        self.resolve_in(name, true)
    }

    fn resolve_in(&mut self, name: &str, base: bool) -> CompileResult<VarLoc> {
        if let Some(reg) = self.find_local(name) {
            if !base {
                self.mark_upval(reg);
            }
            return Ok(VarLoc::Local(reg));
        }
        if let Some(idx) = self.find_upval(name) {
            return Ok(VarLoc::Upval(idx));
        }
        let outer = match self.parent.as_deref_mut() {
            None => return Ok(VarLoc::Global),
            Some(parent) => parent.resolve_in(name, false)?,
        };
        match outer {
            VarLoc::Local(reg) => Ok(VarLoc::Upval(self.new_upval(name, true, reg)?)),
            VarLoc::Upval(idx) => Ok(VarLoc::Upval(self.new_upval(name, false, idx)?)),
            VarLoc::Global => Ok(VarLoc::Global),
        }
    }

    // ---------------------------------------------------------------
    // blocks, labels and gotos

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockCnt {
            first_label: self.labels.len(),
            first_goto: self.pending_gotos.len(),
            nactvar: self.nactvar,
            has_upval: false,
            is_loop,
        });
    }

    pub fn leave_block(&mut self) -> CompileResult<()> {
        let Some(bl) = self.blocks.last().cloned() else {
            return Err(self.error("no block to leave"));
        };
        let inner = self.blocks.len() > 1;
        if inner && bl.has_upval {
            let j = code::jump(self);
            code::patch_close(self, j, bl.nactvar);
            code::patch_to_here(self, &[j])?;
        }
        if bl.is_loop {
            self.break_label()?;
        }
        self.blocks.pop();
        self.remove_vars(bl.nactvar);
        self.freereg = self.nactvar;
        self.labels.truncate(bl.first_label);
        if inner {
            self.move_gotos_out(&bl)?;
        } else if let Some(gt) = self.pending_gotos.get(bl.first_goto) {
            return Err(self.undefined_goto(gt));
        }
        Ok(())
    }

    fn undefined_goto(&self, gt: &LabelDesc) -> SyntaxError {
        let msg = if gt.name == "break" {
            format!("<{}> at line {} not inside a loop", gt.name, gt.line)
        } else {
            format!("no visible label '{}' for <goto> at line {}", gt.name, gt.line)
        };
        self.error_at(gt.line, msg)
    }

    fn break_label(&mut self) -> CompileResult<()> {
        let pc = code::mark_label(self);
        self.labels.push(LabelDesc {
            name: SmolStr::new_static("break"),
            pc,
            line: 0,
            nactvar: self.nactvar,
        });
        self.find_gotos(self.labels.len() - 1)
    }

    /// Resolves pending gotos of the current block that target label `l`.
    pub fn find_gotos(&mut self, l: usize) -> CompileResult<()> {
        let first = self.blocks.last().map(|b| b.first_goto).unwrap_or(0);
        let mut i = first;
        while i < self.pending_gotos.len() {
            if self.pending_gotos[i].name == self.labels[l].name {
                let label = self.labels[l].clone();
                self.close_goto(i, &label)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn close_goto(&mut self, g: usize, label: &LabelDesc) -> CompileResult<()> {
        let gt = self.pending_gotos[g].clone();
        if gt.nactvar < label.nactvar {
            let var = self.local_name(gt.nactvar).cloned().unwrap_or_default();
            return Err(self.error_at(
                gt.line,
                format!(
                    "<goto {}> at line {} jumps into the scope of local '{}'",
                    gt.name, gt.line, var
                ),
            ));
        }
        code::patch(self, gt.pc, label.pc)?;
        self.pending_gotos.remove(g);
        Ok(())
    }

    /// Tries to close pending goto `g` with a visible label of the current
    /// block; returns whether it was resolved.
    pub fn find_label(&mut self, g: usize) -> CompileResult<bool> {
        let first = self.blocks.last().map(|b| b.first_label).unwrap_or(0);
        let gt = self.pending_gotos[g].clone();
        for i in first..self.labels.len() {
            if self.labels[i].name == gt.name {
                let label = self.labels[i].clone();
                if gt.nactvar > label.nactvar {
                    code::patch_close(self, gt.pc, label.nactvar);
                }
                self.close_goto(g, &label)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Moves the pending gotos of a block just left to the enclosing block.
    fn move_gotos_out(&mut self, bl: &BlockCnt) -> CompileResult<()> {
        let mut i = bl.first_goto;
        while i < self.pending_gotos.len() {
            if self.pending_gotos[i].nactvar > bl.nactvar {
                if bl.has_upval {
                    let pc = self.pending_gotos[i].pc;
                    code::patch_close(self, pc, bl.nactvar);
                }
                self.pending_gotos[i].nactvar = bl.nactvar;
            }
            if !self.find_label(i)? {
                i += 1;
            }
        }
        Ok(())
    }

    /// Registers a goto (or `break`) whose jump is at `pc`.
    pub fn new_goto(&mut self, name: &str, line: u32, pc: usize) -> CompileResult<()> {
        self.pending_gotos.push(LabelDesc {
            name: SmolStr::new(name),
            pc,
            line,
            nactvar: self.nactvar,
        });
        let g = self.pending_gotos.len() - 1;
        self.find_label(g)?;
        Ok(())
    }

    /// Declares a label at the current position. `block_end` tells that only
    /// no-op statements follow it, so the block's locals are already dead.
    pub fn new_label(&mut self, name: &str, line: u32, block_end: bool) -> CompileResult<()> {
        let first = self.blocks.last().map(|b| b.first_label).unwrap_or(0);
        if let Some(prev) = self.labels[first..].iter().find(|l| l.name == name) {
            return Err(self.error_at(
                line,
                format!("label '{}' already defined on line {}", name, prev.line),
            ));
        }
        let pc = code::mark_label(self);
        let nactvar = match self.blocks.last() {
            Some(bl) if block_end => bl.nactvar,
            _ => self.nactvar,
        };
        self.labels.push(LabelDesc {
            name: SmolStr::new(name),
            pc,
            line,
            nactvar,
        });
        self.find_gotos(self.labels.len() - 1)
    }
}
