// Debug interface: error positions, variable names for error messages,
// tracebacks, frame inspection and hooks. Follows ldebug.c of Lua 5.3.

use std::rc::Rc;

use log::debug;

use crate::compiler::parser::chunk_id;
use crate::lua_value::{Chunk, LuaFunction, LuaValue};
use crate::lua_vm::hook_mask::MASK_COUNT;
use crate::lua_vm::{CallInfo, ErrorKind, Hook, Instruction, LuaError, LuaResult, LuaVM, OpCode};

/// What `debug.getinfo` reports about a function or an active frame.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub source: String,
    pub short_src: String,
    /// "Lua", "C" or "main"
    pub what: &'static str,
    /// -1 when not available
    pub current_line: i64,
    pub line_defined: i64,
    pub last_line_defined: i64,
    pub nups: usize,
    pub nparams: usize,
    pub is_vararg: bool,
    pub is_tail_call: bool,
    pub name: Option<String>,
    /// "global", "local", "method", "field", "upvalue", "metamethod",
    /// "for iterator" or ""
    pub namewhat: &'static str,
    pub func: LuaValue,
    pub active_lines: Vec<u32>,
}

/// Name of a register at `lastpc`, as `(kind, name)`.
fn getobjname(chunk: &Chunk, lastpc: usize, reg: u32) -> Option<(&'static str, String)> {
    if let Some(name) = chunk.local_name(reg as usize + 1, lastpc) {
        return Some(("local", name.to_string()));
    }
    let pc = findsetreg(chunk, lastpc, reg)?;
    let i = chunk.code[pc];
    match i.opcode()? {
        OpCode::Move => {
            let b = i.get_b();
            if b < i.get_a() { getobjname(chunk, pc, b) } else { None }
        }
        op @ (OpCode::GetTabUp | OpCode::GetTable) => {
            let t = i.get_b();
            let table_name = if op == OpCode::GetTable {
                chunk.local_name(t as usize + 1, pc).map(|s| s.to_string())
            } else {
                upvalue_name(chunk, t as usize)
            };
            let key = constant_name(chunk, pc, i.get_c());
            let kind = if table_name.as_deref() == Some("_ENV") { "global" } else { "field" };
            Some((kind, key))
        }
        OpCode::GetUpval => Some(("upvalue", upvalue_name(chunk, i.get_b() as usize)?)),
        op @ (OpCode::LoadK | OpCode::LoadKX) => {
            let idx = if op == OpCode::LoadK {
                i.get_bx() as usize
            } else {
                chunk.code.get(pc + 1)?.get_ax() as usize
            };
            match chunk.constants.get(idx)? {
                LuaValue::String(s) => Some(("constant", s.to_str_lossy())),
                _ => None,
            }
        }
        OpCode::Self_ => Some(("method", constant_name(chunk, pc, i.get_c()))),
        _ => None,
    }
}

/// Name of an RK operand used as a key: the string constant or "?".
fn constant_name(chunk: &Chunk, pc: usize, c: u32) -> String {
    if Instruction::is_k(c) {
        if let Some(LuaValue::String(s)) = chunk.constants.get(Instruction::rk_index(c) as usize) {
            return s.to_str_lossy();
        }
    } else if let Some(("constant", name)) = getobjname(chunk, pc, c) {
        return name;
    }
    "?".to_string()
}

fn upvalue_name(chunk: &Chunk, idx: usize) -> Option<String> {
    let desc = chunk.upvalue_descs.get(idx)?;
    if desc.name.is_empty() {
        Some("?".to_string())
    } else {
        Some(desc.name.to_string())
    }
}

/// Last instruction before `lastpc` that changed `reg`, ignoring
/// instructions skipped by a forward jump.
fn findsetreg(chunk: &Chunk, lastpc: usize, reg: u32) -> Option<usize> {
    let mut setreg = None;
    let mut jmptarget = 0usize;
    for (pc, i) in chunk.code.iter().enumerate().take(lastpc) {
        let Some(op) = i.opcode() else { continue };
        let a = i.get_a();
        let change = match op {
            OpCode::LoadNil => a <= reg && reg <= a + i.get_b(),
            OpCode::TForCall => reg >= a + 2,
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + i.get_sbx() as i64;
                if (pc as i64) < dest && dest <= lastpc as i64 && dest as usize > jmptarget {
                    jmptarget = dest as usize;
                }
                false
            }
            _ => op.sets_a() && reg == a,
        };
        if change {
            setreg = if pc < jmptarget { None } else { Some(pc) };
        }
    }
    setreg
}

impl LuaVM {
    fn frame_at_level(&self, level: usize) -> Option<(usize, &CallInfo)> {
        let idx = self.state.frames.len().checked_sub(level + 1)?;
        Some((idx, &self.state.frames[idx]))
    }

    /// `chunkname:line: ` of the function at `level`, or "".
    pub fn where_(&self, level: usize) -> String {
        if let Some((_, ci)) = self.frame_at_level(level)
            && let Some(chunk) = ci.chunk()
            && let Some(line) = ci.current_line()
        {
            return format!("{}:{}: ", chunk_id(&chunk.source), line);
        }
        String::new()
    }

    /// Runtime error positioned at the running Lua function, or at the
    /// caller of the running native.
    pub fn rt_error(&self, kind: ErrorKind, msg: impl Into<String>) -> LuaError {
        let level = match self.state.frames.last() {
            Some(ci) if ci.is_lua() => 0,
            _ => 1,
        };
        LuaError::runtime(kind, format!("{}{}", self.where_(level), msg.into()))
    }

    /// "attempt to `op` a X value (local 'y')"
    pub fn type_error(&self, v: &LuaValue, op: &str) -> LuaError {
        let kind = match op {
            "index" => ErrorKind::Index,
            "call" => ErrorKind::Call,
            "concatenate" => ErrorKind::Concat,
            "get length of" => ErrorKind::Length,
            "perform arithmetic on" => ErrorKind::Arith,
            "perform bitwise operation on" => ErrorKind::Bitwise,
            _ => ErrorKind::Type,
        };
        let msg = format!("attempt to {} a {} value{}", op, self.type_name_of(v), self.varinfo(v));
        self.rt_error(kind, msg)
    }

    /// Describes where `v` came from when it is an operand of the
    /// instruction being executed.
    fn varinfo(&self, v: &LuaValue) -> String {
        let Some(ci) = self.state.frames.last() else {
            return String::new();
        };
        let Some(closure) = ci.func.as_lua() else {
            return String::new();
        };
        let chunk = &closure.chunk;
        let pc = ci.current_pc();
        let Some(i) = chunk.code.get(pc).copied() else {
            return String::new();
        };
        let stack = &self.state.stack;
        let is_reg = |r: u32| stack.get(ci.base + r as usize).is_some_and(|x| x.raw_equal(v));
        let reg_name = |r: u32| if is_reg(r) { getobjname(chunk, pc, r) } else { None };
        let upval = |u: u32| {
            let uv = closure.upvalues.borrow().get(u as usize).cloned()?;
            if self.upvalue_get(&uv).raw_equal(v) {
                Some(("upvalue", upvalue_name(chunk, u as usize)?))
            } else {
                None
            }
        };
        let found = match i.opcode() {
            Some(OpCode::GetTable | OpCode::Self_ | OpCode::Unm | OpCode::BNot | OpCode::Len) => {
                reg_name(i.get_b())
            }
            Some(OpCode::GetTabUp) => upval(i.get_b()),
            Some(OpCode::SetTable | OpCode::Call | OpCode::TailCall) => reg_name(i.get_a()),
            Some(OpCode::SetTabUp) => upval(i.get_a()),
            Some(OpCode::TForCall) => Some(("for iterator", "for iterator".to_string())),
            Some(OpCode::Concat) => (i.get_b()..=i.get_c()).find(|r| is_reg(*r)).and_then(|r| getobjname(chunk, pc, r)),
            Some(
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Mod
                | OpCode::Pow
                | OpCode::Div
                | OpCode::IDiv
                | OpCode::BAnd
                | OpCode::BOr
                | OpCode::BXor
                | OpCode::Shl
                | OpCode::Shr,
            ) => [i.get_b(), i.get_c()]
                .into_iter()
                .find(|r| !Instruction::is_k(*r) && is_reg(*r))
                .and_then(|r| getobjname(chunk, pc, r)),
            _ => None,
        };
        match found {
            Some((kind, name)) => format!(" ({} '{}')", kind, name),
            None => String::new(),
        }
    }

    /// How the function of frame `idx` was called, from the calling
    /// instruction of its caller.
    fn funcname_of(&self, idx: usize) -> Option<(&'static str, String)> {
        let ci = &self.state.frames[idx];
        if ci.is_tail() {
            return None;
        }
        let caller = &self.state.frames[idx.checked_sub(1)?];
        let chunk = caller.chunk()?;
        let pc = caller.current_pc();
        let i = *chunk.code.get(pc)?;
        let a = caller.base + i.get_a() as usize;
        let tm = match i.opcode()? {
            OpCode::Call | OpCode::TailCall if a == ci.func_idx => {
                return getobjname(chunk, pc, i.get_a());
            }
            OpCode::TForCall if a + 3 == ci.func_idx => {
                return Some(("for iterator", "for iterator".to_string()));
            }
            OpCode::Self_ | OpCode::GetTabUp | OpCode::GetTable => "index",
            OpCode::SetTabUp | OpCode::SetTable => "newindex",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Mod => "mod",
            OpCode::Pow => "pow",
            OpCode::Div => "div",
            OpCode::IDiv => "idiv",
            OpCode::BAnd => "band",
            OpCode::BOr => "bor",
            OpCode::BXor => "bxor",
            OpCode::Shl => "shl",
            OpCode::Shr => "shr",
            OpCode::Unm => "unm",
            OpCode::BNot => "bnot",
            OpCode::Len => "len",
            OpCode::Concat => "concat",
            OpCode::Eq => "eq",
            OpCode::Lt => "lt",
            OpCode::Le => "le",
            _ => return None,
        };
        Some(("metamethod", tm.to_string()))
    }

    /// Name to report in "bad argument" errors of the running native:
    /// `(name, is_method)`.
    pub(crate) fn current_native_name(&self) -> (String, bool) {
        let Some(idx) = self.state.frames.len().checked_sub(1) else {
            return ("?".to_string(), false);
        };
        if let Some((kind, name)) = self.funcname_of(idx) {
            return (name, kind == "method");
        }
        match self.state.frames[idx].func.as_ref() {
            LuaFunction::Native(n) => (n.name.to_string(), false),
            LuaFunction::Lua(_) => ("?".to_string(), false),
        }
    }

    fn function_info(&self, func: &Rc<LuaFunction>) -> DebugInfo {
        match func.as_ref() {
            LuaFunction::Lua(c) => {
                let chunk = &c.chunk;
                let mut active_lines: Vec<u32> = chunk.line_info.clone();
                active_lines.sort_unstable();
                active_lines.dedup();
                DebugInfo {
                    source: chunk.source.to_string(),
                    short_src: chunk_id(&chunk.source),
                    what: if chunk.line_defined == 0 { "main" } else { "Lua" },
                    current_line: -1,
                    line_defined: chunk.line_defined as i64,
                    last_line_defined: chunk.last_line_defined as i64,
                    nups: chunk.upvalue_descs.len(),
                    nparams: chunk.param_count as usize,
                    is_vararg: chunk.is_vararg,
                    is_tail_call: false,
                    name: None,
                    namewhat: "",
                    func: LuaValue::Function(func.clone()),
                    active_lines,
                }
            }
            LuaFunction::Native(_) => DebugInfo {
                source: "=[C]".to_string(),
                short_src: "[C]".to_string(),
                what: "C",
                current_line: -1,
                line_defined: -1,
                last_line_defined: -1,
                nups: 0,
                nparams: 0,
                is_vararg: true,
                is_tail_call: false,
                name: None,
                namewhat: "",
                func: LuaValue::Function(func.clone()),
                active_lines: Vec::new(),
            },
        }
    }

    /// Frame `level` of the running coroutine; 0 is the running function.
    pub fn get_info(&self, level: usize) -> Option<DebugInfo> {
        let (idx, ci) = self.frame_at_level(level)?;
        let mut info = self.function_info(&ci.func);
        info.current_line = ci.current_line().map_or(-1, |l| l as i64);
        info.is_tail_call = ci.is_tail();
        if let Some((namewhat, name)) = self.funcname_of(idx) {
            info.namewhat = namewhat;
            info.name = Some(name);
        }
        Some(info)
    }

    /// `debug.getinfo(f)` for a function value.
    pub fn get_function_info(&self, f: &LuaValue) -> Option<DebugInfo> {
        f.as_function().map(|f| self.function_info(f))
    }

    /// `stack traceback:` listing from frame `level` outwards.
    pub fn traceback(&self, msg: Option<&str>, level: usize) -> String {
        let mut out = String::new();
        if let Some(msg) = msg {
            out.push_str(msg);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let count = self.state.frames.len().saturating_sub(level);
        for idx in (0..count).rev() {
            let ci = &self.state.frames[idx];
            match ci.func.as_ref() {
                LuaFunction::Native(n) => {
                    out.push_str(&format!("\n\t[C]: in function '{}'", n.name));
                }
                LuaFunction::Lua(c) => {
                    let chunk = &c.chunk;
                    out.push_str("\n\t");
                    out.push_str(&chunk_id(&chunk.source));
                    out.push(':');
                    if let Some(line) = ci.current_line() {
                        out.push_str(&format!("{}:", line));
                    }
                    let desc = match self.funcname_of(idx) {
                        Some(("global", name)) => format!("function '{}'", name),
                        Some((kind, name)) => format!("{} '{}'", kind, name),
                        None if chunk.line_defined == 0 => "main chunk".to_string(),
                        None => format!("function <{}:{}>", chunk_id(&chunk.source), chunk.line_defined),
                    };
                    out.push_str(" in ");
                    out.push_str(&desc);
                }
            }
            if ci.is_tail() {
                out.push_str("\n\t(...tail calls...)");
            }
        }
        out
    }

    /// Name and value of local `n` of frame `level`. Negative `n` selects
    /// varargs.
    pub fn get_local(&self, level: usize, n: i64) -> Option<(String, LuaValue)> {
        let (_, ci) = self.frame_at_level(level)?;
        let chunk = ci.chunk()?;
        if n < 0 {
            let v = ci.varargs.get((-n - 1) as usize)?;
            return Some(("(*vararg)".to_string(), v.clone()));
        }
        let slot = self.local_slot(ci, chunk, n)?;
        let name = chunk
            .local_name(n as usize, ci.current_pc())
            .map_or_else(|| "(*temporary)".to_string(), |s| s.to_string());
        Some((name, self.state.stack.get(slot).cloned().unwrap_or_default()))
    }

    /// Assigns local `n` of frame `level`; returns its name.
    pub fn set_local(&mut self, level: usize, n: i64, value: LuaValue) -> Option<String> {
        let (idx, ci) = self.frame_at_level(level)?;
        let chunk = ci.chunk()?.clone();
        if n < 0 {
            let slot = self.state.frames[idx].varargs.get_mut((-n - 1) as usize)?;
            *slot = value;
            return Some("(*vararg)".to_string());
        }
        let slot = self.local_slot(ci, &chunk, n)?;
        let name = chunk
            .local_name(n as usize, ci.current_pc())
            .map_or_else(|| "(*temporary)".to_string(), |s| s.to_string());
        self.state.stack[slot] = value;
        Some(name)
    }

    fn local_slot(&self, ci: &CallInfo, chunk: &Chunk, n: i64) -> Option<usize> {
        if n <= 0 {
            return None;
        }
        let named = chunk.local_name(n as usize, ci.current_pc()).is_some();
        let slot = ci.base + n as usize - 1;
        (named || slot < ci.frame_top()).then_some(slot)
    }

    /// Name and value of upvalue `n` (1-based) of a Lua function.
    pub fn get_upvalue(&self, f: &LuaValue, n: usize) -> Option<(String, LuaValue)> {
        let closure = f.as_function()?.as_lua()?;
        let uv = closure.upvalues.borrow().get(n.checked_sub(1)?).cloned()?;
        let name = upvalue_name(&closure.chunk, n - 1).unwrap_or_else(|| "?".to_string());
        Some((name, self.upvalue_get(&uv)))
    }

    pub fn set_upvalue(&mut self, f: &LuaValue, n: usize, value: LuaValue) -> Option<String> {
        let closure = f.as_function()?.as_lua()?;
        let uv = closure.upvalues.borrow().get(n.checked_sub(1)?).cloned()?;
        let name = upvalue_name(&closure.chunk, n - 1).unwrap_or_else(|| "?".to_string());
        self.upvalue_set(&uv, value);
        Some(name)
    }

    /// Identity of upvalue `n` of `f`, equal for shared upvalues.
    pub fn upvalue_id(&self, f: &LuaValue, n: usize) -> Option<usize> {
        let closure = f.as_function()?.as_lua()?;
        let uvs = closure.upvalues.borrow();
        let uv = uvs.get(n.checked_sub(1)?)?;
        Some(Rc::as_ptr(uv) as usize)
    }

    /// Makes upvalue `n1` of `f1` refer to upvalue `n2` of `f2`.
    pub fn upvalue_join(&mut self, f1: &LuaValue, n1: usize, f2: &LuaValue, n2: usize) -> LuaResult<()> {
        let target = f2
            .as_function()
            .and_then(|f| f.as_lua())
            .and_then(|c| c.upvalues.borrow().get(n2.wrapping_sub(1)).cloned());
        let Some(target) = target else {
            return Err(self.rt_error(ErrorKind::Index, "invalid upvalue index"));
        };
        let Some(closure) = f1.as_function().and_then(|f| f.as_lua()) else {
            return Err(self.rt_error(ErrorKind::Index, "Lua function expected"));
        };
        let mut uvs = closure.upvalues.borrow_mut();
        match uvs.get_mut(n1.wrapping_sub(1)) {
            Some(slot) => {
                *slot = target;
                Ok(())
            }
            None => {
                drop(uvs);
                Err(self.rt_error(ErrorKind::Index, "invalid upvalue index"))
            }
        }
    }

    /// Installs `func` as hook of the running coroutine; a `None` function
    /// or an empty mask removes it.
    pub fn set_hook(&mut self, func: Option<LuaValue>, mask: u8, count: u32) {
        let mask = if count > 0 { mask | MASK_COUNT } else { mask };
        match func {
            Some(func) if mask != 0 => {
                debug!("hook installed: mask={:#x} count={}", mask, count);
                self.state.hook = Some(Hook { func, mask, count });
                self.state.hook_mask = mask;
                self.state.hook_counter = count;
            }
            _ => {
                debug!("hook removed");
                self.state.hook = None;
                self.state.hook_mask = 0;
                self.state.hook_counter = 0;
            }
        }
    }

    pub fn get_hook(&self) -> Option<Hook> {
        self.state.hook.clone()
    }
}
