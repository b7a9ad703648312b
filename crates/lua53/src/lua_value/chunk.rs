use std::fmt::Write;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::compiler::parser::{chunk_id, quote_string};
use crate::lua_value::LuaValue;
use crate::lua_value::chunk_serializer::LoadError;
use crate::lua_value::lua_convert::number_to_string;
use crate::lua_vm::opcode::{Instruction, OpArgMode, OpCode, OpMode};

/// Upvalue descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub name: SmolStr,
    /// true if it captures a register of the enclosing function, false if
    /// it captures one of the enclosing function's upvalues
    pub in_stack: bool,
    pub index: u8,
}

/// Lifetime of a local variable, in instruction indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocVar {
    pub name: SmolStr,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Compiled function prototype
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub source: SmolStr,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub param_count: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    /// nil, boolean, number and string values only
    pub constants: Vec<LuaValue>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub child_protos: Vec<Rc<Chunk>>,
    /// Line of each instruction; empty when debug info is stripped.
    pub line_info: Vec<u32>,
    pub loc_vars: Vec<LocVar>,
}

impl Chunk {
    pub fn new(source: impl Into<SmolStr>) -> Self {
        Chunk {
            source: source.into(),
            max_stack_size: 2,
            ..Default::default()
        }
    }

    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// Name of the `n`-th local (1-based) active at `pc`, as `getlocal`
    /// counts them.
    pub fn local_name(&self, n: usize, pc: usize) -> Option<&SmolStr> {
        self.loc_vars
            .iter()
            .filter(|v| (v.start_pc as usize) <= pc && pc < v.end_pc as usize)
            .nth(n.checked_sub(1)?)
            .map(|v| &v.name)
    }

    /// Checks the structural invariants the VM relies on: register,
    /// constant, upvalue, prototype and jump operands are in bounds, and
    /// instructions that need a follower have one.
    pub fn validate(&self) -> Result<(), LoadError> {
        let bad = |pc: usize, what: &str| {
            LoadError::Malformed(format!("instruction {} of {}: {}", pc + 1, chunk_id(&self.source), what))
        };
        if self.max_stack_size < 2 || self.max_stack_size < self.param_count {
            return Err(LoadError::Malformed("stack size too small".into()));
        }
        if self.code.is_empty() {
            return Err(LoadError::Malformed("empty function".into()));
        }
        if !self.line_info.is_empty() && self.line_info.len() != self.code.len() {
            return Err(LoadError::Malformed("line info does not match code".into()));
        }
        let stack = self.max_stack_size as u32;
        let nk = self.constants.len() as u32;
        let nup = self.upvalue_descs.len() as u32;
        let reg = |pc: usize, r: u32| {
            if r < stack { Ok(()) } else { Err(bad(pc, "register out of range")) }
        };
        let rk = |pc: usize, x: u32| {
            if Instruction::is_k(x) {
                if Instruction::rk_index(x) < nk { Ok(()) } else { Err(bad(pc, "constant out of range")) }
            } else {
                reg(pc, x)
            }
        };
        for (pc, &inst) in self.code.iter().enumerate() {
            let op = inst.opcode().ok_or_else(|| bad(pc, "bad opcode"))?;
            let (a, b, c) = (inst.get_a(), inst.get_b(), inst.get_c());
            let next = self.code.get(pc + 1).copied();
            if !matches!(
                op,
                OpCode::Jmp | OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::SetTabUp | OpCode::ExtraArg
            ) {
                reg(pc, a)?;
            }
            if op.get_mode() == OpMode::IABC {
                let (bm, cm) = op.arg_modes();
                match bm {
                    OpArgMode::R => reg(pc, b)?,
                    OpArgMode::K => rk(pc, b)?,
                    _ => {}
                }
                match cm {
                    OpArgMode::R => reg(pc, c)?,
                    OpArgMode::K => rk(pc, c)?,
                    _ => {}
                }
            }
            match op {
                OpCode::LoadK if inst.get_bx() >= nk => return Err(bad(pc, "constant out of range")),
                OpCode::LoadKX => match next {
                    Some(e) if e.opcode() == Some(OpCode::ExtraArg) && e.get_ax() < nk => {}
                    _ => return Err(bad(pc, "LOADKX without a valid EXTRAARG")),
                },
                OpCode::LoadNil => reg(pc, a + b)?,
                OpCode::GetUpval | OpCode::SetUpval | OpCode::GetTabUp if b >= nup => {
                    return Err(bad(pc, "upvalue out of range"));
                }
                OpCode::SetTabUp if a >= nup => return Err(bad(pc, "upvalue out of range")),
                OpCode::Self_ => reg(pc, a + 1)?,
                OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
                    let target = pc as i64 + 1 + inst.get_sbx() as i64;
                    if target < 0 || target >= self.code.len() as i64 {
                        return Err(bad(pc, "jump out of range"));
                    }
                    if op == OpCode::Jmp && a > stack {
                        return Err(bad(pc, "close level out of range"));
                    }
                    if matches!(op, OpCode::ForLoop | OpCode::ForPrep) {
                        reg(pc, a + 3)?;
                    }
                }
                OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet
                    if next.and_then(|n| n.opcode()) != Some(OpCode::Jmp) =>
                {
                    return Err(bad(pc, "test not followed by a jump"));
                }
                OpCode::Call | OpCode::TailCall if b > 0 => reg(pc, a + b - 1)?,
                OpCode::Return if b > 1 => reg(pc, a + b - 2)?,
                OpCode::TForCall => {
                    reg(pc, a + 2 + c)?;
                    if next.and_then(|n| n.opcode()) != Some(OpCode::TForLoop) {
                        return Err(bad(pc, "TFORCALL not followed by TFORLOOP"));
                    }
                }
                OpCode::SetList => {
                    if b > 0 {
                        reg(pc, a + b)?;
                    }
                    if c == 0 && next.and_then(|n| n.opcode()) != Some(OpCode::ExtraArg) {
                        return Err(bad(pc, "SETLIST without EXTRAARG"));
                    }
                }
                OpCode::Closure if inst.get_bx() as usize >= self.child_protos.len() => {
                    return Err(bad(pc, "prototype out of range"));
                }
                OpCode::Vararg if b > 1 => reg(pc, a + b - 2)?,
                _ => {}
            }
        }
        if self.code.last().and_then(|i| i.opcode()) != Some(OpCode::Return) {
            return Err(LoadError::Malformed("function does not end with RETURN".into()));
        }
        for var in &self.loc_vars {
            if var.start_pc > var.end_pc || var.end_pc as usize > self.code.len() {
                return Err(LoadError::Malformed(format!("bad lifetime for local '{}'", var.name)));
            }
        }
        for child in &self.child_protos {
            if child.upvalue_descs.iter().any(|u| {
                if u.in_stack { u.index as u32 >= stack } else { u.index as u32 >= nup }
            }) {
                return Err(LoadError::Malformed("upvalue descriptor out of range".into()));
            }
            child.validate()?;
        }
        Ok(())
    }

    /// `luac -l -l` style listing of this function and its children.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, true);
        out
    }

    fn disassemble_into(&self, out: &mut String, main: bool) {
        let name = chunk_id(&self.source);
        let _ = writeln!(
            out,
            "\n{} <{}:{},{}> ({} instructions)",
            if main { "main" } else { "function" },
            name,
            self.line_defined,
            self.last_line_defined,
            self.code.len()
        );
        let _ = writeln!(
            out,
            "{}{} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
            self.param_count,
            if self.is_vararg { "+" } else { "" },
            self.max_stack_size,
            self.upvalue_descs.len(),
            self.loc_vars.len(),
            self.constants.len(),
            self.child_protos.len()
        );
        for (pc, inst) in self.code.iter().enumerate() {
            let line = match self.line_at(pc) {
                Some(l) => format!("[{}]", l),
                None => "[-]".to_string(),
            };
            let _ = writeln!(out, "\t{}\t{}\t{}", pc + 1, line, self.describe(pc, *inst));
        }
        let _ = writeln!(out, "constants ({}):", self.constants.len());
        for (i, k) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "\t{}\t{}", i + 1, constant_text(k));
        }
        let _ = writeln!(out, "locals ({}):", self.loc_vars.len());
        for (i, v) in self.loc_vars.iter().enumerate() {
            let _ = writeln!(out, "\t{}\t{}\t{}\t{}", i, v.name, v.start_pc + 1, v.end_pc + 1);
        }
        let _ = writeln!(out, "upvalues ({}):", self.upvalue_descs.len());
        for (i, u) in self.upvalue_descs.iter().enumerate() {
            let _ = writeln!(out, "\t{}\t{}\t{}\t{}", i, u.name, u.in_stack as u8, u.index);
        }
        for child in &self.child_protos {
            child.disassemble_into(out, false);
        }
    }

    fn describe(&self, pc: usize, inst: Instruction) -> String {
        let Some(op) = inst.opcode() else {
            return format!("<bad opcode {}>", inst.raw_opcode());
        };
        let (a, b, c) = (inst.get_a(), inst.get_b(), inst.get_c());
        let rk = |x: u32| -> i64 {
            if Instruction::is_k(x) { -1 - Instruction::rk_index(x) as i64 } else { x as i64 }
        };
        let kidx = |i: u32| -> String {
            self.constants
                .get(i as usize)
                .map(constant_text)
                .unwrap_or_else(|| "?".into())
        };
        let k = |x: u32| kidx(Instruction::rk_index(x));
        let upname = |i: u32| -> String {
            self.upvalue_descs
                .get(i as usize)
                .map(|u| u.name.to_string())
                .unwrap_or_else(|| "-".into())
        };
        let rk_note = |x: u32| -> String {
            if Instruction::is_k(x) { k(x) } else { "-".into() }
        };
        let operands = match op.get_mode() {
            OpMode::IABC => {
                let (bm, cm) = op.arg_modes();
                let mut s = format!("{}", a);
                if bm != OpArgMode::N {
                    s.push_str(&format!(" {}", if bm == OpArgMode::K { rk(b) } else { b as i64 }));
                }
                if cm != OpArgMode::N {
                    s.push_str(&format!(" {}", if cm == OpArgMode::K { rk(c) } else { c as i64 }));
                }
                s
            }
            OpMode::IABx => match op {
                OpCode::LoadK => format!("{} {}", a, -1 - inst.get_bx() as i64),
                _ => format!("{} {}", a, inst.get_bx()),
            },
            OpMode::IAsBx => format!("{} {}", a, inst.get_sbx()),
            OpMode::IAx => format!("{}", -1 - inst.get_ax() as i64),
        };
        let note = match op {
            OpCode::LoadK => Some(kidx(inst.get_bx())),
            OpCode::GetUpval | OpCode::SetUpval => Some(upname(b)),
            OpCode::GetTabUp => Some(format!("{} {}", upname(b), rk_note(c))),
            OpCode::SetTabUp => Some(format!("{} {} {}", upname(a), rk_note(b), rk_note(c))),
            OpCode::GetTable | OpCode::Self_ => Some(rk_note(c)),
            OpCode::SetTable
            | OpCode::Add
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
            | OpCode::Shr
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
                if Instruction::is_k(b) || Instruction::is_k(c) =>
            {
                Some(format!("{} {}", rk_note(b), rk_note(c)))
            }
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
                Some(format!("to {}", pc as i64 + 2 + inst.get_sbx() as i64))
            }
            OpCode::Closure => self
                .child_protos
                .get(inst.get_bx() as usize)
                .map(|p| format!("function <{}:{}>", chunk_id(&p.source), p.line_defined)),
            _ => None,
        };
        match note {
            Some(n) => format!("{:<9}\t{}\t; {}", op.name(), operands, n),
            None => format!("{:<9}\t{}", op.name(), operands),
        }
    }
}

fn constant_text(v: &LuaValue) -> String {
    match v {
        LuaValue::String(s) => {
            let mut out = String::new();
            quote_string(&mut out, s.as_bytes());
            out
        }
        LuaValue::Nil => "nil".into(),
        LuaValue::Boolean(b) => b.to_string(),
        other => number_to_string(other).unwrap_or_else(|| "?".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(code: Vec<Instruction>) -> Chunk {
        let mut chunk = Chunk::new("=t");
        chunk.code = code;
        chunk.constants = vec![LuaValue::from("x")];
        chunk
    }

    #[test]
    fn test_validate_accepts_minimal() {
        let chunk = chunk_with(vec![
            Instruction::create_abx(OpCode::LoadK, 0, 0),
            Instruction::create_abc(OpCode::Return, 0, 1, 0),
        ]);
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_operands() {
        let chunk = chunk_with(vec![
            Instruction::create_abx(OpCode::LoadK, 0, 5),
            Instruction::create_abc(OpCode::Return, 0, 1, 0),
        ]);
        assert!(chunk.validate().is_err());
        let chunk = chunk_with(vec![
            Instruction::create_abc(OpCode::Move, 7, 0, 0),
            Instruction::create_abc(OpCode::Return, 0, 1, 0),
        ]);
        assert!(chunk.validate().is_err());
        let chunk = chunk_with(vec![
            Instruction::create_asbx(OpCode::Jmp, 0, 9),
            Instruction::create_abc(OpCode::Return, 0, 1, 0),
        ]);
        assert!(chunk.validate().is_err());
        let chunk = chunk_with(vec![Instruction::create_abc(OpCode::Move, 0, 1, 0)]);
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn test_disassemble_lists_instructions() {
        let mut chunk = chunk_with(vec![
            Instruction::create_abx(OpCode::LoadK, 0, 0),
            Instruction::create_abc(OpCode::Return, 0, 1, 0),
        ]);
        chunk.line_info = vec![1, 1];
        let text = chunk.disassemble();
        assert!(text.contains("main <t:0,0> (2 instructions)"));
        assert!(text.contains("LOADK"));
        assert!(text.contains("; \"x\""));
    }
}
