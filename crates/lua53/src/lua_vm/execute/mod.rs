/*----------------------------------------------------------------------
  Lua 5.3 VM execution loop

  Single loop like lvm.c's luaV_execute: calls and returns of Lua
  functions switch frames inside the loop instead of recursing in Rust.
  Natives and hooks re-enter through `LuaVM::call`. Metamethods of an
  instruction run as frames of their own (`LuaVM::call_tm`); when one
  yields, its frame records a `FinishOp` that completes the instruction
  once the frame returns after the resume.

  Invariants:
  - the top frame executed by `run` is a Lua frame
  - stack.len() >= frame_top of every active Lua frame
  - `state.top` is the frame top, except between an instruction that
    leaves an open result list (CALL with C=0, VARARG with B=0) and the
    instruction consuming it
----------------------------------------------------------------------*/

pub(crate) mod call;
mod concat;
mod loop_instructions;
mod metamethod;
mod table_ops;
mod upvalue_instructions;

use log::debug;

use crate::compiler::fb2int;
use crate::lua_value::lua_arith::ArithOp;
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::hook_mask::{MASK_COUNT, MASK_LINE};
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::{ErrorKind, FinishOp, Instruction, LuaError, LuaResult, LuaVM, OpCode, error_message};

pub use metamethod::TmKind;

/// Runs frames until the call depth drops back to `stop_depth`, recovering
/// errors at protected frames above that depth.
pub(crate) fn lua_execute(vm: &mut LuaVM, stop_depth: usize) -> LuaResult<()> {
    loop {
        match run(vm, stop_depth) {
            Ok(()) => return Ok(()),
            Err(e) => vm.recover(stop_depth, e)?,
        }
    }
}

#[inline(always)]
fn rk(vm: &LuaVM, k: &[LuaValue], base: usize, x: u32) -> LuaValue {
    if Instruction::is_k(x) {
        k[Instruction::rk_index(x) as usize].clone()
    } else {
        vm.state.stack[base + x as usize].clone()
    }
}

fn arith_op(op: OpCode) -> ArithOp {
    match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        OpCode::Div => ArithOp::Div,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::BAnd => ArithOp::BAnd,
        OpCode::BOr => ArithOp::BOr,
        OpCode::BXor => ArithOp::BXor,
        OpCode::Shl => ArithOp::Shl,
        _ => ArithOp::Shr,
    }
}

fn run(vm: &mut LuaVM, stop_depth: usize) -> LuaResult<()> {
    'newframe: loop {
        let depth = vm.state.frames.len();
        if depth <= stop_depth {
            return Ok(());
        }
        let ci_idx = depth - 1;
        let (func, base, mut pc) = {
            let ci = &vm.state.frames[ci_idx];
            (ci.func.clone(), ci.base, ci.pc)
        };
        let Some(closure) = func.as_lua() else {
            return Err(LuaError::runtime(
                ErrorKind::Call,
                "cannot continue a native function frame",
            ));
        };
        let chunk = closure.chunk.clone();
        let code = &chunk.code[..];
        let k = &chunk.constants[..];
        let frame_top = base + chunk.max_stack_size as usize;

        loop {
            let i = code[pc];
            pc += 1;
            vm.state.frames[ci_idx].pc = pc;
            if vm.state.hook_mask & (MASK_LINE | MASK_COUNT) != 0 {
                vm.trace_exec(ci_idx)?;
            }
            let a = i.get_a() as usize;
            let ra = base + a;
            let Some(op) = i.opcode() else {
                return Err(vm.rt_error(ErrorKind::Type, "invalid opcode"));
            };
            match op {
                OpCode::Move => {
                    let v = vm.state.stack[base + i.get_b() as usize].clone();
                    vm.state.stack[ra] = v;
                }
                OpCode::LoadK => {
                    vm.state.stack[ra] = k[i.get_bx() as usize].clone();
                }
                OpCode::LoadKX => {
                    let ax = code[pc].get_ax();
                    pc += 1;
                    vm.state.stack[ra] = k[ax as usize].clone();
                }
                OpCode::LoadBool => {
                    vm.state.stack[ra] = LuaValue::Boolean(i.get_b() != 0);
                    if i.get_c() != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    let b = i.get_b() as usize;
                    for slot in &mut vm.state.stack[ra..=ra + b] {
                        *slot = LuaValue::Nil;
                    }
                }
                OpCode::GetUpval => {
                    let uv = closure.upvalues.borrow()[i.get_b() as usize].clone();
                    let v = vm.upvalue_get(&uv);
                    vm.state.stack[ra] = v;
                }
                OpCode::GetTabUp => {
                    let uv = closure.upvalues.borrow()[i.get_b() as usize].clone();
                    let t = vm.upvalue_get(&uv);
                    let key = rk(vm, k, base, i.get_c());
                    let v = vm.get_table(&t, &key)?;
                    vm.state.stack[ra] = v;
                }
                OpCode::GetTable => {
                    let t = vm.state.stack[base + i.get_b() as usize].clone();
                    let key = rk(vm, k, base, i.get_c());
                    let v = vm.get_table(&t, &key)?;
                    vm.state.stack[ra] = v;
                }
                OpCode::SetTabUp => {
                    let uv = closure.upvalues.borrow()[a].clone();
                    let t = vm.upvalue_get(&uv);
                    let key = rk(vm, k, base, i.get_b());
                    let v = rk(vm, k, base, i.get_c());
                    vm.set_table(&t, key, v)?;
                }
                OpCode::SetUpval => {
                    let uv = closure.upvalues.borrow()[i.get_b() as usize].clone();
                    let v = vm.state.stack[ra].clone();
                    vm.upvalue_set(&uv, v);
                }
                OpCode::SetTable => {
                    let t = vm.state.stack[ra].clone();
                    let key = rk(vm, k, base, i.get_b());
                    let v = rk(vm, k, base, i.get_c());
                    vm.set_table(&t, key, v)?;
                }
                OpCode::NewTable => {
                    let t = LuaTable::new(fb2int(i.get_b()), fb2int(i.get_c()));
                    vm.state.stack[ra] = LuaValue::table(t);
                }
                OpCode::Self_ => {
                    let obj = vm.state.stack[base + i.get_b() as usize].clone();
                    let key = rk(vm, k, base, i.get_c());
                    vm.state.stack[ra + 1] = obj.clone();
                    let v = vm.get_table(&obj, &key)?;
                    vm.state.stack[ra] = v;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul => {
                    let rb = rk(vm, k, base, i.get_b());
                    let rc = rk(vm, k, base, i.get_c());
                    let v = match (&rb, &rc) {
                        (LuaValue::Integer(x), LuaValue::Integer(y)) => LuaValue::Integer(match op {
                            OpCode::Add => x.wrapping_add(*y),
                            OpCode::Sub => x.wrapping_sub(*y),
                            _ => x.wrapping_mul(*y),
                        }),
                        (LuaValue::Float(x), LuaValue::Float(y)) => LuaValue::Float(match op {
                            OpCode::Add => x + y,
                            OpCode::Sub => x - y,
                            _ => x * y,
                        }),
                        _ => vm.arith(arith_op(op), &rb, &rc)?,
                    };
                    vm.state.stack[ra] = v;
                }
                OpCode::Mod
                | OpCode::Pow
                | OpCode::Div
                | OpCode::IDiv
                | OpCode::BAnd
                | OpCode::BOr
                | OpCode::BXor
                | OpCode::Shl
                | OpCode::Shr => {
                    let rb = rk(vm, k, base, i.get_b());
                    let rc = rk(vm, k, base, i.get_c());
                    let v = vm.arith(arith_op(op), &rb, &rc)?;
                    vm.state.stack[ra] = v;
                }
                OpCode::Unm => {
                    let rb = vm.state.stack[base + i.get_b() as usize].clone();
                    let v = match rb {
                        LuaValue::Integer(x) => LuaValue::Integer(x.wrapping_neg()),
                        LuaValue::Float(x) => LuaValue::Float(-x),
                        _ => vm.arith(ArithOp::Unm, &rb, &rb)?,
                    };
                    vm.state.stack[ra] = v;
                }
                OpCode::BNot => {
                    let rb = vm.state.stack[base + i.get_b() as usize].clone();
                    let v = match rb {
                        LuaValue::Integer(x) => LuaValue::Integer(!x),
                        _ => vm.arith(ArithOp::BNot, &rb, &rb)?,
                    };
                    vm.state.stack[ra] = v;
                }
                OpCode::Not => {
                    let falsy = vm.state.stack[base + i.get_b() as usize].is_falsy();
                    vm.state.stack[ra] = LuaValue::Boolean(falsy);
                }
                OpCode::Len => {
                    let rb = vm.state.stack[base + i.get_b() as usize].clone();
                    let v = vm.len(&rb)?;
                    vm.state.stack[ra] = v;
                }
                OpCode::Concat => {
                    let v = vm.concat(base + i.get_b() as usize, base + i.get_c() as usize)?;
                    vm.state.stack[ra] = v;
                }
                OpCode::Jmp => {
                    pc = (pc as isize + i.get_sbx() as isize) as usize;
                    if a > 0 {
                        vm.state.close_upvalues(ra - 1);
                    }
                }
                OpCode::Eq => {
                    let rb = rk(vm, k, base, i.get_b());
                    let rc = rk(vm, k, base, i.get_c());
                    let res = rb.raw_equal(&rc) || vm.equals_meta(&rb, &rc)?;
                    if res != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Lt => {
                    let rb = rk(vm, k, base, i.get_b());
                    let rc = rk(vm, k, base, i.get_c());
                    if vm.less_than(&rb, &rc)? != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Le => {
                    let rb = rk(vm, k, base, i.get_b());
                    let rc = rk(vm, k, base, i.get_c());
                    if vm.less_equal(&rb, &rc)? != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Test => {
                    if vm.state.stack[ra].to_bool() != (i.get_c() != 0) {
                        pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let rb = vm.state.stack[base + i.get_b() as usize].clone();
                    if rb.to_bool() == (i.get_c() != 0) {
                        vm.state.stack[ra] = rb;
                    } else {
                        pc += 1;
                    }
                }
                OpCode::Call => {
                    let b = i.get_b() as usize;
                    if b != 0 {
                        vm.state.top = ra + b;
                    }
                    if vm.precall(ra, i.get_c() as i32 - 1)? {
                        continue 'newframe;
                    }
                }
                OpCode::TailCall => {
                    let b = i.get_b() as usize;
                    if b != 0 {
                        vm.state.top = ra + b;
                    }
                    if vm.tail_call(ci_idx, ra)? {
                        continue 'newframe;
                    }
                }
                OpCode::Return => {
                    let b = i.get_b() as usize;
                    let n = if b != 0 { b - 1 } else { vm.state.top - ra };
                    let done = vm.return_from(ci_idx, ra, n)?;
                    let finish = done.and_then(|ci| ci.finish.map(|f| (f, ci.result_idx())));
                    if let Some((finish, res_idx)) = finish {
                        if vm.state.frames.len() > stop_depth {
                            vm.finish_op(finish, res_idx)?;
                        }
                    }
                    continue 'newframe;
                }
                OpCode::ForLoop => {
                    if vm.for_loop(ra) {
                        pc = (pc as isize + i.get_sbx() as isize) as usize;
                    }
                }
                OpCode::ForPrep => {
                    if !vm.for_prep(ra)? {
                        pc = (pc as isize + i.get_sbx() as isize) as usize + 1;
                    }
                }
                OpCode::TForCall => {
                    let cb = ra + 3;
                    let stack = &mut vm.state.stack;
                    stack[cb + 2] = stack[ra + 2].clone();
                    stack[cb + 1] = stack[ra + 1].clone();
                    stack[cb] = stack[ra].clone();
                    vm.state.top = cb + 3;
                    if vm.precall(cb, i.get_c() as i32)? {
                        continue 'newframe;
                    }
                }
                OpCode::TForLoop => {
                    let next = vm.state.stack[ra + 1].clone();
                    if !next.is_nil() {
                        vm.state.stack[ra] = next;
                        pc = (pc as isize + i.get_sbx() as isize) as usize;
                    }
                }
                OpCode::SetList => {
                    let b = i.get_b() as usize;
                    let n = if b == 0 { vm.state.top - ra - 1 } else { b };
                    let block = match i.get_c() {
                        0 => {
                            let ax = code[pc].get_ax();
                            pc += 1;
                            ax
                        }
                        c => c,
                    };
                    let LuaValue::Table(t) = vm.state.stack[ra].clone() else {
                        return Err(vm.rt_error(ErrorKind::Index, "SETLIST on a non-table value"));
                    };
                    let start = (block as i64 - 1) * LFIELDS_PER_FLUSH as i64;
                    {
                        let mut t = t.borrow_mut();
                        for j in 1..=n {
                            t.set_int(start + j as i64, vm.state.stack[ra + j].clone());
                        }
                    }
                    if b == 0 {
                        vm.state.top = frame_top;
                    }
                }
                OpCode::Closure => {
                    let proto = chunk.child_protos[i.get_bx() as usize].clone();
                    let f = vm.push_closure(proto, closure, base);
                    vm.state.stack[ra] = f;
                }
                OpCode::Vararg => {
                    let b = i.get_b() as usize;
                    let nvar = vm.state.frames[ci_idx].varargs.len();
                    let n = if b == 0 { nvar } else { b - 1 };
                    if b == 0 {
                        let limit = vm.options.max_stack_size;
                        vm.state
                            .ensure_stack(ra + n, limit)
                            .map_err(|_| vm.rt_error(ErrorKind::Depth, "stack overflow"))?;
                        vm.state.top = ra + n;
                    }
                    let state = &mut vm.state;
                    let varargs = &state.frames[ci_idx].varargs;
                    for j in 0..n {
                        state.stack[ra + j] = varargs.get(j).cloned().unwrap_or_default();
                    }
                }
                OpCode::ExtraArg => {
                    return Err(vm.rt_error(ErrorKind::Type, "unexpected EXTRAARG"));
                }
            }
        }
    }
}

impl LuaVM {
    /// Count and line events before an instruction of frame `ci_idx`.
    fn trace_exec(&mut self, ci_idx: usize) -> LuaResult<()> {
        let mask = self.state.hook_mask;
        if mask & MASK_COUNT != 0 {
            self.state.hook_counter = self.state.hook_counter.saturating_sub(1);
            if self.state.hook_counter == 0 {
                self.state.hook_counter = self.state.hook.as_ref().map_or(0, |h| h.count);
                self.call_hook("count", None)?;
            }
        }
        if mask & MASK_LINE != 0 {
            let ci = &self.state.frames[ci_idx];
            let npc = ci.current_pc();
            let old_pc = self.state.old_pc;
            let new_line = ci.chunk().and_then(|c| {
                let line = c.line_at(npc);
                let changed = npc == 0 || npc <= old_pc || line != c.line_at(old_pc);
                if changed { line } else { None }
            });
            self.state.old_pc = npc;
            if let Some(line) = new_line {
                self.call_hook("line", Some(line))?;
            }
        }
        Ok(())
    }

    /// Runs the hook function for `event`. Hooks are disabled while it
    /// runs and cannot yield.
    pub(crate) fn call_hook(&mut self, event: &str, line: Option<u32>) -> LuaResult<()> {
        let Some(hook) = self.state.hook.clone() else {
            return Ok(());
        };
        let saved_top = self.state.top;
        let top = self
            .state
            .frames
            .last()
            .map(|ci| ci.frame_top())
            .unwrap_or(0)
            .max(saved_top);
        let limit = self.options.max_stack_size;
        self.state.ensure_stack(top, limit.max(top))?;
        self.state.top = top;
        self.state.hook_mask = 0;
        let line = line.map_or(LuaValue::Nil, |l| LuaValue::Integer(l as i64));
        let res = self.call(hook.func, vec![LuaValue::from(event), line]);
        self.state.hook_mask = self.state.hook.as_ref().map_or(0, |h| h.mask);
        self.state.top = saved_top;
        res.map(|_| ())
    }

    /// Error recovery for `lua_execute`: hands the error to the innermost
    /// protected frame at or above `stop_depth`, or unwinds to
    /// `stop_depth` and returns it.
    pub(crate) fn recover(&mut self, stop_depth: usize, err: LuaError) -> LuaResult<()> {
        if err.is_yield() {
            return Err(err);
        }
        let protected = self
            .state
            .frames
            .iter()
            .enumerate()
            .skip(stop_depth)
            .rev()
            .find(|(_, ci)| ci.is_protected())
            .map(|(idx, _)| idx);
        if let Some(idx) = protected {
            let finish = self.state.frames[idx].finish;
            let res_idx = self.state.frames[idx].result_idx();
            self.recover_at(idx, err)?;
            if let Some(finish) = finish {
                if self.state.frames.len() > stop_depth {
                    if let Err(e) = self.finish_op(finish, res_idx) {
                        return self.recover(stop_depth, e);
                    }
                }
            }
            return Ok(());
        }
        let err = if self.is_main_thread() && !self.state.frames.iter().any(|ci| ci.is_protected()) {
            let tb = self.traceback(None, 0);
            err.set_traceback(tb)
        } else {
            err
        };
        if let Some(level) = self.state.frames.get(stop_depth).map(|ci| ci.func_idx) {
            self.state.close_upvalues(level);
        }
        self.state.frames.truncate(stop_depth);
        Err(err)
    }

    /// Completes the instruction of the top Lua frame whose metamethod
    /// call, run as frame of its own after a yield, left its result at
    /// `res_idx`.
    pub(crate) fn finish_op(&mut self, finish: FinishOp, res_idx: usize) -> LuaResult<()> {
        let Some(ci) = self.state.frames.last() else {
            return Ok(());
        };
        let Some(i) = ci.chunk().and_then(|c| c.code.get(ci.current_pc()).copied()) else {
            return Err(LuaError::runtime(ErrorKind::Call, "cannot finish a native frame"));
        };
        let base = ci.base;
        let res = std::mem::take(&mut self.state.stack[res_idx]);
        match finish {
            FinishOp::Store => {
                self.state.stack[base + i.get_a() as usize] = res;
            }
            FinishOp::Compare { negate } => {
                if (res.to_bool() ^ negate) != (i.get_a() != 0) {
                    if let Some(ci) = self.state.frames.last_mut() {
                        ci.pc += 1;
                    }
                }
            }
            FinishOp::Discard => {}
            FinishOp::Concat { at } => {
                self.state.stack[at] = res;
                let v = self.concat(base + i.get_b() as usize, at)?;
                self.state.stack[base + i.get_a() as usize] = v;
            }
        }
        if let Some(ci) = self.state.frames.last() {
            self.state.top = ci.frame_top();
        }
        Ok(())
    }

    /// Finishes the protected frame `idx` with `(false, err)`.
    pub(crate) fn recover_at(&mut self, idx: usize, err: LuaError) -> LuaResult<()> {
        let mut value = err.value();
        debug!("protected call caught: {}", error_message(&value));
        if let Some(handler) = self.state.frames[idx].handler.clone() {
            let top = self
                .state
                .frames
                .last()
                .map(|ci| ci.frame_top())
                .unwrap_or(0)
                .max(self.state.top);
            let limit = self.options.max_stack_size;
            self.state.ensure_stack(top, limit.max(top))?;
            self.state.top = top;
            value = match self.call(handler, vec![value]) {
                Ok(rets) => rets.into_iter().next().unwrap_or_default(),
                Err(e) => e.value(),
            };
        }
        let func_idx = self.state.frames[idx].func_idx;
        let nresults = self.state.frames[idx].nresults;
        self.state.close_upvalues(func_idx);
        self.state.frames.truncate(idx);
        self.write_failure(func_idx, nresults, value)?;
        Ok(())
    }
}
