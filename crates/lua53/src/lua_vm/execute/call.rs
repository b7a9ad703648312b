// Call and return protocol
//
// Lua callees push a frame and are run by the dispatch loop; natives run
// right away with their arguments copied out of the stack. `pcall` and
// `xpcall` never recurse: their callee runs in a frame flagged
// CIST_PROTECTED and errors are recovered at that frame.

use std::mem;
use std::rc::Rc;

use crate::lua_value::{LuaFunction, LuaValue, NativeKind};
use crate::lua_vm::call_status::{CIST_LUA, CIST_PROTECTED, CIST_TAIL};
use crate::lua_vm::execute::lua_execute;
use crate::lua_vm::hook_mask::{MASK_CALL, MASK_RET};
use crate::lua_vm::{CallInfo, ErrorKind, FinishOp, LuaError, LuaResult, LuaVM};

impl LuaVM {
    /// Calls `f` with `args` and returns all of its results.
    pub fn call(&mut self, f: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        if self.ccalls >= self.options.max_ccalls {
            return Err(self.rt_error(ErrorKind::Depth, "C stack overflow"));
        }
        let func_idx = self.state.top;
        let limit = self.options.max_stack_size;
        self.state
            .ensure_stack(func_idx + args.len() + 1, limit)
            .map_err(|_| self.rt_error(ErrorKind::Depth, "stack overflow"))?;
        self.state.push(f);
        for arg in args {
            self.state.push(arg);
        }

        let depth = self.state.frames.len();
        self.ccalls += 1;
        self.state.nny += 1;
        let result = match self.precall(func_idx, -1) {
            Ok(true) => lua_execute(self, depth),
            Ok(false) => Ok(()),
            Err(e) => self.recover(depth, e),
        };
        self.ccalls -= 1;
        self.state.nny -= 1;

        match result {
            Ok(()) => {
                let top = self.state.top.max(func_idx);
                let rets = self.state.stack[func_idx..top]
                    .iter_mut()
                    .map(mem::take)
                    .collect();
                self.state.top = func_idx;
                Ok(rets)
            }
            Err(e) => {
                self.state.close_upvalues(func_idx);
                self.state.frames.truncate(depth);
                self.state.top = func_idx;
                Err(e)
            }
        }
    }

    /// Calls metamethod `tm` for the instruction being executed and returns
    /// its first result. From a Lua frame the metamethod may yield: its
    /// frames stay on the stack and `finish` completes the instruction
    /// after the coroutine is resumed. Anywhere else this is `call`.
    pub(crate) fn call_tm(&mut self, tm: LuaValue, args: Vec<LuaValue>, finish: FinishOp) -> LuaResult<LuaValue> {
        let caller_top = match self.state.frames.last() {
            Some(ci) if ci.is_lua() => ci.frame_top(),
            _ => return Ok(self.call(tm, args)?.into_iter().next().unwrap_or_default()),
        };
        if self.ccalls >= self.options.max_ccalls {
            return Err(self.rt_error(ErrorKind::Depth, "C stack overflow"));
        }
        let func_idx = self.state.top.max(caller_top);
        let limit = self.options.max_stack_size;
        self.state
            .ensure_stack(func_idx + args.len() + 1, limit)
            .map_err(|_| self.rt_error(ErrorKind::Depth, "stack overflow"))?;
        self.state.top = func_idx;
        self.state.push(tm);
        for arg in args {
            self.state.push(arg);
        }

        let depth = self.state.frames.len();
        self.ccalls += 1;
        let result = match self.precall(func_idx, 1) {
            Ok(true) => {
                self.state.frames[depth].finish = Some(finish);
                lua_execute(self, depth)
            }
            Ok(false) => Ok(()),
            Err(e) if e.is_yield() => {
                // a native metamethod yielded; its frame is still there
                if let Some(ci) = self.state.frames.get_mut(depth) {
                    ci.finish = Some(finish);
                }
                Err(e)
            }
            Err(e) => self.recover(depth, e),
        };
        self.ccalls -= 1;

        match result {
            Ok(()) => {
                let v = mem::take(&mut self.state.stack[func_idx]);
                self.state.top = caller_top;
                Ok(v)
            }
            Err(e) if e.is_yield() => Err(e),
            Err(e) => {
                self.state.close_upvalues(func_idx);
                self.state.frames.truncate(depth);
                self.state.top = caller_top;
                Err(e)
            }
        }
    }

    /// Prepares the call of the value at `func_idx` with arguments up to
    /// `top`. Returns true when a Lua frame was pushed for the dispatch
    /// loop; native callees have already finished.
    pub(crate) fn precall(&mut self, func_idx: usize, nresults: i32) -> LuaResult<bool> {
        let f = self.resolve_callable(func_idx)?;
        let kind = match f.as_ref() {
            LuaFunction::Lua(_) => None,
            LuaFunction::Native(n) => Some(n.kind),
        };
        match kind {
            None => {
                self.push_lua_frame(f, func_idx, nresults, CIST_LUA, None)?;
                Ok(true)
            }
            Some(NativeKind::Pcall) => self.precall_protected(func_idx, nresults, None),
            Some(NativeKind::Xpcall) => {
                let top = self.state.top;
                if top < func_idx + 3 {
                    return Err(self.rt_error(
                        ErrorKind::Call,
                        "bad argument #2 to 'xpcall' (value expected)",
                    ));
                }
                let handler = mem::take(&mut self.state.stack[func_idx + 2]);
                for j in func_idx + 2..top - 1 {
                    self.state.stack[j] = mem::take(&mut self.state.stack[j + 1]);
                }
                self.state.top = top - 1;
                self.precall_protected(func_idx, nresults, Some(handler))
            }
            Some(NativeKind::Plain) => {
                self.call_native(f, func_idx, nresults, 0, None)?;
                Ok(false)
            }
        }
    }

    /// `pcall` at `slot` with the callee at `slot + 1`. The results, status
    /// first, are delivered at `slot`.
    fn precall_protected(
        &mut self,
        slot: usize,
        nresults: i32,
        handler: Option<LuaValue>,
    ) -> LuaResult<bool> {
        let func_idx = slot + 1;
        if self.state.top <= func_idx {
            return Err(self.rt_error(ErrorKind::Call, "bad argument #1 to 'pcall' (value expected)"));
        }
        let f = match self.resolve_callable(func_idx) {
            Ok(f) => f,
            Err(e) if e.is_yield() => return Err(e),
            Err(_) => {
                let callee = &self.state.stack[func_idx];
                let msg = format!("attempt to call a {} value", callee.type_name());
                self.write_failure(func_idx, nresults, LuaValue::from(msg))?;
                return Ok(false);
            }
        };
        let msgh = handler.clone();
        let started = if f.as_lua().is_some() {
            self.push_lua_frame(f, func_idx, nresults, CIST_LUA | CIST_PROTECTED, handler)
                .map(|_| true)
        } else {
            self.call_native(f, func_idx, nresults, CIST_PROTECTED, handler)
                .map(|_| false)
        };
        match started {
            Ok(is_lua) => Ok(is_lua),
            Err(e) if e.is_yield() => Err(e),
            Err(e) => {
                let depth = self.state.frames.len();
                match self.state.frames.last() {
                    Some(ci) if ci.func_idx == func_idx && ci.is_protected() => {
                        self.recover_at(depth - 1, e)?;
                    }
                    // failed before its frame was pushed
                    _ => {
                        let mut value = e.value();
                        if let Some(h) = msgh {
                            value = match self.call(h, vec![value]) {
                                Ok(rets) => rets.into_iter().next().unwrap_or_default(),
                                Err(e) => e.value(),
                            };
                        }
                        self.write_failure(func_idx, nresults, value)?;
                    }
                }
                Ok(false)
            }
        }
    }

    /// Function to call for the value at `func_idx`, inserting `__call`
    /// handlers in front of the arguments as needed.
    pub(crate) fn resolve_callable(&mut self, func_idx: usize) -> LuaResult<Rc<LuaFunction>> {
        for _ in 0..=self.options.max_meta_depth {
            let callee = &self.state.stack[func_idx];
            if let LuaValue::Function(f) = callee {
                return Ok(f.clone());
            }
            let tm = self.get_meta_field(callee, "__call");
            if tm.is_nil() {
                let callee = callee.clone();
                return Err(self.type_error(&callee, "call"));
            }
            let top = self.state.top;
            let limit = self.options.max_stack_size;
            self.state
                .ensure_stack(top + 1, limit)
                .map_err(|_| self.rt_error(ErrorKind::Depth, "stack overflow"))?;
            self.state.stack[func_idx..=top].rotate_right(1);
            self.state.stack[func_idx] = tm;
            self.state.top = top + 1;
        }
        Err(self.rt_error(ErrorKind::Depth, "'__call' chain too long; possible loop"))
    }

    pub(crate) fn push_lua_frame(
        &mut self,
        f: Rc<LuaFunction>,
        func_idx: usize,
        nresults: i32,
        status: u32,
        handler: Option<LuaValue>,
    ) -> LuaResult<()> {
        if self.state.frames.len() >= self.options.max_call_depth {
            return Err(self.rt_error(ErrorKind::Depth, "stack overflow"));
        }
        let Some(closure) = f.as_lua() else {
            return Err(LuaError::runtime(ErrorKind::Call, "not a Lua function"));
        };
        let chunk = closure.chunk.clone();
        let base = func_idx + 1;
        let nargs = self.state.top.saturating_sub(base);
        let nparams = chunk.param_count as usize;
        let frame_top = base + chunk.max_stack_size as usize;
        let limit = self.options.max_stack_size;
        self.state
            .ensure_stack(frame_top.max(self.state.top), limit)
            .map_err(|_| self.rt_error(ErrorKind::Depth, "stack overflow"))?;

        let varargs = if chunk.is_vararg && nargs > nparams {
            self.state.stack[base + nparams..base + nargs]
                .iter_mut()
                .map(mem::take)
                .collect()
        } else {
            Vec::new()
        };
        for slot in &mut self.state.stack[base + nargs.min(nparams)..base + nparams] {
            *slot = LuaValue::Nil;
        }

        let mut ci = CallInfo::new_lua(f, func_idx, nresults);
        ci.call_status |= status;
        ci.varargs = varargs;
        ci.handler = handler;
        self.state.frames.push(ci);
        self.state.top = frame_top;
        if self.state.hook_mask & MASK_CALL != 0 {
            let event = if status & CIST_TAIL != 0 { "tail call" } else { "call" };
            self.call_hook(event, None)?;
        }
        Ok(())
    }

    /// Runs a native function. On error the native's frame stays on the
    /// stack for the unwinder.
    pub(crate) fn call_native(
        &mut self,
        f: Rc<LuaFunction>,
        func_idx: usize,
        nresults: i32,
        status: u32,
        handler: Option<LuaValue>,
    ) -> LuaResult<()> {
        let func = match f.as_ref() {
            LuaFunction::Native(n) => n.func.clone(),
            LuaFunction::Lua(_) => {
                return Err(LuaError::runtime(ErrorKind::Call, "not a native function"));
            }
        };
        if self.state.frames.len() >= self.options.max_call_depth {
            return Err(self.rt_error(ErrorKind::Depth, "stack overflow"));
        }
        let top = self.state.top.max(func_idx + 1);
        let args: Vec<LuaValue> = self.state.stack[func_idx + 1..top]
            .iter_mut()
            .map(mem::take)
            .collect();
        let mut ci = CallInfo::new_native(f, func_idx, nresults);
        ci.call_status |= status;
        ci.handler = handler;
        self.state.frames.push(ci);
        self.state.top = func_idx + 1;

        if self.state.hook_mask & MASK_CALL != 0 {
            self.call_hook("call", None)?;
        }
        let vals = func(self, args)?;
        if self.state.hook_mask & MASK_RET != 0 {
            self.call_hook("return", None)?;
        }
        if let Some(ci) = self.state.frames.pop() {
            self.post_call_values(&ci, vals)?;
        }
        Ok(())
    }

    /// Destination and count of the results of `ci`. Protected frames
    /// also get their `true` status written.
    fn result_slot(&mut self, ci: &CallInfo) -> (usize, i32) {
        let mut wanted = ci.nresults;
        if ci.is_protected() {
            self.state.stack[ci.func_idx - 1] = LuaValue::Boolean(true);
            if wanted > 0 {
                wanted -= 1;
            }
        }
        (ci.func_idx, wanted)
    }

    /// Moves `n` results at `src` of the finished frame `ci` into place.
    pub(crate) fn post_call(&mut self, ci: &CallInfo, src: usize, n: usize) -> LuaResult<()> {
        let (dst, wanted) = self.result_slot(ci);
        let count = if wanted < 0 { n } else { wanted as usize };
        let limit = self.options.max_stack_size;
        self.state.ensure_stack(dst + count, limit.max(dst + count))?;
        let stack = &mut self.state.stack;
        for j in 0..count {
            stack[dst + j] = if j < n {
                mem::take(&mut stack[src + j])
            } else {
                LuaValue::Nil
            };
        }
        self.finish_top(ci.nresults, dst + count);
        Ok(())
    }

    /// Like `post_call` for results produced by a native or a resume.
    pub(crate) fn post_call_values(&mut self, ci: &CallInfo, vals: Vec<LuaValue>) -> LuaResult<()> {
        let (dst, wanted) = self.result_slot(ci);
        let n = vals.len();
        let count = if wanted < 0 { n } else { wanted as usize };
        let limit = self.options.max_stack_size;
        self.state
            .ensure_stack(dst + count, limit)
            .map_err(|_| self.rt_error(ErrorKind::Depth, "stack overflow"))?;
        let mut vals = vals.into_iter();
        for j in 0..count {
            self.state.stack[dst + j] = vals.next().unwrap_or_default();
        }
        self.finish_top(ci.nresults, dst + count);
        Ok(())
    }

    /// Writes `(false, value)` for a protected call at `func_idx` that
    /// failed.
    pub(crate) fn write_failure(&mut self, func_idx: usize, nresults: i32, value: LuaValue) -> LuaResult<()> {
        let dst = func_idx - 1;
        let wanted = if nresults < 0 { 2 } else { nresults as usize };
        let end = dst + wanted.max(2);
        let limit = self.options.max_stack_size;
        self.state.ensure_stack(end, limit.max(end))?;
        self.state.stack[dst] = LuaValue::Boolean(false);
        self.state.stack[dst + 1] = value;
        for j in 2..wanted {
            self.state.stack[dst + j] = LuaValue::Nil;
        }
        self.finish_top(nresults, dst + wanted);
        Ok(())
    }

    /// Top after a call: the end of the results for an open result list,
    /// else the frame top of the caller.
    pub(crate) fn finish_top(&mut self, nresults: i32, end: usize) {
        self.state.top = match self.state.frames.last() {
            Some(ci) if nresults >= 0 && ci.is_lua() => ci.frame_top(),
            _ => end,
        };
    }

    /// RETURN of frame `ci_idx` with `n` values at `ra`. Returns the
    /// finished frame.
    pub(crate) fn return_from(&mut self, ci_idx: usize, ra: usize, n: usize) -> LuaResult<Option<CallInfo>> {
        let base = self.state.frames[ci_idx].base;
        self.state.close_upvalues(base);
        if self.state.hook_mask & MASK_RET != 0 {
            self.call_hook("return", None)?;
        }
        let done = self.state.frames.pop();
        if let Some(ci) = &done {
            self.post_call(ci, ra, n)?;
        }
        if let Some(prev) = self.state.frames.last() {
            self.state.old_pc = prev.current_pc();
        }
        Ok(done)
    }

    /// TAILCALL at `ra` from frame `ci_idx`. A Lua callee replaces the
    /// frame; anything else is called like CALL with an open result list
    /// that the following RETURN hands back.
    pub(crate) fn tail_call(&mut self, ci_idx: usize, ra: usize) -> LuaResult<bool> {
        let f = self.resolve_callable(ra)?;
        if f.as_lua().is_none() {
            return self.precall(ra, -1);
        }
        let (func_idx, base) = {
            let ci = &self.state.frames[ci_idx];
            (ci.func_idx, ci.base)
        };
        self.state.close_upvalues(base);
        let n = self.state.top - ra;
        for j in 0..n {
            self.state.stack[func_idx + j] = mem::take(&mut self.state.stack[ra + j]);
        }
        self.state.top = func_idx + n;
        let Some(old) = self.state.frames.pop() else {
            return Ok(false);
        };
        let status = CIST_LUA | CIST_TAIL | (old.call_status & CIST_PROTECTED);
        self.push_lua_frame(f, func_idx, old.nresults, status, old.handler)?;
        if let Some(ci) = self.state.frames.last_mut() {
            ci.finish = old.finish;
        }
        Ok(true)
    }
}
