// Coroutines
// The running coroutine's LuaState lives in the VM. `resume` swaps the
// target's state in and the resumer's out; `yield` unwinds the dispatch
// loop with `LuaError::Yield`, leaving the frames in place for the next
// resume.

use std::mem;
use std::rc::Rc;

use log::trace;

use crate::lua_value::{LuaThread, LuaValue, ThreadStatus};
use crate::lua_vm::execute::lua_execute;
use crate::lua_vm::{ErrorKind, LuaError, LuaResult, LuaState, LuaVM};

impl LuaVM {
    /// New suspended coroutine running `body`. It inherits the hook of
    /// the running coroutine.
    pub fn new_thread(&mut self, body: LuaValue) -> Rc<LuaThread> {
        let id = self.alloc_thread_id();
        let mut state = LuaState::with_body(body);
        state.hook = self.state.hook.clone();
        state.hook_mask = self.state.hook_mask;
        state.hook_counter = self.state.hook.as_ref().map_or(0, |h| h.count);
        trace!("thread {} created", id);
        Rc::new(LuaThread::new(id, Some(state), ThreadStatus::Init))
    }

    /// Runs `co` until it yields or finishes and returns the yielded or
    /// returned values. Errors raised by the body, and attempts to resume
    /// a coroutine that is not suspended, come back as `Err`.
    pub fn resume(&mut self, co: &Rc<LuaThread>, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let status = co.status();
        match status {
            ThreadStatus::Init | ThreadStatus::Suspended => {}
            s if s.is_dead() => {
                return Err(LuaError::runtime(ErrorKind::Coroutine, "cannot resume dead coroutine"));
            }
            _ => {
                return Err(LuaError::runtime(
                    ErrorKind::Coroutine,
                    "cannot resume non-suspended coroutine",
                ));
            }
        }
        if self.ccalls >= self.options.max_ccalls {
            return Err(LuaError::runtime(ErrorKind::Depth, "C stack overflow"));
        }
        let Some(co_state) = co.saved.borrow_mut().take() else {
            return Err(LuaError::runtime(
                ErrorKind::Coroutine,
                "cannot resume non-suspended coroutine",
            ));
        };

        let prev_state = mem::replace(&mut self.state, co_state);
        let prev = mem::replace(&mut self.current, co.clone());
        *prev.saved.borrow_mut() = Some(prev_state);
        prev.set_status(ThreadStatus::Normal);
        co.set_status(ThreadStatus::Running);
        *co.parent.borrow_mut() = Some(Rc::downgrade(&prev));
        trace!("resume thread {} from thread {}", co.id, prev.id);

        self.ccalls += 1;
        let result = if status == ThreadStatus::Init {
            self.start_coroutine(args)
        } else {
            self.continue_coroutine(args)
        };
        self.ccalls -= 1;

        let outcome = match result {
            Ok(()) => {
                let top = self.state.top;
                let vals = self.state.stack[..top].iter_mut().map(mem::take).collect();
                self.state.close_upvalues(0);
                self.state.top = 0;
                co.set_status(ThreadStatus::Return);
                trace!("thread {} returned", co.id);
                Ok(vals)
            }
            Err(LuaError::Yield(vals)) => {
                co.set_status(ThreadStatus::Suspended);
                trace!("thread {} yielded {} values", co.id, vals.len());
                Ok(vals)
            }
            Err(e) => {
                self.state.close_upvalues(0);
                self.state.frames.clear();
                co.set_status(ThreadStatus::Error);
                trace!("thread {} died: {}", co.id, e);
                Err(e)
            }
        };

        let prev_state = prev.saved.borrow_mut().take().unwrap_or_default();
        let co_state = mem::replace(&mut self.state, prev_state);
        *co.saved.borrow_mut() = Some(co_state);
        self.current = prev.clone();
        prev.set_status(ThreadStatus::Running);
        *co.parent.borrow_mut() = None;
        outcome
    }

    /// First resume: calls the body placed at slot 0.
    fn start_coroutine(&mut self, args: Vec<LuaValue>) -> LuaResult<()> {
        for arg in args {
            self.state.push(arg);
        }
        if self.precall(0, -1)? {
            lua_execute(self, 0)?;
        }
        Ok(())
    }

    /// Later resumes: the arguments become the results of the pending
    /// `yield`.
    fn continue_coroutine(&mut self, args: Vec<LuaValue>) -> LuaResult<()> {
        if let Some(ci) = self.state.frames.pop() {
            self.post_call_values(&ci, args)?;
            // a native metamethod was the one that yielded
            if let Some(finish) = ci.finish {
                if let Err(e) = self.finish_op(finish, ci.result_idx()) {
                    self.recover(0, e)?;
                }
            }
        }
        if !self.state.frames.is_empty() {
            lua_execute(self, 0)?;
        }
        Ok(())
    }

    /// Suspends the running coroutine; the returned error must be
    /// propagated by the calling native.
    pub fn yield_thread(&mut self, vals: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        if self.is_main_thread() {
            return Err(self.rt_error(ErrorKind::Coroutine, "attempt to yield from outside a coroutine"));
        }
        if self.state.nny > 0 {
            return Err(self.rt_error(ErrorKind::Coroutine, "attempt to yield across a C-call boundary"));
        }
        Err(LuaError::Yield(vals))
    }

    /// `coroutine.status`
    pub fn status(&self, co: &Rc<LuaThread>) -> &'static str {
        co.status().name()
    }

    /// The running coroutine and whether it is the main one.
    pub fn running(&self) -> (Rc<LuaThread>, bool) {
        (self.current.clone(), self.is_main_thread())
    }

    pub fn is_yieldable(&self) -> bool {
        !self.is_main_thread() && self.state.nny == 0
    }

    /// Runs `f` with the parked state of `co` swapped in, so frame
    /// inspection and hook setup apply to that coroutine.
    pub fn with_thread_state<R>(&mut self, co: &Rc<LuaThread>, f: impl FnOnce(&mut LuaVM) -> R) -> R {
        if Rc::ptr_eq(co, &self.current) {
            return f(self);
        }
        let parked = co.saved.borrow_mut().take().unwrap_or_default();
        let own = mem::replace(&mut self.state, parked);
        let result = f(self);
        let parked = mem::replace(&mut self.state, own);
        *co.saved.borrow_mut() = Some(parked);
        result
    }
}
