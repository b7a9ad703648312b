// CallInfo - one activation record of a coroutine's call stack

use std::rc::Rc;

use crate::lua_value::{Chunk, LuaFunction, LuaValue};

/// Call status flags
pub mod call_status {
    /// Lua function (has bytecode)
    pub const CIST_LUA: u32 = 1 << 0;
    /// Native function
    pub const CIST_NATIVE: u32 = 1 << 1;
    /// Function was entered through a tail call
    pub const CIST_TAIL: u32 = 1 << 2;
    /// Body of `pcall`/`xpcall`: errors stop here and the results are
    /// prefixed with a status boolean one slot below the function.
    pub const CIST_PROTECTED: u32 = 1 << 3;
}

use call_status::*;

/// How the instruction that called a metamethod is completed when the
/// metamethod returns after its coroutine yielded and was resumed
/// (luaV_finishOp).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOp {
    /// The result goes to R(A).
    Store,
    /// EQ/LT/LE: conditional jump on the result, inverted for a `<=`
    /// computed as `not (b < a)`.
    Compare { negate: bool },
    /// `__newindex`: nothing to store.
    Discard,
    /// CONCAT interrupted at register `at`; the result replaces R(at-1)
    /// and concatenation goes on from there.
    Concat { at: usize },
}

#[derive(Clone)]
pub struct CallInfo {
    pub func: Rc<LuaFunction>,
    /// Stack slot holding the called function; results are written here.
    pub func_idx: usize,
    /// First register (`func_idx + 1`).
    pub base: usize,
    /// Next instruction (Lua frames only).
    pub pc: usize,
    /// Number of expected results, -1 for all.
    pub nresults: i32,
    pub call_status: u32,
    /// Extra arguments of a vararg function.
    pub varargs: Vec<LuaValue>,
    /// `xpcall` message handler of a protected frame.
    pub handler: Option<LuaValue>,
    /// Set on metamethod calls made by the dispatch loop.
    pub finish: Option<FinishOp>,
}

impl CallInfo {
    pub fn new_lua(func: Rc<LuaFunction>, func_idx: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            func_idx,
            base: func_idx + 1,
            pc: 0,
            nresults,
            call_status: CIST_LUA,
            varargs: Vec::new(),
            handler: None,
            finish: None,
        }
    }

    pub fn new_native(func: Rc<LuaFunction>, func_idx: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            func_idx,
            base: func_idx + 1,
            pc: 0,
            nresults,
            call_status: CIST_NATIVE,
            varargs: Vec::new(),
            handler: None,
            finish: None,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.call_status & CIST_LUA != 0
    }

    #[inline(always)]
    pub fn is_native(&self) -> bool {
        self.call_status & CIST_NATIVE != 0
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.call_status & CIST_TAIL != 0
    }

    #[inline(always)]
    pub fn is_protected(&self) -> bool {
        self.call_status & CIST_PROTECTED != 0
    }

    /// Prototype of a Lua frame.
    pub fn chunk(&self) -> Option<&Rc<Chunk>> {
        self.func.as_lua().map(|c| &c.chunk)
    }

    /// Slot of the first result once the frame has returned.
    pub fn result_idx(&self) -> usize {
        if self.is_protected() { self.func_idx - 1 } else { self.func_idx }
    }

    /// Index of the instruction being executed.
    pub fn current_pc(&self) -> usize {
        self.pc.saturating_sub(1)
    }

    /// Line being executed, when debug info is present.
    pub fn current_line(&self) -> Option<u32> {
        self.chunk()?.line_at(self.current_pc())
    }

    /// First stack slot past the frame's registers.
    pub fn frame_top(&self) -> usize {
        match self.chunk() {
            Some(chunk) => self.base + chunk.max_stack_size as usize,
            None => self.base,
        }
    }
}
