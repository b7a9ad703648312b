// Lua execution state of one coroutine
// The running coroutine's state lives in the VM, the others are parked in
// their LuaThread

use std::rc::{Rc, Weak};

use crate::lua_value::{LuaThread, LuaUpvalue, LuaValue};
use crate::lua_vm::{CallInfo, LuaError, LuaResult};

/// Event bits of `debug.sethook`.
pub mod hook_mask {
    pub const MASK_CALL: u8 = 1 << 0;
    pub const MASK_RET: u8 = 1 << 1;
    pub const MASK_LINE: u8 = 1 << 2;
    pub const MASK_COUNT: u8 = 1 << 3;
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub func: LuaValue,
    pub mask: u8,
    /// Instructions between two count events.
    pub count: u32,
}

pub struct LuaState {
    /// Register file of every active frame
    pub(crate) stack: Vec<LuaValue>,
    /// First free slot
    pub(crate) top: usize,
    pub(crate) frames: Vec<CallInfo>,
    /// Sorted by stack slot, ascending
    pub(crate) open_upvalues: Vec<Rc<LuaUpvalue>>,
    pub(crate) hook: Option<Hook>,
    /// Copy of `hook.mask`, zero while a hook runs
    pub(crate) hook_mask: u8,
    pub(crate) hook_counter: u32,
    /// Last instruction that saw a line event
    pub(crate) old_pc: usize,
    /// Nesting of native code re-entering the VM; yields need zero
    pub(crate) nny: usize,
}

impl LuaState {
    pub fn new() -> Self {
        LuaState {
            stack: Vec::with_capacity(64),
            top: 0,
            frames: Vec::with_capacity(16),
            open_upvalues: Vec::new(),
            hook: None,
            hook_mask: 0,
            hook_counter: 0,
            old_pc: 0,
            nny: 0,
        }
    }

    /// State of a new coroutine whose body is `body`.
    pub fn with_body(body: LuaValue) -> Self {
        let mut state = LuaState::new();
        state.stack.push(body);
        state.top = 1;
        state
    }

    #[inline(always)]
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> Option<&CallInfo> {
        self.frames.last()
    }

    /// Makes `needed` slots addressable.
    pub fn ensure_stack(&mut self, needed: usize, limit: usize) -> LuaResult<()> {
        if needed > limit {
            return Err(LuaError::StackOverflow);
        }
        if self.stack.len() < needed {
            self.stack.resize(needed, LuaValue::Nil);
        }
        Ok(())
    }

    pub fn push(&mut self, value: LuaValue) {
        if self.top < self.stack.len() {
            self.stack[self.top] = value;
        } else {
            self.stack.push(value);
        }
        self.top += 1;
    }

    /// Values in `[from, top)`.
    pub fn values_from(&self, from: usize) -> Vec<LuaValue> {
        self.stack[from..self.top].to_vec()
    }

    /// Open upvalue for `slot`, created on first capture.
    pub fn find_upvalue(&mut self, slot: usize, thread_id: usize, owner: &Weak<LuaThread>) -> Rc<LuaUpvalue> {
        let pos = self
            .open_upvalues
            .binary_search_by_key(&slot, |uv| uv.stack_index().unwrap_or(usize::MAX));
        match pos {
            Ok(i) => self.open_upvalues[i].clone(),
            Err(i) => {
                let uv = LuaUpvalue::new_open(thread_id, owner.clone(), slot);
                self.open_upvalues.insert(i, uv.clone());
                uv
            }
        }
    }

    /// Closes every open upvalue at or above `level`.
    pub fn close_upvalues(&mut self, level: usize) {
        while let Some(uv) = self.open_upvalues.last() {
            let Some(idx) = uv.stack_index() else {
                self.open_upvalues.pop();
                continue;
            };
            if idx < level {
                break;
            }
            let value = self.stack.get(idx).cloned().unwrap_or_default();
            uv.close(value);
            self.open_upvalues.pop();
        }
    }
}

impl Default for LuaState {
    fn default() -> Self {
        LuaState::new()
    }
}

impl Drop for LuaState {
    // Closures may outlive the coroutine that created them.
    fn drop(&mut self) {
        self.close_upvalues(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upvalues_sorted_and_shared() {
        let mut state = LuaState::new();
        state.ensure_stack(8, 100).unwrap();
        let owner = Weak::new();
        let a = state.find_upvalue(5, 0, &owner);
        let b = state.find_upvalue(2, 0, &owner);
        let c = state.find_upvalue(5, 0, &owner);
        assert!(Rc::ptr_eq(&a, &c));
        let slots: Vec<_> = state.open_upvalues.iter().filter_map(|u| u.stack_index()).collect();
        assert_eq!(slots, vec![2, 5]);

        state.stack[5] = LuaValue::Integer(7);
        state.close_upvalues(3);
        assert!(!a.is_open());
        assert!(matches!(a.closed_value(), Some(LuaValue::Integer(7))));
        assert!(b.is_open());
    }

    #[test]
    fn test_stack_limit() {
        let mut state = LuaState::new();
        assert!(state.ensure_stack(10, 10).is_ok());
        assert!(matches!(state.ensure_stack(11, 10), Err(LuaError::StackOverflow)));
    }
}
