/// Upvalue and closure operations
///
/// Open upvalues point into the stack of the coroutine that created them;
/// when that coroutine is not the running one its stack is parked in its
/// `LuaThread`.
use std::rc::Rc;

use crate::lua_value::{Chunk, LuaClosure, LuaFunction, LuaUpvalue, LuaValue};
use crate::lua_vm::LuaVM;

impl LuaVM {
    /// Current value of an upvalue.
    #[inline]
    pub(crate) fn upvalue_get(&self, uv: &LuaUpvalue) -> LuaValue {
        if let Some(v) = uv.get_in(self.current.id, &self.state.stack) {
            return v;
        }
        let Some((_, owner, idx)) = uv.open_slot() else {
            return LuaValue::Nil;
        };
        owner
            .upgrade()
            .and_then(|t| t.saved.borrow().as_ref().and_then(|s| s.stack.get(idx).cloned()))
            .unwrap_or_default()
    }

    #[inline]
    pub(crate) fn upvalue_set(&mut self, uv: &LuaUpvalue, value: LuaValue) {
        let Err(value) = uv.set_in(self.current.id, &mut self.state.stack, value) else {
            return;
        };
        let Some((_, owner, idx)) = uv.open_slot() else {
            return;
        };
        if let Some(thread) = owner.upgrade()
            && let Some(state) = thread.saved.borrow_mut().as_mut()
            && let Some(slot) = state.stack.get_mut(idx)
        {
            *slot = value;
        }
    }

    /// Open upvalue for stack slot `slot` of the running coroutine.
    pub(crate) fn find_upvalue(&mut self, slot: usize) -> Rc<LuaUpvalue> {
        let owner = Rc::downgrade(&self.current);
        self.state.find_upvalue(slot, self.current.id, &owner)
    }

    /// CLOSURE A Bx
    /// Instantiates `proto` inside `parent`, whose registers start at `base`.
    pub(crate) fn push_closure(&mut self, proto: Rc<Chunk>, parent: &LuaClosure, base: usize) -> LuaValue {
        let upvalues = proto
            .upvalue_descs
            .iter()
            .map(|desc| {
                if desc.in_stack {
                    self.find_upvalue(base + desc.index as usize)
                } else {
                    parent.upvalues.borrow()[desc.index as usize].clone()
                }
            })
            .collect();
        LuaValue::function(LuaFunction::closure(proto, upvalues))
    }
}

#[cfg(test)]
mod tests {
    use crate::lua_vm::LuaVM;

    #[test]
    fn test_shared_upvalue_between_closures() {
        let mut vm = LuaVM::default();
        let rets = vm
            .execute(
                "local n = 0
                 local function inc() n = n + 1 end
                 local function get() return n end
                 inc() inc()
                 return get(), n",
            )
            .unwrap();
        assert!(matches!(rets[0], crate::lua_value::LuaValue::Integer(2)));
        assert!(matches!(rets[1], crate::lua_value::LuaValue::Integer(2)));
    }
}
