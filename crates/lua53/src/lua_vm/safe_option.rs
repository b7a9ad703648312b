use crate::lua_vm::lua_limits::{LUAI_MAXSTACK, MAX_CALL_DEPTH, MAX_META_DEPTH, MAXCCALLS};

#[derive(Debug, Clone)]
pub struct SafeOption {
    /// Maximum number of stack slots a coroutine may use.
    pub max_stack_size: usize,
    /// Maximum number of active Lua frames per coroutine.
    pub max_call_depth: usize,
    /// Maximum length of an `__index` / `__newindex` chain.
    pub max_meta_depth: usize,
    /// Maximum nesting of native calls re-entering the VM.
    pub max_ccalls: usize,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_stack_size: LUAI_MAXSTACK,
            max_call_depth: MAX_CALL_DEPTH,
            max_meta_depth: MAX_META_DEPTH,
            max_ccalls: MAXCCALLS,
        }
    }
}
