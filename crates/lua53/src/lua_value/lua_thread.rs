use std::cell::{Cell, RefCell};
use std::rc::Weak;

use crate::lua_vm::LuaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created, body not started.
    Init,
    Suspended,
    Running,
    /// Resumed another coroutine and waits for it.
    Normal,
    /// Finished with an error.
    Error,
    /// Body returned.
    Return,
}

impl ThreadStatus {
    /// Name reported by `coroutine.status`.
    pub fn name(self) -> &'static str {
        match self {
            ThreadStatus::Init | ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Error | ThreadStatus::Return => "dead",
        }
    }

    pub fn is_dead(self) -> bool {
        matches!(self, ThreadStatus::Error | ThreadStatus::Return)
    }
}

/// Lua thread (coroutine). While the thread runs its `LuaState` lives in the
/// VM; otherwise it is parked in `saved`.
pub struct LuaThread {
    pub id: usize,
    pub saved: RefCell<Option<LuaState>>,
    pub status: Cell<ThreadStatus>,
    /// The thread that resumed this one, while it runs.
    pub parent: RefCell<Option<Weak<LuaThread>>>,
}

impl LuaThread {
    pub fn new(id: usize, state: Option<LuaState>, status: ThreadStatus) -> Self {
        LuaThread {
            id,
            saved: RefCell::new(state),
            status: Cell::new(status),
            parent: RefCell::new(None),
        }
    }

    pub fn status(&self) -> ThreadStatus {
        self.status.get()
    }

    pub fn set_status(&self, status: ThreadStatus) {
        self.status.set(status);
    }
}

impl std::fmt::Debug for LuaThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LuaThread(id={}, {:?})", self.id, self.status.get())
    }
}
