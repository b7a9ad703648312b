use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smol_str::SmolStr;

use crate::lua_value::{Chunk, LuaThread, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM};

/// Signature of functions implemented in Rust. Arguments arrive in order;
/// the returned values become the call's results.
pub type NativeFn = dyn Fn(&mut LuaVM, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;

/// Natives the dispatch loop treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    Plain,
    /// `pcall`: the callee runs in a protected frame of the current loop.
    Pcall,
    /// `xpcall`: like `Pcall` with a message handler.
    Xpcall,
}

pub struct NativeFunction {
    pub name: SmolStr,
    pub func: Rc<NativeFn>,
    pub kind: NativeKind,
}

pub struct LuaClosure {
    pub chunk: Rc<Chunk>,
    /// Interior mutability for `debug.upvaluejoin`.
    pub upvalues: RefCell<Vec<Rc<LuaUpvalue>>>,
}

pub enum LuaFunction {
    Lua(LuaClosure),
    Native(NativeFunction),
}

impl LuaFunction {
    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut LuaVM, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> + 'static,
    {
        LuaFunction::Native(NativeFunction {
            name: SmolStr::new(name),
            func: Rc::new(func),
            kind: NativeKind::Plain,
        })
    }

    pub fn closure(chunk: Rc<Chunk>, upvalues: Vec<Rc<LuaUpvalue>>) -> Self {
        LuaFunction::Lua(LuaClosure {
            chunk,
            upvalues: RefCell::new(upvalues),
        })
    }

    pub fn as_lua(&self) -> Option<&LuaClosure> {
        match self {
            LuaFunction::Lua(c) => Some(c),
            LuaFunction::Native(_) => None,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, LuaFunction::Native(_))
    }
}

impl fmt::Debug for LuaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaFunction::Lua(c) => write!(
                f,
                "LuaClosure({}:{})",
                c.chunk.source, c.chunk.line_defined
            ),
            LuaFunction::Native(n) => write!(f, "NativeFunction({})", n.name),
        }
    }
}

/// Runtime upvalue - open (a slot of a thread's stack) or closed (owns value)
pub struct LuaUpvalue {
    state: RefCell<UpvalueState>,
}

#[derive(Debug)]
pub enum UpvalueState {
    Open {
        thread_id: usize,
        owner: Weak<LuaThread>,
        index: usize,
    },
    Closed(LuaValue),
}

impl LuaUpvalue {
    pub fn new_open(thread_id: usize, owner: Weak<LuaThread>, index: usize) -> Rc<Self> {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Open {
                thread_id,
                owner,
                index,
            }),
        })
    }

    pub fn new_closed(value: LuaValue) -> Rc<Self> {
        Rc::new(LuaUpvalue {
            state: RefCell::new(UpvalueState::Closed(value)),
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.borrow(), UpvalueState::Open { .. })
    }

    /// Thread id, owner and stack slot while open.
    pub fn open_slot(&self) -> Option<(usize, Weak<LuaThread>, usize)> {
        match &*self.state.borrow() {
            UpvalueState::Open {
                thread_id,
                owner,
                index,
            } => Some((*thread_id, owner.clone(), *index)),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn stack_index(&self) -> Option<usize> {
        match &*self.state.borrow() {
            UpvalueState::Open { index, .. } => Some(*index),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn closed_value(&self) -> Option<LuaValue> {
        match &*self.state.borrow() {
            UpvalueState::Closed(v) => Some(v.clone()),
            UpvalueState::Open { .. } => None,
        }
    }

    /// Stores into a closed upvalue; returns false when it is open.
    pub fn set_closed(&self, value: LuaValue) -> bool {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            UpvalueState::Closed(v) => {
                *v = value;
                true
            }
            UpvalueState::Open { .. } => false,
        }
    }

    /// Reads the upvalue when it is closed or open on `thread_id`, whose
    /// stack is `stack`. `None` means it lives on another thread's stack.
    #[inline]
    pub fn get_in(&self, thread_id: usize, stack: &[LuaValue]) -> Option<LuaValue> {
        match &*self.state.borrow() {
            UpvalueState::Closed(v) => Some(v.clone()),
            UpvalueState::Open {
                thread_id: tid,
                index,
                ..
            } if *tid == thread_id => Some(stack[*index].clone()),
            UpvalueState::Open { .. } => None,
        }
    }

    /// Counterpart of `get_in`; gives the value back when the upvalue lives
    /// on another thread.
    #[inline]
    pub fn set_in(
        &self,
        thread_id: usize,
        stack: &mut [LuaValue],
        value: LuaValue,
    ) -> Result<(), LuaValue> {
        match &mut *self.state.borrow_mut() {
            UpvalueState::Closed(v) => {
                *v = value;
                Ok(())
            }
            UpvalueState::Open {
                thread_id: tid,
                index,
                ..
            } if *tid == thread_id => {
                stack[*index] = value;
                Ok(())
            }
            UpvalueState::Open { .. } => Err(value),
        }
    }

    /// Moves the value off the stack.
    pub fn close(&self, value: LuaValue) {
        *self.state.borrow_mut() = UpvalueState::Closed(value);
    }
}

impl fmt::Debug for LuaUpvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            UpvalueState::Open {
                thread_id, index, ..
            } => write!(f, "Upvalue::Open(thread={}, idx={})", thread_id, index),
            UpvalueState::Closed(val) => write!(f, "Upvalue::Closed({:?})", val),
        }
    }
}
