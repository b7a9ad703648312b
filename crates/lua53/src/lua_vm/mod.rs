// Lua Virtual Machine
// Executes compiled chunks with a register-based dispatch loop
mod arg_parser;
mod call_info;
mod coroutine;
mod debug_info;
mod execute;
mod lua_error;
pub mod lua_limits;
mod lua_state;
pub mod opcode;
mod safe_option;

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::compiler::Compiler;
use crate::lua_value::{
    Chunk, LuaFunction, LuaString, LuaTable, LuaTableRef, LuaThread, LuaUpvalue, LuaValue,
    LuaValueKind, ThreadStatus,
};
use crate::lua_value::lua_convert::to_lua_string;

pub use arg_parser::{ArgParser, arg_error};
pub use call_info::{CallInfo, FinishOp, call_status};
pub use debug_info::DebugInfo;
pub use lua_error::{ErrorKind, LuaError, error_message};
pub use lua_state::{Hook, LuaState, hook_mask};
pub use opcode::{Instruction, OpCode};
pub use safe_option::SafeOption;

pub type LuaResult<T> = Result<T, LuaError>;

/// Registry slot of the main thread.
pub const LUA_RIDX_MAINTHREAD: i64 = 1;
/// Registry slot of the global table.
pub const LUA_RIDX_GLOBALS: i64 = 2;

/// A Lua process: globals, registry, module tables and the running
/// coroutine. Every coroutine shares these.
pub struct LuaVM {
    /// State of the running coroutine
    pub(crate) state: LuaState,
    pub(crate) current: Rc<LuaThread>,
    main_thread: Rc<LuaThread>,
    globals: LuaTableRef,
    registry: LuaTableRef,
    loaded: LuaTableRef,
    preload: LuaTableRef,
    /// Metatables of the non-table types (string, number, ...)
    pub(crate) type_metatables: HashMap<LuaValueKind, LuaTableRef, ahash::RandomState>,
    pub(crate) options: SafeOption,
    /// Nesting of native code re-entering the VM, across coroutines
    pub(crate) ccalls: usize,
    next_thread_id: usize,
    /// Used by `load` and `execute`
    pub compiler: Compiler,
}

fn new_table_ref(narr: usize, nrec: usize) -> LuaTableRef {
    Rc::new(std::cell::RefCell::new(LuaTable::new(narr, nrec)))
}

impl LuaVM {
    pub fn new(options: SafeOption) -> Self {
        let main_thread = Rc::new(LuaThread::new(0, None, ThreadStatus::Running));
        let globals = new_table_ref(0, 64);
        let registry = new_table_ref(2, 8);
        let loaded = new_table_ref(0, 16);
        let preload = new_table_ref(0, 4);
        {
            let mut reg = registry.borrow_mut();
            reg.set_int(LUA_RIDX_MAINTHREAD, LuaValue::Thread(main_thread.clone()));
            reg.set_int(LUA_RIDX_GLOBALS, LuaValue::Table(globals.clone()));
            reg.set_str("_LOADED", LuaValue::Table(loaded.clone()));
            reg.set_str("_PRELOAD", LuaValue::Table(preload.clone()));
        }
        globals.borrow_mut().set_str("_G", LuaValue::Table(globals.clone()));
        loaded.borrow_mut().set_str("_G", LuaValue::Table(globals.clone()));
        LuaVM {
            state: LuaState::new(),
            current: main_thread.clone(),
            main_thread,
            globals,
            registry,
            loaded,
            preload,
            type_metatables: HashMap::with_hasher(ahash::RandomState::new()),
            options,
            ccalls: 0,
            next_thread_id: 1,
            compiler: Compiler::default(),
        }
    }

    pub fn options(&self) -> &SafeOption {
        &self.options
    }

    pub fn globals(&self) -> LuaTableRef {
        self.globals.clone()
    }

    pub fn registry(&self) -> LuaTableRef {
        self.registry.clone()
    }

    /// `package.loaded`
    pub fn loaded(&self) -> LuaTableRef {
        self.loaded.clone()
    }

    /// `package.preload`
    pub fn preload_table(&self) -> LuaTableRef {
        self.preload.clone()
    }

    pub fn main_thread(&self) -> Rc<LuaThread> {
        self.main_thread.clone()
    }

    pub fn is_main_thread(&self) -> bool {
        Rc::ptr_eq(&self.current, &self.main_thread)
    }

    pub(crate) fn alloc_thread_id(&mut self) -> usize {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        id
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        self.globals.borrow_mut().set_str(name, value);
    }

    /// Installs a native function as a global.
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut LuaVM, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> + 'static,
    {
        self.set_global(name, LuaValue::function(LuaFunction::native(name, func)));
    }

    pub fn new_table_size(&self, narr: usize, nrec: usize) -> LuaValue {
        LuaValue::Table(new_table_ref(narr, nrec))
    }

    /// Closure over `chunk` whose `_ENV` is the global table.
    pub fn new_closure(&self, chunk: Rc<Chunk>) -> LuaValue {
        self.new_closure_with_env(chunk, LuaValue::Table(self.globals.clone()))
    }

    pub fn new_closure_with_env(&self, chunk: Rc<Chunk>, env: LuaValue) -> LuaValue {
        let upvalues = (0..chunk.upvalue_descs.len())
            .map(|i| LuaUpvalue::new_closed(if i == 0 { env.clone() } else { LuaValue::Nil }))
            .collect();
        LuaValue::function(LuaFunction::closure(chunk, upvalues))
    }

    /// Compiles source or undumps a binary chunk into a closure.
    pub fn load(&mut self, data: &[u8], name: &str) -> LuaResult<LuaValue> {
        let chunk = self.compiler.load_bytes(data, name)?;
        Ok(self.new_closure(chunk))
    }

    /// Runs a main chunk.
    pub fn exec(&mut self, chunk: Rc<Chunk>) -> LuaResult<Vec<LuaValue>> {
        let f = self.new_closure(chunk);
        self.call(f, Vec::new())
    }

    /// Compiles and runs `source`; the chunk is named after its text.
    pub fn execute(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        self.execute_named(source, source)
    }

    pub fn execute_named(&mut self, source: &str, name: &str) -> LuaResult<Vec<LuaValue>> {
        let chunk = self.compiler.load_bytes(source.as_bytes(), name)?;
        debug!("executing {}", chunk.source);
        self.exec(chunk)
    }

    /// Calls `f` in protected mode with `msgh` as message handler. The
    /// handler sees the stack at the error point.
    pub fn call_with_handler(
        &mut self,
        f: LuaValue,
        msgh: Option<LuaValue>,
        args: Vec<LuaValue>,
    ) -> LuaResult<Vec<LuaValue>> {
        let Some(handler) = msgh else {
            return self.call(f, args);
        };
        let xpcall = LuaValue::function(crate::stdlib::xpcall_function());
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push(f);
        full.push(handler);
        full.extend(args);
        let mut rets = self.call(xpcall, full)?.into_iter();
        match rets.next() {
            Some(LuaValue::Boolean(true)) => Ok(rets.collect()),
            _ => Err(LuaError::with_value(
                ErrorKind::User,
                rets.next().unwrap_or_default(),
            )),
        }
    }

    /// `require(name)` with an explicit opener: runs `opener(name)` once and
    /// caches its result in `package.loaded`.
    pub fn require(&mut self, name: &str, opener: LuaValue) -> LuaResult<LuaValue> {
        let cached = self.loaded.borrow().get_str(name);
        if !cached.is_nil() {
            return Ok(cached);
        }
        debug!("loading module {}", name);
        let rets = self.call(opener, vec![LuaValue::from(name)])?;
        let module = match rets.into_iter().next() {
            Some(v) if !v.is_nil() => v,
            _ => LuaValue::Boolean(true),
        };
        self.loaded.borrow_mut().set_str(name, module.clone());
        Ok(module)
    }

    /// Registers `opener` in `package.preload`.
    pub fn preload(&mut self, name: &str, opener: LuaValue) {
        self.preload.borrow_mut().set_str(name, opener);
    }

    /// Metatable of any value; non-table types share one per type.
    pub fn get_metatable(&self, v: &LuaValue) -> Option<LuaTableRef> {
        match v {
            LuaValue::Table(t) => t.borrow().metatable(),
            LuaValue::Userdata(u) => u.metatable(),
            _ => self.type_metatables.get(&v.kind()).cloned(),
        }
    }

    pub fn set_metatable(&mut self, v: &LuaValue, mt: Option<LuaTableRef>) {
        match v {
            LuaValue::Table(t) => t.borrow_mut().set_metatable(mt),
            LuaValue::Userdata(u) => u.set_metatable(mt),
            _ => match mt {
                Some(mt) => {
                    self.type_metatables.insert(v.kind(), mt);
                }
                None => {
                    self.type_metatables.remove(&v.kind());
                }
            },
        }
    }

    /// Raw field `event` of the metatable of `v`, nil when absent.
    pub fn get_meta_field(&self, v: &LuaValue, event: &str) -> LuaValue {
        match self.get_metatable(v) {
            Some(mt) => mt.borrow().get_str(event),
            None => LuaValue::Nil,
        }
    }

    /// Calls metamethod `event` of `v` with `v` as its only argument.
    pub fn call_meta_field(&mut self, v: &LuaValue, event: &str) -> LuaResult<Option<LuaValue>> {
        let tm = self.get_meta_field(v, event);
        if tm.is_nil() {
            return Ok(None);
        }
        let rets = self.call(tm, vec![v.clone()])?;
        Ok(Some(rets.into_iter().next().unwrap_or_default()))
    }

    /// `tostring` conversion, honouring `__tostring` and `__name`.
    pub fn to_display(&mut self, v: &LuaValue) -> LuaResult<LuaString> {
        if let Some(s) = self.call_meta_field(v, "__tostring")? {
            return match s {
                LuaValue::String(s) => Ok(s),
                _ => Err(self.rt_error(ErrorKind::Type, "'__tostring' must return a string")),
            };
        }
        if let Some(s) = to_lua_string(v) {
            return Ok(s);
        }
        let text = match v {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            _ => {
                let kind = match self.get_meta_field(v, "__name") {
                    LuaValue::String(name) => name.to_str_lossy(),
                    _ => v.type_name().to_string(),
                };
                format!("{}: 0x{:08x}", kind, v.address().unwrap_or_default())
            }
        };
        Ok(LuaString::from(text))
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        LuaVM::new(SafeOption::default())
    }
}
