// Minimal standard prelude
// Enough of the base, coroutine, string, table and debug libraries to
// drive the VM from Lua code.

pub mod basic;
pub mod coroutine;
pub mod debug;
pub mod string;
pub mod table;

use crate::lib_registry::LibraryRegistry;
use crate::lua_vm::LuaVM;

pub use basic::{pcall_function, xpcall_function};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdlib {
    Basic,
    Coroutine,
    String,
    Table,
    Debug,

    All,
}

/// Installs the selected libraries into the globals of `vm`.
pub fn open_stdlib(vm: &mut LuaVM, lib: Stdlib) {
    let mut registry = LibraryRegistry::new();
    let wants = |l: Stdlib| lib == l || lib == Stdlib::All;
    if wants(Stdlib::Basic) {
        registry.register(basic::create_basic_lib());
    }
    if wants(Stdlib::Coroutine) {
        registry.register(coroutine::create_coroutine_lib());
    }
    if wants(Stdlib::String) {
        registry.register(string::create_string_lib());
    }
    if wants(Stdlib::Table) {
        registry.register(table::create_table_lib());
    }
    if wants(Stdlib::Debug) {
        registry.register(debug::create_debug_lib());
    }
    registry.load_all(vm);
    if wants(Stdlib::String) {
        string::set_string_metatable(vm);
    }
}
