// Lua 5.3 core
// Scanner, parser and register bytecode compiler, binary chunk (un)dumper,
// and a virtual machine with metatables, coroutines and a minimal prelude.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod lib_registry;
pub mod lua_pattern;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use compiler::{CompileMode, Compiler};
pub use lib_registry::LibraryRegistry;
pub use lua_value::{Chunk, LuaFunction, LuaString, LuaTable, LuaValue};
pub use lua_vm::{ErrorKind, Instruction, LuaError, LuaResult, LuaVM, OpCode, SafeOption};
pub use stdlib::{Stdlib, open_stdlib};
