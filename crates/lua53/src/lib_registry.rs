// Library registration for the standard prelude
// A library is a named list of native functions and values; loading it
// builds the library table, publishes it as a global and in
// `package.loaded`.

use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM};

/// Native function of a library.
pub type LibFunction = fn(&mut LuaVM, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;

/// Builds a value when the library loads.
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

pub enum LibraryEntry {
    Function(LibFunction),
    Value(ValueInitializer),
}

pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: LibFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }

    /// Name natives carry in tracebacks and argument errors.
    fn qualified(&self, entry: &str) -> String {
        if self.name == "_G" {
            entry.to_string()
        } else {
            format!("{}.{}", self.name, entry)
        }
    }
}

/// Builds a `LibraryModule` from `"name" => function` pairs.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

#[derive(Default)]
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &mut LuaVM) {
        for module in &self.modules {
            self.load_module(vm, module);
        }
    }

    /// `_G` entries become globals; any other module becomes a global
    /// table registered in `package.loaded`.
    pub fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) {
        let lib = vm.new_table_size(0, module.entries.len());
        let Some(table) = lib.as_table().cloned() else {
            return;
        };
        for (name, entry) in &module.entries {
            let value = match entry {
                LibraryEntry::Function(func) => {
                    LuaValue::function(LuaFunction::native(&module.qualified(name), *func))
                }
                LibraryEntry::Value(init) => init(vm),
            };
            if module.name == "_G" {
                vm.set_global(name, value);
            } else {
                table.borrow_mut().set_str(name, value);
            }
        }
        if module.name != "_G" {
            vm.set_global(module.name, lib.clone());
            vm.loaded().borrow_mut().set_str(module.name, lib);
        }
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}
