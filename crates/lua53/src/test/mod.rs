// End-to-end tests: Lua scripts run through the VM with the prelude
// installed, asserting with the prelude's `assert`.
mod test_basic;
mod test_closures;
mod test_coroutine;
mod test_debug;
mod test_errors;
mod test_metatables;
mod test_string;
mod test_table;

use crate::*;

/// VM with every prelude library installed.
pub(crate) fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new(SafeOption::default());
    open_stdlib(&mut vm, Stdlib::All);
    vm
}

/// Runs `src` as chunk `=test`, so positions read `test:LINE:`.
pub(crate) fn run(vm: &mut LuaVM, src: &str) -> LuaResult<Vec<LuaValue>> {
    vm.execute_named(src, "=test")
}

/// Runs `src` in a fresh VM and fails the test on any error.
pub(crate) fn check(src: &str) {
    let mut vm = new_vm();
    if let Err(e) = run(&mut vm, src) {
        panic!("script failed: {}", e);
    }
}
