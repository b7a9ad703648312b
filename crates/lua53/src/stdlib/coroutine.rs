// Coroutine library
// Implements: create, resume, yield, status, wrap, running, isyieldable

use std::rc::Rc;

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaFunction, LuaString, LuaThread, LuaValue};
use crate::lua_vm::{ArgParser, LuaError, LuaResult, LuaVM, arg_error};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "wrap" => coroutine_wrap,
        "running" => coroutine_running,
        "isyieldable" => coroutine_isyieldable,
    })
}

fn check_thread(vm: &LuaVM, args: &[LuaValue]) -> LuaResult<Rc<LuaThread>> {
    match args.first() {
        Some(LuaValue::Thread(co)) => Ok(co.clone()),
        _ => Err(arg_error(vm, 1, "coroutine expected")),
    }
}

fn coroutine_create(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let f = ArgParser::new(&args).check_function(vm, 1)?;
    let co = vm.new_thread(LuaValue::Function(f));
    Ok(vec![LuaValue::Thread(co)])
}

fn coroutine_resume(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let co = check_thread(vm, &args)?;
    let rest = args.into_iter().skip(1).collect();
    match vm.resume(&co, rest) {
        Ok(mut vals) => {
            vals.insert(0, LuaValue::Boolean(true));
            Ok(vals)
        }
        Err(e) => Ok(vec![LuaValue::Boolean(false), e.value()]),
    }
}

fn coroutine_yield(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    vm.yield_thread(args)
}

fn coroutine_status(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let co = check_thread(vm, &args)?;
    Ok(vec![LuaValue::from(vm.status(&co))])
}

/// The returned function resumes the coroutine and raises its errors,
/// with position information prepended to string messages.
fn coroutine_wrap(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let f = ArgParser::new(&args).check_function(vm, 1)?;
    let co = vm.new_thread(LuaValue::Function(f));
    let wrapped = LuaFunction::native("wrap", move |vm, args| match vm.resume(&co, args) {
        Ok(vals) => Ok(vals),
        Err(e) => match e.value() {
            LuaValue::String(s) => {
                let mut msg = vm.where_(1).into_bytes();
                msg.extend_from_slice(s.as_bytes());
                Err(LuaError::with_value(e.kind(), LuaValue::String(LuaString::from(msg))))
            }
            _ => Err(e),
        },
    });
    Ok(vec![LuaValue::function(wrapped)])
}

fn coroutine_running(vm: &mut LuaVM, _args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, is_main) = vm.running();
    Ok(vec![LuaValue::Thread(co), LuaValue::Boolean(is_main)])
}

fn coroutine_isyieldable(vm: &mut LuaVM, _args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Boolean(vm.is_yieldable())])
}
