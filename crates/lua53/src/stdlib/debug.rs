// Debug library
// Implements: traceback, getinfo, sethook, gethook, getlocal, setlocal,
// getupvalue, setupvalue, upvalueid, upvaluejoin, getmetatable,
// setmetatable, getregistry
// Functions taking an optional leading thread argument inspect that
// coroutine's frames instead of the running ones.

use std::rc::Rc;

use crate::lib_registry::LibraryModule;
use crate::lua_value::lua_convert::to_lua_string;
use crate::lua_value::{LuaThread, LuaValue};
use crate::lua_vm::hook_mask::{MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};
use crate::lua_vm::{ArgParser, DebugInfo, LuaResult, LuaVM, arg_error};

pub fn create_debug_lib() -> LibraryModule {
    crate::lib_module!("debug", {
        "traceback" => debug_traceback,
        "getinfo" => debug_getinfo,
        "sethook" => debug_sethook,
        "gethook" => debug_gethook,
        "getlocal" => debug_getlocal,
        "setlocal" => debug_setlocal,
        "getupvalue" => debug_getupvalue,
        "setupvalue" => debug_setupvalue,
        "upvalueid" => debug_upvalueid,
        "upvaluejoin" => debug_upvaluejoin,
        "getmetatable" => debug_getmetatable,
        "setmetatable" => debug_setmetatable,
        "getregistry" => debug_getregistry,
    })
}

/// Optional leading thread argument, and the offset it adds to the
/// positions of the other arguments.
fn thread_arg(args: &[LuaValue]) -> (Option<Rc<LuaThread>>, usize) {
    match args.first() {
        Some(LuaValue::Thread(co)) => (Some(co.clone()), 1),
        _ => (None, 0),
    }
}

fn on_thread<R>(vm: &mut LuaVM, co: &Option<Rc<LuaThread>>, f: impl FnOnce(&mut LuaVM) -> R) -> R {
    match co {
        Some(co) => vm.with_thread_state(co, f),
        None => f(vm),
    }
}

fn is_other_thread(vm: &LuaVM, co: &Option<Rc<LuaThread>>) -> bool {
    co.as_ref().is_some_and(|co| !Rc::ptr_eq(co, &vm.running().0))
}

/// debug.traceback([thread,] [message [, level]])
fn debug_traceback(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, off) = thread_arg(&args);
    let p = ArgParser::new(&args);
    let msg = p.get(off + 1);
    let msg = match &msg {
        LuaValue::Nil => None,
        v => match to_lua_string(v) {
            Some(s) => Some(s.to_str_lossy()),
            // non-string messages pass through untouched
            None => return Ok(vec![msg]),
        },
    };
    let default_level = if is_other_thread(vm, &co) { 0 } else { 1 };
    let level = p.opt_integer(vm, off + 2, default_level)?.max(0) as usize;
    let tb = on_thread(vm, &co, |vm| vm.traceback(msg.as_deref(), level));
    Ok(vec![LuaValue::from(tb)])
}

/// debug.getinfo([thread,] f [, what])
fn debug_getinfo(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, off) = thread_arg(&args);
    let p = ArgParser::new(&args);
    let what = match p.opt_string(vm, off + 2)? {
        Some(s) => s.as_bytes().to_vec(),
        None => b"flnStuL".to_vec(),
    };
    if what.iter().any(|c| !b"SlnutfL".contains(c)) {
        return Err(arg_error(vm, off + 2, "invalid option"));
    }
    let info = match p.get(off + 1) {
        f @ LuaValue::Function(_) => vm.get_function_info(&f),
        _ => {
            let level = p.check_integer(vm, off + 1)?;
            if level < 0 {
                None
            } else {
                on_thread(vm, &co, |vm| vm.get_info(level as usize))
            }
        }
    };
    match info {
        Some(info) => Ok(vec![info_table(vm, info, &what)]),
        None => Ok(vec![LuaValue::Nil]),
    }
}

fn info_table(vm: &LuaVM, info: DebugInfo, what: &[u8]) -> LuaValue {
    let result = vm.new_table_size(0, 16);
    let Some(t) = result.as_table() else {
        return result;
    };
    let mut t = t.borrow_mut();
    for c in what {
        match c {
            b'S' => {
                t.set_str("source", LuaValue::from(info.source.as_str()));
                t.set_str("short_src", LuaValue::from(info.short_src.as_str()));
                t.set_str("what", LuaValue::from(info.what));
                t.set_str("linedefined", LuaValue::Integer(info.line_defined));
                t.set_str("lastlinedefined", LuaValue::Integer(info.last_line_defined));
            }
            b'l' => t.set_str("currentline", LuaValue::Integer(info.current_line)),
            b'u' => {
                t.set_str("nups", LuaValue::Integer(info.nups as i64));
                t.set_str("nparams", LuaValue::Integer(info.nparams as i64));
                t.set_str("isvararg", LuaValue::Boolean(info.is_vararg));
            }
            b'n' => {
                let name = info.name.as_deref().map_or(LuaValue::Nil, LuaValue::from);
                t.set_str("name", name);
                t.set_str("namewhat", LuaValue::from(info.namewhat));
            }
            b't' => t.set_str("istailcall", LuaValue::Boolean(info.is_tail_call)),
            b'f' => t.set_str("func", info.func.clone()),
            b'L' => {
                let lines = vm.new_table_size(0, info.active_lines.len());
                if let Some(l) = lines.as_table() {
                    let mut l = l.borrow_mut();
                    for line in &info.active_lines {
                        l.set_int(*line as i64, LuaValue::Boolean(true));
                    }
                }
                t.set_str("activelines", lines);
            }
            _ => {}
        }
    }
    drop(t);
    result
}

/// debug.sethook([thread,] hook, mask [, count]); no hook turns it off.
fn debug_sethook(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, off) = thread_arg(&args);
    let p = ArgParser::new(&args);
    if p.is_none_or_nil(off + 1) {
        on_thread(vm, &co, |vm| vm.set_hook(None, 0, 0));
        return Ok(Vec::new());
    }
    let func = p.check_function(vm, off + 1)?;
    let mask_str = p.check_string(vm, off + 2)?;
    let count = p.opt_integer(vm, off + 3, 0)?.clamp(0, u32::MAX as i64) as u32;
    let mut mask = 0;
    for c in mask_str.as_bytes() {
        match c {
            b'c' => mask |= MASK_CALL,
            b'r' => mask |= MASK_RET,
            b'l' => mask |= MASK_LINE,
            _ => {}
        }
    }
    on_thread(vm, &co, |vm| vm.set_hook(Some(LuaValue::Function(func)), mask, count));
    Ok(Vec::new())
}

/// debug.gethook([thread]) -> hook, mask, count
fn debug_gethook(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, _) = thread_arg(&args);
    let Some(hook) = on_thread(vm, &co, |vm| vm.get_hook()) else {
        return Ok(vec![LuaValue::Nil, LuaValue::from(""), LuaValue::Integer(0)]);
    };
    let mut mask = String::new();
    for (bit, c) in [(MASK_CALL, 'c'), (MASK_RET, 'r'), (MASK_LINE, 'l')] {
        if hook.mask & bit != 0 {
            mask.push(c);
        }
    }
    let count = if hook.mask & MASK_COUNT != 0 { hook.count } else { 0 };
    Ok(vec![hook.func, LuaValue::from(mask), LuaValue::Integer(count as i64)])
}

/// Level argument of getlocal/setlocal, checked against the frames of
/// the target coroutine.
fn check_level(vm: &mut LuaVM, co: &Option<Rc<LuaThread>>, p: &ArgParser, n: usize) -> LuaResult<usize> {
    let level = p.check_integer(vm, n)?;
    let exists = level >= 0 && on_thread(vm, co, |vm| vm.get_info(level as usize).is_some());
    if !exists {
        return Err(arg_error(vm, n, "level out of range"));
    }
    Ok(level as usize)
}

/// debug.getlocal([thread,] f, local)
fn debug_getlocal(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, off) = thread_arg(&args);
    let p = ArgParser::new(&args);
    let n = p.check_integer(vm, off + 2)?;
    if let LuaValue::Function(f) = p.get(off + 1) {
        // parameter names only
        let name = f
            .as_lua()
            .filter(|_| n > 0)
            .and_then(|c| c.chunk.local_name(n as usize, 0).map(|s| s.to_string()));
        return Ok(vec![name.map_or(LuaValue::Nil, LuaValue::from)]);
    }
    let level = check_level(vm, &co, &p, off + 1)?;
    match on_thread(vm, &co, |vm| vm.get_local(level, n)) {
        Some((name, value)) => Ok(vec![LuaValue::from(name), value]),
        None => Ok(vec![LuaValue::Nil]),
    }
}

/// debug.setlocal([thread,] level, local, value)
fn debug_setlocal(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let (co, off) = thread_arg(&args);
    let p = ArgParser::new(&args);
    let level = check_level(vm, &co, &p, off + 1)?;
    let n = p.check_integer(vm, off + 2)?;
    let value = p.check_any(vm, off + 3)?;
    let name = on_thread(vm, &co, |vm| vm.set_local(level, n, value));
    Ok(vec![name.map_or(LuaValue::Nil, LuaValue::from)])
}

fn upvalue_index(vm: &LuaVM, p: &ArgParser, n: usize) -> LuaResult<usize> {
    let i = p.check_integer(vm, n)?;
    Ok(if i < 1 { 0 } else { i as usize })
}

/// debug.getupvalue(f, up)
fn debug_getupvalue(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let f = LuaValue::Function(p.check_function(vm, 1)?);
    let n = upvalue_index(vm, &p, 2)?;
    match vm.get_upvalue(&f, n) {
        Some((name, value)) => Ok(vec![LuaValue::from(name), value]),
        None => Ok(Vec::new()),
    }
}

/// debug.setupvalue(f, up, value)
fn debug_setupvalue(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let f = LuaValue::Function(p.check_function(vm, 1)?);
    let n = upvalue_index(vm, &p, 2)?;
    let value = p.check_any(vm, 3)?;
    match vm.set_upvalue(&f, n, value) {
        Some(name) => Ok(vec![LuaValue::from(name)]),
        None => Ok(Vec::new()),
    }
}

/// Function and upvalue index arguments of upvalueid/upvaluejoin.
fn check_upvalue(vm: &LuaVM, p: &ArgParser, argf: usize, argn: usize) -> LuaResult<(LuaValue, usize)> {
    let f = LuaValue::Function(p.check_function(vm, argf)?);
    let n = upvalue_index(vm, p, argn)?;
    if vm.upvalue_id(&f, n).is_none() {
        return Err(arg_error(vm, argn, "invalid upvalue index"));
    }
    Ok((f, n))
}

/// debug.upvalueid(f, n): equal for upvalues shared between closures.
fn debug_upvalueid(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let (f, n) = check_upvalue(vm, &p, 1, 2)?;
    let id = vm.upvalue_id(&f, n).unwrap_or_default();
    Ok(vec![LuaValue::LightUserdata(id)])
}

/// debug.upvaluejoin(f1, n1, f2, n2)
fn debug_upvaluejoin(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let (f1, n1) = check_upvalue(vm, &p, 1, 2)?;
    let (f2, n2) = check_upvalue(vm, &p, 3, 4)?;
    vm.upvalue_join(&f1, n1, &f2, n2)?;
    Ok(Vec::new())
}

/// debug.getmetatable(v), ignoring `__metatable`.
fn debug_getmetatable(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = ArgParser::new(&args).check_any(vm, 1)?;
    Ok(vec![vm.get_metatable(&v).map_or(LuaValue::Nil, LuaValue::Table)])
}

/// debug.setmetatable(v, mt) for a value of any type.
fn debug_setmetatable(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let v = p.get(1);
    let mt = match p.get(2) {
        LuaValue::Nil => None,
        LuaValue::Table(mt) => Some(mt),
        _ => return Err(p.type_error(vm, 2, "nil or table")),
    };
    vm.set_metatable(&v, mt);
    Ok(vec![v])
}

fn debug_getregistry(vm: &mut LuaVM, _args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Table(vm.registry())])
}
