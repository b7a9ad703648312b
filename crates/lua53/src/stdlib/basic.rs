// Basic library (_G global functions)
// Implements: assert, error, pcall, xpcall, print, type, tostring, tonumber,
// select, rawget, rawset, rawequal, rawlen, setmetatable, getmetatable,
// next, pairs, ipairs, load, unpack, require, package

use std::io::Write;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::lib_registry::LibraryModule;
use crate::lua_value::lua_convert::string_to_number;
use crate::lua_value::{LuaFunction, LuaString, LuaValue, NativeFunction, NativeKind};
use crate::lua_vm::{ArgParser, ErrorKind, LuaError, LuaResult, LuaVM, arg_error};
use crate::stdlib::table::table_unpack;

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "assert" => lua_assert,
        "error" => lua_error,
        "print" => lua_print,
        "type" => lua_type,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "select" => lua_select,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawequal" => lua_rawequal,
        "rawlen" => lua_rawlen,
        "setmetatable" => lua_setmetatable,
        "getmetatable" => lua_getmetatable,
        "next" => lua_next,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "load" => lua_load,
        "unpack" => table_unpack,
        "require" => lua_require,
    })
    .with_value("pcall", |_| LuaValue::function(pcall_function()))
    .with_value("xpcall", |_| LuaValue::function(xpcall_function()))
    .with_value("_VERSION", |_| LuaValue::from("Lua 5.3"))
    .with_value("package", package_table)
}

/// `package` with the process-wide `loaded` and `preload` tables.
fn package_table(vm: &mut LuaVM) -> LuaValue {
    let pkg = vm.new_table_size(0, 2);
    if let Some(t) = pkg.as_table() {
        let mut t = t.borrow_mut();
        t.set_str("loaded", LuaValue::from(vm.loaded()));
        t.set_str("preload", LuaValue::from(vm.preload_table()));
    }
    pkg
}

/// `pcall`; the call protocol runs its callee in a protected frame.
pub fn pcall_function() -> LuaFunction {
    LuaFunction::Native(NativeFunction {
        name: SmolStr::new("pcall"),
        func: Rc::new(lua_pcall),
        kind: NativeKind::Pcall,
    })
}

/// `xpcall`, with the message handler as second argument.
pub fn xpcall_function() -> LuaFunction {
    LuaFunction::Native(NativeFunction {
        name: SmolStr::new("xpcall"),
        func: Rc::new(lua_xpcall),
        kind: NativeKind::Xpcall,
    })
}

/// Error value raised by `error(v, level)`: strings get the position of
/// the function at `level`.
fn error_value(vm: &LuaVM, value: LuaValue, level: i64) -> LuaError {
    let value = match &value {
        LuaValue::String(s) if level > 0 => {
            let mut text = vm.where_(level as usize).into_bytes();
            text.extend_from_slice(s.as_bytes());
            LuaValue::String(LuaString::from(text))
        }
        _ => value,
    };
    LuaError::with_value(ErrorKind::User, value)
}

fn lua_assert(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let cond = p.check_any(vm, 1)?;
    if cond.to_bool() {
        return Ok(args);
    }
    match args.get(1) {
        Some(msg) => Err(LuaError::with_value(ErrorKind::User, msg.clone())),
        None => Err(error_value(vm, LuaValue::from("assertion failed!"), 1)),
    }
}

fn lua_error(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let level = p.opt_integer(vm, 2, 1)?;
    Err(error_value(vm, p.get(1), level))
}

fn lua_pcall(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut args = args.into_iter();
    let f = args.next().unwrap_or_default();
    match vm.call(f, args.collect()) {
        Ok(mut rets) => {
            rets.insert(0, LuaValue::Boolean(true));
            Ok(rets)
        }
        Err(e) if e.is_yield() => Err(e),
        Err(e) => Ok(vec![LuaValue::Boolean(false), e.value()]),
    }
}

fn lua_xpcall(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut args = args.into_iter();
    let f = args.next().unwrap_or_default();
    let handler = args.next().unwrap_or_default();
    match vm.call(f, args.collect()) {
        Ok(mut rets) => {
            rets.insert(0, LuaValue::Boolean(true));
            Ok(rets)
        }
        Err(e) if e.is_yield() => Err(e),
        Err(e) => {
            let value = match vm.call(handler, vec![e.value()]) {
                Ok(rets) => rets.into_iter().next().unwrap_or_default(),
                Err(e) => e.value(),
            };
            Ok(vec![LuaValue::Boolean(false), value])
        }
    }
}

fn lua_print(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let mut line = Vec::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            line.push(b'\t');
        }
        line.extend_from_slice(vm.to_display(v)?.as_bytes());
    }
    line.push(b'\n');
    let mut out = std::io::stdout().lock();
    out.write_all(&line)
        .and_then(|_| out.flush())
        .map_err(|e| vm.rt_error(ErrorKind::User, e.to_string()))?;
    Ok(Vec::new())
}

fn lua_type(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = ArgParser::new(&args).check_any(vm, 1)?;
    Ok(vec![LuaValue::from(v.type_name())])
}

fn lua_tostring(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = ArgParser::new(&args).check_any(vm, 1)?;
    Ok(vec![LuaValue::String(vm.to_display(&v)?)])
}

fn lua_tonumber(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    if p.is_none_or_nil(2) {
        let v = p.check_any(vm, 1)?;
        let n = match &v {
            LuaValue::Integer(_) | LuaValue::Float(_) => v.clone(),
            LuaValue::String(s) => string_to_number(s.as_bytes()).unwrap_or_default(),
            _ => LuaValue::Nil,
        };
        return Ok(vec![n]);
    }
    let base = p.check_integer(vm, 2)?;
    let LuaValue::String(s) = p.get(1) else {
        return Err(p.type_error(vm, 1, "string"));
    };
    if !(2..=36).contains(&base) {
        return Err(arg_error(vm, 2, "base out of range"));
    }
    Ok(vec![parse_with_base(s.as_bytes(), base as u32).map_or(LuaValue::Nil, LuaValue::Integer)])
}

/// Integer numeral in `base`, with optional sign and surrounding spaces.
fn parse_with_base(s: &[u8], base: u32) -> Option<i64> {
    let is_space = |c: &u8| matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c);
    let start = s.iter().position(|c| !is_space(c))?;
    let end = s.iter().rposition(|c| !is_space(c))? + 1;
    let mut digits = &s[start..end];
    let neg = digits.first() == Some(&b'-');
    if neg {
        digits = &digits[1..];
    }
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for &c in digits {
        let d = (c as char).to_digit(36).filter(|d| *d < base)?;
        n = n.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    Some(if neg { n.wrapping_neg() } else { n })
}

fn lua_select(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    if let LuaValue::String(s) = p.get(1)
        && s.as_bytes() == b"#"
    {
        return Ok(vec![LuaValue::Integer(args.len() as i64 - 1)]);
    }
    let top = args.len() as i64;
    let mut n = p.check_integer(vm, 1)?;
    if n < 0 {
        n += top;
    } else if n > top {
        n = top;
    }
    if n < 1 {
        return Err(arg_error(vm, 1, "index out of range"));
    }
    Ok(args[n as usize..].to_vec())
}

fn lua_rawget(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = p.check_table(vm, 1)?;
    let k = p.check_any(vm, 2)?;
    let v = t.borrow().get(&k);
    Ok(vec![v])
}

fn lua_rawset(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = p.check_table(vm, 1)?;
    let k = p.check_any(vm, 2)?;
    let v = p.check_any(vm, 3)?;
    vm.raw_set(&t, k, v)?;
    Ok(vec![LuaValue::Table(t)])
}

fn lua_rawequal(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let a = p.check_any(vm, 1)?;
    let b = p.check_any(vm, 2)?;
    Ok(vec![LuaValue::Boolean(a.raw_equal(&b))])
}

fn lua_rawlen(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let n = match args.first() {
        Some(LuaValue::Table(t)) => t.borrow().len(),
        Some(LuaValue::String(s)) => s.len() as i64,
        _ => return Err(arg_error(vm, 1, "table or string expected")),
    };
    Ok(vec![LuaValue::Integer(n)])
}

fn lua_setmetatable(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = p.check_table(vm, 1)?;
    let mt = match args.get(1) {
        Some(LuaValue::Nil) => None,
        Some(LuaValue::Table(mt)) => Some(mt.clone()),
        _ => return Err(arg_error(vm, 2, "nil or table expected")),
    };
    let obj = LuaValue::Table(t);
    if !vm.get_meta_field(&obj, "__metatable").is_nil() {
        return Err(vm.rt_error(ErrorKind::User, "cannot change a protected metatable"));
    }
    vm.set_metatable(&obj, mt);
    Ok(vec![obj])
}

fn lua_getmetatable(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = ArgParser::new(&args).check_any(vm, 1)?;
    let Some(mt) = vm.get_metatable(&v) else {
        return Ok(vec![LuaValue::Nil]);
    };
    let protected = mt.borrow().get_str("__metatable");
    if !protected.is_nil() {
        return Ok(vec![protected]);
    }
    Ok(vec![LuaValue::Table(mt)])
}

fn lua_next(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = p.check_table(vm, 1)?;
    let entry = t.borrow().next(&p.get(2));
    match entry {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![LuaValue::Nil]),
        Err(e) => Err(vm.rt_error(ErrorKind::KeyError, e.to_string())),
    }
}

fn lua_pairs(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let obj = p.check_any(vm, 1)?;
    let mm = vm.get_meta_field(&obj, "__pairs");
    if !mm.is_nil() {
        let mut rets = vm.call(mm, vec![obj])?;
        rets.resize(3, LuaValue::Nil);
        return Ok(rets);
    }
    p.check_table(vm, 1)?;
    let next = LuaValue::function(LuaFunction::native("next", lua_next));
    Ok(vec![next, obj, LuaValue::Nil])
}

fn ipairs_aux(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let i = p.check_integer(vm, 2)?.wrapping_add(1);
    let v = vm.get_table(&p.get(1), &LuaValue::Integer(i))?;
    if v.is_nil() {
        Ok(vec![LuaValue::Nil])
    } else {
        Ok(vec![LuaValue::Integer(i), v])
    }
}

fn lua_ipairs(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let obj = ArgParser::new(&args).check_any(vm, 1)?;
    let iter = LuaValue::function(LuaFunction::native("ipairs_aux", ipairs_aux));
    Ok(vec![iter, obj, LuaValue::Integer(0)])
}

/// load(chunk [, chunkname [, mode [, env]]])
fn lua_load(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let (data, default_name) = match p.get(1) {
        LuaValue::String(s) => (s.as_bytes().to_vec(), s.to_str_lossy()),
        LuaValue::Function(_) => (read_chunk(vm, p.get(1))?, "=(load)".to_string()),
        _ => return Err(p.type_error(vm, 1, "string")),
    };
    let name = match p.opt_string(vm, 2)? {
        Some(s) => s.to_str_lossy(),
        None => default_name,
    };
    let mode = match p.opt_string(vm, 3)? {
        Some(s) => s.to_str_lossy(),
        None => "bt".to_string(),
    };
    let is_binary = data.starts_with(b"\x1bLua");
    let refused = match (is_binary, mode.contains('b'), mode.contains('t')) {
        (true, false, _) => Some("binary"),
        (false, _, false) => Some("text"),
        _ => None,
    };
    if let Some(kind) = refused {
        let msg = format!("attempt to load a {} chunk (mode is '{}')", kind, mode);
        return Ok(vec![LuaValue::Nil, LuaValue::from(msg)]);
    }
    match vm.compiler.load_bytes(&data, &name) {
        Ok(chunk) => {
            let f = if args.len() >= 4 {
                vm.new_closure_with_env(chunk, p.get(4))
            } else {
                vm.new_closure(chunk)
            };
            Ok(vec![f])
        }
        Err(e) => Ok(vec![LuaValue::Nil, LuaValue::from(e.to_string())]),
    }
}

/// Concatenates the pieces returned by a `load` reader function.
fn read_chunk(vm: &mut LuaVM, reader: LuaValue) -> LuaResult<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        let piece = vm.call(reader.clone(), Vec::new())?.into_iter().next().unwrap_or_default();
        match piece {
            LuaValue::Nil => break,
            LuaValue::String(s) if s.is_empty() => break,
            LuaValue::String(s) => data.extend_from_slice(s.as_bytes()),
            _ => return Err(vm.rt_error(ErrorKind::User, "reader function must return a string")),
        }
    }
    Ok(data)
}

fn lua_require(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let name = ArgParser::new(&args).check_string(vm, 1)?.to_str_lossy();
    let cached = vm.loaded().borrow().get_str(&name);
    if !cached.is_nil() {
        return Ok(vec![cached]);
    }
    let opener = vm.preload_table().borrow().get_str(&name);
    if opener.is_nil() {
        let msg = format!("module '{}' not found:\n\tno field package.preload['{}']", name, name);
        return Err(vm.rt_error(ErrorKind::User, msg));
    }
    Ok(vec![vm.require(&name, opener)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_base() {
        assert_eq!(parse_with_base(b"ff", 16), Some(255));
        assert_eq!(parse_with_base(b"  -101  ", 2), Some(-5));
        assert_eq!(parse_with_base(b"zz", 36), Some(1295));
        assert_eq!(parse_with_base(b"8", 8), None);
        assert_eq!(parse_with_base(b"", 10), None);
        assert_eq!(parse_with_base(b"1 2", 10), None);
    }
}
