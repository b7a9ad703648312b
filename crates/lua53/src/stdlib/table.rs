// Table library
// Implements: concat, insert, pack, remove, unpack
// Element access goes through `__index`/`__newindex` and the length
// through `__len`.

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::lua_limits::LUAI_MAXSTACK;
use crate::lua_vm::{ArgParser, ErrorKind, LuaResult, LuaVM, arg_error};

pub fn create_table_lib() -> LibraryModule {
    crate::lib_module!("table", {
        "concat" => table_concat,
        "insert" => table_insert,
        "pack" => table_pack,
        "remove" => table_remove,
        "unpack" => table_unpack,
    })
}

/// `#t`, which must be an integer.
fn length_of(vm: &mut LuaVM, t: &LuaValue) -> LuaResult<i64> {
    match vm.len(t)? {
        LuaValue::Integer(n) => Ok(n),
        _ => Err(vm.rt_error(ErrorKind::Length, "object length is not an integer")),
    }
}

/// table.concat(list [, sep [, i [, j]]])
fn table_concat(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = LuaValue::Table(p.check_table(vm, 1)?);
    let sep = p.opt_string(vm, 2)?;
    let i = p.opt_integer(vm, 3, 1)?;
    let j = if p.is_none_or_nil(4) {
        length_of(vm, &t)?
    } else {
        p.check_integer(vm, 4)?
    };

    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        match vm.get_table(&t, &LuaValue::Integer(k))? {
            LuaValue::String(s) => out.extend_from_slice(s.as_bytes()),
            v @ (LuaValue::Integer(_) | LuaValue::Float(_)) => {
                out.extend_from_slice(vm.to_display(&v)?.as_bytes());
            }
            _ => {
                let msg = format!("invalid value (at index {}) in table for 'concat'", k);
                return Err(vm.rt_error(ErrorKind::User, msg));
            }
        }
        if k == j {
            break;
        }
        if let Some(sep) = &sep {
            out.extend_from_slice(sep.as_bytes());
        }
        k += 1;
    }
    Ok(vec![LuaValue::from(LuaString::from(out))])
}

/// table.insert(list, [pos,] value)
fn table_insert(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = LuaValue::Table(p.check_table(vm, 1)?);
    let end = length_of(vm, &t)?.wrapping_add(1);
    let (pos, value) = match args.len() {
        2 => (end, p.get(2)),
        3 => {
            let pos = p.check_integer(vm, 2)?;
            if pos < 1 || pos > end {
                return Err(arg_error(vm, 2, "position out of bounds"));
            }
            let mut i = end;
            while i > pos {
                let v = vm.get_table(&t, &LuaValue::Integer(i - 1))?;
                vm.set_table(&t, LuaValue::Integer(i), v)?;
                i -= 1;
            }
            (pos, p.get(3))
        }
        _ => {
            return Err(vm.rt_error(ErrorKind::User, "wrong number of arguments to 'insert'"));
        }
    };
    vm.set_table(&t, LuaValue::Integer(pos), value)?;
    Ok(Vec::new())
}

/// table.remove(list [, pos])
fn table_remove(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = LuaValue::Table(p.check_table(vm, 1)?);
    let size = length_of(vm, &t)?;
    let mut pos = p.opt_integer(vm, 2, size)?;
    // `size + 1` is accepted so that removing past the end yields nil
    if pos != size && (pos < 1 || pos > size.wrapping_add(1)) {
        return Err(arg_error(vm, 1, "position out of bounds"));
    }
    let removed = vm.get_table(&t, &LuaValue::Integer(pos))?;
    while pos < size {
        let next = vm.get_table(&t, &LuaValue::Integer(pos + 1))?;
        vm.set_table(&t, LuaValue::Integer(pos), next)?;
        pos += 1;
    }
    vm.set_table(&t, LuaValue::Integer(pos), LuaValue::Nil)?;
    Ok(vec![removed])
}

/// table.pack(...), with the count stored in field `n`.
fn table_pack(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let packed = vm.new_table_size(args.len(), 1);
    if let Some(t) = packed.as_table() {
        let mut t = t.borrow_mut();
        let n = args.len() as i64;
        for (i, v) in args.into_iter().enumerate() {
            t.set_int(i as i64 + 1, v);
        }
        t.set_str("n", LuaValue::Integer(n));
    }
    Ok(vec![packed])
}

/// table.unpack(list [, i [, j]]); also the global `unpack`.
pub(crate) fn table_unpack(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let t = p.get(1);
    let i = p.opt_integer(vm, 2, 1)?;
    let j = if p.is_none_or_nil(3) {
        length_of(vm, &t)?
    } else {
        p.check_integer(vm, 3)?
    };
    if i > j {
        return Ok(Vec::new());
    }
    let n = (j as i128 - i as i128 + 1) as u128;
    if n >= LUAI_MAXSTACK as u128 {
        return Err(vm.rt_error(ErrorKind::User, "too many results to unpack"));
    }
    let mut out = Vec::with_capacity(n as usize);
    for k in i..=j {
        out.push(vm.get_table(&t, &LuaValue::Integer(k))?);
    }
    Ok(out)
}
