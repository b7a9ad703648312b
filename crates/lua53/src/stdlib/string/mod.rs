// String library
// Implements: len, sub, upper, lower, rep, byte, char, reverse, format,
// find, match, gmatch, gsub, dump
// Strings are byte strings; positions are 1-based and negative positions
// count from the end.

mod string_format;

use std::cell::RefCell;
use std::rc::Rc;

use crate::lib_registry::LibraryModule;
use crate::lua_pattern::{self, Capture, Captures, MatchAll, PatternError, Program};
use crate::lua_value::chunk_serializer;
use crate::lua_value::lua_convert::to_lua_string;
use crate::lua_value::{LuaFunction, LuaString, LuaValue};
use crate::lua_vm::lua_limits::MAX_STRING_SIZE;
use crate::lua_vm::{ArgParser, ErrorKind, LuaError, LuaResult, LuaVM, arg_error};

pub use string_format::string_format;

pub fn create_string_lib() -> LibraryModule {
    crate::lib_module!("string", {
        "len" => string_len,
        "sub" => string_sub,
        "upper" => string_upper,
        "lower" => string_lower,
        "rep" => string_rep,
        "byte" => string_byte,
        "char" => string_char,
        "reverse" => string_reverse,
        "format" => string_format,
        "find" => string_find,
        "match" => string_match,
        "gmatch" => string_gmatch,
        "gsub" => string_gsub,
        "dump" => string_dump,
    })
}

/// Gives strings a metatable whose `__index` is the string library, so
/// `s:upper()` works.
pub fn set_string_metatable(vm: &mut LuaVM) {
    let lib = vm.loaded().borrow().get_str("string");
    let mt = vm.new_table_size(0, 1);
    let Some(t) = mt.as_table().cloned() else {
        return;
    };
    t.borrow_mut().set_str("__index", lib);
    vm.set_metatable(&LuaValue::from(""), Some(t));
}

/// Relative string position: negative values count from the end.
fn posrelat(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if pos.unsigned_abs() > len as u64 {
        0
    } else {
        len as i64 + pos + 1
    }
}

fn pattern_error(vm: &LuaVM, e: PatternError) -> LuaError {
    vm.rt_error(ErrorKind::User, e.to_string())
}

fn string_len(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = ArgParser::new(&args).check_string(vm, 1)?;
    Ok(vec![LuaValue::Integer(s.len() as i64)])
}

/// string.sub(s, i [, j])
fn string_sub(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let s = p.check_string(vm, 1)?;
    let len = s.len();
    let start = posrelat(p.opt_integer(vm, 2, 1)?, len).max(1);
    let end = posrelat(p.opt_integer(vm, 3, -1)?, len).min(len as i64);
    if start > end {
        return Ok(vec![LuaValue::from("")]);
    }
    let sub = &s.as_bytes()[start as usize - 1..end as usize];
    Ok(vec![LuaValue::String(LuaString::from(sub))])
}

fn string_upper(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = ArgParser::new(&args).check_string(vm, 1)?;
    Ok(vec![LuaValue::String(LuaString::from(s.as_bytes().to_ascii_uppercase()))])
}

fn string_lower(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = ArgParser::new(&args).check_string(vm, 1)?;
    Ok(vec![LuaValue::String(LuaString::from(s.as_bytes().to_ascii_lowercase()))])
}

/// string.rep(s, n [, sep])
fn string_rep(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let s = p.check_string(vm, 1)?;
    let n = p.check_integer(vm, 2)?;
    let sep = p.opt_string(vm, 3)?;
    if n <= 0 {
        return Ok(vec![LuaValue::from("")]);
    }
    let sep = sep.as_ref().map_or(&[][..], |s| s.as_bytes());
    let total = (s.len() as u128 + sep.len() as u128) * n as u128 - sep.len() as u128;
    if total >= MAX_STRING_SIZE as u128 {
        return Err(vm.rt_error(ErrorKind::User, "resulting string too large"));
    }
    let mut out = Vec::with_capacity(total as usize);
    for i in 0..n {
        if i > 0 {
            out.extend_from_slice(sep);
        }
        out.extend_from_slice(s.as_bytes());
    }
    Ok(vec![LuaValue::String(LuaString::from(out))])
}

/// string.byte(s [, i [, j]])
fn string_byte(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let s = p.check_string(vm, 1)?;
    let len = s.len();
    let i = p.opt_integer(vm, 2, 1)?;
    let start = posrelat(i, len).max(1);
    let end = posrelat(p.opt_integer(vm, 3, i)?, len).min(len as i64);
    if start > end {
        return Ok(Vec::new());
    }
    let bytes = &s.as_bytes()[start as usize - 1..end as usize];
    Ok(bytes.iter().map(|b| LuaValue::Integer(*b as i64)).collect())
}

/// string.char(...)
fn string_char(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let mut out = Vec::with_capacity(args.len());
    for n in 1..=args.len() {
        let c = p.check_integer(vm, n)?;
        if !(0..=255).contains(&c) {
            return Err(arg_error(vm, n, "value out of range"));
        }
        out.push(c as u8);
    }
    Ok(vec![LuaValue::String(LuaString::from(out))])
}

fn string_reverse(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let s = ArgParser::new(&args).check_string(vm, 1)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(vec![LuaValue::String(LuaString::from(bytes))])
}

/// Lua value of one capture.
fn capture_value(text: &[u8], cap: Capture) -> LuaValue {
    match cap {
        Capture::Substring(s, e) => LuaValue::String(LuaString::from(&text[s..e])),
        Capture::Position(p) => LuaValue::Integer(p as i64 + 1),
    }
}

fn capture_values(text: &[u8], caps: &Captures) -> Vec<LuaValue> {
    caps.values().into_iter().map(|c| capture_value(text, c)).collect()
}

fn has_specials(pat: &[u8]) -> bool {
    pat.iter().any(|c| b"^$*+?.([%-".contains(c))
}

/// Shared body of `find` and `match`.
fn str_find_aux(vm: &mut LuaVM, args: Vec<LuaValue>, find: bool) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let s = p.check_string(vm, 1)?;
    let pat = p.check_string(vm, 2)?;
    let text = s.as_bytes();
    let init = posrelat(p.opt_integer(vm, 3, 1)?, text.len()).max(1);
    if init > text.len() as i64 + 1 {
        return Ok(vec![LuaValue::Nil]);
    }
    let init = init as usize - 1;

    if find && (p.get(4).to_bool() || !has_specials(pat.as_bytes())) {
        return Ok(
            match lua_pattern::find_bytes(&text[init..], pat.as_bytes()) {
                Some(at) => vec![
                    LuaValue::Integer((init + at + 1) as i64),
                    LuaValue::Integer((init + at + pat.len()) as i64),
                ],
                None => vec![LuaValue::Nil],
            },
        );
    }

    let prog = Program::compile(pat.as_bytes()).map_err(|e| pattern_error(vm, e))?;
    let caps = prog.find(text, init).map_err(|e| pattern_error(vm, e))?;
    let Some(caps) = caps else {
        return Ok(vec![LuaValue::Nil]);
    };
    if !find {
        return Ok(capture_values(text, &caps));
    }
    let mut out = vec![
        LuaValue::Integer(caps.start as i64 + 1),
        LuaValue::Integer(caps.end as i64),
    ];
    out.extend(caps.groups.iter().map(|c| capture_value(text, *c)));
    Ok(out)
}

/// string.find(s, pattern [, init [, plain]])
fn string_find(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    str_find_aux(vm, args, true)
}

/// string.match(s, pattern [, init])
fn string_match(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    str_find_aux(vm, args, false)
}

/// string.gmatch(s, pattern): iterator over successive matches. A `^`
/// in the pattern matches a literal caret.
fn string_gmatch(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let s = p.check_string(vm, 1)?;
    let pat = p.check_string(vm, 2)?;
    let prog = Program::compile_unanchored(pat.as_bytes()).map_err(|e| pattern_error(vm, e))?;
    let matches: RefCell<MatchAll<LuaString>> = RefCell::new(lua_pattern::match_all(Rc::new(prog), s.clone()));
    let iter = LuaFunction::native("gmatch_aux", move |vm, _args| {
        let next = matches.borrow_mut().next();
        match next {
            Some(Ok(caps)) => Ok(capture_values(s.as_bytes(), &caps)),
            Some(Err(e)) => Err(pattern_error(vm, e)),
            None => Ok(vec![LuaValue::Nil]),
        }
    });
    Ok(vec![LuaValue::function(iter)])
}

/// Appends the replacement for one `gsub` match.
fn add_value(
    vm: &mut LuaVM,
    repl: &LuaValue,
    text: &[u8],
    caps: &Captures,
    out: &mut Vec<u8>,
) -> LuaResult<()> {
    let value = match repl {
        LuaValue::Function(_) => {
            let args = capture_values(text, caps);
            vm.call(repl.clone(), args)?.into_iter().next().unwrap_or_default()
        }
        LuaValue::Table(_) => {
            let key = caps.get(0).map_err(|e| pattern_error(vm, e))?;
            vm.get_table(repl, &capture_value(text, key))?
        }
        _ => {
            let Some(repl) = to_lua_string(repl) else {
                return Ok(());
            };
            return lua_pattern::expand_replacement(repl.as_bytes(), text, caps, out)
                .map_err(|e| pattern_error(vm, e));
        }
    };
    match value {
        LuaValue::Nil | LuaValue::Boolean(false) => out.extend_from_slice(&text[caps.start..caps.end]),
        v => match to_lua_string(&v) {
            Some(s) => out.extend_from_slice(s.as_bytes()),
            None => {
                let msg = format!("invalid replacement value (a {})", vm.type_name_of(&v));
                return Err(vm.rt_error(ErrorKind::User, msg));
            }
        },
    }
    Ok(())
}

/// string.gsub(s, pattern, repl [, n])
fn string_gsub(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let s = p.check_string(vm, 1)?;
    let pat = p.check_string(vm, 2)?;
    let repl = p.get(3);
    if !matches!(
        repl,
        LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::String(_) | LuaValue::Table(_) | LuaValue::Function(_)
    ) {
        return Err(p.type_error(vm, 3, "string/function/table"));
    }
    let text = s.as_bytes();
    let max_n = p.opt_integer(vm, 4, text.len() as i64 + 1)?;
    let prog = Program::compile(pat.as_bytes()).map_err(|e| pattern_error(vm, e))?;
    let anchored = prog.is_anchored();

    let mut out = Vec::with_capacity(text.len());
    let mut pos = 0;
    let mut last_match = None;
    let mut n = 0;
    while n < max_n {
        let caps = prog.match_at(text, pos).map_err(|e| pattern_error(vm, e))?;
        match caps {
            Some(caps) if Some(caps.end) != last_match => {
                n += 1;
                add_value(vm, &repl, text, &caps, &mut out)?;
                pos = caps.end;
                last_match = Some(caps.end);
            }
            _ if pos < text.len() => {
                out.push(text[pos]);
                pos += 1;
            }
            _ => break,
        }
        if anchored {
            break;
        }
    }
    out.extend_from_slice(&text[pos..]);
    Ok(vec![LuaValue::String(LuaString::from(out)), LuaValue::Integer(n)])
}

/// string.dump(f [, strip])
fn string_dump(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let f = p.check_function(vm, 1)?;
    let Some(closure) = f.as_lua() else {
        return Err(vm.rt_error(ErrorKind::User, "unable to dump given function"));
    };
    let bytes = chunk_serializer::dump(&closure.chunk, p.get(2).to_bool());
    Ok(vec![LuaValue::String(LuaString::from(bytes))])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posrelat() {
        assert_eq!(posrelat(3, 5), 3);
        assert_eq!(posrelat(-1, 5), 5);
        assert_eq!(posrelat(-5, 5), 1);
        assert_eq!(posrelat(-6, 5), 0);
        assert_eq!(posrelat(i64::MIN, 5), 0);
    }

    #[test]
    fn test_has_specials() {
        assert!(!has_specials(b"hello world"));
        assert!(has_specials(b"a.b"));
        assert!(has_specials(b"100%"));
    }
}
