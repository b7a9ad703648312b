// Argument checks for native functions
// Positions are 1-based as in Lua; errors read
// "bad argument #n to 'name' (...)" with the call-site name of the native.

use crate::lua_value::lua_convert::{float_to_integer, to_float, to_integer, to_lua_string};
use crate::lua_value::{LuaFunction, LuaString, LuaTableRef, LuaValue};
use crate::lua_vm::{ErrorKind, LuaError, LuaResult, LuaVM};

use std::rc::Rc;

pub struct ArgParser<'a> {
    args: &'a [LuaValue],
}

impl<'a> ArgParser<'a> {
    pub fn new(args: &'a [LuaValue]) -> Self {
        ArgParser { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument `n`, nil when absent.
    pub fn get(&self, n: usize) -> LuaValue {
        self.args.get(n - 1).cloned().unwrap_or_default()
    }

    /// True when argument `n` is absent or nil.
    pub fn is_none_or_nil(&self, n: usize) -> bool {
        self.args.get(n - 1).is_none_or(|v| v.is_nil())
    }

    pub fn check_any(&self, vm: &LuaVM, n: usize) -> LuaResult<LuaValue> {
        match self.args.get(n - 1) {
            Some(v) => Ok(v.clone()),
            None => Err(arg_error(vm, n, "value expected")),
        }
    }

    pub fn check_integer(&self, vm: &LuaVM, n: usize) -> LuaResult<i64> {
        let v = self.get(n);
        if let Some(i) = to_integer(&v) {
            return Ok(i);
        }
        match to_float(&v) {
            Some(f) if float_to_integer(f).is_none() => {
                Err(arg_error(vm, n, "number has no integer representation"))
            }
            _ => Err(self.type_error(vm, n, "number")),
        }
    }

    pub fn opt_integer(&self, vm: &LuaVM, n: usize, default: i64) -> LuaResult<i64> {
        if self.is_none_or_nil(n) {
            Ok(default)
        } else {
            self.check_integer(vm, n)
        }
    }

    pub fn check_number(&self, vm: &LuaVM, n: usize) -> LuaResult<f64> {
        to_float(&self.get(n)).ok_or_else(|| self.type_error(vm, n, "number"))
    }

    pub fn opt_number(&self, vm: &LuaVM, n: usize, default: f64) -> LuaResult<f64> {
        if self.is_none_or_nil(n) {
            Ok(default)
        } else {
            self.check_number(vm, n)
        }
    }

    /// A string, or a number converted to one.
    pub fn check_string(&self, vm: &LuaVM, n: usize) -> LuaResult<LuaString> {
        to_lua_string(&self.get(n)).ok_or_else(|| self.type_error(vm, n, "string"))
    }

    pub fn opt_string(&self, vm: &LuaVM, n: usize) -> LuaResult<Option<LuaString>> {
        if self.is_none_or_nil(n) {
            Ok(None)
        } else {
            self.check_string(vm, n).map(Some)
        }
    }

    pub fn check_table(&self, vm: &LuaVM, n: usize) -> LuaResult<LuaTableRef> {
        match self.get(n) {
            LuaValue::Table(t) => Ok(t),
            _ => Err(self.type_error(vm, n, "table")),
        }
    }

    pub fn check_function(&self, vm: &LuaVM, n: usize) -> LuaResult<Rc<LuaFunction>> {
        match self.get(n) {
            LuaValue::Function(f) => Ok(f),
            _ => Err(self.type_error(vm, n, "function")),
        }
    }

    /// "`expected` expected, got X"
    pub fn type_error(&self, vm: &LuaVM, n: usize, expected: &str) -> LuaError {
        let got = match self.args.get(n - 1) {
            None => "no value".to_string(),
            Some(LuaValue::LightUserdata(_)) => "light userdata".to_string(),
            Some(v) => vm.type_name_of(v),
        };
        arg_error(vm, n, &format!("{} expected, got {}", expected, got))
    }
}

/// "bad argument #n to 'name' (msg)". For method calls the receiver is
/// not counted.
pub fn arg_error(vm: &LuaVM, n: usize, msg: &str) -> LuaError {
    let (name, is_method) = vm.current_native_name();
    if is_method {
        if n == 1 {
            return vm.rt_error(ErrorKind::Type, format!("calling '{}' on bad self ({})", name, msg));
        }
        return vm.rt_error(
            ErrorKind::Type,
            format!("bad argument #{} to '{}' ({})", n - 1, name, msg),
        );
    }
    vm.rt_error(ErrorKind::Type, format!("bad argument #{} to '{}' ({})", n, name, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercions() {
        let vm = LuaVM::default();
        let args = [LuaValue::from("12"), LuaValue::Float(3.0), LuaValue::Integer(7)];
        let p = ArgParser::new(&args);
        assert_eq!(p.check_integer(&vm, 1).unwrap(), 12);
        assert_eq!(p.check_integer(&vm, 2).unwrap(), 3);
        assert_eq!(p.check_string(&vm, 3).unwrap().as_bytes(), b"7");
        assert_eq!(p.opt_integer(&vm, 4, 5).unwrap(), 5);
        assert!(p.opt_string(&vm, 4).unwrap().is_none());
    }

    #[test]
    fn test_type_errors() {
        let vm = LuaVM::default();
        let args = [LuaValue::Boolean(true), LuaValue::Float(1.5)];
        let p = ArgParser::new(&args);
        match p.check_table(&vm, 1) {
            Err(err) => assert!(err.to_string().contains("(table expected, got boolean)")),
            Ok(_) => panic!("boolean accepted as a table"),
        }
        let err = p.check_integer(&vm, 2).unwrap_err();
        assert!(err.to_string().contains("number has no integer representation"));
        let err = p.check_any(&vm, 3).unwrap_err();
        assert!(err.to_string().contains("bad argument #3"));
        assert!(err.to_string().contains("(value expected)"));
    }
}
