/*----------------------------------------------------------------------
  String concatenation - luaV_concat

  Works from the right: every maximal run of strings and numbers is
  joined into one buffer, other pairs go through `__concat`.
----------------------------------------------------------------------*/

use crate::lua_value::lua_convert::float_to_string;
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::execute::TmKind;
use crate::lua_vm::lua_limits::MAX_STRING_SIZE;
use crate::lua_vm::{ErrorKind, FinishOp, LuaResult, LuaVM};

#[inline(always)]
fn is_concat_convertible(value: &LuaValue) -> bool {
    matches!(value, LuaValue::String(_) | LuaValue::Integer(_) | LuaValue::Float(_))
}

/// Appends the string form of a string or number.
#[inline]
fn value_to_bytes_write(value: &LuaValue, buf: &mut Vec<u8>) {
    match value {
        LuaValue::String(s) => buf.extend_from_slice(s.as_bytes()),
        LuaValue::Integer(i) => {
            let mut itoa_buf = itoa::Buffer::new();
            buf.extend_from_slice(itoa_buf.format(*i).as_bytes());
        }
        LuaValue::Float(f) => buf.extend_from_slice(float_to_string(*f).as_bytes()),
        _ => {}
    }
}

/// Joins string-like values; `None` when the result is too large.
pub(crate) fn concat_strings(values: &[LuaValue]) -> Option<LuaString> {
    let mut buf = Vec::with_capacity(
        values
            .iter()
            .map(|v| v.as_string().map_or(24, |s| s.len()))
            .sum(),
    );
    for v in values {
        value_to_bytes_write(v, &mut buf);
        if buf.len() >= MAX_STRING_SIZE {
            return None;
        }
    }
    Some(LuaString::from(buf))
}

impl LuaVM {
    /// CONCAT over registers `first..=last`. Partial results are kept in
    /// the registers so a yielding `__concat` can be resumed.
    pub(crate) fn concat(&mut self, first: usize, last: usize) -> LuaResult<LuaValue> {
        let mut top = last;
        while top > first {
            let stack = &self.state.stack;
            if is_concat_convertible(&stack[top - 1]) && is_concat_convertible(&stack[top]) {
                let mut start = top - 1;
                while start > first && is_concat_convertible(&stack[start - 1]) {
                    start -= 1;
                }
                let Some(s) = concat_strings(&stack[start..=top]) else {
                    return Err(self.rt_error(ErrorKind::Concat, "string length overflow"));
                };
                self.state.stack[start] = LuaValue::String(s);
                top = start;
                continue;
            }
            let a = stack[top - 1].clone();
            let b = stack[top].clone();
            let tm = self.get_bin_tm(&a, &b, TmKind::Concat.name());
            if tm.is_nil() {
                let culprit = if is_concat_convertible(&a) { &b } else { &a };
                return Err(self.type_error(culprit, "concatenate"));
            }
            let r = self.call_tm(tm, vec![a, b], FinishOp::Concat { at: top - 1 })?;
            self.state.stack[top - 1] = r;
            top -= 1;
        }
        Ok(self.state.stack[first].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_numbers() {
        let s = concat_strings(&[
            LuaValue::from("x="),
            LuaValue::Integer(10),
            LuaValue::from(", y="),
            LuaValue::Float(2.5),
            LuaValue::from(" "),
            LuaValue::Float(3.0),
        ])
        .unwrap();
        assert_eq!(s.as_bytes(), b"x=10, y=2.5 3.0");
    }

    #[test]
    fn test_concat_empty() {
        let s = concat_strings(&[LuaValue::from(""), LuaValue::from("")]).unwrap();
        assert!(s.is_empty());
    }
}
