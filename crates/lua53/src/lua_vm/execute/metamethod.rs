/// Metamethod dispatch
///
/// Arithmetic, comparison and length fall back to tag methods here once
/// the primitive operation does not apply. Based on Lua 5.3 ltm.c.
use std::rc::Rc;

use crate::lua_value::LuaValue;
use crate::lua_value::lua_arith::{self, ArithError, ArithOp, num_le, num_lt};
use crate::lua_vm::{ErrorKind, FinishOp, LuaResult, LuaVM};

/// Tag method events (TMS from ltm.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TmKind {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Len,
    Eq,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
    Unm,
    Bnot,
    Lt,
    Le,
    Concat,
    Call,
}

impl TmKind {
    pub const fn name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Gc => "__gc",
            TmKind::Mode => "__mode",
            TmKind::Len => "__len",
            TmKind::Eq => "__eq",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Div => "__div",
            TmKind::IDiv => "__idiv",
            TmKind::Band => "__band",
            TmKind::Bor => "__bor",
            TmKind::Bxor => "__bxor",
            TmKind::Shl => "__shl",
            TmKind::Shr => "__shr",
            TmKind::Unm => "__unm",
            TmKind::Bnot => "__bnot",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
        }
    }
}

impl LuaVM {
    /// Tag method of `v` for `event`, nil when absent.
    #[inline]
    pub fn get_tm(&self, v: &LuaValue, event: TmKind) -> LuaValue {
        self.get_meta_field(v, event.name())
    }

    /// Binary tag method: the one of `a`, else the one of `b`.
    pub(crate) fn get_bin_tm(&self, a: &LuaValue, b: &LuaValue, event: &str) -> LuaValue {
        let tm = self.get_meta_field(a, event);
        if tm.is_nil() { self.get_meta_field(b, event) } else { tm }
    }

    /// Calls `tm(a, b)` and keeps its first result.
    pub(crate) fn call_tm_res(
        &mut self,
        tm: LuaValue,
        a: LuaValue,
        b: LuaValue,
        finish: FinishOp,
    ) -> LuaResult<LuaValue> {
        self.call_tm(tm, vec![a, b], finish)
    }

    /// Arithmetic or bitwise operation with string coercion and
    /// metamethod fallback. Unary operators get their operand twice.
    pub fn arith(&mut self, op: ArithOp, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
        let err = match lua_arith::arith(op, a, b) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if let ArithError::DivByZero | ArithError::ModByZero = err {
            return Err(self.rt_error(ErrorKind::DivZero, err.message()));
        }
        let tm = self.get_bin_tm(a, b, op.event());
        if !tm.is_nil() {
            return self.call_tm_res(tm, a.clone(), b.clone(), FinishOp::Store);
        }
        if op.is_bitwise() {
            if lua_arith_operand(a) && lua_arith_operand(b) {
                return Err(self.rt_error(ErrorKind::Bitwise, "number has no integer representation"));
            }
            let culprit = if lua_arith_operand(a) { b } else { a };
            return Err(self.type_error(culprit, "perform bitwise operation on"));
        }
        let culprit = if lua_arith_operand(a) { b } else { a };
        Err(self.type_error(culprit, "perform arithmetic on"))
    }

    /// `__eq` for two distinct tables or two distinct userdata. The
    /// handler is used when both share a metatable or both metatables
    /// hold the same `__eq`.
    pub fn equals_meta(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        let same_kind = matches!(
            (a, b),
            (LuaValue::Table(_), LuaValue::Table(_)) | (LuaValue::Userdata(_), LuaValue::Userdata(_))
        );
        if !same_kind {
            return Ok(false);
        }
        let (Some(ma), Some(mb)) = (a.own_metatable(), b.own_metatable()) else {
            return Ok(false);
        };
        let tm = ma.borrow().get_str(TmKind::Eq.name());
        if tm.is_nil() {
            return Ok(false);
        }
        if !Rc::ptr_eq(&ma, &mb) && !tm.raw_equal(&mb.borrow().get_str(TmKind::Eq.name())) {
            return Ok(false);
        }
        let res = self.call_tm_res(tm, a.clone(), b.clone(), FinishOp::Compare { negate: false })?;
        Ok(res.to_bool())
    }

    /// Full equality, `==`.
    pub fn equals(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if a.raw_equal(b) {
            return Ok(true);
        }
        self.equals_meta(a, b)
    }

    pub fn less_than(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if let Some(r) = num_lt(a, b) {
            return Ok(r);
        }
        if let (LuaValue::String(x), LuaValue::String(y)) = (a, b) {
            return Ok(x.as_bytes() < y.as_bytes());
        }
        let tm = self.get_bin_tm(a, b, TmKind::Lt.name());
        if tm.is_nil() {
            return Err(self.compare_error(a, b));
        }
        Ok(self.call_tm_res(tm, a.clone(), b.clone(), FinishOp::Compare { negate: false })?.to_bool())
    }

    pub fn less_equal(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if let Some(r) = num_le(a, b) {
            return Ok(r);
        }
        if let (LuaValue::String(x), LuaValue::String(y)) = (a, b) {
            return Ok(x.as_bytes() <= y.as_bytes());
        }
        let tm = self.get_bin_tm(a, b, TmKind::Le.name());
        if !tm.is_nil() {
            return Ok(self.call_tm_res(tm, a.clone(), b.clone(), FinishOp::Compare { negate: false })?.to_bool());
        }
        // a <= b  <=>  not (b < a)
        let tm = self.get_bin_tm(b, a, TmKind::Lt.name());
        if tm.is_nil() {
            return Err(self.compare_error(a, b));
        }
        let res = self.call_tm_res(tm, b.clone(), a.clone(), FinishOp::Compare { negate: true })?;
        Ok(!res.to_bool())
    }

    fn compare_error(&self, a: &LuaValue, b: &LuaValue) -> crate::lua_vm::LuaError {
        let (ta, tb) = (self.type_name_of(a), self.type_name_of(b));
        let msg = if ta == tb {
            format!("attempt to compare two {} values", ta)
        } else {
            format!("attempt to compare {} with {}", ta, tb)
        };
        self.rt_error(ErrorKind::Compare, msg)
    }

    /// Type name honouring `__name` of the metatable.
    pub fn type_name_of(&self, v: &LuaValue) -> String {
        match self.get_meta_field(v, "__name") {
            LuaValue::String(s) if v.is_table() || matches!(v, LuaValue::Userdata(_)) => s.to_str_lossy(),
            _ => v.type_name().to_string(),
        }
    }

    /// Length operator `#`.
    pub fn len(&mut self, v: &LuaValue) -> LuaResult<LuaValue> {
        match v {
            LuaValue::String(s) => Ok(LuaValue::Integer(s.len() as i64)),
            LuaValue::Table(t) => {
                let tm = self.get_tm(v, TmKind::Len);
                if tm.is_nil() {
                    let n = t.borrow().len();
                    return Ok(LuaValue::Integer(n));
                }
                self.call_tm_res(tm, v.clone(), v.clone(), FinishOp::Store)
            }
            _ => {
                let tm = self.get_tm(v, TmKind::Len);
                if tm.is_nil() {
                    return Err(self.type_error(v, "get length of"));
                }
                self.call_tm_res(tm, v.clone(), v.clone(), FinishOp::Store)
            }
        }
    }
}

/// Operand usable by arithmetic: a number or a numeric string.
fn lua_arith_operand(v: &LuaValue) -> bool {
    crate::lua_value::lua_convert::to_number(v).is_some()
}
