// Primitive arithmetic shared by the VM and the constant folder

use crate::lua_value::LuaValue;
use crate::lua_value::lua_convert::{float_to_integer, to_integer, to_number};

/// Arithmetic and bitwise operators, numbered like Lua's `LUA_OP*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    /// Metamethod event name.
    pub fn event(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
            ArithOp::Div => "__div",
            ArithOp::IDiv => "__idiv",
            ArithOp::BAnd => "__band",
            ArithOp::BOr => "__bor",
            ArithOp::BXor => "__bxor",
            ArithOp::Shl => "__shl",
            ArithOp::Shr => "__shr",
            ArithOp::Unm => "__unm",
            ArithOp::BNot => "__bnot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithError {
    /// An operand is not a number nor a numeric string.
    NotNumber,
    /// A bitwise operand has no integer representation.
    NoInteger,
    DivByZero,
    ModByZero,
}

impl ArithError {
    pub fn message(self) -> &'static str {
        match self {
            ArithError::NotNumber => "attempt to perform arithmetic on a non-number value",
            ArithError::NoInteger => "number has no integer representation",
            ArithError::DivByZero => "attempt to perform 'n//0'",
            ArithError::ModByZero => "attempt to perform 'n%0'",
        }
    }
}

/// Applies `op` to two operands with string coercion and no metamethods.
/// Unary operators ignore `b`.
pub fn arith(op: ArithOp, a: &LuaValue, b: &LuaValue) -> Result<LuaValue, ArithError> {
    if op.is_bitwise() {
        let x = to_integer_strict(a)?;
        let y = if op == ArithOp::BNot { 0 } else { to_integer_strict(b)? };
        return Ok(LuaValue::Integer(int_bitwise(op, x, y)));
    }
    let a = to_number(a).ok_or(ArithError::NotNumber)?;
    let b = if op == ArithOp::Unm {
        a.clone()
    } else {
        to_number(b).ok_or(ArithError::NotNumber)?
    };
    match (&a, &b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) if !matches!(op, ArithOp::Div | ArithOp::Pow) => {
            int_arith(op, *x, *y).map(LuaValue::Integer)
        }
        _ => {
            let x = a.as_float().ok_or(ArithError::NotNumber)?;
            let y = b.as_float().ok_or(ArithError::NotNumber)?;
            Ok(LuaValue::Float(float_arith(op, x, y)))
        }
    }
}

fn to_integer_strict(v: &LuaValue) -> Result<i64, ArithError> {
    match to_integer(v) {
        Some(i) => Ok(i),
        None if to_number(v).is_some() => Err(ArithError::NoInteger),
        None => Err(ArithError::NotNumber),
    }
}

pub fn int_arith(op: ArithOp, x: i64, y: i64) -> Result<i64, ArithError> {
    Ok(match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Mod => int_mod(x, y)?,
        ArithOp::IDiv => int_div(x, y)?,
        ArithOp::Unm => x.wrapping_neg(),
        _ => int_bitwise(op, x, y),
    })
}

pub fn int_bitwise(op: ArithOp, x: i64, y: i64) -> i64 {
    match op {
        ArithOp::BAnd => x & y,
        ArithOp::BOr => x | y,
        ArithOp::BXor => x ^ y,
        ArithOp::Shl => shift_left(x, y),
        ArithOp::Shr => shift_left(x, y.checked_neg().unwrap_or(i64::MAX)),
        ArithOp::BNot => !x,
        _ => 0,
    }
}

pub fn float_arith(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Pow => {
            if y == 2.0 {
                x * x
            } else {
                x.powf(y)
            }
        }
        ArithOp::IDiv => (x / y).floor(),
        ArithOp::Mod => float_mod(x, y),
        ArithOp::Unm => -x,
        _ => f64::NAN,
    }
}

/// Floor division; the quotient of `MIN // -1` wraps.
pub fn int_div(x: i64, y: i64) -> Result<i64, ArithError> {
    if y == 0 {
        return Err(ArithError::DivByZero);
    }
    if y == -1 {
        return Ok(x.wrapping_neg());
    }
    let q = x / y;
    if (x % y != 0) && ((x ^ y) < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Modulo with the sign of the divisor.
pub fn int_mod(x: i64, y: i64) -> Result<i64, ArithError> {
    if y == 0 {
        return Err(ArithError::ModByZero);
    }
    if y == -1 {
        return Ok(0);
    }
    let r = x % y;
    if r != 0 && (r ^ y) < 0 {
        Ok(r + y)
    } else {
        Ok(r)
    }
}

pub fn float_mod(x: f64, y: f64) -> f64 {
    let m = x % y;
    if (m > 0.0 && y < 0.0) || (m < 0.0 && y > 0.0) {
        m + y
    } else {
        m
    }
}

/// Logical shift; counts of 64 or more give 0, negative counts shift right.
pub fn shift_left(x: i64, y: i64) -> i64 {
    if y <= -64 || y >= 64 {
        0
    } else if y >= 0 {
        ((x as u64) << y) as i64
    } else {
        ((x as u64) >> (-y)) as i64
    }
}

/// `a < b` for two numbers, exact across integer and float.
pub fn num_lt(a: &LuaValue, b: &LuaValue) -> Option<bool> {
    Some(match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x < y,
        (LuaValue::Float(x), LuaValue::Float(y)) => x < y,
        (LuaValue::Integer(i), LuaValue::Float(f)) => int_lt_float(*i, *f),
        (LuaValue::Float(f), LuaValue::Integer(i)) => float_lt_int(*f, *i),
        _ => return None,
    })
}

/// `a <= b` for two numbers, exact across integer and float.
pub fn num_le(a: &LuaValue, b: &LuaValue) -> Option<bool> {
    Some(match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x <= y,
        (LuaValue::Float(x), LuaValue::Float(y)) => x <= y,
        (LuaValue::Integer(i), LuaValue::Float(f)) => int_le_float(*i, *f),
        (LuaValue::Float(f), LuaValue::Integer(i)) => float_le_int(*f, *i),
        _ => return None,
    })
}

// i < f  <=>  i < ceil(f)
fn int_lt_float(i: i64, f: f64) -> bool {
    match float_to_integer(f.ceil()) {
        Some(c) => i < c,
        None => f > 0.0,
    }
}

// i <= f  <=>  i <= floor(f)
fn int_le_float(i: i64, f: f64) -> bool {
    match float_to_integer(f.floor()) {
        Some(c) => i <= c,
        None => f > 0.0,
    }
}

// f < i  <=>  floor(f) < i
fn float_lt_int(f: f64, i: i64) -> bool {
    match float_to_integer(f.floor()) {
        Some(c) => c < i,
        None => f < 0.0,
    }
}

// f <= i  <=>  ceil(f) <= i
fn float_le_int(f: f64, i: i64) -> bool {
    match float_to_integer(f.ceil()) {
        Some(c) => c <= i,
        None => f < 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> LuaValue {
        LuaValue::Integer(i)
    }

    #[test]
    fn test_integer_ops() {
        assert_eq!(int_div(7, 2), Ok(3));
        assert_eq!(int_div(-7, 2), Ok(-4));
        assert_eq!(int_mod(-7, 2), Ok(1));
        assert_eq!(int_mod(7, -2), Ok(-1));
        assert_eq!(int_div(i64::MIN, -1), Ok(i64::MIN));
        assert_eq!(int_div(1, 0), Err(ArithError::DivByZero));
        assert_eq!(int_mod(1, 0), Err(ArithError::ModByZero));
        assert_eq!(int_arith(ArithOp::Add, i64::MAX, 1), Ok(i64::MIN));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shift_left(1, 63), i64::MIN);
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_left(-1, -1), i64::MAX);
        assert_eq!(int_bitwise(ArithOp::Shr, -1, 63), 1);
        assert_eq!(int_bitwise(ArithOp::Shr, 1, i64::MIN), 0);
    }

    #[test]
    fn test_mixed_arith() {
        assert!(matches!(arith(ArithOp::Add, &int(1), &LuaValue::Float(0.5)), Ok(LuaValue::Float(f)) if f == 1.5));
        assert!(matches!(arith(ArithOp::Div, &int(4), &int(2)), Ok(LuaValue::Float(f)) if f == 2.0));
        assert!(matches!(arith(ArithOp::Add, &LuaValue::from("10"), &int(1)), Ok(LuaValue::Integer(11))));
        assert!(matches!(arith(ArithOp::Mod, &LuaValue::Float(-5.5), &int(2)), Ok(LuaValue::Float(f)) if f == 0.5));
        assert_eq!(
            arith(ArithOp::BAnd, &LuaValue::Float(1.5), &int(1)).err(),
            Some(ArithError::NoInteger)
        );
        assert_eq!(
            arith(ArithOp::Add, &LuaValue::new_table(), &int(1)).err(),
            Some(ArithError::NotNumber)
        );
        assert!(matches!(arith(ArithOp::BOr, &LuaValue::Float(2.0), &int(1)), Ok(LuaValue::Integer(3))));
    }

    #[test]
    fn test_exact_comparisons() {
        let big = LuaValue::Integer(i64::MAX);
        let fbig = LuaValue::Float(9_223_372_036_854_775_808.0);
        assert_eq!(num_lt(&big, &fbig), Some(true));
        assert_eq!(num_le(&fbig, &big), Some(false));
        assert_eq!(num_lt(&int(1), &LuaValue::Float(1.5)), Some(true));
        assert_eq!(num_le(&LuaValue::Float(1.0), &int(1)), Some(true));
        assert_eq!(num_lt(&int(1), &LuaValue::Float(f64::NAN)), Some(false));
        assert_eq!(num_lt(&LuaValue::from("1"), &int(2)), None);
    }
}
