//! Coercions between numbers and strings, following Lua 5.3's rules.
//!
//! - strings convert to numbers with the same grammar as numerals in source,
//!   plus surrounding whitespace and a sign;
//! - floats convert to integers only when the value is integral and in range;
//! - numbers print as integers in decimal and floats with `%.14g`, keeping a
//!   `.0` suffix when the result would read back as an integer.

use crate::compiler::parse_lua_number::{NumberResult, str_to_number};
use crate::lua_value::{LuaString, LuaValue};

/// Exact float to integer conversion (`lua_numbertointeger` with `F2Ieq`).
#[inline]
pub fn float_to_integer(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows
    if f.fract() == 0.0 && f >= -9_223_372_036_854_775_808.0 && f < 9_223_372_036_854_775_808.0 {
        Some(f as i64)
    } else {
        None
    }
}

/// Number value of a numeral string.
pub fn string_to_number(s: &[u8]) -> Option<LuaValue> {
    str_to_number(s).map(|n| match n {
        NumberResult::Int(i) => LuaValue::Integer(i),
        NumberResult::Float(f) => LuaValue::Float(f),
    })
}

/// `tonumber` without a base: numbers pass through, strings are parsed.
pub fn to_number(v: &LuaValue) -> Option<LuaValue> {
    match v {
        LuaValue::Integer(_) | LuaValue::Float(_) => Some(v.clone()),
        LuaValue::String(s) => string_to_number(s.as_bytes()),
        _ => None,
    }
}

/// Float value with string coercion.
pub fn to_float(v: &LuaValue) -> Option<f64> {
    to_number(v).and_then(|n| n.as_float())
}

/// Integer value with string coercion; floats must be integral.
pub fn to_integer(v: &LuaValue) -> Option<i64> {
    match v {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => float_to_integer(*f),
        LuaValue::String(s) => string_to_number(s.as_bytes()).and_then(|n| n.as_integer()),
        _ => None,
    }
}

/// Text of a number as `tostring` produces it.
pub fn number_to_string(v: &LuaValue) -> Option<String> {
    match v {
        LuaValue::Integer(i) => Some(itoa::Buffer::new().format(*i).to_string()),
        LuaValue::Float(f) => Some(float_to_string(*f)),
        _ => None,
    }
}

pub fn float_to_string(f: f64) -> String {
    let mut s = format_g(f, 14, false);
    if s.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        s.push_str(".0");
    }
    s
}

/// Strings and numbers convert to strings (used by concatenation).
pub fn to_lua_string(v: &LuaValue) -> Option<LuaString> {
    match v {
        LuaValue::String(s) => Some(s.clone()),
        LuaValue::Integer(_) | LuaValue::Float(_) => number_to_string(v).map(LuaString::from),
        _ => None,
    }
}

/// C's `%.{precision}g`. With `alt` trailing zeros are kept (`%#g`).
pub fn format_g(f: f64, precision: usize, alt: bool) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan".into() } else { "nan".into() };
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let p = precision.max(1);
    if f == 0.0 {
        let zero = if alt && p > 1 {
            format!("0.{}", "0".repeat(p - 1))
        } else {
            "0".to_string()
        };
        return if f.is_sign_negative() { format!("-{}", zero) } else { zero };
    }
    let sci = format!("{:.*e}", p - 1, f);
    let exp: i32 = sci
        .rsplit_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exp < -4 || exp >= p as i32 {
        let (mantissa, _) = sci.split_once('e').unwrap_or((&sci, ""));
        let mantissa = if alt { mantissa.to_string() } else { strip_zeros(mantissa) };
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, f);
        if alt { fixed } else { strip_zeros(&fixed) }
    }
}

fn strip_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_string() {
        assert_eq!(float_to_string(1.0), "1.0");
        assert_eq!(float_to_string(-2.0), "-2.0");
        assert_eq!(float_to_string(0.1), "0.1");
        assert_eq!(float_to_string(1e15), "1e+15");
        assert_eq!(float_to_string(1e100), "1e+100");
        assert_eq!(float_to_string(123456.789), "123456.789");
        assert_eq!(float_to_string(2.5e-7), "2.5e-07");
        assert_eq!(float_to_string(1.0 / 3.0), "0.33333333333333");
        assert_eq!(float_to_string(f64::INFINITY), "inf");
        assert_eq!(float_to_string(f64::NEG_INFINITY), "-inf");
        assert_eq!(float_to_string(-0.0), "-0.0");
        assert_eq!(float_to_string(100000000000000.0), "1e+14");
    }

    #[test]
    fn test_format_g() {
        assert_eq!(format_g(3.14159, 6, false), "3.14159");
        assert_eq!(format_g(0.0001, 6, false), "0.0001");
        assert_eq!(format_g(0.00001, 6, false), "1e-05");
        assert_eq!(format_g(2.0, 6, true), "2.00000");
    }

    #[test]
    fn test_string_coercion() {
        assert!(matches!(to_number(&LuaValue::from(" 0x10 ")), Some(LuaValue::Integer(16))));
        assert!(matches!(to_number(&LuaValue::from("1e2")), Some(LuaValue::Float(f)) if f == 100.0));
        assert!(to_number(&LuaValue::from("1e")).is_none());
        assert_eq!(to_integer(&LuaValue::from("3.0")), Some(3));
        assert_eq!(to_integer(&LuaValue::Float(3.5)), None);
        assert_eq!(number_to_string(&LuaValue::Integer(-7)).as_deref(), Some("-7"));
    }

    #[test]
    fn test_float_to_integer_bounds() {
        assert_eq!(float_to_integer(-9_223_372_036_854_775_808.0), Some(i64::MIN));
        assert_eq!(float_to_integer(9_223_372_036_854_775_808.0), None);
        assert_eq!(float_to_integer(f64::NAN), None);
        assert_eq!(float_to_integer(f64::INFINITY), None);
    }
}
