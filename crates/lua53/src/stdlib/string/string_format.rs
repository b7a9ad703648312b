// string.format
// Conversion specs follow C's printf as Lua 5.3 uses it: up to five flag
// characters, a width and a precision of at most two digits each.

use crate::lua_value::lua_convert::format_g;
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::{ArgParser, ErrorKind, LuaResult, LuaVM, arg_error};

const FLAGS: &[u8] = b"-+ #0";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

/// Parses flags, width and precision starting at `fmt[*i]`.
fn parse_spec(fmt: &[u8], i: &mut usize) -> Result<Spec, &'static str> {
    let mut spec = Spec::default();
    let start = *i;
    while let Some(&c) = fmt.get(*i) {
        if !FLAGS.contains(&c) {
            break;
        }
        match c {
            b'-' => spec.left = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'#' => spec.alt = true,
            _ => spec.zero = true,
        }
        *i += 1;
    }
    if *i - start > FLAGS.len() {
        return Err("invalid format (repeated flags)");
    }
    let digits = |i: &mut usize| {
        let mut n = None;
        for _ in 0..2 {
            match fmt.get(*i) {
                Some(c) if c.is_ascii_digit() => {
                    n = Some(n.unwrap_or(0) * 10 + (c - b'0') as usize);
                    *i += 1;
                }
                _ => break,
            }
        }
        n
    };
    spec.width = digits(i).unwrap_or(0);
    if fmt.get(*i) == Some(&b'.') {
        *i += 1;
        spec.precision = Some(digits(i).unwrap_or(0));
    }
    if fmt.get(*i).is_some_and(|c| c.is_ascii_digit()) {
        return Err("invalid format (width or precision too long)");
    }
    Ok(spec)
}

/// Pads `prefix` + `body` to the field width. Zero fill goes between the
/// sign or radix prefix and the digits.
fn pad(prefix: &str, body: &[u8], spec: &Spec, zero: bool, out: &mut Vec<u8>) {
    let len = prefix.len() + body.len();
    let fill = spec.width.saturating_sub(len);
    if spec.left {
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(body);
        out.resize(out.len() + fill, b' ');
    } else if zero {
        out.extend_from_slice(prefix.as_bytes());
        out.resize(out.len() + fill, b'0');
        out.extend_from_slice(body);
    } else {
        out.resize(out.len() + fill, b' ');
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(body);
    }
}

fn format_integer(n: i64, conv: u8, spec: &Spec, out: &mut Vec<u8>) {
    let signed = matches!(conv, b'd' | b'i');
    let mut digits = match conv {
        b'd' | b'i' => n.unsigned_abs().to_string(),
        b'o' => format!("{:o}", n as u64),
        b'x' => format!("{:x}", n as u64),
        b'X' => format!("{:X}", n as u64),
        _ => (n as u64).to_string(),
    };
    if let Some(prec) = spec.precision {
        if prec == 0 && n == 0 {
            digits.clear();
        } else if digits.len() < prec {
            digits.insert_str(0, &"0".repeat(prec - digits.len()));
        }
    }
    let mut prefix = String::new();
    if signed {
        if n < 0 {
            prefix.push('-');
        } else if spec.plus {
            prefix.push('+');
        } else if spec.space {
            prefix.push(' ');
        }
    }
    if spec.alt {
        match conv {
            b'o' if !digits.starts_with('0') => digits.insert(0, '0'),
            b'x' if n != 0 => prefix.push_str("0x"),
            b'X' if n != 0 => prefix.push_str("0X"),
            _ => {}
        }
    }
    pad(&prefix, digits.as_bytes(), spec, spec.zero && spec.precision.is_none(), out);
}

/// C's `%.{prec}e` for a non-negative finite value.
fn format_exp(f: f64, prec: usize, alt: bool) -> String {
    let s = format!("{:.*e}", prec, f);
    let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let dot = if alt && prec == 0 { "." } else { "" };
    format!("{}{}e{}{:02}", mantissa, dot, if exp < 0 { '-' } else { '+' }, exp.abs())
}

/// C's `%a` for a non-negative finite value.
pub(crate) fn format_hex_float(f: f64, precision: Option<usize>) -> String {
    if f == 0.0 {
        return match precision {
            Some(p) if p > 0 => format!("0x0.{}p+0", "0".repeat(p)),
            _ => "0x0p+0".to_string(),
        };
    }
    let bits = f.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i64;
    let mant = bits & ((1u64 << 52) - 1);
    let (lead, exp) = if biased == 0 { (0u64, -1022) } else { (1u64, biased - 1023) };
    let (lead, digits) = match precision {
        None => (lead, format!("{:013x}", mant).trim_end_matches('0').to_string()),
        Some(p) if p < 13 => {
            let shift = (13 - p) * 4;
            let full = (lead << 52) | mant;
            let rem = full & ((1u64 << shift) - 1);
            let half = 1u64 << (shift - 1);
            let mut q = full >> shift;
            if rem > half || (rem == half && q & 1 == 1) {
                q += 1;
            }
            let frac_bits = p * 4;
            let frac = q & ((1u64 << frac_bits) - 1);
            let digits = if p == 0 { String::new() } else { format!("{:0w$x}", frac, w = p) };
            (q >> frac_bits, digits)
        }
        Some(p) => (lead, format!("{:013x}{}", mant, "0".repeat(p - 13))),
    };
    let mut s = format!("0x{}", lead);
    if !digits.is_empty() {
        s.push('.');
        s.push_str(&digits);
    }
    format!("{}p{:+}", s, exp)
}

fn format_float(f: f64, conv: u8, spec: &Spec, out: &mut Vec<u8>) {
    let a = f.abs();
    let mut body = if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        "inf".to_string()
    } else {
        match conv.to_ascii_lowercase() {
            b'f' => {
                let prec = spec.precision.unwrap_or(6);
                let mut s = format!("{:.*}", prec, a);
                if spec.alt && prec == 0 {
                    s.push('.');
                }
                s
            }
            b'e' => format_exp(a, spec.precision.unwrap_or(6), spec.alt),
            b'g' => format_g(a, spec.precision.unwrap_or(6), spec.alt),
            _ => format_hex_float(a, spec.precision),
        }
    };
    if conv.is_ascii_uppercase() {
        body.make_ascii_uppercase();
    }
    let prefix = if f.is_sign_negative() && !f.is_nan() {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    };
    pad(prefix, body.as_bytes(), spec, spec.zero && f.is_finite(), out);
}

/// `%q` for a string: quoted so that Lua reads it back unchanged.
fn add_quoted_string(s: &[u8], out: &mut Vec<u8>) {
    out.push(b'"');
    for (i, &c) in s.iter().enumerate() {
        match c {
            b'"' | b'\\' | b'\n' => {
                out.push(b'\\');
                out.push(c);
            }
            c if c.is_ascii_control() => {
                let next_is_digit = s.get(i + 1).is_some_and(|d| d.is_ascii_digit());
                let esc = if next_is_digit { format!("\\{:03}", c) } else { format!("\\{}", c) };
                out.extend_from_slice(esc.as_bytes());
            }
            _ => out.push(c),
        }
    }
    out.push(b'"');
}

fn add_literal(vm: &mut LuaVM, v: &LuaValue, arg: usize, out: &mut Vec<u8>) -> LuaResult<()> {
    match v {
        LuaValue::String(s) => add_quoted_string(s.as_bytes(), out),
        LuaValue::Integer(i64::MIN) => out.extend_from_slice(format!("0x{:x}", i64::MIN).as_bytes()),
        LuaValue::Integer(n) => out.extend_from_slice(itoa::Buffer::new().format(*n).as_bytes()),
        LuaValue::Float(f) => {
            let text = if *f == f64::INFINITY {
                "1e9999".to_string()
            } else if *f == f64::NEG_INFINITY {
                "-1e9999".to_string()
            } else if f.is_nan() {
                "(0/0)".to_string()
            } else if f.is_sign_negative() {
                format!("-{}", format_hex_float(-f, None))
            } else {
                format_hex_float(*f, None)
            };
            out.extend_from_slice(text.as_bytes());
        }
        LuaValue::Nil | LuaValue::Boolean(_) => out.extend_from_slice(vm.to_display(v)?.as_bytes()),
        _ => return Err(arg_error(vm, arg, "value has no literal form")),
    }
    Ok(())
}

/// string.format(formatstring, ...)
pub fn string_format(vm: &mut LuaVM, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let p = ArgParser::new(&args);
    let fmt = p.check_string(vm, 1)?;
    let fmt = fmt.as_bytes();
    let mut out = Vec::with_capacity(fmt.len());
    let mut arg = 1;
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        arg += 1;
        if arg > args.len() {
            return Err(arg_error(vm, arg, "no value"));
        }
        let spec = parse_spec(fmt, &mut i).map_err(|msg| vm.rt_error(ErrorKind::User, msg))?;
        let conv = fmt.get(i).copied().unwrap_or(0);
        i += 1;
        match conv {
            b'c' => {
                let n = p.check_integer(vm, arg)?;
                pad("", &[n as u8], &spec, false, &mut out);
            }
            b'd' | b'i' | b'o' | b'u' | b'x' | b'X' => {
                let n = p.check_integer(vm, arg)?;
                format_integer(n, conv, &spec, &mut out);
            }
            b'a' | b'A' | b'e' | b'E' | b'f' | b'F' | b'g' | b'G' => {
                let f = p.check_number(vm, arg)?;
                format_float(f, conv, &spec, &mut out);
            }
            b'q' => add_literal(vm, &p.get(arg), arg, &mut out)?,
            b's' => {
                let s = vm.to_display(&p.get(arg))?;
                let bytes = s.as_bytes();
                match spec.precision {
                    None if bytes.len() >= 100 => out.extend_from_slice(bytes),
                    prec => {
                        let n = prec.map_or(bytes.len(), |p| p.min(bytes.len()));
                        pad("", &bytes[..n], &spec, false, &mut out);
                    }
                }
            }
            _ => {
                let msg = format!("invalid option '%{}' to 'format'", conv as char);
                return Err(vm.rt_error(ErrorKind::User, msg));
            }
        }
    }
    Ok(vec![LuaValue::String(LuaString::from(out))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> Spec {
        let mut i = 0;
        parse_spec(s.as_bytes(), &mut i).unwrap()
    }

    fn int(n: i64, conv: u8, s: &str) -> String {
        let mut out = Vec::new();
        format_integer(n, conv, &spec(s), &mut out);
        String::from_utf8(out).unwrap()
    }

    fn float(f: f64, conv: u8, s: &str) -> String {
        let mut out = Vec::new();
        format_float(f, conv, &spec(s), &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_spec() {
        let s = spec("-08.3");
        assert!(s.left && s.zero);
        assert_eq!((s.width, s.precision), (8, Some(3)));
        let mut i = 0;
        assert_eq!(parse_spec(b"-+ #0-d", &mut i), Err("invalid format (repeated flags)"));
        let mut i = 0;
        assert_eq!(parse_spec(b"123d", &mut i), Err("invalid format (width or precision too long)"));
    }

    #[test]
    fn test_integers() {
        assert_eq!(int(42, b'd', "5"), "   42");
        assert_eq!(int(42, b'd', "-5"), "42   ");
        assert_eq!(int(-42, b'd', "05"), "-0042");
        assert_eq!(int(7, b'd', "+.3"), "+007");
        assert_eq!(int(255, b'x', "#"), "0xff");
        assert_eq!(int(255, b'X', ""), "FF");
        assert_eq!(int(8, b'o', "#"), "010");
        assert_eq!(int(-1, b'x', ""), "ffffffffffffffff");
        assert_eq!(int(0, b'd', ".0"), "");
    }

    #[test]
    fn test_floats() {
        assert_eq!(float(3.14159, b'f', ".2"), "3.14");
        assert_eq!(float(1.0, b'f', ""), "1.000000");
        assert_eq!(float(-1.5, b'f', "08.2"), "-0001.50");
        assert_eq!(float(12345.678, b'e', ".3"), "1.235e+04");
        assert_eq!(float(0.00012, b'E', ""), "1.200000E-04");
        assert_eq!(float(100000.0, b'g', ""), "100000");
        assert_eq!(float(1e20, b'g', ""), "1e+20");
        assert_eq!(float(f64::INFINITY, b'f', "05"), "  inf");
        assert_eq!(float(f64::NEG_INFINITY, b'G', ""), "-INF");
    }

    #[test]
    fn test_hex_float() {
        assert_eq!(format_hex_float(1.0, None), "0x1p+0");
        assert_eq!(format_hex_float(0.5, None), "0x1p-1");
        assert_eq!(format_hex_float(3.0, None), "0x1.8p+1");
        assert_eq!(format_hex_float(0.0, None), "0x0p+0");
        assert_eq!(format_hex_float(1.0, Some(2)), "0x1.00p+0");
        assert_eq!(format_hex_float(f64::from_bits(1), None), "0x0.0000000000001p-1022");
    }

    #[test]
    fn test_quoted_string() {
        let mut out = Vec::new();
        add_quoted_string(b"a\"b\\c\nd\0e\x011", &mut out);
        assert_eq!(out, b"\"a\\\"b\\\\c\\\nd\\0e\\0011\"");
    }
}
