#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberResult {
    Int(i64),
    Float(f64),
}

/// Convert a numeral with Lua's rules (`luaO_str2num`): surrounding
/// whitespace and a sign are accepted, hexadecimal integers wrap around,
/// decimal integers that overflow become floats.
pub fn str_to_number(text: &[u8]) -> Option<NumberResult> {
    let text = trim(text);
    let (neg, body) = match text.first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if body.is_empty() {
        return None;
    }
    let result = if body.len() > 1 && body[0] == b'0' && (body[1] == b'x' || body[1] == b'X') {
        parse_hex(&body[2..])?
    } else {
        parse_decimal(body)?
    };
    Some(match (neg, result) {
        (false, r) => r,
        (true, NumberResult::Int(i)) => NumberResult::Int(i.wrapping_neg()),
        (true, NumberResult::Float(f)) => NumberResult::Float(-f),
    })
}

fn trim(text: &[u8]) -> &[u8] {
    let is_space = |b: &u8| matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c);
    let start = text.iter().position(|b| !is_space(b)).unwrap_or(text.len());
    let end = text.iter().rposition(|b| !is_space(b)).map_or(start, |p| p + 1);
    &text[start..end]
}

fn parse_decimal(body: &[u8]) -> Option<NumberResult> {
    let mut i = 0;
    let mut digits = 0;
    while i < body.len() && body[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    let mut is_float = false;
    if i < body.len() && body[i] == b'.' {
        is_float = true;
        i += 1;
        while i < body.len() && body[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < body.len() && (body[i] == b'e' || body[i] == b'E') {
        is_float = true;
        i += 1;
        if i < body.len() && (body[i] == b'+' || body[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < body.len() && body[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != body.len() {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?;
    if !is_float {
        if let Ok(v) = text.parse::<i64>() {
            return Some(NumberResult::Int(v));
        }
    }
    text.parse::<f64>().ok().map(NumberResult::Float)
}

fn parse_hex(body: &[u8]) -> Option<NumberResult> {
    let mut int_value: u64 = 0;
    let mut mantissa: f64 = 0.0;
    let mut exponent: i64 = 0;
    let mut digits = 0;
    let mut is_float = false;
    let mut i = 0;
    let mut seen_dot = false;
    while i < body.len() {
        let b = body[i];
        if b == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
            is_float = true;
        } else if let Some(d) = (b as char).to_digit(16) {
            int_value = int_value.wrapping_mul(16).wrapping_add(d as u64);
            mantissa = mantissa * 16.0 + d as f64;
            if seen_dot {
                exponent -= 4;
            }
            digits += 1;
        } else {
            break;
        }
        i += 1;
    }
    if digits == 0 {
        return None;
    }
    if i < body.len() && (body[i] == b'p' || body[i] == b'P') {
        is_float = true;
        i += 1;
        let mut exp_neg = false;
        if i < body.len() && (body[i] == b'+' || body[i] == b'-') {
            exp_neg = body[i] == b'-';
            i += 1;
        }
        let exp_start = i;
        let mut e: i64 = 0;
        while i < body.len() && body[i].is_ascii_digit() {
            e = e.saturating_mul(10).saturating_add((body[i] - b'0') as i64);
            i += 1;
        }
        if i == exp_start {
            return None;
        }
        exponent += if exp_neg { -e } else { e };
    }
    if i != body.len() {
        return None;
    }
    if is_float {
        let exp = exponent.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        Some(NumberResult::Float(mantissa * 2f64.powi(exp)))
    } else {
        Some(NumberResult::Int(int_value as i64))
    }
}
