// Compile-time constant folding

use crate::compiler::CompileMode;
use crate::compiler::func_state::FuncState;
use crate::compiler::parser::{BinaryOperator, Expr, LitValue, UnaryOperator};
use crate::lua_value::LuaValue;
use crate::lua_value::lua_arith::{ArithOp, arith, num_le, num_lt};
use crate::lua_value::lua_convert::{float_to_integer, to_lua_string};

/// Value of `e` when it is known at compile time.
///
/// Results are cached per node. With `CompileMode::NO_FOLD` only literals
/// are evaluated.
pub fn fold_expr(fs: &mut FuncState, e: &Expr) -> Option<LuaValue> {
    match e {
        Expr::BasicLit(lit) => return Some(literal_value(&lit.value)),
        Expr::ParenExpr(_) | Expr::UnaryExpr(_) | Expr::BinaryExpr(_) | Expr::TableLit(_) => {}
        _ => return None,
    }
    if fs.mode.contains(CompileMode::NO_FOLD) {
        return None;
    }
    let key = e as *const Expr as usize;
    if let Some(cached) = fs.fold_cache.get(&key) {
        return cached.clone();
    }
    let value = fold_uncached(fs, e);
    fs.fold_cache.insert(key, value.clone());
    value
}

pub fn literal_value(lit: &LitValue) -> LuaValue {
    match lit {
        LitValue::Nil => LuaValue::Nil,
        LitValue::True => LuaValue::Boolean(true),
        LitValue::False => LuaValue::Boolean(false),
        LitValue::Integer(i) => LuaValue::Integer(*i),
        LitValue::Float(f) => LuaValue::Float(*f),
        LitValue::String(s) => LuaValue::string(s.as_slice()),
    }
}

fn fold_uncached(fs: &mut FuncState, e: &Expr) -> Option<LuaValue> {
    match e {
        Expr::ParenExpr(p) => fold_expr(fs, &p.inner),
        Expr::UnaryExpr(u) if u.op == UnaryOperator::OpLen => fold_length(fs, &u.operand),
        Expr::UnaryExpr(u) => {
            let v = fold_expr(fs, &u.operand)?;
            fold_unary(u.op, &v)
        }
        Expr::BinaryExpr(b) => {
            let l = fold_expr(fs, &b.left)?;
            if b.op == BinaryOperator::OpAnd || b.op == BinaryOperator::OpOr {
                let right = fold_expr(fs, &b.right)?;
                let left_wins = (b.op == BinaryOperator::OpAnd) != l.to_bool();
                return Some(if left_wins { l } else { right });
            }
            let r = fold_expr(fs, &b.right)?;
            fold_binary(b.op, &l, &r)
        }
        _ => None,
    }
}

/// Constant length of a table constructor holding only positional
/// non-nil constants.
fn table_length(fs: &mut FuncState, e: &Expr) -> Option<LuaValue> {
    let Expr::TableLit(t) = e else {
        return None;
    };
    let mut n = 0i64;
    for f in &t.fields {
        if matches!(f, Expr::KeyValueExpr(_)) || f.is_multi() {
            return None;
        }
        let v = fold_expr(fs, f)?;
        if v.is_nil() {
            return None;
        }
        n += 1;
    }
    Some(LuaValue::Integer(n))
}

/// Folds `#e` where `e` is a literal.
fn fold_length(fs: &mut FuncState, e: &Expr) -> Option<LuaValue> {
    match e {
        Expr::BasicLit(lit) => match &lit.value {
            LitValue::String(s) => Some(LuaValue::Integer(s.len() as i64)),
            _ => None,
        },
        Expr::ParenExpr(p) => fold_length(fs, &p.inner),
        Expr::TableLit(_) => table_length(fs, e),
        _ => None,
    }
}

/// Numbers the VM would produce identically; NaN and `-0.0` are left to
/// run time so the constant pool never holds them.
fn acceptable(v: LuaValue) -> Option<LuaValue> {
    match v {
        LuaValue::Float(f) if f.is_nan() || (f == 0.0 && f.is_sign_negative()) => None,
        v => Some(v),
    }
}

pub fn fold_unary(op: UnaryOperator, v: &LuaValue) -> Option<LuaValue> {
    match op {
        UnaryOperator::OpNot => Some(LuaValue::Boolean(!v.to_bool())),
        UnaryOperator::OpUnm => match v {
            LuaValue::Integer(i) => Some(LuaValue::Integer(i.wrapping_neg())),
            LuaValue::Float(f) => acceptable(LuaValue::Float(-f)),
            _ => None,
        },
        UnaryOperator::OpBNot => {
            let i = exact_integer(v)?;
            Some(LuaValue::Integer(!i))
        }
        UnaryOperator::OpLen => match v {
            LuaValue::String(s) => Some(LuaValue::Integer(s.len() as i64)),
            _ => None,
        },
    }
}

fn exact_integer(v: &LuaValue) -> Option<i64> {
    match v {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => float_to_integer(*f),
        _ => None,
    }
}

fn arith_op(op: BinaryOperator) -> Option<ArithOp> {
    Some(match op {
        BinaryOperator::OpAdd => ArithOp::Add,
        BinaryOperator::OpSub => ArithOp::Sub,
        BinaryOperator::OpMul => ArithOp::Mul,
        BinaryOperator::OpDiv => ArithOp::Div,
        BinaryOperator::OpIDiv => ArithOp::IDiv,
        BinaryOperator::OpMod => ArithOp::Mod,
        BinaryOperator::OpPow => ArithOp::Pow,
        BinaryOperator::OpBAnd => ArithOp::BAnd,
        BinaryOperator::OpBOr => ArithOp::BOr,
        BinaryOperator::OpBXor => ArithOp::BXor,
        BinaryOperator::OpShl => ArithOp::Shl,
        BinaryOperator::OpShr => ArithOp::Shr,
        _ => return None,
    })
}

pub fn fold_binary(op: BinaryOperator, l: &LuaValue, r: &LuaValue) -> Option<LuaValue> {
    if let Some(aop) = arith_op(op) {
        if !l.is_number() || !r.is_number() {
            return None;
        }
        if aop.is_bitwise() && (exact_integer(l).is_none() || exact_integer(r).is_none()) {
            return None;
        }
        // integer division by zero raises at run time
        return acceptable(arith(aop, l, r).ok()?);
    }
    match op {
        BinaryOperator::OpConcat => {
            if !(l.is_string() || l.is_number()) || !(r.is_string() || r.is_number()) {
                return None;
            }
            let a = to_lua_string(l)?;
            let b = to_lua_string(r)?;
            let mut bytes = a.as_bytes().to_vec();
            bytes.extend_from_slice(b.as_bytes());
            Some(LuaValue::string(bytes.as_slice()))
        }
        BinaryOperator::OpEq => Some(LuaValue::Boolean(l.raw_equal(r))),
        BinaryOperator::OpNe => Some(LuaValue::Boolean(!l.raw_equal(r))),
        BinaryOperator::OpLt => compare(l, r, false),
        BinaryOperator::OpLe => compare(l, r, true),
        BinaryOperator::OpGt => compare(r, l, false),
        BinaryOperator::OpGe => compare(r, l, true),
        _ => None,
    }
}

fn compare(l: &LuaValue, r: &LuaValue, or_equal: bool) -> Option<LuaValue> {
    let result = match (l, r) {
        (LuaValue::String(a), LuaValue::String(b)) => {
            if or_equal {
                a.as_bytes() <= b.as_bytes()
            } else {
                a.as_bytes() < b.as_bytes()
            }
        }
        _ if l.is_number() && r.is_number() => {
            if or_equal {
                num_le(l, r)?
            } else {
                num_lt(l, r)?
            }
        }
        _ => return None,
    };
    Some(LuaValue::Boolean(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::{ScanConfig, Stmt, parse_chunk};
    use smol_str::SmolStr;

    fn fold_src(expr: &str, mode: CompileMode) -> Option<LuaValue> {
        let src = format!("return {}", expr);
        let file = parse_chunk(src.as_bytes(), "=fold", ScanConfig::default()).unwrap();
        let Stmt::Return(ret) = &file.chunk.stmts[0] else {
            panic!("expected return");
        };
        let mut fs = FuncState::new(SmolStr::new("=fold"), mode);
        fold_expr(&mut fs, &ret.values[0])
    }

    fn fold(expr: &str) -> Option<LuaValue> {
        fold_src(expr, CompileMode::default())
    }

    #[test]
    fn test_fold_arith() {
        assert!(matches!(fold("1 + 2 * 3"), Some(LuaValue::Integer(7))));
        assert!(matches!(fold("7 // 2"), Some(LuaValue::Integer(3))));
        assert!(matches!(fold("-7 % 3"), Some(LuaValue::Integer(2))));
        assert!(matches!(fold("1 / 2"), Some(LuaValue::Float(f)) if f == 0.5));
        assert!(matches!(fold("2 ^ 10"), Some(LuaValue::Float(f)) if f == 1024.0));
        assert!(matches!(
            fold("9223372036854775807 + 1"),
            Some(LuaValue::Integer(i64::MIN))
        ));
    }

    #[test]
    fn test_fold_refusals() {
        assert!(fold("1 // 0").is_none());
        assert!(fold("1 % 0").is_none());
        assert!(fold("0/0").is_none());
        assert!(fold("-0.0").is_none());
        assert!(fold("1.5 | 1").is_none());
        assert!(fold("'10' + 1").is_none());
        assert!(fold("x + 1").is_none());
        assert!(fold_src("1 + 2", CompileMode::NO_FOLD).is_none());
        assert!(matches!(
            fold_src("42", CompileMode::NO_FOLD),
            Some(LuaValue::Integer(42))
        ));
    }

    #[test]
    fn test_fold_bitwise_and_logic() {
        assert!(matches!(fold("3.0 | 4"), Some(LuaValue::Integer(7))));
        assert!(matches!(fold("~0"), Some(LuaValue::Integer(-1))));
        assert!(matches!(fold("1 << 64"), Some(LuaValue::Integer(0))));
        assert!(matches!(fold("not nil"), Some(LuaValue::Boolean(true))));
        assert!(matches!(fold("nil and 1"), Some(LuaValue::Nil)));
        assert!(matches!(fold("false or 'x'"), Some(LuaValue::String(_))));
        assert!(matches!(fold("1 < 2.5"), Some(LuaValue::Boolean(true))));
        assert!(matches!(fold("'a' >= 'b'"), Some(LuaValue::Boolean(false))));
        assert!(matches!(fold("1 == 1.0"), Some(LuaValue::Boolean(true))));
    }

    #[test]
    fn test_fold_concat_and_length() {
        match fold("'a' .. 1 .. 2.0") {
            Some(LuaValue::String(s)) => assert_eq!(s.as_bytes(), b"a12.0"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(fold("#'hello'"), Some(LuaValue::Integer(5))));
        assert!(matches!(fold("#{1, 2, 'x'}"), Some(LuaValue::Integer(3))));
        assert!(fold("#{1, nil}").is_none());
        assert!(fold("#{f()}").is_none());
        assert!(fold("#{a = 1}").is_none());
    }
}
