// Expression code generation

use std::ops::BitOr;

use crate::compiler::CompileResult;
use crate::compiler::code::{self, emit_abc, emit_abx};
use crate::compiler::fold::fold_expr;
use crate::compiler::func_state::{FuncState, VarLoc};
use crate::compiler::parser::{
    BinaryExpr, BinaryOperator, CallExpr, Expr, Name, TableLit, UnaryExpr, UnaryOperator,
};
use crate::compiler::stmt::gen_function;
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::opcode::{Instruction, OpCode};

/// What `gen_expr` may hand back instead of a fresh register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprMode(u8);

impl ExprMode {
    /// the value ends up in a register
    pub const REG: ExprMode = ExprMode(1);
    /// a constant may be returned as an RK operand
    pub const CONST: ExprMode = ExprMode(2);
    /// a local may be returned as its own register, without a copy
    pub const MOVE: ExprMode = ExprMode(4);
    /// a `Name` denotes its own string constant
    pub const KEY: ExprMode = ExprMode(8);

    pub fn has(self, other: ExprMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExprMode {
    type Output = ExprMode;

    fn bitor(self, rhs: ExprMode) -> ExprMode {
        ExprMode(self.0 | rhs.0)
    }
}

/// Where a table operand lives: a register or an upvalue (`GETTABUP`).
#[derive(Debug, Clone, Copy)]
pub enum TableRef {
    Reg(u32),
    Upval(u32),
}

/// Generates `e` and returns its operand: an RK constant, the register of
/// a local or a newly reserved register, as `mode` allows.
pub fn gen_expr(fs: &mut FuncState, e: &Expr, mode: ExprMode) -> CompileResult<u32> {
    if mode.has(ExprMode::KEY)
        && let Expr::Name(n) = e
    {
        return const_operand(fs, LuaValue::string(n.name.as_bytes()), mode);
    }
    if mode.has(ExprMode::CONST)
        && let Some(v) = fold_expr(fs, e)
    {
        return const_operand(fs, v, mode);
    }
    if mode.has(ExprMode::MOVE)
        && let Some(reg) = local_reg(fs, e)?
    {
        return Ok(reg);
    }
    let reg = fs.reserve_regs(1)?;
    expr_to_reg(fs, e, reg)?;
    Ok(reg)
}

fn const_operand(fs: &mut FuncState, v: LuaValue, mode: ExprMode) -> CompileResult<u32> {
    if mode.has(ExprMode::CONST)
        && let Some(rk) = code::constant_rk(fs, v.clone())
    {
        return Ok(rk);
    }
    let reg = fs.reserve_regs(1)?;
    code::load_constant(fs, v, reg);
    Ok(reg)
}

/// RK operand of a field name.
pub fn gen_key(fs: &mut FuncState, name: &Name) -> CompileResult<u32> {
    gen_expr(fs, &Expr::Name(name.clone()), ExprMode::KEY | ExprMode::CONST)
}

/// Register of `e` when it is (a parenthesized) local.
pub fn local_reg(fs: &mut FuncState, e: &Expr) -> CompileResult<Option<u32>> {
    match e {
        Expr::Name(n) => match fs.resolve(&n.name)? {
            VarLoc::Local(reg) => Ok(Some(reg)),
            _ => Ok(None),
        },
        Expr::ParenExpr(p) => local_reg(fs, &p.inner),
        _ => Ok(None),
    }
}

fn strip_parens(e: &Expr) -> &Expr {
    match e {
        Expr::ParenExpr(p) => strip_parens(&p.inner),
        other => other,
    }
}

/// Generates `e` into register `dst`. Temporaries above the first free
/// register are released afterwards.
pub fn expr_to_reg(fs: &mut FuncState, e: &Expr, dst: u32) -> CompileResult<()> {
    let save = fs.freereg;
    if dst < fs.nactvar && matches!(strip_parens(e), Expr::TableLit(_)) {
        // the constructor may read the local it is assigned to
        let tmp = fs.reserve_regs(1)?;
        discharge(fs, e, tmp)?;
        emit_abc(fs, OpCode::Move, dst, tmp, 0);
    } else {
        discharge(fs, e, dst)?;
    }
    fs.freereg = save;
    Ok(())
}

/// Places `nresults` values of `e` (all of them for -1) at the first free
/// register and reserves them.
pub fn gen_multi(fs: &mut FuncState, e: &Expr, nresults: i32) -> CompileResult<()> {
    match e {
        Expr::CallExpr(c) => {
            gen_call(fs, c, nresults)?;
        }
        Expr::Vararg(pos) => {
            let base = fs.freereg;
            fs.line = pos.line;
            fs.check_stack(1)?;
            emit_abc(fs, OpCode::Vararg, base, (nresults + 1) as u32, 0);
            if nresults > 0 {
                fs.reserve_regs(nresults as u32)?;
            }
        }
        other => {
            let reg = fs.reserve_regs(1)?;
            expr_to_reg(fs, other, reg)?;
            if nresults > 1 {
                code::emit_nil(fs, reg + 1, nresults as u32 - 1);
                fs.reserve_regs(nresults as u32 - 1)?;
            } else if nresults == 0 {
                fs.freereg = reg;
            }
        }
    }
    Ok(())
}

/// Evaluates a table operand, keeping upvalues in place for `GETTABUP`.
pub fn gen_table_operand(fs: &mut FuncState, obj: &Expr) -> CompileResult<TableRef> {
    if let Expr::Name(n) = obj
        && let VarLoc::Upval(u) = fs.resolve(&n.name)?
    {
        return Ok(TableRef::Upval(u));
    }
    Ok(TableRef::Reg(gen_expr(fs, obj, ExprMode::REG | ExprMode::MOVE)?))
}

/// The table holding globals: the `_ENV` local or upvalue in scope.
pub fn env_table(fs: &mut FuncState) -> CompileResult<TableRef> {
    match fs.resolve("_ENV")? {
        VarLoc::Local(reg) => Ok(TableRef::Reg(reg)),
        VarLoc::Upval(u) => Ok(TableRef::Upval(u)),
        VarLoc::Global => Err(fs.error("no _ENV in scope")),
    }
}

fn emit_get(fs: &mut FuncState, table: TableRef, key: u32, dst: u32) {
    match table {
        TableRef::Reg(reg) => emit_abc(fs, OpCode::GetTable, dst, reg, key),
        TableRef::Upval(u) => emit_abc(fs, OpCode::GetTabUp, dst, u, key),
    };
}

/// Emits the store `table[key] = value` (RK operands).
pub fn emit_set(fs: &mut FuncState, table: TableRef, key: u32, value: u32) {
    match table {
        TableRef::Reg(reg) => emit_abc(fs, OpCode::SetTable, reg, key, value),
        TableRef::Upval(u) => emit_abc(fs, OpCode::SetTabUp, u, key, value),
    };
}

fn discharge(fs: &mut FuncState, e: &Expr, dst: u32) -> CompileResult<()> {
    if let Some(v) = fold_expr(fs, e) {
        fs.line = e.line();
        code::load_constant(fs, v, dst);
        return Ok(());
    }
    match e {
        Expr::Bad(pos, _) => Err(fs.error_at(pos.line, "unexpected symbol")),
        Expr::BasicLit(_) => Ok(()),
        Expr::Name(n) => gen_name(fs, n, dst),
        Expr::Vararg(pos) => {
            fs.line = pos.line;
            emit_abc(fs, OpCode::Vararg, dst, 2, 0);
            Ok(())
        }
        Expr::FuncLit(f) => {
            let idx = gen_function(fs, &f.body, false)?;
            fs.line = f.pos.line;
            emit_abx(fs, OpCode::Closure, dst, idx);
            Ok(())
        }
        Expr::TableLit(t) => gen_table(fs, t, dst),
        Expr::ParenExpr(p) => discharge(fs, &p.inner, dst),
        Expr::SelectorExpr(s) => {
            let save = fs.freereg;
            let table = gen_table_operand(fs, &s.object)?;
            let key = gen_key(fs, &s.field)?;
            fs.line = s.field.pos.line;
            emit_get(fs, table, key, dst);
            fs.freereg = save;
            Ok(())
        }
        Expr::IndexExpr(i) => {
            let save = fs.freereg;
            let table = gen_table_operand(fs, &i.object)?;
            let key = gen_expr(fs, &i.key, ExprMode::REG | ExprMode::CONST | ExprMode::MOVE)?;
            fs.line = i.object.end().line;
            emit_get(fs, table, key, dst);
            fs.freereg = save;
            Ok(())
        }
        Expr::CallExpr(c) => {
            let save = fs.freereg;
            if dst + 1 == fs.freereg && dst >= fs.nactvar {
                fs.freereg = dst;
                gen_call(fs, c, 1)?;
            } else {
                let base = gen_call(fs, c, 1)?;
                emit_abc(fs, OpCode::Move, dst, base, 0);
            }
            fs.freereg = save;
            Ok(())
        }
        Expr::UnaryExpr(u) => gen_unary(fs, u, dst),
        Expr::BinaryExpr(b) => gen_binary(fs, b, dst),
        Expr::KeyValueExpr(kv) => Err(fs.error_at(kv.pos.line, "unexpected table field")),
    }
}

fn gen_name(fs: &mut FuncState, n: &Name, dst: u32) -> CompileResult<()> {
    fs.line = n.pos.line;
    match fs.resolve(&n.name)? {
        VarLoc::Local(reg) => {
            if reg != dst {
                emit_abc(fs, OpCode::Move, dst, reg, 0);
            }
        }
        VarLoc::Upval(u) => {
            emit_abc(fs, OpCode::GetUpval, dst, u, 0);
        }
        VarLoc::Global => {
            let save = fs.freereg;
            let env = env_table(fs)?;
            let key = gen_key(fs, n)?;
            emit_get(fs, env, key, dst);
            fs.freereg = save;
        }
    }
    Ok(())
}

/// Generates a call with its function at the first free register and
/// returns that register. `nresults` of -1 keeps every result.
pub fn gen_call(fs: &mut FuncState, c: &CallExpr, nresults: i32) -> CompileResult<u32> {
    let line = c.func.line();
    let base = fs.freereg;
    match &c.method {
        Some(method) => {
            let obj = gen_expr(fs, &c.func, ExprMode::REG | ExprMode::MOVE)?;
            fs.freereg = base;
            fs.reserve_regs(2)?;
            let key = gen_key(fs, method)?;
            fs.line = method.pos.line;
            emit_abc(fs, OpCode::Self_, base, obj, key);
            fs.freereg = base + 2;
        }
        None => {
            let reg = fs.reserve_regs(1)?;
            expr_to_reg(fs, &c.func, reg)?;
        }
    }
    let mut open = false;
    let nargs = c.args.len();
    for (i, arg) in c.args.iter().enumerate() {
        if i + 1 == nargs && arg.is_multi() {
            gen_multi(fs, arg, -1)?;
            open = true;
        } else {
            let reg = fs.reserve_regs(1)?;
            expr_to_reg(fs, arg, reg)?;
        }
    }
    let b = if open { 0 } else { fs.freereg - base };
    fs.line = line;
    emit_abc(fs, OpCode::Call, base, b, (nresults + 1) as u32);
    fs.freereg = base;
    if nresults > 0 {
        fs.reserve_regs(nresults as u32)?;
    } else {
        fs.check_stack(1)?;
    }
    Ok(base)
}

fn gen_unary(fs: &mut FuncState, u: &UnaryExpr, dst: u32) -> CompileResult<()> {
    let save = fs.freereg;
    let operand = gen_expr(fs, &u.operand, ExprMode::REG | ExprMode::MOVE)?;
    let op = match u.op {
        UnaryOperator::OpNot => OpCode::Not,
        UnaryOperator::OpLen => OpCode::Len,
        UnaryOperator::OpUnm => OpCode::Unm,
        UnaryOperator::OpBNot => OpCode::BNot,
    };
    fs.line = u.pos.line;
    emit_abc(fs, op, dst, operand, 0);
    fs.freereg = save;
    Ok(())
}

fn arith_opcode(op: BinaryOperator) -> Option<OpCode> {
    Some(match op {
        BinaryOperator::OpAdd => OpCode::Add,
        BinaryOperator::OpSub => OpCode::Sub,
        BinaryOperator::OpMul => OpCode::Mul,
        BinaryOperator::OpDiv => OpCode::Div,
        BinaryOperator::OpIDiv => OpCode::IDiv,
        BinaryOperator::OpMod => OpCode::Mod,
        BinaryOperator::OpPow => OpCode::Pow,
        BinaryOperator::OpBAnd => OpCode::BAnd,
        BinaryOperator::OpBOr => OpCode::BOr,
        BinaryOperator::OpBXor => OpCode::BXor,
        BinaryOperator::OpShl => OpCode::Shl,
        BinaryOperator::OpShr => OpCode::Shr,
        _ => return None,
    })
}

fn gen_binary(fs: &mut FuncState, b: &BinaryExpr, dst: u32) -> CompileResult<()> {
    let save = fs.freereg;
    match b.op {
        BinaryOperator::OpAnd | BinaryOperator::OpOr => gen_logical(fs, b, dst)?,
        BinaryOperator::OpConcat => gen_concat(fs, b, dst)?,
        op if op.is_comparison() => {
            let j = gen_compare(fs, b, true)?;
            fs.freereg = save;
            emit_abc(fs, OpCode::LoadBool, dst, 0, 1);
            code::patch_to_here(fs, &[j])?;
            emit_abc(fs, OpCode::LoadBool, dst, 1, 0);
        }
        op => {
            let Some(opcode) = arith_opcode(op) else {
                return Err(fs.error_at(b.op_pos.line, "unexpected operator"));
            };
            let mode = ExprMode::REG | ExprMode::CONST | ExprMode::MOVE;
            let l = gen_expr(fs, &b.left, mode)?;
            let r = gen_expr(fs, &b.right, mode)?;
            fs.line = b.op_pos.line;
            emit_abc(fs, opcode, dst, l, r);
        }
    }
    fs.freereg = save;
    Ok(())
}

/// Emits a comparison followed by a jump taken when its result equals
/// `jump_if`; returns the jump.
pub fn gen_compare(fs: &mut FuncState, b: &BinaryExpr, jump_if: bool) -> CompileResult<usize> {
    let (op, swap, a) = match b.op {
        BinaryOperator::OpEq => (OpCode::Eq, false, jump_if),
        BinaryOperator::OpNe => (OpCode::Eq, false, !jump_if),
        BinaryOperator::OpLt => (OpCode::Lt, false, jump_if),
        BinaryOperator::OpLe => (OpCode::Le, false, jump_if),
        BinaryOperator::OpGt => (OpCode::Lt, true, jump_if),
        BinaryOperator::OpGe => (OpCode::Le, true, jump_if),
        _ => return Err(fs.error_at(b.op_pos.line, "unexpected operator")),
    };
    let mode = ExprMode::REG | ExprMode::CONST | ExprMode::MOVE;
    let l = gen_expr(fs, &b.left, mode)?;
    let r = gen_expr(fs, &b.right, mode)?;
    let (x, y) = if swap { (r, l) } else { (l, r) };
    fs.line = b.op_pos.line;
    emit_abc(fs, op, a as u32, x, y);
    Ok(code::jump(fs))
}

/// `a and b` / `a or b` as a value.
fn gen_logical(fs: &mut FuncState, b: &BinaryExpr, dst: u32) -> CompileResult<()> {
    let is_and = b.op == BinaryOperator::OpAnd;
    if let Some(left) = fold_expr(fs, &b.left) {
        if left.to_bool() == is_and {
            return discharge(fs, &b.right, dst);
        }
        code::load_constant(fs, left, dst);
        return Ok(());
    }
    let save = fs.freereg;
    let c = if is_and { 0 } else { 1 };
    match local_reg(fs, &b.left)? {
        Some(reg) if reg != dst => {
            emit_abc(fs, OpCode::TestSet, dst, reg, c);
        }
        Some(_) => {
            emit_abc(fs, OpCode::Test, dst, 0, c);
        }
        None if dst >= fs.nactvar => {
            discharge(fs, &b.left, dst)?;
            emit_abc(fs, OpCode::Test, dst, 0, c);
        }
        None => {
            let reg = gen_expr(fs, &b.left, ExprMode::REG)?;
            emit_abc(fs, OpCode::TestSet, dst, reg, c);
        }
    }
    let j = code::jump(fs);
    fs.freereg = save;
    discharge(fs, &b.right, dst)?;
    fs.freereg = save;
    code::patch_to_here(fs, &[j])
}

fn gen_concat(fs: &mut FuncState, b: &BinaryExpr, dst: u32) -> CompileResult<()> {
    let mut operands = vec![&b.left];
    let mut rest = &b.right;
    while let Expr::BinaryExpr(rb) = rest
        && rb.op == BinaryOperator::OpConcat
        && fold_expr(fs, rest).is_none()
    {
        operands.push(&rb.left);
        rest = &rb.right;
    }
    operands.push(rest);
    let save = fs.freereg;
    let base = fs.freereg;
    for operand in &operands {
        let reg = fs.reserve_regs(1)?;
        expr_to_reg(fs, operand, reg)?;
    }
    fs.line = b.op_pos.line;
    emit_abc(fs, OpCode::Concat, dst, base, base + operands.len() as u32 - 1);
    fs.freereg = save;
    Ok(())
}

/// Jumps taken when the truth of `e` equals `jump_if`; falls through
/// otherwise. Constant conditions produce an unconditional jump or none.
pub fn gen_cond_jump(fs: &mut FuncState, e: &Expr, jump_if: bool) -> CompileResult<Vec<usize>> {
    if let Some(v) = fold_expr(fs, e) {
        return Ok(if v.to_bool() == jump_if {
            vec![code::jump(fs)]
        } else {
            Vec::new()
        });
    }
    let save = fs.freereg;
    let jumps = match e {
        Expr::ParenExpr(p) => gen_cond_jump(fs, &p.inner, jump_if)?,
        Expr::UnaryExpr(u) if u.op == UnaryOperator::OpNot => gen_cond_jump(fs, &u.operand, !jump_if)?,
        Expr::BinaryExpr(b) if b.op.is_comparison() => vec![gen_compare(fs, b, jump_if)?],
        Expr::BinaryExpr(b) if b.op == BinaryOperator::OpAnd || b.op == BinaryOperator::OpOr => {
            let is_and = b.op == BinaryOperator::OpAnd;
            if is_and != jump_if {
                // and/false, or/true: either side decides
                let mut list = gen_cond_jump(fs, &b.left, jump_if)?;
                list.extend(gen_cond_jump(fs, &b.right, jump_if)?);
                list
            } else {
                let skip = gen_cond_jump(fs, &b.left, !jump_if)?;
                let list = gen_cond_jump(fs, &b.right, jump_if)?;
                code::patch_to_here(fs, &skip)?;
                list
            }
        }
        _ => {
            let reg = gen_expr(fs, e, ExprMode::REG | ExprMode::MOVE)?;
            fs.line = e.line();
            emit_abc(fs, OpCode::Test, reg, 0, jump_if as u32);
            vec![code::jump(fs)]
        }
    };
    fs.freereg = save;
    Ok(jumps)
}

/// Table constructor into `dst`.
fn gen_table(fs: &mut FuncState, t: &TableLit, dst: u32) -> CompileResult<()> {
    if dst + 1 != fs.freereg {
        let save = fs.freereg;
        let tmp = fs.reserve_regs(1)?;
        gen_table(fs, t, tmp)?;
        emit_abc(fs, OpCode::Move, dst, tmp, 0);
        fs.freereg = save;
        return Ok(());
    }
    fs.line = t.open.line;
    let pc = emit_abc(fs, OpCode::NewTable, dst, 0, 0);
    let mut na = 0u32;
    let mut nh = 0u32;
    let mut pending = 0u32;
    let nfields = t.fields.len();
    for (i, field) in t.fields.iter().enumerate() {
        match field {
            Expr::KeyValueExpr(kv) => {
                nh += 1;
                let save = fs.freereg;
                let mode = ExprMode::REG | ExprMode::CONST | ExprMode::MOVE;
                let key = gen_expr(fs, &kv.key, mode)?;
                let value = gen_expr(fs, &kv.value, mode)?;
                fs.line = kv.pos.line;
                emit_abc(fs, OpCode::SetTable, dst, key, value);
                fs.freereg = save;
            }
            _ if i + 1 == nfields && field.is_multi() => {
                gen_multi(fs, field, -1)?;
                flush_list(fs, dst, 0, na - pending)?;
                pending = 0;
            }
            _ => {
                let reg = fs.reserve_regs(1)?;
                expr_to_reg(fs, field, reg)?;
                na += 1;
                pending += 1;
                if pending == LFIELDS_PER_FLUSH {
                    flush_list(fs, dst, pending, na - pending)?;
                    pending = 0;
                }
            }
        }
    }
    if pending > 0 {
        flush_list(fs, dst, pending, na - pending)?;
    }
    let instr = &mut fs.chunk.code[pc];
    instr.set_b(code::int2fb(na));
    instr.set_c(code::int2fb(nh));
    Ok(())
}

/// `SETLIST` of `count` pending items (0: up to the stack top) following
/// `stored` items already in the table.
fn flush_list(fs: &mut FuncState, table: u32, count: u32, stored: u32) -> CompileResult<()> {
    let block = stored / LFIELDS_PER_FLUSH + 1;
    if block <= Instruction::MAX_C {
        emit_abc(fs, OpCode::SetList, table, count, block);
    } else {
        emit_abc(fs, OpCode::SetList, table, count, 0);
        code::emit(fs, Instruction::create_ax(OpCode::ExtraArg, block));
    }
    fs.freereg = table + 1;
    Ok(())
}
