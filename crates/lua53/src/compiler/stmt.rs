// Statement and function code generation

use std::rc::Rc;

use log::debug;

use crate::compiler::CompileResult;
use crate::compiler::code::{self, emit_abc, emit_abx, emit_asbx};
use crate::compiler::expr::{
    ExprMode, TableRef, emit_set, env_table, expr_to_reg, gen_call, gen_cond_jump, gen_expr,
    gen_key, gen_multi, gen_table_operand,
};
use crate::compiler::fold::fold_expr;
use crate::compiler::func_state::{FuncState, VarLoc};
use crate::compiler::parser::{
    AssignStmt, Block, Expr, File, ForEachStmt, ForStmt, FuncBody, FuncStmt, IfStmt,
    LocalAssignStmt, LocalFuncStmt, RepeatStmt, ReturnStmt, SelectorExpr, Stmt, WhileStmt,
};
use crate::compiler::CompileMode;
use crate::lua_value::{Chunk, LuaValue};
use crate::lua_vm::opcode::OpCode;

/// Compiles a parsed file into its main function.
pub fn gen_main(file: &File, mode: CompileMode) -> CompileResult<Chunk> {
    let mut fs = FuncState::new_main(file.filename.clone(), mode);
    fs.enter_block(false);
    gen_stmts(&mut fs, &file.chunk.stmts, true)?;
    fs.line = file.chunk.close.line;
    code::ret(&mut fs, 0, 0);
    fs.leave_block()?;
    log_function(&fs.chunk);
    Ok(fs.chunk)
}

fn log_function(chunk: &Chunk) {
    debug!(
        "compiled {}:{}: {} instructions, {} constants, {} registers",
        chunk.source,
        chunk.line_defined,
        chunk.code.len(),
        chunk.constants.len(),
        chunk.max_stack_size
    );
}

/// Compiles a function body as a child prototype of `fs`; returns its index
/// for `CLOSURE`.
pub fn gen_function(fs: &mut FuncState, body: &FuncBody, is_method: bool) -> CompileResult<u32> {
    let child = FuncState::new(fs.chunk.source.clone(), fs.mode);
    let parent = std::mem::replace(fs, child);
    fs.parent = Some(Box::new(parent));
    fs.chunk.line_defined = body.pos.line;
    fs.chunk.last_line_defined = body.block.close.line;
    fs.line = body.pos.line;

    fs.enter_block(false);
    let mut nparams = 0;
    if is_method {
        fs.new_local("self")?;
        nparams += 1;
    }
    for name in &body.params.names {
        fs.new_local(&name.name)?;
        nparams += 1;
    }
    fs.adjust_locals(nparams);
    fs.chunk.param_count = nparams as u8;
    fs.chunk.is_vararg = body.params.vararg;
    fs.reserve_regs(nparams)?;
    gen_stmts(fs, &body.block.stmts, true)?;
    fs.line = body.block.close.line;
    code::ret(fs, 0, 0);
    fs.leave_block()?;

    let Some(parent) = fs.parent.take() else {
        return Err(fs.error("function has no enclosing scope"));
    };
    let child = std::mem::replace(fs, *parent);
    log_function(&child.chunk);
    fs.chunk.child_protos.push(Rc::new(child.chunk));
    Ok(fs.chunk.child_protos.len() as u32 - 1)
}

/// A block with its own scope.
fn gen_block(fs: &mut FuncState, block: &Block) -> CompileResult<()> {
    fs.enter_block(false);
    gen_stmts(fs, &block.stmts, true)?;
    fs.leave_block()
}

/// `closes_scope` tells whether the scope ends right after the last
/// statement; it does not in a `repeat` body, whose locals the condition
/// still sees.
fn gen_stmts(fs: &mut FuncState, stmts: &[Stmt], closes_scope: bool) -> CompileResult<()> {
    for (i, stmt) in stmts.iter().enumerate() {
        let block_end = closes_scope
            && stmts[i + 1..]
                .iter()
                .all(|s| matches!(s, Stmt::Empty(_) | Stmt::Label(_)));
        gen_stmt(fs, stmt, block_end)?;
        fs.freereg = fs.nactvar;
    }
    Ok(())
}

fn gen_stmt(fs: &mut FuncState, stmt: &Stmt, block_end: bool) -> CompileResult<()> {
    fs.line = stmt.pos().line;
    match stmt {
        Stmt::Bad(pos, _) => Err(fs.error_at(pos.line, "unexpected symbol")),
        Stmt::Empty(_) => Ok(()),
        Stmt::LocalAssign(s) => gen_local_assign(fs, s),
        Stmt::LocalFunc(s) => gen_local_func(fs, s),
        Stmt::Func(s) => gen_func_stmt(fs, s),
        Stmt::Label(s) => fs.new_label(&s.name.name, s.pos.line, block_end),
        Stmt::Expr(e) => match e {
            Expr::CallExpr(c) => gen_call(fs, c, 0).map(|_| ()),
            other => Err(fs.error_at(other.line(), "syntax error")),
        },
        Stmt::Assign(s) => gen_assign(fs, s),
        Stmt::Goto(s) => {
            let j = code::jump(fs);
            fs.new_goto(&s.label.name, s.pos.line, j)
        }
        Stmt::Break(pos) => {
            let j = code::jump(fs);
            fs.new_goto("break", pos.line, j)
        }
        Stmt::If(s) => gen_if(fs, s),
        Stmt::Do(block) => gen_block(fs, block),
        Stmt::While(s) => gen_while(fs, s),
        Stmt::Repeat(s) => gen_repeat(fs, s),
        Stmt::Return(s) => gen_return(fs, s),
        Stmt::For(s) => gen_for(fs, s),
        Stmt::ForEach(s) => gen_for_each(fs, s),
    }
}

/// Evaluates `exprs` into `nvars` consecutive registers from the first
/// free one, truncating extra values and filling missing ones with nil.
pub fn adjust_assign(fs: &mut FuncState, nvars: usize, exprs: &[Expr]) -> CompileResult<()> {
    let base = fs.freereg;
    let nexps = exprs.len();
    for (i, e) in exprs.iter().enumerate() {
        if i + 1 == nexps && e.is_multi() {
            let want = nvars as i32 - i as i32;
            gen_multi(fs, e, want.max(0))?;
        } else {
            let reg = fs.reserve_regs(1)?;
            expr_to_reg(fs, e, reg)?;
        }
    }
    let placed = (fs.freereg - base) as usize;
    if placed < nvars {
        code::emit_nil(fs, fs.freereg, (nvars - placed) as u32);
    }
    fs.freereg = base;
    fs.reserve_regs(nvars as u32)?;
    Ok(())
}

fn gen_local_assign(fs: &mut FuncState, s: &LocalAssignStmt) -> CompileResult<()> {
    adjust_assign(fs, s.names.len(), &s.values)?;
    for name in &s.names {
        fs.new_local(&name.name)?;
    }
    fs.adjust_locals(s.names.len() as u32);
    Ok(())
}

fn gen_local_func(fs: &mut FuncState, s: &LocalFuncStmt) -> CompileResult<()> {
    // visible inside its own body for recursion
    fs.new_local(&s.name.name)?;
    fs.adjust_locals(1);
    let reg = fs.reserve_regs(1)?;
    let idx = gen_function(fs, &s.body, false)?;
    fs.line = s.pos.line;
    emit_abx(fs, OpCode::Closure, reg, idx);
    Ok(())
}

fn gen_func_stmt(fs: &mut FuncState, s: &FuncStmt) -> CompileResult<()> {
    let method_target;
    let target = match &s.method {
        Some(method) => {
            method_target = Expr::SelectorExpr(Box::new(SelectorExpr {
                object: s.target.clone(),
                field: method.clone(),
            }));
            &method_target
        }
        None => &s.target,
    };
    let dest = gen_target(fs, target)?;
    let idx = gen_function(fs, &s.body, s.method.is_some())?;
    fs.line = s.pos.line;
    match dest {
        Target::Local(reg) => {
            emit_abx(fs, OpCode::Closure, reg, idx);
        }
        dest => {
            let reg = fs.reserve_regs(1)?;
            emit_abx(fs, OpCode::Closure, reg, idx);
            store(fs, dest, reg);
        }
    }
    Ok(())
}

/// An assignable location with its prefix already evaluated.
#[derive(Debug, Clone, Copy)]
enum Target {
    Local(u32),
    Upval(u32),
    Indexed(TableRef, u32),
}

fn gen_target(fs: &mut FuncState, e: &Expr) -> CompileResult<Target> {
    match e {
        Expr::Name(n) => match fs.resolve(&n.name)? {
            VarLoc::Local(reg) => Ok(Target::Local(reg)),
            VarLoc::Upval(u) => Ok(Target::Upval(u)),
            VarLoc::Global => {
                let env = env_table(fs)?;
                let key = gen_key(fs, n)?;
                Ok(Target::Indexed(env, key))
            }
        },
        Expr::SelectorExpr(s) => {
            let table = gen_table_operand(fs, &s.object)?;
            let key = gen_key(fs, &s.field)?;
            Ok(Target::Indexed(table, key))
        }
        Expr::IndexExpr(i) => {
            let table = gen_table_operand(fs, &i.object)?;
            let key = gen_expr(fs, &i.key, ExprMode::REG | ExprMode::CONST | ExprMode::MOVE)?;
            Ok(Target::Indexed(table, key))
        }
        other => Err(fs.error_at(other.line(), "syntax error")),
    }
}

/// Stores register `value` into `target`.
fn store(fs: &mut FuncState, target: Target, value: u32) {
    match target {
        Target::Local(reg) => {
            emit_abc(fs, OpCode::Move, reg, value, 0);
        }
        Target::Upval(u) => {
            emit_abc(fs, OpCode::SetUpval, value, u, 0);
        }
        Target::Indexed(table, key) => emit_set(fs, table, key, value),
    }
}

fn gen_assign(fs: &mut FuncState, s: &AssignStmt) -> CompileResult<()> {
    if let ([target], [value]) = (s.targets.as_slice(), s.values.as_slice()) {
        let dest = gen_target(fs, target)?;
        match dest {
            Target::Local(reg) => expr_to_reg(fs, value, reg)?,
            Target::Upval(u) => {
                let v = gen_expr(fs, value, ExprMode::REG | ExprMode::MOVE)?;
                emit_abc(fs, OpCode::SetUpval, v, u, 0);
            }
            Target::Indexed(table, key) => {
                let v = gen_expr(fs, value, ExprMode::REG | ExprMode::CONST | ExprMode::MOVE)?;
                emit_set(fs, table, key, v);
            }
        }
        return Ok(());
    }

    // prefixes, then values, then stores from right to left
    let mut assigned_locals = Vec::new();
    let mut assigned_upvals = Vec::new();
    for t in &s.targets {
        if let Expr::Name(n) = t {
            match fs.resolve(&n.name)? {
                VarLoc::Local(reg) => assigned_locals.push(reg),
                VarLoc::Upval(u) => assigned_upvals.push(u),
                VarLoc::Global => {}
            }
        }
    }
    let mut dests = Vec::with_capacity(s.targets.len());
    for t in &s.targets {
        let dest = match gen_target(fs, t)? {
            Target::Indexed(table, key) => {
                let table = match table {
                    TableRef::Reg(reg) if assigned_locals.contains(&reg) => {
                        let tmp = fs.reserve_regs(1)?;
                        emit_abc(fs, OpCode::Move, tmp, reg, 0);
                        TableRef::Reg(tmp)
                    }
                    TableRef::Upval(u) if assigned_upvals.contains(&u) => {
                        let tmp = fs.reserve_regs(1)?;
                        emit_abc(fs, OpCode::GetUpval, tmp, u, 0);
                        TableRef::Reg(tmp)
                    }
                    other => other,
                };
                let key = if key < fs.nactvar && assigned_locals.contains(&key) {
                    let tmp = fs.reserve_regs(1)?;
                    emit_abc(fs, OpCode::Move, tmp, key, 0);
                    tmp
                } else {
                    key
                };
                Target::Indexed(table, key)
            }
            other => other,
        };
        dests.push(dest);
    }
    let base = fs.freereg;
    adjust_assign(fs, dests.len(), &s.values)?;
    let save_lock = fs.locktmp;
    fs.locktmp = true;
    for (i, dest) in dests.iter().enumerate().rev() {
        store(fs, *dest, base + i as u32);
    }
    fs.locktmp = save_lock;
    Ok(())
}

fn gen_if(fs: &mut FuncState, s: &IfStmt) -> CompileResult<()> {
    let mut branches = vec![(&s.cond, &s.then_block)];
    branches.extend(s.else_ifs.iter().map(|b| (&b.cond, &b.block)));
    let mut escapes = Vec::new();
    let mut taken = false;
    for (i, (cond, block)) in branches.iter().enumerate() {
        let more = i + 1 < branches.len() || s.else_block.is_some();
        fs.line = cond.line();
        match fold_expr(fs, cond) {
            Some(v) if !v.to_bool() => continue,
            Some(_) => {
                gen_block(fs, block)?;
                taken = true;
                break;
            }
            None => {
                let skip = gen_cond_jump(fs, cond, false)?;
                gen_block(fs, block)?;
                if more {
                    escapes.push(code::jump(fs));
                }
                code::patch_to_here(fs, &skip)?;
            }
        }
    }
    if !taken && let Some(block) = &s.else_block {
        gen_block(fs, block)?;
    }
    code::patch_to_here(fs, &escapes)
}

fn gen_while(fs: &mut FuncState, s: &WhileStmt) -> CompileResult<()> {
    if let Some(v) = fold_expr(fs, &s.cond)
        && !v.to_bool()
    {
        return Ok(());
    }
    let init = code::mark_label(fs);
    let exits = gen_cond_jump(fs, &s.cond, false)?;
    fs.enter_block(true);
    gen_block(fs, &s.block)?;
    let back = code::jump(fs);
    code::patch(fs, back, init)?;
    fs.leave_block()?;
    code::patch_to_here(fs, &exits)
}

fn gen_repeat(fs: &mut FuncState, s: &RepeatStmt) -> CompileResult<()> {
    let init = code::mark_label(fs);
    fs.enter_block(true);
    fs.enter_block(false);
    gen_stmts(fs, &s.block.stmts, false)?;
    fs.line = s.cond.line();
    let back = gen_cond_jump(fs, &s.cond, false)?;
    if let Some(scope) = fs.blocks.last().cloned()
        && scope.has_upval
    {
        for &j in &back {
            code::patch_close(fs, j, scope.nactvar);
        }
    }
    fs.leave_block()?;
    code::patch_list(fs, &back, init)?;
    fs.leave_block()
}

fn gen_for(fs: &mut FuncState, s: &ForStmt) -> CompileResult<()> {
    fs.enter_block(true);
    let base = fs.freereg;
    fs.new_local("(for index)")?;
    fs.new_local("(for limit)")?;
    fs.new_local("(for step)")?;
    fs.new_local(&s.var.name)?;
    for e in [&s.start, &s.limit] {
        let reg = fs.reserve_regs(1)?;
        expr_to_reg(fs, e, reg)?;
    }
    let reg = fs.reserve_regs(1)?;
    match &s.step {
        Some(step) => expr_to_reg(fs, step, reg)?,
        None => code::load_constant(fs, LuaValue::Integer(1), reg),
    }
    fs.adjust_locals(3);
    fs.line = s.pos.line;
    let prep = emit_asbx(fs, OpCode::ForPrep, base, -1);

    fs.enter_block(false);
    fs.adjust_locals(1);
    fs.reserve_regs(1)?;
    let body = code::mark_label(fs);
    gen_stmts(fs, &s.block.stmts, true)?;
    fs.leave_block()?;

    let loop_pc = code::mark_label(fs);
    code::patch(fs, prep, loop_pc)?;
    fs.line = s.pos.line;
    emit_asbx(fs, OpCode::ForLoop, base, body as i32 - loop_pc as i32 - 1);
    fs.leave_block()
}

fn gen_for_each(fs: &mut FuncState, s: &ForEachStmt) -> CompileResult<()> {
    fs.enter_block(true);
    let base = fs.freereg;
    fs.new_local("(for generator)")?;
    fs.new_local("(for state)")?;
    fs.new_local("(for control)")?;
    for name in &s.names {
        fs.new_local(&name.name)?;
    }
    adjust_assign(fs, 3, &s.exprs)?;
    fs.adjust_locals(3);
    fs.check_stack(3)?;
    let prep = code::jump(fs);

    let nvars = s.names.len() as u32;
    fs.enter_block(false);
    fs.adjust_locals(nvars);
    fs.reserve_regs(nvars)?;
    let body = code::mark_label(fs);
    gen_stmts(fs, &s.block.stmts, true)?;
    fs.leave_block()?;

    let call_pc = code::mark_label(fs);
    code::patch(fs, prep, call_pc)?;
    fs.line = s.pos.line;
    emit_abc(fs, OpCode::TForCall, base, 0, nvars);
    let loop_pc = fs.pc();
    emit_asbx(fs, OpCode::TForLoop, base + 2, body as i32 - loop_pc as i32 - 1);
    fs.leave_block()
}

fn gen_return(fs: &mut FuncState, s: &ReturnStmt) -> CompileResult<()> {
    fs.line = s.pos.line;
    let base = fs.freereg;
    match s.values.as_slice() {
        [] => {
            code::ret(fs, 0, 0);
        }
        [Expr::CallExpr(c)] => {
            gen_call(fs, c, -1)?;
            let pc = fs.pc() - 1;
            fs.chunk.code[pc].set_opcode(OpCode::TailCall);
            fs.chunk.code[pc].set_c(0);
            fs.line = s.pos.line;
            code::ret(fs, base, -1);
        }
        [single] if single.is_multi() => {
            gen_multi(fs, single, -1)?;
            code::ret(fs, base, -1);
        }
        [single] => {
            let reg = gen_expr(fs, single, ExprMode::REG | ExprMode::MOVE)?;
            fs.line = s.pos.line;
            code::ret(fs, reg, 1);
        }
        values => {
            let n = values.len();
            let mut open = false;
            for (i, e) in values.iter().enumerate() {
                if i + 1 == n && e.is_multi() {
                    gen_multi(fs, e, -1)?;
                    open = true;
                } else {
                    let reg = fs.reserve_regs(1)?;
                    expr_to_reg(fs, e, reg)?;
                }
            }
            fs.line = s.pos.line;
            code::ret(fs, base, if open { -1 } else { n as i32 });
        }
    }
    Ok(())
}
