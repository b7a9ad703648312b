// Instruction emission, jump patching and the peephole pass (after lcode.c)

use crate::compiler::func_state::FuncState;
use crate::compiler::{CompileMode, CompileResult};
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::MAXINDEXRK;
use crate::lua_vm::opcode::{Instruction, OpArgMode, OpCode, OpMode};

/// Appends an instruction, merging it with the previous one when the
/// peephole pass allows. Returns the pc holding its effect.
pub fn emit(fs: &mut FuncState, instr: Instruction) -> usize {
    if !fs.mode.contains(CompileMode::NO_PEEPHOLE)
        && let Some(pc) = peep_line(fs, instr)
    {
        return pc;
    }
    fs.chunk.code.push(instr);
    fs.chunk.line_info.push(fs.line);
    fs.chunk.code.len() - 1
}

pub fn emit_abc(fs: &mut FuncState, op: OpCode, a: u32, b: u32, c: u32) -> usize {
    emit(fs, Instruction::create_abc(op, a, b, c))
}

pub fn emit_abx(fs: &mut FuncState, op: OpCode, a: u32, bx: u32) -> usize {
    emit(fs, Instruction::create_abx(op, a, bx))
}

pub fn emit_asbx(fs: &mut FuncState, op: OpCode, a: u32, sbx: i32) -> usize {
    emit(fs, Instruction::create_asbx(op, a, sbx))
}

/// Loads constant `k` into `reg`, using `LOADKX` for large indexes.
pub fn emit_loadk(fs: &mut FuncState, reg: u32, k: u32) -> usize {
    if k <= Instruction::MAX_BX {
        emit_abx(fs, OpCode::LoadK, reg, k)
    } else {
        let pc = emit_abx(fs, OpCode::LoadKX, reg, 0);
        emit(fs, Instruction::create_ax(OpCode::ExtraArg, k));
        pc
    }
}

/// Sets `n` registers from `from` to nil.
pub fn emit_nil(fs: &mut FuncState, from: u32, n: u32) {
    if n > 0 {
        emit_abc(fs, OpCode::LoadNil, from, n - 1, 0);
    }
}

/// Loads a folded constant into `reg`.
pub fn load_constant(fs: &mut FuncState, value: LuaValue, reg: u32) {
    match value {
        LuaValue::Nil => emit_nil(fs, reg, 1),
        LuaValue::Boolean(b) => {
            emit_abc(fs, OpCode::LoadBool, reg, b as u32, 0);
        }
        v => {
            let k = fs.add_constant(v);
            emit_loadk(fs, reg, k);
        }
    }
}

/// RK operand for a constant, `None` when its index does not fit.
pub fn constant_rk(fs: &mut FuncState, value: LuaValue) -> Option<u32> {
    let k = fs.add_constant(value);
    (k <= MAXINDEXRK).then(|| Instruction::rk_ask(k))
}

pub fn ret(fs: &mut FuncState, first: u32, nret: i32) -> usize {
    emit_abc(fs, OpCode::Return, first, (nret + 1) as u32, 0)
}

// ---------------------------------------------------------------------
// jumps

/// Emits a jump to be patched later.
pub fn jump(fs: &mut FuncState) -> usize {
    let pc = fs.pc();
    fs.chunk.code.push(Instruction::create_asbx(OpCode::Jmp, 0, -1));
    fs.chunk.line_info.push(fs.line);
    pc
}

/// Marks the current pc as a jump target and returns it.
pub fn mark_label(fs: &mut FuncState) -> usize {
    fs.last_target = fs.pc();
    fs.last_target
}

/// Points the jump at `pc` to `target`.
pub fn patch(fs: &mut FuncState, pc: usize, target: usize) -> CompileResult<()> {
    let offset = target as i64 - pc as i64 - 1;
    if offset.abs() > Instruction::MAX_SBX as i64 {
        return Err(fs.error("control structure too long"));
    }
    fs.chunk.code[pc].set_sbx(offset as i32);
    Ok(())
}

pub fn patch_list(fs: &mut FuncState, list: &[usize], target: usize) -> CompileResult<()> {
    for &pc in list {
        patch(fs, pc, target)?;
    }
    Ok(())
}

/// Points every jump of `list` to the next instruction. A trailing jump
/// that would land on its own successor is removed instead.
pub fn patch_to_here(fs: &mut FuncState, list: &[usize]) -> CompileResult<()> {
    if list.is_empty() {
        return Ok(());
    }
    let here = fs.pc();
    if list.len() == 1 && list[0] + 1 == here && removable_jump(fs, list[0]) {
        fs.chunk.code.pop();
        fs.chunk.line_info.pop();
        let pc = fs.pc() as u32;
        for lv in fs.chunk.loc_vars.iter_mut() {
            lv.start_pc = lv.start_pc.min(pc);
            lv.end_pc = lv.end_pc.min(pc);
        }
        mark_label(fs);
        return Ok(());
    }
    mark_label(fs);
    patch_list(fs, list, here)
}

fn removable_jump(fs: &FuncState, pc: usize) -> bool {
    if fs.mode.contains(CompileMode::NO_PEEPHOLE) || fs.last_target > pc {
        return false;
    }
    let jmp = fs.chunk.code[pc];
    if jmp.get_a() != 0 {
        return false;
    }
    pc == 0 || !is_skipping(fs.chunk.code[pc - 1])
}

/// Makes the jump at `pc` close upvalues from register `level` up.
pub fn patch_close(fs: &mut FuncState, pc: usize, level: u32) {
    fs.chunk.code[pc].set_a(level + 1);
}

/// Instructions that may skip their successor.
fn is_skipping(instr: Instruction) -> bool {
    match instr.opcode() {
        Some(OpCode::LoadBool) => instr.get_c() != 0,
        Some(op) => op.is_test(),
        None => false,
    }
}

// ---------------------------------------------------------------------
// peephole

/// Opcodes that only write register A from their operands.
fn is_pure_producer(op: OpCode) -> bool {
    use OpCode::*;
    matches!(
        op,
        LoadK
            | GetUpval
            | GetTable
            | GetTabUp
            | NewTable
            | Closure
            | Add
            | Sub
            | Mul
            | Mod
            | Pow
            | Div
            | IDiv
            | BAnd
            | BOr
            | BXor
            | Shl
            | Shr
            | Unm
            | BNot
            | Not
            | Len
            | Concat
    )
}

/// Plain loads whose only effect is writing register A.
fn is_plain_load(instr: Instruction) -> bool {
    match instr.opcode() {
        Some(OpCode::LoadK | OpCode::GetUpval | OpCode::Move) => true,
        Some(OpCode::LoadBool) => instr.get_c() == 0,
        Some(OpCode::LoadNil) => instr.get_b() == 0,
        _ => false,
    }
}

/// Whether `instr` reads register `reg` through its B or C operand.
fn reads_reg(instr: Instruction, reg: u32) -> bool {
    let Some(op) = instr.opcode() else {
        return true;
    };
    if op == OpCode::Concat {
        return (instr.get_b()..=instr.get_c()).contains(&reg);
    }
    if op.get_mode() != OpMode::IABC {
        return false;
    }
    let (bmode, cmode) = op.arg_modes();
    let uses = |mode: OpArgMode, arg: u32| match mode {
        OpArgMode::R => arg == reg,
        OpArgMode::K => !Instruction::is_k(arg) && arg == reg,
        _ => false,
    };
    uses(bmode, instr.get_b()) || uses(cmode, instr.get_c())
}

/// Tries to merge `cur` into the last emitted instruction.
fn peep_line(fs: &mut FuncState, cur: Instruction) -> Option<usize> {
    let pc = fs.pc();
    let cur_op = cur.opcode()?;
    if cur_op == OpCode::Move && cur.get_a() == cur.get_b() {
        return Some(pc.saturating_sub(1));
    }
    if pc == 0 || fs.last_target == pc {
        return None;
    }
    if pc >= 2 && is_skipping(fs.chunk.code[pc - 2]) {
        return None;
    }
    let prev = fs.chunk.code[pc - 1];
    let prev_op = prev.opcode()?;
    let merged = match (prev_op, cur_op) {
        // LOADNIL a b; LOADNIL a2 b2 with touching ranges
        (OpCode::LoadNil, OpCode::LoadNil) => {
            let (from, to) = (prev.get_a(), prev.get_a() + prev.get_b());
            let (from2, to2) = (cur.get_a(), cur.get_a() + cur.get_b());
            if from2 <= to + 1 && from <= to2 + 1 {
                let start = from.min(from2);
                let end = to.max(to2);
                Some(Instruction::create_abc(OpCode::LoadNil, start, end - start, 0))
            } else {
                None
            }
        }
        // OP tmp ...; MOVE a tmp  =>  OP a ...
        (op, OpCode::Move)
            if is_pure_producer(op)
                && prev.get_a() == cur.get_b()
                && fs.is_dead_temp(cur.get_b()) =>
        {
            let mut merged = prev;
            merged.set_a(cur.get_a());
            Some(merged)
        }
        // LOADK tmp k; SETTABLE a b tmp  =>  SETTABLE a b K(k)
        (OpCode::LoadK, OpCode::SetTable | OpCode::SetTabUp)
            if !Instruction::is_k(cur.get_c())
                && cur.get_c() == prev.get_a()
                && prev.get_bx() <= MAXINDEXRK
                && fs.is_dead_temp(prev.get_a())
                && !(cur_op == OpCode::SetTable && cur.get_a() == prev.get_a())
                && !(!Instruction::is_k(cur.get_b()) && cur.get_b() == prev.get_a()) =>
        {
            let mut merged = cur;
            merged.set_c(Instruction::rk_ask(prev.get_bx()));
            Some(merged)
        }
        // MOVE tmp r; SETTABLE a b tmp  =>  SETTABLE a b r
        (OpCode::Move, OpCode::SetTable | OpCode::SetTabUp)
            if !Instruction::is_k(cur.get_c())
                && cur.get_c() == prev.get_a()
                && fs.is_dead_temp(prev.get_a())
                && !(cur_op == OpCode::SetTable && cur.get_a() == prev.get_a())
                && !(!Instruction::is_k(cur.get_b()) && cur.get_b() == prev.get_a()) =>
        {
            let mut merged = cur;
            merged.set_c(prev.get_b());
            Some(merged)
        }
        // a load whose register the next instruction overwrites unread
        (_, op)
            if is_plain_load(prev)
                && (is_pure_producer(op) || is_plain_load(cur))
                && op != OpCode::Closure
                && cur.get_a() == prev.get_a()
                && !reads_reg(cur, prev.get_a()) =>
        {
            Some(cur)
        }
        _ => None,
    }?;
    fs.chunk.code[pc - 1] = merged;
    fs.chunk.line_info[pc - 1] = fs.line;
    Some(pc - 1)
}

/// Encodes a size hint as a "floating point byte" (`eeeeexxx`).
pub fn int2fb(mut x: u32) -> u32 {
    let mut e = 0;
    if x < 8 {
        return x;
    }
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// Inverse of [`int2fb`].
pub fn fb2int(x: u32) -> usize {
    if x < 8 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << ((x >> 3) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;

    fn state() -> FuncState {
        let mut fs = FuncState::new(SmolStr::new("=test"), CompileMode::default());
        fs.last_target = 0;
        fs
    }

    #[test]
    fn test_loadnil_merge() {
        let mut fs = state();
        emit_abc(&mut fs, OpCode::Move, 5, 6, 0);
        emit_nil(&mut fs, 0, 2);
        emit_nil(&mut fs, 2, 1);
        assert_eq!(fs.chunk.code.len(), 2);
        let i = fs.chunk.code[1];
        assert_eq!((i.opcode(), i.get_a(), i.get_b()), (Some(OpCode::LoadNil), 0, 2));
    }

    #[test]
    fn test_move_retarget_and_self_move() {
        let mut fs = state();
        fs.nactvar = 1;
        fs.freereg = 2;
        let k = fs.add_constant(LuaValue::integer(7));
        emit_loadk(&mut fs, 1, k);
        emit_abc(&mut fs, OpCode::Move, 0, 1, 0);
        emit_abc(&mut fs, OpCode::Move, 0, 0, 0);
        assert_eq!(fs.chunk.code.len(), 1);
        let i = fs.chunk.code[0];
        assert_eq!((i.opcode(), i.get_a(), i.get_bx()), (Some(OpCode::LoadK), 0, k));
    }

    #[test]
    fn test_jump_target_blocks_merge() {
        let mut fs = state();
        fs.nactvar = 1;
        emit_abx(&mut fs, OpCode::LoadK, 1, 0);
        mark_label(&mut fs);
        emit_abc(&mut fs, OpCode::Move, 0, 1, 0);
        assert_eq!(fs.chunk.code.len(), 2);
    }

    #[test]
    fn test_settable_absorbs_loadk() {
        let mut fs = state();
        fs.nactvar = 1;
        emit_abx(&mut fs, OpCode::LoadK, 2, 3);
        emit_abc(&mut fs, OpCode::SetTable, 0, Instruction::rk_ask(1), 2);
        assert_eq!(fs.chunk.code.len(), 1);
        let i = fs.chunk.code[0];
        assert_eq!(i.opcode(), Some(OpCode::SetTable));
        assert_eq!(i.get_c(), Instruction::rk_ask(3));
    }

    #[test]
    fn test_overwritten_load_dropped() {
        let mut fs = state();
        emit_abc(&mut fs, OpCode::LoadBool, 0, 1, 0);
        emit_abx(&mut fs, OpCode::LoadK, 0, 0);
        assert_eq!(fs.chunk.code.len(), 1);
        // the next instruction reads the register: both stay
        emit_abc(&mut fs, OpCode::Unm, 0, 0, 0);
        assert_eq!(fs.chunk.code.len(), 2);
    }

    #[test]
    fn test_no_peephole_mode() {
        let mut fs = FuncState::new(SmolStr::new("=test"), CompileMode::NO_PEEPHOLE);
        emit_nil(&mut fs, 0, 1);
        emit_nil(&mut fs, 1, 1);
        assert_eq!(fs.chunk.code.len(), 2);
    }

    #[test]
    fn test_jump_to_next_removed() {
        let mut fs = state();
        emit_abc(&mut fs, OpCode::Move, 1, 0, 0);
        let j = jump(&mut fs);
        patch_to_here(&mut fs, &[j]).unwrap();
        assert_eq!(fs.chunk.code.len(), 1);
        // a jump after a test must stay
        emit_abc(&mut fs, OpCode::Test, 0, 0, 0);
        let j = jump(&mut fs);
        patch_to_here(&mut fs, &[j]).unwrap();
        assert_eq!(fs.chunk.code.len(), 3);
        assert_eq!(fs.chunk.code[2].get_sbx(), 0);
    }

    #[test]
    fn test_fb_encoding() {
        for x in [0u32, 7, 8, 15, 16, 50, 100, 1000] {
            assert!(fb2int(int2fb(x)) >= x as usize);
        }
        assert_eq!(int2fb(7), 7);
        assert_eq!(fb2int(int2fb(16)), 16);
    }
}
