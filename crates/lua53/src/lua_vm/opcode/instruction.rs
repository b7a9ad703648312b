/*----------------------------------------------------------------------
  Lua 5.3 instruction layout (lopcodes.h)

  All instructions are unsigned 32-bit integers with the opcode in the
  first 6 bits.

        3 3 2 2 2 2 2 2 2 2 2 2 1 1 1 1 1 1 1 1 1 1 0 0 0 0 0 0 0 0 0 0
        1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0
  iABC        B(9)      |      C(9)       |     A(8)      |   Op(6)   |
  iABx               Bx(18)               |     A(8)      |   Op(6)   |
  iAsBx             sBx(18)               |     A(8)      |   Op(6)   |
  iAx                       Ax(26)                        |   Op(6)   |

  sBx is stored in excess-K notation with K = MAXARG_sBx.
----------------------------------------------------------------------*/

use crate::lua_vm::lua_limits::BITRK;
use crate::lua_vm::opcode::OpCode;

/// One encoded Lua 5.3 instruction.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(u32);

impl Instruction {
    #[inline(always)]
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    // Size of each field
    pub const SIZE_OP: u32 = 6;
    pub const SIZE_A: u32 = 8;
    pub const SIZE_B: u32 = 9;
    pub const SIZE_C: u32 = 9;
    pub const SIZE_BX: u32 = Self::SIZE_C + Self::SIZE_B; // 18
    pub const SIZE_AX: u32 = Self::SIZE_BX + Self::SIZE_A; // 26

    // Position of each field
    pub const POS_OP: u32 = 0;
    pub const POS_A: u32 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_C: u32 = Self::POS_A + Self::SIZE_A;
    pub const POS_B: u32 = Self::POS_C + Self::SIZE_C;
    pub const POS_BX: u32 = Self::POS_C;
    pub const POS_AX: u32 = Self::POS_A;

    // Maximum values
    pub const MAX_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAX_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAX_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAX_BX: u32 = (1 << Self::SIZE_BX) - 1;
    pub const MAX_SBX: i32 = (Self::MAX_BX >> 1) as i32; // 131071
    pub const MAX_AX: u32 = (1 << Self::SIZE_AX) - 1;

    #[inline(always)]
    const fn mask1(n: u32, p: u32) -> u32 {
        (!((!0u32) << n)) << p
    }

    #[inline(always)]
    fn get_arg(self, pos: u32, size: u32) -> u32 {
        (self.0 >> pos) & Self::mask1(size, 0)
    }

    #[inline(always)]
    fn set_arg(&mut self, value: u32, pos: u32, size: u32) {
        self.0 = (self.0 & !Self::mask1(size, pos)) | ((value << pos) & Self::mask1(size, pos));
    }

    /// Decoded opcode, `None` for an out of range opcode number (only
    /// possible for undumped code that was not validated).
    #[inline(always)]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.get_arg(Self::POS_OP, Self::SIZE_OP) as u8)
    }

    #[inline(always)]
    pub fn raw_opcode(self) -> u8 {
        self.get_arg(Self::POS_OP, Self::SIZE_OP) as u8
    }

    #[inline(always)]
    pub fn set_opcode(&mut self, op: OpCode) {
        self.set_arg(op as u32, Self::POS_OP, Self::SIZE_OP);
    }

    #[inline(always)]
    pub fn get_a(self) -> u32 {
        self.get_arg(Self::POS_A, Self::SIZE_A)
    }

    #[inline(always)]
    pub fn set_a(&mut self, v: u32) {
        self.set_arg(v, Self::POS_A, Self::SIZE_A);
    }

    #[inline(always)]
    pub fn get_b(self) -> u32 {
        self.get_arg(Self::POS_B, Self::SIZE_B)
    }

    #[inline(always)]
    pub fn set_b(&mut self, v: u32) {
        self.set_arg(v, Self::POS_B, Self::SIZE_B);
    }

    #[inline(always)]
    pub fn get_c(self) -> u32 {
        self.get_arg(Self::POS_C, Self::SIZE_C)
    }

    #[inline(always)]
    pub fn set_c(&mut self, v: u32) {
        self.set_arg(v, Self::POS_C, Self::SIZE_C);
    }

    #[inline(always)]
    pub fn get_bx(self) -> u32 {
        self.get_arg(Self::POS_BX, Self::SIZE_BX)
    }

    #[inline(always)]
    pub fn set_bx(&mut self, v: u32) {
        self.set_arg(v, Self::POS_BX, Self::SIZE_BX);
    }

    #[inline(always)]
    pub fn get_sbx(self) -> i32 {
        self.get_bx() as i32 - Self::MAX_SBX
    }

    #[inline(always)]
    pub fn set_sbx(&mut self, v: i32) {
        self.set_bx((v + Self::MAX_SBX) as u32);
    }

    #[inline(always)]
    pub fn get_ax(self) -> u32 {
        self.get_arg(Self::POS_AX, Self::SIZE_AX)
    }

    pub fn create_abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        Self(
            (op as u32) << Self::POS_OP
                | (a & Self::MAX_A) << Self::POS_A
                | (b & Self::MAX_B) << Self::POS_B
                | (c & Self::MAX_C) << Self::POS_C,
        )
    }

    pub fn create_abx(op: OpCode, a: u32, bx: u32) -> Self {
        Self((op as u32) << Self::POS_OP | (a & Self::MAX_A) << Self::POS_A | (bx & Self::MAX_BX) << Self::POS_BX)
    }

    pub fn create_asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::create_abx(op, a, (sbx + Self::MAX_SBX) as u32)
    }

    pub fn create_ax(op: OpCode, ax: u32) -> Self {
        Self((op as u32) << Self::POS_OP | (ax & Self::MAX_AX) << Self::POS_AX)
    }

    /// Test whether an R/K operand denotes a constant.
    #[inline(always)]
    pub fn is_k(x: u32) -> bool {
        x & BITRK != 0
    }

    /// Constant index of an R/K operand.
    #[inline(always)]
    pub fn rk_index(x: u32) -> u32 {
        x & !BITRK
    }

    /// Encode a constant index as an R/K operand.
    #[inline(always)]
    pub fn rk_ask(k: u32) -> u32 {
        k | BITRK
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::lua_vm::opcode::OpMode;
        let Some(op) = self.opcode() else {
            return write!(f, "<bad opcode {}>", self.raw_opcode());
        };
        match op.get_mode() {
            OpMode::IABC => write!(f, "{:<9} {} {} {}", op.name(), self.get_a(), self.get_b(), self.get_c()),
            OpMode::IABx => write!(f, "{:<9} {} {}", op.name(), self.get_a(), self.get_bx()),
            OpMode::IAsBx => write!(f, "{:<9} {} {}", op.name(), self.get_a(), self.get_sbx()),
            OpMode::IAx => write!(f, "{:<9} {}", op.name(), self.get_ax()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abc_layout() {
        let i = Instruction::create_abc(OpCode::Add, 1, 256 + 3, 7);
        assert_eq!(i.opcode(), Some(OpCode::Add));
        assert_eq!(i.get_a(), 1);
        assert_eq!(i.get_b(), 259);
        assert_eq!(i.get_c(), 7);
        assert!(Instruction::is_k(i.get_b()));
        assert_eq!(Instruction::rk_index(i.get_b()), 3);
        // B occupies the top 9 bits
        assert_eq!(i.as_u32() >> 23, 259);
    }

    #[test]
    fn test_sbx_bias() {
        let mut i = Instruction::create_asbx(OpCode::Jmp, 0, -5);
        assert_eq!(i.get_sbx(), -5);
        assert_eq!(i.get_bx(), 131066);
        i.set_sbx(Instruction::MAX_SBX);
        assert_eq!(i.get_sbx(), 131071);
        i.set_a(3);
        assert_eq!(i.get_a(), 3);
        assert_eq!(i.get_sbx(), 131071);
    }

    #[test]
    fn test_ax() {
        let i = Instruction::create_ax(OpCode::ExtraArg, 1 << 20);
        assert_eq!(i.opcode(), Some(OpCode::ExtraArg));
        assert_eq!(i.get_ax(), 1 << 20);
    }
}
