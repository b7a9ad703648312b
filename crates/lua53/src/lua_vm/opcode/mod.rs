mod instruction;

pub use instruction::Instruction;

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How an operand of an instruction is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMode {
    /// argument is not used
    N,
    /// argument is used
    U,
    /// argument is a register or a jump offset
    R,
    /// argument is a constant or register/constant
    K,
}

/// Complete Lua 5.3 opcode set (47 opcodes), numbered as `lopcodes.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0, // R(A) := R(B)
    LoadK,    // R(A) := Kst(Bx)
    LoadKX,   // R(A) := Kst(extra arg)
    LoadBool, // R(A) := (Bool)B; if (C) pc++
    LoadNil,  // R(A), R(A+1), ..., R(A+B) := nil
    GetUpval, // R(A) := UpValue[B]

    GetTabUp, // R(A) := UpValue[B][RK(C)]
    GetTable, // R(A) := R(B)[RK(C)]

    SetTabUp, // UpValue[A][RK(B)] := RK(C)
    SetUpval, // UpValue[B] := R(A)
    SetTable, // R(A)[RK(B)] := RK(C)

    NewTable, // R(A) := {} (size = B,C)

    Self_, // R(A+1) := R(B); R(A) := R(B)[RK(C)]

    Add,  // R(A) := RK(B) + RK(C)
    Sub,  // R(A) := RK(B) - RK(C)
    Mul,  // R(A) := RK(B) * RK(C)
    Mod,  // R(A) := RK(B) % RK(C)
    Pow,  // R(A) := RK(B) ^ RK(C)
    Div,  // R(A) := RK(B) / RK(C)
    IDiv, // R(A) := RK(B) // RK(C)
    BAnd, // R(A) := RK(B) & RK(C)
    BOr,  // R(A) := RK(B) | RK(C)
    BXor, // R(A) := RK(B) ~ RK(C)
    Shl,  // R(A) := RK(B) << RK(C)
    Shr,  // R(A) := RK(B) >> RK(C)
    Unm,  // R(A) := -R(B)
    BNot, // R(A) := ~R(B)
    Not,  // R(A) := not R(B)
    Len,  // R(A) := length of R(B)

    Concat, // R(A) := R(B).. ... ..R(C)

    Jmp, // pc+=sBx; if (A) close all upvalues >= R(A - 1)
    Eq,  // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt,  // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le,  // if ((RK(B) <= RK(C)) ~= A) then pc++

    Test,    // if not (R(A) <=> C) then pc++
    TestSet, // if (R(B) <=> C) then R(A) := R(B) else pc++

    Call,     // R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
    TailCall, // return R(A)(R(A+1), ... ,R(A+B-1))
    Return,   // return R(A), ... ,R(A+B-2)

    ForLoop, // R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }
    ForPrep, // R(A)-=R(A+2); pc+=sBx

    TForCall, // R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2))
    TForLoop, // if R(A+1) ~= nil then { R(A)=R(A+1); pc += sBx }

    SetList, // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B

    Closure, // R(A) := closure(KPROTO[Bx])

    Vararg, // R(A), R(A+1), ..., R(A+B-2) = vararg

    ExtraArg, // extra (larger) argument for previous opcode
}

/// Number of opcodes.
pub const NUM_OPCODES: u8 = OpCode::ExtraArg as u8 + 1;

impl OpCode {
    /// Decode an opcode number, `None` when it is out of range.
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Option<Self> {
        use OpCode::*;
        const TABLE: [OpCode; NUM_OPCODES as usize] = [
            Move, LoadK, LoadKX, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp,
            SetUpval, SetTable, NewTable, Self_, Add, Sub, Mul, Mod, Pow, Div, IDiv, BAnd, BOr,
            BXor, Shl, Shr, Unm, BNot, Not, Len, Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call,
            TailCall, Return, ForLoop, ForPrep, TForCall, TForLoop, SetList, Closure, Vararg,
            ExtraArg,
        ];
        TABLE.get(byte as usize).copied()
    }

    /// Upper case name as printed by `luac -l`.
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            Vararg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }

    /// Get the instruction format mode for this opcode
    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | LoadKX | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep | TForLoop => OpMode::IAsBx,
            ExtraArg => OpMode::IAx,
            _ => OpMode::IABC,
        }
    }

    /// Whether the instruction writes register A (`testAMode` in `lopcodes.c`).
    pub fn sets_a(self) -> bool {
        use OpCode::*;
        !matches!(
            self,
            SetTabUp
                | SetUpval
                | SetTable
                | Jmp
                | Eq
                | Lt
                | Le
                | Test
                | TailCall
                | Return
                | SetList
                | ExtraArg
        )
    }

    /// Whether the instruction is a test whose next instruction is a jump.
    pub fn is_test(self) -> bool {
        matches!(
            self,
            OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet
        )
    }

    /// Operand modes of B and C (`getBMode` / `getCMode`).
    pub fn arg_modes(self) -> (OpArgMode, OpArgMode) {
        use OpArgMode::*;
        use OpCode::*;
        match self {
            Move => (R, N),
            LoadK => (K, N),
            LoadKX => (N, N),
            LoadBool => (U, U),
            LoadNil => (U, N),
            GetUpval => (U, N),
            GetTabUp => (U, K),
            GetTable => (R, K),
            SetTabUp => (K, K),
            SetUpval => (U, N),
            SetTable => (K, K),
            NewTable => (U, U),
            Self_ => (R, K),
            Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr | BXor | Shl | Shr => (K, K),
            Unm | BNot | Not | Len => (R, N),
            Concat => (R, R),
            Jmp => (R, N),
            Eq | Lt | Le => (K, K),
            Test => (N, U),
            TestSet => (R, U),
            Call | TailCall | Return => (U, U),
            ForLoop | ForPrep => (R, N),
            TForCall => (N, U),
            TForLoop => (R, N),
            SetList => (U, U),
            Closure => (U, N),
            Vararg => (U, N),
            ExtraArg => (U, U),
        }
    }
}
