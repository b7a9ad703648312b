use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LuaTokenKind {
    TkIllegal,
    TkEof,
    TkComment,

    // KeyWord
    TkAnd,
    TkBreak,
    TkDo,
    TkElse,
    TkElseIf,
    TkEnd,
    TkFalse,
    TkFor,
    TkFunction,
    TkGoto,
    TkIf,
    TkIn,
    TkLocal,
    TkNil,
    TkNot,
    TkOr,
    TkRepeat,
    TkReturn,
    TkThen,
    TkTrue,
    TkUntil,
    TkWhile,

    TkPlus,     // +
    TkMinus,    // -
    TkMul,      // *
    TkDiv,      // /
    TkIDiv,     // //
    TkDot,      // .
    TkConcat,   // ..
    TkEllipsis, // ...
    TkComma,    // ,
    TkAssign,   // =
    TkEq,       // ==
    TkGe,       // >=
    TkLe,       // <=
    TkNe,       // ~=
    TkShl,      // <<
    TkShr,      // >>
    TkLt,       // <
    TkGt,       // >
    TkMod,      // %
    TkPow,      // ^
    TkLen,      // #
    TkBitAnd,   // &
    TkBitOr,    // |
    TkBitXor,   // ~
    TkColon,    // :
    TkLabel,    // ::
    TkSemicolon, // ;

    TkLeftBracket,  // [
    TkRightBracket, // ]
    TkLeftParen,    // (
    TkRightParen,   // )
    TkLeftBrace,    // {
    TkRightBrace,   // }

    TkInt,    // integer literal
    TkFloat,  // float literal
    TkName,   // identifier
    TkString, // string literal
}

impl fmt::Display for LuaTokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_user_string())
    }
}

impl LuaTokenKind {
    /// Fixed display string of the kind (like Lua's luaX_token2str)
    pub fn to_user_string(&self) -> &'static str {
        match self {
            LuaTokenKind::TkIllegal => "<illegal>",
            LuaTokenKind::TkEof => "<eof>",
            LuaTokenKind::TkComment => "<comment>",
            // Keywords
            LuaTokenKind::TkAnd => "and",
            LuaTokenKind::TkBreak => "break",
            LuaTokenKind::TkDo => "do",
            LuaTokenKind::TkElse => "else",
            LuaTokenKind::TkElseIf => "elseif",
            LuaTokenKind::TkEnd => "end",
            LuaTokenKind::TkFalse => "false",
            LuaTokenKind::TkFor => "for",
            LuaTokenKind::TkFunction => "function",
            LuaTokenKind::TkGoto => "goto",
            LuaTokenKind::TkIf => "if",
            LuaTokenKind::TkIn => "in",
            LuaTokenKind::TkLocal => "local",
            LuaTokenKind::TkNil => "nil",
            LuaTokenKind::TkNot => "not",
            LuaTokenKind::TkOr => "or",
            LuaTokenKind::TkRepeat => "repeat",
            LuaTokenKind::TkReturn => "return",
            LuaTokenKind::TkThen => "then",
            LuaTokenKind::TkTrue => "true",
            LuaTokenKind::TkUntil => "until",
            LuaTokenKind::TkWhile => "while",
            // Symbols
            LuaTokenKind::TkPlus => "+",
            LuaTokenKind::TkMinus => "-",
            LuaTokenKind::TkMul => "*",
            LuaTokenKind::TkDiv => "/",
            LuaTokenKind::TkIDiv => "//",
            LuaTokenKind::TkDot => ".",
            LuaTokenKind::TkConcat => "..",
            LuaTokenKind::TkEllipsis => "...",
            LuaTokenKind::TkComma => ",",
            LuaTokenKind::TkAssign => "=",
            LuaTokenKind::TkEq => "==",
            LuaTokenKind::TkGe => ">=",
            LuaTokenKind::TkLe => "<=",
            LuaTokenKind::TkNe => "~=",
            LuaTokenKind::TkShl => "<<",
            LuaTokenKind::TkShr => ">>",
            LuaTokenKind::TkLt => "<",
            LuaTokenKind::TkGt => ">",
            LuaTokenKind::TkMod => "%",
            LuaTokenKind::TkPow => "^",
            LuaTokenKind::TkLen => "#",
            LuaTokenKind::TkBitAnd => "&",
            LuaTokenKind::TkBitOr => "|",
            LuaTokenKind::TkBitXor => "~",
            LuaTokenKind::TkColon => ":",
            LuaTokenKind::TkLabel => "::",
            LuaTokenKind::TkSemicolon => ";",
            LuaTokenKind::TkLeftBracket => "[",
            LuaTokenKind::TkRightBracket => "]",
            LuaTokenKind::TkLeftParen => "(",
            LuaTokenKind::TkRightParen => ")",
            LuaTokenKind::TkLeftBrace => "{",
            LuaTokenKind::TkRightBrace => "}",
            // Literals
            LuaTokenKind::TkInt => "<integer>",
            LuaTokenKind::TkFloat => "<number>",
            LuaTokenKind::TkName => "<name>",
            LuaTokenKind::TkString => "<string>",
        }
    }

    /// Keyword lookup by exact spelling.
    pub fn keyword(word: &[u8]) -> Option<LuaTokenKind> {
        let kind = match word {
            b"and" => LuaTokenKind::TkAnd,
            b"break" => LuaTokenKind::TkBreak,
            b"do" => LuaTokenKind::TkDo,
            b"else" => LuaTokenKind::TkElse,
            b"elseif" => LuaTokenKind::TkElseIf,
            b"end" => LuaTokenKind::TkEnd,
            b"false" => LuaTokenKind::TkFalse,
            b"for" => LuaTokenKind::TkFor,
            b"function" => LuaTokenKind::TkFunction,
            b"goto" => LuaTokenKind::TkGoto,
            b"if" => LuaTokenKind::TkIf,
            b"in" => LuaTokenKind::TkIn,
            b"local" => LuaTokenKind::TkLocal,
            b"nil" => LuaTokenKind::TkNil,
            b"not" => LuaTokenKind::TkNot,
            b"or" => LuaTokenKind::TkOr,
            b"repeat" => LuaTokenKind::TkRepeat,
            b"return" => LuaTokenKind::TkReturn,
            b"then" => LuaTokenKind::TkThen,
            b"true" => LuaTokenKind::TkTrue,
            b"until" => LuaTokenKind::TkUntil,
            b"while" => LuaTokenKind::TkWhile,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_keyword(self) -> bool {
        (self as u8) >= (LuaTokenKind::TkAnd as u8) && (self as u8) <= (LuaTokenKind::TkWhile as u8)
    }

    /// Whether the token can close a block.
    pub fn is_block_follow(self, with_until: bool) -> bool {
        match self {
            LuaTokenKind::TkElse
            | LuaTokenKind::TkElseIf
            | LuaTokenKind::TkEnd
            | LuaTokenKind::TkEof => true,
            LuaTokenKind::TkUntil => with_until,
            _ => false,
        }
    }
}
