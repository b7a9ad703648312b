use crate::compiler::parser::lua_token_kind::LuaTokenKind;
use crate::compiler::parser::position::Position;

/// A scanned token. `literal` holds the name for `TkName`, the decoded
/// bytes for `TkString`, the source spelling for numbers and the raw text
/// for comments; it is empty for keywords and glyphs.
#[derive(Debug, Clone, PartialEq)]
pub struct LuaToken {
    pub kind: LuaTokenKind,
    pub pos: Position,
    pub literal: Vec<u8>,
}

impl LuaToken {
    pub fn new(kind: LuaTokenKind, pos: Position, literal: Vec<u8>) -> Self {
        LuaToken { kind, pos, literal }
    }

    pub fn literal_str(&self) -> String {
        String::from_utf8_lossy(&self.literal).into_owned()
    }

    /// Token text as quoted in `near '...'` diagnostics.
    pub fn near_text(&self) -> String {
        match self.kind {
            LuaTokenKind::TkEof => "<eof>".to_string(),
            LuaTokenKind::TkName | LuaTokenKind::TkInt | LuaTokenKind::TkFloat => {
                format!("'{}'", self.literal_str())
            }
            LuaTokenKind::TkString => format!("'{}'", self.literal_str()),
            _ => format!("'{}'", self.kind.to_user_string()),
        }
    }
}
