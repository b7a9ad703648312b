use thiserror::Error;

use crate::compiler::parser::SyntaxError;
use crate::lua_value::LuaValue;
use crate::lua_value::chunk_serializer::LoadError;
use crate::lua_value::lua_convert::to_lua_string;

/// Category of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Load,
    /// attempt to X a Y value
    Type,
    Arith,
    Bitwise,
    Concat,
    Compare,
    Length,
    Index,
    Call,
    /// Integer division or modulo by zero.
    DivZero,
    /// nil or NaN used as a table key.
    KeyError,
    /// Metamethod chain, call depth or native nesting exceeded.
    Depth,
    /// yield/resume misuse.
    Coroutine,
    /// Raised by `error` or by a native function.
    User,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Load => "load",
            ErrorKind::Type => "type",
            ErrorKind::Arith => "arith",
            ErrorKind::Bitwise => "bitwise",
            ErrorKind::Concat => "concat",
            ErrorKind::Compare => "compare",
            ErrorKind::Length => "length",
            ErrorKind::Index => "index",
            ErrorKind::Call => "call",
            ErrorKind::DivZero => "divzero",
            ErrorKind::KeyError => "keyerror",
            ErrorKind::Depth => "depth",
            ErrorKind::Coroutine => "coroutine",
            ErrorKind::User => "user",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LuaError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{}", render_runtime(.value, .traceback))]
    Runtime {
        kind: ErrorKind,
        value: LuaValue,
        traceback: Option<String>,
    },
    /// Control signal carrying the values passed to `coroutine.yield`.
    /// Never observable by scripts.
    #[error("attempt to yield from outside a coroutine")]
    Yield(Vec<LuaValue>),
    #[error("stack overflow")]
    StackOverflow,
}

fn render_runtime(value: &LuaValue, traceback: &Option<String>) -> String {
    let msg = error_message(value);
    match traceback {
        Some(tb) => format!("{}\n{}", msg, tb),
        None => msg,
    }
}

/// Text of an error value as the standalone interpreter prints it.
pub fn error_message(value: &LuaValue) -> String {
    match to_lua_string(value) {
        Some(s) => s.to_str_lossy(),
        None => format!("(error object is a {} value)", value.type_name()),
    }
}

impl LuaError {
    /// Runtime error with a plain message and no position.
    pub fn runtime(kind: ErrorKind, msg: impl Into<String>) -> Self {
        LuaError::Runtime {
            kind,
            value: LuaValue::from(msg.into()),
            traceback: None,
        }
    }

    /// Error raised with an arbitrary value, as `error(v)` does.
    pub fn with_value(kind: ErrorKind, value: LuaValue) -> Self {
        LuaError::Runtime {
            kind,
            value,
            traceback: None,
        }
    }

    /// The value a protected call hands back to Lua code.
    pub fn value(&self) -> LuaValue {
        match self {
            LuaError::Syntax(e) => LuaValue::from(e.to_string()),
            LuaError::Load(e) => LuaValue::from(e.to_string()),
            LuaError::Runtime { value, .. } => value.clone(),
            LuaError::Yield(_) => LuaValue::from("attempt to yield from outside a coroutine"),
            LuaError::StackOverflow => LuaValue::from("stack overflow"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LuaError::Syntax(_) => ErrorKind::Syntax,
            LuaError::Load(_) => ErrorKind::Load,
            LuaError::Runtime { kind, .. } => *kind,
            LuaError::Yield(_) => ErrorKind::Coroutine,
            LuaError::StackOverflow => ErrorKind::Depth,
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            LuaError::Runtime { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }

    pub fn is_yield(&self) -> bool {
        matches!(self, LuaError::Yield(_))
    }

    /// Attaches `tb` to a runtime error that has none yet.
    pub fn set_traceback(self, tb: String) -> Self {
        match self {
            LuaError::Runtime {
                kind,
                value,
                traceback: None,
            } => LuaError::Runtime {
                kind,
                value,
                traceback: Some(tb),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_display() {
        let e = LuaError::runtime(ErrorKind::User, "boom");
        assert_eq!(e.to_string(), "boom");
        assert_eq!(e.kind(), ErrorKind::User);
        let e = e.set_traceback("stack traceback:\n\t[C]: in ?".to_string());
        assert_eq!(e.to_string(), "boom\nstack traceback:\n\t[C]: in ?");
    }

    #[test]
    fn test_error_object_message() {
        let e = LuaError::with_value(ErrorKind::User, LuaValue::new_table());
        assert_eq!(e.to_string(), "(error object is a table value)");
        let e = LuaError::with_value(ErrorKind::User, LuaValue::Integer(42));
        assert_eq!(e.to_string(), "42");
    }

    #[test]
    fn test_load_error_value() {
        let e = LuaError::from(LoadError::VersionMismatch);
        assert_eq!(e.kind(), ErrorKind::Load);
        assert!(e.to_string().contains("version mismatch"));
        assert!(matches!(e.value(), LuaValue::String(_)));
    }
}
