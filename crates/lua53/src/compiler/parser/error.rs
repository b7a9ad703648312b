use thiserror::Error;

use crate::compiler::parser::position::{Position, chunk_id};

/// First diagnostic reported by the scanner, the parser or the code
/// generator.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render(.pos, .message, .near))]
pub struct SyntaxError {
    pub pos: Position,
    pub message: String,
    /// Offending token, already quoted (`'x'` or `<eof>`).
    pub near: Option<String>,
}

fn render(pos: &Position, message: &str, near: &Option<String>) -> String {
    match near {
        Some(tok) => format!("{}:{}: {} near {}", chunk_id(&pos.source), pos.line, message, tok),
        None => format!("{}:{}: {}", chunk_id(&pos.source), pos.line, message),
    }
}

impl SyntaxError {
    pub fn new(pos: Position, message: impl Into<String>) -> Self {
        SyntaxError {
            pos,
            message: message.into(),
            near: None,
        }
    }

    pub fn near(pos: Position, message: impl Into<String>, near: impl Into<String>) -> Self {
        SyntaxError {
            pos,
            message: message.into(),
            near: Some(near.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let pos = Position::new("=input".into(), 3, 0);
        let err = SyntaxError::near(pos.clone(), "unexpected symbol", "'+'");
        assert_eq!(err.to_string(), "input:3: unexpected symbol near '+'");
        let err = SyntaxError::new(pos, "break outside a loop");
        assert_eq!(err.to_string(), "input:3: break outside a loop");
    }
}
