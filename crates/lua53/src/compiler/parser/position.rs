use smol_str::SmolStr;

use crate::lua_vm::lua_limits::LUA_IDSIZE;

/// A location in a source chunk. Lines are 1-based, columns are 0-based
/// byte offsets from the start of the line. Line 0 marks an invalid
/// position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub source: SmolStr,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(source: SmolStr, line: u32, column: u32) -> Self {
        Self {
            source,
            line,
            column,
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.line > 0
    }

    /// Position `n` columns to the right on the same line.
    pub fn offset(&self, n: u32) -> Self {
        Self {
            source: self.source.clone(),
            line: self.line,
            column: self.column + n,
        }
    }

    /// Position just past `text` when it starts here; newlines in `text`
    /// advance the line.
    pub fn offset_by(&self, text: &[u8]) -> Self {
        let mut line = self.line;
        let mut column = self.column;
        for &b in text {
            if b == b'\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
        Self {
            source: self.source.clone(),
            line,
            column,
        }
    }
}

impl Position {
    /// Whether this position comes strictly before `other` in the same chunk.
    pub fn precedes(&self, other: &Position) -> bool {
        (self.line, self.column) < (other.line, other.column)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}:{}", chunk_id(&self.source), self.line, self.column)
        } else {
            write!(f, "{}", chunk_id(&self.source))
        }
    }
}

/// Printable form of a chunk name (`luaO_chunkid`): `=name` is used
/// verbatim, `@file` names a file, anything else is source text shown as
/// `[string "..."]`.
pub fn chunk_id(source: &str) -> String {
    if let Some(rest) = source.strip_prefix('=') {
        return truncate(rest, LUA_IDSIZE - 1).to_string();
    }
    if let Some(file) = source.strip_prefix('@') {
        if file.len() < LUA_IDSIZE {
            return file.to_string();
        }
        let keep = LUA_IDSIZE - 4;
        let mut start = file.len() - keep;
        while !file.is_char_boundary(start) {
            start += 1;
        }
        return format!("...{}", &file[start..]);
    }
    let first_line = source.split('\n').next().unwrap_or("");
    let limit = LUA_IDSIZE - 15;
    if first_line.len() < source.len() || first_line.len() > limit {
        format!("[string \"{}...\"]", truncate(first_line, limit))
    } else {
        format!("[string \"{}\"]", first_line)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id() {
        assert_eq!(chunk_id("@main.lua"), "main.lua");
        assert_eq!(chunk_id("=stdin"), "stdin");
        assert_eq!(chunk_id("return 1"), "[string \"return 1\"]");
        assert_eq!(chunk_id("x = 1\ny = 2"), "[string \"x = 1...\"]");
    }

    #[test]
    fn test_offsets() {
        let p = Position::new("=t".into(), 3, 4);
        assert_eq!(p.offset(2).column, 6);
        let q = p.offset_by(b"ab\ncd");
        assert_eq!((q.line, q.column), (4, 2));
        assert!(!Position::invalid().is_valid());
        assert!(p.precedes(&q));
    }
}
