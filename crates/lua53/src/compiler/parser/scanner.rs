use smol_str::SmolStr;

use crate::compiler::parse_lua_number::{NumberResult, str_to_number};
use crate::compiler::parser::error::SyntaxError;
use crate::compiler::parser::lua_token::LuaToken;
use crate::compiler::parser::lua_token_kind::LuaTokenKind;
use crate::compiler::parser::position::Position;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanConfig {
    /// Surface comments as `TkComment` tokens instead of skipping them.
    pub scan_comments: bool,
}

/// Turns source bytes into tokens. The scanner never panics on bad input:
/// the first error is recorded, reported as one `TkIllegal` token, and the
/// scanner is at end of input from then on.
#[derive(Clone)]
pub struct Scanner<'a> {
    src: &'a [u8],
    cursor: usize,
    line: u32,
    line_start: usize,
    source: SmolStr,
    config: ScanConfig,
    error: Option<SyntaxError>,
    shebang: Option<String>,
    finished: bool,
    buffer: Vec<u8>,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a [u8], source: impl Into<SmolStr>, config: ScanConfig) -> Self {
        let mut scanner = Scanner {
            src,
            cursor: 0,
            line: 1,
            line_start: 0,
            source: source.into(),
            config,
            error: None,
            shebang: None,
            finished: false,
            buffer: Vec::new(),
        };
        scanner.skip_prelude();
        scanner
    }

    pub fn last_error(&self) -> Option<&SyntaxError> {
        self.error.as_ref()
    }

    pub fn shebang(&self) -> Option<&str> {
        self.shebang.as_deref()
    }

    pub fn source(&self) -> &SmolStr {
        &self.source
    }

    /// Line the cursor is on, i.e. the last line of the token just read.
    pub fn line(&self) -> u32 {
        self.line
    }

    fn skip_prelude(&mut self) {
        if self.src.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.cursor = 3;
        } else if self.src.starts_with(&[0xFE, 0xFF]) {
            self.cursor = 2;
        }
        self.line_start = self.cursor;
        if self.current() == Some(b'#') {
            let start = self.cursor;
            while let Some(c) = self.current() {
                if c == b'\n' {
                    break;
                }
                self.cursor += 1;
            }
            let mut text = &self.src[start..self.cursor];
            if let Some(stripped) = text.strip_suffix(b"\r") {
                text = stripped;
            }
            self.shebang = Some(String::from_utf8_lossy(text).into_owned());
        }
    }

    #[inline]
    fn current(&self) -> Option<u8> {
        self.src.get(self.cursor).copied()
    }

    #[inline]
    fn peek(&self, n: usize) -> Option<u8> {
        self.src.get(self.cursor + n).copied()
    }

    /// Position of the cursor; right after `next` this is the end of the token.
    pub fn cur_pos(&self) -> Position {
        Position::new(
            self.source.clone(),
            self.line,
            (self.cursor - self.line_start) as u32,
        )
    }

    fn newline(&mut self) {
        self.cursor += 1;
        self.line += 1;
        self.line_start = self.cursor;
    }

    fn fail(&mut self, pos: Position, message: &str, near: Option<String>) -> LuaToken {
        if self.error.is_none() {
            self.error = Some(SyntaxError {
                pos: pos.clone(),
                message: message.to_string(),
                near,
            });
        }
        self.finished = true;
        LuaToken::new(LuaTokenKind::TkIllegal, pos, Vec::new())
    }

    fn near_buffer(&self) -> Option<String> {
        Some(format!("'{}'", String::from_utf8_lossy(&self.buffer)))
    }

    pub fn next(&mut self) -> LuaToken {
        if self.finished {
            return LuaToken::new(LuaTokenKind::TkEof, self.cur_pos(), Vec::new());
        }
        loop {
            self.skip_whitespace();
            let pos = self.cur_pos();
            let Some(c) = self.current() else {
                return LuaToken::new(LuaTokenKind::TkEof, pos, Vec::new());
            };
            match c {
                b'-' if self.peek(1) == Some(b'-') => match self.scan_comment(pos) {
                    Ok(Some(tok)) => return tok,
                    Ok(None) => continue,
                    Err(tok) => return tok,
                },
                b'[' => {
                    let level = self.long_bracket_level();
                    if level >= 0 {
                        return match self.read_long_string(pos.clone(), level as usize, false) {
                            Ok(text) => LuaToken::new(LuaTokenKind::TkString, pos, text),
                            Err(tok) => tok,
                        };
                    }
                    if level == -2 {
                        return self.fail(pos, "invalid long string delimiter", Some("'['".into()));
                    }
                    self.cursor += 1;
                    return LuaToken::new(LuaTokenKind::TkLeftBracket, pos, Vec::new());
                }
                b'"' | b'\'' => return self.read_string(c, pos),
                b'0'..=b'9' => return self.read_numeral(pos),
                b'.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => {
                    return self.read_numeral(pos);
                }
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    let start = self.cursor;
                    while self
                        .current()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
                    {
                        self.cursor += 1;
                    }
                    let word = &self.src[start..self.cursor];
                    return match LuaTokenKind::keyword(word) {
                        Some(kind) => LuaToken::new(kind, pos, Vec::new()),
                        None => LuaToken::new(LuaTokenKind::TkName, pos, word.to_vec()),
                    };
                }
                _ => return self.read_symbol(c, pos),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            match c {
                b'\n' => self.newline(),
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c => self.cursor += 1,
                _ => break,
            }
        }
    }

    fn read_symbol(&mut self, c: u8, pos: Position) -> LuaToken {
        use LuaTokenKind::*;
        let next = self.peek(1);
        let (kind, len) = match c {
            b'+' => (TkPlus, 1),
            b'-' => (TkMinus, 1),
            b'*' => (TkMul, 1),
            b'/' if next == Some(b'/') => (TkIDiv, 2),
            b'/' => (TkDiv, 1),
            b'%' => (TkMod, 1),
            b'^' => (TkPow, 1),
            b'#' => (TkLen, 1),
            b'&' => (TkBitAnd, 1),
            b'|' => (TkBitOr, 1),
            b'~' if next == Some(b'=') => (TkNe, 2),
            b'~' => (TkBitXor, 1),
            b'<' if next == Some(b'<') => (TkShl, 2),
            b'<' if next == Some(b'=') => (TkLe, 2),
            b'<' => (TkLt, 1),
            b'>' if next == Some(b'>') => (TkShr, 2),
            b'>' if next == Some(b'=') => (TkGe, 2),
            b'>' => (TkGt, 1),
            b'=' if next == Some(b'=') => (TkEq, 2),
            b'=' => (TkAssign, 1),
            b'(' => (TkLeftParen, 1),
            b')' => (TkRightParen, 1),
            b'{' => (TkLeftBrace, 1),
            b'}' => (TkRightBrace, 1),
            b']' => (TkRightBracket, 1),
            b';' => (TkSemicolon, 1),
            b':' if next == Some(b':') => (TkLabel, 2),
            b':' => (TkColon, 1),
            b',' => (TkComma, 1),
            b'.' if next == Some(b'.') && self.peek(2) == Some(b'.') => (TkEllipsis, 3),
            b'.' if next == Some(b'.') => (TkConcat, 2),
            b'.' => (TkDot, 1),
            _ => {
                let near = if c.is_ascii_graphic() {
                    format!("'{}'", c as char)
                } else {
                    format!("'<\\{}>'", c)
                };
                return self.fail(pos, "unexpected symbol", Some(near));
            }
        };
        self.cursor += len;
        LuaToken::new(kind, pos, Vec::new())
    }

    /// Level of a long bracket at the cursor (`[==[` is 2), -1 when this is a
    /// plain `[`, -2 for a malformed opener such as `[=`.
    fn long_bracket_level(&self) -> i32 {
        let mut i = 1;
        while self.peek(i) == Some(b'=') {
            i += 1;
        }
        match self.peek(i) {
            Some(b'[') => (i - 1) as i32,
            _ if i == 1 => -1,
            _ => -2,
        }
    }

    /// Reads a long string or comment starting at the cursor; the opening
    /// bracket has already been measured.
    fn read_long_string(
        &mut self,
        pos: Position,
        level: usize,
        is_comment: bool,
    ) -> Result<Vec<u8>, LuaToken> {
        let open_len = level + 2;
        let raw_start = self.cursor;
        self.cursor += open_len;
        if self.current() == Some(b'\r') {
            self.cursor += 1;
            if self.current() == Some(b'\n') {
                self.cursor += 1;
            }
            self.line += 1;
            self.line_start = self.cursor;
        } else if self.current() == Some(b'\n') {
            self.newline();
            if self.current() == Some(b'\r') {
                self.cursor += 1;
                self.line_start = self.cursor;
            }
        }
        let content_start = self.cursor;
        loop {
            match self.current() {
                None => {
                    let what = if is_comment {
                        "unfinished long comment"
                    } else {
                        "unfinished long string"
                    };
                    return Err(self.fail(pos, what, Some("<eof>".into())));
                }
                Some(b']') => {
                    let mut i = 1;
                    while self.peek(i) == Some(b'=') {
                        i += 1;
                    }
                    if i - 1 == level && self.peek(i) == Some(b']') {
                        let content = self.src[content_start..self.cursor].to_vec();
                        self.cursor += i + 1;
                        if is_comment {
                            return Ok(self.src[raw_start..self.cursor].to_vec());
                        }
                        return Ok(content);
                    }
                    self.cursor += 1;
                }
                Some(b'\n') => self.newline(),
                Some(_) => self.cursor += 1,
            }
        }
    }

    fn scan_comment(&mut self, pos: Position) -> Result<Option<LuaToken>, LuaToken> {
        let start = self.cursor;
        self.cursor += 2;
        if self.current() == Some(b'[') {
            let level = self.long_bracket_level();
            if level >= 0 {
                let body = self.read_long_string(pos.clone(), level as usize, true)?;
                if !self.config.scan_comments {
                    return Ok(None);
                }
                let mut text = b"--".to_vec();
                text.extend_from_slice(&body);
                return Ok(Some(LuaToken::new(LuaTokenKind::TkComment, pos, text)));
            }
        }
        while let Some(c) = self.current() {
            if c == b'\n' {
                break;
            }
            self.cursor += 1;
        }
        if !self.config.scan_comments {
            return Ok(None);
        }
        let mut text = &self.src[start..self.cursor];
        if let Some(stripped) = text.strip_suffix(b"\r") {
            text = stripped;
        }
        Ok(Some(LuaToken::new(
            LuaTokenKind::TkComment,
            pos,
            text.to_vec(),
        )))
    }

    fn read_numeral(&mut self, pos: Position) -> LuaToken {
        let start = self.cursor;
        let mut expo = (b'e', b'E');
        if self.current() == Some(b'0') && matches!(self.peek(1), Some(b'x') | Some(b'X')) {
            expo = (b'p', b'P');
            self.cursor += 2;
        }
        loop {
            match self.current() {
                Some(c) if c == expo.0 || c == expo.1 => {
                    self.cursor += 1;
                    if matches!(self.current(), Some(b'+') | Some(b'-')) {
                        self.cursor += 1;
                    }
                }
                Some(c) if c.is_ascii_hexdigit() || c == b'.' => self.cursor += 1,
                _ => break,
            }
        }
        let text = self.src[start..self.cursor].to_vec();
        match str_to_number(&text) {
            Some(NumberResult::Int(_)) => LuaToken::new(LuaTokenKind::TkInt, pos, text),
            Some(NumberResult::Float(_)) => LuaToken::new(LuaTokenKind::TkFloat, pos, text),
            None => {
                self.buffer = text;
                let near = self.near_buffer();
                self.fail(pos, "malformed number", near)
            }
        }
    }

    fn read_string(&mut self, delim: u8, pos: Position) -> LuaToken {
        self.cursor += 1;
        self.buffer.clear();
        self.buffer.push(delim);
        let mut out = Vec::new();
        loop {
            let Some(c) = self.current() else {
                let near = Some("<eof>".to_string());
                return self.fail(pos, "unfinished string", near);
            };
            match c {
                _ if c == delim => {
                    self.cursor += 1;
                    return LuaToken::new(LuaTokenKind::TkString, pos, out);
                }
                b'\n' | b'\r' => {
                    let near = self.near_buffer();
                    return self.fail(pos, "unfinished string", near);
                }
                b'\\' => {
                    if let Err(tok) = self.read_escape(&pos, &mut out) {
                        return tok;
                    }
                }
                _ => {
                    out.push(c);
                    self.buffer.push(c);
                    self.cursor += 1;
                }
            }
        }
    }

    fn read_escape(&mut self, pos: &Position, out: &mut Vec<u8>) -> Result<(), LuaToken> {
        self.buffer.push(b'\\');
        self.cursor += 1;
        let Some(c) = self.current() else {
            // the string loop reports the missing delimiter
            return Ok(());
        };
        let simple = match c {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0c),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0b),
            b'\\' => Some(b'\\'),
            b'"' => Some(b'"'),
            b'\'' => Some(b'\''),
            _ => None,
        };
        if let Some(b) = simple {
            out.push(b);
            self.buffer.push(c);
            self.cursor += 1;
            return Ok(());
        }
        match c {
            b'\n' | b'\r' => {
                let other = if c == b'\n' { b'\r' } else { b'\n' };
                self.cursor += 1;
                if self.current() == Some(other) {
                    self.cursor += 1;
                }
                self.line += 1;
                self.line_start = self.cursor;
                out.push(b'\n');
            }
            b'x' => {
                self.buffer.push(c);
                self.cursor += 1;
                let mut value = 0u32;
                for _ in 0..2 {
                    match self.current().and_then(|h| (h as char).to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            self.buffer.push(self.src[self.cursor]);
                            self.cursor += 1;
                        }
                        None => return Err(self.escape_error(pos, "hexadecimal digit expected")),
                    }
                }
                out.push(value as u8);
            }
            b'z' => {
                self.cursor += 1;
                loop {
                    match self.current() {
                        Some(b'\n') => self.newline(),
                        Some(b' ' | b'\t' | b'\r' | 0x0b | 0x0c) => self.cursor += 1,
                        _ => break,
                    }
                }
                self.buffer.clear();
            }
            b'u' => self.read_utf8_escape(pos, out)?,
            b'0'..=b'9' => {
                let mut value = 0u32;
                let mut n = 0;
                while n < 3 {
                    match self.current() {
                        Some(d @ b'0'..=b'9') => {
                            value = value * 10 + (d - b'0') as u32;
                            self.buffer.push(d);
                            self.cursor += 1;
                            n += 1;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return Err(self.escape_error(pos, "decimal escape too large"));
                }
                out.push(value as u8);
            }
            _ => {
                self.buffer.push(c);
                return Err(self.escape_error(pos, "invalid escape sequence"));
            }
        }
        Ok(())
    }

    fn read_utf8_escape(&mut self, pos: &Position, out: &mut Vec<u8>) -> Result<(), LuaToken> {
        self.buffer.push(b'u');
        self.cursor += 1;
        if self.current() != Some(b'{') {
            return Err(self.escape_error(pos, "missing '{'"));
        }
        self.buffer.push(b'{');
        self.cursor += 1;
        let mut value: u32 = 0;
        let mut digits = 0;
        while let Some(d) = self.current().and_then(|h| (h as char).to_digit(16)) {
            self.buffer.push(self.src[self.cursor]);
            self.cursor += 1;
            digits += 1;
            value = value.saturating_mul(16).saturating_add(d);
            if value > 0x10FFFF {
                return Err(self.escape_error(pos, "UTF-8 value too large"));
            }
        }
        if digits == 0 {
            return Err(self.escape_error(pos, "hexadecimal digit expected"));
        }
        if self.current() != Some(b'}') {
            return Err(self.escape_error(pos, "missing '}'"));
        }
        self.cursor += 1;
        match char::from_u32(value) {
            Some(ch) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                Ok(())
            }
            None => Err(self.escape_error(pos, "UTF-8 value is a surrogate")),
        }
    }

    fn escape_error(&mut self, pos: &Position, message: &str) -> LuaToken {
        if let Some(c) = self.current() {
            if !self.buffer.ends_with(&[c]) && c != b'\n' {
                self.buffer.push(c);
            }
        }
        let near = self.near_buffer();
        let at = Position::new(pos.source.clone(), self.line, pos.column);
        self.fail(at, message, near)
    }
}

impl Iterator for Scanner<'_> {
    type Item = LuaToken;

    fn next(&mut self) -> Option<LuaToken> {
        let tok = Scanner::next(self);
        if tok.kind == LuaTokenKind::TkEof {
            None
        } else {
            Some(tok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LuaTokenKind::*;

    fn kinds(src: &str) -> Vec<LuaTokenKind> {
        Scanner::new(src.as_bytes(), "=test", ScanConfig::default())
            .map(|t| t.kind)
            .collect()
    }

    fn first(src: &str) -> LuaToken {
        Scanner::new(src.as_bytes(), "=test", ScanConfig::default()).next()
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            kinds("a ... .. . << <= < >> >= > // / :: : ~= ~ == ="),
            vec![
                TkName, TkEllipsis, TkConcat, TkDot, TkShl, TkLe, TkLt, TkShr, TkGe, TkGt, TkIDiv,
                TkDiv, TkLabel, TkColon, TkNe, TkBitXor, TkEq, TkAssign
            ]
        );
    }

    #[test]
    fn test_keywords_and_positions() {
        let mut s = Scanner::new(b"local x\n  return", "=t", ScanConfig::default());
        let t = s.next();
        assert_eq!(t.kind, TkLocal);
        let end = s.cur_pos();
        assert_eq!((end.line, end.column), (1, 5));
        let t = s.next();
        assert_eq!((t.kind, t.literal.as_slice()), (TkName, &b"x"[..]));
        assert_eq!((t.pos.line, t.pos.column), (1, 6));
        let t = s.next();
        assert_eq!(t.kind, TkReturn);
        assert_eq!((t.pos.line, t.pos.column), (2, 2));
        assert_eq!(s.next().kind, TkEof);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(first("3").kind, TkInt);
        assert_eq!(first("3.0").kind, TkFloat);
        assert_eq!(first("0x10").kind, TkInt);
        assert_eq!(first("0x1p4").kind, TkFloat);
        assert_eq!(first("1e10").kind, TkFloat);
        assert_eq!(first(".5").kind, TkFloat);
        assert_eq!(first("9223372036854775808").kind, TkFloat);
        let mut s = Scanner::new(b"3e+", "=t", ScanConfig::default());
        assert_eq!(s.next().kind, TkIllegal);
        assert_eq!(s.next().kind, TkEof);
        assert_eq!(
            s.last_error().map(|e| e.to_string()),
            Some("t:1: malformed number near '3e+'".to_string())
        );
    }

    #[test]
    fn test_numeral_followed_by_letters() {
        // a numeral stops at the first char that cannot continue it
        assert_eq!(kinds("3x"), vec![TkInt, TkName]);
        assert_eq!(kinds("1or 2"), vec![TkInt, TkOr, TkInt]);
        assert_eq!(kinds("0xffg"), vec![TkInt, TkName]);
        assert_eq!(kinds("1.5then"), vec![TkFloat, TkThen]);
    }

    #[test]
    fn test_strings() {
        assert_eq!(first(r#""a\tb\65\x41\u{48}\z   c""#).literal, b"a\tbAAHc".to_vec());
        assert_eq!(first("'it\\'s'").literal, b"it's".to_vec());
        assert_eq!(first("[[\nline1\nline2]]").literal, b"line1\nline2".to_vec());
        assert_eq!(first("[==[a]]b]==]").literal, b"a]]b".to_vec());
        assert_eq!(first("'\\u{7FF}'").literal, "\u{7FF}".as_bytes().to_vec());
        assert_eq!(first("\"a\nb\"").kind, TkIllegal);
        assert_eq!(first("'\\300'").kind, TkIllegal);
        assert_eq!(first("'\\u{D800}'").kind, TkIllegal);
        assert_eq!(first("'\\u{110000}'").kind, TkIllegal);
        assert_eq!(first("'\\q'").kind, TkIllegal);
    }

    #[test]
    fn test_comments() {
        assert_eq!(kinds("-- hi\nx --[[ long\ncomment ]] y"), vec![TkName, TkName]);
        let config = ScanConfig {
            scan_comments: true,
        };
        let toks: Vec<LuaToken> = Scanner::new(b"-- hi\r\nx --[==[ a ]==]", "=t", config).collect();
        assert_eq!(toks[0].kind, TkComment);
        assert_eq!(toks[0].literal, b"-- hi".to_vec());
        assert_eq!(toks[1].kind, TkName);
        assert_eq!(toks[2].literal, b"--[==[ a ]==]".to_vec());
    }

    #[test]
    fn test_shebang_and_bom() {
        let src = b"\xEF\xBB\xBF#!/usr/bin/lua\nreturn";
        let mut s = Scanner::new(src, "=t", ScanConfig::default());
        assert_eq!(s.shebang(), Some("#!/usr/bin/lua"));
        let t = s.next();
        assert_eq!((t.kind, t.pos.line), (TkReturn, 2));
    }

    #[test]
    fn test_illegal_then_eof() {
        let mut s = Scanner::new(b"x = $", "=t", ScanConfig::default());
        assert_eq!(s.next().kind, TkName);
        assert_eq!(s.next().kind, TkAssign);
        assert_eq!(s.next().kind, TkIllegal);
        assert_eq!(s.next().kind, TkEof);
        assert_eq!(s.next().kind, TkEof);
    }
}
