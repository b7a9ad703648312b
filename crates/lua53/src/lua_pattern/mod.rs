// Lua pattern matching
// Patterns are compiled to a small instruction list and run by a bounded
// backtracking matcher. Everything is byte oriented.

mod class;
mod compiler;
mod matcher;

use std::rc::Rc;

use thiserror::Error;

pub use class::{ByteSet, CharClass, ClassKind, SetItem};
pub use compiler::{Inst, Program};

pub(crate) use matcher::find_bytes;
use matcher::Matcher;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("malformed pattern (ends with '%')")]
    EndsWithPercent,
    #[error("malformed pattern (missing ']')")]
    MissingBracket,
    #[error("malformed pattern (missing arguments to '%b')")]
    MissingBalanceArgs,
    #[error("missing '[' after '%f' in pattern")]
    MissingFrontierSet,
    #[error("invalid capture index %{0}")]
    InvalidCaptureIndex(usize),
    #[error("invalid pattern capture")]
    InvalidPatternCapture,
    #[error("unfinished capture")]
    UnfinishedCapture,
    #[error("too many captures")]
    TooManyCaptures,
    #[error("pattern too complex")]
    TooComplex,
    #[error("invalid use of '%' in replacement string")]
    InvalidReplacement,
}

/// One capture of a match. Offsets are 0-based byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Substring(usize, usize),
    /// `()`
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures {
    pub start: usize,
    pub end: usize,
    pub groups: Vec<Capture>,
}

impl Captures {
    fn whole(start: usize, end: usize) -> Self {
        Captures {
            start,
            end,
            groups: Vec::new(),
        }
    }

    /// The values a match produces: its captures, or the whole match when
    /// the pattern has none.
    pub fn values(&self) -> Vec<Capture> {
        if self.groups.is_empty() {
            vec![Capture::Substring(self.start, self.end)]
        } else {
            self.groups.clone()
        }
    }

    /// Capture `i` (0-based) as seen by `%1`.. in replacements; with no
    /// captures `%1` is the whole match.
    pub fn get(&self, i: usize) -> Result<Capture, PatternError> {
        match self.groups.get(i) {
            Some(c) => Ok(*c),
            None if i == 0 && self.groups.is_empty() => Ok(Capture::Substring(self.start, self.end)),
            None => Err(PatternError::InvalidCaptureIndex(i + 1)),
        }
    }
}

impl Program {
    /// First match at or after byte offset `init`.
    pub fn find(&self, text: &[u8], init: usize) -> Result<Option<Captures>, PatternError> {
        Matcher::new(self, text).find(init)
    }

    /// Match starting exactly at `start`.
    pub fn match_at(&self, text: &[u8], start: usize) -> Result<Option<Captures>, PatternError> {
        Matcher::new(self, text).match_at(start)
    }
}

/// Compiles `pat` and finds its first match in `s` at or after `init`.
pub fn find(s: &[u8], pat: &[u8], init: usize) -> Result<Option<Captures>, PatternError> {
    Program::compile(pat)?.find(s, init)
}

/// Successive matches for `gmatch`. An empty match right where the
/// previous match ended is skipped.
pub struct MatchAll<T> {
    prog: Rc<Program>,
    text: T,
    pos: usize,
    last_match: Option<usize>,
}

pub fn match_all<T: AsRef<[u8]>>(prog: Rc<Program>, text: T) -> MatchAll<T> {
    MatchAll {
        prog,
        text,
        pos: 0,
        last_match: None,
    }
}

impl<T: AsRef<[u8]>> Iterator for MatchAll<T> {
    type Item = Result<Captures, PatternError>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.text.as_ref();
        while self.pos <= text.len() {
            match self.prog.match_at(text, self.pos) {
                Err(e) => {
                    self.pos = text.len() + 1;
                    return Some(Err(e));
                }
                Ok(Some(caps)) if Some(caps.end) != self.last_match => {
                    self.pos = caps.end;
                    self.last_match = Some(caps.end);
                    return Some(Ok(caps));
                }
                Ok(_) => self.pos += 1,
            }
        }
        None
    }
}

/// Expands a `gsub` replacement string: `%0` is the whole match, `%1`..`%9`
/// the captures and `%%` a percent sign.
pub fn expand_replacement(repl: &[u8], text: &[u8], caps: &Captures, out: &mut Vec<u8>) -> Result<(), PatternError> {
    let mut i = 0;
    while i < repl.len() {
        let c = repl[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        let Some(&d) = repl.get(i) else {
            return Err(PatternError::InvalidReplacement);
        };
        i += 1;
        match d {
            b'%' => out.push(b'%'),
            b'0' => out.extend_from_slice(&text[caps.start..caps.end]),
            b'1'..=b'9' => match caps.get((d - b'1') as usize)? {
                Capture::Substring(s, e) => out.extend_from_slice(&text[s..e]),
                Capture::Position(p) => out.extend_from_slice(itoa::Buffer::new().format(p + 1).as_bytes()),
            },
            _ => return Err(PatternError::InvalidReplacement),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub<'a>(text: &'a [u8], c: Capture) -> &'a [u8] {
        match c {
            Capture::Substring(s, e) => &text[s..e],
            Capture::Position(_) => b"",
        }
    }

    #[test]
    fn test_find_with_classes() {
        let text = b"  key = 42";
        let caps = find(text, b"(%a+)%s*=%s*(%d+)", 0).unwrap().unwrap();
        assert_eq!((caps.start, caps.end), (2, 10));
        assert_eq!(sub(text, caps.groups[0]), b"key");
        assert_eq!(sub(text, caps.groups[1]), b"42");
    }

    #[test]
    fn test_anchors() {
        assert!(find(b"hello", b"^ell", 0).unwrap().is_none());
        assert!(find(b"hello", b"^hel", 0).unwrap().is_some());
        assert!(find(b"hello", b"ll$", 0).unwrap().is_none());
        let caps = find(b"hello", b"lo$", 0).unwrap().unwrap();
        assert_eq!(caps.start, 3);
        // `$` not at the end is literal
        assert!(find(b"a$b", b"a$b", 0).unwrap().is_some());
    }

    #[test]
    fn test_lazy_and_greedy() {
        let text = b"<a><b>";
        let caps = find(text, b"<(.-)>", 0).unwrap().unwrap();
        assert_eq!(sub(text, caps.groups[0]), b"a");
        let caps = find(text, b"<(.*)>", 0).unwrap().unwrap();
        assert_eq!(sub(text, caps.groups[0]), b"a><b");
        let caps = find(b"color colour", b"colou?r", 1).unwrap().unwrap();
        assert_eq!((caps.start, caps.end), (6, 12));
    }

    #[test]
    fn test_balance_and_frontier() {
        let text = b"f(a(b)c) d";
        let caps = find(text, b"%b()", 0).unwrap().unwrap();
        assert_eq!(&text[caps.start..caps.end], b"(a(b)c)");
        assert!(find(b"((", b"%b()", 0).unwrap().is_none());

        let text = b"THE (quick) fox";
        let caps = find(text, b"%f[%a]%a+", 4).unwrap().unwrap();
        assert_eq!(&text[caps.start..caps.end], b"quick");
    }

    #[test]
    fn test_backref_and_position() {
        let text = b"say \"hi\" or 'yo'";
        let caps = find(text, b"([\"'])(.-)%1", 0).unwrap().unwrap();
        assert_eq!(sub(text, caps.groups[1]), b"hi");
        let caps = find(b"abc", b"()b()", 0).unwrap().unwrap();
        assert_eq!(caps.groups, vec![Capture::Position(1), Capture::Position(2)]);
    }

    #[test]
    fn test_match_all_skips_empty_after_match() {
        let prog = Rc::new(Program::compile_unanchored(b"%a*").unwrap());
        let text = b"ab cd";
        let words: Vec<&[u8]> = match_all(prog, &text[..])
            .map(|c| c.unwrap())
            .map(|c| &text[c.start..c.end])
            .collect();
        assert_eq!(words, vec![&b"ab"[..], b"cd"]);
    }

    #[test]
    fn test_expand_replacement() {
        let text = b"hello world";
        let caps = find(text, b"(o)%s(w)", 0).unwrap().unwrap();
        let mut out = Vec::new();
        expand_replacement(b"[%2%1|%0|%%]", text, &caps, &mut out).unwrap();
        assert_eq!(out, b"[wo|o w|%]");
        let mut out = Vec::new();
        assert_eq!(
            expand_replacement(b"%3", text, &caps, &mut out).unwrap_err(),
            PatternError::InvalidCaptureIndex(3)
        );
        assert_eq!(
            expand_replacement(b"%x", text, &caps, &mut out).unwrap_err(),
            PatternError::InvalidReplacement
        );
    }

    #[test]
    fn test_unfinished_capture() {
        assert_eq!(find(b"abc", b"(a", 0).unwrap_err(), PatternError::UnfinishedCapture);
    }
}
