// Pattern compiler
// Lowers a Lua pattern to a list of instructions for the backtracking
// matcher. Repetitions only apply to single-character items, so every loop
// body consumes input.

use crate::lua_pattern::PatternError;
use crate::lua_pattern::class::{ByteSet, CharClass, ClassKind, SetItem};
use crate::lua_vm::lua_limits::LUA_MAXCAPTURES;

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Char(u8),
    Any,
    Class(CharClass),
    Set(Box<ByteSet>),
    Match,
    /// Try the first target, backtrack to the second.
    Split(usize, usize),
    Jmp(usize),
    /// Open capture n at the current position.
    Jsave(usize),
    /// Close capture n.
    Esave(usize),
    /// `%bxy`: requires `x` and starts the nesting count.
    BalanceUp(u8),
    /// Loop head of `%bxy`: counts `x` and `y`, leaves when the count
    /// drops to zero, defers other bytes to `BalanceAny`.
    BalanceDown(u8, u8),
    /// Skips one byte and returns to `BalanceDown`.
    BalanceAny,
    /// `()`: captures the current position.
    Capture(usize),
    /// `%1`..`%9`
    BackRef(usize),
    Frontier(Box<ByteSet>),
}

#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) code: Vec<Inst>,
    pub(crate) ncaptures: usize,
    /// Leading `^`
    pub(crate) anchored: bool,
    /// Trailing `$`
    pub(crate) anchored_end: bool,
    /// Bytes every match starts with
    pub(crate) prefix: Vec<u8>,
    /// Set when the pattern has no special characters at all
    pub(crate) literal: Option<Vec<u8>>,
}

const SPECIALS: &[u8] = b"^$*+?.([%-";

impl Program {
    /// Compiles `pat`; a leading `^` anchors the match.
    pub fn compile(pat: &[u8]) -> Result<Program, PatternError> {
        PatternCompiler::new(pat, true).compile()
    }

    /// Compiles `pat` for `gmatch`, where `^` is an ordinary character.
    pub fn compile_unanchored(pat: &[u8]) -> Result<Program, PatternError> {
        PatternCompiler::new(pat, false).compile()
    }

    pub fn captures(&self) -> usize {
        self.ncaptures
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }
}

struct PatternCompiler<'a> {
    pat: &'a [u8],
    pos: usize,
    code: Vec<Inst>,
    ncaptures: usize,
    open: Vec<usize>,
    closed: Vec<bool>,
    allow_anchor: bool,
}

impl<'a> PatternCompiler<'a> {
    fn new(pat: &'a [u8], allow_anchor: bool) -> Self {
        PatternCompiler {
            pat,
            pos: 0,
            code: Vec::with_capacity(pat.len() + 1),
            ncaptures: 0,
            open: Vec::new(),
            closed: Vec::new(),
            allow_anchor,
        }
    }

    fn compile(mut self) -> Result<Program, PatternError> {
        let pat = self.pat;
        if !pat.iter().any(|c| SPECIALS.contains(c) || *c == b')') {
            return Ok(Program {
                code: pat.iter().map(|&c| Inst::Char(c)).chain(std::iter::once(Inst::Match)).collect(),
                ncaptures: 0,
                anchored: false,
                anchored_end: false,
                prefix: pat.to_vec(),
                literal: Some(pat.to_vec()),
            });
        }
        let anchored = self.allow_anchor && pat.first() == Some(&b'^');
        if anchored {
            self.pos = 1;
        }
        let mut anchored_end = false;
        while self.pos < pat.len() {
            let c = pat[self.pos];
            match c {
                b'(' => self.open_capture()?,
                b')' => {
                    let Some(n) = self.open.pop() else {
                        return Err(PatternError::InvalidPatternCapture);
                    };
                    self.closed[n] = true;
                    self.code.push(Inst::Esave(n));
                    self.pos += 1;
                }
                b'$' if self.pos + 1 == pat.len() => {
                    anchored_end = true;
                    self.pos += 1;
                }
                b'%' => match pat.get(self.pos + 1) {
                    None => return Err(PatternError::EndsWithPercent),
                    Some(b'b') => self.balance()?,
                    Some(b'f') => {
                        self.pos += 2;
                        if pat.get(self.pos) != Some(&b'[') {
                            return Err(PatternError::MissingFrontierSet);
                        }
                        let set = self.set()?;
                        self.code.push(Inst::Frontier(Box::new(set)));
                    }
                    Some(d) if d.is_ascii_digit() => {
                        let l = (d - b'0') as usize;
                        if l == 0 || l > self.ncaptures || !self.closed[l - 1] {
                            return Err(PatternError::InvalidCaptureIndex(l));
                        }
                        self.code.push(Inst::BackRef(l - 1));
                        self.pos += 2;
                    }
                    Some(_) => self.repetition()?,
                },
                _ => self.repetition()?,
            }
        }
        self.code.push(Inst::Match);
        let prefix = self
            .code
            .iter()
            .map_while(|inst| match inst {
                Inst::Char(c) => Some(*c),
                _ => None,
            })
            .collect();
        Ok(Program {
            code: self.code,
            ncaptures: self.ncaptures,
            anchored,
            anchored_end,
            prefix,
            literal: None,
        })
    }

    fn open_capture(&mut self) -> Result<(), PatternError> {
        if self.ncaptures >= LUA_MAXCAPTURES {
            return Err(PatternError::TooManyCaptures);
        }
        let n = self.ncaptures;
        self.ncaptures += 1;
        if self.pat.get(self.pos + 1) == Some(&b')') {
            self.closed.push(true);
            self.code.push(Inst::Capture(n));
            self.pos += 2;
        } else {
            self.closed.push(false);
            self.open.push(n);
            self.code.push(Inst::Jsave(n));
            self.pos += 1;
        }
        Ok(())
    }

    fn balance(&mut self) -> Result<(), PatternError> {
        let (Some(&open), Some(&close)) = (self.pat.get(self.pos + 2), self.pat.get(self.pos + 3)) else {
            return Err(PatternError::MissingBalanceArgs);
        };
        self.code.push(Inst::BalanceUp(open));
        self.code.push(Inst::BalanceDown(open, close));
        self.code.push(Inst::BalanceAny);
        self.pos += 4;
        Ok(())
    }

    /// A single-character item and its optional `* + - ?` suffix.
    fn repetition(&mut self) -> Result<(), PatternError> {
        let single = self.single()?;
        let start = self.code.len();
        match self.pat.get(self.pos) {
            Some(b'*') => {
                self.pos += 1;
                self.code.push(Inst::Split(start + 1, start + 3));
                self.code.push(single);
                self.code.push(Inst::Jmp(start));
            }
            Some(b'-') => {
                self.pos += 1;
                self.code.push(Inst::Split(start + 3, start + 1));
                self.code.push(single);
                self.code.push(Inst::Jmp(start));
            }
            Some(b'+') => {
                self.pos += 1;
                self.code.push(single.clone());
                let loop_start = start + 1;
                self.code.push(Inst::Split(loop_start + 1, loop_start + 3));
                self.code.push(single);
                self.code.push(Inst::Jmp(loop_start));
            }
            Some(b'?') => {
                self.pos += 1;
                self.code.push(Inst::Split(start + 1, start + 2));
                self.code.push(single);
            }
            _ => self.code.push(single),
        }
        Ok(())
    }

    fn single(&mut self) -> Result<Inst, PatternError> {
        let c = self.pat[self.pos];
        match c {
            b'.' => {
                self.pos += 1;
                Ok(Inst::Any)
            }
            b'[' => Ok(Inst::Set(Box::new(self.set()?))),
            b'%' => {
                let Some(&d) = self.pat.get(self.pos + 1) else {
                    return Err(PatternError::EndsWithPercent);
                };
                self.pos += 2;
                Ok(match ClassKind::from_letter(d) {
                    Some(kind) => Inst::Class(CharClass {
                        kind,
                        negated: d.is_ascii_uppercase(),
                    }),
                    None => Inst::Char(d),
                })
            }
            _ => {
                self.pos += 1;
                Ok(Inst::Char(c))
            }
        }
    }

    /// `[...]` starting at the current `[`.
    fn set(&mut self) -> Result<ByteSet, PatternError> {
        let pat = self.pat;
        let mut j = self.pos + 1;
        let negated = pat.get(j) == Some(&b'^');
        if negated {
            j += 1;
        }
        let mut items = Vec::new();
        let mut first = true;
        loop {
            let Some(&c) = pat.get(j) else {
                return Err(PatternError::MissingBracket);
            };
            if c == b']' && !first {
                break;
            }
            first = false;
            if c == b'%' {
                let Some(&d) = pat.get(j + 1) else {
                    return Err(PatternError::MissingBracket);
                };
                items.push(match ClassKind::from_letter(d) {
                    Some(kind) => SetItem::Class(CharClass {
                        kind,
                        negated: d.is_ascii_uppercase(),
                    }),
                    None => SetItem::Byte(d),
                });
                j += 2;
            } else if pat.get(j + 1) == Some(&b'-') && pat.get(j + 2).is_some_and(|&h| h != b']') {
                items.push(SetItem::Range(c, pat[j + 2]));
                j += 3;
            } else {
                items.push(SetItem::Byte(c));
                j += 1;
            }
        }
        self.pos = j + 1;
        Ok(ByteSet::new(&items, negated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let p = Program::compile(b"hello").unwrap();
        assert_eq!(p.literal.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_star_layout() {
        let p = Program::compile(b"a*b").unwrap();
        assert_eq!(
            p.code,
            vec![
                Inst::Split(1, 3),
                Inst::Char(b'a'),
                Inst::Jmp(0),
                Inst::Char(b'b'),
                Inst::Match
            ]
        );
        let p = Program::compile(b"a-").unwrap();
        assert_eq!(p.code[0], Inst::Split(3, 1));
    }

    #[test]
    fn test_prefix_and_anchors() {
        let p = Program::compile(b"^ab+c$").unwrap();
        assert!(p.anchored);
        assert!(p.anchored_end);
        assert_eq!(p.prefix, b"ab");
        let p = Program::compile_unanchored(b"^a.").unwrap();
        assert!(!p.anchored);
        assert_eq!(p.prefix, b"^a");
    }

    #[test]
    fn test_malformed() {
        assert_eq!(Program::compile(b"abc%").unwrap_err(), PatternError::EndsWithPercent);
        assert_eq!(Program::compile(b"[a-").unwrap_err(), PatternError::MissingBracket);
        assert_eq!(Program::compile(b"%bx").unwrap_err(), PatternError::MissingBalanceArgs);
        assert_eq!(Program::compile(b"%fx").unwrap_err(), PatternError::MissingFrontierSet);
        assert_eq!(Program::compile(b"(a)%2").unwrap_err(), PatternError::InvalidCaptureIndex(2));
        assert_eq!(Program::compile(b"(a%1)").unwrap_err(), PatternError::InvalidCaptureIndex(1));
        assert_eq!(Program::compile(b"a)").unwrap_err(), PatternError::InvalidPatternCapture);
        let many = "()".repeat(33);
        assert_eq!(Program::compile(many.as_bytes()).unwrap_err(), PatternError::TooManyCaptures);
    }
}
