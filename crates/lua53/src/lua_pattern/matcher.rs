// Backtracking matcher
// Alternatives from `Split` and capture updates share one stack, so
// backtracking restores captures as it unwinds. Every instruction executed
// counts against a step budget.

use crate::lua_pattern::compiler::{Inst, Program};
use crate::lua_pattern::{Capture, Captures, PatternError};
use crate::lua_vm::lua_limits::MAX_MATCH_STEPS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Unset,
    Open(usize),
    Closed(usize, usize),
    Position(usize),
}

enum Backtrack {
    Retry { pc: usize, pos: usize },
    Restore { slot: usize, old: Slot },
}

pub(crate) struct Matcher<'a> {
    prog: &'a Program,
    text: &'a [u8],
    slots: Vec<Slot>,
    stack: Vec<Backtrack>,
    steps: usize,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(prog: &'a Program, text: &'a [u8]) -> Self {
        Matcher {
            prog,
            text,
            slots: vec![Slot::Unset; prog.ncaptures],
            stack: Vec::new(),
            steps: 0,
        }
    }

    /// Match starting exactly at `start`.
    pub(crate) fn match_at(&mut self, start: usize) -> Result<Option<Captures>, PatternError> {
        let prog = self.prog;
        if let Some(lit) = &prog.literal {
            return Ok(self.text[start..]
                .starts_with(lit)
                .then(|| Captures::whole(start, start + lit.len())));
        }
        match self.run(start)? {
            Some(end) => self.captures(start, end).map(Some),
            None => Ok(None),
        }
    }

    /// First match at or after `init`.
    pub(crate) fn find(&mut self, init: usize) -> Result<Option<Captures>, PatternError> {
        let text = self.text;
        if init > text.len() {
            return Ok(None);
        }
        let prog = self.prog;
        if let Some(lit) = &prog.literal {
            return Ok(find_bytes(&text[init..], lit).map(|at| Captures::whole(init + at, init + at + lit.len())));
        }
        if prog.anchored {
            return self.match_at(init);
        }
        let prefix = &prog.prefix;
        let mut start = init;
        while start <= text.len() {
            if !prefix.is_empty() {
                match find_bytes(&text[start..], prefix) {
                    Some(at) => start += at,
                    None => return Ok(None),
                }
            }
            if let Some(end) = self.run(start)? {
                return self.captures(start, end).map(Some);
            }
            start += 1;
        }
        Ok(None)
    }

    fn captures(&self, start: usize, end: usize) -> Result<Captures, PatternError> {
        let groups = self
            .slots
            .iter()
            .map(|slot| match *slot {
                Slot::Closed(s, e) => Ok(Capture::Substring(s, e)),
                Slot::Position(p) => Ok(Capture::Position(p)),
                Slot::Open(_) | Slot::Unset => Err(PatternError::UnfinishedCapture),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Captures { start, end, groups })
    }

    /// Runs the program at `start`; the end of the match on success.
    fn run(&mut self, start: usize) -> Result<Option<usize>, PatternError> {
        let prog = self.prog;
        let code = &prog.code[..];
        let text = self.text;
        self.stack.clear();
        self.slots.fill(Slot::Unset);
        let mut pc = 0;
        let mut pos = start;
        let mut depth = 0usize;
        loop {
            self.steps += 1;
            if self.steps > MAX_MATCH_STEPS {
                return Err(PatternError::TooComplex);
            }
            let ok = match &code[pc] {
                Inst::Char(c) => step_if(text.get(pos) == Some(c), &mut pc, &mut pos),
                Inst::Any => step_if(pos < text.len(), &mut pc, &mut pos),
                Inst::Class(cl) => step_if(text.get(pos).is_some_and(|b| cl.matches(*b)), &mut pc, &mut pos),
                Inst::Set(set) => step_if(text.get(pos).is_some_and(|b| set.contains(*b)), &mut pc, &mut pos),
                Inst::Match => {
                    if !prog.anchored_end || pos == text.len() {
                        return Ok(Some(pos));
                    }
                    false
                }
                Inst::Split(first, second) => {
                    self.stack.push(Backtrack::Retry { pc: *second, pos });
                    pc = *first;
                    true
                }
                Inst::Jmp(target) => {
                    pc = *target;
                    true
                }
                Inst::Jsave(n) => {
                    self.set_slot(*n, Slot::Open(pos));
                    pc += 1;
                    true
                }
                Inst::Esave(n) => match self.slots[*n] {
                    Slot::Open(s) => {
                        self.set_slot(*n, Slot::Closed(s, pos));
                        pc += 1;
                        true
                    }
                    _ => false,
                },
                Inst::Capture(n) => {
                    self.set_slot(*n, Slot::Position(pos));
                    pc += 1;
                    true
                }
                Inst::BackRef(n) => match self.slots[*n] {
                    Slot::Closed(s, e) if text[pos..].starts_with(&text[s..e]) => {
                        pos += e - s;
                        pc += 1;
                        true
                    }
                    _ => false,
                },
                Inst::BalanceUp(open) => {
                    depth = 1;
                    step_if(text.get(pos) == Some(open), &mut pc, &mut pos)
                }
                Inst::BalanceDown(open, close) => match text.get(pos) {
                    None => false,
                    Some(c) if c == close => {
                        pos += 1;
                        depth -= 1;
                        if depth == 0 {
                            pc += 2;
                        }
                        true
                    }
                    Some(c) if c == open => {
                        pos += 1;
                        depth += 1;
                        true
                    }
                    Some(_) => {
                        pc += 1;
                        true
                    }
                },
                Inst::BalanceAny => {
                    pos += 1;
                    pc -= 1;
                    true
                }
                Inst::Frontier(set) => {
                    let prev = if pos == 0 { 0 } else { text[pos - 1] };
                    let cur = text.get(pos).copied().unwrap_or(0);
                    if !set.contains(prev) && set.contains(cur) {
                        pc += 1;
                        true
                    } else {
                        false
                    }
                }
            };
            if !ok && !self.backtrack(&mut pc, &mut pos) {
                return Ok(None);
            }
        }
    }

    fn set_slot(&mut self, n: usize, slot: Slot) {
        self.stack.push(Backtrack::Restore {
            slot: n,
            old: self.slots[n],
        });
        self.slots[n] = slot;
    }

    /// Resumes the latest alternative; false when none is left.
    fn backtrack(&mut self, pc: &mut usize, pos: &mut usize) -> bool {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Backtrack::Restore { slot, old } => self.slots[slot] = old,
                Backtrack::Retry { pc: p, pos: q } => {
                    *pc = p;
                    *pos = q;
                    return true;
                }
            }
        }
        false
    }
}

#[inline(always)]
fn step_if(cond: bool, pc: &mut usize, pos: &mut usize) -> bool {
    if cond {
        *pc += 1;
        *pos += 1;
    }
    cond
}

/// Offset of the first occurrence of `needle` in `hay`.
pub(crate) fn find_bytes(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > hay.len() {
        return None;
    }
    let first = needle[0];
    let last_start = hay.len() - needle.len();
    let mut i = 0;
    while i <= last_start {
        match hay[i..=last_start].iter().position(|&b| b == first) {
            Some(off) => i += off,
            None => return None,
        }
        if hay[i..].starts_with(needle) {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bytes() {
        assert_eq!(find_bytes(b"hello world", b"o w"), Some(4));
        assert_eq!(find_bytes(b"aaa", b""), Some(0));
        assert_eq!(find_bytes(b"ab", b"abc"), None);
        assert_eq!(find_bytes(b"abab", b"bab"), Some(1));
    }

    #[test]
    fn test_backtracking_restores_captures() {
        let prog = Program::compile(b"(a*)ab").unwrap();
        let mut m = Matcher::new(&prog, b"aaab");
        let caps = m.find(0).unwrap().unwrap();
        assert_eq!((caps.start, caps.end), (0, 4));
        assert_eq!(caps.groups, vec![Capture::Substring(0, 2)]);
    }

    #[test]
    fn test_step_budget() {
        let pat = format!("{}b", "a*".repeat(30));
        let prog = Program::compile(pat.as_bytes()).unwrap();
        let text = vec![b'a'; 60];
        let mut m = Matcher::new(&prog, &text);
        assert_eq!(m.find(0).unwrap_err(), PatternError::TooComplex);
    }
}
