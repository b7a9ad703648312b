// Character classes and sets
// Byte oriented; classification follows the C locale.

/// `%a %c %d %g %l %p %s %u %w %x %z`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Alpha,
    Control,
    Digit,
    Graph,
    Lower,
    Punct,
    Space,
    Upper,
    Alnum,
    Hex,
    Zero,
}

impl ClassKind {
    /// Class named by the letter after `%`, ignoring case.
    pub fn from_letter(c: u8) -> Option<ClassKind> {
        Some(match c.to_ascii_lowercase() {
            b'a' => ClassKind::Alpha,
            b'c' => ClassKind::Control,
            b'd' => ClassKind::Digit,
            b'g' => ClassKind::Graph,
            b'l' => ClassKind::Lower,
            b'p' => ClassKind::Punct,
            b's' => ClassKind::Space,
            b'u' => ClassKind::Upper,
            b'w' => ClassKind::Alnum,
            b'x' => ClassKind::Hex,
            b'z' => ClassKind::Zero,
            _ => return None,
        })
    }

    #[inline]
    pub fn contains(self, c: u8) -> bool {
        match self {
            ClassKind::Alpha => c.is_ascii_alphabetic(),
            ClassKind::Control => c.is_ascii_control(),
            ClassKind::Digit => c.is_ascii_digit(),
            ClassKind::Graph => c.is_ascii_graphic(),
            ClassKind::Lower => c.is_ascii_lowercase(),
            ClassKind::Punct => c.is_ascii_punctuation(),
            // isspace also accepts \v
            ClassKind::Space => matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c),
            ClassKind::Upper => c.is_ascii_uppercase(),
            ClassKind::Alnum => c.is_ascii_alphanumeric(),
            ClassKind::Hex => c.is_ascii_hexdigit(),
            ClassKind::Zero => c == 0,
        }
    }
}

/// A class, possibly complemented (`%A`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharClass {
    pub kind: ClassKind,
    pub negated: bool,
}

impl CharClass {
    #[inline]
    pub fn matches(&self, c: u8) -> bool {
        self.kind.contains(c) != self.negated
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetItem {
    Byte(u8),
    Range(u8, u8),
    Class(CharClass),
}

/// `[...]`, flattened to a 256-bit table when built.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteSet {
    bits: [u64; 4],
}

impl ByteSet {
    pub fn new(items: &[SetItem], negated: bool) -> Self {
        let mut bits = [0u64; 4];
        for c in 0..=255u8 {
            let hit = items.iter().any(|item| match item {
                SetItem::Byte(b) => *b == c,
                SetItem::Range(lo, hi) => *lo <= c && c <= *hi,
                SetItem::Class(cl) => cl.matches(c),
            });
            if hit != negated {
                bits[(c >> 6) as usize] |= 1 << (c & 63);
            }
        }
        ByteSet { bits }
    }

    #[inline]
    pub fn contains(&self, c: u8) -> bool {
        self.bits[(c >> 6) as usize] & (1 << (c & 63)) != 0
    }
}

impl std::fmt::Debug for ByteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<u8> = (0..=255u8).filter(|c| self.contains(*c)).collect();
        write!(f, "ByteSet({})", String::from_utf8_lossy(&members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_letters() {
        let space = CharClass { kind: ClassKind::from_letter(b's').unwrap(), negated: false };
        assert!(space.matches(0x0b));
        assert!(!space.matches(b'x'));
        let not_digit = CharClass { kind: ClassKind::from_letter(b'D').unwrap(), negated: true };
        assert!(not_digit.matches(b'a'));
        assert!(!not_digit.matches(b'5'));
        assert!(ClassKind::from_letter(b'q').is_none());
    }

    #[test]
    fn test_set_with_range_and_class() {
        let set = ByteSet::new(
            &[
                SetItem::Range(b'a', b'c'),
                SetItem::Byte(b'_'),
                SetItem::Class(CharClass { kind: ClassKind::Digit, negated: false }),
            ],
            false,
        );
        assert!(set.contains(b'b'));
        assert!(set.contains(b'_'));
        assert!(set.contains(b'7'));
        assert!(!set.contains(b'd'));
        let neg = ByteSet::new(&[SetItem::Byte(b'x')], true);
        assert!(!neg.contains(b'x'));
        assert!(neg.contains(b'y'));
    }
}
