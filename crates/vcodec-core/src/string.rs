//! Immutable shared strings with a character width class.
//!
//! A string stores every character in the narrowest of three widths:
//! - shift 0: 1 byte per character (0..=0xff)
//! - shift 1: 2 bytes per character (0..=0xffff)
//! - shift 2: 4 bytes per character
//!
//! Constructors always normalize to the minimal width, so two strings with the
//! same characters are equal, hash alike and encode identically.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

#[derive(PartialEq, Eq, Hash)]
enum Chars {
    Narrow(Box<[u8]>),
    Wide16(Box<[u16]>),
    Wide32(Box<[u32]>),
}

/// Immutable string value. Cloning shares the character data.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PikeString(Rc<Chars>);

impl PikeString {
    /// Build from 8-bit characters.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Rc::new(Chars::Narrow(bytes.into())))
    }

    /// Build from arbitrary character codes, picking the minimal width.
    pub fn from_chars<I: IntoIterator<Item = u32>>(chars: I) -> Self {
        let chars: Vec<u32> = chars.into_iter().collect();
        let max = chars.iter().copied().max().unwrap_or(0);
        let data = if max <= 0xff {
            Chars::Narrow(chars.iter().map(|&c| c as u8).collect())
        } else if max <= 0xffff {
            Chars::Wide16(chars.iter().map(|&c| c as u16).collect())
        } else {
            Chars::Wide32(chars.into_boxed_slice())
        };
        Self(Rc::new(data))
    }

    pub fn empty() -> Self {
        Self::from_bytes(&[])
    }

    /// Number of characters.
    pub fn len(&self) -> usize {
        match &*self.0 {
            Chars::Narrow(b) => b.len(),
            Chars::Wide16(w) => w.len(),
            Chars::Wide32(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width class: 0, 1 or 2 (1, 2 or 4 bytes per character).
    pub fn size_shift(&self) -> u8 {
        match &*self.0 {
            Chars::Narrow(_) => 0,
            Chars::Wide16(_) => 1,
            Chars::Wide32(_) => 2,
        }
    }

    /// Raw bytes of an 8-bit string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &*self.0 {
            Chars::Narrow(b) => Some(b),
            _ => None,
        }
    }

    pub fn char_at(&self, idx: usize) -> Option<u32> {
        match &*self.0 {
            Chars::Narrow(b) => b.get(idx).map(|&c| c as u32),
            Chars::Wide16(w) => w.get(idx).map(|&c| c as u32),
            Chars::Wide32(w) => w.get(idx).copied(),
        }
    }

    pub fn chars(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(move |i| self.char_at(i).unwrap_or(0))
    }

    /// Characters that are not valid Unicode scalars become U+FFFD.
    pub fn to_string_lossy(&self) -> String {
        self.chars()
            .map(|c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    /// At most `max` characters, with an ellipsis when cut. Used in error messages.
    pub fn prefix(&self, max: usize) -> String {
        if self.len() <= max {
            return self.to_string_lossy();
        }
        let head: String = self
            .chars()
            .take(max)
            .map(|c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        format!("{}...", head)
    }
}

impl From<&str> for PikeString {
    fn from(s: &str) -> Self {
        Self::from_chars(s.chars().map(|c| c as u32))
    }
}

impl From<String> for PikeString {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl Default for PikeString {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialOrd for PikeString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Code point order; a proper prefix sorts first.
impl Ord for PikeString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chars().cmp(other.chars())
    }
}

impl fmt::Display for PikeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

impl fmt::Debug for PikeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_width() {
        assert_eq!(PikeString::from("abc").size_shift(), 0);
        assert_eq!(PikeString::from("caf\u{e9}").size_shift(), 0);
        assert_eq!(PikeString::from("\u{20ac}5").size_shift(), 1);
        assert_eq!(PikeString::from("\u{1f600}").size_shift(), 2);
        assert_eq!(PikeString::from_chars([0x41, 0x1_0000_0]).size_shift(), 2);
    }

    #[test]
    fn test_width_normalization_makes_equal() {
        let narrow = PikeString::from_bytes(b"hi");
        let widened = PikeString::from_chars([b'h' as u32, b'i' as u32]);
        assert_eq!(narrow, widened);
        assert_eq!(widened.size_shift(), 0);
    }

    #[test]
    fn test_ordering() {
        let a = PikeString::from("a");
        let ab = PikeString::from("ab");
        let b = PikeString::from("b");
        let wide = PikeString::from("\u{100}");
        assert!(a < ab);
        assert!(ab < b);
        assert!(b < wide);
    }

    #[test]
    fn test_prefix() {
        let s = PikeString::from("abcdefgh");
        assert_eq!(s.prefix(3), "abc...");
        assert_eq!(s.prefix(8), "abcdefgh");
    }
}
