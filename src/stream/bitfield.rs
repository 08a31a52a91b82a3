//! Per-piece completion bitfield

use std::ops::Range;

/// One bit per piece, set once the piece is downloaded and verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    words: Vec<u64>,
    len: u32,
    count: u32,
}

impl Bitfield {
    pub fn new(len: u32) -> Self {
        Self {
            words: vec![0; (len as usize).div_ceil(64)],
            len,
            count: 0,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn get(&self, index: u32) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, bit) = Self::position(index);
        self.words[word] & (1 << bit) != 0
    }

    /// Set a bit; returns false if it was already set or out of range
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.len || self.get(index) {
            return false;
        }
        let (word, bit) = Self::position(index);
        self.words[word] |= 1 << bit;
        self.count += 1;
        true
    }

    /// True if every index in the range is set (an empty range is never complete)
    pub fn all_set(&self, range: Range<u32>) -> bool {
        !range.is_empty() && range.end <= self.len && range.into_iter().all(|i| self.get(i))
    }

    fn position(index: u32) -> (usize, u32) {
        ((index / 64) as usize, index % 64)
    }
}
