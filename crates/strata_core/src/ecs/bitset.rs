//! # Bit-Vectors
//!
//! Compact per-entity flags, one bit per entity id, 64 ids per `u64` word.
//! Backs component presence, change tracking, entity liveness and query
//! membership. Tracking 1M entities costs ~122KB.
//!
//! ## Performance
//!
//! - Set / clear / test: O(1)
//! - Clear all: O(n/64)
//! - Iterate set bits: O(n/64 + ones), skipping clear words

/// A bit-vector sized to a world's capacity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitSet {
    /// 1 = set, 0 = clear. 64 ids per word.
    words: Vec<u64>,
    /// Number of addressable bits.
    len: usize,
    /// Cached number of set bits.
    ones: usize,
}

impl BitSet {
    /// Creates an all-clear bit-vector with `len` bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
            ones: 0,
        }
    }

    /// Number of addressable bits.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the vector addresses no bits.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    #[inline]
    #[must_use]
    pub const fn count_ones(&self) -> usize {
        self.ones
    }

    /// Returns `true` if no bit is set.
    #[inline]
    #[must_use]
    pub const fn none(&self) -> bool {
        self.ones == 0
    }

    /// Sets bit `index`. Returns `true` if it was previously clear.
    ///
    /// Out-of-range indices are ignored.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_clear = *word & mask == 0;
        *word |= mask;
        if was_clear {
            self.ones += 1;
        }
        was_clear
    }

    /// Clears bit `index`. Returns `true` if it was previously set.
    #[inline]
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_set = *word & mask != 0;
        *word &= !mask;
        if was_set {
            self.ones -= 1;
        }
        was_set
    }

    /// Tests bit `index`. Out-of-range indices read as clear.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.ones = 0;
    }

    /// Changes the number of addressable bits, keeping bits below the new
    /// length.
    pub fn resize(&mut self, len: usize) {
        if len < self.len {
            for index in len..self.len {
                self.remove(index);
            }
        }
        self.words.resize(len.div_ceil(64), 0);
        self.len = len;
    }

    /// Iterates over set bit indices in ascending order.
    ///
    /// Uses `trailing_zeros` to skip clear regions.
    pub fn iter(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_idx: 0,
            current_word: self.words.first().copied().unwrap_or(0),
            len: self.len,
        }
    }
}

/// Iterator over set bit indices.
pub struct Ones<'a> {
    words: &'a [u64],
    word_idx: usize,
    current_word: u64,
    len: usize,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit = self.current_word.trailing_zeros() as usize;
                let index = self.word_idx * 64 + bit;
                self.current_word &= self.current_word - 1;
                if index < self.len {
                    return Some(index);
                }
            }

            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current_word = self.words[self.word_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_contains() {
        let mut bits = BitSet::new(130);
        assert!(bits.insert(0));
        assert!(bits.insert(129));
        assert!(!bits.insert(129));
        assert!(bits.contains(0));
        assert!(bits.contains(129));
        assert!(!bits.contains(64));
        assert_eq!(bits.count_ones(), 2);

        assert!(bits.remove(0));
        assert!(!bits.remove(0));
        assert_eq!(bits.count_ones(), 1);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut bits = BitSet::new(10);
        assert!(!bits.insert(10));
        assert!(!bits.contains(10));
        assert!(bits.none());
    }

    #[test]
    fn test_iter_ascending() {
        let mut bits = BitSet::new(300);
        for i in [299, 3, 64, 65, 128] {
            bits.insert(i);
        }
        let ones: Vec<usize> = bits.iter().collect();
        assert_eq!(ones, vec![3, 64, 65, 128, 299]);
    }

    #[test]
    fn test_resize_keeps_low_bits() {
        let mut bits = BitSet::new(10);
        bits.insert(2);
        bits.insert(9);
        bits.resize(100);
        assert_eq!(bits.len(), 100);
        assert!(bits.contains(2) && bits.contains(9));
        bits.insert(99);

        bits.resize(5);
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(bits.count_ones(), 1);
    }

    #[test]
    fn test_clear() {
        let mut bits = BitSet::new(64);
        bits.insert(1);
        bits.insert(63);
        bits.clear();
        assert!(bits.none());
        assert_eq!(bits.iter().next(), None);
    }
}
