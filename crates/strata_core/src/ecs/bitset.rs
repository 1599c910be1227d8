// =============================================================================
// BITSET - Fixed 256-bit set used for component signatures
// =============================================================================
// Every registered component type owns one bit in this set. Archetype
// signatures, query access masks and exclusion masks are all BitSet256
// values, so matching and collision checks reduce to a handful of word
// operations regardless of how many component types exist.
// =============================================================================

//! Fixed-width 256-bit sets backing component signatures and query masks.

/// Number of bits in a [`BitSet256`], and therefore the hard cap on
/// registered component types per world.
pub const BIT_CAPACITY: usize = 256;

const WORDS: usize = BIT_CAPACITY / 64;

/// A fixed 256-bit set stored as four `u64` words.
///
/// Copyable and cheap to compare. Bit indices are component bits handed
/// out at registration time, so two sets from the same world are always
/// directly comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BitSet256 {
    words: [u64; WORDS],
}

impl BitSet256 {
    /// The empty set.
    pub const EMPTY: Self = Self { words: [0; WORDS] };

    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Creates a set with a single bit raised.
    #[must_use]
    pub const fn single(bit: u8) -> Self {
        let mut words = [0u64; WORDS];
        words[bit as usize / 64] = 1u64 << (bit as usize % 64);
        Self { words }
    }

    /// Raises `bit`.
    #[inline]
    pub fn set(&mut self, bit: u8) {
        self.words[bit as usize / 64] |= 1u64 << (bit as usize % 64);
    }

    /// Clears `bit`.
    #[inline]
    pub fn clear(&mut self, bit: u8) {
        self.words[bit as usize / 64] &= !(1u64 << (bit as usize % 64));
    }

    /// Returns whether `bit` is raised.
    #[inline]
    #[must_use]
    pub fn get(&self, bit: u8) -> bool {
        self.words[bit as usize / 64] & (1u64 << (bit as usize % 64)) != 0
    }

    /// Returns whether no bits are raised.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of raised bits.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns whether any bit is raised in both `self` and `other`.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns whether every bit raised in `other` is also raised in `self`.
    #[inline]
    #[must_use]
    pub fn contains_all(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// Bitwise OR of `self` and `other`.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut words = self.words;
        for (w, o) in words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        Self { words }
    }

    /// Bitwise AND of `self` and `other`.
    #[inline]
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut words = self.words;
        for (w, o) in words.iter_mut().zip(other.words.iter()) {
            *w &= o;
        }
        Self { words }
    }

    /// Iterates over raised bit indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, word)| {
            let mut w = *word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros();
                w &= w - 1;
                Some((word_idx * 64) as u8 + bit as u8)
            })
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_round_trip() {
        let mut set = BitSet256::new();
        assert!(set.is_empty());

        set.set(0);
        set.set(63);
        set.set(64);
        set.set(255);
        assert!(set.get(0));
        assert!(set.get(63));
        assert!(set.get(64));
        assert!(set.get(255));
        assert!(!set.get(1));
        assert_eq!(set.count(), 4);

        set.clear(64);
        assert!(!set.get(64));
        assert_eq!(set.count(), 3);
    }

    #[test]
    fn contains_all_is_superset() {
        let mut big = BitSet256::new();
        big.set(3);
        big.set(70);
        big.set(200);

        let mut small = BitSet256::new();
        small.set(3);
        small.set(200);

        assert!(big.contains_all(&small));
        assert!(!small.contains_all(&big));
        // Every set contains the empty set.
        assert!(small.contains_all(&BitSet256::EMPTY));
    }

    #[test]
    fn intersects_detects_overlap_across_words() {
        let a = BitSet256::single(10);
        let b = BitSet256::single(10);
        let c = BitSet256::single(130);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&BitSet256::EMPTY));
    }

    #[test]
    fn iter_yields_ascending_bits() {
        let mut set = BitSet256::new();
        for bit in [5u8, 64, 65, 128, 255] {
            set.set(bit);
        }
        let collected: Vec<u8> = set.iter().collect();
        assert_eq!(collected, vec![5, 64, 65, 128, 255]);
    }

    #[test]
    fn union_and_intersection() {
        let a = BitSet256::single(1).union(&BitSet256::single(100));
        let b = BitSet256::single(100).union(&BitSet256::single(200));
        let both = a.union(&b);
        assert_eq!(both.count(), 3);
        let shared = a.intersection(&b);
        assert_eq!(shared.iter().collect::<Vec<_>>(), vec![100]);
    }
}
