//! Collectible Mask
//!
//! Fixed-width bit vector tracking which collectibles are still on the map.
//! Bit `i` set means collectible `i` has not been claimed yet.

use std::fmt;

/// Widest mask that fits the `u64` carried by the Begin message.
pub const MAX_COLLECTIBLES: u32 = 64;

/// Bit vector over a fixed pool of collectibles.
///
/// The width is fixed at construction; bits at or above the width are
/// always zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CollectibleMask {
    bits: u64,
    width: u32,
}

impl CollectibleMask {
    /// Empty mask (nothing left to collect).
    pub const fn empty(width: u32) -> Self {
        Self { bits: 0, width }
    }

    /// Mask with every collectible present.
    pub fn full(width: u32) -> Self {
        Self { bits: Self::width_bits(width), width }
    }

    #[inline]
    fn width_bits(width: u32) -> u64 {
        if width >= MAX_COLLECTIBLES {
            u64::MAX
        } else {
            (1u64 << width) - 1
        }
    }

    /// Raw bits, as sent on the wire.
    #[inline]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Number of collectibles in the pool.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of collectibles still present.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.bits.count_ones()
    }

    /// True once every collectible has been claimed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Check whether collectible `index` is still present.
    ///
    /// Out-of-range indices are never present.
    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        index < self.width && self.bits & (1u64 << index) != 0
    }

    /// Claim collectible `index`.
    ///
    /// Returns false (and leaves the mask untouched) if the index is out of
    /// range or already claimed.
    pub fn take(&mut self, index: u32) -> bool {
        if !self.contains(index) {
            return false;
        }
        self.bits &= !(1u64 << index);
        true
    }

    /// Claim everything, returning how many collectibles were left.
    pub fn take_all(&mut self) -> u32 {
        let remaining = self.remaining();
        self.bits = 0;
        remaining
    }

    /// Restore every collectible.
    pub fn refill(&mut self) {
        *self = Self::full(self.width);
    }
}

impl fmt::Debug for CollectibleMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectibleMask({}/{}, {:#018x})", self.remaining(), self.width, self.bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_mask() {
        let mask = CollectibleMask::full(50);
        assert_eq!(mask.remaining(), 50);
        assert_eq!(mask.bits(), (1u64 << 50) - 1);
        assert!(mask.contains(0));
        assert!(mask.contains(49));
        assert!(!mask.contains(50));
    }

    #[test]
    fn test_full_width_mask() {
        let mask = CollectibleMask::full(MAX_COLLECTIBLES);
        assert_eq!(mask.bits(), u64::MAX);
        assert_eq!(mask.remaining(), 64);
        assert!(!mask.contains(64));
    }

    #[test]
    fn test_take() {
        let mut mask = CollectibleMask::full(8);
        assert!(mask.take(3));
        assert!(!mask.contains(3));
        assert_eq!(mask.remaining(), 7);

        // Second claim of the same bit is refused
        assert!(!mask.take(3));
        assert_eq!(mask.remaining(), 7);
    }

    #[test]
    fn test_take_out_of_range() {
        let mut mask = CollectibleMask::full(8);
        assert!(!mask.take(8));
        assert!(!mask.take(200));
        assert_eq!(mask.remaining(), 8);
    }

    #[test]
    fn test_take_all() {
        let mut mask = CollectibleMask::full(10);
        mask.take(0);
        mask.take(9);
        assert_eq!(mask.take_all(), 8);
        assert!(mask.is_empty());
        assert_eq!(mask.take_all(), 0);
    }

    #[test]
    fn test_refill() {
        let mut mask = CollectibleMask::empty(12);
        assert!(mask.is_empty());
        mask.refill();
        assert_eq!(mask.remaining(), 12);
    }

    proptest! {
        #[test]
        fn remaining_never_increases(
            width in 1u32..=64,
            claims in proptest::collection::vec(0u32..80, 0..200),
        ) {
            let mut mask = CollectibleMask::full(width);
            let mut previous = mask.remaining();
            let mut taken = 0;
            for index in claims {
                if mask.take(index) {
                    taken += 1;
                }
                prop_assert!(mask.remaining() <= previous);
                previous = mask.remaining();
            }
            prop_assert_eq!(mask.remaining() + taken, width);
        }
    }
}
