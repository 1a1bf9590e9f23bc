use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of sub-operations still owed for a work id (bit `n` = variant `n`).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpMask(u32);

impl OpMask {
    pub const EMPTY: OpMask = OpMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        OpMask(bits)
    }

    /// Mask with only bit `n` set. Bits beyond 31 are ignored.
    pub const fn bit(n: u8) -> Self {
        if n < 32 {
            OpMask(1 << n)
        } else {
            OpMask(0)
        }
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: OpMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn has(self, n: u8) -> bool {
        n < 32 && self.0 & (1 << n) != 0
    }

    /// Indices of the set bits, lowest first.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0u8..32).filter(move |n| self.has(*n))
    }
}

impl BitOr for OpMask {
    type Output = OpMask;

    fn bitor(self, rhs: OpMask) -> OpMask {
        OpMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpMask {
    fn bitor_assign(&mut self, rhs: OpMask) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<u8> for OpMask {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        iter.into_iter().fold(OpMask::EMPTY, |m, n| m | OpMask::bit(n))
    }
}

impl fmt::Debug for OpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpMask({:#b})", self.0)
    }
}

impl fmt::Display for OpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_iterate() {
        let mut m = OpMask::bit(0);
        m |= OpMask::bit(3);
        assert_eq!(m.bits(), 0b1001);
        assert!(m.has(3));
        assert!(!m.has(1));
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert!(m.contains(OpMask::bit(0)));
        assert_eq!([1u8, 2].into_iter().collect::<OpMask>(), OpMask::from_bits(0b110));
    }

    #[test]
    fn test_out_of_range_bit_is_empty() {
        assert!(OpMask::bit(40).is_empty());
        assert!(!OpMask::from_bits(u32::MAX).has(32));
    }
}
