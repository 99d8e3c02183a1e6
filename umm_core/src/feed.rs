// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

use crate::error::Error;

/// Bit width of the feed-identifier alphabet: a subscription names exactly
/// one bit, but configuration entries and SSR rows are addressed by an
/// arbitrary bitset so that one sender can carry several feeds.
pub const N_FEEDS: u32 = 32;

/// A bitset over the fixed feed alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FeedSet(u32);

impl FeedSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(u32::MAX)
    }

    /// The feed naming bit `bit` alone (0-indexed, must be `< N_FEEDS`).
    pub fn single(bit: u32) -> Self {
        debug_assert!(bit < N_FEEDS);
        Self(1 << bit)
    }

    pub const fn from_raw(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if `self` names exactly one feed bit, as a subscription must.
    pub fn is_single_bit(self) -> bool {
        self.0 != 0 && (self.0 & (self.0 - 1)) == 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn intersects(self, other: Self) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn contains(self, other: Self) -> bool {
        self.intersection(other) == other
    }

    /// Iterates over the set bit positions in ascending order.
    pub fn bits(self) -> impl Iterator<Item = u32> {
        let raw = self.0;
        (0..N_FEEDS).filter(move |b| raw & (1 << b) != 0)
    }

    /// Parses a well-known LDM feedtype name, or a single decimal bit index,
    /// into a `FeedSet`. Unknown names fail `INVAL`.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        if let Some(set) = named::lookup(name) {
            return Ok(set);
        }
        if let Ok(bit) = name.parse::<u32>() {
            if bit < N_FEEDS {
                return Ok(Self::single(bit));
            }
        }
        Err(Error::inval(format!("unknown feed name '{name}'")))
    }
}

impl fmt::Display for FeedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let names: Vec<&str> = self
            .bits()
            .map(|b| named::name_of(Self::single(b)).unwrap_or("?"))
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// The historical LDM feedtype alphabet, carried here purely as named bit
/// positions: the core never interprets what a feed name means, only
/// which bit it occupies.
pub mod named {
    use super::FeedSet;

    macro_rules! feeds {
        ($($name:ident = $bit:expr),* $(,)?) => {
            $(pub const $name: FeedSet = FeedSet::from_raw(1 << $bit);)*

            pub fn lookup(name: &str) -> Option<FeedSet> {
                match name {
                    $(stringify!($name) => Some($name),)*
                    _ => None,
                }
            }

            pub fn name_of(set: FeedSet) -> Option<&'static str> {
                $(if set.raw() == $name.raw() { return Some(stringify!($name)); })*
                None
            }
        };
    }

    feeds! {
        IDS = 0,
        DDPLUS = 1,
        HDS = 2,
        HRS = 3,
        NEXRAD2 = 4,
        NEXRAD3 = 5,
        NGRID = 6,
        NLDN = 7,
        FSL2 = 8,
        NPORT = 9,
        NOTHER = 10,
        PPS = 11,
        EXP = 12,
        GEM = 13,
        NIMAGE = 14,
        UNIWISC = 15,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bit_is_detected() {
        assert!(FeedSet::single(3).is_single_bit());
        assert!(!FeedSet::single(3).union(FeedSet::single(4)).is_single_bit());
        assert!(!FeedSet::empty().is_single_bit());
    }

    #[test]
    fn union_and_intersection() {
        let a = FeedSet::single(0).union(FeedSet::single(1));
        let b = FeedSet::single(1).union(FeedSet::single(2));
        assert!(a.intersects(b));
        assert_eq!(a.intersection(b), FeedSet::single(1));
        assert!(!a.contains(b));
        assert!(a.contains(FeedSet::single(0)));
    }

    #[test]
    fn named_lookup_roundtrips() {
        let set = FeedSet::from_name("IDS").unwrap();
        assert_eq!(set, named::IDS);

        let from_bit = FeedSet::from_name("11").unwrap();
        assert_eq!(from_bit, named::PPS);

        assert!(FeedSet::from_name("NOT_A_FEED").is_err());
    }

    #[test]
    fn bits_iterates_ascending() {
        let set = named::IDS.union(named::PPS).union(named::HDS);
        assert_eq!(set.bits().collect::<Vec<_>>(), vec![0, 2, 11]);
    }
}
