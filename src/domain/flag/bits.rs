//! Flag bits module.
//!
//! Local items and tracking rows store flags as a fixed-width
//! bitmask, whereas the remote side speaks in [`Flags`]. The
//! [`FlagTable`] bridges both representations.

use serde::Serialize;
use std::{fmt, ops};

use crate::{Flag, Flags};

/// Represents a flag bitmask.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct FlagBits(pub u32);

impl FlagBits {
    pub const EMPTY: Self = Self(0);
    pub const SEEN: Self = Self(1 << 0);
    pub const ANSWERED: Self = Self(1 << 1);
    pub const FLAGGED: Self = Self(1 << 2);
    pub const DELETED: Self = Self(1 << 3);
    pub const DRAFT: Self = Self(1 << 4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitAnd for FlagBits {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl ops::BitOr for FlagBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for FlagBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl ops::BitXor for FlagBits {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl ops::Not for FlagBits {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for FlagBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Lookup table between protocol flags and local bits.
///
/// Protocol flags missing from the table are invisible to the
/// merge: they are neither translated into bits nor ever added or
/// removed on the remote side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlagTable {
    entries: Vec<(Flag, FlagBits)>,
}

impl Default for FlagTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (Flag::Seen, FlagBits::SEEN),
                (Flag::Answered, FlagBits::ANSWERED),
                (Flag::Flagged, FlagBits::FLAGGED),
                (Flag::Deleted, FlagBits::DELETED),
                (Flag::Draft, FlagBits::DRAFT),
            ],
        }
    }
}

impl FlagTable {
    /// Registers a custom keyword on the first free bit. The keyword
    /// is dropped if all the bits are taken.
    pub fn with_keyword<K: ToString>(mut self, keyword: K) -> Self {
        let flag = Flag::custom(keyword);
        if self.bit(&flag).is_none() {
            let used = self.mask();
            if let Some(bit) = (0..32).map(|n| FlagBits(1 << n)).find(|b| !used.contains(*b)) {
                self.entries.push((flag, bit));
            }
        }
        self
    }

    /// Returns the union of all the bits known by the table.
    pub fn mask(&self) -> FlagBits {
        self.entries
            .iter()
            .fold(FlagBits::EMPTY, |mask, (_, bit)| mask | *bit)
    }

    pub fn bit(&self, flag: &Flag) -> Option<FlagBits> {
        self.entries
            .iter()
            .find(|(f, _)| f == flag)
            .map(|(_, bit)| *bit)
    }

    pub fn to_bits(&self, flags: &Flags) -> FlagBits {
        flags
            .iter()
            .filter_map(|flag| self.bit(flag))
            .fold(FlagBits::EMPTY, |bits, bit| bits | bit)
    }

    pub fn to_flags(&self, bits: FlagBits) -> Flags {
        self.entries
            .iter()
            .filter(|(_, bit)| bits.contains(*bit))
            .map(|(flag, _)| flag.clone())
            .collect()
    }

    /// Returns the flags set in `merged` but missing from `remote`.
    pub fn flags_to_add(&self, remote: &Flags, merged: FlagBits) -> Flags {
        self.entries
            .iter()
            .filter(|(flag, bit)| merged.contains(*bit) && !remote.contains(flag))
            .map(|(flag, _)| flag.clone())
            .collect()
    }

    /// Returns the flags present in `remote` but cleared in `merged`.
    pub fn flags_to_remove(&self, remote: &Flags, merged: FlagBits) -> Flags {
        self.entries
            .iter()
            .filter(|(flag, bit)| !merged.contains(*bit) && remote.contains(flag))
            .map(|(flag, _)| flag.clone())
            .collect()
    }
}
