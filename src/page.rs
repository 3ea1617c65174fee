//! Per-page descriptors and the generation bitsets kept for every card.
use std::ops::{BitAnd, BitOr};

use crate::globals::*;
use modular_bitfield::prelude::*;

#[derive(BitfieldSpecifier, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[bits = 3]
pub enum Generation {
    Nursery = 0,
    First = 1,
    Second = 2,
    Third = 3,
    Oldest = 4,
}

impl Generation {
    pub const ALL: [Generation; GENERATION_COUNT] = [
        Generation::Nursery,
        Generation::First,
        Generation::Second,
        Generation::Third,
        Generation::Oldest,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Generation that survivors of a collection of `self` are promoted into.
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1).min(GENERATION_COUNT - 1)]
    }

    /// Card code contributed by a reference into this generation. The oldest
    /// generation never needs remembering.
    #[inline]
    pub const fn card_code(self) -> u32 {
        match self {
            Generation::Oldest => 0,
            g => 1 << g as u32,
        }
    }

    /// Cards worth rescanning when collecting up to and including `self`.
    pub fn scan_mask(self) -> DirtyWord {
        match self {
            Generation::Oldest => DirtyWord::CLEAN,
            g => DirtyWord::replicate((1 << (g.index() + 1)) - 1),
        }
    }

    /// Card bits that stay meaningful on a page of generation `self`; a page
    /// never has to remember references into its own or older generations.
    pub fn cleanup_mask(self) -> DirtyWord {
        DirtyWord::replicate((1 << self.index()) - 1)
    }
}

/// Maps a running collection counter to the oldest generation it collects.
pub fn collection_id_to_gen(id: usize) -> Generation {
    if id & 255 == 255 {
        Generation::Oldest
    } else if id & 63 == 63 {
        Generation::Third
    } else if id & 15 == 15 {
        Generation::Second
    } else if id & 3 == 3 {
        Generation::First
    } else {
        Generation::Nursery
    }
}

#[derive(BitfieldSpecifier, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[bits = 3]
pub enum Family {
    /// Unmapped.
    Hole = 0,
    /// Mutator nursery. Holds objects of every kind.
    Mixed = 1,
    Pointers = 2,
    WeakPairs = 3,
    Code = 4,
    /// Raw bytes, never scanned.
    Data = 5,
}

impl Family {
    pub const fn is_scannable(self) -> bool {
        matches!(self, Family::Pointers | Family::WeakPairs | Family::Code)
    }
}

#[bitfield(bits = 16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub generation: Generation,
    pub family: Family,
    /// Written during the current collection.
    pub fresh: bool,
    pub scannable: bool,
    /// Freed when its generation is collected.
    pub dealloc: bool,
    #[skip]
    __: B7,
}

impl PageInfo {
    pub fn hole() -> Self {
        Self::new()
    }

    pub fn mixed() -> Self {
        Self::new()
            .with_family(Family::Mixed)
            .with_generation(Generation::Nursery)
    }

    pub fn typed(family: Family, generation: Generation) -> Self {
        Self::new()
            .with_family(family)
            .with_generation(generation)
            .with_scannable(family.is_scannable())
            .with_dealloc(true)
    }

    /// Destination page for survivors of a collection of `from`.
    pub fn promoted(family: Family, from: Generation) -> Self {
        Self::typed(family, from.next()).with_fresh(true)
    }

    /// Collector scratch pages. Never scanned and never freed by a sweep.
    pub fn bookkeeping() -> Self {
        Self::new()
            .with_family(Family::Data)
            .with_generation(Generation::Oldest)
    }

    pub fn is_hole(self) -> bool {
        self.family() == Family::Hole
    }
}

/// Dirty descriptor of one page: a 4-bit generation set for each of its cards.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
#[repr(transparent)]
pub struct DirtyWord(pub u32);

impl DirtyWord {
    pub const CLEAN: DirtyWord = DirtyWord(0);
    pub const ALL: DirtyWord = DirtyWord(u32::MAX);
    pub const CARD_MASK: u32 = (1 << CARD_CODE_BITS) - 1;

    pub const fn replicate(code: u32) -> Self {
        Self((code & Self::CARD_MASK).wrapping_mul(0x1111_1111))
    }

    pub const fn is_clean(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn card(self, card: usize) -> u32 {
        (self.0 >> (card * CARD_CODE_BITS)) & Self::CARD_MASK
    }

    /// Replaces the code of `card`.
    #[inline]
    pub const fn with_card(self, card: usize, code: u32) -> Self {
        let shift = card * CARD_CODE_BITS;
        Self((self.0 & !(Self::CARD_MASK << shift)) | ((code & Self::CARD_MASK) << shift))
    }

    /// Adds `code` to the code already recorded for `card`.
    #[inline]
    pub const fn or_card(self, card: usize, code: u32) -> Self {
        Self(self.0 | ((code & Self::CARD_MASK) << (card * CARD_CODE_BITS)))
    }
}

impl BitAnd for DirtyWord {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for DirtyWord {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_per_generation() {
        assert_eq!(Generation::Nursery.scan_mask(), DirtyWord(0x1111_1111));
        assert_eq!(Generation::First.scan_mask(), DirtyWord(0x3333_3333));
        assert_eq!(Generation::Second.scan_mask(), DirtyWord(0x7777_7777));
        assert_eq!(Generation::Third.scan_mask(), DirtyWord(0xFFFF_FFFF));
        assert_eq!(Generation::Oldest.scan_mask(), DirtyWord::CLEAN);

        assert_eq!(Generation::Nursery.cleanup_mask(), DirtyWord::CLEAN);
        assert_eq!(Generation::First.cleanup_mask(), DirtyWord(0x1111_1111));
        assert_eq!(Generation::Third.cleanup_mask(), DirtyWord(0x7777_7777));
        assert_eq!(Generation::Oldest.cleanup_mask(), DirtyWord(0xFFFF_FFFF));
    }

    #[test]
    fn card_codes() {
        assert_eq!(Generation::Nursery.card_code(), 1);
        assert_eq!(Generation::Third.card_code(), 8);
        assert_eq!(Generation::Oldest.card_code(), 0);
        let d = DirtyWord::CLEAN.with_card(3, 0xF).or_card(0, 2);
        assert_eq!(d, DirtyWord(0xF002));
        assert_eq!(d.card(3), 0xF);
        assert_eq!(d.with_card(3, 1).card(3), 1);
    }

    #[test]
    fn promotion_saturates() {
        assert_eq!(Generation::Nursery.next(), Generation::First);
        assert_eq!(Generation::Oldest.next(), Generation::Oldest);
        let info = PageInfo::promoted(Family::Code, Generation::Third);
        assert_eq!(info.generation(), Generation::Oldest);
        assert!(info.fresh() && info.scannable() && info.dealloc());
        assert!(!PageInfo::promoted(Family::Data, Generation::Nursery).scannable());
        assert!(PageInfo::hole().is_hole());
    }

    #[test]
    fn collection_schedule() {
        assert_eq!(collection_id_to_gen(0), Generation::Nursery);
        assert_eq!(collection_id_to_gen(3), Generation::First);
        assert_eq!(collection_id_to_gen(15), Generation::Second);
        assert_eq!(collection_id_to_gen(63), Generation::Third);
        assert_eq!(collection_id_to_gen(255), Generation::Oldest);
        assert_eq!(collection_id_to_gen(256 + 7), Generation::First);
    }
}
