use std::io;
use std::mem::size_of;

use memmap2::{MmapMut, MmapOptions};

use crate::page::DirtyWord;

/// One dirty word per heap page, indexed by page number. Each word holds a
/// generation set for every card of its page; see [`DirtyWord`].
pub struct CardTable {
    mem_map: MmapMut,
    pages: usize,
}

impl CardTable {
    pub fn new(pages: usize) -> io::Result<Self> {
        let mem_map = MmapOptions::new()
            .len(pages.max(1) * size_of::<u32>())
            .map_anon()?;
        Ok(Self { mem_map, pages })
    }

    pub fn len(&self) -> usize {
        self.pages
    }

    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }

    /// Base of the dirty vector, for write barriers emitted into generated code.
    pub fn as_mut_ptr(&mut self) -> *mut u32 {
        self.mem_map.as_mut_ptr().cast()
    }

    fn words(&self) -> &[u32] {
        unsafe { std::slice::from_raw_parts(self.mem_map.as_ptr().cast(), self.pages) }
    }

    fn words_mut(&mut self) -> &mut [u32] {
        unsafe { std::slice::from_raw_parts_mut(self.mem_map.as_mut_ptr().cast(), self.pages) }
    }

    #[inline]
    pub fn get(&self, page: usize) -> DirtyWord {
        DirtyWord(self.words()[page])
    }

    #[inline]
    pub fn set(&mut self, page: usize, dirty: DirtyWord) {
        self.words_mut()[page] = dirty.0;
    }

    /// Adds `code` to the generation set of one card.
    #[inline]
    pub fn mark_card(&mut self, page: usize, card: usize, code: u32) {
        let word = &mut self.words_mut()[page];
        *word = DirtyWord(*word).or_card(card, code).0;
    }

    pub fn clear(&mut self, first: usize, count: usize) {
        self.words_mut()[first..first + count].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cards_accumulate_codes() {
        let mut table = CardTable::new(4).unwrap();
        assert!(table.get(2).is_clean());
        table.mark_card(2, 1, 0x2);
        table.mark_card(2, 1, 0x4);
        assert_eq!(table.get(2).card(1), 0x6);
        table.set(3, DirtyWord::ALL);
        table.clear(2, 2);
        assert!(table.get(2).is_clean());
        assert!(table.get(3).is_clean());
    }
}
