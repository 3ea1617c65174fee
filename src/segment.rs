//! Page-granular bookkeeping over one address-space reservation.
//!
//! Every 4 KiB page of the reservation owns a [`PageInfo`] and a dirty word.
//! Mapping a range commits zeroed memory and tags its pages, unmapping turns
//! them back into holes.
use crate::card_table::CardTable;
use crate::error::HeapError;
use crate::globals::*;
use crate::mmap::{Mmap, Protection};
use crate::page::*;
use crate::statistics::formatted_size;
use crate::value::Value;
use crate::align_usize;

pub struct Segments {
    mem: Mmap,
    base: usize,
    pages: Vec<PageInfo>,
    cards: CardTable,
    /// Next-fit search start.
    cursor: usize,
    /// One past the highest page ever mapped.
    used: usize,
    mapped: usize,
    executable_code: bool,
}

impl Segments {
    pub fn new(reservation: usize, executable_code: bool) -> Result<Self, HeapError> {
        let size = align_usize(reservation.max(PAGE_SIZE), PAGE_SIZE);
        let mem = Mmap::new(size).map_err(|source| HeapError::Reserve { size, source })?;
        let count = size / PAGE_SIZE;
        let cards = CardTable::new(count).map_err(HeapError::CardTable)?;
        log::debug!(
            "reserved {} for the heap at {:p}",
            formatted_size(size),
            mem.start()
        );
        Ok(Self {
            base: mem.start() as usize,
            mem,
            pages: vec![PageInfo::hole(); count],
            cards,
            cursor: 0,
            used: 0,
            mapped: 0,
            executable_code,
        })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn end(&self) -> usize {
        self.mem.end() as usize
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page walks can stop here; nothing above was ever mapped.
    pub fn used_pages(&self) -> usize {
        self.used
    }

    pub fn mapped_pages(&self) -> usize {
        self.mapped
    }

    pub fn executable_code(&self) -> bool {
        self.executable_code
    }

    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }

    #[inline]
    pub fn page_index(&self, address: usize) -> Option<usize> {
        if self.contains(address) {
            Some((address - self.base) >> PAGE_SHIFT)
        } else {
            None
        }
    }

    #[inline]
    pub fn page_address(&self, index: usize) -> usize {
        self.base + (index << PAGE_SHIFT)
    }

    #[inline]
    pub fn info(&self, index: usize) -> PageInfo {
        self.pages[index]
    }

    #[inline]
    pub fn info_of(&self, address: usize) -> Option<PageInfo> {
        self.page_index(address).map(|index| self.pages[index])
    }

    pub fn set_info(&mut self, index: usize, info: PageInfo) {
        self.pages[index] = info;
    }

    /// Retags a page and replaces its dirty word in one step.
    pub fn reclassify(&mut self, index: usize, info: PageInfo, dirty: DirtyWord) {
        self.pages[index] = info;
        self.cards.set(index, dirty);
    }

    #[inline]
    pub fn dirty(&self, index: usize) -> DirtyWord {
        self.cards.get(index)
    }

    #[inline]
    pub fn set_dirty(&mut self, index: usize, dirty: DirtyWord) {
        self.cards.set(index, dirty);
    }

    pub fn dirty_vector(&mut self) -> *mut u32 {
        self.cards.as_mut_ptr()
    }

    /// Adds `code` to the card covering `address`.
    #[inline]
    pub fn mark_card(&mut self, address: usize, code: u32) {
        if let Some(index) = self.page_index(address) {
            let card = (address >> CARD_SHIFT) & (CARDS_PER_PAGE - 1);
            self.cards.mark_card(index, card, code);
        }
    }

    /// Records that `slot` now holds `value`, narrowing the card code to the
    /// generation `value` lives in.
    pub fn remember(&mut self, slot: usize, value: Value) {
        if !value.is_pointer() {
            return;
        }
        if let Some(info) = self.info_of(value.address()) {
            self.mark_card(slot, info.generation().card_code());
        }
    }

    /// Mutator write barrier: the card of `slot` may now reference any generation.
    #[inline]
    pub fn record_write(&mut self, slot: usize) {
        self.mark_card(slot, DirtyWord::CARD_MASK);
    }

    fn find_run(&self, count: usize) -> Option<usize> {
        let search = |from: usize, to: usize| -> Option<usize> {
            let mut run = 0;
            for index in from..to {
                if self.pages[index].is_hole() {
                    run += 1;
                    if run == count {
                        return Some(index + 1 - count);
                    }
                } else {
                    run = 0;
                }
            }
            None
        };
        search(self.cursor, self.pages.len()).or_else(|| search(0, self.pages.len()))
    }

    /// Maps `size` bytes rounded up to whole pages, every page tagged `info`.
    pub fn map(&mut self, size: usize, info: PageInfo) -> Result<usize, HeapError> {
        let count = align_usize(size.max(1), PAGE_SIZE) / PAGE_SIZE;
        let first = self
            .find_run(count)
            .ok_or(HeapError::OutOfPages { pages: count })?;
        let address = self.page_address(first);
        self.mem.commit(address as *mut u8, count * PAGE_SIZE);
        self.pages[first..first + count].fill(info);
        self.cards.clear(first, count);
        self.cursor = first + count;
        self.used = self.used.max(first + count);
        self.mapped += count;
        log::trace!(
            "mapped {} pages at {:#x} as {:?}/{:?}",
            count,
            address,
            info.family(),
            info.generation()
        );
        Ok(address)
    }

    /// Maps room for code. The first page is a code page, the rest hold the
    /// tail of a single large object and are tagged as data.
    pub fn map_code(&mut self, size: usize, info: PageInfo) -> Result<usize, HeapError> {
        let address = self.map(size, info.with_family(Family::Data).with_scannable(false))?;
        let first = (address - self.base) >> PAGE_SHIFT;
        self.pages[first] = info;
        if self.executable_code {
            let length = align_usize(size.max(1), PAGE_SIZE);
            self.protect(address, length)?;
        }
        Ok(address)
    }

    pub fn protect(&mut self, address: usize, size: usize) -> Result<(), HeapError> {
        self.mem
            .protect(address as *mut u8, size, Protection::ReadWriteExecute)
            .map_err(|source| HeapError::Protect { address, source })
    }

    pub fn unmap(&mut self, address: usize, size: usize) {
        let count = align_usize(size, PAGE_SIZE) / PAGE_SIZE;
        let first = (address - self.base) >> PAGE_SHIFT;
        let had_code = self.pages[first..first + count]
            .iter()
            .any(|info| info.family() == Family::Code);
        self.pages[first..first + count].fill(PageInfo::hole());
        self.cards.clear(first, count);
        self.mem.dontneed(address as *mut u8, count * PAGE_SIZE);
        if had_code && self.executable_code {
            let _ = self
                .mem
                .protect(address as *mut u8, count * PAGE_SIZE, Protection::ReadWrite);
        }
        self.mapped -= count;
        log::trace!("unmapped {} pages at {:#x}", count, address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_tags_pages_and_unmap_frees_them() {
        let mut segments = Segments::new(64 * PAGE_SIZE, false).unwrap();
        let info = PageInfo::typed(Family::Pointers, Generation::First);
        let a = segments.map(3 * PAGE_SIZE, info).unwrap();
        assert_eq!(a % PAGE_SIZE, 0);
        assert_eq!(segments.mapped_pages(), 3);
        let index = segments.page_index(a).unwrap();
        for i in index..index + 3 {
            assert_eq!(segments.info(i), info);
            assert!(segments.dirty(i).is_clean());
        }
        unsafe {
            assert_eq!(*(a as *const usize), 0);
        }
        segments.unmap(a, 3 * PAGE_SIZE);
        assert_eq!(segments.mapped_pages(), 0);
        assert!(segments.info(index).is_hole());
    }

    #[test]
    fn reservation_bounds_page_lookup() {
        let segments = Segments::new(8 * PAGE_SIZE, false).unwrap();
        let base = segments.base();
        assert_eq!(segments.end(), base + 8 * PAGE_SIZE);
        assert_eq!(segments.page_index(base), Some(0));
        assert_eq!(segments.page_index(segments.end() - WORD_SIZE), Some(7));
        assert_eq!(segments.page_index(segments.end()), None);
        assert!(!segments.contains(base - WORD_SIZE));
        assert!(segments.info_of(base + 3 * PAGE_SIZE).unwrap().is_hole());
    }

    #[test]
    fn exhausted_reservation_reports_error() {
        let mut segments = Segments::new(4 * PAGE_SIZE, false).unwrap();
        segments.map(4 * PAGE_SIZE, PageInfo::mixed()).unwrap();
        match segments.map(PAGE_SIZE, PageInfo::mixed()) {
            Err(HeapError::OutOfPages { pages: 1 }) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn freed_runs_are_reused() {
        let mut segments = Segments::new(8 * PAGE_SIZE, false).unwrap();
        let a = segments.map(4 * PAGE_SIZE, PageInfo::mixed()).unwrap();
        let _b = segments.map(4 * PAGE_SIZE, PageInfo::mixed()).unwrap();
        segments.unmap(a, 4 * PAGE_SIZE);
        let c = segments.map(2 * PAGE_SIZE, PageInfo::mixed()).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn large_code_tail_is_data() {
        let mut segments = Segments::new(16 * PAGE_SIZE, false).unwrap();
        let info = PageInfo::typed(Family::Code, Generation::Nursery);
        let a = segments.map_code(2 * PAGE_SIZE + 8, info).unwrap();
        let index = segments.page_index(a).unwrap();
        assert_eq!(segments.info(index).family(), Family::Code);
        assert_eq!(segments.info(index + 1).family(), Family::Data);
        assert_eq!(segments.info(index + 2).family(), Family::Data);
        assert!(!segments.info(index + 2).scannable());
    }

    #[test]
    fn remembered_slots_record_referent_generation() {
        let mut segments = Segments::new(16 * PAGE_SIZE, false).unwrap();
        let old = segments
            .map(PAGE_SIZE, PageInfo::typed(Family::Pointers, Generation::Second))
            .unwrap();
        let young = segments
            .map(PAGE_SIZE, PageInfo::typed(Family::Pointers, Generation::First))
            .unwrap();
        let slot = old + 3 * CARD_SIZE + 16;
        segments.remember(slot, Value::tagged(young, crate::value::Tag::Pair));
        segments.remember(slot, Value::fixnum(3));
        let index = segments.page_index(old).unwrap();
        assert_eq!(segments.dirty(index).card(3), Generation::First.card_code());
        segments.record_write(old);
        assert_eq!(segments.dirty(index).card(0), 0xF);
    }
}
