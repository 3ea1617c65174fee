//! Remembered-set processing.
//!
//! The mutator's write barrier sets the whole generation set of the card it
//! wrote to. Before anything else is traced, every page of an older
//! generation whose cards may reference a collected generation is rescanned,
//! and each rescanned card gets an exact generation set back.
use crate::code::code_object_size;
use crate::collector::Collector;
use crate::error::{fatal, FatalError};
use crate::globals::*;
use crate::header::CODE_TAG;
use crate::page::{DirtyWord, Family, PageInfo};
use crate::value::*;

impl<'h> Collector<'h> {
    pub fn scan_dirty_pages(&mut self) {
        let mask = self.target.scan_mask();
        let mut scanned = 0usize;
        let mut page = 0;
        while page < self.segments.used_pages() {
            let dirty = self.segments.dirty(page);
            let info = self.segments.info(page);
            if !(dirty & mask).is_clean() && info.generation() > self.target {
                match info.family() {
                    Family::Pointers => self.scan_dirty_pointers_page(page, info, mask),
                    Family::WeakPairs => self.scan_dirty_weak_page(page, mask),
                    Family::Code => self.scan_dirty_code_page(page, info),
                    _ if info.scannable() => fatal(FatalError::UnscannablePage { page, info }),
                    _ => {}
                }
                scanned += 1;
            }
            page += 1;
        }
        log::trace!("rescanned {} dirty pages", scanned);
    }

    fn scan_dirty_pointers_page(&mut self, page: usize, info: PageInfo, mask: DirtyWord) {
        let dirty = self.segments.dirty(page);
        let masked = dirty & mask;
        let start = self.segments.page_address(page);
        let mut new_dirty = DirtyWord::CLEAN;
        for card in 0..CARDS_PER_PAGE {
            if masked.card(card) == 0 {
                new_dirty = new_dirty.with_card(card, dirty.card(card));
                continue;
            }
            let mut code = 0;
            let mut p = start + card * CARD_SIZE;
            for _ in 0..CARD_WORDS {
                unsafe {
                    let x = load(p);
                    if x.is_pointer() {
                        let y = self.trace(x);
                        store(p, y);
                        code |= self.card_code_of(y);
                    }
                }
                p += WORD_SIZE;
            }
            new_dirty = new_dirty.with_card(card, code);
        }
        self.segments
            .set_dirty(page, new_dirty & info.generation().cleanup_mask());
    }

    /// Weak cars stay untouched here; only cdrs of dirty cards are traced.
    fn scan_dirty_weak_page(&mut self, page: usize, mask: DirtyWord) {
        let masked = self.segments.dirty(page) & mask;
        let start = self.segments.page_address(page);
        for card in 0..CARDS_PER_PAGE {
            if masked.card(card) == 0 {
                continue;
            }
            let mut p = start + card * CARD_SIZE;
            while p < start + (card + 1) * CARD_SIZE {
                unsafe {
                    let cdr = load(p + OFF_CDR);
                    if cdr.is_pointer() {
                        let y = self.trace(cdr);
                        store(p + OFF_CDR, y);
                    }
                }
                p += PAIR_SIZE;
            }
        }
    }

    fn scan_dirty_code_page(&mut self, page: usize, info: PageInfo) {
        let dirty = self.relocate_code_page(page);
        self.segments
            .set_dirty(page, dirty & info.generation().cleanup_mask());
    }

    /// Relocates the code objects that start on `page` and returns the exact
    /// generation set of each card they start in.
    pub(crate) fn relocate_code_page(&mut self, page: usize) -> DirtyWord {
        let start = self.segments.page_address(page);
        let mut dirty = DirtyWord::CLEAN;
        let mut p = start;
        while p < start + PAGE_SIZE {
            if unsafe { load(p).raw() } != CODE_TAG {
                break;
            }
            let card = (p - start) / CARD_SIZE;
            let code = self.relocate_new_code(p);
            dirty = dirty.or_card(card, code);
            p += unsafe { code_object_size(p) };
        }
        dirty
    }
}
