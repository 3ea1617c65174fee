use crate::collector::Collector;
use crate::code::code_object_size;
use crate::error::{fatal, FatalError};
use crate::globals::*;
use crate::header::CODE_TAG;
use crate::page::{DirtyWord, Family};
use crate::value::*;

impl<'h> Collector<'h> {
    /// Unmaps every evacuated page. Pages without the dealloc flag (the
    /// nursery, collector scratch) are left to their owners.
    pub fn deallocate_unused_pages(&mut self) {
        let mut freed = 0usize;
        let mut page = 0;
        while page < self.segments.used_pages() {
            let info = self.segments.info(page);
            if info.dealloc() && self.is_from_space(info) {
                let address = self.segments.page_address(page);
                self.segments.unmap(address, PAGE_SIZE);
                freed += 1;
            }
            page += 1;
        }
        self.counters.pages_freed += freed;
        log::trace!("freed {} pages", freed);
    }

    /// Clears the fresh flag of every page written by this collection and
    /// gives it an exact dirty word. Weak pages are recomputed every cycle
    /// because their cars were just rewritten.
    ///
    /// Nothing is traced here: once a page loses its fresh flag its objects
    /// would look evacuable again to a collection of the oldest generation.
    pub fn fix_new_pages(&mut self) {
        let mut page = 0;
        while page < self.segments.used_pages() {
            let info = self.segments.info(page);
            if info.fresh() || info.family() == Family::WeakPairs {
                self.segments.set_info(page, info.with_fresh(false));
                match info.family() {
                    Family::Pointers | Family::WeakPairs => {
                        let dirty = self.pointer_page_codes(page);
                        self.segments
                            .set_dirty(page, dirty & info.generation().cleanup_mask());
                    }
                    Family::Code => {
                        if self.segments.executable_code() {
                            let address = self.segments.page_address(page);
                            if let Err(e) = self.segments.protect(address, PAGE_SIZE) {
                                fatal(e.into());
                            }
                        }
                        let dirty = self.code_page_codes(page);
                        self.segments
                            .set_dirty(page, dirty & info.generation().cleanup_mask());
                    }
                    _ if info.scannable() => fatal(FatalError::UnscannablePage { page, info }),
                    _ => {}
                }
            }
            page += 1;
        }
    }

    fn pointer_page_codes(&self, page: usize) -> DirtyWord {
        let start = self.segments.page_address(page);
        let mut dirty = DirtyWord::CLEAN;
        for card in 0..CARDS_PER_PAGE {
            let mut code = 0;
            let mut p = start + card * CARD_SIZE;
            for _ in 0..CARD_WORDS {
                code |= self.card_code_of(unsafe { load(p) });
                p += WORD_SIZE;
            }
            dirty = dirty.with_card(card, code);
        }
        dirty
    }

    /// Generation set of each card of a code page, read from the relocation
    /// vectors of the code objects starting on it.
    fn code_page_codes(&self, page: usize) -> DirtyWord {
        let start = self.segments.page_address(page);
        let mut dirty = DirtyWord::CLEAN;
        let mut p = start;
        while p < start + PAGE_SIZE {
            if unsafe { load(p).raw() } != CODE_TAG {
                break;
            }
            let reloc = unsafe { load(p + OFF_CODE_RELOC_VECTOR) };
            let mut code = self.card_code_of(reloc);
            let length = unsafe { reloc.vector_length() };
            for i in 0..length {
                code |= self.card_code_of(unsafe { reloc.vector_ref(i) });
            }
            dirty = dirty.or_card((p - start) / CARD_SIZE, code);
            p += unsafe { code_object_size(p) };
        }
        dirty
    }
}
