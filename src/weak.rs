use crate::collector::Collector;
use crate::globals::*;
use crate::header::Header;
use crate::page::Family;
use crate::value::*;

impl<'h> Collector<'h> {
    /// Settles the car of every surviving weak pair: a referent that moved is
    /// followed, one left behind in a collected generation is replaced by
    /// [`Value::BWP`].
    ///
    /// Runs after the fixpoint, so "not forwarded" means unreachable.
    /// Uncollected weak pages and the weak pages filled by this collection
    /// are both visited.
    pub fn fix_weak_pointers(&mut self) {
        let mut broken = 0usize;
        let mut page = 0;
        while page < self.segments.used_pages() {
            let info = self.segments.info(page);
            if info.family() == Family::WeakPairs
                && (info.generation() > self.target || info.fresh())
            {
                let start = self.segments.page_address(page);
                let mut p = start;
                while p < start + PAGE_SIZE {
                    unsafe {
                        let x = load(p + OFF_CAR);
                        if x.is_pointer() {
                            let x_info = self.page_of(x);
                            if self.is_from_space(x_info) {
                                match Header::load(x) {
                                    Header::Forwarded(to) => store(p + OFF_CAR, to),
                                    Header::Word(_) => {
                                        store(p + OFF_CAR, Value::BWP);
                                        broken += 1;
                                    }
                                }
                            }
                        }
                    }
                    p += PAIR_SIZE;
                }
            }
            page += 1;
        }
        log::trace!("broke {} weak references", broken);
    }
}
