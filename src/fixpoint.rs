use crate::arena::{ArenaKind, ScanRange};
use crate::collector::Collector;
use crate::globals::*;
use crate::page::Generation;
use crate::value::*;

const TRACED_KINDS: [ArenaKind; 3] = [ArenaKind::Pairs, ArenaKind::Pointers, ArenaKind::Code];

impl<'h> Collector<'h> {
    /// Traces copied objects until nothing new gets copied. Scanning can copy
    /// more objects, which extends arenas and refills the queues, so both are
    /// drained in rounds until a round finds no work.
    pub fn collect_loop(&mut self) {
        let mut rounds = 0usize;
        loop {
            let mut done = true;
            for kind in TRACED_KINDS {
                let queue = self.arenas.take_queue(kind);
                if !queue.is_empty() {
                    done = false;
                    for range in queue {
                        self.scan_range(kind, range);
                    }
                }
            }
            for generation in &Generation::ALL[..=self.target.index()] {
                for kind in TRACED_KINDS {
                    while let Some(range) = self.arenas.take_unscanned(*generation, kind) {
                        done = false;
                        self.scan_range(kind, range);
                    }
                }
            }
            rounds += 1;
            if done {
                break;
            }
        }
        log::trace!("fixpoint reached after {} rounds", rounds);
        self.arenas.clear_tails(self.target);
    }

    pub(crate) fn scan_range(&mut self, kind: ArenaKind, range: ScanRange) {
        match kind {
            ArenaKind::Pairs => self.trace_range(range, PAIR_SIZE),
            ArenaKind::Pointers => self.trace_range(range, WORD_SIZE),
            ArenaKind::Code => self.relocate_code_range(range),
            ArenaKind::Data | ArenaKind::WeakPairs => {}
        }
    }

    /// Traces the word at every `stride` bytes of `range`. A pair stride
    /// visits only cars; cdrs were handled when the list was copied.
    fn trace_range(&mut self, range: ScanRange, stride: usize) {
        let mut p = range.start;
        while p < range.end {
            unsafe {
                let v = self.trace(load(p));
                store(p, v);
            }
            p += stride;
        }
    }
}
