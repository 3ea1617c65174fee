//! Tail-concatenation queues for hash buckets whose keys moved.
//!
//! A tconc is a pair `(head . tail)` of a queue whose last pair is an empty
//! placeholder. Buckets found during a collection are parked on collector
//! scratch pages and spliced into their tconcs once the mutator heap is
//! usable again.
use crate::control::ControlBlock;
use crate::error::{fatal, FatalError};
use crate::globals::*;
use crate::page::{DirtyWord, PageInfo};
use crate::segment::Segments;
use crate::value::*;

pub struct TconcQueue {
    base: usize,
    ap: usize,
    ep: usize,
    /// Filled scratch pages, oldest first.
    full: Vec<usize>,
    len: usize,
}

impl TconcQueue {
    pub fn new() -> Self {
        Self {
            base: 0,
            ap: 0,
            ep: 0,
            full: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, segments: &mut Segments, bucket: Value) {
        if self.ap + WORD_SIZE > self.ep {
            if self.base != 0 {
                self.full.push(self.base);
            }
            let page = segments
                .map(PAGE_SIZE, PageInfo::bookkeeping())
                .unwrap_or_else(|e| fatal(FatalError::Heap(e)));
            self.base = page;
            self.ap = page;
            self.ep = page + PAGE_SIZE;
        }
        unsafe { store(self.ap, bucket) };
        self.ap += WORD_SIZE;
        self.len += 1;
    }

    /// Splices every queued bucket into its tconc, allocating the new tail
    /// pairs from the mutator nursery, then releases the scratch pages.
    pub fn flush(self, pcb: &mut ControlBlock, segments: &mut Segments) {
        let mut ranges: Vec<(usize, usize)> = self
            .full
            .iter()
            .map(|&page| (page, page + PAGE_SIZE))
            .collect();
        if self.base != 0 {
            ranges.push((self.base, self.ap));
        }
        for &(start, end) in &ranges {
            let mut p = start;
            while p < end {
                add_one_tconc(pcb, segments, unsafe { load(p) });
                p += WORD_SIZE;
            }
        }
        for &(start, _) in &ranges {
            segments.unmap(start, PAGE_SIZE);
        }
        if self.len != 0 {
            log::trace!("spliced {} buckets into their tconcs", self.len);
        }
    }
}

impl Default for TconcQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends `bucket` to its tconc. The bucket's first word becomes a vector
/// length so the bucket reads as a plain vector afterwards.
pub fn add_one_tconc(pcb: &mut ControlBlock, segments: &mut Segments, bucket: Value) {
    unsafe {
        let tc = load(bucket.address() + OFF_TCBUCKET_TCONC);
        debug_assert!(tc.is_pair());
        let d = load(tc.address() + OFF_CDR);
        debug_assert!(d.is_pair());
        let new_pair = pcb
            .alloc(segments, PAIR_SIZE)
            .unwrap_or_else(|e| fatal(FatalError::Heap(e)));
        let new_pair = Value::tagged(new_pair, Tag::Pair);
        store(d.address() + OFF_CAR, bucket);
        store(d.address() + OFF_CDR, new_pair);
        store(new_pair.address() + OFF_CAR, Value::FALSE);
        store(new_pair.address() + OFF_CDR, Value::FALSE);
        store(tc.address() + OFF_CDR, new_pair);
        store(
            bucket.address(),
            Value::fixnum(((TCBUCKET_SIZE - WORD_SIZE) / WORD_SIZE) as isize),
        );
        for pair in [tc, d] {
            if let Some(page) = segments.page_index(pair.address()) {
                segments.set_dirty(page, DirtyWord::ALL);
            }
        }
    }
}
