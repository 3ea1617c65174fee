//! Object evacuation.
//!
//! [`Collector::trace`] maps a value to its post-collection location: values
//! that are not heap pointers, objects in generations older than the one
//! being collected and objects already copied this cycle come back unchanged
//! (or redirected through their forwarding pair). Everything else is copied
//! into the to-space arena of its family, one generation up, and a forwarding
//! pair is left in the old copy before any of its fields are visited.
use std::ptr::copy_nonoverlapping;

use crate::arena::{ArenaKind, Arenas};
use crate::error::{fatal, FatalError};
use crate::globals::*;
use crate::header::*;
use crate::page::{Family, Generation, PageInfo};
use crate::segment::Segments;
use crate::statistics::CopyCounters;
use crate::tconc::TconcQueue;
use crate::value::*;
use crate::align_object;

/// Per-collection state.
pub struct Collector<'h> {
    pub(crate) segments: &'h mut Segments,
    pub(crate) arenas: Arenas,
    pub(crate) target: Generation,
    pub(crate) tconcs: TconcQueue,
    pub(crate) counters: CopyCounters,
}

/// What survives the collector context: buckets whose keys moved, and counts.
pub struct CollectionOutcome {
    pub tconcs: TconcQueue,
    pub counters: CopyCounters,
}

impl<'h> Collector<'h> {
    pub fn new(segments: &'h mut Segments, target: Generation) -> Self {
        Self {
            segments,
            arenas: Arenas::new(),
            target,
            tconcs: TconcQueue::new(),
            counters: CopyCounters::default(),
        }
    }

    pub fn target(&self) -> Generation {
        self.target
    }

    pub fn finish(self) -> CollectionOutcome {
        CollectionOutcome {
            tconcs: self.tconcs,
            counters: self.counters,
        }
    }

    /// Descriptor of the page `value` points into. Pointers outside the
    /// reservation or into unmapped pages mean the heap is corrupt.
    #[inline]
    pub(crate) fn page_of(&self, value: Value) -> PageInfo {
        match self.segments.info_of(value.address()) {
            Some(info) if !info.is_hole() => info,
            Some(_) => fatal(FatalError::Dangling(value)),
            None => fatal(FatalError::OutOfHeap(value)),
        }
    }

    /// Pages whose objects this collection evacuates. Pages written during
    /// the collection are to-space even when their generation is collected.
    #[inline]
    pub(crate) fn is_from_space(&self, info: PageInfo) -> bool {
        !info.fresh() && info.generation() <= self.target
    }

    pub(crate) fn alloc(&mut self, size: usize, generation: Generation, kind: ArenaKind) -> usize {
        self.counters.bytes_promoted += size;
        self.arenas
            .allocate(self.segments, size, generation, kind)
            .unwrap_or_else(|e| fatal(e.into()))
    }

    pub fn trace(&mut self, x: Value) -> Value {
        if x.is_fixnum() {
            return x;
        }
        if x.raw() == FORWARD_MARKER {
            fatal(FatalError::ForwardMarkerTraced);
        }
        if x.is_immediate() {
            return x;
        }
        let info = self.page_of(x);
        if !self.is_from_space(info) {
            return x;
        }
        let first = match unsafe { Header::load(x) } {
            Header::Forwarded(to) => return to,
            Header::Word(first) => first,
        };
        let generation = info.generation();
        unsafe {
            match x.tag() {
                Tag::Pair => self.copy_list(x, info),
                Tag::Symbol => self.copy_symbol(x, generation),
                Tag::Closure => self.copy_closure(x, first, generation),
                Tag::Vector => self.copy_vector_like(x, first, generation),
                Tag::String => self.copy_string(x, first, generation),
                Tag::Fixnum | Tag::Immediate => x,
            }
        }
    }

    /// Copies a run of pairs linked through their cdrs without recursing.
    /// Cars are copied as they are and traced later by the pair arena scan.
    unsafe fn copy_list(&mut self, mut x: Value, mut info: PageInfo) -> Value {
        let mut head = x;
        let mut link: Option<usize> = None;
        loop {
            let generation = info.generation();
            let base = x.address();
            let car = load(base + OFF_CAR);
            let cdr = load(base + OFF_CDR);
            let y = if info.family() == Family::WeakPairs {
                self.counters.weak_pairs += 1;
                self.counters.bytes_promoted += PAIR_SIZE;
                self.arenas
                    .allocate_weak_pair(self.segments, generation)
                    .unwrap_or_else(|e| fatal(e.into()))
            } else {
                self.counters.pairs += 1;
                self.alloc(PAIR_SIZE, generation, ArenaKind::Pairs)
            };
            let y = Value::tagged(y, Tag::Pair);
            match link {
                None => head = y,
                Some(slot) => store(slot, y),
            }
            store(y.address() + OFF_CAR, car);
            install_forward(x, y);

            let cdr_slot = y.address() + OFF_CDR;
            if cdr.is_pair() {
                let cdr_info = self.page_of(cdr);
                if self.is_from_space(cdr_info) {
                    if let Header::Word(_) = Header::load(cdr) {
                        x = cdr;
                        info = cdr_info;
                        link = Some(cdr_slot);
                        continue;
                    }
                }
            }
            let cdr = self.trace(cdr);
            store(cdr_slot, cdr);
            return head;
        }
    }

    unsafe fn copy_symbol(&mut self, x: Value, generation: Generation) -> Value {
        let y = self.alloc(SYMBOL_SIZE, generation, ArenaKind::Pointers);
        copy_nonoverlapping(x.address() as *const u8, y as *mut u8, SYMBOL_SIZE);
        let y = Value::tagged(y, Tag::Symbol);
        install_forward(x, y);
        self.counters.symbols += 1;
        y
    }

    unsafe fn copy_closure(&mut self, x: Value, entry: Value, generation: Generation) -> Value {
        let entry = entry.raw();
        let count = load(entry - DISP_CODE_DATA + OFF_CODE_FREEVARS);
        let count = match count.as_fixnum() {
            Some(n) if n >= 0 => n as usize,
            _ => fatal(FatalError::InvalidFreeVariableCount { entry, count }),
        };
        let size = OFF_CLOSURE_DATA + count * WORD_SIZE;
        let asize = align_object(size);
        let y = self.alloc(asize, generation, ArenaKind::Pointers);
        store(y + asize - WORD_SIZE, Value::fixnum(0));
        copy_nonoverlapping(x.address() as *const u8, y as *mut u8, size);
        let y = Value::tagged(y, Tag::Closure);
        install_forward(x, y);
        let entry = self.relocate_code_entry(entry);
        store(y.address() + OFF_CLOSURE_CODE, Value::from_raw(entry));
        self.counters.closures += 1;
        y
    }

    /// Copies the first `size` bytes of `x`. The padding word of the copy is zeroed.
    unsafe fn copy_words(&mut self, x: Value, size: usize, generation: Generation, kind: ArenaKind) -> Value {
        let asize = align_object(size);
        let y = self.alloc(asize, generation, kind);
        store(y + asize - WORD_SIZE, Value::fixnum(0));
        copy_nonoverlapping(x.address() as *const u8, y as *mut u8, size);
        let y = Value::tagged(y, Tag::Vector);
        install_forward(x, y);
        y
    }

    unsafe fn copy_vector_like(&mut self, x: Value, first: Value, generation: Generation) -> Value {
        let kind = match VectorLike::decode(first) {
            Some(kind) => kind,
            None => fatal(FatalError::UnknownVectorHeader {
                object: x,
                first: first.raw(),
            }),
        };
        match kind {
            VectorLike::Vector { length } => {
                self.counters.vectors += 1;
                let size = OFF_VECTOR_DATA + length * WORD_SIZE;
                self.copy_words(x, size, generation, ArenaKind::Pointers)
            }
            VectorLike::Record { rtd } => {
                let length = load(rtd.address() + OFF_RTD_LENGTH);
                let count = match length.as_fixnum() {
                    Some(n) if n >= 0 => n as usize,
                    _ => fatal(FatalError::InvalidRecordLength { rtd, length }),
                };
                self.counters.records += 1;
                let size = OFF_RECORD_DATA + count * WORD_SIZE;
                self.copy_words(x, size, generation, ArenaKind::Pointers)
            }
            VectorLike::Code => {
                let entry = self.relocate_code_entry(x.address() + DISP_CODE_DATA);
                Value::tagged(entry - DISP_CODE_DATA, Tag::Vector)
            }
            VectorLike::Continuation => self.copy_continuation(x, generation),
            VectorLike::Bucket { .. } => {
                let key = load(x.address() + OFF_TCBUCKET_KEY);
                let y = self.copy_words(x, TCBUCKET_SIZE, generation, ArenaKind::Pointers);
                self.counters.buckets += 1;
                if key.is_pointer() {
                    let key_info = self.page_of(key);
                    if self.is_from_space(key_info) {
                        self.tconcs.push(self.segments, y);
                    }
                }
                y
            }
            VectorLike::Port(_) => {
                self.counters.ports += 1;
                self.copy_words(x, PORT_SIZE, generation, ArenaKind::Pointers)
            }
            VectorLike::Bignum(header) => {
                self.counters.bignums += 1;
                let size = OFF_BIGNUM_DATA + header.length() as usize * WORD_SIZE;
                self.copy_words(x, size, generation, ArenaKind::Data)
            }
        }
    }

    /// The captured stack segment moves to a data page and its frames are
    /// walked there, just like the live stack.
    unsafe fn copy_continuation(&mut self, x: Value, generation: Generation) -> Value {
        let base = x.address();
        let top = load(base + OFF_CONTINUATION_TOP).raw();
        let size = load(base + OFF_CONTINUATION_SIZE).raw();
        let next = load(base + OFF_CONTINUATION_NEXT);
        let y = self.alloc(CONTINUATION_SIZE, generation, ArenaKind::Pointers);
        let yv = Value::tagged(y, Tag::Vector);
        install_forward(x, yv);
        let new_top = self.alloc(align_object(size), generation, ArenaKind::Data);
        copy_nonoverlapping(top as *const u8, new_top as *mut u8, size);
        store(y, Value::from_raw(CONTINUATION_TAG));
        store(y + OFF_CONTINUATION_TOP, Value::from_raw(new_top));
        store(y + OFF_CONTINUATION_SIZE, Value::from_raw(size));
        store(y + OFF_CONTINUATION_NEXT, next);
        self.counters.continuations += 1;
        log::trace!("continuation {:?} moved stack {:#x} -> {:#x}", x, top, new_top);
        self.collect_stack(new_top, new_top + size);
        yv
    }

    unsafe fn copy_string(&mut self, x: Value, first: Value, generation: Generation) -> Value {
        let length = match first.as_fixnum() {
            Some(n) if n >= 0 => n as usize,
            _ => fatal(FatalError::InvalidStringHeader {
                object: x,
                first: first.raw(),
            }),
        };
        let asize = align_object(OFF_STRING_DATA + length + 1);
        let y = self.alloc(asize, generation, ArenaKind::Data);
        store(y + asize - WORD_SIZE, Value::fixnum(0));
        store(y + OFF_STRING_LENGTH, first);
        copy_nonoverlapping(
            (x.address() + OFF_STRING_DATA) as *const u8,
            (y + OFF_STRING_DATA) as *mut u8,
            length + 1,
        );
        let y = Value::tagged(y, Tag::String);
        install_forward(x, y);
        self.counters.strings += 1;
        y
    }
}
