//! To-space bump arenas, one per (source generation, object family).
//!
//! Each arena allocates between `alloc` and `end` and keeps a `scan` cursor
//! trailing `alloc`. The bytes between them are copied but not yet traced.
//! When an arena is extended the untraced part of the old region is pushed
//! onto a scan queue so the fixpoint loop still reaches it.
use crate::error::HeapError;
use crate::globals::*;
use crate::page::{Family, Generation, PageInfo};
use crate::segment::Segments;
use crate::align_usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArenaKind {
    Pointers = 0,
    Code = 1,
    Data = 2,
    WeakPairs = 3,
    Pairs = 4,
}

impl ArenaKind {
    pub const COUNT: usize = 5;

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Pages mapped per extension.
    pub const fn extension_pages(self) -> usize {
        match self {
            ArenaKind::Pointers | ArenaKind::Data => 4,
            ArenaKind::Code | ArenaKind::WeakPairs | ArenaKind::Pairs => 1,
        }
    }

    pub const fn family(self) -> Family {
        match self {
            ArenaKind::Pointers | ArenaKind::Pairs => Family::Pointers,
            ArenaKind::Code => Family::Code,
            ArenaKind::Data => Family::Data,
            ArenaKind::WeakPairs => Family::WeakPairs,
        }
    }

    /// Whether the fixpoint loop traces what this arena hands out.
    pub const fn is_traced(self) -> bool {
        matches!(self, ArenaKind::Pointers | ArenaKind::Code | ArenaKind::Pairs)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Arena {
    pub alloc: usize,
    pub scan: usize,
    pub end: usize,
    pub base: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanRange {
    pub start: usize,
    pub end: usize,
}

pub struct Arenas {
    arenas: [[Arena; ArenaKind::COUNT]; GENERATION_COUNT],
    queues: [Vec<ScanRange>; ArenaKind::COUNT],
}

impl Arenas {
    pub fn new() -> Self {
        Self {
            arenas: [[Arena::default(); ArenaKind::COUNT]; GENERATION_COUNT],
            queues: Default::default(),
        }
    }

    pub fn arena(&self, generation: Generation, kind: ArenaKind) -> &Arena {
        &self.arenas[generation.index()][kind.index()]
    }

    pub fn take_queue(&mut self, kind: ArenaKind) -> Vec<ScanRange> {
        std::mem::take(&mut self.queues[kind.index()])
    }

    pub fn push_queue(&mut self, kind: ArenaKind, range: ScanRange) {
        self.queues[kind.index()].push(range);
    }

    /// Hands out the copied-but-untraced region of an arena and marks it traced.
    pub fn take_unscanned(&mut self, generation: Generation, kind: ArenaKind) -> Option<ScanRange> {
        let arena = &mut self.arenas[generation.index()][kind.index()];
        if arena.scan < arena.alloc {
            let range = ScanRange {
                start: arena.scan,
                end: arena.alloc,
            };
            arena.scan = arena.alloc;
            Some(range)
        } else {
            None
        }
    }

    /// Allocates `size` bytes for a survivor of `generation`.
    pub fn allocate(
        &mut self,
        segments: &mut Segments,
        size: usize,
        generation: Generation,
        kind: ArenaKind,
    ) -> Result<usize, HeapError> {
        let arena = &mut self.arenas[generation.index()][kind.index()];
        let ap = arena.alloc;
        if ap != 0 && ap + size <= arena.end {
            arena.alloc = ap + size;
            return Ok(ap);
        }
        self.extend(segments, size, generation, kind)
    }

    fn extend(
        &mut self,
        segments: &mut Segments,
        size: usize,
        generation: Generation,
        kind: ArenaKind,
    ) -> Result<usize, HeapError> {
        let map_size = align_usize(size, PAGE_SIZE).max(kind.extension_pages() * PAGE_SIZE);
        let mem = segments.map(map_size, PageInfo::promoted(kind.family(), generation))?;
        let arena = &mut self.arenas[generation.index()][kind.index()];
        if arena.base != 0 {
            if kind.is_traced() && arena.scan < arena.alloc {
                self.queues[kind.index()].push(ScanRange {
                    start: arena.scan,
                    end: arena.alloc,
                });
            }
            unsafe {
                core::ptr::write_bytes(arena.alloc as *mut u8, 0, arena.end - arena.alloc);
            }
        }
        log::trace!(
            "extended {:?} arena of {:?} by {} bytes at {:#x}",
            kind,
            generation,
            map_size,
            mem
        );
        *arena = Arena {
            alloc: mem + size,
            scan: mem,
            end: mem + map_size,
            base: mem,
        };
        Ok(mem)
    }

    /// Weak pairs are copied a page at a time and never queued; the weak
    /// finalizer visits their pages instead.
    pub fn allocate_weak_pair(
        &mut self,
        segments: &mut Segments,
        generation: Generation,
    ) -> Result<usize, HeapError> {
        let arena = &mut self.arenas[generation.index()][ArenaKind::WeakPairs.index()];
        let ap = arena.alloc;
        if ap != 0 && ap + PAIR_SIZE <= arena.end {
            arena.alloc = ap + PAIR_SIZE;
            return Ok(ap);
        }
        let mem = segments.map(
            PAGE_SIZE,
            PageInfo::promoted(Family::WeakPairs, generation),
        )?;
        *arena = Arena {
            alloc: mem + PAIR_SIZE,
            scan: mem,
            end: mem + PAGE_SIZE,
            base: mem,
        };
        Ok(mem)
    }

    /// Allocates a small code object so that it never crosses a page end.
    /// The skipped gap stays zero, which page scans read as "no more code".
    pub fn allocate_code(
        &mut self,
        segments: &mut Segments,
        size: usize,
        generation: Generation,
    ) -> Result<usize, HeapError> {
        debug_assert!(size < PAGE_SIZE);
        let arena = &mut self.arenas[generation.index()][ArenaKind::Code.index()];
        let ap = arena.alloc;
        if ap != 0 && ap / PAGE_SIZE != (ap + size - 1) / PAGE_SIZE {
            let boundary = align_usize(ap, PAGE_SIZE);
            if boundary + size <= arena.end {
                arena.alloc = boundary;
            }
        }
        self.allocate(segments, size, generation, ArenaKind::Code)
    }

    /// Zeroes the unused tail of every traced arena of the collected generations.
    pub fn clear_tails(&mut self, target: Generation) {
        for generation in &Generation::ALL[..=target.index()] {
            for kind in [
                ArenaKind::Pairs,
                ArenaKind::Pointers,
                ArenaKind::WeakPairs,
                ArenaKind::Code,
            ] {
                let arena = self.arena(*generation, kind);
                if arena.alloc != 0 && arena.alloc < arena.end {
                    unsafe {
                        core::ptr::write_bytes(
                            arena.alloc as *mut u8,
                            0,
                            arena.end - arena.alloc,
                        );
                    }
                }
            }
        }
    }
}

impl Default for Arenas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_queues_untraced_tail() {
        let mut segments = Segments::new(64 * PAGE_SIZE, false).unwrap();
        let mut arenas = Arenas::new();
        let g = Generation::Nursery;
        let a = arenas
            .allocate(&mut segments, PAGE_SIZE - 16, g, ArenaKind::Pairs)
            .unwrap();
        let info = segments.info_of(a).unwrap();
        assert_eq!(info.family(), Family::Pointers);
        assert_eq!(info.generation(), Generation::First);
        assert!(info.fresh());

        let range = arenas.take_unscanned(g, ArenaKind::Pairs).unwrap();
        assert_eq!(range, ScanRange { start: a, end: a + PAGE_SIZE - 16 });
        let b = arenas.allocate(&mut segments, 16, g, ArenaKind::Pairs).unwrap();
        assert_eq!(b, a + PAGE_SIZE - 16);
        let c = arenas.allocate(&mut segments, 16, g, ArenaKind::Pairs).unwrap();
        assert_eq!(
            arenas.take_queue(ArenaKind::Pairs),
            vec![ScanRange { start: b, end: b + 16 }]
        );
        assert_eq!(arenas.arena(g, ArenaKind::Pairs).scan, c);
    }

    #[test]
    fn data_is_never_queued() {
        let mut segments = Segments::new(64 * PAGE_SIZE, false).unwrap();
        let mut arenas = Arenas::new();
        let g = Generation::Second;
        arenas
            .allocate(&mut segments, 4 * PAGE_SIZE, g, ArenaKind::Data)
            .unwrap();
        let d = arenas.allocate(&mut segments, 32, g, ArenaKind::Data).unwrap();
        assert_eq!(
            segments.info_of(d).unwrap().generation(),
            Generation::Third
        );
        assert!(arenas.take_queue(ArenaKind::Data).is_empty());
    }

    #[test]
    fn code_skips_to_next_page() {
        let mut segments = Segments::new(64 * PAGE_SIZE, false).unwrap();
        let mut arenas = Arenas::new();
        let g = Generation::Nursery;
        let a = arenas.allocate_code(&mut segments, 3072, g).unwrap();
        let b = arenas.allocate_code(&mut segments, 2048, g).unwrap();
        assert_eq!(a % PAGE_SIZE, 0);
        assert_eq!(b % PAGE_SIZE, 0);
        assert_eq!(
            arenas.take_queue(ArenaKind::Code),
            vec![ScanRange { start: a, end: a + 3072 }]
        );
    }

    #[test]
    fn weak_pairs_fill_single_pages() {
        let mut segments = Segments::new(64 * PAGE_SIZE, false).unwrap();
        let mut arenas = Arenas::new();
        let g = Generation::Nursery;
        let first = arenas.allocate_weak_pair(&mut segments, g).unwrap();
        for i in 1..PAGE_SIZE / PAIR_SIZE {
            let p = arenas.allocate_weak_pair(&mut segments, g).unwrap();
            assert_eq!(p, first + i * PAIR_SIZE);
        }
        let next = arenas.allocate_weak_pair(&mut segments, g).unwrap();
        assert_eq!(
            segments.info_of(next).unwrap().family(),
            Family::WeakPairs
        );
        assert!(arenas.take_queue(ArenaKind::WeakPairs).is_empty());
    }
}
