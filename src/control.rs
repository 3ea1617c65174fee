//! Mutator-visible heap state and the allocation paths that never collect.
use std::time::Duration;

use crate::error::HeapError;
use crate::globals::*;
use crate::page::{Family, Generation, PageInfo};
use crate::segment::Segments;
use crate::value::Value;
use crate::{align_object, align_usize};

/// A retired nursery mapping, released after the next collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub base: usize,
    pub size: usize,
}

/// Process control block shared between mutator and collector.
///
/// The mutator bump-allocates from `[allocation_pointer, allocation_redline)`
/// and asks for a collection when the window runs dry. Roots are the stack
/// segment `[frame_pointer, frame_base)` plus `next_k`, `symbol_table` and
/// `arg_list`.
#[derive(Debug)]
pub struct ControlBlock {
    pub allocation_pointer: usize,
    pub allocation_redline: usize,
    pub heap_base: usize,
    pub heap_size: usize,
    pub heap_pages: Vec<Region>,
    pub frame_pointer: usize,
    pub frame_base: usize,
    pub next_k: Value,
    pub symbol_table: Value,
    pub arg_list: Value,
    pub weak_pairs_ap: usize,
    pub weak_pairs_ep: usize,
    pub code_ap: usize,
    pub code_ep: usize,
    pub collection_id: usize,
    pub collect_utime: Duration,
    pub collect_stime: Duration,
    nursery_quantum: usize,
}

impl ControlBlock {
    pub fn new(segments: &mut Segments, nursery_size: usize) -> Result<Self, HeapError> {
        let mut pcb = Self {
            allocation_pointer: 0,
            allocation_redline: 0,
            heap_base: 0,
            heap_size: 0,
            heap_pages: Vec::new(),
            frame_pointer: 0,
            frame_base: 0,
            next_k: Value::fixnum(0),
            symbol_table: Value::NULL,
            arg_list: Value::NULL,
            weak_pairs_ap: 0,
            weak_pairs_ep: 0,
            code_ap: 0,
            code_ep: 0,
            collection_id: 0,
            collect_utime: Duration::ZERO,
            collect_stime: Duration::ZERO,
            nursery_quantum: align_usize(nursery_size.max(PAGE_SIZE), PAGE_SIZE),
        };
        pcb.map_nursery(segments, pcb.nursery_quantum)?;
        Ok(pcb)
    }

    /// Installs the live stack segment. `frame_pointer` addresses the newest
    /// frame's return point; the walk stops one word below `frame_base`.
    pub fn set_stack(&mut self, frame_pointer: usize, frame_base: usize) {
        self.frame_pointer = frame_pointer;
        self.frame_base = frame_base;
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.allocation_redline.saturating_sub(self.allocation_pointer)
    }

    /// Bump-allocates `size` bytes. A full nursery is retired and replaced by
    /// a fresh mapping.
    pub fn alloc(&mut self, segments: &mut Segments, size: usize) -> Result<usize, HeapError> {
        let size = align_object(size);
        let ap = self.allocation_pointer;
        if ap + size <= self.allocation_redline {
            self.allocation_pointer = ap + size;
            return Ok(ap);
        }
        if self.heap_base != 0 {
            self.heap_pages.push(Region {
                base: self.heap_base,
                size: self.heap_size,
            });
        }
        let quantum = align_usize(size, PAGE_SIZE).max(self.nursery_quantum);
        self.map_nursery(segments, quantum)?;
        let ap = self.allocation_pointer;
        self.allocation_pointer = ap + size;
        Ok(ap)
    }

    pub fn alloc_weak_pair(&mut self, segments: &mut Segments) -> Result<usize, HeapError> {
        if self.weak_pairs_ap == 0 || self.weak_pairs_ap + PAIR_SIZE > self.weak_pairs_ep {
            let page = segments.map(
                PAGE_SIZE,
                PageInfo::typed(Family::WeakPairs, Generation::Nursery),
            )?;
            self.weak_pairs_ap = page;
            self.weak_pairs_ep = page + PAGE_SIZE;
        }
        let ap = self.weak_pairs_ap;
        self.weak_pairs_ap += PAIR_SIZE;
        Ok(ap)
    }

    /// Code lives on code pages, never in the nursery. Small objects share a
    /// page without crossing its end; large ones get a mapping of their own.
    pub fn alloc_code(&mut self, segments: &mut Segments, size: usize) -> Result<usize, HeapError> {
        let size = align_object(size);
        let info = PageInfo::typed(Family::Code, Generation::Nursery);
        if size >= PAGE_SIZE {
            return segments.map_code(size, info);
        }
        if self.code_ap == 0 || self.code_ap + size > self.code_ep {
            let page = segments.map_code(PAGE_SIZE, info)?;
            self.code_ap = page;
            self.code_ep = page + PAGE_SIZE;
        }
        let ap = self.code_ap;
        self.code_ap += size;
        Ok(ap)
    }

    fn map_nursery(&mut self, segments: &mut Segments, size: usize) -> Result<(), HeapError> {
        let total = size + NURSERY_SLACK_PAGES * PAGE_SIZE;
        let base = segments.map(total, PageInfo::mixed())?;
        self.heap_base = base;
        self.heap_size = total;
        self.allocation_pointer = base;
        self.allocation_redline = base + size;
        log::trace!("nursery at {:#x} ({} bytes)", base, size);
        Ok(())
    }

    /// Empties the allocation windows once their contents have been evacuated.
    pub(crate) fn reset_after_collection(&mut self) {
        self.allocation_pointer = self.heap_base;
        self.weak_pairs_ap = 0;
        self.weak_pairs_ep = 0;
        self.code_ap = 0;
        self.code_ep = 0;
    }

    pub(crate) fn release_retired(&mut self, segments: &mut Segments) -> usize {
        let count = self.heap_pages.len();
        for region in self.heap_pages.drain(..) {
            segments.unmap(region.base, region.size);
        }
        count
    }

    /// Replaces the nursery with one that has at least `required` bytes free.
    pub(crate) fn resize_nursery(
        &mut self,
        segments: &mut Segments,
        required: usize,
    ) -> Result<(), HeapError> {
        segments.unmap(self.heap_base, self.heap_size);
        self.map_nursery(segments, align_usize(required.max(1), PAGE_SIZE))?;
        log::debug!(
            "nursery resized to {} bytes at {:#x}",
            self.allocation_redline - self.heap_base,
            self.heap_base
        );
        Ok(())
    }
}
