//! Generational copying collector for a tagged Scheme-style heap.
//!
//! Objects live in 4 KiB pages carved out of one address-space reservation.
//! Each page carries a generation, an object family and a dirty word, see
//! [`page`]. A collection of generation `g` evacuates every reachable object
//! of generations `0..=g` into fresh pages of generation `g + 1`, following
//! roots in the control block, frames on the stack and cards recorded by the
//! write barrier.
#[cfg(not(all(unix, target_pointer_width = "64")))]
compile_error!("scavenger supports 64-bit unix targets only");

pub mod arena;
pub mod barrier;
pub mod card_table;
pub mod code;
pub mod collector;
pub mod control;
pub mod error;
pub mod fixpoint;
pub mod globals;
pub mod header;
pub mod heap;
pub mod lifecycle;
pub mod mmap;
pub mod object;
pub mod page;
pub mod segment;
pub mod stack;
pub mod statistics;
pub mod tconc;
pub mod value;
pub mod weak;


pub use code::Relocation;
pub use control::ControlBlock;
pub use heap::Heap;
pub use page::Generation;
pub use value::Value;

/// rounds the given value `value` up to the nearest multiple
/// of `align`, which must be a power of two
#[inline(always)]
pub const fn align_usize(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Rounds an object size up to the object alignment.
#[inline(always)]
pub const fn align_object(size: usize) -> usize {
    align_usize(size, globals::OBJECT_ALIGNMENT)
}

/// Configuration for heap constructor.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Address space reserved for the whole heap. Every page comes from here.
    pub reservation: usize,
    /// Bytes the mutator may allocate between collections
    pub nursery_size: usize,
    /// Enables verbose printing
    pub verbose: bool,
    /// Map code pages executable. Turn off where W^X policies forbid it.
    pub executable_code: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reservation: globals::DEFAULT_RESERVATION,
            nursery_size: globals::DEFAULT_NURSERY_SIZE,
            verbose: false,
            executable_code: true,
        }
    }
}

pub mod c_api {
    use std::ptr::null_mut;

    use crate::{control::ControlBlock, heap::Heap, page::Generation, Config};

    #[no_mangle]
    pub extern "C" fn scavenger_default_config() -> Config {
        Config::default()
    }

    /// Returns null when the reservation cannot be made.
    #[no_mangle]
    pub extern "C" fn scavenger_heap_create(config: Config) -> *mut Heap {
        match Heap::new(config) {
            Ok(heap) => Box::into_raw(heap),
            Err(e) => {
                log::error!("cannot create heap: {}", e);
                null_mut()
            }
        }
    }

    /// Free scavenger heap
    #[no_mangle]
    pub extern "C" fn scavenger_heap_free(heap: *mut Heap) {
        unsafe {
            drop(Box::from_raw(heap));
        }
    }

    #[no_mangle]
    pub extern "C" fn scavenger_control_block(heap: *mut Heap) -> *mut ControlBlock {
        unsafe { (*heap).control_mut() as *mut _ }
    }

    /// Collects and guarantees `request` free bytes in the nursery.
    #[no_mangle]
    pub extern "C" fn scavenger_collect(heap: *mut Heap, request: usize) -> *mut ControlBlock {
        unsafe { (*heap).collect(request) as *mut _ }
    }

    /// Collects generations `0..=generation`; out-of-range values collect everything.
    #[no_mangle]
    pub extern "C" fn scavenger_collect_generation(
        heap: *mut Heap,
        request: usize,
        generation: usize,
    ) -> *mut ControlBlock {
        let target = Generation::from_index(generation).unwrap_or(Generation::Oldest);
        unsafe { (*heap).collect_generation(request, target) as *mut _ }
    }

    /// Write barrier for stores made outside of [`Heap::set_field`].
    #[no_mangle]
    pub extern "C" fn scavenger_record_write(heap: *mut Heap, slot: usize) {
        unsafe {
            (*heap).record_write(slot);
        }
    }

    /// Dirty vector base and heap base, for barriers inlined into generated
    /// code: the word of an address is `dirty[(address - base) >> 12]`.
    #[no_mangle]
    pub extern "C" fn scavenger_dirty_vector(heap: *mut Heap, base: *mut usize) -> *mut u32 {
        unsafe {
            if !base.is_null() {
                *base = (*heap).segments.base();
            }
            (*heap).segments.dirty_vector()
        }
    }
}
