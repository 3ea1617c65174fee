use std::io;

use thiserror::Error;

use crate::page::PageInfo;
use crate::value::Value;

/// Recoverable failures of the page layer.
#[derive(Debug, Error)]
pub enum HeapError {
    #[error("failed to reserve {size} bytes of address space: {source}")]
    Reserve {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to map the dirty vector: {0}")]
    CardTable(#[source] io::Error),
    #[error("heap reservation exhausted: no run of {pages} free pages")]
    OutOfPages { pages: usize },
    #[error("cannot protect code pages at {address:#x}: {source}")]
    Protect {
        address: usize,
        #[source]
        source: io::Error,
    },
}

/// Heap corruption found while collecting. None of these can be recovered from.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("invalid return point offset {offset} at rp {rp:#x}")]
    InvalidReturnPoint { rp: usize, offset: isize },
    #[error("invalid frame size {size} at rp {rp:#x}")]
    InvalidFrameSize { rp: usize, size: isize },
    #[error("invalid redirected frame size {size} in frame {frame:#x}")]
    InvalidIndirectFrameSize { frame: usize, size: isize },
    #[error("frames did not match up {top:#x} .. {end:#x}")]
    FrameMismatch { top: usize, end: usize },
    #[error("forwarding marker found in a traced slot")]
    ForwardMarkerTraced,
    #[error("unhandled vector {object:?} with first word {first:#x}")]
    UnknownVectorHeader { object: Value, first: usize },
    #[error("unhandled string {object:?} with first word {first:#x}")]
    InvalidStringHeader { object: Value, first: usize },
    #[error("invalid record length {length:?} in type descriptor {rtd:?}")]
    InvalidRecordLength { rtd: Value, length: Value },
    #[error("invalid closure free variable count {count:?} in code at {entry:#x}")]
    InvalidFreeVariableCount { entry: usize, count: Value },
    #[error("invalid code object at entry {entry:#x} with first word {first:#x}")]
    InvalidCodeObject { entry: usize, first: usize },
    #[error("invalid relocation tag {tag} in entry {entry:#x}")]
    InvalidRelocationTag { tag: usize, entry: usize },
    #[error("relocation vector {0:?} is not a vector")]
    InvalidRelocationVector(Value),
    #[error("relative displacement {0:#x} does not fit in 32 bits")]
    DisplacementOverflow(isize),
    #[error("pointer {0:?} lies outside of the heap")]
    OutOfHeap(Value),
    #[error("pointer {0:?} refers to an unmapped page")]
    Dangling(Value),
    #[error("unhandled scan of page {page} ({info:?})")]
    UnscannablePage { page: usize, info: PageInfo },
    #[error(transparent)]
    Heap(#[from] HeapError),
}

/// Reports `error` with a backtrace and aborts the collection.
#[cold]
#[inline(never)]
pub fn fatal(error: FatalError) -> ! {
    let backtrace = backtrace::Backtrace::new();
    log::error!("{}\n{:?}", error, backtrace);
    panic!("collector: {}", error)
}
