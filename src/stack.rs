//! Frame descriptors and the stack walker.
//!
//! Every non-tail call site is followed by a return point. The compiler
//! emits the frame's metadata right before the call instruction, at fixed
//! negative displacements from the return address:
//!
//! ```text
//!     +--------------------+
//!     | live mask byte 0   |  rp - 29 - mask bytes
//!     | ...                |
//!     +--------------------+
//!     | frame size         |  rp - 29, raw bytes; 0 = stored in the frame
//!     | multivalue rp      |  rp - 21
//!     | frame offset       |  rp - 13, fixnum: (rp - entry) - 13
//!     | call instruction   |  rp - 5
//!     +--------------------+  <- rp
//! ```
//!
//! A frame occupies `frame size` bytes starting at its return-point slot.
//! Mask bit `j` covers the slot `j + 1` words below the end of the frame;
//! the last bit would cover the return-point slot itself and is ignored.
use crate::error::{fatal, FatalError};
use crate::globals::*;
use crate::value::*;
use crate::collector::Collector;

pub const DISP_FRAME_OFFSET: isize = -13;
pub const DISP_MULTIVALUE_RP: isize = -21;
pub const DISP_FRAME_SIZE: isize = -29;
pub const CALL_INSTRUCTION_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReturnPoint(pub usize);

impl ReturnPoint {
    #[inline]
    unsafe fn word(self, displacement: isize) -> usize {
        ((self.0 as isize + displacement) as *const usize).read_unaligned()
    }

    /// Fixnum distance from the code entry, biased by [`DISP_FRAME_OFFSET`].
    pub unsafe fn frame_offset(self) -> Value {
        Value::from_raw(self.word(DISP_FRAME_OFFSET))
    }

    pub unsafe fn multivalue_rp(self) -> usize {
        self.word(DISP_MULTIVALUE_RP)
    }

    pub unsafe fn frame_size(self) -> isize {
        self.word(DISP_FRAME_SIZE) as isize
    }

    /// Bit `j` of the live mask of a frame with `cells` words.
    pub unsafe fn is_live(self, cells: usize, j: usize) -> bool {
        let bytes = (cells + 7) / 8;
        let mask = (self.0 as isize + DISP_FRAME_SIZE) as usize - bytes;
        ((mask + j / 8) as *const u8).read() & (1 << (j % 8)) != 0
    }
}

/// Appends the descriptor of a call site followed by a call instruction to
/// `code` and returns the offset of the return point.
///
/// `live` lists frame slots by word index from the return-point slot, which
/// is slot 0. A `frame_size` of zero declares a frame that stores its size
/// in slot 1; all of its slots are then live.
pub fn emit_return_point(code: &mut Vec<u8>, frame_size: usize, live: &[usize]) -> usize {
    let cells = frame_size / WORD_SIZE;
    let mut mask = vec![0u8; (cells + 7) / 8];
    for &slot in live {
        assert!(slot > 0 && slot < cells, "slot {} outside frame", slot);
        let j = cells - 1 - slot;
        mask[j / 8] |= 1 << (j % 8);
    }
    code.extend_from_slice(&mask);
    code.extend_from_slice(&frame_size.to_ne_bytes());
    code.extend_from_slice(&0usize.to_ne_bytes());
    let rp = code.len() + WORD_SIZE + CALL_INSTRUCTION_SIZE;
    let offset = Value::fixnum(rp as isize + DISP_FRAME_OFFSET);
    code.extend_from_slice(&offset.raw().to_ne_bytes());
    code.extend_from_slice(&[0xE8, 0, 0, 0, 0]);
    debug_assert_eq!(code.len(), rp);
    rp
}

impl<'h> Collector<'h> {
    /// Walks the frames in `[top, end)`. Each return point follows its code
    /// object and each live slot is traced. The walk must end exactly at `end`.
    pub fn collect_stack(&mut self, mut top: usize, end: usize) {
        log::trace!("collecting frames {:#x} .. {:#x}", top, end);
        while top < end {
            let rp = unsafe { load(top).raw() };
            let point = ReturnPoint(rp);
            let rp_offset = unsafe { point.frame_offset() };
            let rp_offset = match rp_offset.as_fixnum() {
                Some(offset) if offset > 0 => offset,
                _ => fatal(FatalError::InvalidReturnPoint {
                    rp,
                    offset: rp_offset.raw() as isize,
                }),
            };
            let code_offset = (rp_offset - DISP_FRAME_OFFSET) as usize;
            let entry = rp - code_offset;
            let new_entry = self.relocate_code_entry(entry);
            unsafe { store(top, Value::from_raw(new_entry + code_offset)) };

            let frame_size = match unsafe { point.frame_size() } {
                0 => self.trace_indirect_frame(top),
                size if size < 0 || size as usize % WORD_SIZE != 0 => {
                    fatal(FatalError::InvalidFrameSize { rp, size })
                }
                size => {
                    self.trace_masked_frame(point, top, size as usize);
                    size as usize
                }
            };
            top += frame_size;
        }
        if top != end {
            fatal(FatalError::FrameMismatch { top, end });
        }
    }

    fn trace_indirect_frame(&mut self, top: usize) -> usize {
        let size = unsafe { load(top + WORD_SIZE).raw() as isize };
        if size <= 0 || size as usize % WORD_SIZE != 0 {
            fatal(FatalError::InvalidIndirectFrameSize { frame: top, size });
        }
        let size = size as usize;
        let mut slot = top + size - WORD_SIZE;
        while slot > top {
            unsafe {
                let v = self.trace(load(slot));
                store(slot, v);
            }
            slot -= WORD_SIZE;
        }
        size
    }

    fn trace_masked_frame(&mut self, point: ReturnPoint, top: usize, size: usize) {
        let cells = size / WORD_SIZE;
        for j in 0..cells.saturating_sub(1) {
            if unsafe { point.is_live(cells, j) } {
                let slot = top + size - (j + 1) * WORD_SIZE;
                unsafe {
                    let v = self.trace(load(slot));
                    store(slot, v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_readable_from_return_point() {
        let mut code = vec![0x90u8; 40];
        let rp = emit_return_point(&mut code, 12 * WORD_SIZE, &[1, 2, 11]);
        assert_eq!(rp, code.len());
        assert_eq!(rp, 40 + 2 + 29);
        let point = ReturnPoint(code.as_ptr() as usize + rp);
        unsafe {
            assert_eq!(point.frame_size(), 12 * WORD_SIZE as isize);
            assert_eq!(point.multivalue_rp(), 0);
            assert_eq!(
                point.frame_offset().as_fixnum(),
                Some(rp as isize + DISP_FRAME_OFFSET)
            );
            let live: Vec<usize> = (0..11).filter(|&j| point.is_live(12, j)).collect();
            // slot i is covered by bit 11 - i
            assert_eq!(live, vec![0, 9, 10]);
        }
    }

    #[test]
    fn indirect_frames_have_no_mask() {
        let mut code = Vec::new();
        let rp = emit_return_point(&mut code, 0, &[]);
        assert_eq!(rp, 29);
        let point = ReturnPoint(code.as_ptr() as usize + rp);
        unsafe {
            assert_eq!(point.frame_size(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "outside frame")]
    fn return_point_slot_cannot_be_live() {
        emit_return_point(&mut Vec::new(), 4 * WORD_SIZE, &[0]);
    }
}
