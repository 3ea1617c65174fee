//! Code objects: moving them and keeping their embedded references current.
//!
//! ```text
//! +----------+-------------+--------------+-----------+--------------------+
//! | CODE_TAG | fixnum size | reloc vector | free vars | instructions ...   |
//! +----------+-------------+--------------+-----------+--------------------+
//!                                                     ^ entry
//! ```
//!
//! Entry points are raw addresses that look like fixnums, so they survive
//! tracing untouched and are rewritten explicitly. The relocation vector
//! lists every place in the instruction stream that embeds an object.
use std::convert::TryFrom;
use std::ptr::copy_nonoverlapping;

use crate::arena::{ArenaKind, ScanRange};
use crate::collector::Collector;
use crate::error::{fatal, FatalError};
use crate::globals::*;
use crate::header::*;
use crate::page::{DirtyWord, Family, PageInfo};
use crate::value::*;
use crate::{align_object, align_usize};

pub const RELOC_OBJECT: usize = 0;
pub const RELOC_FOREIGN: usize = 1;
pub const RELOC_DISPLACED: usize = 2;
pub const RELOC_RELATIVE: usize = 3;
const RELOC_TAG_BITS: usize = 2;
const RELOC_TAG_MASK: usize = (1 << RELOC_TAG_BITS) - 1;

/// One relocation vector entry. Offsets are relative to the code entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relocation {
    /// The word at `offset` holds `target`.
    Object { offset: usize, target: Value },
    /// The word at `offset` holds `target + displacement`.
    Displaced {
        offset: usize,
        displacement: isize,
        target: Value,
    },
    /// The 32-bit field at `offset` holds the distance from the end of the
    /// field to `target + displacement`.
    Relative {
        offset: usize,
        displacement: isize,
        target: Value,
    },
    /// Foreign call site; the instruction is left alone.
    Foreign { offset: usize, name: Value },
}

impl Relocation {
    fn entry(offset: usize, tag: usize) -> Value {
        Value::fixnum(((offset << RELOC_TAG_BITS) | tag) as isize)
    }

    pub fn encode(&self, out: &mut Vec<Value>) {
        match *self {
            Relocation::Object { offset, target } => {
                out.push(Self::entry(offset, RELOC_OBJECT));
                out.push(target);
            }
            Relocation::Displaced {
                offset,
                displacement,
                target,
            } => {
                out.push(Self::entry(offset, RELOC_DISPLACED));
                out.push(Value::fixnum(displacement));
                out.push(target);
            }
            Relocation::Relative {
                offset,
                displacement,
                target,
            } => {
                out.push(Self::entry(offset, RELOC_RELATIVE));
                out.push(Value::fixnum(displacement));
                out.push(target);
            }
            Relocation::Foreign { offset, name } => {
                out.push(Self::entry(offset, RELOC_FOREIGN));
                out.push(name);
            }
        }
    }
}

/// Size of the code object at `base`, padding included.
pub(crate) unsafe fn code_object_size(base: usize) -> usize {
    let size = load(base + OFF_CODE_SIZE);
    match size.as_fixnum() {
        Some(n) if n >= 0 => align_object(DISP_CODE_DATA + n as usize),
        _ => fatal(FatalError::InvalidCodeObject {
            entry: base + DISP_CODE_DATA,
            first: size.raw(),
        }),
    }
}

/// Rewrites every instruction field named by `reloc` for the code object at
/// `base`. `resolve` receives the vector slot holding each referenced object
/// and returns the value to embed.
pub(crate) unsafe fn patch_code<F>(base: usize, reloc: Value, mut resolve: F)
where
    F: FnMut(usize, Value) -> Value,
{
    let length = match load(reloc.address() + OFF_VECTOR_LENGTH).as_fixnum() {
        Some(n) if n >= 0 && reloc.tag() == Tag::Vector => n as usize,
        _ => fatal(FatalError::InvalidRelocationVector(reloc)),
    };
    let data = reloc.address() + OFF_VECTOR_DATA;
    let instructions = base + DISP_CODE_DATA;
    let mut i = 0;
    while i < length {
        let slot = data + i * WORD_SIZE;
        let entry = load(slot);
        let r = match entry.as_fixnum() {
            Some(r) => r as usize,
            None => fatal(FatalError::InvalidRelocationTag {
                tag: entry.raw() & FIXNUM_MASK,
                entry: entry.raw(),
            }),
        };
        let field = instructions + (r >> RELOC_TAG_BITS);
        let fixnum_at = |k: usize| load(slot + k * WORD_SIZE).as_fixnum().unwrap_or(0);
        match r & RELOC_TAG_MASK {
            RELOC_OBJECT => {
                let object = resolve(slot + WORD_SIZE, load(slot + WORD_SIZE));
                (field as *mut usize).write_unaligned(object.raw());
                i += 2;
            }
            RELOC_DISPLACED => {
                let displacement = fixnum_at(1);
                let object = resolve(slot + 2 * WORD_SIZE, load(slot + 2 * WORD_SIZE));
                (field as *mut usize).write_unaligned((object.raw() as isize + displacement) as usize);
                i += 3;
            }
            RELOC_RELATIVE => {
                let displacement = fixnum_at(1);
                let object = resolve(slot + 2 * WORD_SIZE, load(slot + 2 * WORD_SIZE));
                let target = object.raw() as isize + displacement;
                let next = (field + 4) as isize;
                let distance = target - next;
                let distance = match i32::try_from(distance) {
                    Ok(distance) => distance,
                    Err(_) => fatal(FatalError::DisplacementOverflow(distance)),
                };
                (field as *mut i32).write_unaligned(distance);
                i += 3;
            }
            RELOC_FOREIGN => i += 2,
            tag => fatal(FatalError::InvalidRelocationTag {
                tag,
                entry: entry.raw(),
            }),
        }
    }
}

impl<'h> Collector<'h> {
    /// New entry address of the code object whose entry is `entry`.
    ///
    /// Small code objects are copied into the code arena. Objects of a page
    /// or more are promoted where they are by retagging their pages.
    pub(crate) fn relocate_code_entry(&mut self, entry: usize) -> usize {
        let x = Value::tagged(entry - DISP_CODE_DATA, Tag::Vector);
        let info = self.page_of(x);
        if !self.is_from_space(info) {
            return entry;
        }
        let base = x.address();
        let first = match unsafe { Header::load(x) } {
            Header::Forwarded(to) => return to.address() + DISP_CODE_DATA,
            Header::Word(first) => first,
        };
        if first.raw() != CODE_TAG {
            fatal(FatalError::InvalidCodeObject {
                entry,
                first: first.raw(),
            });
        }
        let generation = info.generation();
        let required = unsafe { code_object_size(base) };
        if required >= PAGE_SIZE {
            let first_page = (base - self.segments.base()) >> PAGE_SHIFT;
            let pages = align_usize(required, PAGE_SIZE) / PAGE_SIZE;
            self.segments.reclassify(
                first_page,
                PageInfo::promoted(Family::Code, generation),
                DirtyWord::CLEAN,
            );
            for page in first_page + 1..first_page + pages {
                self.segments.reclassify(
                    page,
                    PageInfo::promoted(Family::Data, generation),
                    DirtyWord::CLEAN,
                );
            }
            self.arenas.push_queue(
                ArenaKind::Code,
                ScanRange {
                    start: base,
                    end: base + required,
                },
            );
            self.counters.code_promoted_in_place += 1;
            log::trace!("promoted code at {:#x} ({} bytes) in place", base, required);
            return entry;
        }
        let y = self
            .arenas
            .allocate_code(self.segments, required, generation)
            .unwrap_or_else(|e| fatal(e.into()));
        self.counters.code_objects += 1;
        self.counters.bytes_promoted += required;
        unsafe {
            copy_nonoverlapping(base as *const u8, y as *mut u8, required);
            install_forward(x, Value::tagged(y, Tag::Vector));
        }
        y + DISP_CODE_DATA
    }

    /// Traces the relocation vector of the to-space code object at `base` and
    /// patches its instructions. Returns the card code of everything the
    /// object references.
    pub(crate) fn relocate_new_code(&mut self, base: usize) -> u32 {
        let reloc = unsafe { load(base + OFF_CODE_RELOC_VECTOR) };
        let reloc = self.trace(reloc);
        unsafe { store(base + OFF_CODE_RELOC_VECTOR, reloc) };
        if reloc.tag() != Tag::Vector {
            fatal(FatalError::InvalidRelocationVector(reloc));
        }
        let reloc_info = self.page_of(reloc);
        let old_vector = !reloc_info.fresh() && reloc_info.generation() > self.target;
        let mut code = reloc_info.generation().card_code();
        unsafe {
            patch_code(base, reloc, |slot, old| {
                let new = self.trace(old);
                if new != old {
                    store(slot, new);
                    if old_vector {
                        self.segments.remember(slot, new);
                    }
                }
                code |= self.card_code_of(new);
                new
            });
        }
        code
    }

    pub(crate) fn card_code_of(&self, value: Value) -> u32 {
        if value.is_pointer() {
            self.page_of(value).generation().card_code()
        } else {
            0
        }
    }

    /// Relocates every code object laid out in `range`. A zero word ends
    /// the code on its page.
    pub(crate) fn relocate_code_range(&mut self, range: ScanRange) {
        let mut p = range.start;
        while p < range.end {
            let first = unsafe { load(p) };
            if first.raw() == 0 {
                p = align_usize(p + 1, PAGE_SIZE);
                continue;
            }
            if first.raw() != CODE_TAG {
                fatal(FatalError::InvalidCodeObject {
                    entry: p + DISP_CODE_DATA,
                    first: first.raw(),
                });
            }
            self.relocate_new_code(p);
            p += unsafe { code_object_size(p) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Words([usize; 16]);

    #[test]
    fn entries_pack_offset_and_tag() {
        let target = Value::tagged(0x8000, Tag::String);
        let mut out = Vec::new();
        Relocation::Object { offset: 8, target }.encode(&mut out);
        Relocation::Foreign { offset: 3, name: target }.encode(&mut out);
        Relocation::Relative {
            offset: 16,
            displacement: -4,
            target,
        }
        .encode(&mut out);
        assert_eq!(out.len(), 7);
        assert_eq!(out[0], Value::fixnum(8 << 2));
        assert_eq!(out[1], target);
        assert_eq!(out[2], Value::fixnum(((3 << 2) | RELOC_FOREIGN) as isize));
        assert_eq!(out[4], Value::fixnum(((16 << 2) | RELOC_RELATIVE) as isize));
        assert_eq!(out[5], Value::fixnum(-4));
    }

    #[test]
    fn patch_rewrites_object_fields() {
        let mut code = Words([0; 16]);
        let mut vector = Words([0; 16]);
        let base = code.0.as_mut_ptr() as usize;
        let target = Value::tagged(0x10_0000, Tag::String);
        let moved = Value::tagged(0x20_0000, Tag::String);

        let mut entries = Vec::new();
        Relocation::Object { offset: 0, target }.encode(&mut entries);
        Relocation::Displaced {
            offset: 8,
            displacement: 5,
            target,
        }
        .encode(&mut entries);
        Relocation::Foreign { offset: 16, name: target }.encode(&mut entries);
        vector.0[0] = Value::fixnum(entries.len() as isize).raw();
        for (i, entry) in entries.iter().enumerate() {
            vector.0[i + 1] = entry.raw();
        }
        let vbase = vector.0.as_mut_ptr() as usize;
        let reloc = Value::tagged(vbase, Tag::Vector);

        let mut slots = Vec::new();
        unsafe {
            patch_code(base, reloc, |slot, old| {
                assert_eq!(old, target);
                slots.push(slot);
                moved
            });
        }
        assert_eq!(slots, vec![vbase + 2 * WORD_SIZE, vbase + 5 * WORD_SIZE]);
        assert_eq!(code.0[4], moved.raw());
        assert_eq!(code.0[5], moved.raw() + 5);
        assert_eq!(code.0[6], 0);
    }

    #[test]
    fn code_size_includes_header_and_padding() {
        let mut code = Words([0; 16]);
        code.0[0] = CODE_TAG;
        code.0[1] = Value::fixnum(17).raw();
        let base = code.0.as_mut_ptr() as usize;
        assert_eq!(unsafe { code_object_size(base) }, 64);
    }
}
