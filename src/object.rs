//! Mutator-side object construction, field access and the write barrier.
//!
//! Constructors allocate from the nursery (code from gen-0 code pages, weak
//! pairs from gen-0 weak pages) and never collect. Field stores into
//! existing objects go through [`Heap::set_field`], which records the card.
use std::ptr::copy_nonoverlapping;

use crate::code::{patch_code, Relocation};
use crate::error::fatal;
use crate::globals::*;
use crate::header::*;
use crate::heap::Heap;
use crate::value::*;
use crate::align_object;

impl Heap {
    fn allocate(&mut self, size: usize) -> usize {
        self.pcb
            .alloc(&mut self.segments, size)
            .unwrap_or_else(|e| fatal(e.into()))
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        let p = self.allocate(PAIR_SIZE);
        unsafe {
            store(p + OFF_CAR, car);
            store(p + OFF_CDR, cdr);
        }
        Value::tagged(p, Tag::Pair)
    }

    /// A pair whose car does not keep its referent alive.
    pub fn weak_cons(&mut self, car: Value, cdr: Value) -> Value {
        let p = self
            .pcb
            .alloc_weak_pair(&mut self.segments)
            .unwrap_or_else(|e| fatal(e.into()));
        unsafe {
            store(p + OFF_CAR, car);
            store(p + OFF_CDR, cdr);
        }
        Value::tagged(p, Tag::Pair)
    }

    pub fn list(&mut self, items: &[Value]) -> Value {
        items
            .iter()
            .rev()
            .fold(Value::NULL, |tail, &item| self.cons(item, tail))
    }

    pub fn make_vector(&mut self, length: usize, fill: Value) -> Value {
        let size = OFF_VECTOR_DATA + length * WORD_SIZE;
        let p = self.allocate(size);
        unsafe {
            store(p + align_object(size) - WORD_SIZE, Value::fixnum(0));
            store(p + OFF_VECTOR_LENGTH, Value::fixnum(length as isize));
            for i in 0..length {
                store(p + OFF_VECTOR_DATA + i * WORD_SIZE, fill);
            }
        }
        Value::tagged(p, Tag::Vector)
    }

    pub fn vector_from(&mut self, items: &[Value]) -> Value {
        let v = self.make_vector(items.len(), Value::fixnum(0));
        for (i, &item) in items.iter().enumerate() {
            unsafe { store(v.address() + OFF_VECTOR_DATA + i * WORD_SIZE, item) };
        }
        v
    }

    pub fn make_string(&mut self, text: &str) -> Value {
        let bytes = text.as_bytes();
        let p = self.allocate(OFF_STRING_DATA + bytes.len() + 1);
        unsafe {
            store(p + OFF_STRING_LENGTH, Value::fixnum(bytes.len() as isize));
            let data = (p + OFF_STRING_DATA) as *mut u8;
            copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
            data.add(bytes.len()).write(0);
        }
        Value::tagged(p, Tag::String)
    }

    pub fn make_symbol(&mut self, name: Value) -> Value {
        let p = self.allocate(SYMBOL_SIZE);
        unsafe {
            store(p + OFF_SYMBOL_STRING, name);
            store(p + OFF_SYMBOL_USTRING, Value::FALSE);
            store(p + OFF_SYMBOL_VALUE, Value::UNBOUND);
            store(p + OFF_SYMBOL_PLIST, Value::NULL);
            store(p + OFF_SYMBOL_SYSTEM_VALUE, Value::UNBOUND);
            store(p + OFF_SYMBOL_SYSTEM_PLIST, Value::NULL);
        }
        Value::tagged(p, Tag::Symbol)
    }

    /// The descriptor of all record type descriptors; it describes itself.
    pub fn make_base_rtd(&mut self, name: Value) -> Value {
        let p = self.allocate(OFF_RECORD_DATA + RTD_FIELD_COUNT * WORD_SIZE);
        let rtd = Value::tagged(p, Tag::Vector);
        unsafe {
            store(p + OFF_RECORD_RTD, rtd);
            store(p + OFF_RTD_NAME, name);
            store(p + OFF_RTD_LENGTH, Value::fixnum(RTD_FIELD_COUNT as isize));
            store(p + OFF_RTD_FIELDS, Value::FALSE);
        }
        rtd
    }

    pub fn make_rtd(&mut self, base: Value, name: Value, field_count: usize) -> Value {
        let p = self.allocate(OFF_RECORD_DATA + RTD_FIELD_COUNT * WORD_SIZE);
        unsafe {
            store(p + OFF_RECORD_RTD, base);
            store(p + OFF_RTD_NAME, name);
            store(p + OFF_RTD_LENGTH, Value::fixnum(field_count as isize));
            store(p + OFF_RTD_FIELDS, Value::FALSE);
        }
        Value::tagged(p, Tag::Vector)
    }

    pub fn make_record(&mut self, rtd: Value, fields: &[Value]) -> Value {
        let count = unsafe { rtd.field(OFF_RTD_LENGTH).as_fixnum() };
        assert_eq!(count, Some(fields.len() as isize), "record field count");
        let size = OFF_RECORD_DATA + fields.len() * WORD_SIZE;
        let p = self.allocate(size);
        unsafe {
            store(p + align_object(size) - WORD_SIZE, Value::fixnum(0));
            store(p + OFF_RECORD_RTD, rtd);
            for (i, &field) in fields.iter().enumerate() {
                store(p + OFF_RECORD_DATA + i * WORD_SIZE, field);
            }
        }
        Value::tagged(p, Tag::Vector)
    }

    /// Installs `instructions` as a code object and patches in the objects
    /// named by `relocations`.
    pub fn make_code(
        &mut self,
        instructions: &[u8],
        free_variables: usize,
        relocations: &[Relocation],
    ) -> Value {
        let mut entries = Vec::new();
        for relocation in relocations {
            relocation.encode(&mut entries);
        }
        let reloc = self.vector_from(&entries);
        let size = align_object(DISP_CODE_DATA + instructions.len());
        let base = self
            .pcb
            .alloc_code(&mut self.segments, size)
            .unwrap_or_else(|e| fatal(e.into()));
        unsafe {
            store(base, Value::from_raw(CODE_TAG));
            store(base + OFF_CODE_SIZE, Value::fixnum(instructions.len() as isize));
            store(base + OFF_CODE_RELOC_VECTOR, reloc);
            store(base + OFF_CODE_FREEVARS, Value::fixnum(free_variables as isize));
            copy_nonoverlapping(
                instructions.as_ptr(),
                (base + DISP_CODE_DATA) as *mut u8,
                instructions.len(),
            );
            patch_code(base, reloc, |_, object| object);
        }
        Value::tagged(base, Tag::Vector)
    }

    pub fn make_closure(&mut self, code: Value, free: &[Value]) -> Value {
        let count = unsafe { code.field(OFF_CODE_FREEVARS).as_fixnum() };
        assert_eq!(count, Some(free.len() as isize), "closure free variable count");
        let size = OFF_CLOSURE_DATA + free.len() * WORD_SIZE;
        let p = self.allocate(size);
        unsafe {
            store(p + align_object(size) - WORD_SIZE, Value::fixnum(0));
            store(
                p + OFF_CLOSURE_CODE,
                Value::from_raw(code.address() + DISP_CODE_DATA),
            );
            for (i, &v) in free.iter().enumerate() {
                store(p + OFF_CLOSURE_DATA + i * WORD_SIZE, v);
            }
        }
        Value::tagged(p, Tag::Closure)
    }

    /// Captures the stack segment `[top, top + size)`. The segment must hold
    /// whole frames; it is copied into the heap when the continuation is
    /// first collected.
    pub fn make_continuation(&mut self, top: usize, size: usize, next: Value) -> Value {
        let p = self.allocate(CONTINUATION_SIZE);
        unsafe {
            store(p, Value::from_raw(CONTINUATION_TAG));
            store(p + OFF_CONTINUATION_TOP, Value::from_raw(top));
            store(p + OFF_CONTINUATION_SIZE, Value::from_raw(size));
            store(p + OFF_CONTINUATION_NEXT, next);
        }
        Value::tagged(p, Tag::Vector)
    }

    /// An empty tail-concatenation queue.
    pub fn make_tconc(&mut self) -> Value {
        let last = self.cons(Value::FALSE, Value::FALSE);
        self.cons(last, last)
    }

    pub fn make_bucket(&mut self, tconc: Value, key: Value, value: Value) -> Value {
        let p = self.allocate(TCBUCKET_SIZE);
        unsafe {
            store(p + OFF_TCBUCKET_TCONC, tconc);
            store(p + OFF_TCBUCKET_KEY, key);
            store(p + OFF_TCBUCKET_VAL, value);
            store(p + OFF_TCBUCKET_NEXT, Value::FALSE);
            store(p + OFF_TCBUCKET_DLINK_NEXT, Value::FALSE);
            store(p + OFF_TCBUCKET_DLINK_PREV, Value::FALSE);
        }
        Value::tagged(p, Tag::Vector)
    }

    pub fn make_port(&mut self, attributes: u64, fields: &[Value; PORT_SIZE / WORD_SIZE - 1]) -> Value {
        let p = self.allocate(PORT_SIZE);
        unsafe {
            store(p, PortHeader::encode(attributes));
            for (i, &field) in fields.iter().enumerate() {
                store(p + (i + 1) * WORD_SIZE, field);
            }
        }
        Value::tagged(p, Tag::Vector)
    }

    pub fn make_bignum(&mut self, negative: bool, limbs: &[usize]) -> Value {
        let size = OFF_BIGNUM_DATA + limbs.len() * WORD_SIZE;
        let p = self.allocate(size);
        unsafe {
            store(p, BignumHeader::encode(negative, limbs.len()));
            copy_nonoverlapping(
                limbs.as_ptr(),
                (p + OFF_BIGNUM_DATA) as *mut usize,
                limbs.len(),
            );
        }
        Value::tagged(p, Tag::Vector)
    }

    /// Stores `value` at `offset` bytes into `object` and records the write.
    pub fn set_field(&mut self, object: Value, offset: usize, value: Value) {
        let slot = object.address() + offset;
        unsafe { store(slot, value) };
        self.segments.record_write(slot);
    }

    /// Write barrier for a store the caller made itself.
    pub fn record_write(&mut self, slot: usize) {
        self.segments.record_write(slot);
    }

    pub fn set_car(&mut self, pair: Value, value: Value) {
        self.set_field(pair, OFF_CAR, value);
    }

    pub fn set_cdr(&mut self, pair: Value, value: Value) {
        self.set_field(pair, OFF_CDR, value);
    }

    pub fn vector_set(&mut self, vector: Value, index: usize, value: Value) {
        self.set_field(vector, OFF_VECTOR_DATA + index * WORD_SIZE, value);
    }

    pub fn set_symbol_value(&mut self, symbol: Value, value: Value) {
        self.set_field(symbol, OFF_SYMBOL_VALUE, value);
    }
}

/// Raw field access. Callers guarantee `self` is a live object of the
/// right kind.
impl Value {
    #[inline]
    pub unsafe fn field(self, offset: usize) -> Value {
        load(self.address() + offset)
    }

    pub unsafe fn header(self) -> Header {
        Header::load(self)
    }

    pub unsafe fn car(self) -> Value {
        self.field(OFF_CAR)
    }

    pub unsafe fn cdr(self) -> Value {
        self.field(OFF_CDR)
    }

    pub unsafe fn vector_length(self) -> usize {
        self.field(OFF_VECTOR_LENGTH).as_fixnum().unwrap_or(0) as usize
    }

    pub unsafe fn vector_ref(self, index: usize) -> Value {
        self.field(OFF_VECTOR_DATA + index * WORD_SIZE)
    }

    pub unsafe fn string_bytes<'a>(self) -> &'a [u8] {
        let length = self.field(OFF_STRING_LENGTH).as_fixnum().unwrap_or(0) as usize;
        std::slice::from_raw_parts((self.address() + OFF_STRING_DATA) as *const u8, length)
    }

    pub unsafe fn symbol_string(self) -> Value {
        self.field(OFF_SYMBOL_STRING)
    }

    pub unsafe fn symbol_value(self) -> Value {
        self.field(OFF_SYMBOL_VALUE)
    }

    pub unsafe fn closure_entry(self) -> usize {
        self.field(OFF_CLOSURE_CODE).raw()
    }

    /// The code object a closure runs.
    pub unsafe fn closure_code(self) -> Value {
        Value::tagged(self.closure_entry() - DISP_CODE_DATA, Tag::Vector)
    }

    pub unsafe fn closure_ref(self, index: usize) -> Value {
        self.field(OFF_CLOSURE_DATA + index * WORD_SIZE)
    }

    pub fn code_entry(self) -> usize {
        self.address() + DISP_CODE_DATA
    }

    pub unsafe fn code_instructions<'a>(self) -> &'a [u8] {
        let length = self.field(OFF_CODE_SIZE).as_fixnum().unwrap_or(0) as usize;
        std::slice::from_raw_parts(self.code_entry() as *const u8, length)
    }

    pub unsafe fn code_reloc_vector(self) -> Value {
        self.field(OFF_CODE_RELOC_VECTOR)
    }

    pub unsafe fn record_rtd(self) -> Value {
        self.field(OFF_RECORD_RTD)
    }

    pub unsafe fn record_ref(self, index: usize) -> Value {
        self.field(OFF_RECORD_DATA + index * WORD_SIZE)
    }

    pub unsafe fn bucket_tconc(self) -> Value {
        self.field(OFF_TCBUCKET_TCONC)
    }

    pub unsafe fn bucket_key(self) -> Value {
        self.field(OFF_TCBUCKET_KEY)
    }

    pub unsafe fn bucket_value(self) -> Value {
        self.field(OFF_TCBUCKET_VAL)
    }

    pub unsafe fn continuation_top(self) -> usize {
        self.field(OFF_CONTINUATION_TOP).raw()
    }

    pub unsafe fn continuation_size(self) -> usize {
        self.field(OFF_CONTINUATION_SIZE).raw()
    }

    pub unsafe fn continuation_next(self) -> Value {
        self.field(OFF_CONTINUATION_NEXT)
    }

    pub unsafe fn bignum_limbs<'a>(self) -> &'a [usize] {
        let header = BignumHeader::decode(self.field(0));
        std::slice::from_raw_parts(
            (self.address() + OFF_BIGNUM_DATA) as *const usize,
            header.length() as usize,
        )
    }
}
