use std::convert::TryFrom;

use crate::globals::*;
use crate::value::*;
use modular_bitfield::prelude::*;

// The first word of every vector-tagged object says what the object is.
//
// +----------------------+-------------------------------------------------+
// | first word           | object                                          |
// +----------------------+-------------------------------------------------+
// | fixnum n             | vector of n elements                            |
// | vector-tagged value  | record, the value is its type descriptor        |
// | 0x9F                 | code object                                     |
// | 0xAF                 | continuation                                    |
// | pair-tagged value    | tconc bucket, the value is its tconc            |
// | low byte 0xBF        | port, attributes in the upper bits              |
// | low byte 0xCF        | bignum, sign in bit 8 and length above bit 9    |
// +----------------------+-------------------------------------------------+
//
// A copied object has FORWARD_MARKER in its first word and the tagged new
// address in its second word. The marker is never a legal value.
pub const FORWARD_MARKER: usize = usize::MAX;
pub const CODE_TAG: usize = 0x9F;
pub const CONTINUATION_TAG: usize = 0xAF;
pub const PORT_TAG: usize = 0xBF;
pub const PORT_MASK: usize = 0xFF;
pub const BIGNUM_TAG: usize = 0xCF;
pub const BIGNUM_MASK: usize = 0xFF;

/// Bignum header word.
#[bitfield(bits = 64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BignumHeader {
    pub tag: B8,
    pub negative: bool,
    /// Number of limbs.
    pub length: B55,
}

impl BignumHeader {
    pub fn encode(negative: bool, length: usize) -> Value {
        let header = BignumHeader::new()
            .with_tag(BIGNUM_TAG as u8)
            .with_negative(negative)
            .with_length(length as u64);
        Value::from_raw(u64::from_le_bytes(header.into_bytes()) as usize)
    }

    pub fn decode(word: Value) -> Self {
        Self::from_bytes((word.raw() as u64).to_le_bytes())
    }
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortHeader {
    pub tag: B8,
    pub attributes: B56,
}

impl PortHeader {
    pub fn encode(attributes: u64) -> Value {
        let header = PortHeader::new()
            .with_tag(PORT_TAG as u8)
            .with_attributes(attributes);
        Value::from_raw(u64::from_le_bytes(header.into_bytes()) as usize)
    }

    pub fn decode(word: Value) -> Self {
        Self::from_bytes((word.raw() as u64).to_le_bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Header {
    Forwarded(Value),
    Word(Value),
}

impl Header {
    /// Reads the first word of the object `object` points to.
    #[inline]
    pub unsafe fn load(object: Value) -> Self {
        let base = object.address();
        let first = load(base);
        if first.raw() == FORWARD_MARKER {
            Header::Forwarded(load(base + WORD_SIZE))
        } else {
            Header::Word(first)
        }
    }
}

/// Replaces the first two words of `from` with a forwarding pair to `to`.
#[inline]
pub unsafe fn install_forward(from: Value, to: Value) {
    let base = from.address();
    store(base, Value::from_raw(FORWARD_MARKER));
    store(base + WORD_SIZE, to);
}

/// Decoded first word of a vector-tagged object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorLike {
    Vector { length: usize },
    Record { rtd: Value },
    Code,
    Continuation,
    Bucket { tconc: Value },
    Port(PortHeader),
    Bignum(BignumHeader),
}

impl VectorLike {
    pub fn decode(first: Value) -> Option<Self> {
        if let Some(length) = first.as_fixnum() {
            return usize::try_from(length)
                .ok()
                .map(|length| VectorLike::Vector { length });
        }
        match first.primary_tag() {
            VECTOR_TAG => return Some(VectorLike::Record { rtd: first }),
            PAIR_TAG => return Some(VectorLike::Bucket { tconc: first }),
            _ => {}
        }
        let raw = first.raw();
        if raw == CODE_TAG {
            Some(VectorLike::Code)
        } else if raw == CONTINUATION_TAG {
            Some(VectorLike::Continuation)
        } else if raw & PORT_MASK == PORT_TAG {
            Some(VectorLike::Port(PortHeader::decode(first)))
        } else if raw & BIGNUM_MASK == BIGNUM_TAG {
            Some(VectorLike::Bignum(BignumHeader::decode(first)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bignum_header_layout() {
        let word = BignumHeader::encode(true, 3);
        assert_eq!(word.raw() & BIGNUM_MASK, BIGNUM_TAG);
        assert_eq!(word.raw() >> 9, 3);
        assert_eq!(word.raw() & (1 << 8), 1 << 8);
        match VectorLike::decode(word) {
            Some(VectorLike::Bignum(h)) => {
                assert!(h.negative());
                assert_eq!(h.length(), 3);
            }
            other => panic!("decoded {:?}", other),
        }
    }

    #[test]
    fn decode_dispatches_on_first_word() {
        assert_eq!(
            VectorLike::decode(Value::fixnum(4)),
            Some(VectorLike::Vector { length: 4 })
        );
        assert_eq!(VectorLike::decode(Value::fixnum(-1)), None);
        assert_eq!(
            VectorLike::decode(Value::from_raw(CODE_TAG)),
            Some(VectorLike::Code)
        );
        assert_eq!(
            VectorLike::decode(Value::from_raw(CONTINUATION_TAG)),
            Some(VectorLike::Continuation)
        );
        let rtd = Value::tagged(0x4000, crate::value::Tag::Vector);
        assert_eq!(VectorLike::decode(rtd), Some(VectorLike::Record { rtd }));
        let tconc = Value::tagged(0x4000, crate::value::Tag::Pair);
        assert_eq!(
            VectorLike::decode(tconc),
            Some(VectorLike::Bucket { tconc })
        );
        match VectorLike::decode(PortHeader::encode(0x12)) {
            Some(VectorLike::Port(h)) => assert_eq!(h.attributes(), 0x12),
            other => panic!("decoded {:?}", other),
        }
        assert_eq!(VectorLike::decode(Value::from_raw(0xDF)), None);
        assert_eq!(VectorLike::decode(Value::FALSE), None);
    }
}
