//! Tagged machine words.
//!
//! The low bits of a word select its kind: fixnums have both low bits clear,
//! heap pointers carry a three-bit primary tag and everything tagged `7` is an
//! immediate constant.
use std::fmt;

pub const FIXNUM_MASK: usize = 3;
pub const FIXNUM_SHIFT: usize = 2;
pub const PRIMARY_MASK: usize = 7;

pub const PAIR_TAG: usize = 1;
pub const SYMBOL_TAG: usize = 2;
pub const CLOSURE_TAG: usize = 3;
pub const VECTOR_TAG: usize = 5;
pub const STRING_TAG: usize = 6;
pub const IMMEDIATE_TAG: usize = 7;

pub const CHAR_TAG: usize = 0x0F;
pub const CHAR_MASK: usize = 0xFF;
pub const CHAR_SHIFT: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Fixnum,
    Pair,
    Symbol,
    Closure,
    Vector,
    String,
    Immediate,
}

impl Tag {
    pub const fn bits(self) -> usize {
        match self {
            Tag::Fixnum => 0,
            Tag::Pair => PAIR_TAG,
            Tag::Symbol => SYMBOL_TAG,
            Tag::Closure => CLOSURE_TAG,
            Tag::Vector => VECTOR_TAG,
            Tag::String => STRING_TAG,
            Tag::Immediate => IMMEDIATE_TAG,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(usize);

impl Value {
    pub const FALSE: Value = Value(0x2F);
    pub const TRUE: Value = Value(0x3F);
    pub const NULL: Value = Value(0x4F);
    pub const EOF: Value = Value(0x5F);
    pub const UNBOUND: Value = Value(0x6F);
    pub const VOID: Value = Value(0x7F);
    /// Broken weak pointer. Stored into weak cars whose referent died.
    pub const BWP: Value = Value(0x8F);

    #[inline(always)]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub const fn fixnum(value: isize) -> Self {
        Self((value << FIXNUM_SHIFT) as usize)
    }

    pub fn char(c: char) -> Self {
        Self(((c as usize) << CHAR_SHIFT) | CHAR_TAG)
    }

    /// Tags `address` with `tag`. The address must be object aligned.
    #[inline(always)]
    pub fn tagged(address: usize, tag: Tag) -> Self {
        debug_assert_eq!(address & PRIMARY_MASK, 0);
        Self(address | tag.bits())
    }

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & PRIMARY_MASK == IMMEDIATE_TAG
    }

    /// True for every value that references a heap object.
    #[inline(always)]
    pub const fn is_pointer(self) -> bool {
        !self.is_fixnum() && !self.is_immediate()
    }

    #[inline]
    pub fn as_fixnum(self) -> Option<isize> {
        if self.is_fixnum() {
            Some((self.0 as isize) >> FIXNUM_SHIFT)
        } else {
            None
        }
    }

    pub fn as_char(self) -> Option<char> {
        if self.0 & CHAR_MASK == CHAR_TAG {
            char::from_u32((self.0 >> CHAR_SHIFT) as u32)
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn primary_tag(self) -> usize {
        self.0 & PRIMARY_MASK
    }

    #[inline]
    pub fn tag(self) -> Tag {
        if self.is_fixnum() {
            return Tag::Fixnum;
        }
        match self.primary_tag() {
            PAIR_TAG => Tag::Pair,
            SYMBOL_TAG => Tag::Symbol,
            CLOSURE_TAG => Tag::Closure,
            VECTOR_TAG => Tag::Vector,
            STRING_TAG => Tag::String,
            _ => Tag::Immediate,
        }
    }

    #[inline(always)]
    pub const fn address(self) -> usize {
        self.0 & !PRIMARY_MASK
    }

    pub fn is_pair(self) -> bool {
        self.tag() == Tag::Pair
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::FALSE => return write!(f, "#f"),
            Value::TRUE => return write!(f, "#t"),
            Value::NULL => return write!(f, "()"),
            Value::EOF => return write!(f, "#<eof>"),
            Value::UNBOUND => return write!(f, "#<unbound>"),
            Value::VOID => return write!(f, "#<void>"),
            Value::BWP => return write!(f, "#!bwp"),
            _ => {}
        }
        if let Some(n) = self.as_fixnum() {
            return write!(f, "{}", n);
        }
        if let Some(c) = self.as_char() {
            return write!(f, "#\\{}", c);
        }
        write!(f, "{:?}@{:#x}", self.tag(), self.address())
    }
}

#[inline(always)]
pub unsafe fn load(address: usize) -> Value {
    Value((address as *const usize).read())
}

#[inline(always)]
pub unsafe fn store(address: usize, value: Value) {
    (address as *mut usize).write(value.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixnums_round_trip_sign() {
        assert_eq!(Value::fixnum(-3).as_fixnum(), Some(-3));
        assert_eq!(Value::fixnum(5).raw(), 20);
        assert!(Value::fixnum(0).is_fixnum());
        assert!(!Value::fixnum(7).is_pointer());
    }

    #[test]
    fn immediates_are_not_pointers() {
        for v in [
            Value::FALSE,
            Value::TRUE,
            Value::NULL,
            Value::EOF,
            Value::UNBOUND,
            Value::VOID,
            Value::BWP,
            Value::char('x'),
        ] {
            assert!(v.is_immediate(), "{:?}", v);
            assert!(!v.is_pointer());
            assert_eq!(v.tag(), Tag::Immediate);
        }
        assert_eq!(Value::char('x').as_char(), Some('x'));
    }

    #[test]
    fn pointer_tags_decode() {
        let address = 0x10_0000;
        for tag in [Tag::Pair, Tag::Symbol, Tag::Closure, Tag::Vector, Tag::String] {
            let v = Value::tagged(address, tag);
            assert!(v.is_pointer());
            assert_eq!(v.tag(), tag);
            assert_eq!(v.address(), address);
        }
    }
}
