use std::mem::size_of;

pub const WORD_SIZE: usize = size_of::<usize>();
/// Every heap object starts on a two-word boundary and occupies at least two words.
pub const OBJECT_ALIGNMENT: usize = 2 * WORD_SIZE;

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const CARD_SHIFT: usize = 9;
pub const CARD_SIZE: usize = 1 << CARD_SHIFT;
pub const CARDS_PER_PAGE: usize = PAGE_SIZE / CARD_SIZE;
pub const CARD_WORDS: usize = CARD_SIZE / WORD_SIZE;
/// Width of a card's generation bitset inside a page dirty word.
pub const CARD_CODE_BITS: usize = 4;

pub const GENERATION_COUNT: usize = 5;

/// Pages kept past the allocation redline of every nursery region.
pub const NURSERY_SLACK_PAGES: usize = 2;
pub const DEFAULT_NURSERY_SIZE: usize = PAGE_SIZE * 1024 * 4;
pub const DEFAULT_RESERVATION: usize = 256 * 1024 * 1024;

// Field displacements, measured from the untagged object address.

pub const PAIR_SIZE: usize = 2 * WORD_SIZE;
pub const OFF_CAR: usize = 0;
pub const OFF_CDR: usize = WORD_SIZE;

pub const SYMBOL_SIZE: usize = 6 * WORD_SIZE;
pub const OFF_SYMBOL_STRING: usize = 0;
pub const OFF_SYMBOL_USTRING: usize = WORD_SIZE;
pub const OFF_SYMBOL_VALUE: usize = 2 * WORD_SIZE;
pub const OFF_SYMBOL_PLIST: usize = 3 * WORD_SIZE;
pub const OFF_SYMBOL_SYSTEM_VALUE: usize = 4 * WORD_SIZE;
pub const OFF_SYMBOL_SYSTEM_PLIST: usize = 5 * WORD_SIZE;

pub const OFF_CLOSURE_CODE: usize = 0;
pub const OFF_CLOSURE_DATA: usize = WORD_SIZE;

pub const OFF_VECTOR_LENGTH: usize = 0;
pub const OFF_VECTOR_DATA: usize = WORD_SIZE;

pub const OFF_RECORD_RTD: usize = 0;
pub const OFF_RECORD_DATA: usize = WORD_SIZE;
pub const OFF_RTD_NAME: usize = WORD_SIZE;
pub const OFF_RTD_LENGTH: usize = 2 * WORD_SIZE;
pub const OFF_RTD_FIELDS: usize = 3 * WORD_SIZE;
pub const RTD_FIELD_COUNT: usize = 3;

pub const OFF_CODE_SIZE: usize = WORD_SIZE;
pub const OFF_CODE_RELOC_VECTOR: usize = 2 * WORD_SIZE;
pub const OFF_CODE_FREEVARS: usize = 3 * WORD_SIZE;
/// Distance from the start of a code object to its entry point.
pub const DISP_CODE_DATA: usize = 4 * WORD_SIZE;

pub const CONTINUATION_SIZE: usize = 4 * WORD_SIZE;
pub const OFF_CONTINUATION_TOP: usize = WORD_SIZE;
pub const OFF_CONTINUATION_SIZE: usize = 2 * WORD_SIZE;
pub const OFF_CONTINUATION_NEXT: usize = 3 * WORD_SIZE;

pub const TCBUCKET_SIZE: usize = 6 * WORD_SIZE;
pub const OFF_TCBUCKET_TCONC: usize = 0;
pub const OFF_TCBUCKET_KEY: usize = WORD_SIZE;
pub const OFF_TCBUCKET_VAL: usize = 2 * WORD_SIZE;
pub const OFF_TCBUCKET_NEXT: usize = 3 * WORD_SIZE;
pub const OFF_TCBUCKET_DLINK_NEXT: usize = 4 * WORD_SIZE;
pub const OFF_TCBUCKET_DLINK_PREV: usize = 5 * WORD_SIZE;

pub const PORT_SIZE: usize = 8 * WORD_SIZE;

pub const OFF_BIGNUM_DATA: usize = WORD_SIZE;

pub const OFF_STRING_LENGTH: usize = 0;
pub const OFF_STRING_DATA: usize = WORD_SIZE;
