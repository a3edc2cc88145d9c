//! Composite-key codec for hierarchical key mode.
//!
//! A composite key is the concatenation of one slot per tuple element: the
//! global name first, then each subscript. Slots are laid out so that the
//! store's plain byte comparison reproduces hierarchical subscript order:
//! numbers sort below strings, numbers sort among themselves by signed
//! value, and strings sort by natural byte order.
//!
//! Slot layout:
//!
//! - Number: `0x00 0x02` (`0x00 0x01` when negative), then a 4-byte
//!   big-endian integer magnitude and a 4-byte big-endian fraction scaled
//!   to nine decimal digits. Negative values store the ones' complement of
//!   both parts so that byte order equals signed order.
//! - String: `0x00 0x03` followed by the raw bytes. An empty string is the
//!   lead alone with its tag byte forced to zero (`0x00 0x00`), which sorts
//!   below every real continuation.
//! - Name: a string slot whose leading `^` is stripped before encoding.
//!
//! Decoding is the exact inverse for keys within the documented bounds.
//! The one escape hatch the format cannot close: a string subscript whose
//! bytes contain `0x00` immediately followed by `0x00`..`0x03` is
//! indistinguishable from a slot boundary.

use byteorder::{BigEndian, ByteOrder};
use snafu::ensure;

use crate::error::{KeyTooLongSnafu, Result};
use crate::subscript::{parse_number, ParsedNumber, Subscript};

/// Maximum length of a value and of an assembled composite key.
pub const MAX_STRING_LEN: usize = 32_767;

/// First byte of every slot lead.
pub const SLOT_LEAD: u8 = 0x00;
/// Tag byte for a negative number slot.
pub const TAG_NEG_NUMBER: u8 = 0x01;
/// Tag byte for a non-negative number slot.
pub const TAG_NUMBER: u8 = 0x02;
/// Tag byte for a string slot.
pub const TAG_STRING: u8 = 0x03;

/// Probe suffix that sorts above every child of a node but below its next
/// sibling; traversals append it to skip over the current record.
pub const SKIP_SUFFIX: [u8; 2] = [0x00, 0xFF];

/// What a slot holds, recorded alongside the packed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// The leading global-name slot.
    Name,
    /// A numeric subscript slot (fixed ten bytes).
    Number,
    /// A string subscript slot (variable length).
    String,
}

/// Offsets of one slot inside an assembled key.
///
/// `end` is the cumulative size through this slot, so truncating a key to
/// its first `k` slots is a constant-time slice of `..slots[k - 1].end`.
#[derive(Debug, Clone, Copy)]
pub struct SlotDesc {
    /// What the slot holds.
    pub kind: SlotKind,
    /// Byte offset where the slot starts.
    pub start: usize,
    /// Byte offset one past the slot (cumulative size).
    pub end: usize,
}

/// Incremental composite-key assembler.
///
/// Arguments are appended one at a time; the builder tracks a parallel
/// array of slot descriptors so traversals can slice any prefix without
/// re-encoding.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    buf: Vec<u8>,
    slots: Vec<SlotDesc>,
}

impl KeyBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty builder with room for `cap` bytes.
    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap), slots: Vec::new() }
    }

    /// Appends the global-name slot. A leading `^` is stripped.
    ///
    /// # Errors
    ///
    /// Returns `KeyTooLong` if the key would exceed [`MAX_STRING_LEN`].
    pub fn push_name(&mut self, name: &str) -> Result<()> {
        let name = name.strip_prefix('^').unwrap_or(name);
        self.push_string_slot(name.as_bytes(), SlotKind::Name)
    }

    /// Appends one subscript slot, re-typing stringified numbers.
    ///
    /// # Errors
    ///
    /// Returns `KeyTooLong` if the key would exceed [`MAX_STRING_LEN`].
    pub fn push(&mut self, sub: &Subscript) -> Result<()> {
        match sub.clone().normalized() {
            Subscript::Int(v) => {
                let negative = v < 0;
                self.push_number_slot(ParsedNumber {
                    negative,
                    int_part: v.unsigned_abs(),
                    frac: 0,
                })
            },
            Subscript::Num(text) => {
                // Normalization only produces canonical numeric text.
                match parse_number(text.as_bytes()) {
                    Some(parsed) => self.push_number_slot(parsed),
                    None => self.push_string_slot(text.as_bytes(), SlotKind::String),
                }
            },
            Subscript::Str(bytes) => self.push_string_slot(&bytes, SlotKind::String),
        }
    }

    fn push_number_slot(&mut self, num: ParsedNumber) -> Result<()> {
        self.ensure_room(10)?;
        let start = self.buf.len();
        let mut slot = [0u8; 10];
        slot[0] = SLOT_LEAD;
        if num.negative && (num.int_part > 0 || num.frac > 0) {
            slot[1] = TAG_NEG_NUMBER;
            BigEndian::write_u32(&mut slot[2..6], u32::MAX - num.int_part);
            BigEndian::write_u32(&mut slot[6..10], u32::MAX - num.frac);
        } else {
            slot[1] = TAG_NUMBER;
            BigEndian::write_u32(&mut slot[2..6], num.int_part);
            BigEndian::write_u32(&mut slot[6..10], num.frac);
        }
        self.buf.extend_from_slice(&slot);
        self.slots.push(SlotDesc { kind: SlotKind::Number, start, end: self.buf.len() });
        Ok(())
    }

    fn push_string_slot(&mut self, bytes: &[u8], kind: SlotKind) -> Result<()> {
        self.ensure_room(2 + bytes.len())?;
        let start = self.buf.len();
        self.buf.push(SLOT_LEAD);
        self.buf.push(TAG_STRING);
        self.buf.extend_from_slice(bytes);
        if bytes.is_empty() {
            // Empty subscript: force the tag to zero so "no further
            // subscripts" sorts below any real continuation.
            let last = self.buf.len() - 1;
            self.buf[last] = 0x00;
        }
        self.slots.push(SlotDesc { kind, start, end: self.buf.len() });
        Ok(())
    }

    fn ensure_room(&self, added: usize) -> Result<()> {
        let size = self.buf.len() + added;
        ensure!(size <= MAX_STRING_LEN, KeyTooLongSnafu { size, max: MAX_STRING_LEN });
        Ok(())
    }

    /// The assembled key bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Total length of the assembled key.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of slots appended so far.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Cumulative size through slot `index` (the constant-time k-prefix).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn prefix_len(&self, index: usize) -> usize {
        self.slots[index].end
    }

    /// Descriptor of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn slot(&self, index: usize) -> SlotDesc {
        self.slots[index]
    }

    /// Drops all slots after the first `count`.
    pub fn truncate_slots(&mut self, count: usize) {
        if count < self.slots.len() {
            let end = if count == 0 { 0 } else { self.slots[count - 1].end };
            self.buf.truncate(end);
            self.slots.truncate(count);
        }
    }
}

/// Encodes a full composite key in one call.
///
/// # Errors
///
/// Returns `KeyTooLong` if the key would exceed [`MAX_STRING_LEN`].
pub fn encode_key(name: &str, subs: &[Subscript]) -> Result<Vec<u8>> {
    let mut kb = KeyBuilder::new();
    kb.push_name(name)?;
    for sub in subs {
        kb.push(sub)?;
    }
    Ok(kb.buf)
}

/// Decodes a composite key back into its tuple elements.
///
/// The first element is the global name (always a string). Numeric slots
/// come back as `Int` when integral, `Num` otherwise.
pub fn decode_key(bytes: &[u8]) -> Vec<Subscript> {
    let mut out = Vec::new();
    let mut n = 0;
    while n < bytes.len() {
        if bytes[n] == SLOT_LEAD && n + 1 < bytes.len() {
            match bytes[n + 1] {
                tag @ (TAG_NEG_NUMBER | TAG_NUMBER) if n + 10 <= bytes.len() => {
                    let negative = tag == TAG_NEG_NUMBER;
                    let raw_int = BigEndian::read_u32(&bytes[n + 2..n + 6]);
                    let raw_frac = BigEndian::read_u32(&bytes[n + 6..n + 10]);
                    let (int_part, frac) = if negative {
                        (u32::MAX - raw_int, u32::MAX - raw_frac)
                    } else {
                        (raw_int, raw_frac)
                    };
                    out.push(ParsedNumber { negative, int_part, frac }.into_subscript());
                    n += 10;
                    continue;
                },
                TAG_STRING => {
                    let start = n + 2;
                    let end = slot_end(bytes, start);
                    out.push(Subscript::Str(bytes[start..end].to_vec()));
                    n = end;
                    continue;
                },
                SLOT_LEAD => {
                    out.push(Subscript::empty());
                    n += 2;
                    continue;
                },
                _ => {},
            }
        }
        // Bytes outside a recognized slot: skip defensively.
        n += 1;
    }
    out
}

/// Finds the end of a variable-length string slot: the next slot lead, or
/// the end of the key.
fn slot_end(bytes: &[u8], from: usize) -> usize {
    let mut m = from;
    while m < bytes.len() {
        if bytes[m] == SLOT_LEAD && m + 1 < bytes.len() && bytes[m + 1] <= TAG_STRING {
            return m;
        }
        m += 1;
    }
    bytes.len()
}

/// Tests whether `key` continues `anchor`'s first `prefix_len` bytes at a
/// slot boundary.
///
/// A match requires the prefix bytes to be identical and, when either key
/// is longer than the prefix, the byte at the boundary to be a slot lead.
/// That last rule keeps `("ab")` from matching the prefix `("a")`.
pub fn shares_prefix(key: &[u8], anchor: &[u8], prefix_len: usize) -> bool {
    if prefix_len == 0 {
        return !key.is_empty();
    }
    if key.len() < prefix_len || anchor.len() < prefix_len {
        return false;
    }
    if key.len() > prefix_len && key[prefix_len] != SLOT_LEAD {
        return false;
    }
    if anchor.len() > prefix_len && anchor[prefix_len] != SLOT_LEAD {
        return false;
    }
    key[..prefix_len] == anchor[..prefix_len]
}

/// Encodes an integer-mode key: the four native-endian bytes of the value.
pub fn int_key(value: i32) -> [u8; 4] {
    value.to_ne_bytes()
}

/// Decodes an integer-mode key.
pub fn decode_int_key(bytes: &[u8]) -> Option<i32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(i32::from_ne_bytes(arr))
}
