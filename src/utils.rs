//! Utility functions for DNS wire data.
//!
//! This module holds the domain name codec and the bounds-checked readers
//! the message codec is built on.

use std::str;

use crate::errors::{DecodeError, EncodeError};

/// Top two bits of a length byte marking a compression pointer.
pub const POINTER_MASK: u8 = 0xC0;

/// Borrow `needed` bytes at `offset`, failing instead of panicking.
pub fn take(buf: &[u8], offset: usize, needed: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(needed)
        .and_then(|end| buf.get(offset..end))
        .ok_or(DecodeError::OutOfBounds {
            offset,
            needed,
            len: buf.len(),
        })
}

/// Read a big-endian u16 at `offset`.
pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16, DecodeError> {
    let bytes = take(buf, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32 at `offset`.
pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let bytes = take(buf, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode a domain name starting at `offset`.
///
/// Labels are joined with `.` and the result carries no trailing dot; the
/// root name decodes to an empty string. Compression pointers are followed,
/// but only to targets strictly before `offset`, so every hop moves towards
/// the start of the buffer and a pointer cycle fails instead of looping.
///
/// # Returns
/// The name and the offset of the first byte after it. When the name ends
/// in a pointer that is the byte after the pointer, wherever the pointer led.
pub fn decode_name(buf: &[u8], offset: usize) -> Result<(String, usize), DecodeError> {
    let start = offset;
    let mut pos = offset;
    let mut name = String::new();

    loop {
        let len = take(buf, pos, 1)?[0];

        if len & POINTER_MASK == POINTER_MASK {
            let low = take(buf, pos + 1, 1)?[0];
            let pointer = (usize::from(len & !POINTER_MASK) << 8) | usize::from(low);
            if pointer >= start {
                return Err(DecodeError::BadPointer { pointer, start });
            }

            let (suffix, _) = decode_name(buf, pointer)?;
            if !suffix.is_empty() {
                if !name.is_empty() {
                    name.push('.');
                }
                name.push_str(&suffix);
            }
            return Ok((name, pos + 2));
        }

        if len == 0 {
            return Ok((name, pos + 1));
        }

        let len = usize::from(len);
        let label = take(buf, pos + 1, len)?;
        let label = str::from_utf8(label).map_err(|_| DecodeError::InvalidLabel { offset: pos })?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(label);
        pos += 1 + len;
    }
}

/// Encode a domain name in DNS wire format, without compression.
///
/// A single trailing dot is accepted and ignored. A label holding a literal
/// `.` cannot be expressed here: the name is split on every dot.
pub fn encode_name(name: &str) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(name.len() + 2);
    write_name(&mut out, name)?;
    Ok(out)
}

/// Append the wire form of `name` to `out`.
///
/// A decoded name whose label held a literal `.` splits into an empty label
/// here and fails with `EmptyLabel`, so a datagram carrying such a name gets
/// no reply.
pub fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), EncodeError> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(EncodeError::EmptyLabel { name: name.into() });
            }
            let len = u8::try_from(label.len())
                .map_err(|_| EncodeError::LabelTooLong { len: label.len() })?;
            out.push(len);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    Ok(())
}
