//! LEB128 variable-length integer encoding.
//!
//! Both encoders write into a raw byte cursor and hand back the unused tail of
//! it, so consecutive values can be chained without tracking positions:
//!
//! ```
//! use jit_unwind::core::leb128::{emit_sleb128, emit_uleb128};
//!
//! let mut buf = [0u8; 8];
//! let rest = emit_uleb128(&mut buf, 624_485);
//! let rest = emit_sleb128(rest, -8);
//! assert_eq!(rest.len(), 4);
//! assert_eq!(&buf[..4], &[0xe5, 0x8e, 0x26, 0x78]);
//! ```
//!
//! The cursor must be large enough for the encoding; running off its end is a
//! caller bug and panics. [`MAX_LEB128_LEN`] bytes always suffice.

/// Longest encoding of a 64-bit value.
pub const MAX_LEB128_LEN: usize = 10;

/// Encode `value` as unsigned LEB128 and return the advanced cursor.
pub fn emit_uleb128(cursor: &mut [u8], mut value: u64) -> &mut [u8] {
    let needed = uleb128_len(value);
    assert!(
        cursor.len() >= needed,
        "ULEB128 of {value} needs {needed} bytes, cursor has {}",
        cursor.len()
    );

    let mut pos = 0;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        cursor[pos] = byte;
        pos += 1;
        if value == 0 {
            break;
        }
    }

    &mut cursor[pos..]
}

/// Encode `value` as signed LEB128 and return the advanced cursor.
///
/// Emission stops once the remaining value is pure sign extension *and* bit 6
/// of the last byte already carries that sign; otherwise a decoder would read
/// the wrong sign back.
pub fn emit_sleb128(cursor: &mut [u8], mut value: i64) -> &mut [u8] {
    let needed = sleb128_len(value);
    assert!(
        cursor.len() >= needed,
        "SLEB128 of {value} needs {needed} bytes, cursor has {}",
        cursor.len()
    );

    let mut pos = 0;
    let mut more = true;
    while more {
        let mut byte = (value & 0x7f) as u8;
        // Arithmetic shift: keeps the sign for negative values.
        value >>= 7;

        let sign_bit = (byte & 0x40) != 0;
        if (value == 0 && !sign_bit) || (value == -1 && sign_bit) {
            more = false;
        } else {
            byte |= 0x80;
        }
        cursor[pos] = byte;
        pos += 1;
    }

    &mut cursor[pos..]
}

/// Number of bytes [`emit_uleb128`] writes for `value`.
pub fn uleb128_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes [`emit_sleb128`] writes for `value`.
pub fn sleb128_len(value: i64) -> usize {
    // Significant bits plus one sign bit.
    let magnitude = if value < 0 { !value } else { value };
    let bits = 64 - magnitude.leading_zeros() as usize + 1;
    bits.div_ceil(7)
}
