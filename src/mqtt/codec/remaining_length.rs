//! The variable-length "remaining length" field of the MQTT fixed header.
//!
//! Each byte carries 7 bits of the value, least significant group first,
//! with the high bit set if another byte follows.

use bytes::Buf;

use super::{corrupted, restore_on_err, Cursor, DecodeError};

/// The largest value that fits in the 4 bytes the protocol allows.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("remaining length {0} outside of [0, {MAX_REMAINING_LENGTH}]")]
pub struct InvalidLength(pub usize);

/// Decode a remaining length from the front of `cursor`.
///
/// The 4-byte limit is not enforced here; callers compare the result against
/// [`MAX_REMAINING_LENGTH`] where it matters. A value too large for `usize` is corrupt.
pub fn decode(cursor: &mut Cursor<'_>) -> Result<usize, DecodeError> {
    restore_on_err(cursor, |cursor| {
        let mut multiplier: usize = 1;
        let mut value: usize = 0;

        loop {
            if !cursor.has_remaining() {
                return Err(DecodeError::Incomplete);
            }

            let digit = cursor.get_u8();

            let Some(next) = usize::from(digit & 0x7F)
                .checked_mul(multiplier)
                .and_then(|group| value.checked_add(group))
            else {
                corrupted!("remaining length overflows");
            };

            value = next;

            if digit & 0x80 == 0 {
                return Ok(value);
            }

            let Some(next_multiplier) = multiplier.checked_mul(128) else {
                corrupted!("remaining length overflows");
            };

            multiplier = next_multiplier;
        }
    })
}

/// Return the number of bytes needed to encode `len`.
pub fn bytes_to_encode(len: usize) -> Result<usize, InvalidLength> {
    match len {
        0..=127 => Ok(1),
        128..=16_383 => Ok(2),
        16_384..=2_097_151 => Ok(3),
        2_097_152..=MAX_REMAINING_LENGTH => Ok(4),
        _ => Err(InvalidLength(len)),
    }
}

/// Append the encoding of `len` to `buf`, returning the number of bytes written.
///
/// The gateway never writes packets of its own; this builds them for tests.
#[cfg(test)]
pub(crate) fn encode(len: usize, buf: &mut bytes::BytesMut) -> Result<usize, InvalidLength> {
    use bytes::BufMut;

    let width = bytes_to_encode(len)?;
    let mut remaining = len;

    for _ in 0..width {
        // Truncation intended; only the low 7 bits are kept.
        let mut digit = (remaining % 128) as u8;
        remaining /= 128;

        if remaining > 0 {
            digit |= 0x80;
        }

        buf.put_u8(digit);
    }

    Ok(width)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::{bytes_to_encode, decode, encode, InvalidLength, MAX_REMAINING_LENGTH};
    use crate::mqtt::{Cursor, DecodeError};

    const BOUNDARIES: &[(usize, usize)] = &[
        (0, 1),
        (1, 1),
        (127, 1),
        (128, 2),
        (321, 2),
        (16_383, 2),
        (16_384, 3),
        (2_097_151, 3),
        (2_097_152, 4),
        (MAX_REMAINING_LENGTH, 4),
    ];

    #[test]
    fn encoded_width() {
        for &(len, width) in BOUNDARIES {
            assert_eq!(bytes_to_encode(len), Ok(width), "{len}");
        }

        assert_eq!(
            bytes_to_encode(MAX_REMAINING_LENGTH + 1),
            Err(InvalidLength(MAX_REMAINING_LENGTH + 1))
        );
    }

    #[test]
    fn decode_reproduces_encoded_value() {
        for &(len, width) in BOUNDARIES {
            let mut buf = BytesMut::new();
            assert_eq!(encode(len, &mut buf), Ok(width));
            assert_eq!(buf.len(), width);

            // Trailing bytes must not be consumed.
            buf.extend_from_slice(b"\xFF\xFF");

            let mut cursor = Cursor::new(&buf[..]);
            assert_eq!(decode(&mut cursor), Ok(len), "{len}");
            assert_eq!(cursor.position(), width as u64);
        }
    }

    #[test]
    fn known_encodings() {
        let mut buf = BytesMut::new();

        encode(321, &mut buf).unwrap();
        assert_eq!(&buf[..], b"\xC1\x02");

        buf.clear();
        encode(MAX_REMAINING_LENGTH, &mut buf).unwrap();
        assert_eq!(&buf[..], b"\xFF\xFF\xFF\x7F");
    }

    #[test]
    fn incomplete_leaves_cursor_in_place() {
        let cases: [&[u8]; 4] = [b"", b"\x80", b"\xFF\xFF", b"\xFF\xFF\xFF"];

        for bytes in cases {
            let mut cursor = Cursor::new(bytes);
            assert_eq!(decode(&mut cursor), Err(DecodeError::Incomplete));
            assert_eq!(cursor.position(), 0);

            // Retrying without new data gives the same answer.
            assert_eq!(decode(&mut cursor), Err(DecodeError::Incomplete));
            assert_eq!(cursor.position(), 0);
        }
    }

    #[test]
    fn no_four_byte_ceiling_when_decoding() {
        // A fifth byte is accepted; the caller decides what to do with the oversized value.
        let mut cursor = Cursor::new(&b"\x80\x80\x80\x80\x01"[..]);
        assert_eq!(decode(&mut cursor), Ok(1 << 28));
    }

    #[test]
    fn overflow_is_corrupt() {
        let bytes = [0xFF; 16];
        let mut cursor = Cursor::new(&bytes[..]);
        assert!(matches!(decode(&mut cursor), Err(DecodeError::Corrupted(_))));
        assert_eq!(cursor.position(), 0);
    }
}
