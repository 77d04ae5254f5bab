//! Fixed-width integers and 16-bit length-prefixed fields.

use bytes::{Buf, Bytes};

use super::{corrupted, restore_on_err, Cursor, DecodeError};

pub fn read_u8(cursor: &mut Cursor<'_>) -> Result<u8, DecodeError> {
    if !cursor.has_remaining() {
        return Err(DecodeError::Incomplete);
    }

    Ok(cursor.get_u8())
}

/// Read a big-endian `u16`.
pub fn read_u16(cursor: &mut Cursor<'_>) -> Result<u16, DecodeError> {
    if cursor.remaining() < 2 {
        return Err(DecodeError::Incomplete);
    }

    Ok(cursor.get_u16())
}

/// Read a length-prefixed byte string: a big-endian `u16` length followed by that many bytes.
pub fn read_binary(cursor: &mut Cursor<'_>) -> Result<Bytes, DecodeError> {
    restore_on_err(cursor, |cursor| {
        let len = usize::from(read_u16(cursor)?);

        if cursor.remaining() < len {
            return Err(DecodeError::Incomplete);
        }

        Ok(cursor.copy_to_bytes(len))
    })
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string(cursor: &mut Cursor<'_>) -> Result<String, DecodeError> {
    restore_on_err(cursor, |cursor| {
        let bytes = read_binary(cursor)?;

        match std::str::from_utf8(&bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(e) => corrupted!("string is not valid UTF-8: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{read_binary, read_string, read_u16, read_u8};
    use crate::mqtt::{Cursor, DecodeError};

    #[test]
    fn integers() {
        let mut cursor = Cursor::new(&b"\x01\x02\x03"[..]);

        assert_eq!(read_u8(&mut cursor), Ok(1));
        assert_eq!(read_u16(&mut cursor), Ok(0x0203));
        assert_eq!(read_u8(&mut cursor), Err(DecodeError::Incomplete));

        let mut cursor = Cursor::new(&b"\x01"[..]);
        assert_eq!(read_u16(&mut cursor), Err(DecodeError::Incomplete));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn string() {
        let mut cursor = Cursor::new(&b"\x00\x03abc\x00\x00"[..]);

        assert_eq!(read_string(&mut cursor).as_deref(), Ok("abc"));
        assert_eq!(read_string(&mut cursor).as_deref(), Ok(""));
        assert_eq!(cursor.position(), 7);
    }

    #[test]
    fn short_reads_are_incomplete() {
        let cases: [&[u8]; 4] = [b"", b"\x00", b"\x00\x03", b"\x00\x03ab"];

        for bytes in cases {
            let mut cursor = Cursor::new(bytes);
            assert_eq!(read_binary(&mut cursor), Err(DecodeError::Incomplete));
            assert_eq!(cursor.position(), 0, "{bytes:?}");

            assert_eq!(read_string(&mut cursor), Err(DecodeError::Incomplete));
            assert_eq!(cursor.position(), 0, "{bytes:?}");
        }
    }

    #[test]
    fn binary_is_not_interpreted() {
        let mut cursor = Cursor::new(&b"\x00\x02\xFF\x00"[..]);
        assert_eq!(read_binary(&mut cursor).unwrap(), &b"\xFF\x00"[..]);

        let mut cursor = Cursor::new(&b"\x00\x02\xFF\x00"[..]);
        assert!(matches!(
            read_string(&mut cursor),
            Err(DecodeError::Corrupted(_))
        ));
        assert_eq!(cursor.position(), 0);
    }
}
