//! Incremental decoding primitives shared by the packet decoders.
//!
//! Every decoder reads from a [`Cursor`] over the bytes buffered so far and returns one of:
//!
//! * `Ok(message)`: the cursor is left just past the decoded bytes.
//! * `Err(DecodeError::Incomplete)`: not enough bytes are buffered yet. The cursor is
//!   restored to where it was on entry, so the caller can retry once more bytes arrive.
//! * `Err(DecodeError::Corrupted(_))`: the bytes can never form a valid packet.

pub mod field;
pub mod fixed_header;
pub mod remaining_length;

/// A read position within the buffered bytes; reads go through [`bytes::Buf`].
pub type Cursor<'a> = std::io::Cursor<&'a [u8]>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// More bytes are needed; retry later.
    #[error("not enough data to decode packet")]
    Incomplete,
    /// A malformed packet; the connection must be closed.
    #[error("corrupted frame: {0}")]
    Corrupted(String),
}

macro_rules! corrupted (
    ($($fmt:tt)*) => {
        return Err($crate::mqtt::codec::DecodeError::Corrupted(format!($($fmt)*)))
    }
);

pub(crate) use corrupted;

/// Run `decode`, putting the cursor back where it started if it fails.
pub fn restore_on_err<'a, T>(
    cursor: &mut Cursor<'a>,
    decode: impl FnOnce(&mut Cursor<'a>) -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    let start = cursor.position();

    let res = decode(cursor);

    if res.is_err() {
        cursor.set_position(start);
    }

    res
}
