use bytes::Buf;

use super::remaining_length::{self, MAX_REMAINING_LENGTH};
use super::{corrupted, restore_on_err, Cursor, DecodeError};
use crate::mqtt::QoS;

/// The MQTT control packet types, from the high nibble of the first byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Returns `None` for the reserved codes 0 and 15.
    pub fn from_code(code: u8) -> Option<PacketType> {
        use PacketType::*;

        Some(match code {
            1 => Connect,
            2 => ConnAck,
            3 => Publish,
            4 => PubAck,
            5 => PubRec,
            6 => PubRel,
            7 => PubComp,
            8 => Subscribe,
            9 => SubAck,
            10 => Unsubscribe,
            11 => UnsubAck,
            12 => PingReq,
            13 => PingResp,
            14 => Disconnect,
            _ => return None,
        })
    }
}

/// The first byte (type and flags) and the remaining length of a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FixedHeader {
    pub byte1: u8,
    /// The number of bytes following the fixed header.
    pub remaining_len: usize,
    /// The length of the fixed header itself: 1 plus the width of the remaining length.
    pub header_len: usize,
}

impl FixedHeader {
    /// Decode the fixed header at the front of `cursor`, leaving it at the variable header.
    ///
    /// This does not check that the rest of the packet is buffered; see [`is_available()`].
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        restore_on_err(cursor, |cursor| {
            let start = cursor.position();

            if !cursor.has_remaining() {
                return Err(DecodeError::Incomplete);
            }

            let byte1 = cursor.get_u8();
            let remaining_len = remaining_length::decode(cursor)?;

            if remaining_len > MAX_REMAINING_LENGTH {
                corrupted!("remaining length {remaining_len} exceeds {MAX_REMAINING_LENGTH}");
            }

            Ok(FixedHeader {
                byte1,
                remaining_len,
                // A handful of bytes; cannot truncate.
                header_len: (cursor.position() - start) as usize,
            })
        })
    }

    pub fn packet_type_code(&self) -> u8 {
        self.byte1 >> 4
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_code(self.packet_type_code())
    }

    pub fn dup(&self) -> bool {
        self.byte1 & 0b1000 != 0
    }

    /// The QoS bits of the flags; `0b11` is not a valid QoS.
    pub fn qos(&self) -> Result<QoS, DecodeError> {
        let bits = (self.byte1 & 0b0110) >> 1;

        match QoS::from_u8(bits) {
            Some(qos) => Ok(qos),
            None => corrupted!("invalid QoS in fixed header: {bits}"),
        }
    }

    pub fn retain(&self) -> bool {
        self.byte1 & 0b0001 != 0
    }

    /// The length of the whole packet, fixed header included.
    pub fn packet_len(&self) -> usize {
        self.header_len + self.remaining_len
    }
}

/// Check that a whole packet (fixed header and `remaining length` bytes) is buffered.
///
/// The cursor is left where it was, whatever the outcome.
pub fn is_available(cursor: &mut Cursor<'_>) -> bool {
    let start = cursor.position();

    let available = FixedHeader::decode(cursor)
        .map_or(false, |header| cursor.remaining() >= header.remaining_len);

    cursor.set_position(start);

    available
}

/// Consume the first byte and return the packet type code in its high nibble.
///
/// ### Panics
/// If `cursor` is empty; check [`is_available()`] first.
pub fn read_packet_type(cursor: &mut Cursor<'_>) -> u8 {
    cursor.get_u8() >> 4
}
