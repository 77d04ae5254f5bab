use bytes::{Buf, Bytes};

use crate::mqtt::codec::fixed_header::{FixedHeader, PacketType};
use crate::mqtt::codec::{corrupted, field, restore_on_err};
use crate::mqtt::{Cursor, DecodeError, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos` is not [`QoS::AtMostOnce`].
    pub pkid: Option<u16>,
    pub payload: Bytes,
}

/// The fixed and variable headers of a `PUBLISH` packet, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishHeader {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos` is not [`QoS::AtMostOnce`].
    pub pkid: Option<u16>,
    pub payload_len: usize,
}

/// Decode a `PUBLISH` packet from the front of `cursor`.
pub fn decode(cursor: &mut Cursor<'_>) -> Result<PublishPacket, DecodeError> {
    restore_on_err(cursor, |cursor| {
        let header = decode_header(cursor)?;

        if cursor.remaining() < header.payload_len {
            return Err(DecodeError::Incomplete);
        }

        Ok(PublishPacket {
            dup: header.dup,
            qos: header.qos,
            retain: header.retain,
            topic: header.topic,
            pkid: header.pkid,
            payload: cursor.copy_to_bytes(header.payload_len),
        })
    })
}

/// Decode a `PUBLISH` packet up to the start of its payload, which need not be buffered yet.
pub fn decode_header(cursor: &mut Cursor<'_>) -> Result<PublishHeader, DecodeError> {
    restore_on_err(cursor, |cursor| {
        let header = FixedHeader::decode(cursor)?;

        if header.packet_type() != Some(PacketType::Publish) {
            corrupted!(
                "expected PUBLISH, found packet type {}",
                header.packet_type_code()
            );
        }

        let qos = header.qos()?;

        let start = cursor.position();

        let topic = field::read_string(cursor)?;

        if topic.contains(|c: char| c == '+' || c == '#') {
            corrupted!("PUBLISH topic contains wildcard characters: {topic:?}");
        }

        if topic.is_empty() {
            corrupted!("PUBLISH topic is empty");
        }

        let pkid = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce | QoS::ExactlyOnce => Some(field::read_u16(cursor)?),
        };

        // A few bytes past `start`, at most `u16::MAX + 4`.
        let variable_header_len = (cursor.position() - start) as usize;

        let Some(payload_len) = header.remaining_len.checked_sub(variable_header_len) else {
            corrupted!(
                "PUBLISH variable header ({variable_header_len} bytes) overruns remaining length {}",
                header.remaining_len
            );
        };

        Ok(PublishHeader {
            dup: header.dup(),
            qos,
            retain: header.retain(),
            topic,
            pkid,
            payload_len,
        })
    })
}
