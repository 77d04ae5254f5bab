use crate::mqtt::codec::fixed_header::{FixedHeader, PacketType};
use crate::mqtt::codec::{corrupted, field, restore_on_err};
use crate::mqtt::{Cursor, DecodeError, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub pkid: u16,
    /// Topic filters with their requested QoS, in packet order. Never empty.
    pub filters: Vec<(String, QoS)>,
}

impl SubscribePacket {
    pub fn topics(&self) -> Vec<String> {
        self.filters.iter().map(|(topic, _)| topic.clone()).collect()
    }
}

/// Decode a `SUBSCRIBE` packet from the front of `cursor`.
pub fn decode(cursor: &mut Cursor<'_>) -> Result<SubscribePacket, DecodeError> {
    restore_on_err(cursor, |cursor| {
        let header = FixedHeader::decode(cursor)?;

        if header.packet_type() != Some(PacketType::Subscribe) {
            corrupted!(
                "expected SUBSCRIBE, found packet type {}",
                header.packet_type_code()
            );
        }

        let end = cursor.position() + header.remaining_len as u64;

        let pkid = field::read_u16(cursor)?;

        let mut filters = Vec::new();

        while cursor.position() < end {
            let filter = field::read_string(cursor)?;
            let qos = field::read_u8(cursor)?;

            let Some(qos) = QoS::from_u8(qos) else {
                corrupted!("SUBSCRIBE to {filter:?} with invalid QoS {qos}");
            };

            filters.push((filter, qos));
        }

        if cursor.position() > end {
            corrupted!(
                "SUBSCRIBE payload overruns remaining length {}",
                header.remaining_len
            );
        }

        if filters.is_empty() {
            corrupted!("SUBSCRIBE without any topic filter");
        }

        Ok(SubscribePacket { pkid, filters })
    })
}
