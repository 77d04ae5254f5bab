//! `CONNECT` decoding for MQTT v3.1 (`MQIsdp`, level 3) and v3.1.1 (`MQTT`, level 4).

use bytes::{Buf, Bytes};

use crate::mqtt::codec::fixed_header::{FixedHeader, PacketType};
use crate::mqtt::codec::{corrupted, field, restore_on_err};
use crate::mqtt::session::Session;
use crate::mqtt::{Cursor, DecodeError, ProtocolVersion, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// The version named by the protocol name.
    pub protocol: ProtocolVersion,
    /// The protocol level byte as sent.
    pub level: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    /// `None` if the packet ends right after the Keep Alive.
    pub client_id: Option<String>,
    pub last_will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConnectFlags {
    pub username: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will: bool,
    pub clean_session: bool,
}

impl ConnectFlags {
    pub fn from_byte(flags: u8) -> Result<Self, DecodeError> {
        let will_qos_bits = (flags & 0b0001_1000) >> 3;

        let Some(will_qos) = QoS::from_u8(will_qos_bits) else {
            corrupted!("expected will QoS in range 0..=2 but found: {will_qos_bits}");
        };

        let flags = ConnectFlags {
            username: flags & 0b1000_0000 != 0,
            password: flags & 0b0100_0000 != 0,
            will_retain: flags & 0b0010_0000 != 0,
            will_qos,
            will: flags & 0b0000_0100 != 0,
            clean_session: flags & 0b0000_0010 != 0,
        };

        if flags.password && !flags.username {
            corrupted!("password flag set without the user name flag");
        }

        Ok(flags)
    }
}

/// Decode a `CONNECT` packet from the front of `cursor`.
///
/// On success, records the protocol version in `session` and, for protocol level 4,
/// that a `CONNECT` has been received. On any error, neither `cursor` nor `session` is changed.
pub fn decode(cursor: &mut Cursor<'_>, session: &mut Session) -> Result<ConnectPacket, DecodeError> {
    let packet = restore_on_err(cursor, |cursor| decode_packet(cursor, session))?;

    session.protocol = Some(packet.protocol);

    if packet.level == ProtocolVersion::V3_1_1.level() {
        session.connect_received = true;
    }

    Ok(packet)
}

fn decode_packet(cursor: &mut Cursor<'_>, session: &Session) -> Result<ConnectPacket, DecodeError> {
    let header = FixedHeader::decode(cursor)?;

    if header.packet_type() != Some(PacketType::Connect) {
        corrupted!(
            "expected CONNECT, found packet type {}",
            header.packet_type_code()
        );
    }

    let start = cursor.position();

    let protocol = read_protocol_name(cursor)?;

    let level = field::read_u8(cursor)?;
    let level_3_1_1 = level == ProtocolVersion::V3_1_1.level();

    if level_3_1_1 {
        if header.dup() || header.retain() || header.qos()? != QoS::AtMostOnce {
            corrupted!("received a CONNECT with fixed header flags != 0");
        }

        if session.connect_received {
            corrupted!("received a second CONNECT on the same network connection");
        }
    }

    let flags_byte = field::read_u8(cursor)?;

    if level_3_1_1 && flags_byte & 0b0000_0001 != 0 {
        corrupted!("received a CONNECT with the reserved connect flag set");
    }

    let flags = ConnectFlags::from_byte(flags_byte)?;

    let keep_alive = field::read_u16(cursor)?;

    let mut packet = ConnectPacket {
        protocol,
        level,
        clean_session: flags.clean_session,
        keep_alive,
        client_id: None,
        last_will: None,
        username: None,
        password: None,
    };

    let flags_only = [ProtocolVersion::V3_1, ProtocolVersion::V3_1_1]
        .into_iter()
        .any(|version| {
            version.level() == level
                && version.flags_only_remaining_length() == header.remaining_len
        });

    if flags_only {
        return Ok(packet);
    }

    packet.client_id = Some(field::read_string(cursor)?);

    if flags.will {
        let topic = field::read_string(cursor)?;
        let message = field::read_binary(cursor)?;

        packet.last_will = Some(LastWill {
            topic,
            message,
            qos: flags.will_qos,
            retain: flags.will_retain,
        });
    }

    let exhausted =
        |cursor: &Cursor<'_>| cursor.position() - start >= header.remaining_len as u64;

    // MQTT v3.0 clients may set the user name and password flags without sending either;
    // the remaining length takes precedence over the flags.
    if exhausted(cursor) {
        return Ok(packet);
    }

    if flags.username {
        packet.username = Some(field::read_string(cursor)?);
    }

    if exhausted(cursor) {
        return Ok(packet);
    }

    if flags.password {
        packet.password = Some(field::read_binary(cursor)?);
    }

    Ok(packet)
}

fn read_protocol_name(cursor: &mut Cursor<'_>) -> Result<ProtocolVersion, DecodeError> {
    let name_len = field::read_u16(cursor)?;

    let protocol = match name_len {
        6 => ProtocolVersion::V3_1,
        4 => ProtocolVersion::V3_1_1,
        _ => corrupted!("invalid protocol name length: {name_len}"),
    };

    if cursor.remaining() < usize::from(name_len) {
        return Err(DecodeError::Incomplete);
    }

    let name = cursor.copy_to_bytes(usize::from(name_len));

    if name != protocol.protocol_name().as_bytes() {
        corrupted!(
            "invalid protocol name: {:?}",
            String::from_utf8_lossy(&name)
        );
    }

    Ok(protocol)
}
