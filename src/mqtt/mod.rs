//! Just enough MQTT v3.1 / v3.1.1 decoding to authorize traffic.
//!
//! Decoded packets are only ever inspected; the original bytes are what gets forwarded.

pub mod codec;
pub mod connect;
pub mod filter;
pub mod gate;
pub mod publish;
pub mod session;
pub mod subscribe;

pub use codec::{Cursor, DecodeError};

/// Quality of Service level of a `PUBLISH`, will message or subscription.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(qos: u8) -> Option<QoS> {
        match qos {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// The protocol version negotiated by `CONNECT`, identified by the protocol name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// `MQIsdp`, protocol level 3.
    V3_1,
    /// `MQTT`, protocol level 4.
    V3_1_1,
}

impl ProtocolVersion {
    /// The protocol level byte sent in `CONNECT` for this version.
    pub fn level(self) -> u8 {
        match self {
            Self::V3_1 => 3,
            Self::V3_1_1 => 4,
        }
    }

    pub fn protocol_name(self) -> &'static str {
        match self {
            Self::V3_1 => "MQIsdp",
            Self::V3_1_1 => "MQTT",
        }
    }

    /// The remaining length of a `CONNECT` that stops after the Keep Alive,
    /// i.e. one without a client identifier.
    pub fn flags_only_remaining_length(self) -> usize {
        // Protocol name length prefix + name + level + flags + keep alive
        2 + self.protocol_name().len() + 1 + 1 + 2
    }
}

/// Packet builders for tests.
#[cfg(test)]
pub(crate) mod testing {
    use bytes::{BufMut, BytesMut};

    use super::codec::remaining_length;

    pub const PINGREQ: &[u8] = b"\xC0\x00";
    pub const DISCONNECT: &[u8] = b"\xE0\x00";

    /// Frame `body` as a packet starting with `byte1`.
    pub fn packet(byte1: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(byte1);
        remaining_length::encode(body.len(), &mut buf).unwrap();
        buf.put_slice(body);
        buf.to_vec()
    }

    pub fn put_string(buf: &mut Vec<u8>, s: impl AsRef<[u8]>) {
        let s = s.as_ref();
        buf.extend_from_slice(&u16::try_from(s.len()).unwrap().to_be_bytes());
        buf.extend_from_slice(s);
    }

    /// A protocol level 4 `CONNECT` with the clean session flag and nothing else.
    pub fn connect(client_id: &str, keep_alive: u16) -> Vec<u8> {
        let mut body = Vec::new();
        put_string(&mut body, "MQTT");
        body.push(4);
        body.push(0b0000_0010);
        body.extend_from_slice(&keep_alive.to_be_bytes());
        put_string(&mut body, client_id);

        packet(0x10, &body)
    }

    pub fn publish(topic: &str, qos: u8, packet_id: Option<u16>, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        put_string(&mut body, topic);

        if let Some(packet_id) = packet_id {
            body.extend_from_slice(&packet_id.to_be_bytes());
        }

        body.extend_from_slice(payload);

        packet(0x30 | (qos << 1), &body)
    }

    pub fn subscribe(packet_id: u16, filters: &[(&str, u8)]) -> Vec<u8> {
        let mut body = packet_id.to_be_bytes().to_vec();

        for (filter, qos) in filters {
            put_string(&mut body, filter);
            body.push(*qos);
        }

        packet(0x82, &body)
    }
}
