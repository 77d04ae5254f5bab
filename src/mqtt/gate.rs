use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::mqtt::codec::fixed_header::{self, FixedHeader, PacketType};
use crate::mqtt::session::Session;
use crate::mqtt::{connect, publish, subscribe, Cursor, DecodeError};
use crate::policy::{AllowAll, Policy};

/// The largest `CONNECT` or `SUBSCRIBE` packet held back until it is complete.
pub const MAX_HELD_PACKET_LEN: usize = 1024 * 1024;

/// Inspects the client-to-broker byte stream and decides whether each packet may pass.
///
/// Bytes are only released once the packet they belong to is authorized, and they are released
/// exactly as received. A `PUBLISH` is authorized from its variable header and its payload is
/// released as it arrives; `CONNECT` and `SUBSCRIBE` are held until complete.
pub struct AuthorizationGate {
    session: Session,
    policy: Arc<dyn Policy>,
    /// Received bytes not yet released; starts at a packet boundary unless `passthrough` is
    /// non-zero, in which case it is empty between calls.
    pending: BytesMut,
    /// Bytes still to come of a packet that was already authorized.
    passthrough: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum GateError {
    #[error("corrupted {packet_type} packet from client {client_id:?}: {reason}")]
    Corrupted {
        packet_type: PacketTypeCode,
        client_id: String,
        reason: String,
    },
    #[error(transparent)]
    Rejected(#[from] Rejection),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("client {client_id:?} is not allowed to connect")]
    Client { client_id: String },
    #[error("client {client_id:?} is not allowed to subscribe to {topics:?}")]
    Subscribe {
        client_id: String,
        topics: Vec<String>,
    },
    #[error("client {client_id:?} is not allowed to publish to {topic:?}")]
    Publish { client_id: String, topic: String },
}

/// The raw 4-bit packet type, displayed by name where it has one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacketTypeCode(pub u8);

impl fmt::Display for PacketTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match PacketType::from_code(self.0) {
            Some(packet_type) => write!(f, "{packet_type:?}"),
            None => write!(f, "reserved ({})", self.0),
        }
    }
}

impl AuthorizationGate {
    /// With no policy, every packet is allowed but still has to decode.
    pub fn new(policy: Option<Arc<dyn Policy>>) -> Self {
        AuthorizationGate {
            session: Session::default(),
            policy: policy.unwrap_or_else(|| Arc::new(AllowAll)),
            pending: BytesMut::new(),
            passthrough: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Feed the next chunk received from the client.
    ///
    /// Returns the bytes of every packet authorized so far, possibly none.
    /// Bytes of a trailing packet that cannot be decided yet are kept until a later chunk.
    ///
    /// After an error the connection must be closed; the offending packet is never released.
    pub fn inspect(&mut self, chunk: &[u8]) -> Result<Bytes, GateError> {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                client_id = self.session.client_id(),
                "> {}B {}",
                chunk.len(),
                hex::encode(chunk)
            );
        }

        self.pending.extend_from_slice(chunk);

        let mut released = 0;

        loop {
            if self.passthrough > 0 {
                let len = self.passthrough.min(self.pending.len() - released);

                released += len;
                self.passthrough -= len;

                if self.passthrough > 0 {
                    break;
                }
            }

            let available = &self.pending[released..];

            if available.is_empty() {
                break;
            }

            let mut cursor = Cursor::new(available);

            let complete = fixed_header::is_available(&mut cursor);

            let header = match FixedHeader::decode(&mut cursor) {
                Ok(header) => header,
                Err(DecodeError::Incomplete) => break,
                // A remaining length that can never be satisfied would otherwise buffer forever.
                Err(DecodeError::Corrupted(reason)) => {
                    return Err(GateError::Corrupted {
                        packet_type: PacketTypeCode(available[0] >> 4),
                        client_id: self.session.client_id().to_owned(),
                        reason,
                    })
                }
            };

            let held = header.packet_len().min(available.len());

            let verdict = inspect_packet(
                &mut self.session,
                &*self.policy,
                &header,
                &available[..held],
                complete,
            )?;

            if verdict == Verdict::Wait {
                break;
            }

            tracing::debug!(
                client_id = self.session.client_id(),
                packet_type = %PacketTypeCode(header.packet_type_code()),
                len = header.packet_len(),
                "authorized packet"
            );

            released += held;
            self.passthrough = header.packet_len() - held;
        }

        Ok(self.pending.split_to(released).freeze())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Verdict {
    /// Let the packet through, including any of its bytes yet to arrive.
    Pass,
    /// Nothing can be decided until more of the packet arrives.
    Wait,
}

/// Decode and authorize the packet at the front of the stream.
///
/// `packet` is the whole packet if `complete`, otherwise as much of it as is buffered.
fn inspect_packet(
    session: &mut Session,
    policy: &dyn Policy,
    header: &FixedHeader,
    packet: &[u8],
    complete: bool,
) -> Result<Verdict, GateError> {
    let packet_type = fixed_header::read_packet_type(&mut Cursor::new(packet));

    let corrupted = |session: &Session, e: DecodeError| GateError::Corrupted {
        packet_type: PacketTypeCode(packet_type),
        client_id: session.client_id().to_owned(),
        reason: match e {
            DecodeError::Corrupted(reason) => reason,
            // The whole packet is buffered, so the fields overran the remaining length.
            DecodeError::Incomplete => "packet fields exceed the remaining length".to_owned(),
        },
    };

    match PacketType::from_code(packet_type) {
        Some(PacketType::Connect | PacketType::Subscribe) if !complete => {
            if header.packet_len() > MAX_HELD_PACKET_LEN {
                return Err(corrupted(
                    session,
                    DecodeError::Corrupted(format!(
                        "packet length {} exceeds the {MAX_HELD_PACKET_LEN} bytes held for inspection",
                        header.packet_len()
                    )),
                ));
            }

            return Ok(Verdict::Wait);
        }
        Some(PacketType::Connect) => {
            let connect = connect::decode(&mut Cursor::new(packet), session)
                .map_err(|e| corrupted(session, e))?;

            let client_id = connect.client_id.as_deref().unwrap_or_default();

            if !policy.authorize_client(client_id) {
                return Err(Rejection::Client {
                    client_id: client_id.to_owned(),
                }
                .into());
            }

            session.client_id = connect.client_id;

            tracing::debug!(
                client_id = session.client_id(),
                protocol = ?connect.protocol,
                "client connected"
            );
        }
        Some(PacketType::Subscribe) => {
            let subscribe =
                subscribe::decode(&mut Cursor::new(packet)).map_err(|e| corrupted(session, e))?;

            let topics = subscribe.topics();

            if !policy.authorize_subscribe(session.client_id(), &topics) {
                return Err(Rejection::Subscribe {
                    client_id: session.client_id().to_owned(),
                    topics,
                }
                .into());
            }
        }
        Some(PacketType::Publish) => {
            let topic = if complete {
                publish::decode(&mut Cursor::new(packet)).map(|publish| publish.topic)
            } else {
                publish::decode_header(&mut Cursor::new(packet)).map(|publish| publish.topic)
            };

            let topic = match topic {
                Ok(topic) => topic,
                Err(DecodeError::Incomplete) if !complete => return Ok(Verdict::Wait),
                Err(e) => return Err(corrupted(session, e)),
            };

            if !policy.authorize_publish(session.client_id(), &topic) {
                return Err(Rejection::Publish {
                    client_id: session.client_id().to_owned(),
                    topic,
                }
                .into());
            }
        }
        Some(PacketType::PingReq) => {
            policy.on_ping(session.client_id());
        }
        _ => (),
    }

    Ok(Verdict::Pass)
}
