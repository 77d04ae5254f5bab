use crate::mqtt::ProtocolVersion;

/// Per-connection attributes read and written by the packet decoders.
///
/// Owned by the connection's [`AuthorizationGate`][crate::mqtt::gate::AuthorizationGate],
/// so it is only ever touched from the task handling that connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    /// Set once a `CONNECT` has been decoded.
    pub protocol: Option<ProtocolVersion>,
    /// Set once a `CONNECT` carrying a client identifier has been decoded.
    pub client_id: Option<String>,
    /// Set by the first `CONNECT` at protocol level 4; a second one is a protocol violation.
    pub connect_received: bool,
}

impl Session {
    /// The client identifier, or `""` before one is known.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("")
    }
}
