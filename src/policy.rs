//! The authorization seam between the gateway and the embedding application.

/// Decides which clients may connect and which topics they may use.
///
/// One instance is shared by every connection, so implementations are called concurrently
/// from multiple worker threads. Every method defaults to permitting the request.
///
/// Before a client identifier is known (no `CONNECT`, or a `CONNECT` without one),
/// the empty string is passed.
pub trait Policy: Send + Sync + 'static {
    /// Called for every `CONNECT`. Returning `false` closes the connection.
    fn authorize_client(&self, _client_id: &str) -> bool {
        true
    }

    /// Called for every `SUBSCRIBE` with its topic filters in packet order.
    /// Returning `false` closes the connection.
    fn authorize_subscribe(&self, _client_id: &str, _topics: &[String]) -> bool {
        true
    }

    /// Called for every `PUBLISH`. Returning `false` closes the connection.
    fn authorize_publish(&self, _client_id: &str, _topic: &str) -> bool {
        true
    }

    /// Notification of a `PINGREQ` from the client.
    fn on_ping(&self, _client_id: &str) {}
}

/// The policy used when none is configured.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllowAll;

impl Policy for AllowAll {}
