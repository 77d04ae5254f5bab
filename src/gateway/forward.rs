//! Pumps bytes between a client connection and its broker connection.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use color_eyre::eyre;
use tokio_util::sync::CancellationToken;

use crate::gateway::socket::{ChunkRead, ChunkWrite, Transport};
use crate::mqtt::gate::{AuthorizationGate, GateError};

/// How long a closing transport gets to flush before it is dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    /// Dialing the broker; the client is not read from.
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The broker could not be reached.
    DialFailed,
    /// The gate refused a packet from the client.
    Terminated(GateError),
    /// Either side closed its connection or failed.
    Disconnected,
    /// The gateway is shutting down.
    Cancelled,
}

/// Forwards one client session to the broker, passing client bytes through its gate.
pub struct ForwardingEngine {
    gate: AuthorizationGate,
    token: CancellationToken,
    state: SessionState,
}

/// The read credit of one direction: at most one read outstanding, none while a write is.
///
/// The order of [`pump()`]'s loop is what upholds this; the credit names the state and checks
/// it in debug builds.
#[derive(Debug)]
struct ReadCredit {
    available: bool,
}

/// How one direction of a session stopped.
#[derive(Debug)]
enum PumpEnd {
    Eof,
    ReadFailed(eyre::Report),
    WriteFailed(eyre::Report),
    Gate(GateError),
    Stopped,
}

impl ReadCredit {
    fn new() -> Self {
        ReadCredit { available: true }
    }

    fn take(&mut self) {
        debug_assert!(self.available, "read issued while a write is in flight");
        self.available = false;
    }

    /// Called once the chunk read has been flushed to the peer.
    fn release(&mut self) {
        self.available = true;
    }
}

impl ForwardingEngine {
    pub fn new(gate: AuthorizationGate, token: CancellationToken) -> Self {
        ForwardingEngine {
            gate,
            token,
            state: SessionState::Init,
        }
    }

    /// Run the session to completion.
    ///
    /// `dial` connects to the broker; `client` is not read from until it resolves.
    #[tracing::instrument(
        name = "session",
        skip_all,
        fields(remote_addr = %client.remote_addr(), client_id = tracing::field::Empty)
    )]
    pub async fn run<C, B, D>(mut self, client: C, dial: D) -> SessionEnd
    where
        C: Transport,
        B: Transport,
        D: Future<Output = eyre::Result<B>>,
    {
        let (mut client_reader, mut client_writer) = client.into_split();

        self.transition(SessionState::Connecting);

        let dialed = tokio::select! {
            res = dial => res,
            _ = self.token.cancelled() => {
                self.close_all(&mut client_writer, None::<&mut B::Writer>).await;
                return SessionEnd::Cancelled;
            }
        };

        let broker = match dialed {
            Ok(broker) => broker,
            Err(e) => {
                tracing::debug!(?e, "error connecting to broker");
                self.close_all(&mut client_writer, None::<&mut B::Writer>).await;
                return SessionEnd::DialFailed;
            }
        };

        tracing::debug!(broker_addr = %broker.remote_addr(), "connected to broker");

        let (mut broker_reader, mut broker_writer) = broker.into_split();

        self.transition(SessionState::Active);

        // Stops the other direction once one is done.
        let stop = self.token.child_token();
        let gate = &mut self.gate;
        let mut client_id_recorded = false;

        let (inbound, outbound) = tokio::join!(
            async {
                let end = pump(
                    &mut client_reader,
                    &mut broker_writer,
                    |chunk| {
                        let released = gate.inspect(&chunk)?;

                        if !client_id_recorded {
                            if let Some(client_id) = &gate.session().client_id {
                                tracing::Span::current().record("client_id", client_id.as_str());
                                client_id_recorded = true;
                            }
                        }

                        Ok(released)
                    },
                    &stop,
                )
                .await;
                stop.cancel();
                end
            },
            async {
                let end = pump(&mut broker_reader, &mut client_writer, Ok, &stop).await;
                stop.cancel();
                end
            },
        );

        self.close_all(&mut client_writer, Some(&mut broker_writer))
            .await;

        log_pump_end("client", &inbound);
        log_pump_end("broker", &outbound);

        match inbound {
            PumpEnd::Gate(e) => SessionEnd::Terminated(e),
            _ if self.token.is_cancelled() => SessionEnd::Cancelled,
            _ => SessionEnd::Disconnected,
        }
    }

    fn transition(&mut self, state: SessionState) {
        tracing::trace!(from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    /// Close both sides after flushing, giving each [`CLOSE_TIMEOUT`] to do so.
    async fn close_all<W: ChunkWrite>(
        &mut self,
        client: &mut impl ChunkWrite,
        broker: Option<&mut W>,
    ) {
        self.transition(SessionState::Closing);

        let close_broker = async {
            if let Some(broker) = broker {
                close(broker, "broker").await;
            }
        };

        tokio::join!(close(client, "client"), close_broker);

        self.transition(SessionState::Closed);
    }
}

/// Forward chunks from `reader` to `writer` through `inspect` until either side is done or `stop`
/// is cancelled.
///
/// There is at most one read outstanding, and the next one only starts once the previous chunk
/// has been flushed to `writer`, so a slow peer stops reads from its counterpart.
async fn pump(
    reader: &mut impl ChunkRead,
    writer: &mut impl ChunkWrite,
    mut inspect: impl FnMut(Bytes) -> Result<Bytes, GateError>,
    stop: &CancellationToken,
) -> PumpEnd {
    let mut credit = ReadCredit::new();

    loop {
        credit.take();

        let chunk = tokio::select! {
            // Checked first so a stopped session doesn't start another read.
            biased;
            _ = stop.cancelled() => return PumpEnd::Stopped,
            res = reader.read_chunk() => match res {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return PumpEnd::Eof,
                Err(e) => return PumpEnd::ReadFailed(e),
            },
        };

        let chunk = match inspect(chunk) {
            Ok(chunk) => chunk,
            Err(e) => return PumpEnd::Gate(e),
        };

        // The gate may be holding back a partial packet.
        if !chunk.is_empty() {
            if let Err(e) = write(writer, chunk, stop).await {
                return PumpEnd::WriteFailed(e);
            }
        }

        credit.release();
    }
}

/// Write and flush `chunk`, allowing [`CLOSE_TIMEOUT`] to finish if `stop` is cancelled meanwhile.
async fn write(
    writer: &mut impl ChunkWrite,
    chunk: Bytes,
    stop: &CancellationToken,
) -> eyre::Result<()> {
    let write = writer.write_chunk(chunk);
    tokio::pin!(write);

    tokio::select! {
        res = &mut write => res,
        _ = stop.cancelled() => {
            tokio::time::timeout(CLOSE_TIMEOUT, write)
                .await
                .unwrap_or_else(|_| Err(eyre::eyre!("timed out writing to a closing session")))
        }
    }
}

async fn close(writer: &mut impl ChunkWrite, side: &'static str) {
    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => (),
        Ok(Err(e)) => tracing::debug!(side, ?e, "error closing connection"),
        Err(_) => tracing::debug!(side, "timed out closing connection"),
    }
}

fn log_pump_end(side: &'static str, end: &PumpEnd) {
    match end {
        PumpEnd::Eof => tracing::debug!(side, "connection closed"),
        PumpEnd::Stopped => (),
        PumpEnd::ReadFailed(e) => tracing::debug!(side, ?e, "error reading from connection"),
        PumpEnd::WriteFailed(e) => tracing::debug!(side, ?e, "error writing to peer"),
        PumpEnd::Gate(e @ GateError::Corrupted { .. }) => {
            tracing::warn!(side, "closing connection: {e}")
        }
        PumpEnd::Gate(e @ GateError::Rejected(_)) => {
            tracing::info!(side, "unauthorized: {e}")
        }
    }
}
