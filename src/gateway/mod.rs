//! Accepts MQTT-over-WebSocket clients and forwards each to its own broker connection.

use std::net::SocketAddr;
use std::sync::Arc;

use color_eyre::eyre;
use color_eyre::eyre::WrapErr;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::gateway::forward::{ForwardingEngine, SessionEnd};
use crate::gateway::socket::DirectSocket;
use crate::gateway::websocket::WebsocketAcceptor;
use crate::mqtt::gate::AuthorizationGate;
use crate::policy::Policy;

pub mod forward;
pub mod socket;
pub mod websocket;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    /// `host:port` of the MQTT broker.
    pub broker_addr: String,
    /// The only HTTP path accepting WebSocket upgrades.
    pub ws_path: String,
}

pub struct Gateway {
    acceptor: WebsocketAcceptor,
    broker_addr: Arc<str>,
    policy: Option<Arc<dyn Policy>>,
    token: CancellationToken,
    sessions: JoinSet<SessionEnd>,
}

impl Gateway {
    pub async fn bind(config: GatewayConfig, policy: Option<Arc<dyn Policy>>) -> crate::Result<Self> {
        let acceptor = WebsocketAcceptor::bind(config.listen_addr, &config.ws_path).await?;

        let listen_addr = acceptor.local_addr()?;

        tracing::info!(
            %listen_addr,
            broker_addr = %config.broker_addr,
            ws_path = %config.ws_path,
            "listening for WebSocket connections"
        );

        Ok(Gateway {
            acceptor,
            broker_addr: config.broker_addr.into(),
            policy,
            token: CancellationToken::new(),
            sessions: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Cancelling this token stops [`Self::run()`] and every session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The number of sessions still running.
    pub fn connections(&self) -> usize {
        self.sessions.len()
    }

    /// Accept clients until the token is cancelled or accepting fails.
    pub async fn run(&mut self) -> crate::Result<()> {
        loop {
            tokio::select! {
                res = self.acceptor.accept() => {
                    let client = res?;

                    let engine = ForwardingEngine::new(
                        AuthorizationGate::new(self.policy.clone()),
                        self.token.child_token(),
                    );

                    self.sessions
                        .spawn(engine.run(client, dial(self.broker_addr.clone())));
                }
                Some(res) = self.sessions.join_next() => {
                    match res {
                        Ok(end) => tracing::debug!(?end, "session ended"),
                        Err(e) => tracing::error!(?e, "session task failed"),
                    }
                }
                _ = self.token.cancelled() => return Ok(()),
            }
        }
    }

    /// Stop accepting, end every session and wait for them to close.
    pub async fn shutdown(mut self) -> crate::Result<()> {
        self.token.cancel();

        while let Some(res) = self.sessions.join_next().await {
            if let Err(e) = res {
                tracing::error!(?e, "session task failed");
            }
        }

        Ok(())
    }
}

async fn dial(broker_addr: Arc<str>) -> eyre::Result<DirectSocket<TcpStream>> {
    let stream = TcpStream::connect(&*broker_addr)
        .await
        .wrap_err_with(|| format!("failed to connect to broker at {broker_addr}"))?;

    // Disable Nagle's algorithm since we forward chunks as soon as they're read.
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(?e, "error setting TCP_NODELAY on socket");
    }

    let remote_addr = stream
        .peer_addr()
        .wrap_err("error getting broker address")?;

    Ok(DirectSocket::new(remote_addr, stream))
}
