use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use color_eyre::eyre;
use color_eyre::eyre::WrapErr;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::gateway::socket::{ChunkRead, ChunkWrite, Transport};

/// The WebSocket sub-protocols accepted from clients, any of which is answered in kind.
pub const SUBPROTOCOLS: [&str; 3] = ["mqtt", "mqttv3.1", "mqttv3.1.1"];

pub struct WebsocketAcceptor {
    listener: TcpListener,
    ws_path: Arc<str>,
    // To not block the accept loop, we spawn tasks to complete Websocket upgrades.
    handshaking: JoinSet<eyre::Result<MqttWebsocket>>,
}

pub struct MqttWebsocket<S = TcpStream> {
    remote_addr: SocketAddr,
    stream: WebSocketStream<S>,
}

pub struct WebsocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

pub struct WebsocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl WebsocketAcceptor {
    pub async fn bind(addr: SocketAddr, ws_path: &str) -> eyre::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("failed to bind listen_addr: {addr}"))?;

        Ok(Self {
            listener,
            ws_path: ws_path.into(),
            handshaking: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> eyre::Result<SocketAddr> {
        self.listener
            .local_addr()
            .wrap_err("error getting local address of TcpListener")
    }

    pub async fn accept(&mut self) -> eyre::Result<MqttWebsocket> {
        loop {
            tokio::select! {
                res = self.listener.accept() => {
                    let (stream, addr) = res.wrap_err("error from TcpListener.accept()")?;

                    self.accepted(addr, stream);
                }
                Some(res) = self.handshaking.join_next() => {
                    match res {
                        Ok(Ok(socket)) => return Ok(socket),
                        // Error is logged by `handshake()`
                        Ok(Err(_)) => (),
                        Err(e) => {
                            tracing::debug!("error from handshake: {e}");
                        }
                    }
                }
            }
        }
    }

    fn accepted(&mut self, remote_addr: SocketAddr, stream: TcpStream) {
        tracing::debug!(%remote_addr, "accepted new connection");

        self.handshaking
            .spawn(handshake(remote_addr, stream, self.ws_path.clone()));
    }
}

impl<S> MqttWebsocket<S> {
    pub fn new(remote_addr: SocketAddr, stream: WebSocketStream<S>) -> Self {
        Self {
            remote_addr,
            stream,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for MqttWebsocket<S> {
    type Reader = WebsocketReader<S>;
    type Writer = WebsocketWriter<S>;

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();

        (WebsocketReader { stream }, WebsocketWriter { sink })
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> ChunkRead for WebsocketReader<S> {
    async fn read_chunk(&mut self) -> eyre::Result<Option<Bytes>> {
        loop {
            let Some(message) = self.stream.try_next().await? else {
                return Ok(None);
            };

            match message {
                // Frame boundaries mean nothing to MQTT, so an empty frame carries nothing.
                Message::Binary(bytes) if bytes.is_empty() => (),
                Message::Binary(bytes) => return Ok(Some(bytes.into())),
                // Answered by `tungstenite` itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => (),
                Message::Close(_) => return Ok(None),
                // MQTT Control Packets MUST be sent in WebSocket binary data frames.
                // If any other type of data frame is received the recipient MUST
                // close the Network Connection [MQTT-6.0.0-1].
                message @ Message::Text(_) => {
                    eyre::bail!("unexpected Websocket message: {message:?}")
                }
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> ChunkWrite for WebsocketWriter<S> {
    async fn write_chunk(&mut self, chunk: Bytes) -> eyre::Result<()> {
        // `tokio-tungstenite` _only_ works with `Vec<u8>`
        self.sink.send(Message::Binary(chunk.into())).await?;

        Ok(())
    }

    async fn close(&mut self) -> eyre::Result<()> {
        match self.sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[tracing::instrument(skip(stream, ws_path), err(level = tracing::Level::DEBUG))]
async fn handshake(
    remote_addr: SocketAddr,
    stream: TcpStream,
    ws_path: Arc<str>,
) -> eyre::Result<MqttWebsocket> {
    // Disable Nagle's algorithm since we forward chunks as soon as they're read.
    // https://en.wikipedia.org/wiki/Nagle's_algorithm
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(?e, "error setting TCP_NODELAY on socket");
    }

    let stream =
        tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            negotiate(&ws_path, req, resp)
        })
        .await
        .wrap_err("error from accept_hdr_async")?;

    Ok(MqttWebsocket::new(remote_addr, stream))
}

/// Check the request path and pick the sub-protocol to answer with.
fn negotiate(ws_path: &str, req: &Request, mut resp: Response) -> Result<Response, ErrorResponse> {
    let path = req.uri().path();

    if path != ws_path {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("no WebSocket endpoint at {path:?}"),
        ));
    }

    // Offered as comma-separated lists, possibly over several headers, in order of preference.
    let protocol = req
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find_map(|offered| SUBPROTOCOLS.into_iter().find(|&known| known == offered));

    let Some(protocol) = protocol else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "The client MUST include one of {SUBPROTOCOLS:?} in the list of WebSocket Sub Protocols it offers"
            ),
        ));
    };

    resp.headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));

    Ok(resp)
}

fn error_response(status: StatusCode, message: String) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(message));
    *resp.status_mut() = status;
    resp
}
