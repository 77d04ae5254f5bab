use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Tunnel MQTT from WebSocket clients to a plain TCP MQTT broker,
/// authorizing clients and topics on the way through.
#[derive(clap::Parser, Debug)]
pub struct Args {
    /// Set the format of log output.
    #[clap(short, long, default_value = "full")]
    pub log: LogFormat,

    /// The TCP socket address to listen for MQTT-over-Websockets connections from clients.
    #[clap(short = 'L', long, env, default_value = "0.0.0.0:8081")]
    pub listen_addr: SocketAddr,

    /// The `host:port` of the MQTT broker to forward connections to.
    ///
    /// A new TCP connection is opened to the broker for every client connection.
    #[clap(short = 'b', long, env, default_value = "localhost:1883")]
    pub broker_addr: String,

    /// The HTTP path Websocket upgrades are accepted on.
    #[clap(long, env, default_value = "/mqtt")]
    pub ws_path: String,

    /// The number of worker threads handling connections.
    ///
    /// Defaults to the number of CPU cores.
    #[clap(long, env)]
    pub workers: Option<NonZeroUsize>,

    /// The directory containing (optionally) `permissions.toml`.
    ///
    /// If no permissions file is found, every client and topic is allowed.
    #[clap(default_value = "mqtt-ws-gateway.d/")]
    pub config_dir: PathBuf,
}

#[derive(clap::ValueEnum, Debug, Copy, Clone)]
pub enum LogFormat {
    Full,
    Compact,
    Pretty,
    Json,
}
