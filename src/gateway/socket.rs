use std::future::Future;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use color_eyre::eyre;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// The size of the buffer reserved before each read from a byte stream.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// The receiving half of a transport, yielding data in whatever chunks it arrives in.
pub trait ChunkRead: Send + 'static {
    /// Wait for the next chunk; never empty.
    ///
    /// Returns `None` once the peer has closed its side.
    fn read_chunk(&mut self) -> impl Future<Output = eyre::Result<Option<Bytes>>> + Send;
}

/// The sending half of a transport.
pub trait ChunkWrite: Send + 'static {
    /// Write all of `chunk` and flush it.
    fn write_chunk(&mut self, chunk: Bytes) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Flush anything still queued, then close.
    fn close(&mut self) -> impl Future<Output = eyre::Result<()>> + Send;
}

/// A connection that can be split into independently driven halves.
pub trait Transport: Send + 'static {
    type Reader: ChunkRead;
    type Writer: ChunkWrite;

    fn remote_addr(&self) -> SocketAddr;

    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// A plain byte stream, e.g. the TCP connection to the broker.
pub struct DirectSocket<S> {
    remote_addr: SocketAddr,
    stream: S,
}

pub struct DirectReader<S> {
    stream: ReadHalf<S>,
    buf: BytesMut,
}

pub struct DirectWriter<S> {
    stream: WriteHalf<S>,
}

impl<S> DirectSocket<S> {
    pub fn new(remote_addr: SocketAddr, stream: S) -> Self {
        Self {
            remote_addr,
            stream,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Transport for DirectSocket<S> {
    type Reader = DirectReader<S>;
    type Writer = DirectWriter<S>;

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (read, write) = tokio::io::split(self.stream);

        (
            DirectReader {
                stream: read,
                buf: BytesMut::new(),
            },
            DirectWriter { stream: write },
        )
    }
}

impl<S: AsyncRead + Send + 'static> ChunkRead for DirectReader<S> {
    async fn read_chunk(&mut self) -> eyre::Result<Option<Bytes>> {
        self.buf.reserve(READ_CHUNK_SIZE);

        if self.stream.read_buf(&mut self.buf).await? == 0 {
            return Ok(None);
        }

        Ok(Some(self.buf.split().freeze()))
    }
}

impl<S: AsyncWrite + Send + 'static> ChunkWrite for DirectWriter<S> {
    async fn write_chunk(&mut self, chunk: Bytes) -> eyre::Result<()> {
        self.stream.write_all(&chunk).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> eyre::Result<()> {
        Ok(self.stream.shutdown().await?)
    }
}
