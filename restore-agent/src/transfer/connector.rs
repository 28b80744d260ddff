//! Connection factories for the snapshotter endpoint.

use crate::protocol::MUX_HEADER;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens a fresh connection per upload attempt. Connections are never reused.
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>>;
}

/// Dials TCP and announces the snapshotter with the mux header byte.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    mux_header: u8,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            mux_header: MUX_HEADER,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&[self.mux_header]).await?;
        debug!("Connected to {}", self.addr);
        Ok(stream)
    }
}
