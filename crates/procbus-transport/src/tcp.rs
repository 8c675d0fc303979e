use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Address the bus daemon listens on unless configured otherwise.
pub const DEFAULT_BUS_ADDRESS: &str = "127.0.0.1:6887";

/// TCP listener for bus peers.
///
/// Accepted streams have `TCP_NODELAY` set: frames are at most 256 bytes on
/// the wire and batching them behind Nagle only adds latency.
pub struct BusListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BusListener {
    /// Bind and listen on `addr`. Use port 0 to pick an ephemeral port.
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let addr_text = addr.to_string();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr_text.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: addr_text,
            source,
        })?;

        info!(%local_addr, "listening for bus peers");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp-loopback"
    }
}

/// Connect to a listening bus daemon.
pub async fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<TcpStream> {
    let addr_text = addr.to_string();
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr_text.clone(),
            source,
        })?;
    stream.set_nodelay(true)?;
    debug!(addr = %addr_text, "connected to bus daemon");
    Ok(stream)
}
