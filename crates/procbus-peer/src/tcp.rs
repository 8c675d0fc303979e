//! TCP-backed connections for processes registered with the local bus.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use procbus_frame::{BufferPool, Frame, FrameCodec, FrameError};
use procbus_routing::{Address, INVALID_ADDRESS};
use procbus_transport::{recv_process_id, BusListener};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{Connection, ConnectionFactory};
use crate::error::{ConnectionError, Result};

/// Tuning for accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Frames queued per connection before `send` reports `QueueFull`.
    pub send_queue_capacity: usize,
    /// How long a new peer has to send its process id.
    pub handshake_timeout: Duration,
    /// Node id of this host. Addresses on other nodes have no connection.
    pub local_node: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 1024,
            handshake_timeout: Duration::from_secs(5),
            local_node: 0,
        }
    }
}

/// A registered process, reached over its TCP stream.
///
/// A writer task drains the bounded send queue to the socket; a reader task
/// pushes received frames to the sink given at registration. A failure in
/// either direction stops both and marks the connection not ok.
pub struct TcpConnection {
    address: Address,
    queue: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
}

impl TcpConnection {
    /// Start the reader and writer tasks for `stream`.
    pub fn spawn(
        address: Address,
        stream: TcpStream,
        sink: mpsc::Sender<Frame>,
        frame_pool: BufferPool,
        io_pool: BufferPool,
        send_queue_capacity: usize,
    ) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let (queue, mut outbound) = mpsc::channel(send_queue_capacity.max(1));
        let shutdown = CancellationToken::new();

        let mut writer = FramedWrite::new(write_half, FrameCodec::new(frame_pool.clone()));
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = pump_out(&mut writer, &mut outbound, &token).await {
                error!(%address, error = %err, "write failed; closing connection");
            }
            token.cancel();
        });

        let mut reader = FramedRead::new(read_half, FrameCodec::new(frame_pool));
        *reader.read_buffer_mut() = io_pool.take();
        let token = shutdown.clone();
        tokio::spawn(async move {
            match pump_in(&mut reader, &sink, &token).await {
                Ok(()) => info!(%address, "connection closed"),
                Err(err) => error!(%address, error = %err, "read failed; closing connection"),
            }
            token.cancel();
            io_pool.recycle(std::mem::take(reader.read_buffer_mut()));
        });

        Arc::new(Self {
            address,
            queue,
            shutdown,
        })
    }
}

impl Connection for TcpConnection {
    fn address(&self) -> Address {
        self.address
    }

    fn send(&self, frame: Frame) -> std::result::Result<(), ConnectionError> {
        if !self.is_ok() {
            return Err(ConnectionError::Closed(self.address));
        }
        trace!(address = %self.address, frame = %frame, "queue frame");
        self.queue.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => ConnectionError::QueueFull(self.address),
            TrySendError::Closed(_) => ConnectionError::Closed(self.address),
        })
    }

    fn is_ok(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("address", &self.address)
            .field("ok", &self.is_ok())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Accepts processes on a local TCP port and keys their connections by
/// process id.
///
/// Each peer registers by sending its 4-byte process id. The claim is not
/// authenticated. Registering an id again replaces and closes the previous
/// connection. Frames received from any peer go to the sink given at bind
/// time.
pub struct TcpConnectionFactory {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

struct Shared {
    connections: Mutex<HashMap<u32, Arc<TcpConnection>>>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
}

#[derive(Clone)]
struct Wiring {
    sink: mpsc::Sender<Frame>,
    frame_pool: BufferPool,
    io_pool: BufferPool,
}

impl TcpConnectionFactory {
    /// Bind `addr` and start accepting registrations in the background.
    pub async fn bind(
        addr: impl ToSocketAddrs + std::fmt::Display,
        sink: mpsc::Sender<Frame>,
        frame_pool: BufferPool,
        io_pool: BufferPool,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let listener = BusListener::bind(addr).await?;
        let local_addr = listener.local_addr();
        let shared = Arc::new(Shared {
            connections: Mutex::new(HashMap::new()),
            config,
            shutdown: CancellationToken::new(),
        });

        let wiring = Wiring {
            sink,
            frame_pool,
            io_pool,
        };
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), wiring));

        Ok(Self { shared, local_addr })
    }

    /// The address peers connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Addresses of currently registered processes, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .shared
            .lock()
            .values()
            .filter(|conn| conn.is_ok())
            .map(|conn| conn.address())
            .collect();
        addresses.sort_unstable();
        addresses
    }

    /// Stop accepting and close every registered connection.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let drained: Vec<_> = self.shared.lock().drain().collect();
        for (_, conn) in drained {
            conn.close();
        }
    }
}

impl Drop for TcpConnectionFactory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn get(
        &self,
        address: Address,
        _recv_sink: &mpsc::Sender<Frame>,
    ) -> std::result::Result<Arc<dyn Connection>, ConnectionError> {
        if address == INVALID_ADDRESS {
            return Err(ConnectionError::InvalidAddress(address));
        }
        if address.node != self.shared.config.local_node {
            return Err(ConnectionError::NoConnection(address));
        }

        let mut connections = self.shared.lock();
        match connections.get(&address.process) {
            Some(conn) if conn.is_ok() => {
                let conn: Arc<dyn Connection> = conn.clone();
                Ok(conn)
            }
            Some(_) => {
                connections.remove(&address.process);
                debug!(%address, "evicted dead connection");
                Err(ConnectionError::NoConnection(address))
            }
            None => Err(ConnectionError::NoConnection(address)),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<TcpConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, process_id: u32, peer: SocketAddr, stream: TcpStream, wiring: Wiring) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let address = Address::new(self.config.local_node, process_id);
        let conn = TcpConnection::spawn(
            address,
            stream,
            wiring.sink,
            wiring.frame_pool,
            wiring.io_pool,
            self.config.send_queue_capacity,
        );

        if let Some(previous) = self.lock().insert(process_id, conn) {
            previous.close();
            info!(%address, %peer, "replaced existing registration");
        } else {
            info!(%address, %peer, "registered process");
        }
    }
}

async fn accept_loop(listener: BusListener, shared: Arc<Shared>, wiring: Wiring) {
    info!(
        addr = %listener.local_addr(),
        transport = listener.transport_name(),
        node = shared.config.local_node,
        "accepting registrations"
    );
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (mut stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let shared = Arc::clone(&shared);
        let wiring = wiring.clone();
        tokio::spawn(async move {
            match recv_process_id(&mut stream, shared.config.handshake_timeout).await {
                Ok(process_id) => shared.register(process_id, peer, stream, wiring),
                Err(err) => warn!(%peer, error = %err, "registration handshake failed"),
            }
        });
    }
    info!(addr = %listener.local_addr(), "stopped accepting bus peers");
}

/// Drain `queue` into `writer` until the queue closes or `shutdown` fires.
pub(crate) async fn pump_out<W>(
    writer: &mut FramedWrite<W, FrameCodec>,
    queue: &mut mpsc::Receiver<Frame>,
    shutdown: &CancellationToken,
) -> std::result::Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };
        writer.feed(frame).await?;
        while let Ok(frame) = queue.try_recv() {
            writer.feed(frame).await?;
        }
        writer.flush().await?;
    }
}

/// Forward decoded frames from `reader` to `sink` until end of stream,
/// `shutdown`, or the sink going away.
pub(crate) async fn pump_in<R>(
    reader: &mut FramedRead<R, FrameCodec>,
    sink: &mpsc::Sender<Frame>,
    shutdown: &CancellationToken,
) -> std::result::Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = reader.next() => next,
        };
        let frame = match next {
            Some(frame) => frame?,
            None => return Ok(()),
        };
        trace!(frame = %frame, "recv");
        if sink.send(frame).await.is_err() {
            return Ok(());
        }
    }
}
