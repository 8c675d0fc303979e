use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures_util::SinkExt;
use procbus_frame::{BufferPool, Frame, FrameCodec, MessageId, ReadStream, WriteStream};
use procbus_routing::Address;
use procbus_transport::{send_process_id, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PeerError, Result};
use crate::tcp::{pump_in, pump_out};

const COPY_CHUNK_SIZE: usize = 4 * 1024;

/// Receives every stream opened toward this client.
///
/// Called from the client's dispatch task, one stream at a time. Reading the
/// stream inline blocks later streams; spawn a task to consume it instead.
pub trait StreamListener: Send + Sync + 'static {
    fn on_stream(&self, stream: ReadStream);
}

impl<F> StreamListener for F
where
    F: Fn(ReadStream) + Send + Sync + 'static,
{
    fn on_stream(&self, stream: ReadStream) {
        self(stream)
    }
}

/// Client tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Node id stamped into outgoing message ids.
    pub node_id: u32,
    /// Frames queued toward the bus before writers wait.
    pub outbound_capacity: usize,
    /// Opened streams queued for the listener before the reader waits.
    pub dispatch_capacity: usize,
    /// Frames buffered per inbound stream.
    pub stream_capacity: usize,
    /// Limit for connecting and sending the process id.
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            outbound_capacity: 64,
            dispatch_capacity: 256,
            stream_capacity: 16,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// A process attached to the bus.
///
/// Owns one TCP connection to the daemon and three tasks: a writer draining
/// outbound frames to the socket, a reader demultiplexing inbound frames into
/// [`ReadStream`]s, and a dispatcher handing those streams to the listener.
pub struct Client {
    address: Address,
    outbound: mpsc::Sender<Frame>,
    next_counter: AtomicU64,
    pool: BufferPool,
    shutdown: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect to the daemon at `addr` and register as `process_id`.
    pub async fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        process_id: u32,
        listener: impl StreamListener,
        config: ClientConfig,
    ) -> Result<Self> {
        Self::connect_with_pool(addr, process_id, listener, BufferPool::for_frames(), config).await
    }

    /// Like [`connect`](Self::connect), drawing frame buffers from `pool`.
    pub async fn connect_with_pool(
        addr: impl ToSocketAddrs + std::fmt::Display,
        process_id: u32,
        listener: impl StreamListener,
        pool: BufferPool,
        config: ClientConfig,
    ) -> Result<Self> {
        let timeout = config.handshake_timeout;
        let stream = tokio::time::timeout(timeout, async {
            let mut stream = procbus_transport::connect(addr).await?;
            send_process_id(&mut stream, process_id).await?;
            Ok::<_, TransportError>(stream)
        })
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))??;

        let address = Address::new(config.node_id, process_id);
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_capacity.max(1));
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            address,
            FramedWrite::new(write_half, FrameCodec::new(pool.clone())),
            outbound_rx,
            shutdown.clone(),
        ));
        tokio::spawn(read_loop(
            address,
            FramedRead::new(read_half, FrameCodec::new(pool.clone())),
            dispatch_tx,
            config.stream_capacity.max(1),
            shutdown.clone(),
        ));
        tokio::spawn(dispatch_loop(dispatch_rx, listener));

        info!(%address, "connected to bus");

        Ok(Self {
            address,
            outbound,
            next_counter: AtomicU64::new(1),
            pool,
            shutdown,
            writer: Mutex::new(Some(writer)),
        })
    }

    /// This client's bus address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether the connection to the bus is still up.
    pub fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Open a new outgoing stream toward `destination`.
    pub fn create_stream(&self, destination: &str) -> Result<WriteStream> {
        if !self.is_connected() {
            return Err(PeerError::Disconnected(self.address.to_string()));
        }
        let counter = self.next_counter.fetch_add(1, Ordering::Relaxed);
        let id = MessageId::new(self.address.node, self.address.process, counter);
        Ok(WriteStream::new(
            id,
            destination,
            self.outbound.clone(),
            self.pool.clone(),
        )?)
    }

    /// Copy everything from `reader` into a new stream toward `destination`
    /// and close it. Returns the number of bytes sent.
    pub async fn stream_to<R>(&self, destination: &str, mut reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut stream = self.create_stream(destination)?;
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            stream.write(&chunk[..n]).await?;
            total += n as u64;
        }
        stream.close().await?;
        debug!(message_id = %stream.id(), destination, bytes = total, "stream sent");
        Ok(total)
    }

    /// Send `data` as one complete stream toward `destination`.
    pub async fn send(&self, destination: &str, data: &[u8]) -> Result<MessageId> {
        let mut stream = self.create_stream(destination)?;
        stream.write(data).await?;
        stream.close().await?;
        Ok(stream.id())
    }

    /// Flush queued frames and disconnect.
    ///
    /// Streams created before the call must be closed first for their last
    /// frames to be flushed.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn write_loop(
    address: Address,
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut outbound: mpsc::Receiver<Frame>,
    shutdown: CancellationToken,
) {
    if let Err(err) = pump_out(&mut writer, &mut outbound, &shutdown).await {
        error!(%address, error = %err, "write to bus failed");
        shutdown.cancel();
        return;
    }

    // Flush what was queued before shutdown.
    outbound.close();
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.feed(frame).await {
            warn!(%address, error = %err, "dropping queued frames");
            return;
        }
    }
    if let Err(err) = writer.flush().await {
        warn!(%address, error = %err, "flush failed");
    }
    shutdown.cancel();
}

async fn read_loop(
    address: Address,
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    dispatch: mpsc::Sender<ReadStream>,
    stream_capacity: usize,
    shutdown: CancellationToken,
) {
    let (frames_tx, mut frames_rx) = mpsc::channel(stream_capacity);
    let demux = async {
        let mut streams: HashMap<MessageId, mpsc::Sender<Frame>> = HashMap::new();
        while let Some(frame) = frames_rx.recv().await {
            if !demultiplex(frame, &mut streams, &dispatch, stream_capacity).await {
                break;
            }
        }
        frames_rx.close();
    };
    let pump = async {
        let result = pump_in(&mut reader, &frames_tx, &shutdown).await;
        drop(frames_tx);
        result
    };

    let (result, ()) = tokio::join!(pump, demux);
    match result {
        Ok(()) => info!(%address, "disconnected from bus"),
        Err(err) => error!(%address, error = %err, "read from bus failed"),
    }
    shutdown.cancel();
}

/// Route one inbound frame to its stream. Returns `false` once the listener
/// side is gone.
async fn demultiplex(
    frame: Frame,
    streams: &mut HashMap<MessageId, mpsc::Sender<Frame>>,
    dispatch: &mpsc::Sender<ReadStream>,
    stream_capacity: usize,
) -> bool {
    let id = frame.id();
    let last = frame.is_last();

    if frame.is_first() {
        let (tx, rx) = mpsc::channel(stream_capacity);
        if tx.send(frame).await.is_err() {
            return true;
        }
        let stream = match ReadStream::open(rx).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(message_id = %id, error = %err, "could not open stream");
                return true;
            }
        };
        debug!(message_id = %id, destination = stream.destination(), "new inbound stream");
        if dispatch.send(stream).await.is_err() {
            return false;
        }
        if !last {
            streams.insert(id, tx);
        }
        return true;
    }

    let Some(tx) = streams.get(&id) else {
        warn!(message_id = %id, frame = frame.frame_number(), "no stream for frame; dropping");
        return true;
    };
    if tx.send(frame).await.is_err() {
        debug!(message_id = %id, "stream dropped by listener");
        streams.remove(&id);
        return true;
    }
    if last {
        streams.remove(&id);
    }
    true
}

async fn dispatch_loop<L: StreamListener>(mut streams: mpsc::Receiver<ReadStream>, listener: L) {
    while let Some(stream) = streams.recv().await {
        debug!(message_id = %stream.message_id(), "calling stream listener");
        listener.on_stream(stream);
    }
}

#[cfg(test)]
mod tests {
    use procbus_frame::{FrameHeader, MAX_PAYLOAD};
    use procbus_transport::{recv_process_id, BusListener};
    use tokio::net::TcpStream;

    use super::*;

    /// Accept one client and return its process id plus the raw stream.
    async fn accept_client(listener: &BusListener) -> (u32, TcpStream) {
        let (mut stream, _) = listener.accept().await.expect("client should connect");
        let pid = recv_process_id(&mut stream, Duration::from_secs(5))
            .await
            .expect("handshake should arrive");
        (pid, stream)
    }

    fn collecting_listener() -> (impl StreamListener, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |mut stream: ReadStream| {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut data = Vec::new();
                stream
                    .read_to_end(&mut data)
                    .await
                    .expect("stream should read");
                let _ = tx.send((stream.destination().to_string(), data));
            });
        };
        (listener, rx)
    }

    #[tokio::test]
    async fn registers_and_sends_frames() {
        let listener = BusListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr();
        let server = tokio::spawn(async move { accept_client(&listener).await });

        let client = Client::connect(addr, 42, |_stream: ReadStream| {}, ClientConfig::default())
            .await
            .expect("client should connect");
        let (pid, stream) = server.await.expect("server task");
        assert_eq!(pid, 42);
        assert_eq!(client.address(), Address::new(0, 42));

        let id = client.send("s:/svc/op", b"payload").await.expect("send");
        assert_eq!(id, MessageId::new(0, 42, 1));
        let second = client.create_stream("s:/svc/op").expect("stream");
        assert_eq!(second.id().counter(), 2);

        let mut frames = FramedRead::new(stream, FrameCodec::new(BufferPool::new(4, 256)));
        let frame = tokio::time::timeout(Duration::from_secs(5), futures_util::StreamExt::next(&mut frames))
            .await
            .expect("frame should arrive")
            .expect("stream open")
            .expect("frame decodes");
        assert!(frame.is_first() && frame.is_last());
        assert_eq!(frame.destination(), "s:/svc/op");
        assert_eq!(frame.payload(), b"payload");
        assert_eq!(frame.id(), id);
    }

    #[tokio::test]
    async fn inbound_frames_become_streams() {
        let listener = BusListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr();
        let server = tokio::spawn(async move { accept_client(&listener).await });

        let (on_stream, mut received) = collecting_listener();
        let _client = Client::connect(addr, 7, on_stream, ClientConfig::default())
            .await
            .expect("client should connect");
        let (_, stream) = server.await.expect("server task");

        let pool = BufferPool::new(16, 256);
        let mut writer = FramedWrite::new(stream, FrameCodec::new(pool.clone()));
        let a = MessageId::new(0, 1, 1);
        let b = MessageId::new(0, 2, 1);
        let orphan = MessageId::new(0, 3, 1);
        let send = [
            Frame::encode(&pool, FrameHeader::first(a, "s:/a"), b"hello ").expect("encode"),
            Frame::encode(&pool, FrameHeader::first(b, "s:/b").into_last(), b"solo").expect("encode"),
            Frame::encode(&pool, FrameHeader::continuation(orphan, 1), b"lost").expect("encode"),
            Frame::encode(&pool, FrameHeader::continuation(a, 1).into_last(), b"world").expect("encode"),
        ];
        for frame in send {
            writer.send(frame).await.expect("frame should be written");
        }

        let mut got = Vec::new();
        for _ in 0..2 {
            got.push(
                tokio::time::timeout(Duration::from_secs(5), received.recv())
                    .await
                    .expect("stream should be delivered")
                    .expect("listener alive"),
            );
        }
        got.sort();
        assert_eq!(
            got,
            vec![
                ("s:/a".to_string(), b"hello world".to_vec()),
                ("s:/b".to_string(), b"solo".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn stream_to_copies_reader() {
        let listener = BusListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr();
        let server = tokio::spawn(async move { accept_client(&listener).await });

        let client = Client::connect(addr, 5, |_stream: ReadStream| {}, ClientConfig::default())
            .await
            .expect("client should connect");
        let (_, stream) = server.await.expect("server task");

        let data: Vec<u8> = (0..(3 * MAX_PAYLOAD + 17)).map(|i| i as u8).collect();
        let sent = client
            .stream_to("s:/copy", &data[..])
            .await
            .expect("stream_to");
        assert_eq!(sent, data.len() as u64);
        client.close().await;
        assert!(!client.is_connected());

        // Reassemble what reached the socket.
        let mut frames = FramedRead::new(stream, FrameCodec::new(BufferPool::new(16, 256)));
        let (tx, rx) = mpsc::channel(64);
        while let Some(frame) = futures_util::StreamExt::next(&mut frames).await {
            tx.send(frame.expect("frame decodes")).await.expect("channel open");
        }
        drop(tx);
        let mut read = ReadStream::open(rx).await.expect("first frame");
        let mut out = Vec::new();
        read.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, data);
        assert_eq!(read.destination(), "s:/copy");
    }

    #[tokio::test]
    async fn closed_client_refuses_streams() {
        let listener = BusListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr();
        let server = tokio::spawn(async move { accept_client(&listener).await });

        let client = Client::connect(addr, 9, |_stream: ReadStream| {}, ClientConfig::default())
            .await
            .expect("client should connect");
        let _ = server.await.expect("server task");

        client.close().await;
        client.close().await;
        assert!(matches!(
            client.create_stream("s:/x"),
            Err(PeerError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = BusListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr();
        drop(listener);

        let result = Client::connect(addr, 1, |_stream: ReadStream| {}, ClientConfig::default()).await;
        assert!(matches!(
            result,
            Err(PeerError::Transport(TransportError::Connect { .. }))
        ));
    }
}
