use std::collections::HashMap;
use std::sync::Arc;

use procbus_frame::{Frame, MessageId};
use procbus_routing::Routing;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionFactory};
use crate::error::{PeerError, Result};

/// Router tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Capacity of the inbound frame channel.
    pub inbound_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 64,
        }
    }
}

/// Counters reported when the dispatch loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames handed to a connection.
    pub delivered: u64,
    /// Frames dropped (unroutable, orphaned or refused by the connection).
    pub dropped: u64,
    /// Streams still bound to a connection at exit.
    ///
    /// A binding is released only by its `LASTFRAME` or a failed send, so a
    /// sender that disconnects mid-stream leaves its binding here until the
    /// router stops.
    pub open_streams: usize,
}

/// Frame router.
///
/// Owns the inbound frame channel. Once spawned, a single task reads it and
/// forwards every frame: the first frame of a message is routed by its
/// destination, later frames follow it to the same connection.
pub struct Router {
    inbound_tx: mpsc::Sender<Frame>,
    inbound_rx: mpsc::Receiver<Frame>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx,
        }
    }

    /// Sender for frames to be routed. Also the sink connection factories
    /// should push received frames to.
    pub fn inbound(&self) -> mpsc::Sender<Frame> {
        self.inbound_tx.clone()
    }

    /// Start the dispatch task.
    pub fn spawn(
        self,
        routing: Arc<dyn Routing>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> RouterHandle {
        let stop = CancellationToken::new();
        let dispatcher = Dispatcher::new(routing, factory, self.inbound_tx.clone());
        let task = tokio::spawn(run(dispatcher, self.inbound_rx, stop.clone()));
        RouterHandle {
            inbound: self.inbound_tx,
            stop,
            task,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

/// Handle to a running router.
pub struct RouterHandle {
    inbound: mpsc::Sender<Frame>,
    stop: CancellationToken,
    task: JoinHandle<RouterStats>,
}

impl RouterHandle {
    /// Sender for frames to be routed.
    pub fn inbound(&self) -> mpsc::Sender<Frame> {
        self.inbound.clone()
    }

    /// Ask the dispatch loop to exit. Frames still queued are not processed.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token fired by [`stop`](Self::stop).
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Wait for the dispatch loop to exit.
    pub async fn join(self) -> Result<RouterStats> {
        self.task
            .await
            .map_err(|err| PeerError::Disconnected(format!("router task failed: {err}")))
    }
}

/// Only `stop` ends the loop. The dispatcher holds a sender for its own
/// inbound channel, so `recv` never sees it close.
async fn run(
    mut dispatcher: Dispatcher,
    mut inbound: mpsc::Receiver<Frame>,
    stop: CancellationToken,
) -> RouterStats {
    info!("router started");
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            Some(frame) = inbound.recv() => dispatcher.dispatch(frame),
        }
    }
    let stats = dispatcher.stats();
    info!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        open_streams = stats.open_streams,
        "router stopped"
    );
    stats
}

/// Per-frame routing state. Only the dispatch task touches it.
struct Dispatcher {
    routing: Arc<dyn Routing>,
    factory: Arc<dyn ConnectionFactory>,
    sink: mpsc::Sender<Frame>,
    bindings: HashMap<MessageId, Arc<dyn Connection>>,
    delivered: u64,
    dropped: u64,
}

impl Dispatcher {
    fn new(
        routing: Arc<dyn Routing>,
        factory: Arc<dyn ConnectionFactory>,
        sink: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            routing,
            factory,
            sink,
            bindings: HashMap::new(),
            delivered: 0,
            dropped: 0,
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        if frame.frame_number() == 0 {
            self.dispatch_first(frame);
        } else {
            self.dispatch_next(frame);
        }
    }

    fn dispatch_first(&mut self, frame: Frame) {
        let id = frame.id();
        let last = frame.is_last();

        let Some(&address) = self.routing.route(frame.destination()).first() else {
            warn!(message_id = %id, destination = frame.destination(), "no route for destination; dropping frame");
            self.dropped += 1;
            return;
        };

        let conn = match self.factory.get(address, &self.sink) {
            Ok(conn) => conn,
            Err(err) => {
                warn!(message_id = %id, destination = frame.destination(), error = %err, "no connection for destination; dropping frame");
                self.dropped += 1;
                return;
            }
        };

        debug!(message_id = %id, %address, destination = frame.destination(), "routing stream");
        if let Err(err) = conn.send(frame) {
            warn!(message_id = %id, error = %err, "dropping frame");
            self.dropped += 1;
            return;
        }
        self.delivered += 1;

        if !last {
            self.bindings.insert(id, conn);
        }
    }

    fn dispatch_next(&mut self, frame: Frame) {
        let id = frame.id();
        let n = frame.frame_number();
        let last = frame.is_last();

        let Some(conn) = self.bindings.get(&id) else {
            warn!(message_id = %id, frame = n, "no active connection for stream; dropping frame");
            self.dropped += 1;
            return;
        };

        match conn.send(frame) {
            Ok(()) => {
                self.delivered += 1;
                if last {
                    self.bindings.remove(&id);
                }
            }
            Err(err) => {
                warn!(message_id = %id, frame = n, error = %err, "dropping rest of stream");
                self.dropped += 1;
                self.bindings.remove(&id);
            }
        }
    }

    fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.delivered,
            dropped: self.dropped,
            open_streams: self.bindings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use procbus_frame::{BufferPool, FrameFlags, FrameHeader, WriteStream};
    use procbus_routing::{Address, Addresses, RoutingTable, ShardEntry, Sharded, Simple};

    use super::*;
    use crate::log::LogConnectionFactory;

    fn a(node: u32, process: u32) -> Address {
        Address::new(node, process)
    }

    fn test_routing() -> Arc<RoutingTable> {
        let table = RoutingTable::new();
        table.upsert_simple("s:/test1", Simple::new([a(0, 1)]));
        table.upsert_simple("s:/test2", Simple::new([a(0, 2)]));
        table.upsert_sharded(
            "s:/test/",
            Sharded::new([
                ShardEntry::new("0000", "0010", [a(0, 1)]),
                ShardEntry::new("0011", "0020", [a(0, 2)]),
            ]),
        );
        Arc::new(table)
    }

    fn dispatcher(
        routing: Arc<dyn Routing>,
        factory: Arc<LogConnectionFactory>,
    ) -> (Dispatcher, mpsc::Receiver<Frame>) {
        let (sink, rx) = mpsc::channel(1);
        (Dispatcher::new(routing, factory, sink), rx)
    }

    /// Encode `data` as a complete stream and return its frames.
    async fn frames(id: MessageId, dest: &str, data: &[u8], pool: &BufferPool) -> Vec<Frame> {
        let (tx, mut rx) = mpsc::channel(1024);
        let mut ws = WriteStream::new(id, dest, tx, pool.clone()).expect("destination fits");
        ws.write(data).await.expect("write should succeed");
        ws.close().await.expect("close should succeed");
        drop(ws);

        let mut out = Vec::new();
        while let Some(frame) = rx.recv().await {
            out.push(frame);
        }
        out
    }

    fn lorem() -> Vec<u8> {
        "Lorel Ipsum Dolor Sic Amet... ".repeat(200).into_bytes()
    }

    #[tokio::test]
    async fn streams_follow_their_first_frame() {
        let pool = BufferPool::new(64, 256);
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(test_routing(), factory.clone());
        let data = lorem();

        let first = MessageId::new(0, 0, 1);
        let second = MessageId::new(0, 0, 2);
        for frame in frames(first, "s:/test1/toto/tata", &data, &pool).await {
            dispatcher.dispatch(frame);
        }
        for frame in frames(second, "s:/test2/toto/tata", &data, &pool).await {
            dispatcher.dispatch(frame);
        }

        let one = factory.connection(a(0, 1)).expect("0.1 was used");
        let two = factory.connection(a(0, 2)).expect("0.2 was used");
        assert_eq!(one.payload_len(first), data.len());
        assert_eq!(one.payload_len(second), 0);
        assert_eq!(two.payload_len(second), data.len());

        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.open_streams, 0);
    }

    #[tokio::test]
    async fn sharded_destination_routes_by_key() {
        let pool = BufferPool::new(8, 256);
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(test_routing(), factory.clone());

        let id = MessageId::new(0, 0, 1);
        for frame in frames(id, "s:/test/0018/tata", b"shard", &pool).await {
            dispatcher.dispatch(frame);
        }

        assert_eq!(factory.addresses(), vec![a(0, 2)]);
    }

    #[tokio::test]
    async fn affinity_survives_routing_changes() {
        let pool = BufferPool::new(64, 256);
        let routing = test_routing();
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(routing.clone(), factory.clone());
        let data = lorem();

        let id = MessageId::new(0, 0, 1);
        let mut stream = frames(id, "s:/test1/toto", &data, &pool).await.into_iter();
        dispatcher.dispatch(stream.next().expect("at least one frame"));

        assert!(routing.remove("s:/test1"));
        routing.upsert_simple("s:/test1", Simple::new([a(0, 9)]));

        for frame in stream {
            dispatcher.dispatch(frame);
        }

        let one = factory.connection(a(0, 1)).expect("0.1 was used");
        assert_eq!(one.payload_len(id), data.len());
        assert!(factory.connection(a(0, 9)).is_none());

        let records = one.records();
        assert!(records.first().is_some_and(|r| r.flags.contains(FrameFlags::FIRSTFRAME)));
        assert!(records.last().is_some_and(|r| r.flags.contains(FrameFlags::LASTFRAME)));
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.frame_number, i as u64);
        }
    }

    #[tokio::test]
    async fn unroutable_frames_are_dropped() {
        let pool = BufferPool::new(8, 256);
        let before = pool.available();
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(test_routing(), factory.clone());

        let lost = MessageId::new(0, 0, 1);
        for frame in frames(lost, "s:/nowhere", &[1u8; 500], &pool).await {
            dispatcher.dispatch(frame);
        }
        assert!(factory.addresses().is_empty());
        assert_eq!(pool.available(), before);

        let found = MessageId::new(0, 0, 2);
        for frame in frames(found, "s:/test2/x", b"ok", &pool).await {
            dispatcher.dispatch(frame);
        }

        let two = factory.connection(a(0, 2)).expect("0.2 was used");
        assert_eq!(two.payload_len(found), 2);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.open_streams, 0);
    }

    #[tokio::test]
    async fn invalid_address_is_dropped() {
        let pool = BufferPool::new(8, 256);
        let routing: Arc<dyn Routing> = Arc::new(|_: &str| -> Addresses { vec![a(0, 0)] });
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(routing, factory.clone());

        for frame in frames(MessageId::new(0, 0, 1), "s:/any", b"x", &pool).await {
            dispatcher.dispatch(frame);
        }

        assert!(factory.addresses().is_empty());
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn closed_connection_unbinds_stream() {
        let pool = BufferPool::new(64, 256);
        let routing: Arc<dyn Routing> = Arc::new(|_: &str| -> Addresses { vec![a(0, 1)] });
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(routing, factory.clone());

        let id = MessageId::new(0, 0, 1);
        let mut stream = frames(id, "s:/any", &[0u8; 1000], &pool).await.into_iter();
        dispatcher.dispatch(stream.next().expect("at least one frame"));
        assert_eq!(dispatcher.stats().open_streams, 1);

        factory
            .connection(a(0, 1))
            .expect("0.1 was used")
            .close();
        dispatcher.dispatch(stream.next().expect("more than one frame"));
        assert_eq!(dispatcher.stats().open_streams, 0);
    }

    #[tokio::test]
    async fn spawned_router_forwards_and_stops() {
        let pool = BufferPool::new(64, 256);
        let factory = Arc::new(LogConnectionFactory::new());
        let handle = Router::new(RouterConfig::default()).spawn(test_routing(), factory.clone());
        let inbound = handle.inbound();

        let id = MessageId::new(0, 5, 1);
        let data = lorem();
        let mut ws = WriteStream::new(id, "s:/test2/spawned", inbound, pool).expect("destination fits");
        ws.write(&data).await.expect("router should accept frames");
        ws.close().await.expect("router should accept frames");

        let two = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(conn) = factory.connection(a(0, 2)) {
                    if conn.payload_len(id) == data.len() {
                        return conn;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all frames should be delivered");
        assert!(two.records().last().is_some_and(|r| r.flags.contains(FrameFlags::LASTFRAME)));

        handle.stop();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("router should stop")
            .expect("router task should not panic");
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.open_streams, 0);
    }

    #[tokio::test]
    async fn abandoned_stream_stays_bound_until_stop() {
        let pool = BufferPool::new(8, 256);
        let factory = Arc::new(LogConnectionFactory::new());
        let handle = Router::new(RouterConfig::default()).spawn(test_routing(), factory.clone());

        let id = MessageId::new(0, 5, 1);
        let inbound = handle.inbound();
        let first = FrameHeader::first(id, "s:/test1/half");
        inbound
            .send(Frame::encode(&pool, first, b"start").expect("frame should encode"))
            .await
            .expect("router should accept frames");
        drop(inbound);

        tokio::time::timeout(Duration::from_secs(5), async {
            while factory.connection(a(0, 1)).is_none_or(|conn| conn.payload_len(id) == 0) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first frame should be delivered");

        handle.stop();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("router should stop")
            .expect("router task should not panic");
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.open_streams, 1);
    }

    #[tokio::test]
    async fn single_frame_stream_creates_no_binding() {
        let pool = BufferPool::new(8, 256);
        let factory = Arc::new(LogConnectionFactory::new());
        let (mut dispatcher, _rx) = dispatcher(test_routing(), factory.clone());

        let header = FrameHeader::first(MessageId::new(0, 0, 1), "s:/test1").into_last();
        dispatcher.dispatch(Frame::encode(&pool, header, b"one").expect("frame should encode"));

        assert_eq!(dispatcher.stats().open_streams, 0);
        assert_eq!(dispatcher.stats().delivered, 1);
    }
}
