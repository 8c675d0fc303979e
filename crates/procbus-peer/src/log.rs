//! In-memory connections that record what they are sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use procbus_frame::{Frame, FrameFlags, MessageId};
use procbus_routing::{Address, INVALID_ADDRESS};
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{Connection, ConnectionFactory};
use crate::error::ConnectionError;

/// What a [`LogConnection`] remembers about a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub id: MessageId,
    pub frame_number: u64,
    pub flags: FrameFlags,
    pub payload_len: usize,
}

impl FrameRecord {
    fn of(frame: &Frame) -> Self {
        Self {
            id: frame.id(),
            frame_number: frame.frame_number(),
            flags: frame.flags(),
            payload_len: frame.payload().len(),
        }
    }
}

/// Connection that logs and records every frame, then drops it.
#[derive(Debug)]
pub struct LogConnection {
    address: Address,
    records: Mutex<Vec<FrameRecord>>,
    closed: AtomicBool,
}

impl LogConnection {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            records: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Frames received so far, in arrival order.
    pub fn records(&self) -> Vec<FrameRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total payload bytes received for `id`.
    pub fn payload_len(&self, id: MessageId) -> usize {
        self.records()
            .iter()
            .filter(|record| record.id == id)
            .map(|record| record.payload_len)
            .sum()
    }
}

impl Connection for LogConnection {
    fn address(&self) -> Address {
        self.address
    }

    fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if !self.is_ok() {
            return Err(ConnectionError::Closed(self.address));
        }
        debug!(address = %self.address, frame = %frame, "recv");
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FrameRecord::of(&frame));
        Ok(())
    }

    fn is_ok(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn queued(&self) -> usize {
        0
    }
}

/// Factory creating one [`LogConnection`] per address on first use.
#[derive(Debug, Default)]
pub struct LogConnectionFactory {
    connections: Mutex<HashMap<Address, Arc<LogConnection>>>,
}

impl LogConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection previously handed out for `address`, if any.
    pub fn connection(&self, address: Address) -> Option<Arc<LogConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }

    /// Addresses that have been connected to, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        addresses.sort_unstable();
        addresses
    }
}

impl ConnectionFactory for LogConnectionFactory {
    fn get(
        &self,
        address: Address,
        _recv_sink: &mpsc::Sender<Frame>,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        if address == INVALID_ADDRESS {
            return Err(ConnectionError::InvalidAddress(address));
        }
        let connection: Arc<dyn Connection> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address)
            .or_insert_with(|| Arc::new(LogConnection::new(address)))
            .clone();
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use procbus_frame::{BufferPool, FrameHeader};

    use super::*;

    fn frame(pool: &BufferPool, n: u64) -> Frame {
        let id = MessageId::new(0, 1, 1);
        let header = if n == 0 {
            FrameHeader::first(id, "s:/log")
        } else {
            FrameHeader::continuation(id, n)
        };
        Frame::encode(pool, header, b"abc").expect("frame should encode")
    }

    #[test]
    fn records_frames_per_address() {
        let pool = BufferPool::new(4, 256);
        let factory = LogConnectionFactory::new();
        let (sink, _rx) = mpsc::channel(1);

        let conn = factory.get(Address::new(0, 1), &sink).expect("address is valid");
        conn.send(frame(&pool, 0)).expect("log connection accepts frames");
        conn.send(frame(&pool, 1)).expect("log connection accepts frames");

        let log = factory.connection(Address::new(0, 1)).expect("connection exists");
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].flags, FrameFlags::FIRSTFRAME);
        assert_eq!(records[1].frame_number, 1);
        assert_eq!(log.payload_len(MessageId::new(0, 1, 1)), 6);
    }

    #[test]
    fn same_address_same_connection() {
        let factory = LogConnectionFactory::new();
        let (sink, _rx) = mpsc::channel(1);

        let a = factory.get(Address::new(0, 2), &sink).expect("address is valid");
        let b = factory.get(Address::new(0, 2), &sink).expect("address is valid");
        let _c = factory.get(Address::new(0, 3), &sink).expect("address is valid");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.addresses(), vec![Address::new(0, 2), Address::new(0, 3)]);
    }

    #[test]
    fn rejects_invalid_address() {
        let factory = LogConnectionFactory::new();
        let (sink, _rx) = mpsc::channel(1);
        assert_eq!(
            factory.get(INVALID_ADDRESS, &sink).err(),
            Some(ConnectionError::InvalidAddress(INVALID_ADDRESS))
        );
    }

    #[test]
    fn closed_connection_rejects_frames() {
        let pool = BufferPool::new(4, 256);
        let conn = LogConnection::new(Address::new(0, 1));
        conn.close();
        conn.close();
        assert!(!conn.is_ok());
        assert_eq!(
            conn.send(frame(&pool, 0)).err(),
            Some(ConnectionError::Closed(Address::new(0, 1)))
        );
    }
}
