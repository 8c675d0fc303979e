use std::sync::Arc;

use procbus_frame::Frame;
use procbus_routing::Address;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// A sink for frames bound to one [`Address`].
///
/// Shared between the router (as a destination) and the transport that
/// registered it. The address never changes after registration.
pub trait Connection: Send + Sync {
    /// Address this connection delivers to.
    fn address(&self) -> Address;

    /// Queue a frame for transmission without waiting.
    ///
    /// On error the frame is dropped and its buffer returns to its pool.
    fn send(&self, frame: Frame) -> Result<(), ConnectionError>;

    /// Whether the underlying transport is still usable.
    fn is_ok(&self) -> bool;

    /// Release the transport. Idempotent.
    fn close(&self);

    /// Frames waiting in the send queue.
    fn queued(&self) -> usize;
}

/// Hands out connections by address.
pub trait ConnectionFactory: Send + Sync {
    /// Existing or newly established connection for `address`.
    ///
    /// `recv_sink` is where frames received on that connection should go.
    fn get(
        &self,
        address: Address,
        recv_sink: &mpsc::Sender<Frame>,
    ) -> Result<Arc<dyn Connection>, ConnectionError>;
}
