use procbus_routing::Address;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] procbus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] procbus_frame::FrameError),

    /// Stream-level error.
    #[error("stream error: {0}")]
    Stream(#[from] procbus_frame::StreamError),

    /// Connection lookup or delivery error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// I/O error while copying stream data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection to the bus is gone.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Errors reported by connections and connection factories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// No transport is registered for the address.
    #[error("no connection for address {0}")]
    NoConnection(Address),

    /// The address can never be connected to.
    #[error("invalid address {0}")]
    InvalidAddress(Address),

    /// The send queue is full; the frame was dropped.
    #[error("send queue full for {0}")]
    QueueFull(Address),

    /// The connection has been closed.
    #[error("connection to {0} closed")]
    Closed(Address),
}
