/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in the space left after the header.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The destination does not fit in a first frame.
    #[error("destination too long ({len} bytes, max {max})")]
    DestinationTooLong { len: usize, max: usize },

    /// The encoded frame exceeds the one-byte length prefix.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The buffer ends before the header (or the declared destination) does.
    #[error("truncated frame ({size} bytes, need at least {needed})")]
    Truncated { size: usize, needed: usize },

    /// The message id region has the wrong length.
    #[error("invalid message id size {0} (expected 16)")]
    InvalidMessageId(usize),

    /// The destination bytes are not valid UTF-8.
    #[error("destination is not valid UTF-8")]
    InvalidDestination,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised by write-side and read-side streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The stream already emitted its last frame.
    #[error("stream closed")]
    Closed,

    /// The inbound channel closed before any frame arrived.
    #[error("empty stream")]
    Empty,

    /// The first inbound frame was not frame 0.
    #[error("first frame of stream is frame {0}, expected 0")]
    NotFirstFrame(u64),

    /// A frame arrived out of sequence.
    #[error("out-of-order frame {found} (expected {expected})")]
    OutOfOrder { expected: u64, found: u64 },

    /// Nobody is draining the stream's output channel anymore.
    #[error("stream output channel closed")]
    OutputClosed,

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}
