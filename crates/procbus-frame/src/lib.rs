//! Bounded-size frames and stream multiplexing for the process bus.
//!
//! Every frame on the wire is prefixed by a single length byte and carries:
//! - A 16-byte message id (node, process, per-connection counter)
//! - An 8-byte big-endian frame number, starting at 0
//! - A flags byte (`FIRSTFRAME`, `LASTFRAME`)
//! - On first frames only, a length-prefixed destination path
//!
//! A [`WriteStream`] cuts an arbitrarily long byte sequence into frames under
//! one [`MessageId`]; a [`ReadStream`] reassembles them. Frame buffers come
//! from a [`BufferPool`] and go back to it when the frame is dropped.

pub mod codec;
pub mod error;
pub mod flags;
pub mod msgid;
pub mod pool;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameCodec, FrameHeader, HEADER_SIZE, MAX_DESTINATION_LEN,
    MAX_FRAME_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result, StreamError};
pub use flags::FrameFlags;
pub use msgid::{MessageId, MESSAGE_ID_SIZE};
pub use pool::{BufferPool, PooledBuf, DEFAULT_POOL_CAPACITY, FRAME_BUFFER_SIZE, IO_BUFFER_SIZE};
pub use reader::ReadStream;
pub use writer::WriteStream;
