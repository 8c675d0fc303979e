use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::trace;

use crate::codec::{Frame, FrameHeader, MAX_DESTINATION_LEN, MAX_PAYLOAD};
use crate::error::{FrameError, StreamError};
use crate::msgid::MessageId;
use crate::pool::BufferPool;

/// Write side of a message stream.
///
/// Bytes are accumulated and cut into frames under a single [`MessageId`].
/// Frame numbers start at 0 and grow by one per emitted frame; the first
/// frame carries the destination and exactly one frame carries `LASTFRAME`.
/// Frames are pushed onto `out` in order.
pub struct WriteStream {
    id: MessageId,
    destination: String,
    next_frame: u64,
    pending: BytesMut,
    closed: bool,
    out: mpsc::Sender<Frame>,
    pool: BufferPool,
}

impl WriteStream {
    /// Open a stream toward `destination`.
    ///
    /// Fails if the destination cannot fit in a first frame.
    pub fn new(
        id: MessageId,
        destination: impl Into<String>,
        out: mpsc::Sender<Frame>,
        pool: BufferPool,
    ) -> Result<Self, StreamError> {
        let destination = destination.into();
        if destination.len() > MAX_DESTINATION_LEN {
            return Err(FrameError::DestinationTooLong {
                len: destination.len(),
                max: MAX_DESTINATION_LEN,
            }
            .into());
        }

        Ok(Self {
            id,
            destination,
            next_frame: 0,
            pending: BytesMut::with_capacity(MAX_PAYLOAD),
            closed: false,
            out,
            pool,
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Number of frames emitted so far.
    pub fn frames_sent(&self) -> u64 {
        self.next_frame
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append `data`, emitting every full frame it completes.
    ///
    /// At most one frame's worth of bytes stays buffered; it is flushed by
    /// [`close`](Self::close).
    pub async fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.pending.extend_from_slice(data);
        while self.pending.len() > self.capacity() {
            self.emit(false).await?;
        }
        Ok(())
    }

    /// Flush what is buffered and mark the stream finished.
    ///
    /// The final frame carries `LASTFRAME`, so a stream that never held more
    /// than one frame's worth of data is a single `FIRSTFRAME | LASTFRAME`
    /// frame. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Ok(());
        }
        while self.pending.len() > self.capacity() {
            self.emit(false).await?;
        }
        self.emit(true).await?;
        self.closed = true;
        Ok(())
    }

    fn capacity(&self) -> usize {
        if self.next_frame == 0 {
            MAX_DESTINATION_LEN - self.destination.len()
        } else {
            MAX_PAYLOAD
        }
    }

    async fn emit(&mut self, last: bool) -> Result<(), StreamError> {
        let n = self.pending.len().min(self.capacity());
        let chunk = self.pending.split_to(n);

        let mut header = if self.next_frame == 0 {
            FrameHeader::first(self.id, self.destination.as_str())
        } else {
            FrameHeader::continuation(self.id, self.next_frame)
        };
        if last {
            header = header.into_last();
        }

        let frame = Frame::encode(&self.pool, header, &chunk)?;
        trace!(message_id = %self.id, frame = self.next_frame, len = n, last, "emit frame");
        self.out
            .send(frame)
            .await
            .map_err(|_| StreamError::OutputClosed)?;
        self.next_frame += 1;
        Ok(())
    }
}

impl std::fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteStream")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("next_frame", &self.next_frame)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}
