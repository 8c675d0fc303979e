use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::codec::Frame;
use crate::error::StreamError;
use crate::msgid::MessageId;

/// Read side of a message stream.
///
/// Reassembles the payloads of consecutive frames sharing one [`MessageId`]
/// into a byte stream. Frames must arrive in order; a gap in frame numbers
/// is reported as [`io::ErrorKind::InvalidData`]. End of stream is reached
/// once the `LASTFRAME` payload is consumed or the inbound channel closes.
///
/// Each frame is dropped (and its buffer recycled) as soon as its payload is
/// fully read.
pub struct ReadStream {
    id: MessageId,
    destination: String,
    current: Option<Frame>,
    offset: usize,
    next_frame: u64,
    finished: bool,
    deferred: Option<StreamError>,
    inbound: mpsc::Receiver<Frame>,
}

impl ReadStream {
    /// Wait for the first frame on `inbound` and open the stream from it.
    ///
    /// Fails with [`StreamError::Empty`] if the channel closes before any
    /// frame arrives, and with [`StreamError::NotFirstFrame`] if that frame is
    /// not frame 0.
    pub async fn open(mut inbound: mpsc::Receiver<Frame>) -> Result<Self, StreamError> {
        let first = inbound.recv().await.ok_or(StreamError::Empty)?;
        if first.frame_number() != 0 {
            return Err(StreamError::NotFirstFrame(first.frame_number()));
        }

        Ok(Self {
            id: first.id(),
            destination: first.destination().to_owned(),
            current: Some(first),
            offset: 0,
            next_frame: 1,
            finished: false,
            deferred: None,
            inbound,
        })
    }

    /// Stream identifier, taken from the first frame.
    pub fn message_id(&self) -> MessageId {
        self.id
    }

    /// Destination path carried by the first frame.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether the final frame has been fully consumed.
    pub fn is_finished(&self) -> bool {
        self.finished && self.current.is_none()
    }

    /// Drops the current frame once drained. Returns `true` if it was the last one.
    fn release_current(&mut self) -> bool {
        match self.current.take() {
            Some(frame) => frame.is_last(),
            None => false,
        }
    }
}

impl AsyncRead for ReadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();

        if let Some(err) = this.deferred.take() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, err)));
        }

        while buf.remaining() > 0 {
            if let Some(frame) = &this.current {
                let payload = &frame.payload()[this.offset..];
                if !payload.is_empty() {
                    let n = payload.len().min(buf.remaining());
                    buf.put_slice(&payload[..n]);
                    this.offset += n;
                    continue;
                }
                if this.release_current() {
                    this.finished = true;
                }
            }

            if this.finished {
                break;
            }

            match this.inbound.poll_recv(cx) {
                Poll::Ready(Some(frame)) => {
                    if frame.frame_number() != this.next_frame {
                        let err = StreamError::OutOfOrder {
                            expected: this.next_frame,
                            found: frame.frame_number(),
                        };
                        tracing::warn!(message_id = %this.id, error = %err, "dropping stream");
                        this.finished = true;
                        if buf.filled().len() > start {
                            this.deferred = Some(err);
                            break;
                        }
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, err)));
                    }
                    this.next_frame += 1;
                    this.offset = 0;
                    this.current = Some(frame);
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    break;
                }
                Poll::Pending => {
                    if buf.filled().len() > start {
                        break;
                    }
                    return Poll::Pending;
                }
            }
        }

        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("next_frame", &self.next_frame)
            .field("finished", &self.finished)
            .finish()
    }
}
