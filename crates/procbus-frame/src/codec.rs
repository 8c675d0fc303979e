use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::flags::FrameFlags;
use crate::msgid::{MessageId, MESSAGE_ID_SIZE};
use crate::pool::{BufferPool, PooledBuf};

/// Largest encoded frame, excluding the outer length byte.
pub const MAX_FRAME_SIZE: usize = 255;

/// Fixed header: message id (16) + frame number (8) + flags (1) = 25 bytes.
pub const HEADER_SIZE: usize = MESSAGE_ID_SIZE + 8 + 1;

/// Payload capacity of a frame without a destination.
pub const MAX_PAYLOAD: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// Longest destination a first frame can carry (one byte is its length).
pub const MAX_DESTINATION_LEN: usize = MAX_PAYLOAD - 1;

/// Decoded frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream this frame belongs to.
    pub id: MessageId,
    /// Position of this frame in its stream, starting at 0.
    pub frame_number: u64,
    /// Flag bits.
    pub flags: FrameFlags,
    /// Destination path. Only carried by first frames; empty otherwise.
    pub destination: String,
}

impl FrameHeader {
    /// Header for frame 0 of a stream.
    pub fn first(id: MessageId, destination: impl Into<String>) -> Self {
        Self {
            id,
            frame_number: 0,
            flags: FrameFlags::FIRSTFRAME,
            destination: destination.into(),
        }
    }

    /// Header for a non-first frame.
    pub fn continuation(id: MessageId, frame_number: u64) -> Self {
        Self {
            id,
            frame_number,
            flags: FrameFlags::empty(),
            destination: String::new(),
        }
    }

    /// Same header with `LASTFRAME` set.
    pub fn into_last(mut self) -> Self {
        self.flags |= FrameFlags::LASTFRAME;
        self
    }

    pub fn is_first(&self) -> bool {
        self.flags.contains(FrameFlags::FIRSTFRAME)
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(FrameFlags::LASTFRAME)
    }

    /// Encoded size of the header, destination included.
    pub fn encoded_len(&self) -> usize {
        if self.is_first() {
            HEADER_SIZE + 1 + self.destination.len()
        } else {
            HEADER_SIZE
        }
    }

    /// Payload bytes that still fit behind this header.
    pub fn payload_capacity(&self) -> usize {
        MAX_FRAME_SIZE.saturating_sub(self.encoded_len())
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id:{}, first:{}, last:{}, n:{}, dest:{}}}",
            self.id,
            self.is_first(),
            self.is_last(),
            self.frame_number,
            self.destination
        )
    }
}

/// Encode a frame into the wire format (without the outer length byte).
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬───────┬─────────────────────────┬─────────┐
/// │ MessageId  │ Frame #   │ Flags │ DestLen (1B) + Dest     │ Payload │
/// │ (16B)      │ (8B BE)   │ (1B)  │ (FIRSTFRAME only)       │         │
/// └────────────┴───────────┴───────┴─────────────────────────┴─────────┘
/// ```
pub fn encode_frame(header: &FrameHeader, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if header.is_first() && header.destination.len() > MAX_DESTINATION_LEN {
        return Err(FrameError::DestinationTooLong {
            len: header.destination.len(),
            max: MAX_DESTINATION_LEN,
        });
    }
    let max = header.payload_capacity();
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }

    dst.reserve(header.encoded_len() + payload.len());
    dst.put_slice(&header.id.to_wire());
    dst.put_u64(header.frame_number);
    dst.put_u8(header.flags.to_byte());
    if header.is_first() {
        dst.put_u8(header.destination.len() as u8);
        dst.put_slice(header.destination.as_bytes());
    }
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame in place, returning its header and a slice of its payload.
pub fn decode_frame(src: &[u8]) -> Result<(FrameHeader, &[u8])> {
    if src.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: src.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    if src.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            size: src.len(),
            needed: HEADER_SIZE,
        });
    }

    let id = MessageId::from_wire(&src[..MESSAGE_ID_SIZE])?;
    let mut rest = &src[MESSAGE_ID_SIZE..];
    let frame_number = rest.get_u64();
    let flags = FrameFlags::from_byte(rest.get_u8());

    let mut header = FrameHeader {
        id,
        frame_number,
        flags,
        destination: String::new(),
    };

    if header.is_first() {
        let Some((&dest_len, after)) = rest.split_first() else {
            return Err(FrameError::Truncated {
                size: src.len(),
                needed: HEADER_SIZE + 1,
            });
        };
        let dest_len = dest_len as usize;
        if after.len() < dest_len {
            return Err(FrameError::Truncated {
                size: src.len(),
                needed: HEADER_SIZE + 1 + dest_len,
            });
        }
        let (dest, payload) = after.split_at(dest_len);
        header.destination = std::str::from_utf8(dest)
            .map_err(|_| FrameError::InvalidDestination)?
            .to_owned();
        rest = payload;
    }

    Ok((header, rest))
}

/// One wire unit: a decoded header plus the pooled buffer holding the
/// encoded bytes. The payload is a view into that buffer.
///
/// Dropping a frame returns its buffer to the pool it came from.
#[derive(Debug)]
pub struct Frame {
    header: FrameHeader,
    buf: PooledBuf,
    payload_offset: usize,
}

impl Frame {
    /// Encode `payload` behind `header` into a buffer borrowed from `pool`.
    pub fn encode(pool: &BufferPool, header: FrameHeader, payload: &[u8]) -> Result<Self> {
        let mut buf = pool.get();
        encode_frame(&header, payload, &mut buf)?;
        let payload_offset = header.encoded_len();
        Ok(Self {
            header,
            buf,
            payload_offset,
        })
    }

    /// Decode a received frame without copying its payload.
    pub fn decode(buf: PooledBuf) -> Result<Self> {
        let (header, payload) = decode_frame(&buf)?;
        let payload_offset = buf.len() - payload.len();
        Ok(Self {
            header,
            buf,
            payload_offset,
        })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn id(&self) -> MessageId {
        self.header.id
    }

    pub fn frame_number(&self) -> u64 {
        self.header.frame_number
    }

    pub fn flags(&self) -> FrameFlags {
        self.header.flags
    }

    /// Destination path; empty unless this is a first frame.
    pub fn destination(&self) -> &str {
        &self.header.destination
    }

    pub fn is_first(&self) -> bool {
        self.header.is_first()
    }

    pub fn is_last(&self) -> bool {
        self.header.is_last()
    }

    /// The payload carried by this frame.
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.payload_offset..]
    }

    /// The encoded frame, without the outer length byte.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Total size on the wire, outer length byte included.
    pub fn wire_size(&self) -> usize {
        1 + self.buf.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame{{header:{}, len:{}}}",
            self.header,
            self.payload().len()
        )
    }
}

/// `tokio_util` codec for length-prefixed frames.
///
/// Decoded frames are copied out of the read buffer into a buffer from the
/// frame pool, so the read buffer can be reused immediately.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    pool: BufferPool,
}

impl FrameCodec {
    pub fn new(pool: BufferPool) -> Self {
        Self { pool }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(&len) = src.first() else {
            return Ok(None);
        };
        let total = 1 + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(1);
        let mut buf = self.pool.get();
        buf.extend_from_slice(&src[..len as usize]);
        src.advance(len as usize);

        Frame::decode(buf).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let bytes = frame.as_bytes();
        let len = u8::try_from(bytes.len()).map_err(|_| FrameError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        })?;
        dst.reserve(1 + bytes.len());
        dst.put_u8(len);
        dst.put_slice(bytes);
        Ok(())
    }
}
