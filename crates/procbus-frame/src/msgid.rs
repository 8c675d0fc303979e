use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, BufMut};

use crate::error::{FrameError, Result};

/// Size of a message id on the wire.
pub const MESSAGE_ID_SIZE: usize = 16;

/// Leading bytes of the text form that are always zero.
const RESERVED_PREFIX: usize = 2;

/// Identifies one logical stream for its whole lifetime.
///
/// Composed of the sender's node id, its process id and a per-connection
/// counter. The text form (used in logs) is the unpadded URL-safe base64 of
/// two reserved zero bytes followed by the 16 wire bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId {
    node: u32,
    process: u32,
    counter: u64,
}

impl MessageId {
    pub const fn new(node: u32, process: u32, counter: u64) -> Self {
        Self {
            node,
            process,
            counter,
        }
    }

    pub const fn node(&self) -> u32 {
        self.node
    }

    pub const fn process(&self) -> u32 {
        self.process
    }

    pub const fn counter(&self) -> u64 {
        self.counter
    }

    /// `(node, process, counter)`.
    pub const fn split(&self) -> (u32, u32, u64) {
        (self.node, self.process, self.counter)
    }

    /// Big-endian wire form.
    pub fn to_wire(&self) -> [u8; MESSAGE_ID_SIZE] {
        let mut out = [0u8; MESSAGE_ID_SIZE];
        let mut dst = &mut out[..];
        dst.put_u32(self.node);
        dst.put_u32(self.process);
        dst.put_u64(self.counter);
        out
    }

    /// Parse the wire form. `src` must be exactly [`MESSAGE_ID_SIZE`] bytes.
    pub fn from_wire(mut src: &[u8]) -> Result<Self> {
        if src.len() != MESSAGE_ID_SIZE {
            return Err(FrameError::InvalidMessageId(src.len()));
        }
        Ok(Self {
            node: src.get_u32(),
            process: src.get_u32(),
            counter: src.get_u64(),
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = [0u8; RESERVED_PREFIX + MESSAGE_ID_SIZE];
        raw[RESERVED_PREFIX..].copy_from_slice(&self.to_wire());
        f.write_str(&URL_SAFE_NO_PAD.encode(raw))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({}.{}#{})", self.node, self.process, self.counter)
    }
}
