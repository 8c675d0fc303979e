//! Frame flags.

use bitflags::bitflags;

bitflags! {
    /// Per-frame flag bits (8 bits).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// Frame 0 of a stream; carries the destination.
        const FIRSTFRAME = 0b0000_0001;

        /// Final frame of a stream. May coincide with `FIRSTFRAME`.
        const LASTFRAME = 0b0000_0010;
    }
}

impl FrameFlags {
    /// Create flags from the raw wire byte. Unknown bits are preserved.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// Raw wire byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.bits()
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}
