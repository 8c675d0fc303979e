//! Loopback TCP transport for the process bus.
//!
//! This is the lowest layer of procbus. It knows nothing about frames:
//! - [`BusListener`] binds and accepts raw TCP streams
//! - [`connect`] dials the bus daemon
//! - [`handshake`] exchanges the 4-byte process id that registers a peer
//!
//! The handshake is an unguarded identity claim. It is meant for trusted
//! localhost deployments and performs no authentication.

pub mod error;
pub mod handshake;
pub mod tcp;

pub use error::{Result, TransportError};
pub use handshake::{recv_process_id, send_process_id, HANDSHAKE_SIZE};
pub use tcp::{connect, BusListener, DEFAULT_BUS_ADDRESS};
