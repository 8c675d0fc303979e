//! Intra-host message bus.
//!
//! Processes on one machine register with a daemon over TCP, split byte
//! streams into small frames, and the daemon forwards each stream to the
//! process its destination path resolves to.
//!
//! # Crate Structure
//!
//! - [`transport`] — Loopback TCP listener/connector and registration handshake
//! - [`frame`] — Frame codec, buffer pools, write/read streams
//! - [`routing`] — Prefix and shard routing table
//! - [`peer`] — Connections, router dispatch loop, client
//! - [`config`] / [`daemon`] — Daemon configuration and wiring

pub mod config;
pub mod daemon;

pub use config::{BusConfig, ConfigError};
pub use daemon::Daemon;

/// Re-export transport types.
pub mod transport {
    pub use procbus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use procbus_frame::*;
}

/// Re-export routing types.
pub mod routing {
    pub use procbus_routing::*;
}

/// Re-export peer types.
pub mod peer {
    pub use procbus_peer::*;
}
