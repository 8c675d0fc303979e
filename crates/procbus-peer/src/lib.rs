//! Connections, routing dispatch and client for the process bus.
//!
//! - [`Connection`] / [`ConnectionFactory`]: where frames for an [`Address`]
//!   go. [`TcpConnectionFactory`] accepts registering processes over TCP;
//!   [`LogConnectionFactory`] records frames for tests.
//! - [`Router`]: single dispatch task binding each message to the connection
//!   its first frame resolved to.
//! - [`Client`]: the process side, opening write streams and handing inbound
//!   read streams to a [`StreamListener`].
//!
//! [`Address`]: procbus_routing::Address

pub mod client;
pub mod connection;
pub mod error;
pub mod log;
pub mod router;
pub mod tcp;

pub use client::{Client, ClientConfig, StreamListener};
pub use connection::{Connection, ConnectionFactory};
pub use error::{ConnectionError, PeerError, Result};
pub use log::{FrameRecord, LogConnection, LogConnectionFactory};
pub use router::{Router, RouterConfig, RouterHandle, RouterStats};
pub use tcp::{ConnectionConfig, TcpConnection, TcpConnectionFactory};
