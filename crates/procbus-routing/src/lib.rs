//! Destination resolution for the process bus.
//!
//! A destination is a path such as `s:/billing/invoices/42`. It resolves to
//! a list of [`Address`]es in one of two ways:
//!
//! - Literal: `x:/<node>/<process>/...` names the target directly.
//! - Routed: the longest stored prefix of the destination selects a
//!   [`Rule`]. A simple rule returns its targets; a sharded rule picks the
//!   range whose `[from, to]` contains the path segment following the prefix.
//!
//! Rules are managed individually or in atomic [`RoutingUpdate`] batches.

pub mod address;
pub mod error;
pub mod rule;
pub mod table;
pub mod update;

pub use address::{Address, Addresses, INVALID_ADDRESS};
pub use error::{Result, RoutingError};
pub use rule::{Rule, ShardEntry, Sharded, Simple};
pub use table::{Routing, RoutingTable, LITERAL_PREFIX};
pub use update::RoutingUpdate;
