use std::path::{Path, PathBuf};
use std::time::Duration;

use procbus_peer::{ClientConfig, ConnectionConfig, RouterConfig};
use procbus_routing::RoutingUpdate;
use procbus_transport::DEFAULT_BUS_ADDRESS;
use serde::{Deserialize, Serialize};

/// Errors raised while loading a daemon configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not a valid configuration.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Daemon configuration, as read from a JSON file.
///
/// ```json
/// {
///   "listen": "127.0.0.1:6887",
///   "node_id": 0,
///   "router": { "inbound_capacity": 64 },
///   "connection": { "send_queue_capacity": 1024, "handshake_timeout_ms": 5000 },
///   "routing": {
///     "services": { "s:/billing": { "targets": ["0.1"] } },
///     "shards": { "s:/users/": [{ "from": "a", "to": "m", "targets": ["0.2"] }] }
///   }
/// }
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub listen: String,
    pub node_id: u32,
    pub router: RouterSection,
    pub connection: ConnectionSection,
    pub routing: RoutingUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub inbound_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub send_queue_capacity: usize,
    pub handshake_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_BUS_ADDRESS.to_string(),
            node_id: 0,
            router: RouterSection::default(),
            connection: ConnectionSection::default(),
            routing: RoutingUpdate::default(),
        }
    }
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            inbound_capacity: RouterConfig::default().inbound_capacity,
        }
    }
}

impl Default for ConnectionSection {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            send_queue_capacity: defaults.send_queue_capacity,
            handshake_timeout_ms: defaults.handshake_timeout.as_millis() as u64,
        }
    }
}

impl BusConfig {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            inbound_capacity: self.router.inbound_capacity,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            send_queue_capacity: self.connection.send_queue_capacity,
            handshake_timeout: Duration::from_millis(self.connection.handshake_timeout_ms),
            local_node: self.node_id,
        }
    }

    /// Client settings matching this daemon's node.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            node_id: self.node_id,
            handshake_timeout: Duration::from_millis(self.connection.handshake_timeout_ms),
            ..ClientConfig::default()
        }
    }
}
