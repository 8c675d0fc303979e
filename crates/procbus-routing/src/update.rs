use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rule::{Sharded, Simple};

/// A batch of routing changes, applied atomically by
/// [`RoutingTable::apply`](crate::RoutingTable::apply).
///
/// JSON shape:
///
/// ```json
/// {
///   "delete": ["s:/old"],
///   "services": { "s:/billing": { "targets": ["0.1"] } },
///   "shards": { "s:/users/": [{ "from": "a", "to": "m", "targets": ["0.2"] }] }
/// }
/// ```
///
/// `deletions`, `simpleRules` and `shardedRules` are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingUpdate {
    #[serde(default, alias = "deletions", skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,

    #[serde(default, alias = "simpleRules", skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Simple>,

    #[serde(default, alias = "shardedRules", skip_serializing_if = "BTreeMap::is_empty")]
    pub shards: BTreeMap<String, Sharded>,
}

impl RoutingUpdate {
    /// Parse a batch from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_delete(mut self, prefix: impl Into<String>) -> Self {
        self.delete.push(prefix.into());
        self
    }

    pub fn with_service(mut self, prefix: impl Into<String>, rule: Simple) -> Self {
        self.services.insert(prefix.into(), rule);
        self
    }

    pub fn with_shards(mut self, prefix: impl Into<String>, rule: Sharded) -> Self {
        self.shards.insert(prefix.into(), rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.services.is_empty() && self.shards.is_empty()
    }
}
