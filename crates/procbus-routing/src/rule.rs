use serde::{Deserialize, Serialize};

use crate::address::{Address, Addresses};

/// Routes every destination under a prefix to a fixed list of targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simple {
    #[serde(default)]
    pub targets: Addresses,
}

impl Simple {
    pub fn new(targets: impl IntoIterator<Item = Address>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }
}

/// One shard range. `from` and `to` are inclusive and compared as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub targets: Addresses,
}

impl ShardEntry {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        targets: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            targets: targets.into_iter().collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.from.as_str() <= key && key <= self.to.as_str()
    }
}

/// Routes by the path segment that follows the prefix. Entries are checked
/// in order; the first range containing the key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sharded(pub Vec<ShardEntry>);

impl Sharded {
    pub fn new(entries: impl IntoIterator<Item = ShardEntry>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn lookup(&self, key: &str) -> Option<&ShardEntry> {
        self.0.iter().find(|entry| entry.contains(key))
    }

    pub fn entries(&self) -> &[ShardEntry] {
        &self.0
    }
}

/// A routing rule stored under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Simple(Simple),
    Sharded(Sharded),
}

impl Rule {
    /// Resolve `rest`, the part of the destination after the matched prefix.
    pub fn resolve(&self, rest: &str) -> Addresses {
        match self {
            Rule::Simple(simple) => simple.targets.clone(),
            Rule::Sharded(sharded) => {
                let key = rest.split('/').next().unwrap_or_default();
                sharded
                    .lookup(key)
                    .map(|entry| entry.targets.clone())
                    .unwrap_or_default()
            }
        }
    }
}

impl From<Simple> for Rule {
    fn from(rule: Simple) -> Self {
        Rule::Simple(rule)
    }
}

impl From<Sharded> for Rule {
    fn from(rule: Sharded) -> Self {
        Rule::Sharded(rule)
    }
}
