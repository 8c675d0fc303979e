use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::address::{Address, Addresses};
use crate::rule::{Rule, Sharded, Simple};
use crate::update::RoutingUpdate;

/// Destinations starting with this prefix name their target directly:
/// `x:/<node>/<process>[/...]`.
pub const LITERAL_PREFIX: &str = "x:/";

/// Resolves a destination path to candidate target addresses.
pub trait Routing: Send + Sync {
    /// Returns an empty list when nothing matches.
    fn route(&self, destination: &str) -> Addresses;
}

impl<F> Routing for F
where
    F: Fn(&str) -> Addresses + Send + Sync,
{
    fn route(&self, destination: &str) -> Addresses {
        self(destination)
    }
}

/// Prefix trie of routing rules behind a single lock.
///
/// Lookups and mutations each hold the lock for their whole duration, so a
/// [`RoutingUpdate`] batch is never observed half-applied.
#[derive(Default)]
pub struct RoutingTable {
    trie: Mutex<Trie>,
}

#[derive(Default)]
struct Trie {
    root: Node,
    len: usize,
}

#[derive(Default)]
struct Node {
    rule: Option<Rule>,
    children: BTreeMap<u8, Node>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a single update batch.
    pub fn from_update(update: &RoutingUpdate) -> Self {
        let table = Self::new();
        table.apply(update);
        table
    }

    /// Insert or replace a simple rule.
    pub fn upsert_simple(&self, prefix: &str, rule: Simple) {
        self.lock().insert(prefix, rule.into());
    }

    /// Insert or replace a sharded rule.
    pub fn upsert_sharded(&self, prefix: &str, rule: Sharded) {
        self.lock().insert(prefix, rule.into());
    }

    /// Remove the rule stored exactly at `prefix`. Returns whether one existed.
    pub fn remove(&self, prefix: &str) -> bool {
        self.lock().remove(prefix)
    }

    /// Apply a batch: deletions first, then simple rules, then sharded rules.
    pub fn apply(&self, update: &RoutingUpdate) {
        let mut trie = self.lock();
        let mut deleted = 0usize;
        for prefix in &update.delete {
            if trie.remove(prefix) {
                deleted += 1;
            }
        }
        for (prefix, rule) in &update.services {
            trie.insert(prefix, Rule::Simple(rule.clone()));
        }
        for (prefix, rule) in &update.shards {
            trie.insert(prefix, Rule::Sharded(rule.clone()));
        }
        debug!(
            deleted,
            services = update.services.len(),
            shards = update.shards.len(),
            rules = trie.len,
            "applied routing update"
        );
    }

    /// Number of stored rules.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every rule, ordered by prefix.
    pub fn rules(&self) -> Vec<(String, Rule)> {
        let trie = self.lock();
        let mut out = Vec::with_capacity(trie.len);
        let mut path = Vec::new();
        collect(&trie.root, &mut path, &mut out);
        out
    }

    fn lock(&self) -> MutexGuard<'_, Trie> {
        self.trie.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Routing for RoutingTable {
    fn route(&self, destination: &str) -> Addresses {
        if let Some(literal) = destination.strip_prefix(LITERAL_PREFIX) {
            return parse_literal(literal).into_iter().collect();
        }

        let trie = self.lock();
        match trie.longest_match(destination) {
            Some((len, rule)) => rule.resolve(destination.get(len..).unwrap_or_default()),
            None => Addresses::new(),
        }
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("rules", &self.len())
            .finish()
    }
}

impl Trie {
    fn insert(&mut self, prefix: &str, rule: Rule) {
        let mut node = &mut self.root;
        for byte in prefix.bytes() {
            node = node.children.entry(byte).or_default();
        }
        if node.rule.replace(rule).is_none() {
            self.len += 1;
        }
    }

    fn remove(&mut self, prefix: &str) -> bool {
        let removed = remove_at(&mut self.root, prefix.as_bytes());
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Deepest rule whose prefix is a prefix of `destination`, with its length.
    fn longest_match(&self, destination: &str) -> Option<(usize, &Rule)> {
        let mut node = &self.root;
        let mut best = node.rule.as_ref().map(|rule| (0, rule));
        for (i, byte) in destination.bytes().enumerate() {
            match node.children.get(&byte) {
                Some(child) => node = child,
                None => break,
            }
            if let Some(rule) = &node.rule {
                best = Some((i + 1, rule));
            }
        }
        best
    }
}

fn remove_at(node: &mut Node, key: &[u8]) -> bool {
    let Some((first, rest)) = key.split_first() else {
        return node.rule.take().is_some();
    };
    let Some(child) = node.children.get_mut(first) else {
        return false;
    };
    let removed = remove_at(child, rest);
    if child.rule.is_none() && child.children.is_empty() {
        node.children.remove(first);
    }
    removed
}

fn collect(node: &Node, path: &mut Vec<u8>, out: &mut Vec<(String, Rule)>) {
    if let Some(rule) = &node.rule {
        out.push((String::from_utf8_lossy(path).into_owned(), rule.clone()));
    }
    for (byte, child) in &node.children {
        path.push(*byte);
        collect(child, path, out);
        path.pop();
    }
}

fn parse_literal(rest: &str) -> Option<Address> {
    let mut parts = rest.split('/');
    let node = parts.next()?.parse().ok()?;
    let process = parts.next()?.parse().ok()?;
    Some(Address::new(node, process))
}
