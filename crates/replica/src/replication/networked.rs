use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Session-wide identity of a replicated entity. Allocated by the server,
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(u64);

impl NetworkId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{}", self.0)
    }
}

/// Server-side replication state attached to a networked entity.
#[derive(Debug, Clone)]
pub struct Networked {
    pub(super) network_id: NetworkId,
    pub(super) tracked: Vec<String>,
    pub(super) last_hash: HashMap<String, u64>,
    pub(super) last_presence: HashMap<String, bool>,
    pub(super) announced: bool,
}

impl Networked {
    pub(super) fn new(network_id: NetworkId, tracked: Vec<String>) -> Self {
        Self {
            network_id,
            tracked,
            last_hash: HashMap::new(),
            last_presence: HashMap::new(),
            announced: false,
        }
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Whether a creation message has gone out for this entity.
    pub fn is_announced(&self) -> bool {
        self.announced
    }

    pub(super) fn was_present(&self, name: &str) -> bool {
        self.last_presence.get(name).copied().unwrap_or(false)
    }

    pub(super) fn observe(&mut self, name: &str, hash: Option<u64>) {
        self.last_presence.insert(name.to_string(), hash.is_some());
        match hash {
            Some(hash) => self.last_hash.insert(name.to_string(), hash),
            None => self.last_hash.remove(name),
        };
    }
}
