//! Ordering identifiers handed out by the configuration layer.
//!
//! A [`ConfigNodeId`] names a configuration node (a term, or a statement in a
//! term block) together with the node that precedes it. Nodes may arrive in
//! any order; a [`ConfigNodeIdMap`] parks a node until its predecessor is
//! known and threads it in afterwards, so iteration always follows the
//! configured order.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Identifier of one configuration node.
///
/// `position` is the `unique` id of the predecessor, `0` meaning "first".
/// Equality and hashing only look at `unique`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfigNodeId {
    unique: u64,
    position: u64,
}

impl ConfigNodeId {
    pub fn new(unique: u64, position: u64) -> Self {
        ConfigNodeId { unique, position }
    }

    pub fn unique(&self) -> u64 {
        self.unique
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_first(&self) -> bool {
        self.position == 0
    }
}

impl PartialEq for ConfigNodeId {
    fn eq(&self, other: &Self) -> bool {
        self.unique == other.unique
    }
}

impl Eq for ConfigNodeId {}

impl Hash for ConfigNodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique.hash(state);
    }
}

impl Display for ConfigNodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} {}", self.unique, self.position)
    }
}

impl FromStr for ConfigNodeId {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let parse = |p: Option<&str>| {
            p.and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| PolicyError::InvalidFormat(format!("bad config node id {s:?}")))
        };
        let unique = parse(parts.next())?;
        let position = parse(parts.next())?;
        if parts.next().is_some() {
            return Err(PolicyError::InvalidFormat(format!(
                "bad config node id {s:?}"
            )));
        }
        Ok(ConfigNodeId::new(unique, position))
    }
}

/// Ordered map threaded by predecessor ids, with a pending list for nodes
/// that arrived before their predecessor.
#[derive(Debug, Clone)]
pub struct ConfigNodeIdMap<T> {
    entries: Vec<(ConfigNodeId, T)>,
    pending: Vec<(ConfigNodeId, T)>,
}

impl<T> Default for ConfigNodeIdMap<T> {
    fn default() -> Self {
        ConfigNodeIdMap {
            entries: Vec::new(),
            pending: Vec::new(),
        }
    }
}

impl<T> ConfigNodeIdMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, threading it in if its predecessor is known and
    /// parking it otherwise. A duplicate id hands the value back.
    pub fn insert(&mut self, id: ConfigNodeId, value: T) -> Result<(), T> {
        if self.contains(&id) {
            return Err(value);
        }
        if let Err(value) = self.try_thread(id, value) {
            self.pending.push((id, value));
        }
        self.retry_pending();
        Ok(())
    }

    /// Remove a node, threaded or pending.
    pub fn remove(&mut self, id: &ConfigNodeId) -> Option<T> {
        let removed = if let Some(i) = self.entries.iter().position(|(k, _)| k == id) {
            Some(self.entries.remove(i).1)
        } else if let Some(i) = self.pending.iter().position(|(k, _)| k == id) {
            Some(self.pending.remove(i).1)
        } else {
            None
        };
        self.retry_pending();
        removed
    }

    pub fn contains(&self, id: &ConfigNodeId) -> bool {
        self.entries.iter().any(|(k, _)| k == id) || self.pending.iter().any(|(k, _)| k == id)
    }

    pub fn get(&self, id: &ConfigNodeId) -> Option<&T> {
        self.all().find(|(k, _)| *k == id).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: &ConfigNodeId) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|(k, _)| k == id)
            .map(|(_, v)| v)
    }

    /// Threaded nodes, in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (&ConfigNodeId, &T)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Threaded nodes followed by pending ones.
    pub fn all(&self) -> impl Iterator<Item = (&ConfigNodeId, &T)> {
        self.entries
            .iter()
            .chain(self.pending.iter())
            .map(|(k, v)| (k, v))
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = (&ConfigNodeId, &mut T)> {
        self.entries
            .iter_mut()
            .chain(self.pending.iter_mut())
            .map(|(k, v)| (&*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn try_thread(&mut self, id: ConfigNodeId, value: T) -> Result<(), T> {
        if id.is_first() {
            self.entries.insert(0, (id, value));
            return Ok(());
        }
        match self
            .entries
            .iter()
            .position(|(k, _)| k.unique() == id.position())
        {
            Some(i) => {
                self.entries.insert(i + 1, (id, value));
                Ok(())
            }
            None => Err(value),
        }
    }

    fn retry_pending(&mut self) {
        loop {
            let mut progressed = false;
            let pending = std::mem::take(&mut self.pending);
            for (id, value) in pending {
                match self.try_thread(id, value) {
                    Ok(()) => progressed = true,
                    Err(value) => self.pending.push((id, value)),
                }
            }
            if !progressed || self.pending.is_empty() {
                break;
            }
        }
    }
}
