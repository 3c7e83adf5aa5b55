//! Cluster topology: the single writable primary and its followers
//!
//! Topology is shared mutable state behind one mutex. Readers copy a
//! snapshot out under the lock; promote and rejoin are the only mutations
//! and both are single read-modify-write critical sections.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A managed database instance: stable id, network address, container name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub container: String,
}

fn default_port() -> u16 {
    3306
}

/// A consistent copy of the topology at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub primary: InstanceDescriptor,
    pub followers: Vec<InstanceDescriptor>,
    /// Followers whose replication config could not be rewired and need an
    /// operator-driven retry
    pub needs_reconfigure: Vec<String>,
}

impl TopologySnapshot {
    pub fn total_instances(&self) -> usize {
        1 + self.followers.len()
    }

    pub fn is_follower(&self, id: &str) -> bool {
        self.followers.iter().any(|f| f.id == id)
    }
}

struct TopologyInner {
    primary: InstanceDescriptor,
    followers: Vec<InstanceDescriptor>,
    needs_reconfigure: BTreeSet<String>,
    /// Set when a failover leaves the former primary offline; cleared on rejoin
    former_primary: Option<InstanceDescriptor>,
}

/// Shared cluster topology
pub struct Topology {
    inner: Mutex<TopologyInner>,
}

impl Topology {
    /// Create a topology from the bootstrap primary and follower set
    pub fn new(primary: InstanceDescriptor, followers: Vec<InstanceDescriptor>) -> Self {
        Self {
            inner: Mutex::new(TopologyInner {
                primary,
                followers,
                needs_reconfigure: BTreeSet::new(),
                former_primary: None,
            }),
        }
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let inner = self.inner.lock();
        TopologySnapshot {
            primary: inner.primary.clone(),
            followers: inner.followers.clone(),
            needs_reconfigure: inner.needs_reconfigure.iter().cloned().collect(),
        }
    }

    pub fn primary(&self) -> InstanceDescriptor {
        self.inner.lock().primary.clone()
    }

    pub fn followers(&self) -> Vec<InstanceDescriptor> {
        self.inner.lock().followers.clone()
    }

    /// The primary displaced by the most recent failover, if it has not
    /// rejoined yet
    pub fn former_primary(&self) -> Option<InstanceDescriptor> {
        self.inner.lock().former_primary.clone()
    }

    /// Swap the primary to the named follower in one atomic step.
    ///
    /// The new primary is removed from the follower set. When
    /// `retain_old_primary` is set (graceful promotion, old primary still
    /// reachable) the displaced primary is appended to the followers;
    /// otherwise it is parked as the former primary until rejoin.
    pub fn promote(&self, new_primary_id: &str, retain_old_primary: bool) -> Result<InstanceDescriptor> {
        let mut inner = self.inner.lock();

        let idx = inner
            .followers
            .iter()
            .position(|f| f.id == new_primary_id)
            .ok_or_else(|| Error::InstanceNotFound(new_primary_id.to_string()))?;

        let new_primary = inner.followers.remove(idx);
        let old_primary = std::mem::replace(&mut inner.primary, new_primary);

        if retain_old_primary {
            inner.followers.push(old_primary);
        } else {
            inner.former_primary = Some(old_primary);
        }
        Ok(inner.primary.clone())
    }

    /// Add a follower (idempotent by id). Clears any pending reconfigure
    /// flag and the former-primary marker when it matches.
    pub fn add_follower(&self, instance: InstanceDescriptor) {
        let mut inner = self.inner.lock();
        inner.needs_reconfigure.remove(&instance.id);
        if inner
            .former_primary
            .as_ref()
            .map(|p| p.id == instance.id)
            .unwrap_or(false)
        {
            inner.former_primary = None;
        }
        if inner.primary.id != instance.id && !inner.followers.iter().any(|f| f.id == instance.id) {
            inner.followers.push(instance);
        }
    }

    pub fn is_primary(&self, id: &str) -> bool {
        self.inner.lock().primary.id == id
    }

    pub fn is_follower(&self, id: &str) -> bool {
        self.inner.lock().followers.iter().any(|f| f.id == id)
    }

    pub fn mark_needs_reconfigure(&self, id: &str) {
        self.inner.lock().needs_reconfigure.insert(id.to_string());
    }

    pub fn clear_needs_reconfigure(&self, id: &str) {
        self.inner.lock().needs_reconfigure.remove(id);
    }
}
