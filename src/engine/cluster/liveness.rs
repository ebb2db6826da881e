use serde::{Deserialize, Serialize};

use crate::engine::cluster::instance::{InstanceId, InstanceMembership};

/// Immutable snapshot of which instances were live at one point in time.
/// Versions grow monotonically; queries pin the snapshot they started
/// under and abort when a newer one arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLiveness {
    version: u64,
    view_id: u64,
    live: Vec<InstanceId>,
    dead: Vec<InstanceId>,
}

impl InstanceLiveness {
    pub fn new(version: u64, membership: &InstanceMembership) -> Self {
        Self {
            version,
            view_id: membership.view_id,
            live: membership.instances.clone(),
            dead: Vec::new(),
        }
    }

    /// A successor snapshot with `instance` moved to the dead set.
    pub fn with_dead(&self, instance: InstanceId) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.live.retain(|i| *i != instance);
        if !next.dead.contains(&instance) {
            next.dead.push(instance);
            next.dead.sort_unstable();
        }
        next
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn num_live(&self) -> usize {
        self.live.len()
    }

    pub fn num_dead(&self) -> usize {
        self.dead.len()
    }

    pub fn live_instances(&self) -> &[InstanceId] {
        &self.live
    }

    pub fn is_dead(&self, instance: InstanceId) -> bool {
        self.dead.contains(&instance)
    }

    pub fn is_live(&self, instance: InstanceId) -> bool {
        self.live.contains(&instance)
    }

    pub fn is_equal(&self, other: &InstanceLiveness) -> bool {
        self.live == other.live && self.dead == other.dead
    }
}
