use serde::{Deserialize, Serialize};

/// Stable physical id of one engine process in the cluster.
pub type InstanceId = u64;

/// The configured set of cluster members, tagged with a view id that
/// changes when the configuration itself changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMembership {
    pub view_id: u64,
    pub instances: Vec<InstanceId>,
}

impl InstanceMembership {
    pub fn new(view_id: u64, mut instances: Vec<InstanceId>) -> Self {
        instances.sort_unstable();
        instances.dedup();
        Self { view_id, instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.binary_search(&id).is_ok()
    }
}
