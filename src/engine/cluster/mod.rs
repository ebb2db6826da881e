pub mod exchange;
pub mod instance;
pub mod liveness;
pub mod network;

pub use instance::{InstanceId, InstanceMembership};
pub use liveness::InstanceLiveness;
pub use network::{ChannelHub, Cluster, NetworkManager, Transport};

#[cfg(test)]
mod liveness_test;
#[cfg(test)]
mod network_test;
