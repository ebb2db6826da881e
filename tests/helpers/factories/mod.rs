pub mod array_desc_factory;
pub mod chunk_factory;
pub mod cluster_factory;
pub mod plan_factory;

pub use array_desc_factory::ArrayDescFactory;
pub use chunk_factory::ChunkFactory;
pub use cluster_factory::{ClusterFactory, TestCluster};
pub use plan_factory::PlanFactory;
