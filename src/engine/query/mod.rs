pub mod coordinator;
pub mod executor;
pub mod query;
pub mod query_id;
pub mod registry;
pub mod replication;
pub mod rollback;
pub mod worker;

pub use query::{CommitState, CompletionStatus, Query};
pub use query_id::QueryId;
pub use registry::QueryRegistry;

#[cfg(test)]
mod query_test;
#[cfg(test)]
mod registry_test;
