use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::array::descriptor::{ArrayId, VersionId};
use crate::engine::query::query_id::QueryId;

/// Lock modes ordered by strength; a stronger request subsumes a weaker
/// one already held by the same query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockMode {
    Rd,
    Wr,
    Crt,
    Rm,
    Rnf,
}

impl LockMode {
    /// Read locks coexist; everything else is exclusive.
    pub fn conflicts_with(&self, other: &LockMode) -> bool {
        !(matches!(self, LockMode::Rd) && matches!(other, LockMode::Rd))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceRole {
    Coordinator,
    Worker,
}

/// One array lock held in the catalog for a query's lifetime. Version
/// fields are filled in once the query allocates its new array version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockDesc {
    pub array_name: String,
    pub query_id: QueryId,
    pub instance_id: u64,
    pub role: InstanceRole,
    pub mode: LockMode,
    pub array_id: ArrayId,
    pub array_version_id: ArrayId,
    pub array_version: VersionId,
}

impl LockDesc {
    pub fn new(
        array_name: impl Into<String>,
        query_id: QueryId,
        instance_id: u64,
        role: InstanceRole,
        mode: LockMode,
    ) -> Self {
        Self {
            array_name: array_name.into(),
            query_id,
            instance_id,
            role,
            mode,
            array_id: 0,
            array_version_id: 0,
            array_version: 0,
        }
    }

    pub fn is_write(&self) -> bool {
        self.mode > LockMode::Rd
    }
}

impl fmt::Display for LockDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lock({}, query={}, instance={}, {:?}/{:?})",
            self.array_name, self.query_id, self.instance_id, self.role, self.mode
        )
    }
}
