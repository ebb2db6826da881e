use ahash::AHashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::engine::array::descriptor::{ArrayDesc, ArrayId, VersionId};
use crate::engine::errors::CatalogError;
use crate::engine::query::query_id::QueryId;
use crate::engine::storage::lock::{InstanceRole, LockDesc};

const LOG_TARGET: &str = "engine::storage::catalog";

struct ArrayEntry {
    id: ArrayId,
    desc: ArrayDesc,
    last_version: VersionId,
    /// (version, array_version_id) pairs, committed versions only.
    versions: Vec<(VersionId, ArrayId)>,
}

struct CatalogInner {
    arrays: AHashMap<String, ArrayEntry>,
    locks: Vec<LockDesc>,
    next_array_id: ArrayId,
}

/// Per-instance array catalog: schemas, version history, and the array
/// locks queries hold. Backed by memory; the on-disk catalog is outside
/// the engine core.
pub struct SystemCatalog {
    inner: Mutex<CatalogInner>,
}

impl SystemCatalog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CatalogInner {
                arrays: AHashMap::new(),
                locks: Vec::new(),
                next_array_id: 1,
            }),
        }
    }

    pub fn create_array(&self, name: &str, desc: &ArrayDesc) -> Result<ArrayId, CatalogError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.arrays.contains_key(name) {
            return Err(CatalogError::ArrayAlreadyExists(name.to_string()));
        }
        let id = inner.next_array_id;
        inner.next_array_id += 1;
        let mut desc = desc.clone().with_name(name);
        desc.set_id(id);
        inner.arrays.insert(
            name.to_string(),
            ArrayEntry {
                id,
                desc,
                last_version: 0,
                versions: Vec::new(),
            },
        );
        debug!(target: LOG_TARGET, array = name, array_id = id, "Created array");
        Ok(id)
    }

    pub fn remove_array(&self, name: &str) -> Result<(), CatalogError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .arrays
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CatalogError::ArrayNotFound(name.to_string()))
    }

    pub fn contains_array(&self, name: &str) -> bool {
        self.inner.lock().unwrap().arrays.contains_key(name)
    }

    pub fn array_descriptor(&self, name: &str) -> Result<ArrayDesc, CatalogError> {
        let inner = self.inner.lock().unwrap();
        inner
            .arrays
            .get(name)
            .map(|e| e.desc.clone())
            .ok_or_else(|| CatalogError::ArrayNotFound(name.to_string()))
    }

    pub fn array_id(&self, name: &str) -> Result<ArrayId, CatalogError> {
        let inner = self.inner.lock().unwrap();
        inner
            .arrays
            .get(name)
            .map(|e| e.id)
            .ok_or_else(|| CatalogError::ArrayNotFound(name.to_string()))
    }

    pub fn last_version(&self, array_id: ArrayId) -> VersionId {
        let inner = self.inner.lock().unwrap();
        inner
            .arrays
            .values()
            .find(|e| e.id == array_id)
            .map(|e| e.last_version)
            .unwrap_or(0)
    }

    /// The array-version id holding the newest committed content.
    pub fn latest_version_array_id(&self, name: &str) -> Result<Option<ArrayId>, CatalogError> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .arrays
            .get(name)
            .ok_or_else(|| CatalogError::ArrayNotFound(name.to_string()))?;
        Ok(entry.versions.last().map(|(_, id)| *id))
    }

    /// Allocates (but does not record) the next version of an array.
    /// The version becomes visible only through [`commit_version`].
    pub fn prepare_new_version(
        &self,
        name: &str,
    ) -> Result<(ArrayId, VersionId, ArrayId), CatalogError> {
        let mut inner = self.inner.lock().unwrap();
        let version_id = inner.next_array_id;
        let entry = inner
            .arrays
            .get(name)
            .ok_or_else(|| CatalogError::ArrayNotFound(name.to_string()))?;
        let base_id = entry.id;
        let new_version = entry.last_version + 1;
        inner.next_array_id += 1;
        Ok((base_id, new_version, version_id))
    }

    pub fn commit_version(
        &self,
        name: &str,
        version: VersionId,
        version_array_id: ArrayId,
    ) -> Result<(), CatalogError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .arrays
            .get_mut(name)
            .ok_or_else(|| CatalogError::ArrayNotFound(name.to_string()))?;
        // every instance commits at query completion; the first one wins
        if entry.last_version >= version {
            return Ok(());
        }
        entry.last_version = version;
        entry.versions.push((version, version_array_id));
        debug!(target: LOG_TARGET, array = name, version, "Committed array version");
        Ok(())
    }

    /// Tries to take the lock. Conflicting locks from other queries make
    /// this fail with `LockBusy`; the coordinator retries with backoff.
    pub fn lock_array(&self, lock: &LockDesc) -> Result<bool, CatalogError> {
        let mut inner = self.inner.lock().unwrap();
        let busy = inner.locks.iter().any(|held| {
            held.array_name == lock.array_name
                && held.query_id != lock.query_id
                && held.mode.conflicts_with(&lock.mode)
        });
        if busy {
            return Err(CatalogError::LockBusy(lock.array_name.clone()));
        }
        // a stronger mode from the same query replaces the weaker one
        if let Some(existing) = inner.locks.iter_mut().find(|held| {
            held.array_name == lock.array_name
                && held.query_id == lock.query_id
                && held.instance_id == lock.instance_id
        }) {
            if existing.mode < lock.mode {
                *existing = lock.clone();
            }
            return Ok(true);
        }
        inner.locks.push(lock.clone());
        debug!(target: LOG_TARGET, %lock, "Acquired array lock");
        Ok(true)
    }

    pub fn update_lock(&self, lock: &LockDesc) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.locks.iter_mut().find(|held| {
            held.array_name == lock.array_name
                && held.query_id == lock.query_id
                && held.instance_id == lock.instance_id
        }) {
            *existing = lock.clone();
        }
    }

    pub fn unlock_array(&self, lock: &LockDesc) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.locks.len();
        inner.locks.retain(|held| {
            !(held.array_name == lock.array_name
                && held.query_id == lock.query_id
                && held.instance_id == lock.instance_id)
        });
        inner.locks.len() != before
    }

    /// Releases every lock a query holds on this instance.
    pub fn delete_array_locks(&self, instance_id: u64, query_id: QueryId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.locks.len();
        inner
            .locks
            .retain(|held| !(held.instance_id == instance_id && held.query_id == query_id));
        let released = before - inner.locks.len();
        if released > 0 {
            debug!(target: LOG_TARGET, %query_id, released, "Released array locks");
        }
        released
    }

    pub fn check_for_coordinator_lock(
        &self,
        array_name: &str,
        query_id: QueryId,
    ) -> Option<LockDesc> {
        let inner = self.inner.lock().unwrap();
        inner
            .locks
            .iter()
            .find(|held| {
                held.array_name == array_name
                    && held.query_id == query_id
                    && held.role == InstanceRole::Coordinator
            })
            .cloned()
    }

    pub fn held_locks(&self, query_id: QueryId) -> Vec<LockDesc> {
        let inner = self.inner.lock().unwrap();
        inner
            .locks
            .iter()
            .filter(|held| held.query_id == query_id)
            .cloned()
            .collect()
    }
}

impl Default for SystemCatalog {
    fn default() -> Self {
        Self::new()
    }
}
