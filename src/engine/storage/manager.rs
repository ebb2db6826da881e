use ahash::AHashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::engine::array::descriptor::{ArrayDesc, ArrayId, VersionId};
use crate::engine::array::mem_array::MemArray;
use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::errors::CatalogError;

const LOG_TARGET: &str = "engine::storage::manager";

/// Per-instance store of persistent array versions. Each committed (or
/// in-flight) version is a [`MemArray`] whose chunks live in the shared
/// cache under the version's array id.
pub struct StorageManager {
    cache: Arc<ChunkCache>,
    arrays: Mutex<AHashMap<ArrayId, Arc<MemArray>>>,
}

impl StorageManager {
    pub fn new(cache: Arc<ChunkCache>) -> Self {
        Self {
            cache,
            arrays: Mutex::new(AHashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Registers the backing array for a new (not yet committed) version.
    pub fn create_version_array(
        &self,
        desc: &ArrayDesc,
        version_array_id: ArrayId,
    ) -> Arc<MemArray> {
        let desc = desc.clone().with_id(version_array_id);
        let array = Arc::new(MemArray::with_shared_desc(
            Arc::new(desc),
            self.cache.clone(),
        ));
        self.arrays
            .lock()
            .unwrap()
            .insert(version_array_id, array.clone());
        array
    }

    pub fn get_array(&self, version_array_id: ArrayId) -> Result<Arc<MemArray>, CatalogError> {
        self.arrays
            .lock()
            .unwrap()
            .get(&version_array_id)
            .cloned()
            .ok_or_else(|| CatalogError::ArrayNotFound(format!("version {version_array_id}")))
    }

    /// Undoes an uncommitted version: every array id mapped to a last
    /// committed version loses whatever was written past it.
    pub fn rollback(&self, undo: &AHashMap<ArrayId, VersionId>, new_version_ids: &[ArrayId]) {
        for (base_id, last_version) in undo {
            info!(
                target: LOG_TARGET,
                base_array = base_id,
                last_version,
                "Rolling back array to last committed version"
            );
        }
        for new_id in new_version_ids {
            self.remove_version_from_memory(*new_id);
        }
    }

    /// Drops one version's chunks from memory and the version registry.
    pub fn remove_version_from_memory(&self, version_array_id: ArrayId) {
        self.arrays.lock().unwrap().remove(&version_array_id);
        self.cache.drop_array(version_array_id);
        info!(target: LOG_TARGET, version_array_id, "Dropped array version from memory");
    }
}
