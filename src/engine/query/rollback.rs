use ahash::AHashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::context::EngineContext;
use crate::engine::query::query::{ErrorHandler, Query};
use crate::engine::storage::lock::{InstanceRole, LockDesc};

const LOG_TARGET: &str = "engine::query::rollback";

/// Undo handler for a write query's array lock: decides, from the
/// catalog's committed version, whether the new version must be rolled
/// back, and drops its chunks when it must.
pub struct UpdateErrorHandler {
    lock: LockDesc,
    ctx: Arc<EngineContext>,
}

impl UpdateErrorHandler {
    pub fn new(lock: LockDesc, ctx: Arc<EngineContext>) -> Self {
        Self { lock, ctx }
    }

    fn handle_on_coordinator(&self, query: &Arc<Query>) {
        let Some(coord_lock) = self
            .ctx
            .catalog
            .check_for_coordinator_lock(&self.lock.array_name, query.id())
        else {
            debug!(
                target: LOG_TARGET,
                query_id = %query.id(),
                "No coordinator lock; nothing to roll back"
            );
            return;
        };
        if is_transient_lock(&coord_lock) {
            return;
        }
        let base_id = coord_lock.array_id;
        let new_version = coord_lock.array_version;
        let new_version_id = coord_lock.array_version_id;
        if base_id == 0 {
            // the query had not progressed to version allocation
            return;
        }
        let last_version = self.ctx.catalog.last_version(base_id);
        if last_version == new_version {
            // committed before the failure; nothing to undo
            return;
        }
        debug_assert!(last_version < new_version);
        rollback_version(&self.ctx, base_id, last_version, new_version_id);
    }

    fn handle_on_worker(&self, query: &Arc<Query>, force_coord_lock_check: bool) {
        if self.lock.array_version == 0 {
            return;
        }
        if !force_coord_lock_check {
            worker_rollback_decision(&self.ctx, &self.lock, query.id());
            return;
        }
        // the coordinator may have committed just before dying; wait for
        // its lock to go away, then let the catalog decide. The wait can
        // take a while, so it must not park a runtime thread.
        let ctx = self.ctx.clone();
        let lock = self.lock.clone();
        let query_id = query.id();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while ctx
                        .catalog
                        .check_for_coordinator_lock(&lock.array_name, query_id)
                        .is_some()
                    {
                        tokio::time::sleep(lock_wait_timeout()).await;
                    }
                    worker_rollback_decision(&ctx, &lock, query_id);
                });
            }
            Err(_) => {
                // plain-thread caller: blocking here stalls nobody
                while ctx
                    .catalog
                    .check_for_coordinator_lock(&lock.array_name, query_id)
                    .is_some()
                {
                    std::thread::sleep(lock_wait_timeout());
                }
                worker_rollback_decision(&ctx, &lock, query_id);
            }
        }
    }
}

/// The worker's post-wait verdict: the catalog shows whether the version
/// committed before the failure.
fn worker_rollback_decision(
    ctx: &Arc<EngineContext>,
    lock: &LockDesc,
    query_id: crate::engine::query::query_id::QueryId,
) {
    let new_version = lock.array_version;
    let new_version_id = lock.array_version_id;
    let base_id = lock.array_id;
    if base_id == 0 {
        warn!(
            target: LOG_TARGET,
            %query_id,
            %lock,
            "Invalid update lock; no rollback possible"
        );
        return;
    }
    let last_version = ctx.catalog.last_version(base_id);
    debug_assert!(last_version <= new_version);
    if last_version < new_version && new_version_id > 0 {
        rollback_version(ctx, base_id, last_version, new_version_id);
    }
}

fn rollback_version(ctx: &Arc<EngineContext>, base_id: u64, last_version: u64, new_version_id: u64) {
    info!(
        target: LOG_TARGET,
        base_id,
        last_version,
        new_version_id,
        "Rolling back uncommitted array version"
    );
    let mut undo = AHashMap::new();
    undo.insert(base_id, last_version);
    ctx.storage.rollback(&undo, &[new_version_id]);
}

impl ErrorHandler for UpdateErrorHandler {
    fn handle_error(&self, query: &Arc<Query>) {
        debug!(target: LOG_TARGET, query_id = %query.id(), lock = %self.lock, "Update error handler invoked");
        match self.lock.role {
            InstanceRole::Coordinator => self.handle_on_coordinator(query),
            InstanceRole::Worker => self.handle_on_worker(query, query.is_force_cancelled()),
        }
    }
}

/// Transient arrays are never rolled back.
fn is_transient_lock(lock: &LockDesc) -> bool {
    lock.array_id > 0 && lock.array_id == lock.array_version_id && lock.array_version == 0
}

fn lock_wait_timeout() -> Duration {
    let ms = rand::thread_rng().gen_range(1..=2000);
    Duration::from_millis(ms)
}

/// The lock-release finalizer every query pushes first.
pub fn release_locks(ctx: &Arc<EngineContext>, query: &Arc<Query>) {
    let released = ctx
        .catalog
        .delete_array_locks(ctx.cluster.local_instance_id(), query.id());
    debug!(target: LOG_TARGET, query_id = %query.id(), released, "Released locks");
}
