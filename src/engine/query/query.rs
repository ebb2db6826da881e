use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::engine::array::iterator::ArrayRef;
use crate::engine::cluster::instance::InstanceId;
use crate::engine::cluster::liveness::InstanceLiveness;
use crate::engine::errors::QueryError;
use crate::engine::plan::logical::LogicalPlan;
use crate::engine::query::query_id::QueryId;
use crate::engine::query::replication::ReplicationContext;
use crate::engine::storage::lock::LockDesc;
use crate::engine::sync::semaphore::QuerySemaphore;
use crate::engine::types::aggregate::Aggregate;
use crate::shared::protocol::error_codes::ErrorRecord;

const LOG_TARGET: &str = "engine::query";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Init,
    Start,
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Unknown,
    Committed,
    Aborted,
}

pub type Finalizer = Box<dyn FnOnce(&Arc<Query>) + Send>;

/// Cleanup hook run (LIFO) when a query terminates in error; owns actions
/// like lock release and version rollback.
pub trait ErrorHandler: Send {
    fn handle_error(&self, query: &Arc<Query>);
}

struct QueryInner {
    error: Option<ErrorRecord>,
    completion: CompletionStatus,
    commit: CommitState,
    error_handlers: Vec<Box<dyn ErrorHandler>>,
    finalizers: Vec<Finalizer>,
    requested_locks: Vec<LockDesc>,
    logical_plan: Option<LogicalPlan>,
}

/// One query's state on one instance. The per-query mutex guards the
/// error, the handler stacks and the lock set; long operations (planning,
/// execution) never run under it.
pub struct Query {
    id: QueryId,
    /// Physical id of the coordinator; `None` when this instance is it.
    coordinator: Option<InstanceId>,
    liveness: Arc<InstanceLiveness>,
    /// Logical id → physical id, in liveness order.
    live_instances: Vec<InstanceId>,
    local_logical: u64,
    inner: Mutex<QueryInner>,
    pub prepare_acks: QuerySemaphore,
    pub execute_acks: QuerySemaphore,
    pub replication: ReplicationContext,
    operator_context: Mutex<Option<Arc<dyn Aggregate>>>,
    physical_plan: Mutex<Option<crate::engine::plan::node::PhysicalPlan>>,
    result: Mutex<Option<ArrayRef>>,
    warnings: Mutex<Vec<String>>,
    is_ddl: AtomicBool,
    /// Set when the abort came from a liveness change rather than a local
    /// failure; rollback must then consult the coordinator's lock.
    force_cancelled: AtomicBool,
}

impl Query {
    pub fn new(
        id: QueryId,
        coordinator: Option<InstanceId>,
        local_instance: InstanceId,
        liveness: Arc<InstanceLiveness>,
    ) -> Result<Arc<Self>, QueryError> {
        if liveness.num_live() == 0 {
            return Err(QueryError::LivenessEmpty);
        }
        let live_instances: Vec<InstanceId> = liveness.live_instances().to_vec();
        let local_logical = live_instances
            .iter()
            .position(|i| *i == local_instance)
            .ok_or(QueryError::NoQuorum)? as u64;
        Ok(Arc::new(Self {
            id,
            coordinator,
            liveness,
            live_instances,
            local_logical,
            inner: Mutex::new(QueryInner {
                error: None,
                completion: CompletionStatus::Init,
                commit: CommitState::Unknown,
                error_handlers: Vec::new(),
                finalizers: Vec::new(),
                requested_locks: Vec::new(),
                logical_plan: None,
            }),
            prepare_acks: QuerySemaphore::new(),
            execute_acks: QuerySemaphore::new(),
            replication: ReplicationContext::new(),
            operator_context: Mutex::new(None),
            physical_plan: Mutex::new(None),
            result: Mutex::new(None),
            warnings: Mutex::new(Vec::new()),
            is_ddl: AtomicBool::new(false),
            force_cancelled: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator.is_none()
    }

    pub fn liveness(&self) -> &Arc<InstanceLiveness> {
        &self.liveness
    }

    pub fn instances_count(&self) -> u64 {
        self.live_instances.len() as u64
    }

    pub fn live_instances(&self) -> &[InstanceId] {
        &self.live_instances
    }

    pub fn logical_instance_id(&self) -> u64 {
        self.local_logical
    }

    pub fn local_instance_id(&self) -> InstanceId {
        self.live_instances[self.local_logical as usize]
    }

    pub fn map_logical_to_physical(&self, logical: u64) -> Option<InstanceId> {
        self.live_instances.get(logical as usize).copied()
    }

    pub fn map_physical_to_logical(&self, physical: InstanceId) -> Option<u64> {
        self.live_instances
            .iter()
            .position(|i| *i == physical)
            .map(|p| p as u64)
    }

    /// The coordinator's physical id (this instance's own when it is the
    /// coordinator).
    pub fn physical_coordinator_id(&self) -> InstanceId {
        self.coordinator
            .unwrap_or_else(|| self.local_instance_id())
    }

    pub fn set_force_cancelled(&self) {
        self.force_cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_force_cancelled(&self) -> bool {
        self.force_cancelled.load(Ordering::Relaxed)
    }

    pub fn set_ddl(&self, ddl: bool) {
        self.is_ddl.store(ddl, Ordering::Relaxed);
    }

    pub fn is_ddl(&self) -> bool {
        self.is_ddl.load(Ordering::Relaxed)
    }

    pub fn start(&self) -> Result<(), QueryError> {
        let mut inner = self.inner.lock().unwrap();
        check_no_error(&inner)?;
        if inner.completion == CompletionStatus::Init {
            inner.completion = CompletionStatus::Start;
        }
        Ok(())
    }

    pub fn completion_status(&self) -> CompletionStatus {
        self.inner.lock().unwrap().completion
    }

    pub fn commit_state(&self) -> CommitState {
        self.inner.lock().unwrap().commit
    }

    /// Marks successful completion; fails if an error arrived meanwhile.
    pub fn done(&self) -> Result<(), QueryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rec) = inner.error.clone() {
            inner.completion = CompletionStatus::Error;
            return Err(QueryError::Cancelled(rec.to_string()));
        }
        inner.completion = CompletionStatus::Ok;
        Ok(())
    }

    /// Records a failure. When commit/abort was already decided the abort
    /// path completes here.
    pub fn done_with_error(self: &Arc<Self>, record: ErrorRecord) {
        let run_abort = {
            let mut inner = self.inner.lock().unwrap();
            if inner.error.is_none() {
                inner.error = Some(record);
            }
            inner.completion = CompletionStatus::Error;
            inner.commit != CommitState::Unknown
        };
        self.wake_waiters();
        if run_abort {
            let _ = self.handle_abort();
        }
    }

    /// First error wins; later errors are logged only.
    pub fn handle_error(&self, record: ErrorRecord) {
        let mut inner = self.inner.lock().unwrap();
        if inner.error.is_none() {
            debug!(target: LOG_TARGET, query_id = %self.id, error = %record, "Query error");
            inner.error = Some(record);
        } else {
            debug!(target: LOG_TARGET, query_id = %self.id, error = %record, "Suppressed later error");
        }
        drop(inner);
        self.wake_waiters();
    }

    pub fn error(&self) -> Option<ErrorRecord> {
        self.inner.lock().unwrap().error.clone()
    }

    /// True while the query has no error and is not terminally aborted.
    pub fn is_valid(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.error.is_none() && inner.commit != CommitState::Aborted
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        let inner = self.inner.lock().unwrap();
        match &inner.error {
            Some(rec) => Err(QueryError::Cancelled(rec.to_string())),
            None => Ok(()),
        }
    }

    fn wake_waiters(&self) {
        self.prepare_acks.interrupt();
        self.execute_acks.interrupt();
        self.replication.interrupt();
    }

    pub fn push_finalizer(&self, f: Finalizer) {
        self.inner.lock().unwrap().finalizers.push(f);
    }

    pub fn push_error_handler(&self, handler: Box<dyn ErrorHandler>) {
        self.inner.lock().unwrap().error_handlers.push(handler);
    }

    /// Records a lock request, promoting in place when a stronger mode
    /// arrives for the same array.
    pub fn request_lock(&self, lock: LockDesc) -> LockDesc {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .requested_locks
            .iter_mut()
            .find(|l| l.array_name == lock.array_name)
        {
            if existing.mode < lock.mode {
                *existing = lock;
            }
            return existing.clone();
        }
        inner.requested_locks.push(lock.clone());
        lock
    }

    pub fn requested_locks(&self) -> Vec<LockDesc> {
        self.inner.lock().unwrap().requested_locks.clone()
    }

    pub fn update_requested_lock(&self, lock: &LockDesc) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .requested_locks
            .iter_mut()
            .find(|l| l.array_name == lock.array_name)
        {
            *existing = lock.clone();
        }
    }

    pub fn set_physical_plan(&self, plan: crate::engine::plan::node::PhysicalPlan) {
        *self.physical_plan.lock().unwrap() = Some(plan);
    }

    pub fn take_physical_plan(&self) -> Option<crate::engine::plan::node::PhysicalPlan> {
        self.physical_plan.lock().unwrap().take()
    }

    pub fn set_logical_plan(&self, plan: LogicalPlan) {
        self.inner.lock().unwrap().logical_plan = Some(plan);
    }

    pub fn take_logical_plan(&self) -> Option<LogicalPlan> {
        self.inner.lock().unwrap().logical_plan.take()
    }

    pub fn logical_plan(&self) -> Option<LogicalPlan> {
        self.inner.lock().unwrap().logical_plan.clone()
    }

    /// Commits the query. Legal only from `Ok` completion with no prior
    /// abort; error handlers are discarded, finalizers run LIFO.
    pub fn handle_commit(self: &Arc<Self>) -> Result<(), QueryError> {
        let finalizers = {
            let mut inner = self.inner.lock().unwrap();
            if inner.completion != CompletionStatus::Ok || inner.commit == CommitState::Aborted {
                error!(
                    target: LOG_TARGET,
                    query_id = %self.id,
                    completion = ?inner.completion,
                    commit = ?inner.commit,
                    "Commit refused"
                );
                return Err(QueryError::InvalidCommitState {
                    query_id: self.id.to_string(),
                    action: "commit".to_string(),
                });
            }
            inner.error_handlers.clear();
            inner.commit = CommitState::Committed;
            std::mem::take(&mut inner.finalizers)
        };
        info!(target: LOG_TARGET, query_id = %self.id, "Query committed");
        self.invoke_finalizers(finalizers);
        Ok(())
    }

    /// Aborts the query. Refused after commit. While execution is still in
    /// progress only the state flips; the executing path finishes the
    /// teardown when it observes the error.
    pub fn handle_abort(self: &Arc<Self>) -> Result<(), QueryError> {
        let (handlers, finalizers) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.commit == CommitState::Committed {
                error!(target: LOG_TARGET, query_id = %self.id, "Abort refused after commit");
                return Err(QueryError::InvalidCommitState {
                    query_id: self.id.to_string(),
                    action: "abort".to_string(),
                });
            }
            inner.commit = CommitState::Aborted;
            if inner.error.is_none() {
                inner.error = Some(QueryError::Cancelled(self.id.to_string()).record());
            }
            if inner.completion == CompletionStatus::Start {
                debug!(target: LOG_TARGET, query_id = %self.id, "Abort deferred: query in progress");
                return Ok(());
            }
            (
                std::mem::take(&mut inner.error_handlers),
                std::mem::take(&mut inner.finalizers),
            )
        };
        self.wake_waiters();
        info!(target: LOG_TARGET, query_id = %self.id, "Query aborted");
        self.invoke_error_handlers(handlers);
        self.invoke_finalizers(finalizers);
        Ok(())
    }

    /// Finalizers own the invariants that keep the cluster consistent; a
    /// failing finalizer terminates the process.
    fn invoke_finalizers(self: &Arc<Self>, finalizers: Vec<Finalizer>) {
        for f in finalizers.into_iter().rev() {
            let this = self.clone();
            if catch_unwind(AssertUnwindSafe(move || f(&this))).is_err() {
                error!(target: LOG_TARGET, query_id = %self.id, "Finalizer failed; aborting process");
                std::process::abort();
            }
        }
    }

    fn invoke_error_handlers(self: &Arc<Self>, handlers: Vec<Box<dyn ErrorHandler>>) {
        for handler in handlers.into_iter().rev() {
            let this = self.clone();
            if catch_unwind(AssertUnwindSafe(move || handler.handle_error(&this))).is_err() {
                error!(target: LOG_TARGET, query_id = %self.id, "Error handler failed; aborting process");
                std::process::abort();
            }
        }
    }

    pub fn set_operator_context(&self, aggregate: Arc<dyn Aggregate>) {
        *self.operator_context.lock().unwrap() = Some(aggregate);
    }

    pub fn unset_operator_context(&self) {
        *self.operator_context.lock().unwrap() = None;
    }

    pub fn operator_context(&self) -> Option<Arc<dyn Aggregate>> {
        self.operator_context.lock().unwrap().clone()
    }

    pub fn set_result(&self, array: ArrayRef) {
        *self.result.lock().unwrap() = Some(array);
    }

    pub fn result(&self) -> Option<ArrayRef> {
        self.result.lock().unwrap().clone()
    }

    pub fn post_warning(&self, warning: impl Into<String>) {
        self.warnings.lock().unwrap().push(warning.into());
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

fn check_no_error(inner: &QueryInner) -> Result<(), QueryError> {
    match &inner.error {
        Some(rec) => Err(QueryError::Cancelled(rec.to_string())),
        None => Ok(()),
    }
}
