use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::cluster::instance::InstanceMembership;
use crate::engine::cluster::liveness::InstanceLiveness;
use crate::engine::errors::QueryError;
use crate::engine::query::query::{CommitState, CompletionStatus, Query};
use crate::engine::query::query_id::QueryId;
use crate::engine::storage::lock::{InstanceRole, LockDesc, LockMode};

fn make_query() -> Arc<Query> {
    let membership = InstanceMembership::new(1, vec![0, 1]);
    let liveness = Arc::new(InstanceLiveness::new(1, &membership));
    Query::new(QueryId::generate(0), None, 0, liveness).unwrap()
}

#[test]
fn test_lifecycle_happy_path() {
    let query = make_query();
    assert_eq!(query.completion_status(), CompletionStatus::Init);
    query.start().unwrap();
    assert_eq!(query.completion_status(), CompletionStatus::Start);
    query.done().unwrap();
    assert_eq!(query.completion_status(), CompletionStatus::Ok);
    query.handle_commit().unwrap();
    assert_eq!(query.commit_state(), CommitState::Committed);
}

#[test]
fn test_abort_after_commit_is_invalid() {
    let query = make_query();
    query.start().unwrap();
    query.done().unwrap();
    query.handle_commit().unwrap();

    let err = query.handle_abort().unwrap_err();
    assert!(matches!(err, QueryError::InvalidCommitState { .. }));
    // the query stays committed
    assert_eq!(query.commit_state(), CommitState::Committed);
}

#[test]
fn test_commit_after_abort_is_invalid() {
    let query = make_query();
    query.start().unwrap();
    query.done().unwrap();
    query.handle_abort().unwrap();

    let err = query.handle_commit().unwrap_err();
    assert!(matches!(err, QueryError::InvalidCommitState { .. }));
    assert_eq!(query.commit_state(), CommitState::Aborted);
}

#[test]
fn test_first_error_is_sticky() {
    let query = make_query();
    query.handle_error(QueryError::NoQuorum.record());
    query.handle_error(QueryError::ResourceBusy.record());
    let err = query.error().unwrap();
    assert_eq!(
        err.long,
        crate::shared::protocol::error_codes::LongError::NoQuorum
    );
}

#[test]
fn test_finalizers_run_in_reverse_order_exactly_once() {
    let query = make_query();
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    for i in 0..3 {
        let log = log.clone();
        query.push_finalizer(Box::new(move |_q| {
            log.lock().unwrap().push(i);
        }));
    }
    query.start().unwrap();
    query.done().unwrap();
    query.handle_commit().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![2, 1, 0]);

    // terminal state consumed the stack; nothing runs twice
    let _ = query.handle_commit();
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[test]
fn test_finalizers_run_on_abort_too() {
    let query = make_query();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    query.push_finalizer(Box::new(move |_q| {
        c.fetch_add(1, Ordering::SeqCst);
    }));
    query.handle_abort().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_error_handlers_skipped_on_commit() {
    struct Recorder(Arc<AtomicUsize>);
    impl crate::engine::query::query::ErrorHandler for Recorder {
        fn handle_error(&self, _query: &Arc<Query>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let count = Arc::new(AtomicUsize::new(0));

    let committing = make_query();
    committing.push_error_handler(Box::new(Recorder(count.clone())));
    committing.start().unwrap();
    committing.done().unwrap();
    committing.handle_commit().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    let aborting = make_query();
    aborting.push_error_handler(Box::new(Recorder(count.clone())));
    aborting.handle_abort().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abort_while_in_progress_is_deferred() {
    let query = make_query();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    query.push_finalizer(Box::new(move |_q| {
        c.fetch_add(1, Ordering::SeqCst);
    }));

    query.start().unwrap();
    query.handle_abort().unwrap();
    // still executing: only the state flipped
    assert_eq!(query.commit_state(), CommitState::Aborted);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // the executing path observes the error and finishes the teardown
    query.done_with_error(QueryError::NoQuorum.record());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_instance_mapping() {
    let membership = InstanceMembership::new(1, vec![10, 20, 30]);
    let liveness = Arc::new(InstanceLiveness::new(1, &membership));
    let query = Query::new(QueryId::generate(20), Some(10), 20, liveness).unwrap();

    assert!(!query.is_coordinator());
    assert_eq!(query.instances_count(), 3);
    assert_eq!(query.logical_instance_id(), 1);
    assert_eq!(query.map_logical_to_physical(0), Some(10));
    assert_eq!(query.map_physical_to_logical(30), Some(2));
    assert_eq!(query.physical_coordinator_id(), 10);
}

#[test]
fn test_lock_requests_promote() {
    let query = make_query();
    let rd = LockDesc::new("A", query.id(), 0, InstanceRole::Coordinator, LockMode::Rd);
    query.request_lock(rd);
    let wr = LockDesc::new("A", query.id(), 0, InstanceRole::Coordinator, LockMode::Wr);
    query.request_lock(wr);

    let locks = query.requested_locks();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].mode, LockMode::Wr);
}
