use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::engine::errors::QueryError;
use crate::engine::sync::job_queue::JobQueue;

#[tokio::test]
async fn test_jobs_run_in_order() {
    let queue = JobQueue::new(8, 1);
    let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    for i in 0..4 {
        let log = log.clone();
        queue
            .enqueue(Box::pin(async move {
                log.lock().await.push(i);
            }))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*log.lock().await, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_overflow_is_resource_busy() {
    let queue = JobQueue::new(1, 1);
    // the worker parks on this gate so follow-up jobs pile into the queue
    let gate = Arc::new(tokio::sync::Notify::new());
    let parked = gate.clone();
    queue
        .enqueue(Box::pin(async move {
            parked.notified().await;
        }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // capacity one: the first try fills the queue, the second overflows
    queue.try_enqueue(Box::pin(async {})).unwrap();
    let err = queue.try_enqueue(Box::pin(async {})).unwrap_err();
    assert!(matches!(err, QueryError::ResourceBusy));

    gate.notify_one();
}

#[tokio::test]
async fn test_multiple_workers_drain_queue() {
    let queue = JobQueue::new(16, 4);
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let done = done.clone();
        queue
            .enqueue(Box::pin(async move {
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(done.load(Ordering::SeqCst), 10);
}
