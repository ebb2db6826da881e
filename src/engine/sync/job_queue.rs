use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::errors::QueryError;

const LOG_TARGET: &str = "engine::sync::job_queue";

pub type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded FIFO of jobs drained by a small worker pool. Enqueueing into a
/// full queue fails with `ResourceBusy`; inbound replication uses that as
/// its overflow signal.
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn new(capacity: usize, workers: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => job.await,
                        None => {
                            debug!(target: LOG_TARGET, worker, "Job queue closed");
                            break;
                        }
                    }
                }
            });
        }
        Arc::new(Self { tx })
    }

    pub fn try_enqueue(&self, job: Job) -> Result<(), QueryError> {
        self.tx
            .try_send(job)
            .map_err(|_| QueryError::ResourceBusy)
    }

    pub async fn enqueue(&self, job: Job) -> Result<(), QueryError> {
        self.tx.send(job).await.map_err(|_| QueryError::ResourceBusy)
    }
}
