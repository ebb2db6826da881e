use ahash::AHashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::engine::array::descriptor::ArrayId;
use crate::engine::array::mem_array::MemArray;
use crate::engine::cluster::instance::InstanceId;
use crate::engine::context::EngineContext;
use crate::engine::errors::QueryError;
use crate::engine::query::query::Query;
use crate::engine::sync::job_queue::{Job, JobQueue};
use crate::engine::sync::semaphore::QuerySemaphore;
use crate::shared::config::CONFIG;
use crate::shared::protocol::messages::{ChunkPayload, ClusterMessage};

const LOG_TARGET: &str = "engine::query::replication";

struct QueueInfo {
    sem: Arc<QuerySemaphore>,
    array: Option<Arc<MemArray>>,
    queue: Option<Arc<JobQueue>>,
}

impl QueueInfo {
    fn new() -> Self {
        Self {
            sem: Arc::new(QuerySemaphore::new()),
            array: None,
            queue: None,
        }
    }
}

/// Per-query replication state: one bounded inbound queue and one ack
/// semaphore per persistent array under write.
pub struct ReplicationContext {
    inner: Mutex<AHashMap<ArrayId, QueueInfo>>,
}

impl ReplicationContext {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AHashMap::new()),
        }
    }

    /// Opens the inbound queue for one array and parks the backing array
    /// for replica writes.
    pub fn enable_inbound_queue(&self, array_id: ArrayId, array: Arc<MemArray>) {
        let mut inner = self.inner.lock().unwrap();
        let info = inner.entry(array_id).or_insert_with(QueueInfo::new);
        info.array = Some(array);
        if info.queue.is_none() {
            let capacity = CONFIG.engine.replication_queue_size + 4;
            info.queue = Some(JobQueue::new(capacity, 1));
        }
    }

    pub fn inbound_array(&self, array_id: ArrayId) -> Option<Arc<MemArray>> {
        self.inner
            .lock()
            .unwrap()
            .get(&array_id)
            .and_then(|i| i.array.clone())
    }

    /// Queues one replica write; a full queue overflows with
    /// `ResourceBusy`.
    pub fn enqueue_inbound(&self, array_id: ArrayId, job: Job) -> Result<(), QueryError> {
        let queue = {
            let mut inner = self.inner.lock().unwrap();
            let info = inner.entry(array_id).or_insert_with(QueueInfo::new);
            if info.queue.is_none() {
                let capacity = CONFIG.engine.replication_queue_size + 4;
                info.queue = Some(JobQueue::new(capacity, 1));
            }
            info.queue.clone().unwrap()
        };
        queue.try_enqueue(job)
    }

    /// A peer acknowledged our replication EOF.
    pub fn ack(&self, from: InstanceId, array_id: ArrayId) {
        debug!(target: LOG_TARGET, from, array_id, "Replication ack");
        let sem = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .entry(array_id)
                .or_insert_with(QueueInfo::new)
                .sem
                .clone()
        };
        sem.release(1);
    }

    pub fn interrupt(&self) {
        let inner = self.inner.lock().unwrap();
        for info in inner.values() {
            info.sem.interrupt();
        }
    }

    fn semaphore(&self, array_id: ArrayId) -> Arc<QuerySemaphore> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entry(array_id)
            .or_insert_with(QueueInfo::new)
            .sem
            .clone()
    }
}

impl Default for ReplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender-side completion barrier: broadcast the EOF replica message and
/// wait for every recipient's ack. Short-circuits when replication is
/// disabled.
pub async fn replication_sync(
    query: &Arc<Query>,
    ctx: &Arc<EngineContext>,
    array_id: ArrayId,
) -> Result<(), QueryError> {
    if CONFIG.engine.redundancy == 0 {
        return Ok(());
    }
    let peers: Vec<InstanceId> = query
        .live_instances()
        .iter()
        .copied()
        .filter(|i| *i != query.local_instance_id())
        .collect();
    let msg = ClusterMessage::ChunkReplica {
        query_id: query.id(),
        from: query.local_instance_id(),
        chunk: ChunkPayload::eof_marker(array_id),
    };
    for peer in &peers {
        ctx.network.send(*peer, msg.clone()).await?;
    }
    let sem = query.replication.semaphore(array_id);
    let q = query.clone();
    if !sem.enter(peers.len() as u64, move || q.is_valid()).await {
        return Err(QueryError::NoQuorum);
    }
    Ok(())
}
