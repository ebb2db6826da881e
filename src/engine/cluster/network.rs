use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::engine::cluster::instance::{InstanceId, InstanceMembership};
use crate::engine::cluster::liveness::InstanceLiveness;
use crate::engine::errors::QueryError;
use crate::engine::query::query_id::QueryId;
use crate::shared::protocol::messages::{ChunkPayload, ClusterMessage};

const LOG_TARGET: &str = "engine::cluster::network";

/// Local view of the cluster: membership, the current liveness snapshot,
/// and the liveness publisher queries subscribe to.
pub struct Cluster {
    local: InstanceId,
    membership: RwLock<InstanceMembership>,
    liveness_tx: watch::Sender<Arc<InstanceLiveness>>,
}

impl Cluster {
    pub fn new(local: InstanceId, membership: InstanceMembership) -> Arc<Self> {
        let liveness = Arc::new(InstanceLiveness::new(1, &membership));
        let (liveness_tx, _) = watch::channel(liveness);
        Arc::new(Self {
            local,
            membership: RwLock::new(membership),
            liveness_tx,
        })
    }

    pub fn local_instance_id(&self) -> InstanceId {
        self.local
    }

    pub fn membership(&self) -> InstanceMembership {
        self.membership.read().unwrap().clone()
    }

    pub fn instance_liveness(&self) -> Arc<InstanceLiveness> {
        self.liveness_tx.borrow().clone()
    }

    pub fn subscribe_liveness(&self) -> watch::Receiver<Arc<InstanceLiveness>> {
        self.liveness_tx.subscribe()
    }

    /// Publishes a new liveness snapshot; versions must grow. The value
    /// updates even while nothing subscribes yet.
    pub fn publish_liveness(&self, liveness: InstanceLiveness) {
        debug_assert!(liveness.version() >= self.instance_liveness().version());
        self.liveness_tx.send_replace(Arc::new(liveness));
    }

    /// Marks one instance dead and publishes the successor snapshot.
    pub fn declare_dead(&self, instance: InstanceId) {
        let next = self.instance_liveness().with_dead(instance);
        warn!(target: LOG_TARGET, instance, version = next.version(), "Instance declared dead");
        self.publish_liveness(next);
    }
}

/// Point-to-point message transport between instances.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: InstanceId, msg: ClusterMessage) -> Result<(), QueryError>;
}

/// In-process transport: a registry of per-instance channels. Cluster
/// tests (and single-host deployments) run every instance inside one
/// process and exchange messages through here.
pub struct ChannelHub {
    peers: Mutex<AHashMap<InstanceId, mpsc::UnboundedSender<ClusterMessage>>>,
}

impl ChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(AHashMap::new()),
        })
    }

    /// Registers an instance and returns its inbound message stream.
    pub fn register(&self, id: InstanceId) -> mpsc::UnboundedReceiver<ClusterMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().insert(id, tx);
        rx
    }

    /// Simulates an instance crash: its inbound channel goes away.
    pub fn disconnect(&self, id: InstanceId) {
        self.peers.lock().unwrap().remove(&id);
    }

    fn sender_for(&self, id: InstanceId) -> Option<mpsc::UnboundedSender<ClusterMessage>> {
        self.peers.lock().unwrap().get(&id).cloned()
    }
}

pub struct ChannelTransport {
    hub: Arc<ChannelHub>,
}

impl ChannelTransport {
    pub fn new(hub: Arc<ChannelHub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, to: InstanceId, msg: ClusterMessage) -> Result<(), QueryError> {
        // messages to dead instances vanish, like on a real network
        if let Some(tx) = self.hub.sender_for(to) {
            let _ = tx.send(msg);
        }
        Ok(())
    }
}

struct ExchangeEntry {
    tx: mpsc::UnboundedSender<(InstanceId, ChunkPayload)>,
    /// Present until the local operator claims the queue; inbound chunks
    /// that arrive first buffer in the channel.
    rx: Option<mpsc::UnboundedReceiver<(InstanceId, ChunkPayload)>>,
}

impl ExchangeEntry {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Per-instance message fabric: sends cluster messages and routes inbound
/// scatter/gather traffic to the exchange that registered for it.
pub struct NetworkManager {
    local: InstanceId,
    transport: Arc<dyn Transport>,
    exchanges: Mutex<AHashMap<(QueryId, u64), ExchangeEntry>>,
}

impl NetworkManager {
    pub fn new(local: InstanceId, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            local,
            transport,
            exchanges: Mutex::new(AHashMap::new()),
        })
    }

    pub fn local_instance_id(&self) -> InstanceId {
        self.local
    }

    pub async fn send(&self, to: InstanceId, msg: ClusterMessage) -> Result<(), QueryError> {
        if to == self.local {
            self.route_local(msg);
            return Ok(());
        }
        self.transport.send(to, msg).await
    }

    /// Sends to every listed instance except this one.
    pub async fn broadcast(
        &self,
        instances: &[InstanceId],
        msg: ClusterMessage,
    ) -> Result<(), QueryError> {
        for id in instances {
            if *id != self.local {
                self.transport.send(*id, msg.clone()).await?;
            }
        }
        Ok(())
    }

    /// Claims the inbound queue for one scatter/gather round. Chunks that
    /// arrived before the claim are waiting in the queue.
    pub fn register_exchange(
        &self,
        query_id: QueryId,
        exchange: u64,
    ) -> mpsc::UnboundedReceiver<(InstanceId, ChunkPayload)> {
        let mut exchanges = self.exchanges.lock().unwrap();
        let entry = exchanges
            .entry((query_id, exchange))
            .or_insert_with(ExchangeEntry::new);
        entry
            .rx
            .take()
            .expect("exchange queue claimed exactly once per round")
    }

    pub fn close_exchange(&self, query_id: QueryId, exchange: u64) {
        self.exchanges.lock().unwrap().remove(&(query_id, exchange));
    }

    /// Routes one inbound SG chunk, buffering when the local operator has
    /// not reached its SG node yet.
    pub fn route_sg_chunk(
        &self,
        query_id: QueryId,
        exchange: u64,
        from: InstanceId,
        chunk: ChunkPayload,
    ) -> bool {
        let mut exchanges = self.exchanges.lock().unwrap();
        let entry = exchanges
            .entry((query_id, exchange))
            .or_insert_with(ExchangeEntry::new);
        entry.tx.send((from, chunk)).is_ok()
    }

    fn route_local(&self, msg: ClusterMessage) {
        if let ClusterMessage::SgChunk {
            query_id,
            exchange,
            from,
            chunk,
        } = msg
        {
            if !self.route_sg_chunk(query_id, exchange, from, chunk) {
                debug!(target: LOG_TARGET, %query_id, exchange, "Local SG chunk had no listener");
            }
        }
    }
}
