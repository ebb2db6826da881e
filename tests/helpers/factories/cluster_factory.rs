use std::sync::Arc;

use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::cluster::instance::InstanceMembership;
use crate::engine::cluster::network::{ChannelHub, ChannelTransport, Cluster, NetworkManager};
use crate::engine::context::EngineContext;
use crate::engine::query::worker::start_message_loop;
use crate::engine::storage::catalog::SystemCatalog;

/// Builds in-process clusters for lifecycle and liveness tests. Every
/// instance gets its own engine context; they share one catalog and talk
/// over a channel hub.
pub struct ClusterFactory {
    instance_ids: Vec<u64>,
    cache_bytes: usize,
}

pub struct TestCluster {
    pub hub: Arc<ChannelHub>,
    pub catalog: Arc<SystemCatalog>,
    pub contexts: Vec<Arc<EngineContext>>,
}

impl TestCluster {
    pub fn coordinator(&self) -> &Arc<EngineContext> {
        &self.contexts[0]
    }

    /// Simulates an instance crash: its inbound channel disappears and a
    /// new liveness snapshot reaches every survivor.
    pub fn kill_instance(&self, instance_id: u64) {
        self.hub.disconnect(instance_id);
        for ctx in &self.contexts {
            if ctx.cluster.local_instance_id() != instance_id {
                ctx.cluster.declare_dead(instance_id);
            }
        }
    }
}

impl ClusterFactory {
    pub fn new() -> Self {
        Self {
            instance_ids: vec![0],
            cache_bytes: 64 << 20,
        }
    }

    pub fn instances(mut self, n: u64) -> Self {
        self.instance_ids = (0..n).collect();
        self
    }

    pub fn cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = bytes;
        self
    }

    pub fn create(self) -> TestCluster {
        let hub = ChannelHub::new();
        let catalog = Arc::new(SystemCatalog::new());
        let mut contexts = Vec::new();
        for &id in &self.instance_ids {
            let membership = InstanceMembership::new(1, self.instance_ids.clone());
            let cluster = Cluster::new(id, membership);
            let rx = hub.register(id);
            let transport = ChannelTransport::new(hub.clone());
            let network = NetworkManager::new(id, transport);
            let cache = ChunkCache::new(self.cache_bytes);
            let ctx = EngineContext::new(cluster, network, catalog.clone(), cache);
            start_message_loop(ctx.clone(), rx);
            contexts.push(ctx);
        }
        TestCluster {
            hub,
            catalog,
            contexts,
        }
    }
}

impl Default for ClusterFactory {
    fn default() -> Self {
        Self::new()
    }
}
