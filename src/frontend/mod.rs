pub mod context;
pub mod tcp;

use std::sync::Arc;
use tracing::info;

use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::cluster::instance::InstanceMembership;
use crate::engine::cluster::network::{ChannelHub, ChannelTransport, Cluster, NetworkManager};
use crate::engine::context::EngineContext;
use crate::engine::query::worker;
use crate::engine::storage::catalog::SystemCatalog;
use crate::shared::config::CONFIG;
use context::FrontendContext;

/// Boots every configured instance in this process (they talk over the
/// channel hub) and serves clients on the instance named in the config.
pub async fn start_all() -> anyhow::Result<()> {
    let hub = ChannelHub::new();
    let catalog = Arc::new(SystemCatalog::new());
    let mut serving = None;

    for &id in &CONFIG.server.cluster {
        let membership = InstanceMembership::new(1, CONFIG.server.cluster.clone());
        let cluster = Cluster::new(id, membership);
        let rx = hub.register(id);
        let transport = ChannelTransport::new(hub.clone());
        let network = NetworkManager::new(id, transport);
        let cache = ChunkCache::from_config();
        let ctx = EngineContext::new(cluster, network, catalog.clone(), cache);
        worker::start_message_loop(ctx.clone(), rx);
        info!(instance = id, "Engine instance started");
        if id == CONFIG.server.instance_id {
            serving = Some(ctx);
        }
    }

    let engine = serving.ok_or_else(|| {
        anyhow::anyhow!(
            "instance {} is not part of the configured cluster",
            CONFIG.server.instance_id
        )
    })?;
    let ctx = FrontendContext::new(engine);
    tcp::listener::run_tcp_server(Arc::new(ctx)).await
}
