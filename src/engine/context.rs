use std::sync::Arc;

use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::cluster::network::{Cluster, NetworkManager};
use crate::engine::plan::operator_library::OperatorLibrary;
use crate::engine::query::registry::QueryRegistry;
use crate::engine::storage::catalog::SystemCatalog;
use crate::engine::storage::manager::StorageManager;
use crate::engine::types::aggregate::AggregateLibrary;
use crate::engine::types::function_library::FunctionLibrary;
use crate::engine::types::type_registry::TypeRegistry;

/// Everything one engine instance shares across queries: libraries,
/// catalog, storage, cache, cluster view, network fabric, and the query
/// registry. Built once at startup and passed down explicitly.
///
/// The catalog is shared cluster-wide (it models the central metadata
/// store); storage, cache and network are per instance.
pub struct EngineContext {
    pub types: TypeRegistry,
    pub functions: FunctionLibrary,
    pub aggregates: AggregateLibrary,
    pub operators: OperatorLibrary,
    pub catalog: Arc<SystemCatalog>,
    pub storage: StorageManager,
    pub cache: Arc<ChunkCache>,
    pub cluster: Arc<Cluster>,
    pub network: Arc<NetworkManager>,
    pub queries: QueryRegistry,
}

impl EngineContext {
    pub fn new(
        cluster: Arc<Cluster>,
        network: Arc<NetworkManager>,
        catalog: Arc<SystemCatalog>,
        cache: Arc<ChunkCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            types: TypeRegistry::builtin(),
            functions: FunctionLibrary::builtin(),
            aggregates: AggregateLibrary::builtin(),
            operators: OperatorLibrary::builtin(),
            catalog,
            storage: StorageManager::new(cache.clone()),
            cache,
            cluster,
            network,
            queries: QueryRegistry::new(),
        })
    }
}
