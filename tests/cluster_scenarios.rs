//! End-to-end scenarios over in-process clusters: query lifecycle,
//! two-phase commit, liveness-driven abort, and rollback.

use std::sync::Arc;
use std::time::Duration;

use rooster_db::engine::cache::chunk_cache::ChunkCache;
use rooster_db::engine::chunk::iterator::{ChunkIterator, IterationMode};
use rooster_db::engine::cluster::instance::InstanceMembership;
use rooster_db::engine::cluster::network::{
    ChannelHub, ChannelTransport, Cluster, NetworkManager,
};
use rooster_db::engine::context::EngineContext;
use rooster_db::engine::errors::QueryError;
use rooster_db::engine::query::coordinator::{execute_query, prepare_query};
use rooster_db::engine::query::query::CommitState;
use rooster_db::engine::query::worker::start_message_loop;
use rooster_db::engine::storage::catalog::SystemCatalog;

struct TestCluster {
    hub: Arc<ChannelHub>,
    catalog: Arc<SystemCatalog>,
    contexts: Vec<Arc<EngineContext>>,
}

fn spin_cluster(n: u64) -> TestCluster {
    let ids: Vec<u64> = (0..n).collect();
    let hub = ChannelHub::new();
    let catalog = Arc::new(SystemCatalog::new());
    let mut contexts = Vec::new();
    for &id in &ids {
        let membership = InstanceMembership::new(1, ids.clone());
        let cluster = Cluster::new(id, membership);
        let rx = hub.register(id);
        let transport = ChannelTransport::new(hub.clone());
        let network = NetworkManager::new(id, transport);
        let cache = ChunkCache::new(64 << 20);
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

impl TestCluster {
    fn kill_instance(&self, instance_id: u64) {
        self.hub.disconnect(instance_id);
        for ctx in &self.contexts {
            if ctx.cluster.local_instance_id() != instance_id {
                ctx.cluster.declare_dead(instance_id);
            }
        }
    }
}

async fn run(ctx: &Arc<EngineContext>, afl: &str) -> Result<Vec<(Vec<i64>, i64)>, QueryError> {
    let query = prepare_query(ctx, afl).await?;
    execute_query(ctx, &query).await?;
    let mut cells = Vec::new();
    if let Some(array) = query.result() {
        use rooster_db::engine::array::iterator::Array;
        let attr = array
            .descriptor()
            .data_attributes()
            .next()
            .map(|a| a.id())
            .unwrap_or(0);
        let mut it = array.const_iterator(attr)?;
        while !it.end() {
            let chunk = it.chunk()?;
            let mut ci = chunk.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
            while !ci.end() {
                cells.push((ci.position().unwrap(), ci.item().unwrap().get_i64()));
                ci.advance().unwrap();
            }
            it.advance()?;
        }
    }
    cells.sort();
    Ok(cells)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_instance_store_and_scan_roundtrip() {
    let cluster = spin_cluster(1);
    let ctx = &cluster.contexts[0];

    run(ctx, "store(build(<v:int32>[i=0:3,4,0], i + 1), A)")
        .await
        .unwrap();
    let cells = run(ctx, "scan(A)").await.unwrap();
    assert_eq!(
        cells,
        vec![(vec![0], 1), (vec![1], 2), (vec![2], 3), (vec![3], 4)]
    );

    // the catalog committed exactly one version
    let base = cluster.catalog.array_id("A").unwrap();
    assert_eq!(cluster.catalog.last_version(base), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_distributed_store_scan_and_filter() {
    let cluster = spin_cluster(3);
    let ctx = &cluster.contexts[0];

    run(ctx, "store(build(<v:int32>[i=0:15,2,0], i), A)")
        .await
        .unwrap();
    let cells = run(ctx, "scan(A)").await.unwrap();
    assert_eq!(cells.len(), 16);
    assert_eq!(cells[7], (vec![7], 7));

    let filtered = run(ctx, "filter(scan(A), v > 11)").await.unwrap();
    assert_eq!(
        filtered,
        vec![(vec![12], 12), (vec![13], 13), (vec![14], 14), (vec![15], 15)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_distributed_aggregate_sums_across_instances() {
    let cluster = spin_cluster(3);
    let ctx = &cluster.contexts[0];

    run(ctx, "store(build(<v:int32>[i=0:15,2,0], i), A)")
        .await
        .unwrap();

    // the two-phase aggregate folds partial states from every instance
    let query = prepare_query(ctx, "sum(scan(A), v)").await.unwrap();
    execute_query(ctx, &query).await.unwrap();
    let array = query.result().expect("aggregate result");
    use rooster_db::engine::array::iterator::Array;
    let mut it = array.const_iterator(0).unwrap();
    assert!(!it.end());
    let chunk = it.chunk().unwrap();
    let mut ci = chunk.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
    assert!(!ci.end());
    let total = ci.item().unwrap().get_f64();
    assert_eq!(total, (0..16).sum::<i64>() as f64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_join_on_collocated_inputs() {
    let cluster = spin_cluster(2);
    let ctx = &cluster.contexts[0];

    run(ctx, "store(build(<v:int32>[i=0:7,2,0], i), A)")
        .await
        .unwrap();
    run(ctx, "store(build(<w:int32>[i=0:7,2,0], i * 10), B)")
        .await
        .unwrap();

    let query = prepare_query(ctx, "join(scan(A), scan(B))").await.unwrap();
    execute_query(ctx, &query).await.unwrap();
    let array = query.result().expect("join result");
    use rooster_db::engine::array::iterator::Array;

    // attribute 1 carries B's values at A's cells
    let mut it = array.const_iterator(1).unwrap();
    let mut seen = Vec::new();
    while !it.end() {
        let chunk = it.chunk().unwrap();
        let mut ci = chunk.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
        while !ci.end() {
            seen.push((ci.position().unwrap()[0], ci.item().unwrap().get_i64()));
            ci.advance().unwrap();
        }
        it.advance().unwrap();
    }
    seen.sort();
    assert_eq!(seen.len(), 8);
    assert_eq!(seen[3], (3, 30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_membership_change_refuses_new_queries() {
    let cluster = spin_cluster(3);
    let ctx = &cluster.contexts[0];
    run(ctx, "store(build(<v:int32>[i=0:7,2,0], i), A)")
        .await
        .unwrap();

    // a dead instance shrinks liveness below membership
    cluster.kill_instance(2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = run(ctx, "scan(A)").await.unwrap_err();
    assert!(matches!(err, QueryError::NoQuorum));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_worker_aborts_when_coordinator_dies() {
    use rooster_db::engine::optimizer::Optimizer;
    use rooster_db::engine::plan::serial::SerializedPlan;
    use rooster_db::shared::protocol::messages::ClusterMessage;

    let cluster = spin_cluster(2);
    let coordinator = &cluster.contexts[0];
    let worker = &cluster.contexts[1];

    run(coordinator, "store(build(<v:int32>[i=0:7,2,0], i), A)")
        .await
        .unwrap();

    // hand-deliver a prepare so the worker parks a query awaiting
    // execute/commit, exactly the window a coordinator death hits
    let query = prepare_query(coordinator, "scan(A)").await.unwrap();
    let query_id = query.id();
    let logical = query.logical_plan().unwrap();
    let plan = Optimizer::new()
        .optimize(coordinator, &query, &logical)
        .unwrap();
    let serialized = SerializedPlan::from_plan(&plan).unwrap();
    coordinator
        .network
        .send(
            1,
            ClusterMessage::PreparePhysicalPlan {
                query_id,
                coordinator: 0,
                plan: serialized,
                liveness: (**query.liveness()).clone(),
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let worker_query = worker.queries.get(query_id).expect("worker parked the query");

    // the coordinator dies before commit or abort arrives
    cluster.kill_instance(0);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the worker self-aborted and dropped the query
    assert_eq!(worker_query.commit_state(), CommitState::Aborted);
    assert!(worker.queries.get(query_id).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_commit_wins_over_late_abort() {
    let cluster = spin_cluster(1);
    let ctx = &cluster.contexts[0];

    let query = prepare_query(ctx, "store(build(<v:int32>[i=0:3,4,0], 7), A)")
        .await
        .unwrap();
    execute_query(ctx, &query).await.unwrap();
    assert_eq!(query.commit_state(), CommitState::Committed);

    // a late abort (raced liveness change) must not unseat the commit
    let err = query.handle_abort().unwrap_err();
    assert!(matches!(err, QueryError::InvalidCommitState { .. }));
    assert_eq!(query.commit_state(), CommitState::Committed);

    let base = cluster.catalog.array_id("A").unwrap();
    assert_eq!(cluster.catalog.last_version(base), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_abort_rolls_back_uncommitted_version() {
    let cluster = spin_cluster(1);
    let ctx = &cluster.contexts[0];

    // first version commits
    run(ctx, "store(build(<v:int32>[i=0:3,4,0], 1), A)")
        .await
        .unwrap();
    let base = cluster.catalog.array_id("A").unwrap();
    assert_eq!(cluster.catalog.last_version(base), 1);

    // a store whose expression references an unknown name fails during
    // physical planning, after locks were taken
    let query = prepare_query(ctx, "store(filter(scan(A), nonsense > 1), A)")
        .await
        .unwrap();
    let failed_id = query.id();
    assert!(execute_query(ctx, &query).await.is_err());
    assert_eq!(query.commit_state(), CommitState::Aborted);
    assert_eq!(cluster.catalog.last_version(base), 1);
    // the release-locks finalizer ran
    assert!(cluster.catalog.held_locks(failed_id).is_empty());

    // and scanning still sees version one
    let cells = run(ctx, "scan(A)").await.unwrap();
    assert_eq!(cells.len(), 4);
    assert!(cells.iter().all(|(_, v)| *v == 1));
}
