use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::array::address::Address;
use crate::engine::array::iterator::Array;
use crate::engine::chunk::mem_chunk::MemChunk;
use crate::engine::cluster::exchange::merge_into;
use crate::engine::context::EngineContext;
use crate::engine::errors::{ExecutionError, PlanError, QueryError};
use crate::engine::plan::node::PhysicalPlan;
use crate::engine::plan::serial::SerializedPlan;
use crate::engine::query::executor::execute_plan;
use crate::engine::query::query::Query;
use crate::engine::query::query_id::QueryId;
use crate::engine::query::rollback::release_locks;
use crate::engine::storage::lock::{InstanceRole, LockDesc, LockMode};
use crate::shared::protocol::error_codes::{ErrorRecord, LongError, ShortError};
use crate::shared::protocol::messages::{ChunkPayload, ClusterMessage};

const LOG_TARGET: &str = "engine::query::worker";

/// Drains the instance's inbound cluster messages. Prepare, commit, abort
/// and routing run inline; plan execution is long and runs detached so SG
/// traffic keeps flowing through this loop.
pub fn start_message_loop(
    ctx: Arc<EngineContext>,
    mut rx: mpsc::UnboundedReceiver<ClusterMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            handle_message(&ctx, msg).await;
        }
        info!(target: LOG_TARGET, "Cluster message loop ended");
    })
}

pub async fn handle_message(ctx: &Arc<EngineContext>, msg: ClusterMessage) {
    match msg {
        ClusterMessage::PreparePhysicalPlan {
            query_id,
            coordinator,
            plan,
            liveness,
        } => {
            on_prepare(ctx, query_id, coordinator, plan, liveness).await;
        }
        ClusterMessage::ExecutePhysicalPlan { query_id } => {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                on_execute(&ctx, query_id).await;
            });
        }
        ClusterMessage::PrepareAck { query_id, .. } => {
            if let Ok(query) = ctx.queries.get(query_id) {
                query.prepare_acks.release(1);
            }
        }
        ClusterMessage::ExecuteAck { query_id, .. } => {
            if let Ok(query) = ctx.queries.get(query_id) {
                query.execute_acks.release(1);
            }
        }
        ClusterMessage::Commit { query_id } => {
            if let Ok(query) = ctx.queries.get(query_id) {
                if let Err(e) = query.handle_commit() {
                    error!(target: LOG_TARGET, %query_id, error = %e, "Commit failed");
                }
                ctx.queries.remove(query_id);
            }
        }
        ClusterMessage::Abort { query_id } => {
            if let Ok(query) = ctx.queries.get(query_id) {
                if let Err(e) = query.handle_abort() {
                    warn!(target: LOG_TARGET, %query_id, error = %e, "Abort refused");
                }
                ctx.queries.remove(query_id);
            }
        }
        ClusterMessage::Error {
            query_id, record, ..
        } => {
            if let Ok(query) = ctx.queries.get(query_id) {
                query.handle_error(record);
            }
        }
        ClusterMessage::SgChunk {
            query_id,
            exchange,
            from,
            chunk,
        } => {
            ctx.network.route_sg_chunk(query_id, exchange, from, chunk);
        }
        ClusterMessage::ChunkReplica {
            query_id,
            from,
            chunk,
        } => {
            on_chunk_replica(ctx, query_id, from, chunk).await;
        }
        ClusterMessage::ReplicaAck {
            query_id,
            from,
            array_id,
        } => {
            if let Ok(query) = ctx.queries.get(query_id) {
                query.replication.ack(from, array_id);
            }
        }
    }
}

async fn on_prepare(
    ctx: &Arc<EngineContext>,
    query_id: QueryId,
    coordinator: u64,
    plan: SerializedPlan,
    liveness: crate::engine::cluster::liveness::InstanceLiveness,
) {
    debug!(target: LOG_TARGET, %query_id, coordinator, "Preparing physical plan");
    let result = prepare_inner(ctx, query_id, coordinator, plan, liveness).await;
    match result {
        Ok(()) => {
            let _ = ctx
                .network
                .send(
                    coordinator,
                    ClusterMessage::PrepareAck {
                        query_id,
                        from: ctx.cluster.local_instance_id(),
                    },
                )
                .await;
        }
        Err(e) => {
            error!(target: LOG_TARGET, %query_id, error = %e, "Prepare failed");
            let record = e.record();
            if let Ok(query) = ctx.queries.get(query_id) {
                query.handle_error(record.clone());
            }
            let _ = ctx
                .network
                .send(
                    coordinator,
                    ClusterMessage::Error {
                        query_id,
                        from: ctx.cluster.local_instance_id(),
                        record,
                    },
                )
                .await;
        }
    }
}

async fn prepare_inner(
    ctx: &Arc<EngineContext>,
    query_id: QueryId,
    coordinator: u64,
    plan: SerializedPlan,
    liveness: crate::engine::cluster::liveness::InstanceLiveness,
) -> Result<(), QueryError> {
    let query = Query::new(
        query_id,
        Some(coordinator),
        ctx.cluster.local_instance_id(),
        Arc::new(liveness),
    )?;
    ctx.queries.insert(query.clone())?;

    let fin_ctx = ctx.clone();
    query.push_finalizer(Box::new(move |q: &Arc<Query>| {
        release_locks(&fin_ctx, q);
    }));

    let plan = plan
        .into_plan(&ctx.operators, &ctx.functions)
        .map_err(PlanError::from)?;

    take_read_locks(&plan, ctx, &query)?;
    crate::engine::plan::ops::store::prepare_storing_nodes(
        &plan,
        ctx,
        &query,
        InstanceRole::Worker,
    )?;

    query.set_physical_plan(plan);
    spawn_liveness_watcher(ctx.clone(), query.clone());
    Ok(())
}

fn take_read_locks(
    plan: &PhysicalPlan,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<(), QueryError> {
    let Some(root) = plan.root() else {
        return Ok(());
    };
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        stack.extend(plan.children(id));
        if plan.op(id).logical_name() != "scan" {
            continue;
        }
        let Some(name) = plan.op(id).parameters().iter().find_map(|p| p.as_array_name())
        else {
            continue;
        };
        let lock = LockDesc::new(
            name,
            query.id(),
            ctx.cluster.local_instance_id(),
            InstanceRole::Worker,
            LockMode::Rd,
        );
        ctx.catalog.lock_array(&lock).map_err(PlanError::from)?;
        query.request_lock(lock);
    }
    Ok(())
}

async fn on_execute(ctx: &Arc<EngineContext>, query_id: QueryId) {
    let Ok(query) = ctx.queries.get(query_id) else {
        warn!(target: LOG_TARGET, %query_id, "Execute for unknown query");
        return;
    };
    debug!(target: LOG_TARGET, %query_id, "Executing physical plan");
    let coordinator = query.physical_coordinator_id();
    let result = match query.take_physical_plan() {
        None => Err(QueryError::QueryWasExecuted),
        Some(mut plan) => match query.start() {
            Err(e) => Err(e),
            Ok(()) => execute_plan(&mut plan, ctx, &query).await.map(|_| ()),
        },
    };
    match result {
        Ok(()) => {
            if query.done().is_ok() {
                let _ = ctx
                    .network
                    .send(
                        coordinator,
                        ClusterMessage::ExecuteAck {
                            query_id,
                            from: ctx.cluster.local_instance_id(),
                        },
                    )
                    .await;
                debug!(target: LOG_TARGET, %query_id, "Execution acknowledged");
            }
        }
        Err(e) => {
            error!(target: LOG_TARGET, %query_id, error = %e, "Execution failed");
            let record = e.record();
            // completes a deferred abort when one raced in mid-execution
            query.done_with_error(record.clone());
            let _ = ctx
                .network
                .send(
                    coordinator,
                    ClusterMessage::Error {
                        query_id,
                        from: ctx.cluster.local_instance_id(),
                        record,
                    },
                )
                .await;
        }
    }
}

async fn on_chunk_replica(
    ctx: &Arc<EngineContext>,
    query_id: QueryId,
    from: u64,
    chunk: ChunkPayload,
) {
    let Ok(query) = ctx.queries.get(query_id) else {
        warn!(target: LOG_TARGET, %query_id, "Replica for unknown query");
        return;
    };
    if chunk.eof {
        let _ = ctx
            .network
            .send(
                from,
                ClusterMessage::ReplicaAck {
                    query_id,
                    from: ctx.cluster.local_instance_id(),
                    array_id: chunk.array_id,
                },
            )
            .await;
        return;
    }
    if !chunk.verify_checksum() {
        query.handle_error(
            QueryError::Execution(ExecutionError::MergeFailed(
                "replica checksum mismatch".to_string(),
            ))
            .record(),
        );
        return;
    }
    let array_id = chunk.array_id;
    let Some(array) = query.replication.inbound_array(array_id) else {
        warn!(target: LOG_TARGET, %query_id, array_id, "Replica for unknown array");
        return;
    };
    let q = query.clone();
    let job = Box::pin(async move {
        let desc = array.descriptor();
        let addr = Address::new(desc.id(), chunk.attribute_id, chunk.coordinates.clone());
        match MemChunk::decode(desc, addr, &chunk.payload) {
            Ok(decoded) => {
                if let Err(e) = merge_into(&array, decoded, None) {
                    q.handle_error(e.record());
                }
            }
            Err(_) => {
                q.handle_error(ErrorRecord::new(
                    ShortError::Storage,
                    LongError::MergeFailed,
                    "replica payload corrupt",
                ));
            }
        }
    });
    if let Err(e) = query.replication.enqueue_inbound(array_id, job) {
        // the bounded queue overflowed
        query.handle_error(e.record());
    }
}

/// Watches the liveness publisher for this query. Any new snapshot means
/// no quorum; when a worker's coordinator died the worker aborts itself
/// and lets the catalog decide whether a rollback is due.
pub fn spawn_liveness_watcher(ctx: Arc<EngineContext>, query: Arc<Query>) {
    let mut rx = ctx.cluster.subscribe_liveness();
    tokio::spawn(async move {
        let snapshot_version = query.liveness().version();
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let new_liveness = rx.borrow().clone();
            if new_liveness.version() <= snapshot_version {
                continue;
            }
            warn!(
                target: LOG_TARGET,
                query_id = %query.id(),
                version = new_liveness.version(),
                "Liveness changed; aborting query"
            );
            query.handle_error(QueryError::NoQuorum.record());

            if !query.is_coordinator() {
                let coordinator = query.physical_coordinator_id();
                if new_liveness.is_dead(coordinator) {
                    // the coordinator may have committed just before dying;
                    // rollback decides by looking at the catalog
                    query.set_force_cancelled();
                    if let Err(e) = query.handle_abort() {
                        warn!(target: LOG_TARGET, query_id = %query.id(), error = %e, "Self-abort refused");
                    }
                    ctx.queries.remove(query.id());
                }
            }
            return;
        }
    });
}
