use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::engine::context::EngineContext;
use crate::engine::errors::{CatalogError, PlanError, QueryError};
use crate::engine::optimizer::Optimizer;
use crate::engine::plan::logical::{LogicalNode, LogicalPlan};
use crate::engine::plan::ops::store::{allocate_store_versions, prepare_storing_nodes};
use crate::engine::plan::serial::SerializedPlan;
use crate::engine::query::executor::execute_plan;
use crate::engine::query::query::Query;
use crate::engine::query::query_id::QueryId;
use crate::engine::query::rollback::release_locks;
use crate::engine::query::worker::spawn_liveness_watcher;
use crate::engine::storage::lock::{InstanceRole, LockDesc, LockMode};
use crate::shared::config::CONFIG;
use crate::shared::protocol::messages::{
    AttributeInfo, ClusterMessage, DimensionInfo,
};

const LOG_TARGET: &str = "engine::query::coordinator";

/// What the client learns about an executed query.
#[derive(Debug, Clone)]
pub struct QueryResultInfo {
    pub query_id: QueryId,
    pub selective: bool,
    pub attributes: Vec<AttributeInfo>,
    pub dimensions: Vec<DimensionInfo>,
    pub explain_logical: String,
    pub explain_physical: String,
    pub execution_time_ms: u64,
    pub warnings: Vec<String>,
}

/// Coordinator phase one: parse, infer array accesses, take the locks
/// (retrying on busy), and re-parse under the locked catalog snapshot.
pub async fn prepare_query(
    ctx: &Arc<EngineContext>,
    query_string: &str,
) -> Result<Arc<Query>, QueryError> {
    let id = QueryId::generate(ctx.cluster.local_instance_id());
    let liveness = ctx.cluster.instance_liveness();
    let query = Query::new(id, None, ctx.cluster.local_instance_id(), liveness)?;
    ctx.queries.insert(query.clone())?;

    let prep_ctx = ctx.clone();
    query.push_finalizer(Box::new(move |q: &Arc<Query>| {
        release_locks(&prep_ctx, q);
    }));

    let result = prepare_inner(ctx, &query, query_string).await;
    if let Err(e) = result {
        let record = e.record();
        query.done_with_error(record);
        let _ = query.handle_abort();
        ctx.queries.remove(id);
        return Err(e);
    }
    Ok(query)
}

async fn prepare_inner(
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
    query_string: &str,
) -> Result<(), QueryError> {
    // first pass collects the array names the query touches
    let plan = crate::command::translator::parse_query(query_string, ctx, query)?;
    infer_array_access(&plan.root, ctx, query)?;

    acquire_locks(ctx, query).await?;

    // second pass observes the catalog as locked
    let plan = crate::command::translator::parse_query(query_string, ctx, query)?;
    debug!(target: LOG_TARGET, query_id = %query.id(), "Query prepared");
    query.set_logical_plan(plan);
    Ok(())
}

/// Walks the logical tree and records one lock request per accessed array,
/// strongest mode winning.
fn infer_array_access(
    node: &LogicalNode,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<(), QueryError> {
    let mode = match node.op_name.as_str() {
        "scan" => Some(LockMode::Rd),
        "store" | "load" => Some(LockMode::Wr),
        "create_array" => Some(LockMode::Crt),
        "remove" => Some(LockMode::Rm),
        _ => None,
    };
    if let Some(mode) = mode {
        if let Some(name) = node.params.iter().find_map(|p| p.as_array_name()) {
            let lock = LockDesc::new(
                name,
                query.id(),
                ctx.cluster.local_instance_id(),
                InstanceRole::Coordinator,
                mode,
            );
            query.request_lock(lock);
        }
    }
    for child in &node.children {
        infer_array_access(child, ctx, query)?;
    }
    Ok(())
}

/// Takes every requested lock, retrying the whole set with a randomized
/// backoff while another query holds a conflicting lock.
async fn acquire_locks(ctx: &Arc<EngineContext>, query: &Arc<Query>) -> Result<(), QueryError> {
    let dead_instances = query.liveness().num_dead() > 0;
    loop {
        query.validate()?;
        let locks = query.requested_locks();
        let mut busy = None;
        for lock in &locks {
            if dead_instances && lock.mode > LockMode::Rd {
                return Err(QueryError::NoQuorum);
            }
            match ctx.catalog.lock_array(lock) {
                Ok(_) => {}
                Err(CatalogError::LockBusy(name)) => {
                    busy = Some(name);
                    break;
                }
                Err(other) => {
                    release_locks(ctx, query);
                    return Err(PlanError::from(other).into());
                }
            }
        }
        match busy {
            None => {
                debug!(target: LOG_TARGET, query_id = %query.id(), locks = locks.len(), "Locks acquired");
                return Ok(());
            }
            Some(name) => {
                warn!(target: LOG_TARGET, query_id = %query.id(), array = %name, "Lock busy; retrying");
                let wait = Duration::from_millis(rand::thread_rng().gen_range(1..=2000));
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Coordinator phase two: optimize, run two-phase commit across the
/// cluster, and commit or abort.
pub async fn execute_query(
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<QueryResultInfo, QueryError> {
    let started = Instant::now();
    let result = execute_inner(ctx, query).await;
    match result {
        Ok(mut info) => {
            info.execution_time_ms = started.elapsed().as_millis() as u64;
            info.warnings = query.warnings();
            ctx.queries.remove(query.id());
            Ok(info)
        }
        Err(e) => {
            let record = e.record();
            // every instance learns about the failure; the query may not
            // have reached all of them, so broadcast to the full snapshot
            let _ = ctx
                .network
                .broadcast(
                    query.live_instances(),
                    ClusterMessage::Abort {
                        query_id: query.id(),
                    },
                )
                .await;
            query.done_with_error(record);
            let _ = query.handle_abort();
            ctx.queries.remove(query.id());
            Err(e)
        }
    }
}

async fn execute_inner(
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<QueryResultInfo, QueryError> {
    query.start()?;
    query.validate()?;

    let logical = query.take_logical_plan().ok_or(QueryError::QueryWasExecuted)?;
    let explain_logical = logical.explain();

    let optimizer = Optimizer::new();
    let mut plan = optimizer.optimize(ctx, query, &logical)?;
    let is_ddl = plan.is_ddl();
    query.set_ddl(is_ddl);

    allocate_store_versions(&mut plan, ctx)?;
    prepare_storing_nodes(&plan, ctx, query, InstanceRole::Coordinator)?;
    let explain_physical = plan.explain();

    spawn_liveness_watcher(ctx.clone(), query.clone());

    let n = query.instances_count();
    if n > 1 {
        // refuse to run if the cluster changed under us
        let membership = ctx.cluster.membership();
        let redundancy = CONFIG.engine.redundancy as u64;
        if membership.view_id != query.liveness().view_id()
            || (n + redundancy) < membership.len() as u64
        {
            return Err(QueryError::NoQuorum);
        }

        let serialized = SerializedPlan::from_plan(&plan).map_err(PlanError::from)?;
        ctx.network
            .broadcast(
                query.live_instances(),
                ClusterMessage::PreparePhysicalPlan {
                    query_id: query.id(),
                    coordinator: ctx.cluster.local_instance_id(),
                    plan: serialized,
                    liveness: (**query.liveness()).clone(),
                },
            )
            .await?;
        debug!(target: LOG_TARGET, query_id = %query.id(), "Prepare physical plan sent");

        let q = query.clone();
        if !query.prepare_acks.enter(n - 1, move || q.is_valid()).await {
            query.validate()?;
            return Err(QueryError::NoQuorum);
        }

        ctx.network
            .broadcast(
                query.live_instances(),
                ClusterMessage::ExecutePhysicalPlan {
                    query_id: query.id(),
                },
            )
            .await?;
        debug!(target: LOG_TARGET, query_id = %query.id(), "Execute physical plan sent");
    }

    let result = execute_plan(&mut plan, ctx, query).await?;

    if n > 1 {
        let q = query.clone();
        if !query.execute_acks.enter(n - 1, move || q.is_valid()).await {
            query.validate()?;
            return Err(QueryError::NoQuorum);
        }
        query.validate()?;
    }

    query.done()?;
    handle_complete(ctx, query).await?;

    let info = match &result {
        Some(array) => {
            let desc = array.descriptor();
            QueryResultInfo {
                query_id: query.id(),
                selective: true,
                attributes: desc
                    .data_attributes()
                    .map(|a| AttributeInfo {
                        id: a.id(),
                        name: a.name().to_string(),
                        type_id: a.type_id().to_string(),
                        nullable: a.is_nullable(),
                    })
                    .collect(),
                dimensions: desc
                    .dimensions()
                    .iter()
                    .map(|d| DimensionInfo {
                        name: d.name().to_string(),
                        start: d.start(),
                        end_max: d.end_max(),
                        chunk_interval: d.chunk_interval(),
                        chunk_overlap: d.chunk_overlap(),
                    })
                    .collect(),
                explain_logical,
                explain_physical,
                execution_time_ms: 0,
                warnings: Vec::new(),
            }
        }
        None => QueryResultInfo {
            query_id: query.id(),
            selective: false,
            attributes: Vec::new(),
            dimensions: Vec::new(),
            explain_logical,
            explain_physical,
            execution_time_ms: 0,
            warnings: Vec::new(),
        },
    };
    info!(target: LOG_TARGET, query_id = %query.id(), selective = info.selective, "Query finished");
    Ok(info)
}

/// Commits locally, then tells every worker to do the same.
async fn handle_complete(ctx: &Arc<EngineContext>, query: &Arc<Query>) -> Result<(), QueryError> {
    query.handle_commit()?;
    ctx.network
        .broadcast(
            query.live_instances(),
            ClusterMessage::Commit {
                query_id: query.id(),
            },
        )
        .await?;
    Ok(())
}

/// Client-driven cancellation.
pub async fn cancel_query(ctx: &Arc<EngineContext>, query_id: QueryId) -> Result<(), QueryError> {
    let query = ctx.queries.get(query_id)?;
    let _ = ctx
        .network
        .broadcast(
            query.live_instances(),
            ClusterMessage::Abort { query_id },
        )
        .await;
    query.handle_error(QueryError::Cancelled(query_id.to_string()).record());
    query.handle_abort()?;
    ctx.queries.remove(query_id);
    Ok(())
}
