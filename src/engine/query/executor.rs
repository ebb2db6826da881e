use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::engine::array::iterator::ArrayRef;
use crate::engine::cluster::exchange::redistribute;
use crate::engine::context::EngineContext;
use crate::engine::errors::QueryError;
use crate::engine::plan::distribution::{ArrayDistribution, PartitioningSchema};
use crate::engine::plan::node::{NodeId, PhysicalPlan};
use crate::engine::plan::physical::PhysicalParameter;
use crate::engine::query::query::Query;

const LOG_TARGET: &str = "engine::query::executor";

/// The exchange id of the final result gather; plan nodes use their slot
/// index, which can never reach this.
pub const RESULT_EXCHANGE_ID: u64 = u64::MAX;

/// Runs the local slice of the physical plan and, for selective queries,
/// gathers the distributed result onto the coordinator for the client to
/// fetch.
pub async fn execute_plan(
    plan: &mut PhysicalPlan,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<Option<ArrayRef>, QueryError> {
    let Some(root) = plan.root() else {
        return Ok(None);
    };
    let root_dist = plan.distribution(root);
    let result = exec_node(plan, root, ctx, query).await?;
    if plan.is_ddl() {
        return Ok(None);
    }

    let coord_logical = query
        .map_physical_to_logical(query.physical_coordinator_id())
        .ok_or(QueryError::NoQuorum)?;
    let already_local = match root_dist.partitioning_schema() {
        PartitioningSchema::Replicated => true,
        PartitioningSchema::LocalInstance => root_dist.instance() == Some(coord_logical),
        _ => query.instances_count() == 1,
    };
    let gathered = if already_local {
        result
    } else {
        debug!(target: LOG_TARGET, query_id = %query.id(), "Gathering result to coordinator");
        redistribute(
            result,
            &ArrayDistribution::local(coord_logical),
            ctx,
            query,
            RESULT_EXCHANGE_ID,
        )
        .await?
    };
    query.set_result(gathered.clone());
    Ok(Some(gathered))
}

fn exec_node<'a>(
    plan: &'a PhysicalPlan,
    id: NodeId,
    ctx: &'a Arc<EngineContext>,
    query: &'a Arc<Query>,
) -> Pin<Box<dyn Future<Output = Result<ArrayRef, QueryError>> + Send + 'a>> {
    Box::pin(async move {
        query.validate()?;
        // the global aggregate phase publishes its aggregate so the SG
        // between the phases merges colliding state chunks through it
        let is_agg = plan.op(id).is_agg();
        if is_agg {
            if let Some(function) = find_aggregate_call(plan, id) {
                let aggregate = ctx.aggregates.resolve(&function)?;
                query.set_operator_context(aggregate);
            }
        }
        let mut inputs = Vec::new();
        for child in plan.children(id) {
            inputs.push(exec_node(plan, child, ctx, query).await?);
        }
        debug!(
            target: LOG_TARGET,
            query_id = %query.id(),
            op = plan.op(id).physical_name(),
            node = id,
            "Executing operator"
        );
        let out = plan.op(id).execute(inputs, query, ctx, id).await;
        if is_agg {
            query.unset_operator_context();
        }
        out
    })
}

/// First aggregate-call parameter in the subtree under `id`.
fn find_aggregate_call(plan: &PhysicalPlan, id: NodeId) -> Option<String> {
    let mut stack = vec![id];
    while let Some(n) = stack.pop() {
        for p in plan.op(n).parameters() {
            if let PhysicalParameter::AggregateCall { function, .. } = p {
                return Some(function.clone());
            }
        }
        stack.extend(plan.children(n));
    }
    None
}
