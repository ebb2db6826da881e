use std::sync::Arc;
use tracing::debug;

use crate::engine::context::EngineContext;
use crate::engine::errors::{OptimizerError, PlanError, QueryError};
use crate::engine::plan::distribution::PartitioningSchema;
use crate::engine::plan::logical::{LogicalNode, LogicalParameter};
use crate::engine::plan::node::{NodeId, PhysicalPlan};
use crate::engine::plan::operator_library::infer_schemas;
use crate::engine::plan::ops::aggregate::LEGACY_AGGREGATES;
use crate::engine::plan::ops::sg::sg_params;
use crate::engine::plan::ops::store::storing_target;
use crate::engine::query::query::Query;
use crate::engine::types::type_registry::{TID_BOOL, TID_INT32, TID_INT64};
use crate::engine::types::value::Value;

const LOG_TARGET: &str = "engine::optimizer::rewrites";

/// Pre-physical rewrites: idiomatic combinations become their executable
/// forms before instantiation.
pub fn rewrite_logical(
    node: &mut LogicalNode,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<(), QueryError> {
    for child in &mut node.children {
        rewrite_logical(child, ctx, query)?;
    }

    if node.op_name == "load" {
        rewrite_load(node, query)?;
    } else if LEGACY_AGGREGATES.contains(&node.op_name.as_str()) {
        rewrite_legacy_aggregate(node)?;
    } else {
        return Ok(());
    }

    // the rewritten subtree needs fresh schemas
    infer_schemas(
        node,
        &ctx.operators,
        &ctx.catalog,
        &ctx.functions,
        &ctx.aggregates,
        query.instances_count(),
    )
    .map_err(PlanError::from)?;
    Ok(())
}

/// `load(name, file)` becomes `store(input(schema, file), name)` on a
/// single instance; on a cluster the input feeds a storing SG so loading
/// and placement happen in one pass.
fn rewrite_load(node: &mut LogicalNode, query: &Arc<Query>) -> Result<(), QueryError> {
    let name = node
        .params
        .first()
        .and_then(|p| p.as_array_name())
        .ok_or_else(|| PlanError::Syntax("load expects an array name".to_string()))?
        .to_string();
    let file = node
        .params
        .get(1)
        .cloned()
        .ok_or_else(|| PlanError::Syntax("load expects a file path".to_string()))?;
    let schema = node
        .schema
        .clone()
        .ok_or_else(|| PlanError::Syntax("load schema not inferred".to_string()))?;

    let input = LogicalNode::new(
        "input",
        vec![LogicalParameter::Schema(schema), file],
    );

    if query.instances_count() == 1 {
        debug!(target: LOG_TARGET, array = %name, "Rewriting load into store(input)");
        *node = LogicalNode::new("store", vec![LogicalParameter::ArrayName(name)])
            .with_children(vec![input]);
    } else {
        debug!(target: LOG_TARGET, array = %name, "Rewriting load into a storing SG");
        *node = LogicalNode::new(
            "sg",
            vec![
                LogicalParameter::Constant {
                    value: Value::from_i32(PartitioningSchema::RoundRobin as i32),
                    type_id: TID_INT32.to_string(),
                },
                LogicalParameter::Constant {
                    value: Value::from_i64(-1),
                    type_id: TID_INT64.to_string(),
                },
                LogicalParameter::ArrayName(name),
                LogicalParameter::Constant {
                    value: Value::from_bool(true),
                    type_id: TID_BOOL.to_string(),
                },
            ],
        )
        .with_children(vec![input]);
    }
    Ok(())
}

/// `sum(A, v)` and friends become `aggregate(A, call)`; a bare `count(A)`
/// targets the asterisk.
fn rewrite_legacy_aggregate(node: &mut LogicalNode) -> Result<(), QueryError> {
    let function = node.op_name.clone();
    // the shortcut's own name rides along as a string constant; the
    // attribute reference, when given, is the aggregation target
    let attribute = node.params.iter().find_map(|p| match p {
        LogicalParameter::AttributeRef(a) => Some(a.clone()),
        _ => None,
    });
    if attribute.is_none() && function != "count" {
        return Err(PlanError::MalformedAggregate.into());
    }
    debug!(target: LOG_TARGET, %function, "Rewriting legacy aggregate");
    node.op_name = "aggregate".to_string();
    node.params = vec![LogicalParameter::AggregateCall {
        function,
        attribute,
    }];
    Ok(())
}

/// Inserts a repart under any parent whose implementation wants a
/// different chunking of its input.
pub fn insert_reparts(
    plan: &mut PhysicalPlan,
    ctx: &Arc<EngineContext>,
) -> Result<(), QueryError> {
    let Some(root) = plan.root() else {
        return Ok(());
    };
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let children = plan.children(id);
        stack.extend(children.iter().copied());
        if children.len() != 1 {
            continue;
        }
        let child = children[0];
        let input_schema = plan.op(child).schema().clone();
        if !plan.op(id).requires_repart(&input_schema) {
            continue;
        }
        let Some(repart_schema) = plan.op(id).repart_schema(&input_schema) else {
            continue;
        };
        let op = ctx
            .operators
            .create_physical(
                "repart",
                "physical_repart",
                vec![crate::engine::plan::physical::PhysicalParameter::Schema(
                    repart_schema.clone(),
                )],
                repart_schema,
            )
            .map_err(PlanError::from)?;
        let repart = plan.add_node(op, Vec::new());
        plan.add_parent(child, repart);
        plan.infer_boundaries(repart);
        plan.infer_distribution(repart);
        plan.infer_boundaries(id);
        plan.infer_distribution(id);
    }
    Ok(())
}

/// An aggregate whose input is replicated would fold every state once per
/// instance; a reduce_distro in front makes each state count exactly once.
pub fn insert_agg_reducers(
    plan: &mut PhysicalPlan,
    id: NodeId,
    ctx: &Arc<EngineContext>,
) -> Result<(), QueryError> {
    if plan.op(id).is_agg() {
        // descend past the SG that moves partial states, down to the
        // first phase and the array it aggregates
        let mut partial = plan
            .children(id)
            .first()
            .copied()
            .ok_or(OptimizerError::NotImplemented("aggregate without input"))?;
        while plan.is_sg(partial) {
            partial = plan
                .children(partial)
                .first()
                .copied()
                .ok_or(OptimizerError::NotImplemented("aggregate without input"))?;
        }
        let input = plan
            .children(partial)
            .first()
            .copied()
            .ok_or(OptimizerError::NotImplemented("aggregate without input"))?;
        let dist = plan.distribution(input);
        if dist.partitioning_schema() == PartitioningSchema::Replicated {
            debug!(target: LOG_TARGET, "Inserting reduce_distro under aggregate");
            let input_schema = plan.op(input).schema().clone();
            let op = crate::engine::plan::ops::sg::new_reduce_distro_operator(
                vec![crate::engine::plan::physical::PhysicalParameter::Constant {
                    value: Value::from_i32(PartitioningSchema::RoundRobin as i32),
                    type_id: TID_INT32.to_string(),
                }],
                input_schema,
            );
            let reducer = plan.add_node(op, Vec::new());
            plan.add_parent(input, reducer);
            plan.infer_boundaries(reducer);
            plan.infer_distribution(reducer);
            plan.infer_distribution(partial);
        }
    }
    for child in plan.children(id) {
        insert_agg_reducers(plan, child, ctx)?;
    }
    Ok(())
}

/// A tile-mode boundary needs concrete buffers: put a materializer between
/// parent and child when their tile flags differ.
pub fn insert_chunk_materializers(
    plan: &mut PhysicalPlan,
    id: NodeId,
    ctx: &Arc<EngineContext>,
) -> Result<(), QueryError> {
    let children = plan.children(id);
    if plan.parent(id).is_some() && !children.is_empty() {
        let parent = plan.parent(id).unwrap();
        if plan.op(id).tile_mode() != plan.op(parent).tile_mode() {
            debug!(target: LOG_TARGET, node = id, "Inserting chunk materializer");
            let schema = plan.op(id).schema().clone();
            let op = crate::engine::plan::ops::sg::new_materialize_operator(
                vec![crate::engine::plan::physical::PhysicalParameter::Constant {
                    value: Value::from_i64(1),
                    type_id: TID_INT64.to_string(),
                }],
                schema,
            );
            let mat = plan.add_node(op, Vec::new());
            plan.add_parent(id, mat);
            plan.infer_boundaries(mat);
            plan.infer_distribution(mat);
        }
    }
    for child in children {
        insert_chunk_materializers(plan, child, ctx)?;
    }
    Ok(())
}

/// `store(sg(chunk-preserving child))` over round robin collapses into a
/// single storing SG: one pass over the data instead of two.
pub fn rewrite_storing_sg(plan: &mut PhysicalPlan, id: NodeId) -> Result<(), QueryError> {
    let mut next = vec![id];
    while let Some(id) = next.pop() {
        next.extend(plan.children(id));
        if plan.op(id).physical_name() != "physical_store" {
            continue;
        }
        let Some(&child) = plan.children(id).first() else {
            continue;
        };
        if !plan.is_sg(child) || plan.op(child).is_storing_sg() {
            continue;
        }
        let Some(&grandchild) = plan.children(child).first() else {
            continue;
        };
        let grand_dists = [plan.distribution(grandchild)];
        if !plan.op(grandchild).is_chunk_preserving(&grand_dists) {
            continue;
        }
        let child_dist = plan.distribution(child);
        if child_dist.partitioning_schema() != PartitioningSchema::RoundRobin
            || child_dist.is_violated()
        {
            return Err(OptimizerError::NotImplemented(
                "storing arrays in a non-round-robin distribution",
            )
            .into());
        }
        let store_schema = plan.op(id).schema().clone();
        let target = storing_target(plan.op(id))
            .ok_or(OptimizerError::NotImplemented("store without a target"))?;
        debug!(target: LOG_TARGET, array = %target, "Rewriting store(sg(..)) into a storing SG");
        let op = crate::engine::plan::ops::sg::new_sg_operator(
            sg_params(PartitioningSchema::RoundRobin, Some(&target)),
            store_schema,
        );
        let storing = plan.add_node(op, Vec::new());
        plan.cut_out(id);
        plan.cut_out(child);
        plan.add_parent(grandchild, storing);
        plan.infer_boundaries(storing);
        plan.infer_distribution(storing);
    }
    Ok(())
}
