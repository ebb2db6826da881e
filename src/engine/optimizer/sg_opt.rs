use tracing::debug;

use crate::engine::errors::{OptimizerError, QueryError};
use crate::engine::plan::distribution::{
    ArrayDistribution, DistributionRequirement, PartitioningSchema,
};
use crate::engine::plan::node::{NodeId, PhysicalPlan};
use crate::engine::plan::ops::sg::{new_sg_operator, sg_params};
use crate::engine::plan::physical::PhysicalParameter;
use crate::engine::types::type_registry::{TID_INT32, TID_INT64};
use crate::engine::types::value::Value;

const LOG_TARGET: &str = "engine::optimizer::sg";

fn chunk_preserving(plan: &PhysicalPlan, id: NodeId) -> bool {
    plan.op(id).is_chunk_preserving(&[])
}

fn dist_preserving(plan: &PhysicalPlan, id: NodeId) -> bool {
    plan.op(id).is_distribution_preserving(&[])
}

fn specific_requirement(plan: &PhysicalPlan, id: NodeId) -> Option<ArrayDistribution> {
    plan.op(id).distribution_requirement().specific().cloned()
}

fn build_sg(
    plan: &mut PhysicalPlan,
    schema: crate::engine::array::descriptor::ArrayDesc,
    ps: PartitioningSchema,
) -> Result<NodeId, QueryError> {
    let op = new_sg_operator(sg_params(ps, None), schema);
    let id = plan.add_node(op, Vec::new());
    plan.node_mut(id).sg_movable = true;
    plan.node_mut(id).sg_offsetable = true;
    Ok(id)
}

/// Rewrites an SG's parameters to a new target distribution, carrying the
/// mapper's offset/shape vectors when the distribution is violated.
fn set_sg_distribution(
    plan: &mut PhysicalPlan,
    sg: NodeId,
    dist: &ArrayDistribution,
) -> Result<(), QueryError> {
    if dist.is_undefined() {
        return Err(OptimizerError::CantCreateSgWithUndefinedDistribution.into());
    }
    let old = plan.op(sg).parameters().to_vec();
    let mut params = vec![PhysicalParameter::Constant {
        value: Value::from_i32(dist.partitioning_schema() as i32),
        type_id: TID_INT32.to_string(),
    }];
    // keep instance, target array and store flag slots as they were
    params.extend(old.iter().skip(1).take(3).cloned());
    if params.len() < 2 {
        params.push(PhysicalParameter::Constant {
            value: Value::from_i64(-1),
            type_id: TID_INT64.to_string(),
        });
    }
    if let Some(mapper) = dist.mapper() {
        for v in mapper.offset.iter().chain(mapper.shape.iter()) {
            params.push(PhysicalParameter::Constant {
                value: Value::from_i64(*v),
                type_id: TID_INT64.to_string(),
            });
        }
    }
    // version-id constants survive any rewrite
    for p in old.iter().skip(4) {
        if matches!(p, PhysicalParameter::Constant { type_id, .. }
            if type_id == crate::engine::types::type_registry::TID_UINT64)
        {
            params.push(p.clone());
        }
    }
    plan.op_mut(sg).set_parameters(params);
    Ok(())
}

/// The thinnest node of the single-input chain under `root`: the place
/// where moving the data costs the least.
fn find_thin_point(plan: &PhysicalPlan, mut root: NodeId) -> NodeId {
    let mut width = plan.data_width(root);
    let mut candidate = root;
    while !plan.is_sg(root)
        && !plan.op(root).needs_specific_distribution()
        && dist_preserving(plan, root)
        && chunk_preserving(plan, root)
        && plan.children(root).len() == 1
    {
        root = plan.children(root)[0];
        if plan.data_width(root) < width {
            width = plan.data_width(root);
            candidate = root;
        }
    }
    candidate
}

/// Re-infers distributions from `from` up the single-child chain towards
/// `end` (exclusive), returning the last one computed.
fn propagate_distribution(
    plan: &mut PhysicalPlan,
    from: NodeId,
    end: Option<NodeId>,
) -> ArrayDistribution {
    let mut node = from;
    let mut dist = plan.infer_distribution(node);
    loop {
        let Some(parent) = plan.parent(node) else {
            break;
        };
        if Some(parent) == end || plan.children(parent).len() > 1 {
            break;
        }
        node = parent;
        dist = plan.infer_distribution(node);
    }
    dist
}

fn local_instance(dist: &ArrayDistribution) -> bool {
    dist.partitioning_schema() == PartitioningSchema::LocalInstance
}

/// Inserts scatter/gather nodes wherever a child cannot hand its parent a
/// usable distribution: chunk-shape changes, instance-local data, or a
/// specific requirement the child does not meet. Collocated binary and
/// n-ary parents get matching inputs, moved at the thinnest point.
pub fn insert_sg_nodes(plan: &mut PhysicalPlan, root: NodeId) -> Result<(), QueryError> {
    for child in plan.children(root) {
        insert_sg_nodes(plan, child)?;
    }

    if !plan.is_sg(root) {
        let children = plan.children(root);
        match children.len() {
            1 => {
                let child = children[0];
                let child_dist = plan.distribution(child);
                let mut sg_candidate = child;
                let mut sg_needed = false;
                let mut new_ps = PartitioningSchema::RoundRobin;
                let mut sg_movable = true;
                let mut sg_offsetable = true;

                if !chunk_preserving(plan, child) || local_instance(&child_dist) {
                    sg_needed = true;
                    sg_movable = false;
                }

                if let Some(required) = specific_requirement(plan, root) {
                    if required.is_violated() {
                        return Err(OptimizerError::NotImplemented(
                            "requiring violated distributions",
                        )
                        .into());
                    }
                    if required != child_dist {
                        sg_needed = true;
                        new_ps = required.partitioning_schema();
                        sg_offsetable = false;
                        sg_candidate = find_thin_point(plan, child);
                    }
                }

                if sg_needed {
                    let schema = plan.op(sg_candidate).schema().clone();
                    let sg = build_sg(plan, schema, new_ps)?;
                    plan.add_parent(sg_candidate, sg);
                    plan.infer_boundaries(sg);
                    plan.node_mut(sg).sg_movable = sg_movable;
                    plan.node_mut(sg).sg_offsetable = sg_offsetable;
                    propagate_distribution(plan, sg, Some(root));
                    debug!(target: LOG_TARGET, node = sg, ps = ?new_ps, "Inserted SG");
                }
            }
            2 => {
                let mut lhs = plan.distribution(children[0]);
                if !chunk_preserving(plan, children[0]) || local_instance(&lhs) {
                    let schema = plan.op(children[0]).schema().clone();
                    let sg = build_sg(plan, schema, PartitioningSchema::RoundRobin)?;
                    plan.add_parent(children[0], sg);
                    plan.infer_boundaries(sg);
                    plan.node_mut(sg).sg_movable = false;
                    lhs = propagate_distribution(plan, sg, Some(root));
                }
                let mut rhs = plan.distribution(children[1]);
                if !chunk_preserving(plan, children[1]) || local_instance(&rhs) {
                    let schema = plan.op(children[1]).schema().clone();
                    let sg = build_sg(plan, schema, PartitioningSchema::RoundRobin)?;
                    plan.add_parent(children[1], sg);
                    plan.infer_boundaries(sg);
                    plan.node_mut(sg).sg_movable = false;
                    rhs = propagate_distribution(plan, sg, Some(root));
                }

                match plan.op(root).distribution_requirement() {
                    DistributionRequirement::Collocated => {
                        let round_robin =
                            lhs.partitioning_schema() == PartitioningSchema::RoundRobin;
                        if lhs != rhs || !round_robin {
                            let can_move_left = !rhs.is_violated()
                                && rhs.partitioning_schema() == PartitioningSchema::RoundRobin;
                            let can_move_right = !lhs.is_violated()
                                && lhs.partitioning_schema() == PartitioningSchema::RoundRobin;

                            let left_candidate =
                                find_thin_point(plan, plan.children(root)[0]);
                            let right_candidate =
                                find_thin_point(plan, plan.children(root)[1]);
                            let left_width = plan.data_width(left_candidate);
                            let right_width = plan.data_width(right_candidate);

                            if left_width < right_width && can_move_left {
                                let schema = plan.op(left_candidate).schema().clone();
                                let sg =
                                    build_sg(plan, schema, rhs.partitioning_schema())?;
                                plan.add_parent(left_candidate, sg);
                                plan.infer_boundaries(sg);
                                propagate_distribution(plan, sg, Some(root));
                            } else if can_move_right {
                                let schema = plan.op(right_candidate).schema().clone();
                                let sg =
                                    build_sg(plan, schema, lhs.partitioning_schema())?;
                                plan.add_parent(right_candidate, sg);
                                plan.infer_boundaries(sg);
                                propagate_distribution(plan, sg, Some(root));
                            } else {
                                for candidate in [left_candidate, right_candidate] {
                                    let schema = plan.op(candidate).schema().clone();
                                    let sg = build_sg(
                                        plan,
                                        schema,
                                        PartitioningSchema::RoundRobin,
                                    )?;
                                    plan.add_parent(candidate, sg);
                                    plan.infer_boundaries(sg);
                                    propagate_distribution(plan, sg, Some(root));
                                }
                            }
                        }
                    }
                    DistributionRequirement::Specific(_) => {
                        return Err(OptimizerError::DistributionSpecificationError(
                            "binary operators cannot require a specific distribution",
                        )
                        .into());
                    }
                    DistributionRequirement::Any => {}
                }
            }
            n if n > 2 => {
                let need_collocation = match plan.op(root).distribution_requirement() {
                    DistributionRequirement::Any => false,
                    DistributionRequirement::Collocated => true,
                    DistributionRequirement::Specific(_) => {
                        return Err(OptimizerError::DistributionSpecificationError(
                            "n-ary operators cannot require a specific distribution",
                        )
                        .into());
                    }
                };
                for child in plan.children(root) {
                    let dist = plan.distribution(child);
                    let sg_needed = !chunk_preserving(plan, child)
                        || (need_collocation && dist != ArrayDistribution::round_robin());
                    if sg_needed {
                        // more than two collocated inputs is a hard
                        // placement problem; round robin for everyone
                        let candidate = find_thin_point(plan, child);
                        let schema = plan.op(candidate).schema().clone();
                        let sg = build_sg(plan, schema, PartitioningSchema::RoundRobin)?;
                        plan.node_mut(sg).sg_movable = false;
                        plan.node_mut(sg).sg_offsetable = false;
                        plan.add_parent(candidate, sg);
                        plan.infer_boundaries(sg);
                        propagate_distribution(plan, sg, Some(root));
                    }
                }
            }
            _ => {}
        }
    }

    plan.infer_distribution(root);
    Ok(())
}

fn chain_bottom(plan: &PhysicalPlan, mut node: NodeId) -> NodeId {
    while plan.children(node).len() == 1 {
        node = plan.children(node)[0];
    }
    node
}

fn first_offsetable_sg(plan: &PhysicalPlan, node: NodeId) -> Option<NodeId> {
    if plan.is_sg(node) && plan.node(node).sg_offsetable {
        return Some(node);
    }
    if plan.children(node).len() != 1
        || !dist_preserving(plan, node)
        || !chunk_preserving(plan, node)
        || plan.op(node).needs_specific_distribution()
    {
        return None;
    }
    first_offsetable_sg(plan, plan.children(node)[0])
}

fn top_sg_from_chain(plan: &PhysicalPlan, mut node: NodeId) -> Option<NodeId> {
    while plan.children(node).len() == 1 {
        if plan.is_sg(node) {
            return Some(node);
        }
        if !dist_preserving(plan, node) || !chunk_preserving(plan, node) {
            return None;
        }
        node = plan.children(node)[0];
    }
    None
}

/// Restores a chain's output distribution after collapsing touched it,
/// reusing an offsetable SG already in the chain when one exists.
fn rectify_chain_distro(
    plan: &mut PhysicalPlan,
    chain_root: NodeId,
    sg_candidate: NodeId,
    required: &ArrayDistribution,
) -> Result<(), QueryError> {
    let current = plan.distribution(chain_root);
    let chain_parent = plan.parent(chain_root);
    if *required != current {
        let sg = match first_offsetable_sg(plan, chain_root) {
            Some(sg) => sg,
            None => {
                let schema = plan.op(sg_candidate).schema().clone();
                let sg = build_sg(plan, schema, required.partitioning_schema())?;
                plan.add_parent(sg_candidate, sg);
                plan.infer_boundaries(sg);
                sg
            }
        };
        if required.is_violated() {
            set_sg_distribution(plan, sg, required)?;
        }
        propagate_distribution(plan, sg, chain_parent);
    }
    Ok(())
}

/// Walks every single-input chain and removes the SGs that a downstream
/// re-scatter makes redundant, or retargets an existing SG instead of
/// stacking a second one onto the chain.
pub fn collapse_sg_nodes(plan: &mut PhysicalPlan, root: NodeId) -> Result<(), QueryError> {
    let top_chain = Some(root) == plan.root();
    let bottom = chain_bottom(plan, root);
    let mut cur = bottom;
    let mut sg_candidate = bottom;
    let chain_output = plan.distribution(root);
    let mut running;

    loop {
        running = plan.infer_distribution(cur);

        if !plan.is_sg(cur)
            && (!dist_preserving(plan, cur)
                || !chunk_preserving(plan, cur)
                || plan.data_width(cur) < plan.data_width(sg_candidate))
        {
            sg_candidate = cur;
        }

        let parent = plan.parent(cur);
        let parent_wants = parent
            .filter(|p| plan.children(*p).len() == 1)
            .and_then(|p| specific_requirement(plan, p));
        if let Some(needed) = parent_wants {
            if running != needed {
                if plan.is_sg(cur)
                    && running.partitioning_schema() == needed.partitioning_schema()
                {
                    set_sg_distribution(plan, cur, &needed)?;
                    plan.node_mut(cur).sg_movable = false;
                    plan.node_mut(cur).sg_offsetable = false;
                    plan.infer_distribution(cur);
                } else {
                    let schema = plan.op(cur).schema().clone();
                    let new_sg = build_sg(plan, schema, needed.partitioning_schema())?;
                    plan.add_parent(sg_candidate, new_sg);
                    plan.infer_boundaries(new_sg);
                    let stop_at = plan.parent(cur);
                    propagate_distribution(plan, new_sg, stop_at);
                    plan.node_mut(new_sg).sg_movable = false;
                    plan.node_mut(new_sg).sg_offsetable = false;
                    if cur == sg_candidate {
                        cur = new_sg;
                    }
                }
            }
        } else if plan.is_sg(cur) && plan.node(cur).sg_movable {
            let new_cur = plan.children(cur)[0];
            debug!(target: LOG_TARGET, node = cur, "Collapsing movable SG");
            plan.cut_out(cur);
            if cur == sg_candidate {
                sg_candidate = new_cur;
            }
            cur = new_cur;
            plan.infer_distribution(cur);
        }

        let chain_top = cur;
        match plan.parent(cur) {
            Some(p) if plan.children(p).len() <= 1 => cur = p,
            _ => {
                cur = chain_top;
                break;
            }
        }
    }

    if !top_chain {
        if let Some(parent) = plan.parent(cur) {
            if plan.op(parent).distribution_requirement() != DistributionRequirement::Any {
                rectify_chain_distro(plan, cur, sg_candidate, &chain_output)?;
            }
        }
    }

    for child in plan.children(bottom) {
        collapse_sg_nodes(plan, child)?;
    }
    Ok(())
}

/// Turns root(..join(sg(A), sg(B))) into root(..sg(join(sg(A), B))) when
/// the width estimates say moving one side through the join is cheaper
/// than running both SGs.
pub fn pushup_join_sgs(plan: &mut PhysicalPlan, root: NodeId) -> Result<bool, QueryError> {
    // does the chain above the join absorb a new top SG for free?
    let mut chain_collapses =
        Some(root) == plan.root() || plan.distribution(root).has_mapper();
    let mut chain_thin_point = plan.data_width(root);
    let mut node = root;
    while plan.children(node).len() == 1 {
        let below = plan.children(node)[0];
        let thickness = plan.data_width(below);
        if thickness < chain_thin_point {
            chain_thin_point = thickness;
        }
        if plan.is_sg(node) {
            chain_collapses = true;
        } else if plan.op(node).needs_specific_distribution() {
            chain_collapses = false;
            chain_thin_point = thickness;
        }
        node = below;
    }

    let mut transformed = false;
    let children = plan.children(node);
    if children.len() == 2
        && plan.op(node).distribution_requirement() == DistributionRequirement::Collocated
        && plan.op(children[0]).schema().dimensions().len()
            == plan.op(children[1]).schema().dimensions().len()
    {
        let left_sg = top_sg_from_chain(plan, children[0]);
        let right_sg = top_sg_from_chain(plan, children[1]);

        match (left_sg, right_sg) {
            (Some(left), Some(right)) => {
                let left_width = plan.data_width(left);
                let right_width = plan.data_width(right);
                let current_cost = left_width + right_width;
                let mut move_left_cost = right_width;
                let mut move_right_cost = left_width;
                if !chain_collapses {
                    move_left_cost += chain_thin_point;
                    move_right_cost += chain_thin_point;
                }

                let can_move_left = plan.node(left).sg_movable
                    && plan.distribution(plan.children(left)[0]).has_mapper()
                    && plan.node(right).sg_offsetable;
                let can_move_right = plan.node(right).sg_movable
                    && plan.distribution(plan.children(right)[0]).has_mapper()
                    && plan.node(left).sg_offsetable;

                if can_move_left
                    && move_left_cost <= move_right_cost
                    && move_left_cost <= current_cost
                {
                    pushup_sg(plan, node, left, right)?;
                    transformed = true;
                } else if can_move_right && move_right_cost <= current_cost {
                    pushup_sg(plan, node, right, left)?;
                    transformed = true;
                }
            }
            (Some(sg), None) | (None, Some(sg)) => {
                let opposite_root = if left_sg.is_some() {
                    children[1]
                } else {
                    children[0]
                };
                let opposite = find_thin_point(plan, opposite_root);
                let can_move = plan.node(sg).sg_movable
                    && plan.distribution(plan.children(sg)[0]).has_mapper();
                let current_cost = plan.data_width(sg);
                let mut move_cost = plan.data_width(opposite);
                if !chain_collapses {
                    move_cost += chain_thin_point;
                }
                if can_move && move_cost < current_cost {
                    swap_sg(plan, node, sg, opposite)?;
                    transformed = true;
                }
            }
            (None, None) => {}
        }
    }

    let mut result = transformed;
    for child in plan.children(node) {
        result |= pushup_join_sgs(plan, child)?;
    }
    Ok(result)
}

/// Removes one join-input SG and compensates by offsetting the other
/// side, then emits a fresh movable SG above the join.
fn pushup_sg(
    plan: &mut PhysicalPlan,
    join: NodeId,
    sg_to_remove: NodeId,
    sg_to_offset: NodeId,
) -> Result<(), QueryError> {
    debug!(target: LOG_TARGET, join, sg_to_remove, sg_to_offset, "Pushing join SG up");
    let removed_child = plan.children(sg_to_remove)[0];
    plan.cut_out(sg_to_remove);

    let mut new_dist = plan.infer_distribution(removed_child);
    let mut n = plan.parent(removed_child);
    while let Some(p) = n {
        if p == join {
            break;
        }
        new_dist = plan.infer_distribution(p);
        n = plan.parent(p);
    }

    set_sg_distribution(plan, sg_to_offset, &new_dist)?;
    let mut offset_dist = plan.infer_distribution(sg_to_offset);
    let mut n = plan.parent(sg_to_offset);
    while let Some(p) = n {
        if p == join {
            break;
        }
        offset_dist = plan.infer_distribution(p);
        n = plan.parent(p);
    }
    debug_assert_eq!(new_dist, offset_dist);
    plan.infer_distribution(join);

    let schema = plan.op(join).schema().clone();
    let new_sg = build_sg(plan, schema, PartitioningSchema::RoundRobin)?;
    plan.add_parent(join, new_sg);
    plan.infer_distribution(new_sg);
    plan.infer_boundaries(new_sg);
    Ok(())
}

/// One side has an SG, the other is cheaper to move: swap the movement to
/// the thin side and emit a fresh movable SG above the join.
fn swap_sg(
    plan: &mut PhysicalPlan,
    join: NodeId,
    sg_to_remove: NodeId,
    opposite_thin_point: NodeId,
) -> Result<(), QueryError> {
    debug!(target: LOG_TARGET, join, sg_to_remove, opposite_thin_point, "Swapping join SG");
    let removed_child = plan.children(sg_to_remove)[0];
    plan.cut_out(sg_to_remove);

    let mut new_dist = plan.infer_distribution(removed_child);
    let mut n = plan.parent(removed_child);
    while let Some(p) = n {
        if p == join {
            break;
        }
        new_dist = plan.infer_distribution(p);
        n = plan.parent(p);
    }

    let schema = plan.op(opposite_thin_point).schema().clone();
    let opposite_sg = build_sg(plan, schema, PartitioningSchema::RoundRobin)?;
    plan.add_parent(opposite_thin_point, opposite_sg);
    set_sg_distribution(plan, opposite_sg, &new_dist)?;
    plan.infer_boundaries(opposite_sg);
    let mut opposite_dist = plan.infer_distribution(opposite_sg);
    let mut n = plan.parent(opposite_sg);
    while let Some(p) = n {
        if p == join {
            break;
        }
        opposite_dist = plan.infer_distribution(p);
        n = plan.parent(p);
    }
    debug_assert_eq!(new_dist, opposite_dist);
    plan.infer_distribution(join);

    let schema = plan.op(join).schema().clone();
    let new_sg = build_sg(plan, schema, PartitioningSchema::RoundRobin)?;
    plan.add_parent(join, new_sg);
    plan.infer_distribution(new_sg);
    plan.infer_boundaries(new_sg);
    Ok(())
}
