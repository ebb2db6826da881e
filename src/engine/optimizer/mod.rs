pub mod rewrites;
pub mod sg_opt;

use std::sync::Arc;
use tracing::debug;

use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::expression::PhysicalExpression;
use crate::engine::plan::logical::{LogicalNode, LogicalParameter, LogicalPlan};
use crate::engine::plan::node::{NodeId, PhysicalPlan};
use crate::engine::plan::operator_library::params_to_physical;
use crate::engine::plan::physical::PhysicalParameter;
use crate::engine::query::query::Query;
use crate::shared::config::CONFIG;

#[cfg(test)]
mod sg_opt_test;

const LOG_TARGET: &str = "engine::optimizer";

const CONDENSE_SG: u32 = 1;
const INSERT_REPART: u32 = 1 << 1;
const REWRITE_STORING_SG: u32 = 1 << 2;
const INSERT_MATERIALIZATION: u32 = 1 << 3;

/// Transforms a logical tree into a physical tree, inserting data-movement
/// and repartition nodes so that every operator's distribution requirement
/// holds, while moving as few bytes as the width-only cost model allows.
pub struct Optimizer {
    feature_mask: u32,
}

impl Optimizer {
    pub fn new() -> Self {
        let mut feature_mask = CONDENSE_SG | INSERT_REPART | REWRITE_STORING_SG;
        if CONFIG.engine.rle_chunk_format {
            feature_mask |= INSERT_MATERIALIZATION;
        }
        Self { feature_mask }
    }

    /// Features off: the naive insert-only plan, kept for regression
    /// comparisons.
    pub fn naive() -> Self {
        Self { feature_mask: 0 }
    }

    fn enabled(&self, feature: u32) -> bool {
        self.feature_mask & feature != 0
    }

    pub fn optimize(
        &self,
        ctx: &Arc<EngineContext>,
        query: &Arc<Query>,
        logical: &LogicalPlan,
    ) -> Result<PhysicalPlan, QueryError> {
        let mut root = logical.root.clone();
        rewrites::rewrite_logical(&mut root, ctx, query)?;

        let mut plan = PhysicalPlan::new();
        let tile_mode = CONFIG.engine.rle_chunk_format && CONFIG.engine.tile_size > 1;
        let root_id = self.create_physical_tree(&root, tile_mode, &mut plan, ctx)?;
        plan.set_root(root_id);

        if self.enabled(INSERT_REPART) {
            rewrites::insert_reparts(&mut plan, ctx)?;
        }

        // transformations can move the root, so re-read it per step
        let root = plan.root().expect("plan has a root");
        sg_opt::insert_sg_nodes(&mut plan, root)?;

        if self.enabled(CONDENSE_SG) {
            let root = plan.root().expect("plan has a root");
            sg_opt::collapse_sg_nodes(&mut plan, root)?;
            loop {
                let root = plan.root().expect("plan has a root");
                if !sg_opt::pushup_join_sgs(&mut plan, root)? {
                    break;
                }
                let root = plan.root().expect("plan has a root");
                sg_opt::collapse_sg_nodes(&mut plan, root)?;
            }
        }

        let root = plan.root().expect("plan has a root");
        rewrites::insert_agg_reducers(&mut plan, root, ctx)?;

        if self.enabled(INSERT_MATERIALIZATION) {
            let root = plan.root().expect("plan has a root");
            rewrites::insert_chunk_materializers(&mut plan, root, ctx)?;
        }

        if self.enabled(REWRITE_STORING_SG) && query.instances_count() > 1 {
            let root = plan.root().expect("plan has a root");
            rewrites::rewrite_storing_sg(&mut plan, root)?;
        }

        debug!(target: LOG_TARGET, query_id = %query.id(), plan = %plan.explain(), "Optimized plan");
        Ok(plan)
    }

    /// Builds the physical node for one logical subtree, descending first.
    /// Tile mode holds only while every child and every compiled
    /// expression supports it; a failed tile compilation retries without.
    fn create_physical_tree(
        &self,
        node: &LogicalNode,
        tile_mode: bool,
        plan: &mut PhysicalPlan,
        ctx: &Arc<EngineContext>,
    ) -> Result<NodeId, QueryError> {
        let mut child_ids = Vec::with_capacity(node.children.len());
        let mut node_tile = tile_mode;
        for child in &node.children {
            let child_id = self.create_physical_tree(child, tile_mode, plan, ctx)?;
            node_tile &= plan.op(child_id).tile_mode();
            child_ids.push(child_id);
        }

        let def = ctx.operators.logical(&node.op_name).map_err(PlanError::from)?;
        node_tile &= def.properties.tile;
        let schema = node.schema().clone();
        // leaf operators (build) compile expressions against their own
        // schema; everything else resolves against its inputs
        let mut input_schemas: Vec<_> =
            node.children.iter().map(|c| c.schema().clone()).collect();
        if input_schemas.is_empty() {
            input_schemas.push(schema.clone());
        }

        let mut tile = node_tile;
        let params = loop {
            match self.compile_parameters(&node.params, &input_schemas, ctx, tile)? {
                Some(params) => break params,
                None => {
                    debug_assert!(tile);
                    tile = false;
                }
            }
        };

        let physical_names = ctx
            .operators
            .physical_names(&node.op_name)
            .map_err(PlanError::from)?;
        let physical_name = physical_names
            .first()
            .ok_or_else(|| PlanError::OperatorNotFound(node.op_name.clone()))
            .map_err(PlanError::from)?;
        let mut op = ctx
            .operators
            .create_physical(&node.op_name, physical_name, params, schema.clone())
            .map_err(PlanError::from)?;
        op.set_tile_mode(tile);

        let mut id = plan.add_node(op, child_ids);
        if plan.is_sg(id) {
            // a user-written SG; the optimizer leaves it in place
            plan.node_mut(id).sg_movable = false;
            plan.node_mut(id).sg_offsetable = false;
        }

        if let Some((global_logical, global_physical)) = def.global_companion {
            plan.infer_boundaries(id);
            let global_op = ctx
                .operators
                .create_physical(global_logical, global_physical, Vec::new(), schema)
                .map_err(PlanError::from)?;
            id = plan.add_node(global_op, vec![id]);
        }

        plan.infer_boundaries(id);
        Ok(id)
    }

    fn compile_parameters(
        &self,
        params: &[LogicalParameter],
        input_schemas: &[crate::engine::array::descriptor::ArrayDesc],
        ctx: &Arc<EngineContext>,
        tile: bool,
    ) -> Result<Option<Vec<PhysicalParameter>>, QueryError> {
        let mut out = Vec::with_capacity(params.len());
        for param in params {
            match param {
                LogicalParameter::Expression(expr) => {
                    match PhysicalExpression::compile(expr, input_schemas, &ctx.functions, tile)
                        .map_err(PlanError::from)?
                    {
                        Some(compiled) => {
                            out.push(PhysicalParameter::Expression(Arc::new(compiled)));
                        }
                        None => return Ok(None),
                    }
                }
                other => {
                    out.extend(params_to_physical(std::slice::from_ref(other)).map_err(PlanError::from)?);
                }
            }
        }
        Ok(Some(out))
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
