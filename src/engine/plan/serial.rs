use serde::{Deserialize, Serialize};

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::errors::PlanError;
use crate::engine::plan::expression::PhysicalExpression;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::node::{PhysicalPlan, PlanNode};
use crate::engine::plan::operator_library::OperatorLibrary;
use crate::engine::plan::physical::PhysicalParameter;
use crate::engine::types::function_library::FunctionLibrary;
use std::sync::Arc;

/// One plan node on the wire. Parameters travel in logical form;
/// receivers recompile expressions against the children's schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedNode {
    pub logical_name: String,
    pub physical_name: String,
    pub params: Vec<LogicalParameter>,
    pub schema: ArrayDesc,
    pub children: Vec<usize>,
    pub tile_mode: bool,
    pub sg_movable: bool,
    pub sg_offsetable: bool,
}

/// A physical plan flattened for broadcast. Slot indexes are preserved so
/// every instance numbers the nodes (and their exchange rounds) alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedPlan {
    pub nodes: Vec<Option<SerializedNode>>,
    pub root: usize,
}

impl SerializedPlan {
    pub fn from_plan(plan: &PhysicalPlan) -> Result<Self, PlanError> {
        let root = plan
            .root()
            .ok_or_else(|| PlanError::Syntax("cannot serialize an empty plan".to_string()))?;
        let nodes = plan
            .slots()
            .iter()
            .map(|slot| {
                slot.as_ref().map(|node| SerializedNode {
                    logical_name: node.op.logical_name().to_string(),
                    physical_name: node.op.physical_name().to_string(),
                    params: node.op.parameters().iter().map(|p| p.to_logical()).collect(),
                    schema: node.op.schema().clone(),
                    children: node.children.clone(),
                    tile_mode: node.op.tile_mode(),
                    sg_movable: node.sg_movable,
                    sg_offsetable: node.sg_offsetable,
                })
            })
            .collect();
        Ok(Self { nodes, root })
    }

    pub fn into_plan(
        self,
        library: &OperatorLibrary,
        functions: &FunctionLibrary,
    ) -> Result<PhysicalPlan, PlanError> {
        let mut slots: Vec<Option<PlanNode>> = Vec::with_capacity(self.nodes.len());
        for slot in &self.nodes {
            let Some(node) = slot else {
                slots.push(None);
                continue;
            };
            let mut child_schemas: Vec<ArrayDesc> = node
                .children
                .iter()
                .map(|c| {
                    self.nodes[*c]
                        .as_ref()
                        .map(|n| n.schema.clone())
                        .ok_or_else(|| {
                            PlanError::Syntax("serialized plan child missing".to_string())
                        })
                })
                .collect::<Result<_, _>>()?;
            if child_schemas.is_empty() {
                child_schemas.push(node.schema.clone());
            }
            let params = compile_params(&node.params, &child_schemas, functions, node.tile_mode)?;
            let mut op = library.create_physical(
                &node.logical_name,
                &node.physical_name,
                params,
                node.schema.clone(),
            )?;
            op.set_tile_mode(node.tile_mode);
            slots.push(Some(PlanNode {
                op,
                parent: None,
                children: node.children.clone(),
                distribution: None,
                boundaries: None,
                sg_movable: node.sg_movable,
                sg_offsetable: node.sg_offsetable,
            }));
        }
        Ok(PhysicalPlan::from_slots(slots, self.root))
    }
}

fn compile_params(
    params: &[LogicalParameter],
    schemas: &[ArrayDesc],
    functions: &FunctionLibrary,
    tile: bool,
) -> Result<Vec<PhysicalParameter>, PlanError> {
    params
        .iter()
        .map(|p| {
            Ok(match p {
                LogicalParameter::Expression(expr) => {
                    let compiled = match PhysicalExpression::compile(expr, schemas, functions, tile)? {
                        Some(c) => c,
                        // the sender decided tile mode was possible; if our
                        // recompile disagrees, fall back to scalar mode
                        None => PhysicalExpression::compile(expr, schemas, functions, false)?
                            .expect("scalar compilation always succeeds"),
                    };
                    PhysicalParameter::Expression(Arc::new(compiled))
                }
                LogicalParameter::ArrayName(n) => PhysicalParameter::ArrayName(n.clone()),
                LogicalParameter::AttributeRef(n) => PhysicalParameter::AttributeRef(n.clone()),
                LogicalParameter::DimensionRef(n) => PhysicalParameter::DimensionRef(n.clone()),
                LogicalParameter::Schema(s) => PhysicalParameter::Schema(s.clone()),
                LogicalParameter::Constant { value, type_id } => PhysicalParameter::Constant {
                    value: value.clone(),
                    type_id: type_id.clone(),
                },
                LogicalParameter::AggregateCall {
                    function,
                    attribute,
                } => PhysicalParameter::AggregateCall {
                    function: function.clone(),
                    attribute: attribute.clone(),
                },
            })
        })
        .collect()
}
