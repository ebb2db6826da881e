use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::plan::expression::LogicalExpression;
use crate::engine::plan::logical::{LogicalNode, LogicalParameter, LogicalPlan};

/// Builds logical nodes for planner tests.
pub struct PlanFactory;

impl PlanFactory {
    /// A `build(<schema>, constant)` leaf over the given schema, with the
    /// schema pre-inferred.
    pub fn build_leaf(schema: &ArrayDesc) -> LogicalNode {
        let mut node = LogicalNode::new(
            "build",
            vec![
                LogicalParameter::Schema(schema.clone()),
                LogicalParameter::Expression(LogicalExpression::int64(1)),
            ],
        );
        node.schema = Some(schema.clone());
        node
    }

    pub fn wrap(root: LogicalNode) -> LogicalPlan {
        LogicalPlan::new(root)
    }
}
