use serde::{Deserialize, Serialize};

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::plan::expression::LogicalExpression;
use crate::engine::types::value::Value;

/// Typed operator parameter as it appears in a logical plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalParameter {
    ArrayName(String),
    AttributeRef(String),
    DimensionRef(String),
    Schema(ArrayDesc),
    Constant { value: Value, type_id: String },
    Expression(LogicalExpression),
    AggregateCall {
        function: String,
        /// `None` targets the asterisk (any attribute, used by count).
        attribute: Option<String>,
    },
}

impl LogicalParameter {
    pub fn int64(v: i64) -> Self {
        LogicalParameter::Constant {
            value: Value::from_i64(v),
            type_id: crate::engine::types::type_registry::TID_INT64.to_string(),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        LogicalParameter::Constant {
            value: Value::from_string(s.into()),
            type_id: crate::engine::types::type_registry::TID_STRING.to_string(),
        }
    }

    pub fn as_array_name(&self) -> Option<&str> {
        match self {
            LogicalParameter::ArrayName(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string_constant(&self) -> Option<String> {
        match self {
            LogicalParameter::Constant { value, .. } => Some(value.get_string()),
            _ => None,
        }
    }

    pub fn as_int_constant(&self) -> Option<i64> {
        match self {
            LogicalParameter::Constant { value, .. } => Some(value.get_i64()),
            _ => None,
        }
    }
}

/// One node of the parsed query: operator name, parameters, children, and
/// the schema inferred for its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalNode {
    pub op_name: String,
    pub params: Vec<LogicalParameter>,
    pub children: Vec<LogicalNode>,
    pub schema: Option<ArrayDesc>,
    pub is_ddl: bool,
}

impl LogicalNode {
    pub fn new(op_name: impl Into<String>, params: Vec<LogicalParameter>) -> Self {
        Self {
            op_name: op_name.into(),
            params,
            children: Vec::new(),
            schema: None,
            is_ddl: false,
        }
    }

    pub fn with_children(mut self, children: Vec<LogicalNode>) -> Self {
        self.children = children;
        self
    }

    pub fn schema(&self) -> &ArrayDesc {
        self.schema.as_ref().expect("schema inferred")
    }

    /// Array names this subtree reads or writes, for lock acquisition.
    pub fn collect_array_accesses(&self, reads: &mut Vec<String>, writes: &mut Vec<String>) {
        match self.op_name.as_str() {
            "scan" => {
                if let Some(name) = self.params.first().and_then(|p| p.as_array_name()) {
                    reads.push(name.to_string());
                }
            }
            "store" | "load" => {
                if let Some(name) = self.params.iter().find_map(|p| p.as_array_name()) {
                    writes.push(name.to_string());
                }
            }
            "create_array" | "remove" => {
                if let Some(name) = self.params.first().and_then(|p| p.as_array_name()) {
                    writes.push(name.to_string());
                }
            }
            _ => {}
        }
        for child in &self.children {
            child.collect_array_accesses(reads, writes);
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub root: LogicalNode,
}

impl LogicalPlan {
    pub fn new(root: LogicalNode) -> Self {
        Self { root }
    }

    pub fn explain(&self) -> String {
        let mut out = String::new();
        explain_node(&self.root, 0, &mut out);
        out
    }
}

fn explain_node(node: &LogicalNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.op_name);
    if let Some(schema) = &node.schema {
        out.push_str(&format!(" -> {}", schema.name()));
    }
    out.push('\n');
    for child in &node.children {
        explain_node(child, depth + 1, out);
    }
}
