use serde::{Deserialize, Serialize};

use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::errors::{PlanError, TypeError};
use crate::engine::types::function_library::{FunctionLibrary, ResolvedFunction};
use crate::engine::types::type_registry::{TID_DOUBLE, TID_INT64};
use crate::engine::types::value::Value;

/// Scalar expression as parsed: resolved against input schemas at physical
/// planning time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalExpression {
    Constant { value: Value, type_id: String },
    AttributeRef(String),
    DimensionRef(String),
    Call { function: String, args: Vec<LogicalExpression> },
}

impl LogicalExpression {
    pub fn int64(v: i64) -> Self {
        LogicalExpression::Constant {
            value: Value::from_i64(v),
            type_id: TID_INT64.to_string(),
        }
    }

    pub fn double(v: f64) -> Self {
        LogicalExpression::Constant {
            value: Value::from_f64(v),
            type_id: TID_DOUBLE.to_string(),
        }
    }
}

#[derive(Debug)]
enum CompiledNode {
    Constant(Value),
    Attribute { index: usize },
    Dimension { index: usize },
    Call {
        resolved: ResolvedFunction,
        args: Vec<CompiledNode>,
    },
}

/// A compiled expression: attribute and dimension references bound to
/// positions in the input schema, functions resolved through the library.
#[derive(Debug)]
pub struct PhysicalExpression {
    root: CompiledNode,
    result_type: String,
    tile_capable: bool,
    source: LogicalExpression,
}

impl PhysicalExpression {
    /// Compiles against the first input schema. With `tile` requested,
    /// compilation fails softly (returns `Ok(None)`) when the expression
    /// cannot run in tile mode; the planner retries without tiles.
    pub fn compile(
        expr: &LogicalExpression,
        schemas: &[ArrayDesc],
        functions: &FunctionLibrary,
        tile: bool,
    ) -> Result<Option<Self>, PlanError> {
        let (root, result_type) = compile_node(expr, schemas, functions)?;
        let tile_capable = tile_supported(expr);
        if tile && !tile_capable {
            return Ok(None);
        }
        Ok(Some(Self {
            root,
            result_type,
            tile_capable,
            source: expr.clone(),
        }))
    }

    pub fn result_type(&self) -> &str {
        &self.result_type
    }

    pub fn supports_tile_mode(&self) -> bool {
        self.tile_capable
    }

    pub fn source(&self) -> &LogicalExpression {
        &self.source
    }

    /// Evaluates over one cell: `attrs` are the input attribute values,
    /// `coords` the cell coordinates.
    pub fn evaluate(&self, attrs: &[Value], coords: &Coordinates) -> Result<Value, TypeError> {
        eval_node(&self.root, attrs, coords)
    }
}

fn compile_node(
    expr: &LogicalExpression,
    schemas: &[ArrayDesc],
    functions: &FunctionLibrary,
) -> Result<(CompiledNode, String), PlanError> {
    match expr {
        LogicalExpression::Constant { value, type_id } => {
            Ok((CompiledNode::Constant(value.clone()), type_id.clone()))
        }
        LogicalExpression::AttributeRef(name) => {
            let schema = schemas.first().ok_or_else(|| {
                PlanError::Syntax("attribute reference without input".to_string())
            })?;
            match schema.attribute_by_name(name) {
                Ok(attr) => Ok((
                    CompiledNode::Attribute {
                        index: attr.id() as usize,
                    },
                    attr.type_id().to_string(),
                )),
                // a name that is not an attribute may still be a dimension
                Err(e) => match schema.dimensions().iter().position(|d| d.name() == name) {
                    Some(index) => Ok((CompiledNode::Dimension { index }, TID_INT64.to_string())),
                    None => Err(e.into()),
                },
            }
        }
        LogicalExpression::DimensionRef(name) => {
            let schema = schemas.first().ok_or_else(|| {
                PlanError::Syntax("dimension reference without input".to_string())
            })?;
            let index = schema
                .dimensions()
                .iter()
                .position(|d| d.name() == name)
                .ok_or_else(|| PlanError::Syntax(format!("unknown dimension {name}")))?;
            Ok((CompiledNode::Dimension { index }, TID_INT64.to_string()))
        }
        LogicalExpression::Call { function, args } => {
            let mut compiled = Vec::with_capacity(args.len());
            let mut arg_types = Vec::with_capacity(args.len());
            for arg in args {
                let (node, ty) = compile_node(arg, schemas, functions)?;
                compiled.push(node);
                arg_types.push(ty);
            }
            let arg_refs: Vec<&str> = arg_types.iter().map(|s| s.as_str()).collect();
            let resolved = functions
                .resolve(function, &arg_refs)
                .map_err(|e| match e {
                    // conversion failures while compiling surface as a
                    // parameter type error to the user
                    TypeError::ConversionError { from, to } => PlanError::ParameterTypeError {
                        expected: to,
                        got: from,
                    },
                    other => PlanError::Type(other),
                })?;
            let result_type = resolved.description.result_type.clone();
            Ok((
                CompiledNode::Call {
                    resolved,
                    args: compiled,
                },
                result_type,
            ))
        }
    }
}

/// Tile evaluation handles flat expressions: constants, references, and a
/// single call over them. Nested calls fall back to cell-at-a-time.
fn tile_supported(expr: &LogicalExpression) -> bool {
    match expr {
        LogicalExpression::Constant { .. }
        | LogicalExpression::AttributeRef(_)
        | LogicalExpression::DimensionRef(_) => true,
        LogicalExpression::Call { args, .. } => args.iter().all(|a| {
            matches!(
                a,
                LogicalExpression::Constant { .. }
                    | LogicalExpression::AttributeRef(_)
                    | LogicalExpression::DimensionRef(_)
            )
        }),
    }
}

fn eval_node(
    node: &CompiledNode,
    attrs: &[Value],
    coords: &Coordinates,
) -> Result<Value, TypeError> {
    match node {
        CompiledNode::Constant(v) => Ok(v.clone()),
        CompiledNode::Attribute { index } => Ok(attrs
            .get(*index)
            .cloned()
            .unwrap_or_else(|| Value::null(1))),
        CompiledNode::Dimension { index } => Ok(Value::from_i64(coords[*index])),
        CompiledNode::Call { resolved, args } => {
            let mut vals = Vec::with_capacity(args.len());
            for arg in args {
                vals.push(eval_node(arg, attrs, coords)?);
            }
            resolved.call(&vals)
        }
    }
}
