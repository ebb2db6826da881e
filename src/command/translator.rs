use std::sync::Arc;

use crate::command::parser::parse_statement;
use crate::command::types::AstNode;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::expression::LogicalExpression;
use crate::engine::plan::logical::{LogicalNode, LogicalParameter, LogicalPlan};
use crate::engine::plan::operator_library::infer_schemas;
use crate::engine::query::query::Query;
use crate::engine::types::type_registry::{TID_INT32, TID_INT64, TID_STRING};
use crate::engine::types::value::Value;

/// Parses a query string into a schema-inferred logical plan.
pub fn parse_query(
    query_string: &str,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
) -> Result<LogicalPlan, QueryError> {
    let ast = parse_statement(query_string).map_err(PlanError::from)?;
    let mut root = translate_call(&ast, ctx)?;
    infer_schemas(
        &mut root,
        &ctx.operators,
        &ctx.catalog,
        &ctx.functions,
        &ctx.aggregates,
        query.instances_count(),
    )
    .map_err(PlanError::from)?;
    Ok(LogicalPlan::new(root))
}

/// Resolves one call node: nested calls to registered operators become
/// children, everything else becomes a typed parameter.
fn translate_call(ast: &AstNode, ctx: &Arc<EngineContext>) -> Result<LogicalNode, QueryError> {
    let AstNode::Call { name, args } = ast else {
        return Err(PlanError::Syntax("expected an operator call".to_string()).into());
    };
    if !ctx.operators.contains(name) {
        return Err(PlanError::OperatorNotFound(name.clone()).into());
    }

    let mut children = Vec::new();
    let mut params = Vec::new();
    for (position, arg) in args.iter().enumerate() {
        match arg {
            AstNode::Call {
                name: inner_name, ..
            } if position > 0 && ctx.aggregates.contains(inner_name) => {
                params.push(translate_aggregate_call(arg)?);
            }
            AstNode::Call {
                name: inner_name, ..
            } if ctx.operators.contains(inner_name) => {
                children.push(translate_call(arg, ctx)?);
            }
            other => {
                params.push(translate_param(name, position, other)?);
            }
        }
    }

    // legacy shortcut forms record their own name so the rewrite and
    // inference know which aggregate to call
    if crate::engine::plan::ops::aggregate::LEGACY_AGGREGATES.contains(&name.as_str()) {
        params.push(LogicalParameter::Constant {
            value: Value::from_string(name.clone()),
            type_id: TID_STRING.to_string(),
        });
    }

    Ok(LogicalNode::new(name.clone(), params).with_children(children))
}

fn translate_aggregate_call(ast: &AstNode) -> Result<LogicalParameter, QueryError> {
    let AstNode::Call { name, args } = ast else {
        return Err(PlanError::MalformedAggregate.into());
    };
    let attribute = match args.first() {
        None | Some(AstNode::Star) => None,
        Some(AstNode::Identifier(attr)) => Some(attr.clone()),
        Some(_) => return Err(PlanError::MalformedAggregate.into()),
    };
    Ok(LogicalParameter::AggregateCall {
        function: name.clone(),
        attribute,
    })
}

/// Non-call arguments get their meaning from the operator and position:
/// the leading identifier of scan/store/... is an array name, apply's
/// second argument is the new attribute, everything expression-shaped
/// compiles later.
fn translate_param(
    op: &str,
    position: usize,
    arg: &AstNode,
) -> Result<LogicalParameter, QueryError> {
    if let AstNode::Schema(schema) = arg {
        return Ok(LogicalParameter::Schema(schema.clone()));
    }
    if let AstNode::Text(text) = arg {
        return Ok(LogicalParameter::Constant {
            value: Value::from_string(text.clone()),
            type_id: TID_STRING.to_string(),
        });
    }
    if let AstNode::Identifier(name) = arg {
        let as_array_name = matches!(
            (op, position),
            ("scan", 0)
                | ("load", 0)
                | ("create_array", 0)
                | ("remove", 0)
                | ("store", _)
                | ("sg", _)
        );
        if as_array_name {
            return Ok(LogicalParameter::ArrayName(name.clone()));
        }
        let as_attribute = matches!(
            (op, position),
            ("apply", _)
                | ("sum", _)
                | ("avg", _)
                | ("min", _)
                | ("max", _)
                | ("count", _)
                | ("var", _)
                | ("stdev", _)
        );
        if as_attribute {
            return Ok(LogicalParameter::AttributeRef(name.clone()));
        }
        return Ok(LogicalParameter::Expression(LogicalExpression::AttributeRef(
            name.clone(),
        )));
    }
    if let AstNode::Integer(v) = arg {
        // bare integers parameterize sg/reduce_distro/materialize; the
        // input array occupies argument zero, so the partitioning schema
        // is the second argument
        if matches!(op, "sg" | "reduce_distro") && (1..=2).contains(&position) {
            let type_id = if position == 1 { TID_INT32 } else { TID_INT64 };
            let value = if position == 1 {
                Value::from_i32(*v as i32)
            } else {
                Value::from_i64(*v)
            };
            return Ok(LogicalParameter::Constant {
                value,
                type_id: type_id.to_string(),
            });
        }
        if op == "materialize" {
            return Ok(LogicalParameter::Constant {
                value: Value::from_i64(*v),
                type_id: TID_INT64.to_string(),
            });
        }
    }
    Ok(LogicalParameter::Expression(translate_expression(arg)?))
}

fn translate_expression(ast: &AstNode) -> Result<LogicalExpression, QueryError> {
    Ok(match ast {
        AstNode::Integer(v) => LogicalExpression::int64(*v),
        AstNode::Float(v) => LogicalExpression::double(*v),
        AstNode::Text(s) => LogicalExpression::Constant {
            value: Value::from_string(s.clone()),
            type_id: TID_STRING.to_string(),
        },
        AstNode::Identifier(name) => LogicalExpression::AttributeRef(name.clone()),
        AstNode::BinaryOp { op, left, right } => LogicalExpression::Call {
            function: op.clone(),
            args: vec![translate_expression(left)?, translate_expression(right)?],
        },
        AstNode::Call { name, args } => LogicalExpression::Call {
            function: name.clone(),
            args: args
                .iter()
                .map(translate_expression)
                .collect::<Result<_, _>>()?,
        },
        AstNode::Star | AstNode::Schema(_) => {
            return Err(PlanError::Syntax("unexpected argument".to_string()).into());
        }
    })
}
