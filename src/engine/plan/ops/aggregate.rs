use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::ArrayRef;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::boundaries::PhysicalBoundaries;
use crate::engine::plan::distribution::ArrayDistribution;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
    aggregate_result_schema, aggregate_state_schema,
};
use crate::engine::plan::ops::{ArrayWriter, for_each_cell};
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;
use crate::engine::types::value::Value;

/// The legacy shortcut forms the planner rewrites into aggregate() calls.
pub const LEGACY_AGGREGATES: [&str; 7] = ["sum", "avg", "min", "max", "count", "stdev", "var"];

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "aggregate",
        properties: OperatorProperties::default(),
        global_companion: Some(("agg_final", "physical_agg_final")),
        infer_schema: infer_aggregate,
    });
    lib.register_physical("aggregate", "physical_agg_partial", |params, schema| {
        // the planner hands the final result schema; a deserialized node
        // already carries its state schema
        let already_state = schema
            .attributes()
            .first()
            .map(|a| a.type_id() == crate::engine::types::type_registry::TID_AGGREGATE_STATE)
            .unwrap_or(false);
        let schema = if already_state {
            schema
        } else {
            aggregate_state_schema(&schema)
        };
        Box::new(PhysicalAggregatePartial { params, schema })
    });

    // the global phase is instantiated by the planner, never parsed
    lib.register_logical(LogicalOperatorDef {
        name: "agg_final",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: |inference| {
            inference
                .inputs
                .first()
                .cloned()
                .ok_or(PlanError::MalformedAggregate)
        },
    });
    lib.register_physical("agg_final", "physical_agg_final", |params, schema| {
        Box::new(PhysicalAggregateFinal { params, schema })
    });

    for name in LEGACY_AGGREGATES {
        lib.register_logical(LogicalOperatorDef {
            name,
            properties: OperatorProperties::default(),
            global_companion: None,
            infer_schema: infer_legacy,
        });
    }
}

fn aggregate_call(params: &[LogicalParameter]) -> Result<(String, Option<String>), PlanError> {
    match params.first() {
        Some(LogicalParameter::AggregateCall {
            function,
            attribute,
        }) => Ok((function.clone(), attribute.clone())),
        _ => Err(PlanError::MalformedAggregate),
    }
}

fn infer_aggregate(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let (function, attribute) = aggregate_call(inference.params)?;
    aggregate_result_schema(inference, &function, attribute.as_deref())
}

/// `sum(A, v)` and friends infer like the aggregate() they rewrite into;
/// a missing attribute targets the asterisk (count only).
fn infer_legacy(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let function = legacy_function_name(inference)?;
    let attribute = match inference.params.first() {
        Some(LogicalParameter::AttributeRef(a)) => Some(a.clone()),
        _ => None,
    };
    aggregate_result_schema(inference, &function, attribute.as_deref())
}

fn legacy_function_name(inference: &SchemaInference) -> Result<String, PlanError> {
    // the rewrite records the function name as a trailing string constant
    inference
        .params
        .iter()
        .rev()
        .find_map(|p| match p {
            LogicalParameter::Constant { value, type_id }
                if type_id == crate::engine::types::type_registry::TID_STRING =>
            {
                Some(value.get_string())
            }
            _ => None,
        })
        .ok_or(PlanError::MalformedAggregate)
}

fn call_from_physical(
    params: &[PhysicalParameter],
) -> Result<(String, Option<String>), PlanError> {
    params
        .iter()
        .find_map(|p| match p {
            PhysicalParameter::AggregateCall {
                function,
                attribute,
            } => Some((function.clone(), attribute.clone())),
            _ => None,
        })
        .ok_or(PlanError::MalformedAggregate)
}

/// First phase: folds every local cell into one aggregate state.
struct PhysicalAggregatePartial {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalAggregatePartial {
    fn logical_name(&self) -> &str {
        "aggregate"
    }

    fn physical_name(&self) -> &str {
        "physical_agg_partial"
    }

    fn schema(&self) -> &ArrayDesc {
        &self.schema
    }

    fn set_schema(&mut self, schema: ArrayDesc) {
        self.schema = schema;
    }

    fn parameters(&self) -> &[PhysicalParameter] {
        &self.params
    }

    fn set_parameters(&mut self, params: Vec<PhysicalParameter>) {
        self.params = params;
    }

    fn is_chunk_preserving(&self, _inputs: &[ArrayDistribution]) -> bool {
        false
    }

    fn is_distribution_preserving(&self, _inputs: &[ArrayDistribution]) -> bool {
        false
    }

    fn output_distribution(
        &self,
        _inputs: &[ArrayDistribution],
        _schemas: &[ArrayDesc],
    ) -> ArrayDistribution {
        // every instance holds its own partial state
        ArrayDistribution::local(0)
    }

    fn output_boundaries(
        &self,
        _inputs: &[PhysicalBoundaries],
        _schemas: &[ArrayDesc],
    ) -> PhysicalBoundaries {
        PhysicalBoundaries::from_descriptor(&self.schema)
    }

    async fn execute(
        &self,
        inputs: Vec<ArrayRef>,
        _query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let input = inputs
            .into_iter()
            .next()
            .ok_or(PlanError::MalformedAggregate)?;
        let (function, attribute) = call_from_physical(&self.params)?;
        let aggregate = ctx.aggregates.resolve(&function)?;
        let in_desc = input.descriptor();
        let attr_index = match &attribute {
            Some(name) => in_desc.attribute_by_name(name).map_err(PlanError::from)?.id() as usize,
            None => 0,
        };
        let counting_star = attribute.is_none();

        let mut state = aggregate.init_state();
        for_each_cell(input.as_ref(), |_coords, values| {
            if counting_star {
                aggregate.accumulate(&mut state, &Value::from_i64(1));
            } else {
                aggregate.accumulate(&mut state, &values[attr_index]);
            }
            Ok(())
        })?;

        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let origin: Vec<i64> = self.schema.dimensions().iter().map(|d| d.start()).collect();
        writer.write(0, origin, state);
        Ok(writer.finish()?)
    }
}

/// Second phase: finalizes the merged state into the client-visible value.
/// The SG between the phases routes every instance's partial state to one
/// owner and merges collisions through the aggregate.
struct PhysicalAggregateFinal {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalAggregateFinal {
    fn logical_name(&self) -> &str {
        "agg_final"
    }

    fn physical_name(&self) -> &str {
        "physical_agg_final"
    }

    fn schema(&self) -> &ArrayDesc {
        &self.schema
    }

    fn set_schema(&mut self, schema: ArrayDesc) {
        self.schema = schema;
    }

    fn parameters(&self) -> &[PhysicalParameter] {
        &self.params
    }

    fn set_parameters(&mut self, params: Vec<PhysicalParameter>) {
        self.params = params;
    }

    fn is_agg(&self) -> bool {
        true
    }

    fn is_chunk_preserving(&self, _inputs: &[ArrayDistribution]) -> bool {
        false
    }

    async fn execute(
        &self,
        inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let input = inputs
            .into_iter()
            .next()
            .ok_or(PlanError::MalformedAggregate)?;
        let function = query
            .operator_context()
            .map(|a| a.name().to_string())
            .ok_or(PlanError::MalformedAggregate)?;
        let aggregate = ctx.aggregates.resolve(&function)?;

        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        for_each_cell(input.as_ref(), |coords, values| {
            let state = &values[0];
            if state.missing_reason() != Some(0) {
                writer.write(0, coords.clone(), aggregate.finalize(state));
            }
            Ok(())
        })?;
        Ok(writer.finish()?)
    }
}
