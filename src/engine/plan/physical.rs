use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::ArrayRef;
use crate::engine::context::EngineContext;
use crate::engine::errors::QueryError;
use crate::engine::plan::boundaries::PhysicalBoundaries;
use crate::engine::plan::distribution::{ArrayDistribution, DistributionRequirement};
use crate::engine::plan::expression::PhysicalExpression;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::query::query::Query;
use crate::engine::types::type_registry::TYPES;
use crate::engine::types::value::Value;
use crate::shared::config::CONFIG;

/// Operator parameter with expressions compiled.
#[derive(Clone)]
pub enum PhysicalParameter {
    ArrayName(String),
    AttributeRef(String),
    DimensionRef(String),
    Schema(ArrayDesc),
    Constant { value: Value, type_id: String },
    Expression(Arc<PhysicalExpression>),
    AggregateCall {
        function: String,
        attribute: Option<String>,
    },
}

impl PhysicalParameter {
    pub fn as_int_constant(&self) -> Option<i64> {
        use crate::engine::types::type_registry::{TID_INT32, TID_INT64};
        match self {
            PhysicalParameter::Constant { value, type_id }
                if type_id == TID_INT32 || type_id == TID_INT64 =>
            {
                Some(value.get_i64())
            }
            _ => None,
        }
    }

    pub fn as_bool_constant(&self) -> Option<bool> {
        use crate::engine::types::type_registry::TID_BOOL;
        match self {
            PhysicalParameter::Constant { value, type_id } if type_id == TID_BOOL => {
                Some(value.get_bool())
            }
            _ => None,
        }
    }

    pub fn as_array_name(&self) -> Option<&str> {
        match self {
            PhysicalParameter::ArrayName(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&Arc<PhysicalExpression>> {
        match self {
            PhysicalParameter::Expression(e) => Some(e),
            _ => None,
        }
    }

    /// The logical form, for plan serialization.
    pub fn to_logical(&self) -> LogicalParameter {
        match self {
            PhysicalParameter::ArrayName(n) => LogicalParameter::ArrayName(n.clone()),
            PhysicalParameter::AttributeRef(n) => LogicalParameter::AttributeRef(n.clone()),
            PhysicalParameter::DimensionRef(n) => LogicalParameter::DimensionRef(n.clone()),
            PhysicalParameter::Schema(s) => LogicalParameter::Schema(s.clone()),
            PhysicalParameter::Constant { value, type_id } => LogicalParameter::Constant {
                value: value.clone(),
                type_id: type_id.clone(),
            },
            PhysicalParameter::Expression(e) => {
                LogicalParameter::Expression(e.source().clone())
            }
            PhysicalParameter::AggregateCall {
                function,
                attribute,
            } => LogicalParameter::AggregateCall {
                function: function.clone(),
                attribute: attribute.clone(),
            },
        }
    }
}

/// A physical operator: the planning metadata the optimizer reasons about
/// plus the local execution step.
#[async_trait]
pub trait PhysicalOperator: Send + Sync {
    fn logical_name(&self) -> &str;

    fn physical_name(&self) -> &str;

    fn schema(&self) -> &ArrayDesc;

    fn set_schema(&mut self, schema: ArrayDesc);

    fn parameters(&self) -> &[PhysicalParameter];

    fn set_parameters(&mut self, params: Vec<PhysicalParameter>);

    fn is_distribution_preserving(&self, _inputs: &[ArrayDistribution]) -> bool {
        true
    }

    /// Whether output chunk boundaries match the input's.
    fn is_chunk_preserving(&self, _inputs: &[ArrayDistribution]) -> bool {
        true
    }

    fn distribution_requirement(&self) -> DistributionRequirement {
        DistributionRequirement::Any
    }

    fn needs_specific_distribution(&self) -> bool {
        matches!(
            self.distribution_requirement(),
            DistributionRequirement::Specific(_)
        )
    }

    fn output_distribution(
        &self,
        inputs: &[ArrayDistribution],
        _schemas: &[ArrayDesc],
    ) -> ArrayDistribution {
        inputs
            .first()
            .cloned()
            .unwrap_or_else(ArrayDistribution::round_robin)
    }

    fn output_boundaries(
        &self,
        inputs: &[PhysicalBoundaries],
        _schemas: &[ArrayDesc],
    ) -> PhysicalBoundaries {
        inputs
            .first()
            .cloned()
            .unwrap_or_else(|| PhysicalBoundaries::from_descriptor(self.schema()))
    }

    /// Estimated bytes per cell flowing out of this node.
    fn data_width(&self) -> f64 {
        schema_data_width(self.schema())
    }

    fn requires_repart(&self, _input: &ArrayDesc) -> bool {
        false
    }

    fn repart_schema(&self, _input: &ArrayDesc) -> Option<ArrayDesc> {
        None
    }

    fn is_sg(&self) -> bool {
        false
    }

    fn is_storing_sg(&self) -> bool {
        false
    }

    /// True for the global (final) phase of an aggregate.
    fn is_agg(&self) -> bool {
        false
    }

    fn is_ddl(&self) -> bool {
        false
    }

    fn tile_mode(&self) -> bool {
        false
    }

    fn set_tile_mode(&mut self, _tile: bool) {}

    /// Executes the local slice of this operator. `node` is the operator's
    /// plan-node id, identical on every instance; scatter/gather rounds
    /// use it as their exchange id.
    async fn execute(
        &self,
        inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        node: usize,
    ) -> Result<ArrayRef, QueryError>;
}

/// Estimated bytes per cell of a schema; variable-size attributes use the
/// configured string size estimate.
pub fn schema_data_width(desc: &ArrayDesc) -> f64 {
    desc.data_attributes()
        .map(|a| match TYPES.get(a.type_id()) {
            Ok(ty) if ty.is_variable() => CONFIG.engine.string_size_estimation as f64,
            Ok(ty) if ty.is_bool() => 0.125,
            Ok(ty) => ty.byte_size() as f64,
            Err(_) => 8.0,
        })
        .sum()
}
