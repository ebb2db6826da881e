use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::attribute::AttributeDesc;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::ArrayRef;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::distribution::DistributionRequirement;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
};
use crate::engine::plan::ops::{ArrayWriter, for_each_cell};
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;
use crate::engine::types::value::Value;

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "join",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_join,
    });
    lib.register_physical("join", "physical_join", |params, schema| {
        Box::new(PhysicalJoin { params, schema })
    });
}

fn infer_join(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let [left, right] = inference.inputs else {
        return Err(PlanError::Syntax("join expects two inputs".to_string()));
    };
    if left.dimensions().len() != right.dimensions().len() {
        return Err(PlanError::Syntax(
            "join inputs must share dimensionality".to_string(),
        ));
    }
    let mut attrs: Vec<AttributeDesc> = Vec::new();
    for a in left.data_attributes() {
        attrs.push(AttributeDesc::new(attrs.len() as u32, a.name(), a.type_id())
            .nullable(a.is_nullable()));
    }
    for a in right.data_attributes() {
        let name = if left.attribute_by_name(a.name()).is_ok() {
            format!("{}_2", a.name())
        } else {
            a.name().to_string()
        };
        attrs.push(AttributeDesc::new(attrs.len() as u32, name, a.type_id())
            .nullable(a.is_nullable()));
    }
    Ok(ArrayDesc::new(
        format!("{}_{}", left.name(), right.name()),
        attrs,
        left.dimensions().to_vec(),
    )
    .with_empty_bitmap())
}

/// Cell-wise inner join of two collocated arrays: a cell exists in the
/// output where both inputs carry it.
struct PhysicalJoin {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalJoin {
    fn logical_name(&self) -> &str {
        "join"
    }

    fn physical_name(&self) -> &str {
        "physical_join"
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

    fn distribution_requirement(&self) -> DistributionRequirement {
        DistributionRequirement::Collocated
    }

    async fn execute(
        &self,
        inputs: Vec<ArrayRef>,
        _query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let mut inputs = inputs.into_iter();
        let (left, right) = match (inputs.next(), inputs.next()) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(PlanError::Syntax("join expects two inputs".to_string()).into()),
        };

        // index the right side's cells by coordinates
        let mut right_cells: ahash::AHashMap<Coordinates, Vec<Value>> = ahash::AHashMap::new();
        for_each_cell(right.as_ref(), |coords, values| {
            right_cells.insert(coords.clone(), values.to_vec());
            Ok(())
        })?;

        let left_width = left.descriptor().data_attributes().count();
        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let out_desc = writer.descriptor();
        for_each_cell(left.as_ref(), |coords, values| {
            if let Some(right_values) = right_cells.get(coords) {
                for attr in out_desc.data_attributes() {
                    let idx = attr.id() as usize;
                    let v = if idx < left_width {
                        values[idx].clone()
                    } else {
                        right_values[idx - left_width].clone()
                    };
                    writer.write(attr.id(), coords.clone(), v);
                }
            }
            Ok(())
        })?;
        Ok(writer.finish()?)
    }
}
