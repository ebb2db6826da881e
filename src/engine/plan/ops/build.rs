use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::coordinates::odometer_step;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::ArrayRef;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::boundaries::PhysicalBoundaries;
use crate::engine::plan::distribution::ArrayDistribution;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
};
use crate::engine::plan::ops::ArrayWriter;
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "build",
        properties: OperatorProperties {
            tile: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_build,
    });
    lib.register_physical("build", "physical_build", |params, schema| {
        Box::new(PhysicalBuild { params, schema })
    });
}

fn infer_build(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    match inference.params.first() {
        Some(LogicalParameter::Schema(schema)) => Ok(schema.clone()),
        _ => Err(PlanError::Syntax(
            "build expects a schema as its first parameter".to_string(),
        )),
    }
}

/// Fills an array from an expression over its dimensions. Each instance
/// builds the chunks round-robin placement assigns to it.
struct PhysicalBuild {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalBuild {
    fn logical_name(&self) -> &str {
        "build"
    }

    fn physical_name(&self) -> &str {
        "physical_build"
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

    fn output_distribution(
        &self,
        _inputs: &[ArrayDistribution],
        _schemas: &[ArrayDesc],
    ) -> ArrayDistribution {
        ArrayDistribution::round_robin()
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
        _inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let expr = self
            .params
            .get(1)
            .and_then(|p| p.as_expression())
            .ok_or_else(|| PlanError::Syntax("build expects an expression".to_string()))?;
        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let desc = writer.descriptor();
        let dist = ArrayDistribution::round_robin();
        let n = query.instances_count();
        let my_logical = query.logical_instance_id();

        for chunk_pos in desc.chunk_positions() {
            if dist.instance_for_chunk(&desc, &chunk_pos, n) != Some(my_logical) {
                continue;
            }
            let first = desc.chunk_first_position(&chunk_pos, false);
            let last = desc.chunk_last_position(&chunk_pos, false);
            let mut pos = first.clone();
            loop {
                let value = expr.evaluate(&[], &pos)?;
                for attr in desc.data_attributes() {
                    writer.write(attr.id(), pos.clone(), value.clone());
                }
                if !odometer_step(&mut pos, &first, &last) {
                    break;
                }
            }
        }
        Ok(writer.finish()?)
    }
}
