use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::attribute::AttributeDesc;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::ArrayRef;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::expression::PhysicalExpression;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
};
use crate::engine::plan::ops::{ArrayWriter, for_each_cell};
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "filter",
        properties: OperatorProperties {
            tile: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_filter,
    });
    lib.register_physical("filter", "physical_filter", |params, schema| {
        Box::new(PhysicalFilter { params, schema, tile: false })
    });

    lib.register_logical(LogicalOperatorDef {
        name: "apply",
        properties: OperatorProperties {
            tile: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_apply,
    });
    lib.register_physical("apply", "physical_apply", |params, schema| {
        Box::new(PhysicalApply { params, schema, tile: false })
    });
}

fn infer_filter(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let input = inference
        .inputs
        .first()
        .ok_or_else(|| PlanError::Syntax("filter expects an input".to_string()))?;
    // filtering leaves holes: the output always carries an empty bitmap
    Ok(input.clone().with_id(0).with_empty_bitmap())
}

fn infer_apply(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let input = inference
        .inputs
        .first()
        .ok_or_else(|| PlanError::Syntax("apply expects an input".to_string()))?;
    let new_name = match inference.params.first() {
        Some(LogicalParameter::AttributeRef(n)) => n.clone(),
        _ => {
            return Err(PlanError::Syntax(
                "apply expects a new attribute name".to_string(),
            ));
        }
    };
    let expr = match inference.params.get(1) {
        Some(LogicalParameter::Expression(e)) => e,
        _ => return Err(PlanError::Syntax("apply expects an expression".to_string())),
    };
    let compiled = PhysicalExpression::compile(
        expr,
        std::slice::from_ref(input),
        inference.functions,
        false,
    )?
    .expect("non-tile compilation always yields an expression");

    let mut attrs: Vec<AttributeDesc> = input.data_attributes().cloned().collect();
    attrs.push(AttributeDesc::new(
        attrs.len() as u32,
        new_name,
        compiled.result_type(),
    ));
    let mut desc = ArrayDesc::new(input.name(), attrs, input.dimensions().to_vec());
    if input.empty_bitmap_attribute().is_some() {
        desc = desc.with_empty_bitmap();
    }
    Ok(desc)
}

/// Keeps the cells whose predicate holds; chunk boundaries are untouched.
struct PhysicalFilter {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
    tile: bool,
}

#[async_trait]
impl PhysicalOperator for PhysicalFilter {
    fn logical_name(&self) -> &str {
        "filter"
    }

    fn physical_name(&self) -> &str {
        "physical_filter"
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

    fn tile_mode(&self) -> bool {
        self.tile
    }

    fn set_tile_mode(&mut self, tile: bool) {
        self.tile = tile;
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
            .ok_or_else(|| PlanError::Syntax("filter expects an input".to_string()))?;
        let predicate = self
            .params
            .first()
            .and_then(|p| p.as_expression())
            .ok_or_else(|| PlanError::Syntax("filter expects a predicate".to_string()))?
            .clone();
        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let out_desc = writer.descriptor();
        for_each_cell(input.as_ref(), |coords, values| {
            let keep = predicate.evaluate(values, coords)?.get_bool();
            if keep {
                for attr in out_desc.data_attributes() {
                    writer.write(attr.id(), coords.clone(), values[attr.id() as usize].clone());
                }
            }
            Ok(())
        })?;
        Ok(writer.finish()?)
    }
}

/// Adds a computed attribute to every cell.
struct PhysicalApply {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
    tile: bool,
}

#[async_trait]
impl PhysicalOperator for PhysicalApply {
    fn logical_name(&self) -> &str {
        "apply"
    }

    fn physical_name(&self) -> &str {
        "physical_apply"
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

    fn tile_mode(&self) -> bool {
        self.tile
    }

    fn set_tile_mode(&mut self, tile: bool) {
        self.tile = tile;
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
            .ok_or_else(|| PlanError::Syntax("apply expects an input".to_string()))?;
        let expr = self
            .params
            .iter()
            .find_map(|p| p.as_expression())
            .ok_or_else(|| PlanError::Syntax("apply expects an expression".to_string()))?
            .clone();
        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let out_desc = writer.descriptor();
        let new_attr_id = out_desc
            .data_attributes()
            .last()
            .expect("apply output has attributes")
            .id();
        for_each_cell(input.as_ref(), |coords, values| {
            for attr in out_desc.data_attributes() {
                if attr.id() == new_attr_id {
                    let computed = expr.evaluate(values, coords)?;
                    writer.write(attr.id(), coords.clone(), computed);
                } else {
                    writer.write(attr.id(), coords.clone(), values[attr.id() as usize].clone());
                }
            }
            Ok(())
        })?;
        Ok(writer.finish()?)
    }
}
