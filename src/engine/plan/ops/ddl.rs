use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::ArrayRef;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
};
use crate::engine::plan::ops::empty_array;
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "create_array",
        properties: OperatorProperties {
            ddl: true,
            exclusive: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_create,
    });
    lib.register_physical("create_array", "physical_create_array", |params, schema| {
        Box::new(PhysicalCreateArray { params, schema })
    });

    lib.register_logical(LogicalOperatorDef {
        name: "remove",
        properties: OperatorProperties {
            ddl: true,
            exclusive: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_remove,
    });
    lib.register_physical("remove", "physical_remove", |params, schema| {
        Box::new(PhysicalRemove { params, schema })
    });
}

fn infer_create(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let name = inference
        .params
        .first()
        .and_then(|p| p.as_array_name())
        .ok_or_else(|| PlanError::Syntax("create_array expects an array name".to_string()))?;
    if inference.catalog.contains_array(name) {
        return Err(PlanError::Catalog(
            crate::engine::errors::CatalogError::ArrayAlreadyExists(name.to_string()),
        ));
    }
    match inference.params.get(1) {
        Some(LogicalParameter::Schema(schema)) => Ok(schema.clone().with_name(name)),
        _ => Err(PlanError::Syntax(
            "create_array expects a schema".to_string(),
        )),
    }
}

fn infer_remove(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let name = inference
        .params
        .first()
        .and_then(|p| p.as_array_name())
        .ok_or_else(|| PlanError::Syntax("remove expects an array name".to_string()))?;
    Ok(inference.catalog.array_descriptor(name)?)
}

struct PhysicalCreateArray {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalCreateArray {
    fn logical_name(&self) -> &str {
        "create_array"
    }

    fn physical_name(&self) -> &str {
        "physical_create_array"
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

    fn is_ddl(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        // the catalog is the cluster's shared metadata store: only the
        // coordinator mutates it
        if query.is_coordinator() {
            let name = self
                .params
                .first()
                .and_then(|p| p.as_array_name())
                .ok_or_else(|| {
                    PlanError::Syntax("create_array expects an array name".to_string())
                })?;
            ctx.catalog
                .create_array(name, &self.schema)
                .map_err(PlanError::from)?;
        }
        Ok(empty_array(&self.schema, ctx.cache.clone()))
    }
}

struct PhysicalRemove {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalRemove {
    fn logical_name(&self) -> &str {
        "remove"
    }

    fn physical_name(&self) -> &str {
        "physical_remove"
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

    fn is_ddl(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let name = self
            .params
            .first()
            .and_then(|p| p.as_array_name())
            .ok_or_else(|| PlanError::Syntax("remove expects an array name".to_string()))?;
        // every instance drops its local versions; the coordinator drops
        // the catalog entry
        if let Ok(Some(version_id)) = ctx.catalog.latest_version_array_id(name) {
            ctx.storage.remove_version_from_memory(version_id);
        }
        if query.is_coordinator() {
            ctx.catalog.remove_array(name).map_err(PlanError::from)?;
        }
        Ok(empty_array(&self.schema, ctx.cache.clone()))
    }
}
