use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::engine::array::delegate::DelegateArray;
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
use crate::engine::plan::ops::{ArrayWriter, empty_array};
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;
use crate::engine::types::value::Value;

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "scan",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_scan,
    });
    lib.register_physical("scan", "physical_scan", |params, schema| {
        Box::new(PhysicalScan { params, schema })
    });

    lib.register_logical(LogicalOperatorDef {
        name: "input",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_input,
    });
    lib.register_physical("input", "physical_input", |params, schema| {
        Box::new(PhysicalInput { params, schema })
    });

    // `load` only exists logically; the planner rewrites it into
    // store(input(...)) or a storing SG before physical instantiation
    lib.register_logical(LogicalOperatorDef {
        name: "load",
        properties: OperatorProperties {
            exclusive: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_load,
    });
}

fn infer_scan(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let name = inference
        .params
        .first()
        .and_then(|p| p.as_array_name())
        .ok_or_else(|| PlanError::Syntax("scan expects an array name".to_string()))?;
    Ok(inference.catalog.array_descriptor(name)?)
}

fn infer_input(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    match inference.params.first() {
        Some(LogicalParameter::Schema(schema)) => Ok(schema.clone()),
        _ => Err(PlanError::Syntax(
            "input expects a schema as its first parameter".to_string(),
        )),
    }
}

fn infer_load(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let name = inference
        .params
        .first()
        .and_then(|p| p.as_array_name())
        .ok_or_else(|| PlanError::Syntax("load expects an array name".to_string()))?;
    Ok(inference.catalog.array_descriptor(name)?)
}

/// Reads the newest committed version of a stored array.
struct PhysicalScan {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalScan {
    fn logical_name(&self) -> &str {
        "scan"
    }

    fn physical_name(&self) -> &str {
        "physical_scan"
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
        self.schema
            .distribution()
            .cloned()
            .unwrap_or_else(ArrayDistribution::round_robin)
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
        _query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let name = self
            .params
            .first()
            .and_then(|p| p.as_array_name())
            .ok_or_else(|| PlanError::Syntax("scan expects an array name".to_string()))?;
        match ctx.catalog.latest_version_array_id(name).map_err(PlanError::from)? {
            None => Ok(empty_array(&self.schema, ctx.cache.clone())),
            Some(version_id) => {
                let stored = ctx.storage.get_array(version_id).map_err(PlanError::from)?;
                // present the version's chunks under the catalog identity
                Ok(rename_view(stored, Arc::new(self.schema.clone())))
            }
        }
    }
}

#[derive(Deserialize)]
struct InputRow {
    coords: Vec<i64>,
    values: Vec<serde_json::Value>,
}

/// Loads rows from a file on the coordinator. Rows are JSON lines of
/// `{"coords": [...], "values": [...]}`.
struct PhysicalInput {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalInput {
    fn logical_name(&self) -> &str {
        "input"
    }

    fn physical_name(&self) -> &str {
        "physical_input"
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

    fn output_distribution(
        &self,
        _inputs: &[ArrayDistribution],
        _schemas: &[ArrayDesc],
    ) -> ArrayDistribution {
        // the file lives on the coordinator; data starts out local
        ArrayDistribution::local(0)
    }

    async fn execute(
        &self,
        _inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        _node: usize,
    ) -> Result<ArrayRef, QueryError> {
        if !query.is_coordinator() {
            return Ok(empty_array(&self.schema, ctx.cache.clone()));
        }
        let path = self
            .params
            .get(1)
            .and_then(|p| match p {
                PhysicalParameter::Constant { value, .. } => Some(value.get_string()),
                _ => None,
            })
            .ok_or_else(|| PlanError::Syntax("input expects a file path".to_string()))?;
        let text = std::fs::read_to_string(&path).map_err(|e| {
            QueryError::Execution(crate::engine::errors::ExecutionError::OperationFailed(
                format!("cannot read {path}: {e}"),
            ))
        })?;
        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let desc = writer.descriptor();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let row: InputRow = serde_json::from_str(line).map_err(|e| {
                QueryError::Execution(crate::engine::errors::ExecutionError::OperationFailed(
                    format!("malformed input row: {e}"),
                ))
            })?;
            for (attr, json) in desc.data_attributes().zip(row.values.iter()) {
                let value = json_to_value(json);
                writer.write(attr.id(), row.coords.clone(), value);
            }
        }
        Ok(writer.finish()?)
    }
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::null(1),
        serde_json::Value::Bool(b) => Value::from_bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from_i64(i)
            } else {
                Value::from_f64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::from_string(s),
        other => Value::from_string(other.to_string()),
    }
}

/// Presents an array under a new name/id without moving data; used by the
/// executor when returning catalog arrays to clients.
pub fn rename_view(input: ArrayRef, desc: Arc<ArrayDesc>) -> ArrayRef {
    Arc::new(DelegateArray::new(desc, input))
}
