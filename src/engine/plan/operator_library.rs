use ahash::AHashMap;

use crate::engine::array::attribute::AttributeDesc;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::dimension::DimensionDesc;
use crate::engine::errors::PlanError;
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::ops;
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::storage::catalog::SystemCatalog;
use crate::engine::types::function_library::FunctionLibrary;
use crate::engine::types::aggregate::AggregateLibrary;

/// Context handed to schema inference.
pub struct SchemaInference<'a> {
    pub inputs: &'a [ArrayDesc],
    pub params: &'a [LogicalParameter],
    pub catalog: &'a SystemCatalog,
    pub functions: &'a FunctionLibrary,
    pub aggregates: &'a AggregateLibrary,
    pub num_instances: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorProperties {
    pub tile: bool,
    pub ddl: bool,
    pub exclusive: bool,
}

pub struct LogicalOperatorDef {
    pub name: &'static str,
    pub properties: OperatorProperties,
    /// `(logical, physical)` names of the global second phase, if any.
    pub global_companion: Option<(&'static str, &'static str)>,
    pub infer_schema: fn(&SchemaInference) -> Result<ArrayDesc, PlanError>,
}

pub type PhysicalFactory =
    fn(Vec<PhysicalParameter>, ArrayDesc) -> Box<dyn PhysicalOperator>;

/// Registry of logical operator definitions and their physical
/// implementations. Populated once at startup.
pub struct OperatorLibrary {
    logical: AHashMap<&'static str, LogicalOperatorDef>,
    physical: AHashMap<&'static str, Vec<(&'static str, PhysicalFactory)>>,
}

impl OperatorLibrary {
    pub fn builtin() -> Self {
        let mut lib = Self {
            logical: AHashMap::new(),
            physical: AHashMap::new(),
        };
        ops::register_builtin(&mut lib);
        lib
    }

    pub fn register_logical(&mut self, def: LogicalOperatorDef) {
        self.logical.insert(def.name, def);
    }

    pub fn register_physical(
        &mut self,
        logical_name: &'static str,
        physical_name: &'static str,
        factory: PhysicalFactory,
    ) {
        self.physical
            .entry(logical_name)
            .or_default()
            .push((physical_name, factory));
    }

    pub fn logical(&self, name: &str) -> Result<&LogicalOperatorDef, PlanError> {
        self.logical
            .get(name)
            .ok_or_else(|| PlanError::OperatorNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.logical.contains_key(name)
    }

    pub fn physical_names(&self, logical_name: &str) -> Result<Vec<&'static str>, PlanError> {
        self.physical
            .get(logical_name)
            .map(|v| v.iter().map(|(n, _)| *n).collect())
            .ok_or_else(|| PlanError::OperatorNotFound(logical_name.to_string()))
    }

    pub fn create_physical(
        &self,
        logical_name: &str,
        physical_name: &str,
        params: Vec<PhysicalParameter>,
        schema: ArrayDesc,
    ) -> Result<Box<dyn PhysicalOperator>, PlanError> {
        let variants = self
            .physical
            .get(logical_name)
            .ok_or_else(|| PlanError::OperatorNotFound(logical_name.to_string()))?;
        let (_, factory) = variants
            .iter()
            .find(|(n, _)| *n == physical_name)
            .ok_or_else(|| PlanError::OperatorNotFound(physical_name.to_string()))?;
        Ok(factory(params, schema))
    }
}

/// Single-cell schema holding one aggregate result per call, shared by the
/// aggregate operator and the legacy shortcut forms.
pub fn aggregate_result_schema(
    inference: &SchemaInference,
    function: &str,
    attribute: Option<&str>,
) -> Result<ArrayDesc, PlanError> {
    let input = inference
        .inputs
        .first()
        .ok_or(PlanError::MalformedAggregate)?;
    if let Some(attr_name) = attribute {
        input.attribute_by_name(attr_name)?;
    }
    let aggregate = inference.aggregates.resolve(function)?;
    let attr_name = match attribute {
        Some(a) => format!("{a}_{function}"),
        None => function.to_string(),
    };
    let attr = AttributeDesc::new(0, attr_name, aggregate.result_type()).nullable(true);
    Ok(ArrayDesc::new(
        format!("{}_{}", input.name(), function),
        vec![attr],
        vec![DimensionDesc::new("i", 0, 0, 1, 0)],
    ))
}

/// The partial phase carries opaque aggregate states in the same
/// single-cell space; reason-0 nulls mean "no state yet".
pub fn aggregate_state_schema(result_schema: &ArrayDesc) -> ArrayDesc {
    use crate::engine::types::type_registry::TID_AGGREGATE_STATE;
    use crate::engine::types::value::Value;
    let attr = AttributeDesc::new(0, "state", TID_AGGREGATE_STATE)
        .nullable(true)
        .with_default(Value::null(0));
    ArrayDesc::new(
        format!("{}_state", result_schema.name()),
        vec![attr],
        result_schema.dimensions().to_vec(),
    )
}

pub fn params_to_physical(
    params: &[LogicalParameter],
) -> Result<Vec<PhysicalParameter>, PlanError> {
    params
        .iter()
        .map(|p| {
            Ok(match p {
                LogicalParameter::ArrayName(n) => PhysicalParameter::ArrayName(n.clone()),
                LogicalParameter::AttributeRef(n) => PhysicalParameter::AttributeRef(n.clone()),
                LogicalParameter::DimensionRef(n) => PhysicalParameter::DimensionRef(n.clone()),
                LogicalParameter::Schema(s) => PhysicalParameter::Schema(s.clone()),
                LogicalParameter::Constant { value, type_id } => PhysicalParameter::Constant {
                    value: value.clone(),
                    type_id: type_id.clone(),
                },
                LogicalParameter::Expression(_) => {
                    return Err(PlanError::Syntax(
                        "expression parameters need compilation".to_string(),
                    ));
                }
                LogicalParameter::AggregateCall {
                    function,
                    attribute,
                } => PhysicalParameter::AggregateCall {
                    function: function.clone(),
                    attribute: attribute.clone(),
                },
            })
        })
        .collect()
}

/// Infers schemas over a logical tree, bottom-up.
pub fn infer_schemas(
    node: &mut crate::engine::plan::logical::LogicalNode,
    library: &OperatorLibrary,
    catalog: &SystemCatalog,
    functions: &FunctionLibrary,
    aggregates: &AggregateLibrary,
    num_instances: u64,
) -> Result<(), PlanError> {
    for child in &mut node.children {
        infer_schemas(child, library, catalog, functions, aggregates, num_instances)?;
    }
    let def = library.logical(&node.op_name)?;
    let input_schemas: Vec<ArrayDesc> = node
        .children
        .iter()
        .map(|c| c.schema().clone())
        .collect();
    let inference = SchemaInference {
        inputs: &input_schemas,
        params: &node.params,
        catalog,
        functions,
        aggregates,
        num_instances,
    };
    node.schema = Some((def.infer_schema)(&inference)?);
    node.is_ddl = def.properties.ddl;
    Ok(())
}
