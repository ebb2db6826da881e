use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::{Array, ArrayRef};
use crate::engine::array::mem_array::MemArray;
use crate::engine::chunk::mem_chunk::ChunkEncoding;
use crate::engine::cluster::exchange::redistribute;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::distribution::{
    ArrayDistribution, DistributionMapper, PartitioningSchema,
};
use crate::engine::plan::logical::LogicalParameter;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
};
use crate::engine::plan::ops::store::{StoringIds, store_locally};
use crate::engine::plan::ops::{ArrayWriter, for_each_cell};
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::Query;
use crate::engine::types::type_registry::{TID_INT32, TID_INT64};
use crate::engine::types::value::Value;

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "sg",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_passthrough,
    });
    lib.register_physical("sg", "impl_sg", |params, schema| {
        Box::new(PhysicalSg { params, schema })
    });

    lib.register_logical(LogicalOperatorDef {
        name: "reduce_distro",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_passthrough,
    });
    lib.register_physical(
        "reduce_distro",
        "physical_reduce_distro",
        |params, schema| Box::new(PhysicalReduceDistro { params, schema }),
    );

    lib.register_logical(LogicalOperatorDef {
        name: "materialize",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_passthrough,
    });
    lib.register_physical("materialize", "impl_materialize", |params, schema| {
        Box::new(PhysicalMaterialize { params, schema })
    });

    lib.register_logical(LogicalOperatorDef {
        name: "repart",
        properties: OperatorProperties::default(),
        global_companion: None,
        infer_schema: infer_repart,
    });
    lib.register_physical("repart", "physical_repart", |params, schema| {
        Box::new(PhysicalRepart { params, schema })
    });
}

fn infer_passthrough(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    inference
        .inputs
        .first()
        .cloned()
        .ok_or_else(|| PlanError::Syntax("operator expects an input".to_string()))
}

fn infer_repart(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    match inference.params.first() {
        Some(LogicalParameter::Schema(schema)) => Ok(schema.clone()),
        _ => Err(PlanError::Syntax("repart expects a schema".to_string())),
    }
}

/// Direct constructors for the operators the optimizer inserts itself.
pub fn new_sg_operator(
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
) -> Box<dyn PhysicalOperator> {
    Box::new(PhysicalSg { params, schema })
}

pub fn new_reduce_distro_operator(
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
) -> Box<dyn PhysicalOperator> {
    Box::new(PhysicalReduceDistro { params, schema })
}

pub fn new_materialize_operator(
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
) -> Box<dyn PhysicalOperator> {
    Box::new(PhysicalMaterialize { params, schema })
}

/// Builds the parameter list for an optimizer-inserted SG.
pub fn sg_params(
    ps: PartitioningSchema,
    store_target: Option<&str>,
) -> Vec<PhysicalParameter> {
    let mut params = vec![
        PhysicalParameter::Constant {
            value: Value::from_i32(ps as i32),
            type_id: TID_INT32.to_string(),
        },
        PhysicalParameter::Constant {
            value: Value::from_i64(-1),
            type_id: TID_INT64.to_string(),
        },
    ];
    if let Some(name) = store_target {
        params.push(PhysicalParameter::ArrayName(name.to_string()));
        params.push(PhysicalParameter::Constant {
            value: Value::from_bool(true),
            type_id: crate::engine::types::type_registry::TID_BOOL.to_string(),
        });
    }
    params
}

/// Reads the target distribution out of SG parameters.
pub fn sg_target_distribution(params: &[PhysicalParameter]) -> Option<ArrayDistribution> {
    let ps = params.first().and_then(|p| match p {
        PhysicalParameter::Constant { value, type_id } if type_id == TID_INT32 => {
            PartitioningSchema::from_i64(value.get_i64())
        }
        _ => None,
    })?;
    let mut dist = ArrayDistribution::new(ps);
    // trailing int64 constants past the instance slot are the mapper's
    // offset/shape vectors
    let vectors: Vec<i64> = params
        .iter()
        .skip(2)
        .filter_map(|p| p.as_int_constant())
        .collect();
    if !vectors.is_empty() && vectors.len() % 2 == 0 {
        let half = vectors.len() / 2;
        dist = dist.with_mapper(DistributionMapper {
            offset: vectors[..half].to_vec(),
            shape: vectors[half..].to_vec(),
        });
    }
    Some(dist)
}

/// The scatter/gather operator: moves chunks to the instances the target
/// partitioning assigns them to, optionally storing the result.
struct PhysicalSg {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalSg {
    fn logical_name(&self) -> &str {
        "sg"
    }

    fn physical_name(&self) -> &str {
        "impl_sg"
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

    fn is_sg(&self) -> bool {
        true
    }

    fn is_storing_sg(&self) -> bool {
        self.params.iter().any(|p| p.as_array_name().is_some())
            && self
                .params
                .iter()
                .filter_map(|p| p.as_bool_constant())
                .any(|b| b)
    }

    fn output_distribution(
        &self,
        _inputs: &[ArrayDistribution],
        _schemas: &[ArrayDesc],
    ) -> ArrayDistribution {
        sg_target_distribution(&self.params).unwrap_or_else(ArrayDistribution::undefined)
    }

    async fn execute(
        &self,
        inputs: Vec<ArrayRef>,
        query: &Arc<Query>,
        ctx: &Arc<EngineContext>,
        node: usize,
    ) -> Result<ArrayRef, QueryError> {
        let input = inputs
            .into_iter()
            .next()
            .ok_or_else(|| PlanError::Syntax("sg expects an input".to_string()))?;
        let target = sg_target_distribution(&self.params)
            .ok_or_else(|| PlanError::Syntax("sg expects a partitioning schema".to_string()))?;
        let moved = redistribute(input, &target, ctx, query, node as u64).await?;
        if self.is_storing_sg() {
            let ids = StoringIds::from_params(&self.params).ok_or_else(|| {
                PlanError::Syntax("storing sg is missing version ids".to_string())
            })?;
            return store_locally(moved, &ids, query, ctx).await;
        }
        Ok(moved)
    }
}

/// Thins a replicated input down to the chunks this instance owns under
/// the given partitioning, so downstream sees each chunk exactly once.
struct PhysicalReduceDistro {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalReduceDistro {
    fn logical_name(&self) -> &str {
        "reduce_distro"
    }

    fn physical_name(&self) -> &str {
        "physical_reduce_distro"
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

    fn is_distribution_preserving(&self, _inputs: &[ArrayDistribution]) -> bool {
        false
    }

    fn output_distribution(
        &self,
        _inputs: &[ArrayDistribution],
        _schemas: &[ArrayDesc],
    ) -> ArrayDistribution {
        sg_target_distribution(&self.params).unwrap_or_else(ArrayDistribution::round_robin)
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
            .ok_or_else(|| PlanError::Syntax("reduce_distro expects an input".to_string()))?;
        let target = sg_target_distribution(&self.params).ok_or_else(|| {
            PlanError::Syntax("reduce_distro expects a partitioning schema".to_string())
        })?;
        let desc = input.descriptor();
        let result = Arc::new(MemArray::new(
            (*desc).clone().with_id(0),
            ctx.cache.clone(),
        ));
        let result_desc = result.descriptor();
        let n = query.instances_count();
        let my_logical = query.logical_instance_id();
        for attr in desc.attributes() {
            let mut it = input.const_iterator(attr.id())?;
            while !it.end() {
                let pos = it.position()?;
                if target.instance_for_chunk(&desc, &pos, n) == Some(my_logical) {
                    let chunk_ref = it.chunk()?;
                    let mut local = chunk_ref.to_arc().as_ref().clone();
                    local
                        .readdress(
                            result_desc.clone(),
                            crate::engine::array::address::Address::new(
                                result_desc.id(),
                                attr.id(),
                                pos.clone(),
                            ),
                        )
                        .map_err(crate::engine::errors::ExecutionError::from)?;
                    result.install(local)?;
                }
                it.advance()?;
            }
        }
        Ok(result)
    }
}

/// Re-encodes every chunk into the requested materialized format so the
/// next operator sees concrete buffers.
struct PhysicalMaterialize {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalMaterialize {
    fn logical_name(&self) -> &str {
        "materialize"
    }

    fn physical_name(&self) -> &str {
        "impl_materialize"
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
            .ok_or_else(|| PlanError::Syntax("materialize expects an input".to_string()))?;
        let format = self
            .params
            .first()
            .and_then(|p| p.as_int_constant())
            .unwrap_or(1);
        let encoding = if format == 1 {
            ChunkEncoding::Rle
        } else {
            ChunkEncoding::Dense
        };
        let desc = input.descriptor();
        let result = Arc::new(MemArray::new(
            (*desc).clone().with_id(0),
            ctx.cache.clone(),
        ));
        let result_desc = result.descriptor();
        for attr in desc.attributes() {
            let mut it = input.const_iterator(attr.id())?;
            while !it.end() {
                let chunk_ref = it.chunk()?;
                let mut materialized = chunk_ref
                    .materialize_as(encoding)
                    .map_err(crate::engine::errors::ExecutionError::from)?;
                materialized
                    .readdress(
                        result_desc.clone(),
                        crate::engine::array::address::Address::new(
                            result_desc.id(),
                            attr.id(),
                            chunk_ref.address().coords.clone(),
                        ),
                    )
                    .map_err(crate::engine::errors::ExecutionError::from)?;
                result.install(materialized)?;
                it.advance()?;
            }
        }
        Ok(result)
    }
}

/// Re-chunks its input into the target schema's chunk grid.
struct PhysicalRepart {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalRepart {
    fn logical_name(&self) -> &str {
        "repart"
    }

    fn physical_name(&self) -> &str {
        "physical_repart"
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
            .ok_or_else(|| PlanError::Syntax("repart expects an input".to_string()))?;
        let mut writer = ArrayWriter::new(self.schema.clone().with_id(0), ctx.cache.clone());
        let out_desc = writer.descriptor();
        for_each_cell(input.as_ref(), |coords, values| {
            for attr in out_desc.data_attributes() {
                writer.write(attr.id(), coords.clone(), values[attr.id() as usize].clone());
            }
            Ok(())
        })?;
        Ok(writer.finish()?)
    }
}
