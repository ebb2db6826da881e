use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::{Array, ArrayRef};
use crate::engine::array::mem_array::MemArray;
use crate::engine::cluster::instance::InstanceId;
use crate::engine::context::EngineContext;
use crate::engine::errors::{PlanError, QueryError};
use crate::engine::plan::distribution::{ArrayDistribution, DistributionRequirement};
use crate::engine::plan::node::PhysicalPlan;
use crate::engine::plan::operator_library::{
    LogicalOperatorDef, OperatorLibrary, OperatorProperties, SchemaInference,
};
use crate::engine::plan::physical::{PhysicalOperator, PhysicalParameter};
use crate::engine::query::query::{CommitState, Query};
use crate::engine::query::replication::replication_sync;
use crate::engine::query::rollback::UpdateErrorHandler;
use crate::engine::storage::lock::{InstanceRole, LockDesc, LockMode};
use crate::shared::config::CONFIG;
use crate::shared::protocol::messages::{ChunkPayload, ClusterMessage};

const LOG_TARGET: &str = "engine::plan::store";

pub fn register(lib: &mut OperatorLibrary) {
    lib.register_logical(LogicalOperatorDef {
        name: "store",
        properties: OperatorProperties {
            exclusive: true,
            ..Default::default()
        },
        global_companion: None,
        infer_schema: infer_store,
    });
    lib.register_physical("store", "physical_store", |params, schema| {
        Box::new(PhysicalStore { params, schema })
    });
}

fn infer_store(inference: &SchemaInference) -> Result<ArrayDesc, PlanError> {
    let input = inference
        .inputs
        .first()
        .ok_or_else(|| PlanError::Syntax("store expects an input".to_string()))?;
    let name = inference
        .params
        .first()
        .and_then(|p| p.as_array_name())
        .ok_or_else(|| PlanError::Syntax("store expects a target array name".to_string()))?;
    // the target array must exist in the catalog; its schema wins
    if inference.catalog.contains_array(name) {
        Ok(inference.catalog.array_descriptor(name)?)
    } else {
        Ok(input.clone().with_name(name))
    }
}

/// Writes its input into a new version of a persistent array. Persistence
/// wants round-robin placement, so the optimizer feeds it through an SG.
struct PhysicalStore {
    params: Vec<PhysicalParameter>,
    schema: ArrayDesc,
}

#[async_trait]
impl PhysicalOperator for PhysicalStore {
    fn logical_name(&self) -> &str {
        "store"
    }

    fn physical_name(&self) -> &str {
        "physical_store"
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
        DistributionRequirement::Specific(ArrayDistribution::round_robin())
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
            .ok_or_else(|| PlanError::Syntax("store expects an input".to_string()))?;
        let ids = StoringIds::from_params(&self.params)
            .ok_or_else(|| PlanError::Syntax("store is missing version ids".to_string()))?;
        store_locally(input, &ids, query, ctx).await
    }
}

/// Version identity a storing node carries once the coordinator allocated
/// the new array version.
#[derive(Debug, Clone, Copy)]
pub struct StoringIds {
    pub base_id: u64,
    pub new_version: u64,
    pub new_version_id: u64,
}

impl StoringIds {
    /// Version ids travel as uint64 constants; no other parameter uses
    /// that type, so the triple is unambiguous wherever it sits.
    pub fn from_params(params: &[PhysicalParameter]) -> Option<Self> {
        let mut ints = params.iter().rev().filter_map(|p| match p {
            PhysicalParameter::Constant { value, type_id }
                if type_id == crate::engine::types::type_registry::TID_UINT64 =>
            {
                Some(value.get_u64())
            }
            _ => None,
        });
        let new_version_id = ints.next()?;
        let new_version = ints.next()?;
        let base_id = ints.next()?;
        (base_id > 0 && new_version > 0 && new_version_id > 0).then_some(Self {
            base_id,
            new_version,
            new_version_id,
        })
    }

    fn to_params(self) -> Vec<PhysicalParameter> {
        [self.base_id, self.new_version, self.new_version_id]
            .into_iter()
            .map(|v| PhysicalParameter::Constant {
                value: crate::engine::types::value::Value::from_u64(v),
                type_id: crate::engine::types::type_registry::TID_UINT64.to_string(),
            })
            .collect()
    }
}

/// The storing target of a plan node, when it has one.
pub fn storing_target(op: &dyn PhysicalOperator) -> Option<String> {
    if op.logical_name() == "store" || op.is_storing_sg() {
        op.parameters()
            .iter()
            .find_map(|p| p.as_array_name())
            .map(|s| s.to_string())
    } else {
        None
    }
}

/// Coordinator pass: allocate a new catalog version for every storing node
/// and append the ids to its parameters, so the serialized plan carries
/// them to the workers.
pub fn allocate_store_versions(
    plan: &mut PhysicalPlan,
    ctx: &Arc<EngineContext>,
) -> Result<(), QueryError> {
    let Some(root) = plan.root() else {
        return Ok(());
    };
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        stack.extend(plan.children(id));
        let Some(name) = storing_target(plan.op(id)) else {
            continue;
        };
        if StoringIds::from_params(plan.op(id).parameters()).is_some() {
            continue;
        }
        // storing into a name the catalog has never seen creates the array
        if !ctx.catalog.contains_array(&name) {
            ctx.catalog
                .create_array(&name, plan.op(id).schema())
                .map_err(PlanError::from)?;
        }
        let (base_id, new_version, new_version_id) =
            ctx.catalog.prepare_new_version(&name).map_err(PlanError::from)?;
        debug!(
            target: LOG_TARGET,
            array = %name,
            new_version,
            new_version_id,
            "Allocated array version"
        );
        let ids = StoringIds {
            base_id,
            new_version,
            new_version_id,
        };
        let mut params = plan.op(id).parameters().to_vec();
        params.extend(ids.to_params());
        plan.op_mut(id).set_parameters(params);
    }
    Ok(())
}

/// Per-instance setup for every storing node: take the write lock with the
/// version identity, register the backing version array and its
/// replication queue, and arm rollback and commit hooks.
pub fn prepare_storing_nodes(
    plan: &PhysicalPlan,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
    role: InstanceRole,
) -> Result<(), QueryError> {
    let Some(root) = plan.root() else {
        return Ok(());
    };
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        stack.extend(plan.children(id));
        let Some(name) = storing_target(plan.op(id)) else {
            continue;
        };
        let ids = StoringIds::from_params(plan.op(id).parameters())
            .ok_or_else(|| PlanError::Syntax("storing node missing version ids".to_string()))?;

        let mut lock = LockDesc::new(
            name.clone(),
            query.id(),
            ctx.cluster.local_instance_id(),
            role,
            LockMode::Wr,
        );
        lock.array_id = ids.base_id;
        lock.array_version = ids.new_version;
        lock.array_version_id = ids.new_version_id;
        ctx.catalog.lock_array(&lock).map_err(PlanError::from)?;
        ctx.catalog.update_lock(&lock);
        query.request_lock(lock.clone());
        query.update_requested_lock(&lock);

        let desc = plan.op(id).schema().clone();
        let version_array = ctx.storage.create_version_array(&desc, ids.new_version_id);
        query
            .replication
            .enable_inbound_queue(ids.new_version_id, version_array);

        query.push_error_handler(Box::new(UpdateErrorHandler::new(lock, ctx.clone())));

        let commit_ctx = ctx.clone();
        let commit_name = name.clone();
        query.push_finalizer(Box::new(move |q: &Arc<Query>| {
            if q.commit_state() == CommitState::Committed {
                let _ = commit_ctx.catalog.commit_version(
                    &commit_name,
                    ids.new_version,
                    ids.new_version_id,
                );
            }
        }));
    }
    Ok(())
}

/// Writes the local slice of `input` into the version array, replicates
/// it to the configured number of peers, and waits for their acks.
pub async fn store_locally(
    input: ArrayRef,
    ids: &StoringIds,
    query: &Arc<Query>,
    ctx: &Arc<EngineContext>,
) -> Result<ArrayRef, QueryError> {
    let version_array: Arc<MemArray> = ctx
        .storage
        .get_array(ids.new_version_id)
        .map_err(PlanError::from)?;
    version_array.append(input.as_ref())?;

    let redundancy = CONFIG.engine.redundancy;
    if redundancy > 0 && query.instances_count() > 1 {
        replicate_chunks(&version_array, ids.new_version_id, query, ctx, redundancy).await?;
        replication_sync(query, ctx, ids.new_version_id).await?;
    }
    Ok(version_array)
}

async fn replicate_chunks(
    array: &Arc<MemArray>,
    array_id: u64,
    query: &Arc<Query>,
    ctx: &Arc<EngineContext>,
    redundancy: usize,
) -> Result<(), QueryError> {
    let desc = array.descriptor();
    let n = query.instances_count();
    let my_logical = query.logical_instance_id();
    for attr in desc.attributes() {
        let mut it = array.const_iterator(attr.id())?;
        while !it.end() {
            let chunk = it.chunk()?;
            let bytes = chunk.encode();
            let payload = ChunkPayload {
                array_id,
                attribute_id: attr.id(),
                coordinates: chunk.address().coords.clone(),
                compression_method: 0,
                decompressed_size: bytes.len() as u64,
                checksum: crc32fast::hash(&bytes),
                payload: bytes,
                eof: false,
                warnings: Vec::new(),
            };
            for k in 1..=redundancy as u64 {
                let target_logical = (my_logical + k) % n;
                if target_logical == my_logical {
                    continue;
                }
                let to: InstanceId = query
                    .map_logical_to_physical(target_logical)
                    .ok_or(QueryError::NoQuorum)?;
                ctx.network
                    .send(
                        to,
                        ClusterMessage::ChunkReplica {
                            query_id: query.id(),
                            from: query.local_instance_id(),
                            chunk: payload.clone(),
                        },
                    )
                    .await?;
            }
            it.advance()?;
        }
    }
    Ok(())
}
