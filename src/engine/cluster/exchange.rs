use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::engine::array::address::Address;
use crate::engine::array::iterator::{Array, ArrayRef};
use crate::engine::array::mem_array::MemArray;
use crate::engine::chunk::mem_chunk::MemChunk;
use crate::engine::chunk::merge::{aggregate_merge, merge};
use crate::engine::cluster::instance::InstanceId;
use crate::engine::context::EngineContext;
use crate::engine::errors::{ExecutionError, QueryError};
use crate::engine::plan::distribution::{ArrayDistribution, PartitioningSchema};
use crate::engine::query::query::Query;
use crate::engine::types::aggregate::Aggregate;
use crate::shared::config::CONFIG;
use crate::shared::protocol::messages::{ChunkPayload, ClusterMessage};

const LOG_TARGET: &str = "engine::cluster::exchange";

/// Moves an array into the target distribution: every instance streams its
/// chunks to their owners, EOF markers close the round, and chunks landing
/// on an existing address merge (through the query's aggregate when one is
/// active). SG boundaries act as barriers: the call returns only after all
/// peers finished sending.
pub async fn redistribute(
    input: ArrayRef,
    target: &ArrayDistribution,
    ctx: &Arc<EngineContext>,
    query: &Arc<Query>,
    exchange_id: u64,
) -> Result<ArrayRef, QueryError> {
    let desc = input.descriptor();
    let result = Arc::new(MemArray::new((*desc).clone().with_id(0), ctx.cache.clone()));
    let result_desc = result.descriptor();
    let aggregate = query.operator_context();

    let n = query.instances_count();
    let my_logical = query.logical_instance_id();
    let peers: Vec<InstanceId> = query
        .live_instances()
        .iter()
        .copied()
        .filter(|i| *i != query.local_instance_id())
        .collect();

    let mut rx = ctx.network.register_exchange(query.id(), exchange_id);
    debug!(
        target: LOG_TARGET,
        query_id = %query.id(),
        exchange_id,
        ps = ?target.partitioning_schema(),
        "Redistribution started"
    );

    // scatter local chunks
    for attr in desc.attributes() {
        let mut it = input.const_iterator(attr.id())?;
        while !it.end() {
            let chunk_ref = it.chunk()?;
            let chunk_pos = chunk_ref.address().coords.clone();
            let owner = target.instance_for_chunk(&desc, &chunk_pos, n);
            let replicate_everywhere = owner.is_none()
                && target.partitioning_schema() == PartitioningSchema::Replicated;

            let keep_local = replicate_everywhere || owner == Some(my_logical);
            let send_remote = replicate_everywhere || (owner.is_some() && owner != Some(my_logical));

            if keep_local {
                let mut local = chunk_ref.to_arc().as_ref().clone();
                local
                    .readdress(
                        result_desc.clone(),
                        Address::new(result_desc.id(), attr.id(), chunk_pos.clone()),
                    )
                    .map_err(ExecutionError::from)?;
                merge_into(&result, local, aggregate.as_deref())?;
            }
            if send_remote {
                let payload = make_payload(&chunk_ref, attr.id(), &chunk_pos);
                let targets: Vec<InstanceId> = if replicate_everywhere {
                    peers.clone()
                } else {
                    let physical = query
                        .map_logical_to_physical(owner.unwrap())
                        .ok_or(QueryError::NoQuorum)?;
                    vec![physical]
                };
                for to in targets {
                    trace!(target: LOG_TARGET, ?to, pos = ?chunk_pos, "Sending SG chunk");
                    ctx.network
                        .send(
                            to,
                            ClusterMessage::SgChunk {
                                query_id: query.id(),
                                exchange: exchange_id,
                                from: query.local_instance_id(),
                                chunk: payload.clone(),
                            },
                        )
                        .await?;
                }
            }
            it.advance()?;
        }
    }

    // close the round towards every peer
    for peer in &peers {
        ctx.network
            .send(
                *peer,
                ClusterMessage::SgChunk {
                    query_id: query.id(),
                    exchange: exchange_id,
                    from: query.local_instance_id(),
                    chunk: ChunkPayload::eof_marker(0),
                },
            )
            .await?;
    }

    // gather until every peer sent its EOF
    let mut eofs_needed = peers.len();
    let period = Duration::from_secs(CONFIG.engine.ack_timeout_secs);
    while eofs_needed > 0 {
        match tokio::time::timeout(period, rx.recv()).await {
            Err(_) => {
                query.validate()?;
            }
            Ok(None) => return Err(QueryError::NoQuorum),
            Ok(Some((from, payload))) => {
                if payload.eof {
                    trace!(target: LOG_TARGET, from, "SG EOF received");
                    eofs_needed -= 1;
                    continue;
                }
                if !payload.verify_checksum() {
                    return Err(ExecutionError::MergeFailed(
                        "scatter/gather payload checksum mismatch".to_string(),
                    )
                    .into());
                }
                let addr = Address::new(
                    result_desc.id(),
                    payload.attribute_id,
                    payload.coordinates.clone(),
                );
                let chunk = MemChunk::decode(result_desc.clone(), addr, &payload.payload)
                    .map_err(ExecutionError::from)?;
                merge_into(&result, chunk, aggregate.as_deref())?;
            }
        }
    }

    ctx.network.close_exchange(query.id(), exchange_id);
    debug!(target: LOG_TARGET, query_id = %query.id(), exchange_id, "Redistribution finished");
    Ok(result)
}

fn make_payload(chunk: &MemChunk, attribute_id: u32, chunk_pos: &[i64]) -> ChunkPayload {
    let bytes = chunk.encode();
    ChunkPayload {
        array_id: 0,
        attribute_id,
        coordinates: chunk_pos.to_vec(),
        compression_method: 0,
        decompressed_size: bytes.len() as u64,
        checksum: crc32fast::hash(&bytes),
        payload: bytes,
        eof: false,
        warnings: Vec::new(),
    }
}

/// Installs a chunk into the result, merging with whatever already landed
/// at the same address.
pub fn merge_into(
    result: &MemArray,
    chunk: MemChunk,
    aggregate: Option<&dyn Aggregate>,
) -> Result<(), QueryError> {
    let addr = chunk.address().clone();
    match result.chunk_for_update(&addr)? {
        None => {
            result.install(chunk)?;
        }
        Some(mut existing) => {
            match aggregate {
                Some(agg) => aggregate_merge(&mut existing, &chunk, agg)?,
                None => merge(&mut existing, &chunk, None)?,
            }
            result.install(existing)?;
        }
    }
    Ok(())
}
