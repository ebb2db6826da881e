use ahash::AHashMap;
use std::sync::Arc;

use crate::engine::array::iterator::{Array, ArrayRef};
use crate::engine::context::EngineContext;
use crate::engine::query::coordinator::{
    QueryResultInfo, cancel_query, execute_query, prepare_query,
};
use crate::engine::query::query::Query;
use crate::engine::query::query_id::QueryId;
use crate::shared::protocol::messages::{ChunkPayload, ClientRequest, ServerResponse};

/// Per-connection state: prepared queries, executed results, and fetch
/// cursors streaming chunks one at a time.
#[derive(Default)]
pub struct Session {
    prepared: AHashMap<QueryId, Arc<Query>>,
    results: AHashMap<QueryId, (Option<ArrayRef>, QueryResultInfo)>,
    fetch_cursors: AHashMap<(QueryId, u32), usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

pub async fn dispatch_command(
    ctx: &Arc<EngineContext>,
    session: &mut Session,
    request: ClientRequest,
) -> ServerResponse {
    match request {
        ClientRequest::PrepareQuery { query_string, .. } => {
            match prepare_query(ctx, &query_string).await {
                Ok(query) => {
                    let id = query.id();
                    let selective = query
                        .logical_plan()
                        .map(|p| !p.root.is_ddl)
                        .unwrap_or(false);
                    session.prepared.insert(id, query);
                    ServerResponse::QueryResult {
                        query_id: id,
                        selective,
                        attributes: Vec::new(),
                        dimensions: Vec::new(),
                        explain_logical: String::new(),
                        explain_physical: String::new(),
                        execution_time_ms: 0,
                        warnings: Vec::new(),
                    }
                }
                Err(e) => ServerResponse::Error {
                    query_id: None,
                    record: e.record(),
                },
            }
        }
        ClientRequest::ExecuteQuery {
            query_id,
            query_string,
            ..
        } => {
            let query = match session.prepared.remove(&query_id) {
                Some(q) => q,
                None => match prepare_query(ctx, &query_string).await {
                    Ok(q) => q,
                    Err(e) => {
                        return ServerResponse::Error {
                            query_id: Some(query_id),
                            record: e.record(),
                        };
                    }
                },
            };
            let id = query.id();
            match execute_query(ctx, &query).await {
                Ok(info) => {
                    let result = query.result();
                    let response = ServerResponse::QueryResult {
                        query_id: id,
                        selective: info.selective,
                        attributes: info.attributes.clone(),
                        dimensions: info.dimensions.clone(),
                        explain_logical: info.explain_logical.clone(),
                        explain_physical: info.explain_physical.clone(),
                        execution_time_ms: info.execution_time_ms,
                        warnings: info.warnings.clone(),
                    };
                    session.results.insert(id, (result, info));
                    response
                }
                Err(e) => ServerResponse::Error {
                    query_id: Some(id),
                    record: e.record(),
                },
            }
        }
        ClientRequest::Fetch {
            query_id,
            attribute_id,
            ..
        } => fetch_chunk(session, query_id, attribute_id),
        ClientRequest::CancelQuery { query_id } => {
            session.prepared.remove(&query_id);
            session.results.remove(&query_id);
            match cancel_query(ctx, query_id).await {
                Ok(()) | Err(crate::engine::errors::QueryError::NotFound(_)) => {
                    ServerResponse::QueryResult {
                        query_id,
                        selective: false,
                        attributes: Vec::new(),
                        dimensions: Vec::new(),
                        explain_logical: String::new(),
                        explain_physical: String::new(),
                        execution_time_ms: 0,
                        warnings: Vec::new(),
                    }
                }
                Err(e) => ServerResponse::Error {
                    query_id: Some(query_id),
                    record: e.record(),
                },
            }
        }
        ClientRequest::CompleteQuery { query_id } => {
            session.prepared.remove(&query_id);
            session.results.remove(&query_id);
            session.fetch_cursors.retain(|(q, _), _| *q != query_id);
            ServerResponse::QueryResult {
                query_id,
                selective: false,
                attributes: Vec::new(),
                dimensions: Vec::new(),
                explain_logical: String::new(),
                explain_physical: String::new(),
                execution_time_ms: 0,
                warnings: Vec::new(),
            }
        }
        ClientRequest::SecurityMessageResponse { .. } => ServerResponse::Error {
            query_id: None,
            record: crate::shared::protocol::ErrorRecord::new(
                crate::shared::protocol::ShortError::Client,
                crate::shared::protocol::LongError::InvalidMessageType,
                "security response outside the handshake",
            ),
        },
    }
}

/// Streams the next chunk of one result attribute; `eof` when the cursor
/// ran off the end. Warnings ride along on every chunk.
fn fetch_chunk(session: &mut Session, query_id: QueryId, attribute_id: u32) -> ServerResponse {
    let Some((result, info)) = session.results.get(&query_id) else {
        return ServerResponse::Error {
            query_id: Some(query_id),
            record: crate::engine::errors::QueryError::NotFound(query_id.to_string()).record(),
        };
    };
    let Some(array) = result else {
        return ServerResponse::Chunk(ChunkPayload::eof_marker(0));
    };
    let cursor = session
        .fetch_cursors
        .entry((query_id, attribute_id))
        .or_insert(0);

    let chunk = (|| {
        let mut it = array.const_iterator(attribute_id).ok()?;
        let mut skipped = 0;
        while !it.end() {
            if skipped == *cursor {
                return it.chunk().ok();
            }
            skipped += 1;
            it.advance().ok()?;
        }
        None
    })();

    match chunk {
        None => ServerResponse::Chunk(ChunkPayload::eof_marker(array.descriptor().id())),
        Some(chunk) => {
            *cursor += 1;
            let bytes = chunk.encode();
            ServerResponse::Chunk(ChunkPayload {
                array_id: array.descriptor().id(),
                attribute_id,
                coordinates: chunk.address().coords.clone(),
                compression_method: 0,
                decompressed_size: bytes.len() as u64,
                checksum: crc32fast::hash(&bytes),
                payload: bytes,
                eof: false,
                warnings: info.warnings.clone(),
            })
        }
    }
}
