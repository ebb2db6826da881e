use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::engine::cluster::liveness::InstanceLiveness;
use crate::engine::plan::serial::SerializedPlan;
use crate::engine::query::query_id::QueryId;
use crate::shared::protocol::error_codes::ErrorRecord;

/// One encoded chunk on the wire: a fetch result, a scatter/gather transfer
/// or a replica. `payload` is the chunk's encoded bytes; `checksum` covers
/// the payload only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub array_id: u64,
    pub attribute_id: u32,
    pub coordinates: Vec<i64>,
    pub compression_method: u8,
    pub decompressed_size: u64,
    pub payload: Vec<u8>,
    pub checksum: u32,
    pub eof: bool,
    pub warnings: Vec<String>,
}

impl ChunkPayload {
    pub fn eof_marker(array_id: u64) -> Self {
        Self {
            array_id,
            attribute_id: 0,
            coordinates: Vec::new(),
            compression_method: 0,
            decompressed_size: 0,
            payload: Vec::new(),
            checksum: 0,
            eof: true,
            warnings: Vec::new(),
        }
    }

    pub fn verify_checksum(&self) -> bool {
        self.eof || crc32fast::hash(&self.payload) == self.checksum
    }
}

/// Messages a client sends to its coordinator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    PrepareQuery {
        query_string: String,
        language: QueryLanguage,
    },
    ExecuteQuery {
        query_id: QueryId,
        query_string: String,
        language: QueryLanguage,
    },
    Fetch {
        query_id: QueryId,
        attribute_id: u32,
        array_name: String,
    },
    CancelQuery {
        query_id: QueryId,
    },
    CompleteQuery {
        query_id: QueryId,
    },
    /// Reply to an authentication challenge.
    SecurityMessageResponse {
        response: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryLanguage {
    Afl,
    Aql,
}

/// Messages the server sends back to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerResponse {
    QueryResult {
        query_id: QueryId,
        selective: bool,
        attributes: Vec<AttributeInfo>,
        dimensions: Vec<DimensionInfo>,
        explain_logical: String,
        explain_physical: String,
        execution_time_ms: u64,
        warnings: Vec<String>,
    },
    Chunk(ChunkPayload),
    /// Authentication challenge; the client answers with
    /// [`ClientRequest::SecurityMessageResponse`].
    SecurityMessage {
        msg_type: u32,
        prompt: String,
    },
    NewClientComplete {
        authenticated: bool,
    },
    Error {
        query_id: Option<QueryId>,
        record: ErrorRecord,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub id: u32,
    pub name: String,
    pub type_id: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    pub start: i64,
    pub end_max: i64,
    pub chunk_interval: i64,
    pub chunk_overlap: i64,
}

/// Messages instances exchange with each other for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterMessage {
    PreparePhysicalPlan {
        query_id: QueryId,
        coordinator: u64,
        plan: SerializedPlan,
        liveness: InstanceLiveness,
    },
    PrepareAck {
        query_id: QueryId,
        from: u64,
    },
    ExecutePhysicalPlan {
        query_id: QueryId,
    },
    ExecuteAck {
        query_id: QueryId,
        from: u64,
    },
    Commit {
        query_id: QueryId,
    },
    Abort {
        query_id: QueryId,
    },
    Error {
        query_id: QueryId,
        from: u64,
        record: ErrorRecord,
    },
    /// Scatter/gather transfer for an exchange round identified by `exchange`.
    SgChunk {
        query_id: QueryId,
        exchange: u64,
        from: u64,
        chunk: ChunkPayload,
    },
    ChunkReplica {
        query_id: QueryId,
        from: u64,
        chunk: ChunkPayload,
    },
    ReplicaAck {
        query_id: QueryId,
        from: u64,
        array_id: u64,
    },
}

impl ClusterMessage {
    pub fn query_id(&self) -> QueryId {
        match self {
            ClusterMessage::PreparePhysicalPlan { query_id, .. }
            | ClusterMessage::PrepareAck { query_id, .. }
            | ClusterMessage::ExecutePhysicalPlan { query_id }
            | ClusterMessage::ExecuteAck { query_id, .. }
            | ClusterMessage::Commit { query_id }
            | ClusterMessage::Abort { query_id }
            | ClusterMessage::Error { query_id, .. }
            | ClusterMessage::SgChunk { query_id, .. }
            | ClusterMessage::ChunkReplica { query_id, .. }
            | ClusterMessage::ReplicaAck { query_id, .. } => *query_id,
        }
    }
}

const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

/// Writes one length-prefixed bincode frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Reads one length-prefixed bincode frame; `Ok(None)` on clean EOF.
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let msg = bincode::deserialize(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(msg))
}
