use std::io;
use thiserror::Error;

use crate::shared::protocol::{ErrorRecord, LongError, ShortError};

/// Errors raised by the type and function system.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("type not registered: {0}")]
    NotRegistered(String),

    #[error("type mismatch: expected {expected}, got {got}")]
    Mismatch { expected: String, got: String },

    #[error("no conversion from {from} to {to}")]
    ConversionError { from: String, to: String },

    #[error("function not found: {name}({args})")]
    FunctionNotFound { name: String, args: String },
}

/// Errors raised by chunk codecs and iterators.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("position is outside chunk boundaries")]
    OutOfBoundaries,

    #[error("no current element")]
    NoCurrentElement,

    #[error("access to empty cell")]
    AccessToEmptyCell,

    #[error("assigning null to a non-nullable attribute")]
    AssigningNullToNonNullable,

    #[error("chunk is read-only")]
    ReadOnly,

    #[error("chunk already exists")]
    AlreadyExists,

    #[error("aggregate state must be nullable")]
    AggregateStateMustBeNullable,

    #[error("operation failed: {0}")]
    OperationFailed(&'static str),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("illegal operation: {0}")]
    IllegalOperation(&'static str),

    #[error("corrupt chunk payload: {0}")]
    Corrupt(&'static str),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Errors raised by the materialization cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot allocate memory for chunk of {0} bytes")]
    CantAllocateMemory(usize),

    // Spill I/O failure is fatal to the query; it surfaces as a merge
    // failure because the caller was combining or materializing chunks.
    #[error("chunk spill I/O failed: {0}")]
    Spill(#[from] io::Error),

    #[error("spilled chunk payload is corrupt")]
    CorruptSpill,
}

/// Errors raised while executing operators against arrays.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no current chunk")]
    NoCurrentChunk,

    #[error("wrong number of dimensions: expected {expected}, got {got}")]
    WrongNumberOfDimensions { expected: usize, got: usize },

    #[error("coordinates are not aligned to chunk boundaries")]
    UnalignedCoordinates,

    #[error("extract expects a fixed-size attribute")]
    ExtractExpectedFixedSizeAttribute,

    #[error("extract cannot handle boolean attributes")]
    ExtractUnexpectedBooleanAttribute,

    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Errors raised while building logical plans.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("operator not found: {0}")]
    OperatorNotFound(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("parameter type error: expected {expected}, got {got}")]
    ParameterTypeError { expected: String, got: String },

    #[error("operator {op} expects {expected} parameters, got {got}")]
    WrongParameterCount {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("malformed aggregate call")]
    MalformedAggregate,

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Errors raised during physical planning.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("cannot create SG with undefined distribution")]
    CantCreateSgWithUndefinedDistribution,

    #[error("distribution requirement cannot be satisfied: {0}")]
    DistributionSpecificationError(&'static str),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Errors raised by the catalog and array locking.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("array not found: {0}")]
    ArrayNotFound(String),

    #[error("array already exists: {0}")]
    ArrayAlreadyExists(String),

    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("array lock is busy: {0}")]
    LockBusy(String),
}

/// Errors raised by the query lifecycle and cluster coordination.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query {0} not found")]
    NotFound(String),

    #[error("duplicate query id {0}")]
    DuplicateId(String),

    #[error("too many queries")]
    ResourceBusy,

    #[error("query {query_id} cannot {action}: commit state already decided")]
    InvalidCommitState { query_id: String, action: String },

    #[error("query {0} was cancelled")]
    Cancelled(String),

    #[error("query {0} is already committed")]
    AlreadyCommitted(String),

    #[error("query was already executed")]
    QueryWasExecuted,

    #[error("liveness snapshot has no live instances")]
    LivenessEmpty,

    #[error("no quorum: cluster membership changed")]
    NoQuorum,

    #[error("semaphore wait failed")]
    SemaphoreError,

    #[error("network send failed: {0}")]
    Network(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl From<ChunkError> for QueryError {
    fn from(e: ChunkError) -> Self {
        QueryError::Execution(e.into())
    }
}

impl From<CacheError> for QueryError {
    fn from(e: CacheError) -> Self {
        QueryError::Execution(e.into())
    }
}

/// Errors raised during the client authentication handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("connection setup failed: {0}")]
    ConnectionSetup(String),

    #[error("unknown request")]
    UnknownRequest,
}

impl QueryError {
    /// Lowers any lifecycle error to the wire-visible record. The record's
    /// location points at the lowering site; leaf frames that need precise
    /// locations construct [`ErrorRecord`] directly.
    #[track_caller]
    pub fn record(&self) -> ErrorRecord {
        let (short, long) = self.codes();
        ErrorRecord::new(short, long, self.to_string())
    }

    fn codes(&self) -> (ShortError, LongError) {
        match self {
            QueryError::NotFound(_) => (ShortError::QueryProcessing, LongError::QueryNotFound),
            QueryError::DuplicateId(_) => (ShortError::Internal, LongError::DuplicateQueryId),
            QueryError::ResourceBusy => (ShortError::NoMemory, LongError::ResourceBusy),
            QueryError::InvalidCommitState { .. } => {
                (ShortError::Internal, LongError::InvalidCommitState)
            }
            QueryError::Cancelled(_) => (ShortError::QueryProcessing, LongError::QueryCancelled),
            QueryError::AlreadyCommitted(_) => {
                (ShortError::QueryProcessing, LongError::QueryAlreadyCommitted)
            }
            QueryError::QueryWasExecuted => {
                (ShortError::QueryProcessing, LongError::QueryWasExecuted)
            }
            QueryError::LivenessEmpty => (ShortError::Internal, LongError::LivenessEmpty),
            QueryError::NoQuorum => (ShortError::QueryProcessing, LongError::NoQuorum),
            QueryError::SemaphoreError => (ShortError::Thread, LongError::ThreadSemaphoreError),
            QueryError::Network(_) => (ShortError::Network, LongError::OperationFailed),
            QueryError::Catalog(c) => match c {
                CatalogError::ArrayNotFound(_) => (ShortError::Catalog, LongError::ArrayNotFound),
                CatalogError::ArrayAlreadyExists(_) => {
                    (ShortError::Catalog, LongError::ArrayAlreadyExists)
                }
                CatalogError::AttributeNotFound(_) => {
                    (ShortError::Catalog, LongError::AttributeNotFound)
                }
                CatalogError::LockBusy(_) => (ShortError::Catalog, LongError::LockBusy),
            },
            QueryError::Plan(p) => match p {
                PlanError::OperatorNotFound(_) => (ShortError::Syntax, LongError::OperatorNotFound),
                PlanError::Syntax(_) => (ShortError::Syntax, LongError::UnknownError),
                PlanError::ParameterTypeError { .. } => {
                    (ShortError::Syntax, LongError::ParameterTypeError)
                }
                PlanError::WrongParameterCount { .. } => {
                    (ShortError::Syntax, LongError::ParameterTypeError)
                }
                PlanError::MalformedAggregate => {
                    (ShortError::Optimizer, LongError::MalformedAggregate)
                }
                PlanError::Type(_) => (ShortError::Syntax, LongError::TypeMismatch),
                PlanError::Catalog(CatalogError::LockBusy(_)) => {
                    (ShortError::Catalog, LongError::LockBusy)
                }
                PlanError::Catalog(_) => (ShortError::Catalog, LongError::ArrayNotFound),
            },
            QueryError::Optimizer(o) => match o {
                OptimizerError::CantCreateSgWithUndefinedDistribution => (
                    ShortError::Optimizer,
                    LongError::CantCreateSgWithUndefinedDistribution,
                ),
                OptimizerError::DistributionSpecificationError(_) => (
                    ShortError::Optimizer,
                    LongError::DistributionSpecificationError,
                ),
                OptimizerError::NotImplemented(_) => {
                    (ShortError::Optimizer, LongError::NotImplemented)
                }
                OptimizerError::Plan(_) => (ShortError::Optimizer, LongError::UnknownError),
            },
            QueryError::Execution(e) => match e {
                ExecutionError::Cache(CacheError::CantAllocateMemory(_)) => {
                    (ShortError::NoMemory, LongError::CantAllocateMemory)
                }
                ExecutionError::Cache(_) => (ShortError::Merge, LongError::MergeFailed),
                ExecutionError::MergeFailed(_) => (ShortError::Merge, LongError::MergeFailed),
                ExecutionError::Chunk(ChunkError::AssigningNullToNonNullable) => (
                    ShortError::Execution,
                    LongError::AssigningNullToNonNullable,
                ),
                ExecutionError::Chunk(ChunkError::OutOfBoundaries) => {
                    (ShortError::Execution, LongError::ChunkOutOfBoundaries)
                }
                ExecutionError::Chunk(_) => (ShortError::Execution, LongError::OperationFailed),
                ExecutionError::UnalignedCoordinates => {
                    (ShortError::Execution, LongError::UnalignedCoordinates)
                }
                ExecutionError::WrongNumberOfDimensions { .. } => {
                    (ShortError::Execution, LongError::WrongNumberOfDimensions)
                }
                _ => (ShortError::Execution, LongError::OperationFailed),
            },
            QueryError::Type(t) => match t {
                TypeError::FunctionNotFound { .. } => {
                    (ShortError::QueryProcessing, LongError::FunctionNotFound)
                }
                TypeError::ConversionError { .. } => {
                    (ShortError::QueryProcessing, LongError::TypeConversionError)
                }
                _ => (ShortError::QueryProcessing, LongError::TypeMismatch),
            },
        }
    }
}
