use serde::{Deserialize, Serialize};
use std::fmt;

/// Subsystem an error belongs to. Mirrors the grouping used on the wire:
/// clients match on the short code, the long code names the condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortError {
    Internal,
    NoMemory,
    Syntax,
    QueryProcessing,
    Execution,
    Merge,
    Optimizer,
    Catalog,
    Storage,
    Network,
    Thread,
    Client,
}

impl ShortError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortError::Internal => "INTERNAL",
            ShortError::NoMemory => "NO_MEMORY",
            ShortError::Syntax => "SYNTAX",
            ShortError::QueryProcessing => "QPROC",
            ShortError::Execution => "EXECUTION",
            ShortError::Merge => "MERGE",
            ShortError::Optimizer => "OPTIMIZER",
            ShortError::Catalog => "CATALOG",
            ShortError::Storage => "STORAGE",
            ShortError::Network => "NETWORK",
            ShortError::Thread => "THREAD",
            ShortError::Client => "CLIENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LongError {
    Unknown,
    CantAllocateMemory,
    ResourceBusy,
    TypeNotRegistered,
    TypeMismatch,
    TypeConversionError,
    FunctionNotFound,
    OperatorNotFound,
    ArrayNotFound,
    ArrayAlreadyExists,
    AttributeNotFound,
    DimensionNotFound,
    WrongNumberOfDimensions,
    ChunkOutOfBoundaries,
    NoCurrentChunk,
    NoCurrentElement,
    AccessToEmptyCell,
    AssigningNullToNonNullable,
    AggregateStateMustBeNullable,
    ChunkAlreadyExists,
    CantUpdateReadOnlyChunk,
    OperationFailed,
    NotImplemented,
    IllegalOperation,
    UnalignedCoordinates,
    ExtractExpectedFixedSizeAttribute,
    ExtractUnexpectedBooleanAttribute,
    ParameterTypeError,
    MalformedAggregate,
    CantCreateSgWithUndefinedDistribution,
    DistributionSpecificationError,
    DuplicateQueryId,
    QueryNotFound,
    QueryCancelled,
    QueryAlreadyCommitted,
    QueryWasExecuted,
    InvalidCommitState,
    LivenessEmpty,
    NoQuorum,
    LockBusy,
    MergeFailed,
    InvalidMessageType,
    ConnectionSetup,
    ThreadSemaphoreError,
    UnknownError,
}

impl LongError {
    pub fn as_str(&self) -> &'static str {
        match self {
            LongError::Unknown | LongError::UnknownError => "UNKNOWN_ERROR",
            LongError::CantAllocateMemory => "CANT_ALLOCATE_MEMORY",
            LongError::ResourceBusy => "RESOURCE_BUSY",
            LongError::TypeNotRegistered => "TYPE_NOT_REGISTERED",
            LongError::TypeMismatch => "TYPE_MISMATCH",
            LongError::TypeConversionError => "TYPE_CONVERSION_ERROR",
            LongError::FunctionNotFound => "FUNCTION_NOT_FOUND",
            LongError::OperatorNotFound => "OPERATOR_NOT_FOUND",
            LongError::ArrayNotFound => "ARRAY_NOT_FOUND",
            LongError::ArrayAlreadyExists => "ARRAY_ALREADY_EXISTS",
            LongError::AttributeNotFound => "ATTRIBUTE_NOT_FOUND",
            LongError::DimensionNotFound => "DIMENSION_NOT_FOUND",
            LongError::WrongNumberOfDimensions => "WRONG_NUMBER_OF_DIMENSIONS",
            LongError::ChunkOutOfBoundaries => "CHUNK_OUT_OF_BOUNDARIES",
            LongError::NoCurrentChunk => "NO_CURRENT_CHUNK",
            LongError::NoCurrentElement => "NO_CURRENT_ELEMENT",
            LongError::AccessToEmptyCell => "ACCESS_TO_EMPTY_CELL",
            LongError::AssigningNullToNonNullable => "ASSIGNING_NULL_TO_NON_NULLABLE",
            LongError::AggregateStateMustBeNullable => "AGGREGATE_STATE_MUST_BE_NULLABLE",
            LongError::ChunkAlreadyExists => "CHUNK_ALREADY_EXISTS",
            LongError::CantUpdateReadOnlyChunk => "CANT_UPDATE_READ_ONLY_CHUNK",
            LongError::OperationFailed => "OPERATION_FAILED",
            LongError::NotImplemented => "NOT_IMPLEMENTED",
            LongError::IllegalOperation => "ILLEGAL_OPERATION",
            LongError::UnalignedCoordinates => "UNALIGNED_COORDINATES",
            LongError::ExtractExpectedFixedSizeAttribute => "EXTRACT_EXPECTED_FIXED_SIZE_ATTRIBUTE",
            LongError::ExtractUnexpectedBooleanAttribute => "EXTRACT_UNEXPECTED_BOOLEAN_ATTRIBUTE",
            LongError::ParameterTypeError => "PARAMETER_TYPE_ERROR",
            LongError::MalformedAggregate => "MALFORMED_AGGREGATE",
            LongError::CantCreateSgWithUndefinedDistribution => {
                "CANT_CREATE_SG_WITH_UNDEFINED_DISTRIBUTION"
            }
            LongError::DistributionSpecificationError => "DISTRIBUTION_SPECIFICATION_ERROR",
            LongError::DuplicateQueryId => "DUPLICATE_QUERY_ID",
            LongError::QueryNotFound => "QUERY_NOT_FOUND",
            LongError::QueryCancelled => "QUERY_CANCELLED",
            LongError::QueryAlreadyCommitted => "QUERY_ALREADY_COMMITTED",
            LongError::QueryWasExecuted => "QUERY_WAS_EXECUTED",
            LongError::InvalidCommitState => "INVALID_COMMIT_STATE",
            LongError::LivenessEmpty => "LIVENESS_EMPTY",
            LongError::NoQuorum => "NO_QUORUM",
            LongError::LockBusy => "LOCK_BUSY",
            LongError::MergeFailed => "MERGE_FAILED",
            LongError::InvalidMessageType => "INVALID_MESSAGE_TYPE",
            LongError::ConnectionSetup => "CONNECTION_SETUP",
            LongError::ThreadSemaphoreError => "THREAD_SEMAPHORE_ERROR",
        }
    }
}

/// The full error record carried across threads and over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub short: ShortError,
    pub long: LongError,
    pub file: String,
    pub line: u32,
    pub context: String,
    pub message: String,
}

impl ErrorRecord {
    /// Captures the caller's location, so the record points at the frame
    /// that raised the error rather than at this constructor.
    #[track_caller]
    pub fn new(short: ShortError, long: LongError, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            short,
            long,
            file: loc.file().to_string(),
            line: loc.line(),
            context: String::new(),
            message: message.into(),
        }
    }

    #[track_caller]
    pub fn with_context(
        short: ShortError,
        long: LongError,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut rec = Self::new(short, long, message);
        rec.context = context.into();
        rec
    }

    pub fn stringified(&self) -> String {
        format!("{}::{}", self.short.as_str(), self.long.as_str())
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}) {}",
            self.stringified(),
            self.file,
            self.line,
            self.message
        )
    }
}

impl std::error::Error for ErrorRecord {}
