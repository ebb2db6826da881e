use crate::shared::protocol::error_codes::{ErrorRecord, LongError, ShortError};

#[test]
fn test_record_captures_caller_location() {
    let record = ErrorRecord::new(ShortError::Execution, LongError::NoCurrentElement, "boom");
    assert!(record.file.ends_with("error_codes_test.rs"));
    assert!(record.line > 0);
}

#[test]
fn test_stringified_groups_by_subsystem() {
    let record = ErrorRecord::new(ShortError::QueryProcessing, LongError::NoQuorum, "");
    assert_eq!(record.stringified(), "QPROC::NO_QUORUM");

    let record = ErrorRecord::new(ShortError::NoMemory, LongError::CantAllocateMemory, "");
    assert_eq!(record.stringified(), "NO_MEMORY::CANT_ALLOCATE_MEMORY");
}

#[test]
fn test_record_roundtrips_through_bincode() {
    let record = ErrorRecord::with_context(
        ShortError::Merge,
        LongError::MergeFailed,
        "chunk [0,0]",
        "payload checksum mismatch",
    );
    let bytes = bincode::serialize(&record).unwrap();
    let back: ErrorRecord = bincode::deserialize(&bytes).unwrap();
    assert_eq!(back, record);
    assert_eq!(back.context, "chunk [0,0]");
}

#[test]
fn test_query_error_lowering() {
    use crate::engine::errors::{CatalogError, QueryError};
    let record = QueryError::NoQuorum.record();
    assert_eq!(record.short, ShortError::QueryProcessing);
    assert_eq!(record.long, LongError::NoQuorum);

    let record = QueryError::Catalog(CatalogError::LockBusy("A".to_string())).record();
    assert_eq!(record.long, LongError::LockBusy);
}
