use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::{ChunkBody, ChunkEncoding};
use crate::engine::types::type_registry::{TID_INT32, TID_STRING};
use crate::engine::types::value::Value;
use crate::test_helpers::factories::{ArrayDescFactory, ChunkFactory};

#[test]
fn test_dense_write_read_roundtrip() {
    let desc = ArrayDescFactory::new().create();
    let chunk = ChunkFactory::new(desc)
        .cells((0..4).map(|i| (vec![i], Value::from_i32(i as i32 + 1))))
        .create();

    let mut iter = chunk.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
    let mut seen = Vec::new();
    while !iter.end() {
        seen.push(iter.item().unwrap().get_i64());
        iter.advance().unwrap();
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[test]
fn test_dense_set_position_bounds() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 9, 5, 0)
        .create();
    let chunk = ChunkFactory::new(desc)
        .cell(vec![0], Value::from_i32(10))
        .create();

    let mut iter = chunk.read_iter(IterationMode::NONE);
    assert!(iter.set_position(&vec![4]).unwrap());
    // second chunk's territory
    assert!(!iter.set_position(&vec![5]).unwrap());
    assert!(!iter.set_position(&vec![-1]).unwrap());
}

#[test]
fn test_dense_null_handling() {
    let desc = ArrayDescFactory::new()
        .no_default_attributes()
        .nullable_attribute("v", TID_INT32)
        .create();
    let chunk = ChunkFactory::new(desc)
        .cell(vec![0], Value::from_i32(7))
        .cell(vec![1], Value::null(3))
        .create();

    let mut iter = chunk.read_iter(IterationMode::NONE);
    assert!(iter.set_position(&vec![1]).unwrap());
    let v = iter.item().unwrap();
    assert_eq!(v.missing_reason(), Some(3));

    // nulls are invisible under IGNORE_NULL_VALUES
    let mut iter = chunk.read_iter(IterationMode::IGNORE_NULL_VALUES);
    assert!(!iter.set_position(&vec![1]).unwrap());
    assert!(iter.set_position(&vec![0]).unwrap());
}

#[test]
fn test_dense_rejects_null_for_non_nullable() {
    let desc = ArrayDescFactory::new().create();
    let mut chunk = crate::engine::chunk::mem_chunk::MemChunk::new(
        desc.clone(),
        crate::engine::array::address::Address::new(0, 0, vec![0]),
        ChunkEncoding::Dense,
    )
    .unwrap();
    let mut writer = chunk.write_iter(IterationMode::NONE);
    assert!(writer.set_position(&vec![0]).unwrap());
    let err = writer.write_item(&Value::null(1)).unwrap_err();
    assert!(matches!(
        err,
        crate::engine::errors::ChunkError::AssigningNullToNonNullable
    ));
}

#[test]
fn test_dense_variable_size_tail_grows_on_overwrite() {
    let desc = ArrayDescFactory::new()
        .no_default_attributes()
        .attribute("s", TID_STRING)
        .create();
    let mut chunk = ChunkFactory::new(desc)
        .cell(vec![0], Value::from_string("kort"))
        .create();

    let tail_before = match chunk.body() {
        ChunkBody::Dense(b) => b.tail.len(),
        _ => panic!("expected dense body"),
    };

    // larger value: new slot appended, old one leaks inside the chunk
    {
        let mut writer = chunk.write_iter(IterationMode::APPEND_CHUNK);
        assert!(writer.set_position(&vec![0]).unwrap());
        writer
            .write_item(&Value::from_string("een veel langere waarde"))
            .unwrap();
        writer.flush().unwrap();
    }
    let tail_after = match chunk.body() {
        ChunkBody::Dense(b) => b.tail.len(),
        _ => panic!("expected dense body"),
    };
    assert!(tail_after > tail_before);

    let mut iter = chunk.read_iter(IterationMode::NONE);
    assert!(iter.set_position(&vec![0]).unwrap());
    assert_eq!(iter.item().unwrap().get_string(), "een veel langere waarde");
}

#[test]
fn test_dense_encode_decode_identity() {
    let desc = ArrayDescFactory::new().create();
    let chunk = ChunkFactory::new(desc.clone())
        .cells((0..4).map(|i| (vec![i], Value::from_i32(i as i32 * 10))))
        .create();

    let bytes = chunk.encode();
    let decoded = crate::engine::chunk::mem_chunk::MemChunk::decode(
        desc,
        chunk.address().clone(),
        &bytes,
    )
    .unwrap();

    let mut a = chunk.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
    let mut b = decoded.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
    while !a.end() {
        assert!(!b.end());
        assert_eq!(a.position().unwrap(), b.position().unwrap());
        assert_eq!(a.item().unwrap(), b.item().unwrap());
        a.advance().unwrap();
        b.advance().unwrap();
    }
    assert!(b.end());
}

#[test]
fn test_overlap_halo_visibility() {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 19, 10, 2)
        .create();
    // chunk at 10 spans [8..19] with overlap
    let chunk = ChunkFactory::new(desc)
        .at(vec![10])
        .cell(vec![8], Value::from_i32(8))
        .cell(vec![10], Value::from_i32(10))
        .create();

    let mut with_halo = chunk.read_iter(IterationMode::NONE);
    assert!(with_halo.set_position(&vec![8]).unwrap());

    let mut core_only = chunk.read_iter(IterationMode::IGNORE_OVERLAPS);
    assert!(!core_only.set_position(&vec![8]).unwrap());
    assert!(core_only.set_position(&vec![10]).unwrap());
}
