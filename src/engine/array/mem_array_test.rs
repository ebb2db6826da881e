use crate::engine::array::iterator::Array;
use crate::engine::array::mem_array::MemArray;
use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::ChunkEncoding;
use crate::engine::types::value::Value;
use crate::test_helpers::factories::ArrayDescFactory;

fn build_array() -> MemArray {
    let desc = ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 19, 5, 0)
        .create();
    let cache = ChunkCache::new(1 << 20);
    let array = MemArray::new((*desc).clone(), cache);
    for chunk_start in [0i64, 5, 15] {
        let mut chunk = array
            .new_chunk(0, &vec![chunk_start], ChunkEncoding::Dense)
            .unwrap();
        {
            let mut w = chunk.write_iter(IterationMode::NONE);
            assert!(w.set_position(&vec![chunk_start]).unwrap());
            w.write_item(&Value::from_i32(chunk_start as i32)).unwrap();
            w.flush().unwrap();
        }
        array.install(chunk).unwrap();
    }
    array
}

#[test]
fn test_iterator_walks_chunks_in_position_order() {
    let array = build_array();
    let mut it = array.const_iterator(0).unwrap();
    let mut positions = Vec::new();
    while !it.end() {
        positions.push(it.position().unwrap()[0]);
        it.advance().unwrap();
    }
    assert_eq!(positions, vec![0, 5, 15]);
}

#[test]
fn test_iterator_set_position_finds_owning_chunk() {
    let array = build_array();
    let mut it = array.const_iterator(0).unwrap();
    // 17 lives in the chunk at 15
    assert!(it.set_position(&vec![17]).unwrap());
    assert_eq!(it.position().unwrap(), vec![15]);
    // 12 would live in the chunk at 10, which was never written
    assert!(!it.set_position(&vec![12]).unwrap());
    assert!(it.end());
}

#[test]
fn test_chunk_access_reads_written_values() {
    let array = build_array();
    let mut it = array.const_iterator(0).unwrap();
    assert!(it.set_position(&vec![5]).unwrap());
    let chunk = it.chunk().unwrap();
    let mut ci = chunk.read_iter(IterationMode::NONE);
    assert!(ci.set_position(&vec![5]).unwrap());
    assert_eq!(ci.item().unwrap().get_i64(), 5);
}

#[test]
fn test_transient_arrays_get_distinct_ids() {
    let desc = ArrayDescFactory::new().create();
    let cache = ChunkCache::new(1 << 20);
    let a = MemArray::new((*desc).clone(), cache.clone());
    let b = MemArray::new((*desc).clone(), cache);
    assert_ne!(a.descriptor().id(), b.descriptor().id());
}

#[test]
fn test_append_copies_all_chunks() {
    let source = build_array();
    let desc = source.descriptor();
    let target = MemArray::new(
        (*ArrayDescFactory::new()
            .no_default_dimensions()
            .dimension("i", 0, 19, 5, 0)
            .create())
        .clone(),
        source.cache().clone(),
    );
    target.append(&source).unwrap();

    let mut it = target.const_iterator(0).unwrap();
    let mut n = 0;
    while !it.end() {
        n += 1;
        it.advance().unwrap();
    }
    assert_eq!(n, 3);
    assert_ne!(target.descriptor().id(), desc.id());
}
