use ahash::AHashMap;

use crate::engine::array::iterator::Array;
use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::ChunkEncoding;
use crate::engine::storage::manager::StorageManager;
use crate::engine::types::value::Value;
use crate::test_helpers::factories::ArrayDescFactory;

#[test]
fn test_version_array_registration() {
    let cache = ChunkCache::new(1 << 20);
    let storage = StorageManager::new(cache);
    let desc = ArrayDescFactory::new().create();

    let array = storage.create_version_array(&desc, 42);
    assert_eq!(array.descriptor().id(), 42);
    assert!(storage.get_array(42).is_ok());
    assert!(storage.get_array(43).is_err());
}

#[test]
fn test_rollback_drops_version_chunks() {
    let cache = ChunkCache::new(1 << 20);
    let storage = StorageManager::new(cache.clone());
    let desc = ArrayDescFactory::new().create();
    let array = storage.create_version_array(&desc, 42);

    let mut chunk = array.new_chunk(0, &vec![0], ChunkEncoding::Dense).unwrap();
    {
        let mut w = chunk.write_iter(IterationMode::NONE);
        assert!(w.set_position(&vec![0]).unwrap());
        w.write_item(&Value::from_i32(1)).unwrap();
        w.flush().unwrap();
    }
    array.install(chunk).unwrap();
    assert_eq!(cache.addresses(42, 0).len(), 1);

    let mut undo = AHashMap::new();
    undo.insert(1u64, 0u64);
    storage.rollback(&undo, &[42]);

    // no chunk of the rolled back version stays readable
    assert!(storage.get_array(42).is_err());
    assert!(cache.addresses(42, 0).is_empty());
}
