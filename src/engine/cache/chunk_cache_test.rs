use crate::engine::array::address::Address;
use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::chunk::iterator::{ChunkIterator, IterationMode};
use crate::engine::chunk::mem_chunk::ChunkEncoding;
use crate::engine::types::value::Value;
use crate::test_helpers::factories::{ArrayDescFactory, ChunkFactory};

fn chunk_of(
    desc: &std::sync::Arc<crate::engine::array::descriptor::ArrayDesc>,
    chunk_start: i64,
    seed: i32,
) -> crate::engine::chunk::mem_chunk::MemChunk {
    ChunkFactory::new(desc.clone())
        .at(vec![chunk_start])
        .encoding(ChunkEncoding::Dense)
        .cells(
            (chunk_start..chunk_start + 64)
                .map(|i| (vec![i], Value::from_i32(seed + i as i32))),
        )
        .create()
}

fn big_desc() -> std::sync::Arc<crate::engine::array::descriptor::ArrayDesc> {
    ArrayDescFactory::new()
        .no_default_dimensions()
        .dimension("i", 0, 64 * 10 - 1, 64, 0)
        .create()
}

#[test]
fn test_pin_returns_resident_chunk() {
    let desc = big_desc();
    let cache = ChunkCache::new(1 << 20);
    let addr = Address::new(1, 0, vec![0]);
    let pinned = cache.put(addr.clone(), chunk_of(&desc, 0, 100)).unwrap();
    drop(pinned);

    let again = cache.pin(&addr).unwrap().expect("cached");
    let mut iter = again.read_iter(IterationMode::NONE);
    assert!(iter.set_position(&vec![3]).unwrap());
    assert_eq!(iter.item().unwrap().get_i64(), 103);
}

#[test]
fn test_unknown_address_is_none() {
    let cache = ChunkCache::new(1 << 20);
    assert!(cache.pin(&Address::new(9, 0, vec![0])).unwrap().is_none());
}

#[test]
fn test_eviction_spills_and_reloads_identical_bytes() {
    let desc = big_desc();
    // each dense chunk is 64 cells * 4 bytes = 256 bytes; threshold fits ~4
    let cache = ChunkCache::new(1024);
    let mut addrs = Vec::new();
    for c in 0..10 {
        let start = c * 64;
        let addr = Address::new(1, 0, vec![start]);
        let pinned = cache
            .put(addr.clone(), chunk_of(&desc, start, 7))
            .unwrap();
        addrs.push(addr);
        drop(pinned); // unpin immediately, no reads in between
    }
    assert!(cache.used_mem() <= 1024);
    assert!(cache.resident_count() < 10);

    // re-pinning an evicted chunk reads it back with identical content
    for addr in &addrs {
        let pinned = cache.pin(addr).unwrap().expect("still cached");
        let mut iter = pinned.read_iter(IterationMode::NONE);
        let start = addr.coords[0];
        assert!(iter.set_position(&vec![start + 5]).unwrap());
        assert_eq!(iter.item().unwrap().get_i64(), 7 + (start + 5));
    }
}

#[test]
fn test_pinned_chunks_are_not_evicted() {
    let desc = big_desc();
    let cache = ChunkCache::new(512);
    let hot_addr = Address::new(1, 0, vec![0]);
    let _hot = cache.put(hot_addr.clone(), chunk_of(&desc, 0, 1)).unwrap();

    // flood the cache; the pinned chunk must stay resident
    for c in 1..8 {
        let start = c * 64;
        let addr = Address::new(1, 0, vec![start]);
        drop(cache.put(addr, chunk_of(&desc, start, 1)).unwrap());
    }

    // without going through the swap file, the pinned chunk still reads
    let again = cache.pin(&hot_addr).unwrap().unwrap();
    let mut iter = again.read_iter(IterationMode::NONE);
    assert!(iter.set_position(&vec![1]).unwrap());
    assert_eq!(iter.item().unwrap().get_i64(), 2);
}

#[test]
fn test_residency_matches_accounting() {
    let desc = big_desc();
    let cache = ChunkCache::new(700);
    for c in 0..6 {
        let start = c * 64;
        drop(
            cache
                .put(Address::new(1, 0, vec![start]), chunk_of(&desc, start, 0))
                .unwrap(),
        );
    }
    // every resident chunk is 256 bytes
    assert_eq!(cache.used_mem(), cache.resident_count() * 256);
    assert!(cache.used_mem() <= 700);
}

#[test]
fn test_pinned_saturation_fails_with_cant_allocate() {
    use crate::engine::errors::CacheError;

    let desc = big_desc();
    // room for two 256-byte chunks plus the one-pin overshoot
    let cache = ChunkCache::new(512);
    let mut pins = Vec::new();
    for c in 0..3 {
        let start = c * 64;
        pins.push(
            cache
                .put(Address::new(1, 0, vec![start]), chunk_of(&desc, start, 0))
                .unwrap(),
        );
    }
    // every resident is pinned and over the threshold: nothing is
    // evictable, so the next allocation must fail
    let err = cache
        .put(Address::new(1, 0, vec![192]), chunk_of(&desc, 192, 0))
        .unwrap_err();
    assert!(matches!(err, CacheError::CantAllocateMemory(_)));

    // releasing the pins makes the same allocation succeed
    pins.clear();
    drop(
        cache
            .put(Address::new(1, 0, vec![192]), chunk_of(&desc, 192, 0))
            .unwrap(),
    );
}

#[test]
fn test_reload_of_pinned_saturated_cache_fails() {
    use crate::engine::errors::CacheError;

    let desc = big_desc();
    let cache = ChunkCache::new(512);
    // spill one chunk, then pin the cache full past the threshold
    let evicted = Address::new(1, 0, vec![0]);
    drop(cache.put(evicted.clone(), chunk_of(&desc, 0, 0)).unwrap());
    let _a = cache
        .put(Address::new(1, 0, vec![64]), chunk_of(&desc, 64, 0))
        .unwrap();
    let _b = cache
        .put(Address::new(1, 0, vec![128]), chunk_of(&desc, 128, 0))
        .unwrap();
    let _c = cache
        .put(Address::new(1, 0, vec![192]), chunk_of(&desc, 192, 0))
        .unwrap();

    // pinning the spilled chunk back in needs memory that eviction
    // cannot reclaim
    let err = cache.pin(&evicted).unwrap_err();
    assert!(matches!(err, CacheError::CantAllocateMemory(_)));
}

#[test]
fn test_drop_array_removes_chunks() {
    let desc = big_desc();
    let cache = ChunkCache::new(1 << 20);
    let addr_a = Address::new(1, 0, vec![0]);
    let addr_b = Address::new(2, 0, vec![0]);
    drop(cache.put(addr_a.clone(), chunk_of(&desc, 0, 0)).unwrap());
    drop(cache.put(addr_b.clone(), chunk_of(&desc, 0, 0)).unwrap());

    cache.drop_array(1);
    assert!(cache.pin(&addr_a).unwrap().is_none());
    assert!(cache.pin(&addr_b).unwrap().is_some());
}

#[test]
fn test_addresses_sorted_by_chunk_position() {
    let desc = big_desc();
    let cache = ChunkCache::new(1 << 20);
    for start in [192, 0, 64] {
        drop(
            cache
                .put(Address::new(1, 0, vec![start]), chunk_of(&desc, start, 0))
                .unwrap(),
        );
    }
    let addrs = cache.addresses(1, 0);
    let starts: Vec<i64> = addrs.iter().map(|a| a.coords[0]).collect();
    assert_eq!(starts, vec![0, 64, 192]);
}
