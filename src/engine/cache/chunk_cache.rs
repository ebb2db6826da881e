use ahash::AHashMap;
use lru::LruCache;
use std::fs::File;
use std::ops::Deref;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex};

use crate::engine::array::address::Address;
use crate::engine::array::descriptor::{ArrayDesc, ArrayId};
use crate::engine::chunk::mem_chunk::MemChunk;
use crate::engine::errors::CacheError;
use crate::shared::config::CONFIG;
use tracing::{debug, trace};

const LOG_TARGET: &str = "engine::cache";

struct SwapSlot {
    offset: u64,
    len: usize,
    checksum: u32,
}

struct CacheEntry {
    desc: Arc<ArrayDesc>,
    pins: u32,
    chunk: Option<Arc<MemChunk>>,
    /// In-memory footprint counted against the threshold.
    size: usize,
    swap: Option<SwapSlot>,
    /// True when the resident bytes differ from the spilled copy.
    stale: bool,
}

struct CacheState {
    entries: AHashMap<Address, CacheEntry>,
    /// Unpinned resident chunks only; the tail is the eviction victim.
    lru: LruCache<Address, ()>,
    used_mem: usize,
    mem_threshold: usize,
    swap: Option<SwapFile>,
}

struct SwapFile {
    file: File,
    tail: u64,
}

/// Shared materialization cache: pin/unpin refcounts, an LRU of unpinned
/// resident chunks, and spill to an anonymous temp file once resident
/// bytes exceed the threshold. Pinned chunks are never evicted.
pub struct ChunkCache {
    state: Mutex<CacheState>,
}

impl ChunkCache {
    pub fn new(mem_threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CacheState {
                entries: AHashMap::new(),
                lru: LruCache::unbounded(),
                used_mem: 0,
                mem_threshold,
                swap: None,
            }),
        })
    }

    pub fn from_config() -> Arc<Self> {
        Self::new(CONFIG.engine.mem_threshold_mb * 1024 * 1024)
    }

    /// Installs (or replaces) a chunk and returns it pinned. Fails with
    /// `CantAllocateMemory` when eviction cannot make room because every
    /// resident chunk is pinned.
    pub fn put(
        self: &Arc<Self>,
        addr: Address,
        chunk: MemChunk,
    ) -> Result<PinnedChunk, CacheError> {
        let desc = chunk.descriptor().clone();
        let size = chunk.byte_size();
        let arc = Arc::new(chunk);
        let mut state = self.state.lock().unwrap();
        state.lru.pop(&addr);
        let old_resident = state
            .entries
            .get(&addr)
            .map_or(0, |e| if e.chunk.is_some() { e.size } else { 0 });
        let old_pins = state.entries.get(&addr).map_or(0, |e| e.pins);
        Self::ensure_capacity(&mut state, size.saturating_sub(old_resident))?;
        let new_mem = state.used_mem - old_resident + size;
        state.used_mem = new_mem;
        state.entries.insert(
            addr.clone(),
            CacheEntry {
                desc,
                pins: old_pins + 1,
                chunk: Some(arc.clone()),
                size,
                swap: None,
                stale: true,
            },
        );
        if state.used_mem > state.mem_threshold {
            Self::swap_out(&mut state)?;
        }
        drop(state);
        Ok(PinnedChunk {
            cache: self.clone(),
            addr,
            chunk: arc,
        })
    }

    /// Pins a cached chunk, reading it back from the swap file when it was
    /// evicted. Returns `None` for unknown addresses.
    pub fn pin(self: &Arc<Self>, addr: &Address) -> Result<Option<PinnedChunk>, CacheError> {
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(addr) {
            return Ok(None);
        }

        let needs_load = {
            let entry = state.entries.get(addr).unwrap();
            entry.chunk.is_none()
        };
        if needs_load {
            let incoming = state.entries.get(addr).unwrap().size;
            Self::ensure_capacity(&mut state, incoming)?;
            let loaded = {
                let entry = state.entries.get(addr).unwrap();
                let slot = entry.swap.as_ref().ok_or(CacheError::CorruptSpill)?;
                let swap = state.swap.as_ref().ok_or(CacheError::CorruptSpill)?;
                let mut buf = vec![0u8; slot.len];
                swap.file.read_exact_at(&mut buf, slot.offset)?;
                if crc32fast::hash(&buf) != slot.checksum {
                    return Err(CacheError::CorruptSpill);
                }
                let chunk = MemChunk::decode(entry.desc.clone(), addr.clone(), &buf)
                    .map_err(|_| CacheError::CorruptSpill)?;
                trace!(target: LOG_TARGET, addr = ?addr, bytes = slot.len, "Swapped chunk in");
                Arc::new(chunk)
            };
            let size = {
                let entry = state.entries.get_mut(addr).unwrap();
                entry.chunk = Some(loaded);
                entry.stale = false;
                entry.size
            };
            state.used_mem += size;
        }

        let (arc, first_pin) = {
            let entry = state.entries.get_mut(addr).unwrap();
            entry.pins += 1;
            (entry.chunk.clone().unwrap(), entry.pins == 1)
        };
        if first_pin {
            state.lru.pop(addr);
        }
        drop(state);
        Ok(Some(PinnedChunk {
            cache: self.clone(),
            addr: addr.clone(),
            chunk: arc,
        }))
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.state.lock().unwrap().entries.contains_key(addr)
    }

    /// Drops every chunk of one array; used by rollback.
    pub fn drop_array(&self, array_id: ArrayId) {
        let mut state = self.state.lock().unwrap();
        let doomed: Vec<Address> = state
            .entries
            .keys()
            .filter(|a| a.array_id == array_id)
            .cloned()
            .collect();
        for addr in doomed {
            if let Some(entry) = state.entries.remove(&addr) {
                if entry.chunk.is_some() {
                    state.used_mem -= entry.size;
                }
            }
            state.lru.pop(&addr);
        }
        debug!(target: LOG_TARGET, array_id, "Dropped array chunks from cache");
    }

    /// Addresses cached for one attribute of one array, in chunk order.
    pub fn addresses(&self, array_id: ArrayId, attribute_id: u32) -> Vec<Address> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<Address> = state
            .entries
            .keys()
            .filter(|a| a.array_id == array_id && a.attribute_id == attribute_id)
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub fn used_mem(&self) -> usize {
        self.state.lock().unwrap().used_mem
    }

    pub fn resident_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.chunk.is_some())
            .count()
    }

    fn unpin(&self, addr: &Address) {
        let mut state = self.state.lock().unwrap();
        let became_idle = {
            let Some(entry) = state.entries.get_mut(addr) else {
                return;
            };
            debug_assert!(entry.pins > 0);
            entry.pins -= 1;
            entry.pins == 0 && entry.chunk.is_some()
        };
        if became_idle {
            state.lru.push(addr.clone(), ());
            if state.used_mem > state.mem_threshold {
                // spill failures surface on the next pin; eviction itself
                // runs on the release path and has no caller to fail
                if let Err(e) = Self::swap_out(&mut state) {
                    debug!(target: LOG_TARGET, error = %e, "Chunk spill failed on unpin");
                }
            }
        }
    }

    /// Makes room for `incoming` bytes before an allocation. Eviction can
    /// only reclaim unpinned residents; when it runs dry with resident
    /// bytes still over the threshold, everything left is pinned and the
    /// allocation fails. One allocation may overshoot the threshold (the
    /// largest-single-pin allowance); the next one pays for it.
    fn ensure_capacity(state: &mut CacheState, incoming: usize) -> Result<(), CacheError> {
        if incoming == 0 || state.used_mem + incoming <= state.mem_threshold {
            return Ok(());
        }
        Self::swap_out(state)?;
        if state.used_mem > state.mem_threshold {
            return Err(CacheError::CantAllocateMemory(incoming));
        }
        Ok(())
    }

    /// Evicts LRU-tail chunks until resident bytes drop below the
    /// threshold, appending payloads to the swap file when the on-file
    /// copy is missing or stale.
    fn swap_out(state: &mut CacheState) -> Result<(), CacheError> {
        while state.used_mem > state.mem_threshold {
            let Some((victim, _)) = state.lru.pop_lru() else {
                break;
            };
            if state.swap.is_none() {
                state.swap = Some(SwapFile {
                    file: tempfile::tempfile()?,
                    tail: 0,
                });
            }
            let (chunk, needs_write, size) = {
                let entry = state.entries.get_mut(&victim).unwrap();
                debug_assert!(entry.pins == 0);
                let chunk = entry.chunk.take().expect("lru entries are resident");
                (chunk, entry.swap.is_none() || entry.stale, entry.size)
            };
            if needs_write {
                let bytes = chunk.encode();
                let slot = {
                    let swap = state.swap.as_mut().unwrap();
                    let offset = swap.tail;
                    swap.file.write_all_at(&bytes, offset)?;
                    swap.tail += bytes.len() as u64;
                    SwapSlot {
                        offset,
                        len: bytes.len(),
                        checksum: crc32fast::hash(&bytes),
                    }
                };
                let entry = state.entries.get_mut(&victim).unwrap();
                entry.swap = Some(slot);
                entry.stale = false;
                trace!(target: LOG_TARGET, addr = ?victim, bytes = bytes.len(), "Spilled chunk");
            }
            state.used_mem -= size;
        }
        Ok(())
    }
}

/// Scoped pin. The chunk stays memory-resident until the handle drops.
pub struct PinnedChunk {
    cache: Arc<ChunkCache>,
    addr: Address,
    chunk: Arc<MemChunk>,
}

impl std::fmt::Debug for PinnedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedChunk")
            .field("addr", &self.addr)
            .field("chunk", &self.chunk)
            .finish()
    }
}

impl PinnedChunk {
    pub fn address(&self) -> &Address {
        &self.addr
    }

    pub fn chunk(&self) -> &Arc<MemChunk> {
        &self.chunk
    }
}

impl Deref for PinnedChunk {
    type Target = MemChunk;

    fn deref(&self) -> &MemChunk {
        &self.chunk
    }
}

impl Drop for PinnedChunk {
    fn drop(&mut self) {
        self.cache.unpin(&self.addr);
    }
}
