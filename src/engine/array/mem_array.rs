use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::array::address::Address;
use crate::engine::array::attribute::AttributeId;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::{Array, ChunkRef, ConstArrayIterator};
use crate::engine::cache::chunk_cache::{ChunkCache, PinnedChunk};
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::{ChunkEncoding, MemChunk};
use crate::engine::errors::{ChunkError, ExecutionError};

/// Transient arrays get ids from a high counter so they never collide
/// with catalog-assigned ids.
static NEXT_TRANSIENT_ID: AtomicU64 = AtomicU64::new(1 << 40);

pub fn next_transient_array_id() -> u64 {
    NEXT_TRANSIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// An array whose chunks live in the shared materialization cache.
pub struct MemArray {
    desc: Arc<ArrayDesc>,
    cache: Arc<ChunkCache>,
}

impl MemArray {
    pub fn new(mut desc: ArrayDesc, cache: Arc<ChunkCache>) -> Self {
        if desc.id() == 0 {
            desc.set_id(next_transient_array_id());
        }
        Self {
            desc: Arc::new(desc),
            cache,
        }
    }

    pub fn with_shared_desc(desc: Arc<ArrayDesc>, cache: Arc<ChunkCache>) -> Self {
        debug_assert!(desc.id() != 0, "shared descriptors must carry an id");
        Self { desc, cache }
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// A fresh chunk for `pos` (aligned down to the chunk grid), ready for
    /// a write iterator. Install it with [`MemArray::install`].
    pub fn new_chunk(
        &self,
        attribute_id: AttributeId,
        pos: &Coordinates,
        encoding: ChunkEncoding,
    ) -> Result<MemChunk, ExecutionError> {
        if !self.desc.contains(pos) {
            return Err(ChunkError::OutOfBoundaries.into());
        }
        let chunk_pos = self.desc.chunk_position_for(pos);
        let addr = Address::new(self.desc.id(), attribute_id, chunk_pos);
        Ok(MemChunk::new(self.desc.clone(), addr, encoding).map_err(ExecutionError::from)?)
    }

    pub fn install(&self, chunk: MemChunk) -> Result<PinnedChunk, ExecutionError> {
        let addr = chunk.address().clone();
        Ok(self.cache.put(addr, chunk)?)
    }

    /// Pins the chunk at `addr` and clones it for update; the caller
    /// installs the merged result back.
    pub fn chunk_for_update(&self, addr: &Address) -> Result<Option<MemChunk>, ExecutionError> {
        Ok(self.cache.pin(addr)?.map(|p| (*p.chunk().as_ref()).clone()))
    }

    pub fn has_chunk(&self, attribute_id: AttributeId, chunk_pos: &Coordinates) -> bool {
        self.cache
            .contains(&Address::new(self.desc.id(), attribute_id, chunk_pos.clone()))
    }

    /// Copies every chunk of `input` into this array. Both arrays must
    /// share dimensions and attribute count.
    pub fn append(&self, input: &dyn Array) -> Result<(), ExecutionError> {
        let in_desc = input.descriptor();
        for attr in in_desc.attributes() {
            let mut it = input.const_iterator(attr.id())?;
            while !it.end() {
                let src = it.chunk()?;
                let pos = src.address().coords.clone();
                let mut dst = self.new_chunk(attr.id(), &pos, src.encoding())?;
                copy_cells(&src, &mut dst)?;
                self.install(dst)?;
                it.advance()?;
            }
        }
        Ok(())
    }
}

/// Copies every visible cell of `src` into `dst` through iterators.
pub fn copy_cells(src: &MemChunk, dst: &mut MemChunk) -> Result<(), ExecutionError> {
    let mut reader = src.read_iter(IterationMode::NONE);
    let mut writer = dst.write_iter(IterationMode::APPEND_CHUNK);
    while !reader.end() {
        let pos = reader.position().map_err(ChunkError::from)?;
        if !writer.set_position(&pos).map_err(ChunkError::from)? {
            return Err(ExecutionError::OperationFailed(
                "copy target does not cover source cell".to_string(),
            ));
        }
        let v = reader.item().map_err(ChunkError::from)?.clone();
        writer.write_item(&v).map_err(ChunkError::from)?;
        reader.advance().map_err(ChunkError::from)?;
    }
    writer.flush().map_err(ChunkError::from)?;
    Ok(())
}

impl Array for MemArray {
    fn descriptor(&self) -> Arc<ArrayDesc> {
        self.desc.clone()
    }

    fn const_iterator(
        &self,
        attribute_id: AttributeId,
    ) -> Result<Box<dyn ConstArrayIterator + '_>, ExecutionError> {
        Ok(Box::new(MemArrayIterator::new(self, attribute_id)))
    }
}

/// Iterates one attribute's chunks in chunk-position order, pinning the
/// current chunk on access.
pub struct MemArrayIterator<'a> {
    array: &'a MemArray,
    attribute_id: AttributeId,
    addresses: Vec<Address>,
    index: usize,
}

impl<'a> MemArrayIterator<'a> {
    fn new(array: &'a MemArray, attribute_id: AttributeId) -> Self {
        let addresses = array.cache.addresses(array.desc.id(), attribute_id);
        Self {
            array,
            attribute_id,
            addresses,
            index: 0,
        }
    }
}

impl ConstArrayIterator for MemArrayIterator<'_> {
    fn end(&self) -> bool {
        self.index >= self.addresses.len()
    }

    fn advance(&mut self) -> Result<(), ExecutionError> {
        if self.end() {
            return Err(ExecutionError::NoCurrentChunk);
        }
        self.index += 1;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.addresses = self
            .array
            .cache
            .addresses(self.array.desc.id(), self.attribute_id);
        self.index = 0;
        Ok(())
    }

    fn set_position(&mut self, pos: &Coordinates) -> Result<bool, ExecutionError> {
        let chunk_pos = self.array.desc.chunk_position_for(pos);
        match self.addresses.iter().position(|a| a.coords == chunk_pos) {
            Some(i) => {
                self.index = i;
                Ok(true)
            }
            None => {
                self.index = self.addresses.len();
                Ok(false)
            }
        }
    }

    fn position(&self) -> Result<Coordinates, ExecutionError> {
        self.addresses
            .get(self.index)
            .map(|a| a.coords.clone())
            .ok_or(ExecutionError::NoCurrentChunk)
    }

    fn chunk(&self) -> Result<ChunkRef, ExecutionError> {
        let addr = self
            .addresses
            .get(self.index)
            .ok_or(ExecutionError::NoCurrentChunk)?;
        let pinned = self
            .array
            .cache
            .pin(addr)?
            .ok_or(ExecutionError::NoCurrentChunk)?;
        Ok(ChunkRef::Pinned(pinned))
    }
}
