use std::ops::Deref;
use std::sync::Arc;

use crate::engine::array::attribute::AttributeId;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::cache::chunk_cache::PinnedChunk;
use crate::engine::chunk::mem_chunk::MemChunk;
use crate::engine::errors::ExecutionError;

pub type ArrayRef = Arc<dyn Array>;

/// A readable chunk handed out by an array iterator: either a pinned cache
/// resident or a chunk the iterator materialized on the fly.
pub enum ChunkRef {
    Pinned(PinnedChunk),
    Owned(Arc<MemChunk>),
}

impl ChunkRef {
    pub fn to_arc(&self) -> Arc<MemChunk> {
        match self {
            ChunkRef::Pinned(p) => p.chunk().clone(),
            ChunkRef::Owned(c) => c.clone(),
        }
    }
}

impl Deref for ChunkRef {
    type Target = MemChunk;

    fn deref(&self) -> &MemChunk {
        match self {
            ChunkRef::Pinned(p) => p,
            ChunkRef::Owned(c) => c,
        }
    }
}

/// An ordered collection of attributes over a dimension space, iterable
/// one attribute at a time in chunk-position order.
pub trait Array: Send + Sync {
    fn descriptor(&self) -> Arc<ArrayDesc>;

    fn const_iterator(
        &self,
        attribute_id: AttributeId,
    ) -> Result<Box<dyn ConstArrayIterator + '_>, ExecutionError>;
}

/// Per-attribute iterator over an array's chunks, ordered by chunk
/// position (dimension-major). `Send` because scatter/gather holds open
/// iterators across network sends.
pub trait ConstArrayIterator: Send {
    fn end(&self) -> bool;

    fn advance(&mut self) -> Result<(), ExecutionError>;

    fn reset(&mut self) -> Result<(), ExecutionError>;

    /// Positions on the chunk containing `pos`, if the array has one.
    fn set_position(&mut self, pos: &Coordinates) -> Result<bool, ExecutionError>;

    /// First position (without overlap) of the current chunk.
    fn position(&self) -> Result<Coordinates, ExecutionError>;

    fn chunk(&self) -> Result<ChunkRef, ExecutionError>;
}
