use std::sync::Arc;

use crate::engine::array::address::Address;
use crate::engine::array::attribute::AttributeId;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::{Array, ChunkRef, ConstArrayIterator};
use crate::engine::array::mem_array::copy_cells;
use crate::engine::chunk::mem_chunk::MemChunk;
use crate::engine::errors::{ChunkError, ExecutionError};

/// Presents an input array under a different descriptor (rename, new
/// version id). A delegate chunk clones the input payload when the shapes
/// and attribute layouts agree; otherwise it materializes the chunk by
/// iterating cells into the new descriptor.
pub struct DelegateArray {
    desc: Arc<ArrayDesc>,
    input: Arc<dyn Array>,
    clone_fast_path: bool,
}

impl DelegateArray {
    pub fn new(desc: Arc<ArrayDesc>, input: Arc<dyn Array>) -> Self {
        let in_desc = input.descriptor();
        let clone_fast_path = desc.same_shape(&in_desc)
            && desc.attributes().len() == in_desc.attributes().len()
            && desc
                .attributes()
                .iter()
                .zip(in_desc.attributes().iter())
                .all(|(a, b)| {
                    a.type_id() == b.type_id()
                        && a.is_nullable() == b.is_nullable()
                        && a.is_empty_indicator() == b.is_empty_indicator()
                });
        Self {
            desc,
            input,
            clone_fast_path,
        }
    }

    fn adopt_chunk(&self, src: &MemChunk) -> Result<MemChunk, ExecutionError> {
        let addr = Address::new(
            self.desc.id(),
            src.address().attribute_id,
            src.address().coords.clone(),
        );
        if self.clone_fast_path {
            let mut out = src.clone();
            out.readdress(self.desc.clone(), addr)?;
            return Ok(out);
        }
        let mut out = MemChunk::new(self.desc.clone(), addr, src.encoding())
            .map_err(ExecutionError::from)?;
        copy_cells(src, &mut out)?;
        Ok(out)
    }
}

impl Array for DelegateArray {
    fn descriptor(&self) -> Arc<ArrayDesc> {
        self.desc.clone()
    }

    fn const_iterator(
        &self,
        attribute_id: AttributeId,
    ) -> Result<Box<dyn ConstArrayIterator + '_>, ExecutionError> {
        Ok(Box::new(DelegateArrayIterator {
            delegate: self,
            inner: self.input.const_iterator(attribute_id)?,
        }))
    }
}

struct DelegateArrayIterator<'a> {
    delegate: &'a DelegateArray,
    inner: Box<dyn ConstArrayIterator + 'a>,
}

impl ConstArrayIterator for DelegateArrayIterator<'_> {
    fn end(&self) -> bool {
        self.inner.end()
    }

    fn advance(&mut self) -> Result<(), ExecutionError> {
        self.inner.advance()
    }

    fn reset(&mut self) -> Result<(), ExecutionError> {
        self.inner.reset()
    }

    fn set_position(&mut self, pos: &Coordinates) -> Result<bool, ExecutionError> {
        self.inner.set_position(pos)
    }

    fn position(&self) -> Result<Coordinates, ExecutionError> {
        self.inner.position()
    }

    fn chunk(&self) -> Result<ChunkRef, ExecutionError> {
        let src = self.inner.chunk()?;
        let adopted = self.delegate.adopt_chunk(&src)?;
        Ok(ChunkRef::Owned(Arc::new(adopted)))
    }
}

impl MemChunk {
    /// Rebinds a cloned chunk to a new descriptor and address without
    /// touching the payload. Valid only when the shapes agree.
    pub(crate) fn readdress(
        &mut self,
        desc: Arc<ArrayDesc>,
        addr: Address,
    ) -> Result<(), ChunkError> {
        if !desc.same_shape(self.descriptor()) {
            return Err(ChunkError::IllegalOperation(
                "readdress requires matching chunk shapes",
            ));
        }
        self.set_identity(desc, addr);
        Ok(())
    }
}
