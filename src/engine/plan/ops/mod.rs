pub mod aggregate;
pub mod build;
pub mod ddl;
pub mod filter_apply;
pub mod join;
pub mod scan;
pub mod sg;
pub mod store;

use ahash::AHashMap;
use std::sync::Arc;

use crate::engine::array::attribute::AttributeId;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::iterator::{Array, ConstArrayIterator};
use crate::engine::array::mem_array::MemArray;
use crate::engine::cache::chunk_cache::ChunkCache;
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::ChunkEncoding;
use crate::engine::errors::{ChunkError, ExecutionError, QueryError};
use crate::engine::plan::operator_library::OperatorLibrary;
use crate::engine::types::value::Value;

pub fn register_builtin(lib: &mut OperatorLibrary) {
    build::register(lib);
    scan::register(lib);
    store::register(lib);
    filter_apply::register(lib);
    join::register(lib);
    aggregate::register(lib);
    sg::register(lib);
    ddl::register(lib);
}

/// Accumulates cell writes grouped by chunk, then flushes whole chunks
/// into the target array. The workhorse of every materializing operator.
pub(crate) struct ArrayWriter {
    array: Arc<MemArray>,
    encoding: ChunkEncoding,
    staged: AHashMap<(AttributeId, Coordinates), Vec<(Coordinates, Value)>>,
}

impl ArrayWriter {
    pub fn new(desc: ArrayDesc, cache: Arc<ChunkCache>) -> Self {
        Self {
            array: Arc::new(MemArray::new(desc, cache)),
            encoding: ChunkEncoding::default_for_writes(),
            staged: AHashMap::new(),
        }
    }

    pub fn descriptor(&self) -> Arc<ArrayDesc> {
        self.array.descriptor()
    }

    pub fn write(&mut self, attribute_id: AttributeId, coords: Coordinates, value: Value) {
        let chunk_pos = self.array.descriptor().chunk_position_for(&coords);
        self.staged
            .entry((attribute_id, chunk_pos))
            .or_default()
            .push((coords, value));
    }

    /// Builds, fills and installs every staged chunk.
    pub fn finish(self) -> Result<Arc<MemArray>, QueryError> {
        for ((attribute_id, chunk_pos), cells) in self.staged {
            let mut chunk = self
                .array
                .new_chunk(attribute_id, &chunk_pos, self.encoding)?;
            {
                let mut writer = chunk.write_iter(IterationMode::NONE);
                for (coords, value) in &cells {
                    if !writer.set_position(coords).map_err(ChunkError::from)? {
                        return Err(ExecutionError::OperationFailed(
                            "staged cell outside its chunk".to_string(),
                        )
                        .into());
                    }
                    writer.write_item(value).map_err(ChunkError::from)?;
                }
                writer.flush().map_err(ChunkError::from)?;
            }
            self.array.install(chunk)?;
        }
        Ok(self.array)
    }
}

/// Visits every visible cell of the array, handing the callback the cell
/// coordinates and the values of all data attributes.
pub(crate) fn for_each_cell<F>(input: &dyn Array, mut f: F) -> Result<(), QueryError>
where
    F: FnMut(&Coordinates, &[Value]) -> Result<(), QueryError>,
{
    let desc = input.descriptor();
    let attr_ids: Vec<AttributeId> = desc.data_attributes().map(|a| a.id()).collect();
    if attr_ids.is_empty() {
        return Ok(());
    }
    let mut lead = input.const_iterator(attr_ids[0])?;
    let mut others: Vec<Box<dyn ConstArrayIterator + '_>> = attr_ids[1..]
        .iter()
        .map(|id| input.const_iterator(*id))
        .collect::<Result<_, _>>()?;

    while !lead.end() {
        let lead_chunk = lead.chunk()?;
        let chunk_pos = lead.position()?;
        let mut other_chunks = Vec::with_capacity(others.len());
        for it in others.iter_mut() {
            if !it.set_position(&chunk_pos)? {
                return Err(ExecutionError::OperationFailed(
                    "attribute chunks out of step".to_string(),
                )
                .into());
            }
            other_chunks.push(it.chunk()?);
        }

        let mode = IterationMode::IGNORE_EMPTY_CELLS | IterationMode::IGNORE_OVERLAPS;
        let mut cursor = lead_chunk.read_iter(mode);
        let mut other_cursors: Vec<_> = other_chunks
            .iter()
            .map(|c| c.read_iter(IterationMode::NO_EMPTY_CHECK))
            .collect();
        let tile_cells =
            crate::engine::chunk::iterator::max_tile_size(lead_chunk.layout().logical_size);
        while !cursor.end() {
            let tile = cursor.next_tile(tile_cells).map_err(ChunkError::from)?;
            for (coords, lead_value) in tile {
                let mut values = Vec::with_capacity(attr_ids.len());
                values.push(lead_value);
                for oc in other_cursors.iter_mut() {
                    if !oc.set_position(&coords).map_err(ChunkError::from)? {
                        return Err(ExecutionError::OperationFailed(
                            "attribute cell missing".to_string(),
                        )
                        .into());
                    }
                    values.push(oc.item().map_err(ChunkError::from)?.clone());
                }
                f(&coords, &values)?;
            }
        }
        lead.advance()?;
    }
    Ok(())
}

/// An empty result array for operators with nothing to emit locally.
pub(crate) fn empty_array(desc: &ArrayDesc, cache: Arc<ChunkCache>) -> Arc<MemArray> {
    Arc::new(MemArray::new(desc.clone().with_id(0), cache))
}
