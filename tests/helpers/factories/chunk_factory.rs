use std::sync::Arc;

use crate::engine::array::address::Address;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::{ChunkEncoding, MemChunk};
use crate::engine::types::value::Value;

/// Builds populated chunks for codec and merge tests.
pub struct ChunkFactory {
    desc: Arc<ArrayDesc>,
    attribute_id: u32,
    chunk_pos: Coordinates,
    encoding: ChunkEncoding,
    cells: Vec<(Coordinates, Value)>,
}

impl ChunkFactory {
    pub fn new(desc: Arc<ArrayDesc>) -> Self {
        let chunk_pos = desc.dimensions().iter().map(|d| d.start()).collect();
        Self {
            desc,
            attribute_id: 0,
            chunk_pos,
            encoding: ChunkEncoding::Dense,
            cells: Vec::new(),
        }
    }

    pub fn attribute(mut self, id: u32) -> Self {
        self.attribute_id = id;
        self
    }

    pub fn at(mut self, chunk_pos: Vec<i64>) -> Self {
        self.chunk_pos = chunk_pos;
        self
    }

    pub fn encoding(mut self, encoding: ChunkEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn cell(mut self, pos: Vec<i64>, v: Value) -> Self {
        self.cells.push((pos, v));
        self
    }

    pub fn cells(mut self, cells: impl IntoIterator<Item = (Vec<i64>, Value)>) -> Self {
        self.cells.extend(cells);
        self
    }

    pub fn create(self) -> MemChunk {
        let addr = Address::new(
            self.desc.id(),
            self.attribute_id,
            self.desc.chunk_position_for(&self.chunk_pos),
        );
        let mut chunk =
            MemChunk::new(self.desc.clone(), addr, self.encoding).expect("chunk in bounds");
        {
            let mut writer = chunk.write_iter(IterationMode::NONE);
            for (pos, v) in &self.cells {
                assert!(
                    writer.set_position(pos).expect("set_position"),
                    "cell {:?} outside chunk box",
                    pos
                );
                writer.write_item(v).expect("write_item");
            }
            writer.flush().expect("flush");
        }
        chunk
    }
}
