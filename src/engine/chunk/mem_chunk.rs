use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::array::address::Address;
use crate::engine::array::coordinates::{
    Coordinates, CoordinatesMapper, box_cells, box_contains, odometer_step,
};
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::chunk::dense::DenseBody;
use crate::engine::chunk::empty_bitmap::EmptyBitmap;
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::rle::RleBody;
use crate::engine::chunk::sparse::SparseBody;
use crate::engine::errors::ChunkError;
use crate::engine::types::type_registry::TYPES;
use crate::engine::types::value::{Value, default_for};
use crate::shared::config::CONFIG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkEncoding {
    Dense = 0,
    Sparse = 1,
    Rle = 2,
}

impl ChunkEncoding {
    fn from_u8(v: u8) -> Result<Self, ChunkError> {
        match v {
            0 => Ok(ChunkEncoding::Dense),
            1 => Ok(ChunkEncoding::Sparse),
            2 => Ok(ChunkEncoding::Rle),
            _ => Err(ChunkError::Corrupt("unknown encoding tag")),
        }
    }

    /// Encoding for freshly written chunks, per runtime configuration.
    pub fn default_for_writes() -> Self {
        if CONFIG.engine.rle_chunk_format {
            ChunkEncoding::Rle
        } else {
            ChunkEncoding::Dense
        }
    }
}

/// Cell layout shared by every codec of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    pub elem_size: usize,
    pub packed_bool: bool,
    pub var_sized: bool,
    pub nullable: bool,
    pub default_value: Value,
    pub mapper: CoordinatesMapper,
    pub logical_size: u64,
    /// Sparse chunks denser than this rewrite as dense on flush;
    /// >= 1.0 disables promotion.
    pub dense_threshold: f64,
}

impl ChunkLayout {
    pub fn new(desc: &ArrayDesc, addr: &Address) -> Result<Self, ChunkError> {
        let attr = desc
            .attribute(addr.attribute_id)
            .ok_or(ChunkError::IllegalOperation("unknown attribute id"))?;
        let ty = TYPES.get(attr.type_id())?;
        let default_value = attr
            .declared_default()
            .cloned()
            .unwrap_or_else(|| default_for(ty));
        let mapper = CoordinatesMapper::new(desc, &addr.coords);
        let logical_size = mapper.logical_size();
        Ok(Self {
            elem_size: ty.byte_size(),
            packed_bool: ty.is_bool(),
            var_sized: ty.is_variable(),
            nullable: attr.is_nullable(),
            default_value,
            mapper,
            logical_size,
            dense_threshold: CONFIG.engine.dense_chunk_threshold,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkBody {
    Dense(DenseBody),
    Sparse(SparseBody),
    Rle(RleBody),
}

impl ChunkBody {
    fn new(encoding: ChunkEncoding, layout: &ChunkLayout) -> Self {
        match encoding {
            ChunkEncoding::Dense => ChunkBody::Dense(DenseBody::new(layout)),
            ChunkEncoding::Sparse => ChunkBody::Sparse(SparseBody::new(layout)),
            ChunkEncoding::Rle => ChunkBody::Rle(RleBody::new(layout)),
        }
    }

    pub fn encoding(&self) -> ChunkEncoding {
        match self {
            ChunkBody::Dense(_) => ChunkEncoding::Dense,
            ChunkBody::Sparse(_) => ChunkEncoding::Sparse,
            ChunkBody::Rle(_) => ChunkEncoding::Rle,
        }
    }

    fn read_value(&self, layout: &ChunkLayout, pos: u64) -> Value {
        match self {
            ChunkBody::Dense(b) => b.read_value(layout, pos),
            ChunkBody::Sparse(b) => b.read_value(layout, pos),
            ChunkBody::Rle(b) => b.read_value(layout, pos),
        }
    }

    fn null_reason_at(&self, layout: &ChunkLayout, pos: u64) -> Option<u8> {
        match self {
            ChunkBody::Dense(b) => b.read_value(layout, pos).missing_reason(),
            ChunkBody::Sparse(b) => b.null_reason_at(pos),
            ChunkBody::Rle(b) => b.null_reason_at(pos),
        }
    }

    fn is_default(&self, layout: &ChunkLayout, pos: u64) -> bool {
        match self {
            ChunkBody::Dense(b) => b.is_default(layout, pos),
            ChunkBody::Sparse(b) => !b.contains(pos),
            ChunkBody::Rle(b) => {
                let v = b.read_value(layout, pos);
                values_equal(&v, &layout.default_value)
            }
        }
    }

    /// Next position with a stored (non-default) cell; identity for dense.
    fn next_stored(&self, pos: u64) -> Option<u64> {
        match self {
            ChunkBody::Dense(_) => Some(pos),
            ChunkBody::Sparse(b) => b.next_stored(pos),
            ChunkBody::Rle(b) => b.next_stored(pos),
        }
    }

    fn encode(&self, layout: &ChunkLayout) -> Vec<u8> {
        match self {
            ChunkBody::Dense(b) => b.encode(),
            ChunkBody::Sparse(b) => b.encode(layout),
            ChunkBody::Rle(b) => b.encode(),
        }
    }

    fn decode(encoding: ChunkEncoding, data: &[u8]) -> Result<Self, ChunkError> {
        Ok(match encoding {
            ChunkEncoding::Dense => ChunkBody::Dense(DenseBody::decode(data)?),
            ChunkEncoding::Sparse => ChunkBody::Sparse(SparseBody::decode(data)?),
            ChunkEncoding::Rle => ChunkBody::Rle(RleBody::decode(data)?),
        })
    }

    pub fn byte_size(&self) -> usize {
        match self {
            ChunkBody::Dense(b) => b.byte_size(),
            ChunkBody::Sparse(b) => b.byte_size(),
            ChunkBody::Rle(b) => b.byte_size(),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.missing_reason(), b.missing_reason()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a.data() == b.data(),
        _ => false,
    }
}

/// One materialized chunk of one attribute.
#[derive(Debug, Clone)]
pub struct MemChunk {
    addr: Address,
    desc: Arc<ArrayDesc>,
    layout: ChunkLayout,
    first_pos: Coordinates,
    last_pos: Coordinates,
    first_pos_overlap: Coordinates,
    last_pos_overlap: Coordinates,
    count: Option<u64>,
    empty_bits: Option<EmptyBitmap>,
    body: ChunkBody,
}

impl MemChunk {
    pub fn new(
        desc: Arc<ArrayDesc>,
        addr: Address,
        encoding: ChunkEncoding,
    ) -> Result<Self, ChunkError> {
        if !desc.contains(&addr.coords) {
            return Err(ChunkError::OutOfBoundaries);
        }
        let layout = ChunkLayout::new(&desc, &addr)?;
        let first_pos = addr.coords.clone();
        let last_pos = desc.chunk_last_position(&addr.coords, false);
        let first_pos_overlap = desc.chunk_first_position(&addr.coords, true);
        let last_pos_overlap = desc.chunk_last_position(&addr.coords, true);
        let empty_bits = desc.empty_bitmap_attribute().map(|_| match encoding {
            ChunkEncoding::Rle => EmptyBitmap::runs(layout.logical_size),
            _ => EmptyBitmap::bits(layout.logical_size),
        });
        let body = ChunkBody::new(encoding, &layout);
        Ok(Self {
            addr,
            desc,
            layout,
            first_pos,
            last_pos,
            first_pos_overlap,
            last_pos_overlap,
            count: None,
            empty_bits,
            body,
        })
    }

    pub fn address(&self) -> &Address {
        &self.addr
    }

    pub fn descriptor(&self) -> &Arc<ArrayDesc> {
        &self.desc
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn encoding(&self) -> ChunkEncoding {
        self.body.encoding()
    }

    pub fn is_sparse(&self) -> bool {
        self.encoding() == ChunkEncoding::Sparse
    }

    pub fn is_rle(&self) -> bool {
        self.encoding() == ChunkEncoding::Rle
    }

    pub fn body(&self) -> &ChunkBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut ChunkBody {
        &mut self.body
    }

    pub fn empty_bitmap(&self) -> Option<&EmptyBitmap> {
        self.empty_bits.as_ref()
    }

    pub(crate) fn empty_bitmap_mut(&mut self) -> Option<&mut EmptyBitmap> {
        self.empty_bits.as_mut()
    }

    pub fn first_position(&self, with_overlap: bool) -> &Coordinates {
        if with_overlap {
            &self.first_pos_overlap
        } else {
            &self.first_pos
        }
    }

    pub fn last_position(&self, with_overlap: bool) -> &Coordinates {
        if with_overlap {
            &self.last_pos_overlap
        } else {
            &self.last_pos
        }
    }

    pub fn contains(&self, pos: &Coordinates, with_overlap: bool) -> bool {
        box_contains(
            self.first_position(with_overlap),
            self.last_position(with_overlap),
            pos,
        )
    }

    /// A chunk with no bitmap, no nulls, no overlap and fixed-size cells:
    /// eligible for strided memory copies.
    pub fn is_plain(&self) -> bool {
        self.encoding() == ChunkEncoding::Dense
            && self.empty_bits.is_none()
            && !self.layout.nullable
            && !self.layout.var_sized
            && !self.layout.packed_bool
            && !self.desc.has_overlap()
    }

    /// Cached element count, computing it on first use.
    pub fn count(&self) -> u64 {
        if let Some(c) = self.count {
            return c;
        }
        match (&self.body, &self.empty_bits) {
            (ChunkBody::Rle(b), _) => b.count(),
            (_, Some(bm)) => bm.count(),
            _ => box_cells(&self.first_pos, &self.last_pos),
        }
    }

    pub fn set_count(&mut self, count: Option<u64>) {
        self.count = count;
    }

    pub fn set_dense_threshold(&mut self, threshold: f64) {
        self.layout.dense_threshold = threshold;
    }

    /// Rebinds descriptor and address, recomputing the bounding boxes.
    /// Callers guarantee the chunk shapes agree.
    pub(crate) fn set_identity(&mut self, desc: Arc<ArrayDesc>, addr: Address) {
        self.first_pos = addr.coords.clone();
        self.last_pos = desc.chunk_last_position(&addr.coords, false);
        self.first_pos_overlap = desc.chunk_first_position(&addr.coords, true);
        self.last_pos_overlap = desc.chunk_last_position(&addr.coords, true);
        self.desc = desc;
        self.addr = addr;
    }

    pub fn byte_size(&self) -> usize {
        self.body.byte_size()
    }

    pub fn read_iter(&self, mode: IterationMode) -> ReadCursor<'_> {
        ReadCursor::new(self, mode)
    }

    pub fn write_iter(&mut self, mode: IterationMode) -> WriteCursor<'_> {
        WriteCursor::new(self, mode)
    }

    /// Re-encoded copy; the original chunk is unchanged.
    pub fn materialize_as(&self, encoding: ChunkEncoding) -> Result<MemChunk, ChunkError> {
        let mut out = MemChunk::new(self.desc.clone(), self.addr.clone(), encoding)?;
        {
            let mut writer = out.write_iter(IterationMode::APPEND_CHUNK);
            let mut reader = self.read_iter(IterationMode::NONE);
            while !reader.end() {
                let pos = reader.position()?;
                let v = reader.item()?.clone();
                if !writer.set_position(&pos)? {
                    return Err(ChunkError::OperationFailed("set_position"));
                }
                writer.write_item(&v)?;
                reader.advance()?;
            }
            writer.flush()?;
        }
        Ok(out)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(1u8); // format version
        buf.push(self.encoding() as u8);
        buf.push(self.empty_bits.is_some() as u8);
        buf.push(0u8);
        buf.extend_from_slice(&self.count.unwrap_or(u64::MAX).to_le_bytes());
        let body = self.body.encode(&self.layout);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        if let Some(bm) = &self.empty_bits {
            encode_bitmap(&mut buf, bm);
        }
        buf
    }

    pub fn decode(desc: Arc<ArrayDesc>, addr: Address, data: &[u8]) -> Result<Self, ChunkError> {
        if data.len() < 16 {
            return Err(ChunkError::Corrupt("chunk header truncated"));
        }
        if data[0] != 1 {
            return Err(ChunkError::Corrupt("unknown chunk format version"));
        }
        let encoding = ChunkEncoding::from_u8(data[1])?;
        let has_bitmap = data[2] != 0;
        let raw_count = u64::from_le_bytes(data[4..12].try_into().unwrap());
        let body_len = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
        if data.len() < 16 + body_len {
            return Err(ChunkError::Corrupt("chunk body truncated"));
        }
        let body = ChunkBody::decode(encoding, &data[16..16 + body_len])?;
        let empty_bits = if has_bitmap {
            Some(decode_bitmap(&data[16 + body_len..])?)
        } else {
            None
        };
        let mut chunk = MemChunk::new(desc, addr, encoding)?;
        chunk.body = body;
        chunk.empty_bits = empty_bits;
        chunk.count = (raw_count != u64::MAX).then_some(raw_count);
        Ok(chunk)
    }

    fn box_for_mode(&self, mode: IterationMode) -> (Coordinates, Coordinates) {
        let with_overlap = !mode.has(IterationMode::IGNORE_OVERLAPS);
        (
            self.first_position(with_overlap).clone(),
            self.last_position(with_overlap).clone(),
        )
    }

    fn visible(&self, mode: IterationMode, pos: u64) -> bool {
        if !mode.has(IterationMode::NO_EMPTY_CHECK) {
            if let Some(bm) = &self.empty_bits {
                if !bm.is_set(pos) {
                    return false;
                }
            }
        }
        if mode.has(IterationMode::IGNORE_NULL_VALUES)
            && self.body.null_reason_at(&self.layout, pos).is_some()
        {
            return false;
        }
        if mode.has(IterationMode::IGNORE_DEFAULT_VALUES)
            && self.body.is_default(&self.layout, pos)
        {
            return false;
        }
        true
    }

    /// Next visible linear position at or after `from`, constrained to the
    /// mode-selected box.
    fn next_visible(
        &self,
        mode: IterationMode,
        first: &Coordinates,
        last: &Coordinates,
        from: u64,
    ) -> Option<u64> {
        let end = self.layout.mapper.coord_to_pos(last)?;
        let mut cand = from;
        while cand <= end {
            // skip hints from the bitmap or the stored-cell index
            if !mode.has(IterationMode::NO_EMPTY_CHECK) {
                if let Some(bm) = &self.empty_bits {
                    cand = bm.next_set(cand)?;
                }
            } else if mode.has(IterationMode::IGNORE_DEFAULT_VALUES) {
                cand = self.body.next_stored(cand)?;
            }
            if cand > end {
                return None;
            }
            let coords = self.layout.mapper.pos_to_coord(cand);
            if box_contains(first, last, &coords) && self.visible(mode, cand) {
                return Some(cand);
            }
            cand += 1;
        }
        None
    }
}

fn encode_bitmap(buf: &mut Vec<u8>, bm: &EmptyBitmap) {
    match bm {
        EmptyBitmap::Bits { bits, n } => {
            buf.push(0u8);
            buf.extend_from_slice(&n.to_le_bytes());
            buf.extend_from_slice(&(bits.len() as u32).to_le_bytes());
            buf.extend_from_slice(bits);
        }
        EmptyBitmap::Runs { runs, n } => {
            buf.push(1u8);
            buf.extend_from_slice(&n.to_le_bytes());
            buf.extend_from_slice(&(runs.len() as u32).to_le_bytes());
            for (start, len) in runs {
                buf.extend_from_slice(&start.to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
            }
        }
    }
}

fn decode_bitmap(data: &[u8]) -> Result<EmptyBitmap, ChunkError> {
    if data.len() < 13 {
        return Err(ChunkError::Corrupt("bitmap header truncated"));
    }
    let form = data[0];
    let n = u64::from_le_bytes(data[1..9].try_into().unwrap());
    let len = u32::from_le_bytes(data[9..13].try_into().unwrap()) as usize;
    match form {
        0 => {
            if data.len() < 13 + len {
                return Err(ChunkError::Corrupt("bitmap bits truncated"));
            }
            Ok(EmptyBitmap::Bits {
                bits: data[13..13 + len].to_vec(),
                n,
            })
        }
        1 => {
            if data.len() < 13 + len * 16 {
                return Err(ChunkError::Corrupt("bitmap runs truncated"));
            }
            let mut runs = Vec::with_capacity(len);
            let mut at = 13;
            for _ in 0..len {
                let start = u64::from_le_bytes(data[at..at + 8].try_into().unwrap());
                let rlen = u64::from_le_bytes(data[at + 8..at + 16].try_into().unwrap());
                runs.push((start, rlen));
                at += 16;
            }
            Ok(EmptyBitmap::Runs { runs, n })
        }
        _ => Err(ChunkError::Corrupt("unknown bitmap form")),
    }
}

/// Read cursor over a chunk's visible cells.
pub struct ReadCursor<'a> {
    chunk: &'a MemChunk,
    mode: IterationMode,
    first: Coordinates,
    last: Coordinates,
    curr: Option<u64>,
    value: Value,
}

impl<'a> ReadCursor<'a> {
    fn new(chunk: &'a MemChunk, mode: IterationMode) -> Self {
        let (first, last) = chunk.box_for_mode(mode);
        let mut cursor = Self {
            chunk,
            mode,
            first,
            last,
            curr: None,
            value: Value::from_bytes(Vec::new()),
        };
        let _ = cursor.reset();
        cursor
    }
}

impl ChunkIterator for ReadCursor<'_> {
    fn mode(&self) -> IterationMode {
        self.mode
    }

    fn reset(&mut self) -> Result<(), ChunkError> {
        let start = self
            .chunk
            .layout
            .mapper
            .coord_to_pos(&self.first)
            .unwrap_or(0);
        self.curr = self
            .chunk
            .next_visible(self.mode, &self.first, &self.last, start);
        Ok(())
    }

    fn end(&self) -> bool {
        self.curr.is_none()
    }

    fn advance(&mut self) -> Result<(), ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        self.curr = self
            .chunk
            .next_visible(self.mode, &self.first, &self.last, curr + 1);
        Ok(())
    }

    fn set_position(&mut self, pos: &Coordinates) -> Result<bool, ChunkError> {
        self.curr = None;
        if !box_contains(&self.first, &self.last, pos) {
            return Ok(false);
        }
        let lin = match self.chunk.layout.mapper.coord_to_pos(pos) {
            Some(lin) => lin,
            None => return Ok(false),
        };
        if !self.chunk.visible(self.mode, lin) {
            return Ok(false);
        }
        self.curr = Some(lin);
        Ok(true)
    }

    fn position(&self) -> Result<Coordinates, ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        Ok(self.chunk.layout.mapper.pos_to_coord(curr))
    }

    fn item(&mut self) -> Result<&Value, ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        self.value = self.chunk.body.read_value(&self.chunk.layout, curr);
        Ok(&self.value)
    }
}

/// Write cursor. RLE chunks stage writes and rebuild the run payload on
/// flush; dense and sparse chunks write through.
pub struct WriteCursor<'a> {
    chunk: &'a mut MemChunk,
    mode: IterationMode,
    first: Coordinates,
    last: Coordinates,
    curr: Option<u64>,
    staged: Option<BTreeMap<u64, Value>>,
    flushed: bool,
    value: Value,
}

impl<'a> WriteCursor<'a> {
    fn new(chunk: &'a mut MemChunk, mode: IterationMode) -> Self {
        let (first, last) = chunk.box_for_mode(mode);
        let staged = match &chunk.body {
            ChunkBody::Rle(body) => {
                if mode.has(IterationMode::APPEND_CHUNK) {
                    Some(body.to_cells(&chunk.layout))
                } else {
                    Some(BTreeMap::new())
                }
            }
            _ => None,
        };
        let start = chunk.layout.mapper.coord_to_pos(&first);
        Self {
            chunk,
            mode,
            first,
            last,
            curr: start,
            staged,
            flushed: false,
            value: Value::from_bytes(Vec::new()),
        }
    }

    fn read_current(&self, pos: u64) -> Value {
        if let Some(staged) = &self.staged {
            if let Some(v) = staged.get(&pos) {
                return v.clone();
            }
            return self.chunk.layout.default_value.clone();
        }
        self.chunk.body.read_value(&self.chunk.layout, pos)
    }
}

impl ChunkIterator for WriteCursor<'_> {
    fn mode(&self) -> IterationMode {
        self.mode
    }

    fn reset(&mut self) -> Result<(), ChunkError> {
        self.curr = self.chunk.layout.mapper.coord_to_pos(&self.first);
        Ok(())
    }

    fn end(&self) -> bool {
        self.curr.is_none()
    }

    fn advance(&mut self) -> Result<(), ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        let mut coords = self.chunk.layout.mapper.pos_to_coord(curr);
        loop {
            if !odometer_step(&mut coords, &self.first, &self.last) {
                self.curr = None;
                return Ok(());
            }
            if let Some(lin) = self.chunk.layout.mapper.coord_to_pos(&coords) {
                self.curr = Some(lin);
                return Ok(());
            }
        }
    }

    fn set_position(&mut self, pos: &Coordinates) -> Result<bool, ChunkError> {
        self.curr = None;
        if !box_contains(&self.first, &self.last, pos) {
            return Ok(false);
        }
        match self.chunk.layout.mapper.coord_to_pos(pos) {
            Some(lin) => {
                self.curr = Some(lin);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn position(&self) -> Result<Coordinates, ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        Ok(self.chunk.layout.mapper.pos_to_coord(curr))
    }

    fn item(&mut self) -> Result<&Value, ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        self.value = self.read_current(curr);
        Ok(&self.value)
    }
}

impl ChunkWriter for WriteCursor<'_> {
    fn write_item(&mut self, v: &Value) -> Result<(), ChunkError> {
        let curr = self.curr.ok_or(ChunkError::NoCurrentElement)?;
        if v.is_null() && !self.chunk.layout.nullable {
            return Err(ChunkError::AssigningNullToNonNullable);
        }
        match &mut self.staged {
            Some(staged) => {
                staged.insert(curr, v.clone());
            }
            None => {
                let layout = self.chunk.layout.clone();
                match &mut self.chunk.body {
                    ChunkBody::Dense(b) => b.write_value(&layout, curr, v)?,
                    ChunkBody::Sparse(b) => b.write_value(&layout, curr, v)?,
                    ChunkBody::Rle(_) => unreachable!("rle writes are staged"),
                }
            }
        }
        if let Some(bm) = &mut self.chunk.empty_bits {
            bm.set(curr);
        }
        self.chunk.count = None;
        self.flushed = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ChunkError> {
        if self.flushed {
            return Ok(());
        }
        let layout = self.chunk.layout.clone();
        if let Some(staged) = &self.staged {
            self.chunk.body = ChunkBody::Rle(RleBody::from_cells(&layout, staged)?);
        } else if let ChunkBody::Sparse(body) = &self.chunk.body {
            let threshold = layout.dense_threshold;
            if threshold < 1.0 && body.occupancy(&layout) > threshold {
                let mut dense = DenseBody::new(&layout);
                for (pos, cell) in &body.cells {
                    let v = body.cell_value(&layout, cell);
                    dense.write_value(&layout, *pos, &v)?;
                }
                self.chunk.body = ChunkBody::Dense(dense);
            }
        }
        self.chunk.count = Some(match (&self.chunk.body, &self.chunk.empty_bits) {
            (ChunkBody::Rle(b), _) => b.count(),
            (_, Some(bm)) => bm.count(),
            _ => box_cells(&self.chunk.first_pos, &self.chunk.last_pos),
        });
        self.flushed = true;
        Ok(())
    }
}
