use std::ops::{BitOr, BitOrAssign};

use crate::engine::array::coordinates::Coordinates;
use crate::engine::errors::ChunkError;
use crate::engine::types::value::Value;
use crate::shared::config::CONFIG;

/// Cells per tile for batched iteration: the configured tile size, grown
/// so a chunk splits into at most `tiles_per_chunk` tiles when that knob
/// is set.
pub fn max_tile_size(chunk_cells: u64) -> usize {
    let mut tile = CONFIG.engine.tile_size.max(1);
    let per_chunk = CONFIG.engine.tiles_per_chunk;
    if per_chunk > 0 {
        tile = tile.max((chunk_cells as usize).div_ceil(per_chunk));
    }
    tile
}

/// Flags controlling which cells an iterator visits and how writes behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationMode(u32);

impl IterationMode {
    pub const NONE: IterationMode = IterationMode(0);
    /// Restrict iteration to the core box, excluding the overlap halo.
    pub const IGNORE_OVERLAPS: IterationMode = IterationMode(1);
    /// Visit only cells whose empty-bitmap bit is set.
    pub const IGNORE_EMPTY_CELLS: IterationMode = IterationMode(1 << 1);
    pub const IGNORE_NULL_VALUES: IterationMode = IterationMode(1 << 2);
    pub const IGNORE_DEFAULT_VALUES: IterationMode = IterationMode(1 << 3);
    /// Batched iteration: the cursor advances a tile at a time.
    pub const TILE_MODE: IterationMode = IterationMode(1 << 4);
    /// Open an existing chunk for update instead of zero-initializing it.
    pub const APPEND_CHUNK: IterationMode = IterationMode(1 << 5);
    /// Do not consult or maintain the empty bitmap.
    pub const NO_EMPTY_CHECK: IterationMode = IterationMode(1 << 6);
    /// Writes arrive in strictly increasing position order.
    pub const SEQUENTIAL_WRITE: IterationMode = IterationMode(1 << 7);
    /// Force the sparse code path regardless of the chunk's own encoding.
    pub const SPARSE_CHUNK: IterationMode = IterationMode(1 << 8);

    pub fn has(&self, flag: IterationMode) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn without(&self, flag: IterationMode) -> IterationMode {
        IterationMode(self.0 & !flag.0)
    }
}

impl BitOr for IterationMode {
    type Output = IterationMode;
    fn bitor(self, rhs: IterationMode) -> IterationMode {
        IterationMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for IterationMode {
    fn bitor_assign(&mut self, rhs: IterationMode) {
        self.0 |= rhs.0;
    }
}

/// Bidirectional cursor over one chunk's visible cells.
///
/// After construction or [`reset`](ChunkIterator::reset) the cursor sits on
/// the first visible cell (or at the end). `item` returns a reference that
/// stays valid until the next cursor mutation.
pub trait ChunkIterator {
    fn mode(&self) -> IterationMode;

    /// Places the cursor on the first visible cell.
    fn reset(&mut self) -> Result<(), ChunkError>;

    fn end(&self) -> bool;

    fn advance(&mut self) -> Result<(), ChunkError>;

    /// True iff `pos` is inside the box selected by the mode *and* visible.
    /// On false the cursor has no current element.
    fn set_position(&mut self, pos: &Coordinates) -> Result<bool, ChunkError>;

    fn position(&self) -> Result<Coordinates, ChunkError>;

    fn item(&mut self) -> Result<&Value, ChunkError>;

    /// Up to `max_cells` consecutive cells starting at the cursor,
    /// advancing past them. Used by tile-mode execution.
    fn next_tile(&mut self, max_cells: usize) -> Result<Vec<(Coordinates, Value)>, ChunkError> {
        let mut out = Vec::new();
        while !self.end() && out.len() < max_cells {
            out.push((self.position()?, self.item()?.clone()));
            self.advance()?;
        }
        Ok(out)
    }
}

/// Write cursor. `flush` is idempotent; after it the chunk is readable by
/// fresh iterators.
pub trait ChunkWriter: ChunkIterator {
    fn write_item(&mut self, v: &Value) -> Result<(), ChunkError>;

    fn flush(&mut self) -> Result<(), ChunkError>;
}
