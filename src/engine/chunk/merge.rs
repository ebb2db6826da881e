use ahash::AHashMap;

use crate::engine::array::coordinates::Coordinates;
use crate::engine::chunk::iterator::{ChunkIterator, ChunkWriter, IterationMode};
use crate::engine::chunk::mem_chunk::{ChunkBody, MemChunk};
use crate::engine::errors::{ChunkError, ExecutionError};
use crate::engine::types::aggregate::Aggregate;
use crate::engine::types::value::Value;

/// Conflict resolution for redimension merges: conflicting cells extend
/// their coordinate along the synthetic dimension instead of overwriting.
#[derive(Debug, Clone)]
pub struct SyntheticDim {
    pub dim_index: usize,
    pub dim_start: i64,
}

impl SyntheticDim {
    /// Builds the coord→count map over the destination's existing cells,
    /// keyed by the coordinate with the synthetic axis collapsed.
    fn build_counts(&self, dst: &MemChunk) -> Result<AHashMap<Coordinates, i64>, ChunkError> {
        let mut counts: AHashMap<Coordinates, i64> = AHashMap::new();
        let mut iter = dst.read_iter(IterationMode::NONE);
        while !iter.end() {
            let mut key = iter.position()?;
            key[self.dim_index] = self.dim_start;
            *counts.entry(key).or_insert(0) += 1;
            iter.advance()?;
        }
        Ok(counts)
    }

    fn place(&self, counts: &mut AHashMap<Coordinates, i64>, coord: &mut Coordinates) {
        let mut key = coord.clone();
        key[self.dim_index] = self.dim_start;
        let slot = counts.entry(key).or_insert(0);
        coord[self.dim_index] = self.dim_start + *slot;
        *slot += 1;
    }
}

/// Merges `src` into `dst` (same address). Fast path: both chunks carry
/// empty bitmaps, share an encoding, and no synthetic dimension is active —
/// the data model then guarantees disjoint cells, so bitmaps OR together
/// and payloads concatenate. Otherwise cells are merged one by one with
/// source-wins conflict resolution.
pub fn merge(
    dst: &mut MemChunk,
    src: &MemChunk,
    synthetic: Option<&SyntheticDim>,
) -> Result<(), ExecutionError> {
    dst.set_count(None);

    if let Some(sdim) = synthetic {
        let mut counts = sdim.build_counts(dst).map_err(ChunkError::from)?;
        let mut reader = src.read_iter(IterationMode::IGNORE_EMPTY_CELLS);
        let mut writer = dst.write_iter(IterationMode::APPEND_CHUNK | IterationMode::NO_EMPTY_CHECK);
        while !reader.end() {
            let mut coord = reader.position().map_err(ChunkError::from)?;
            sdim.place(&mut counts, &mut coord);
            if !writer.set_position(&coord).map_err(ChunkError::from)? {
                return Err(ExecutionError::MergeFailed(format!(
                    "set_position failed at synthetic coordinate {:?}",
                    coord
                )));
            }
            let v = reader.item().map_err(ChunkError::from)?.clone();
            writer.write_item(&v).map_err(ChunkError::from)?;
            reader.advance().map_err(ChunkError::from)?;
        }
        writer.flush().map_err(ChunkError::from)?;
        return Ok(());
    }

    let bitwise_ok = dst.empty_bitmap().is_some()
        && src.empty_bitmap().is_some()
        && dst.encoding() == src.encoding();
    if bitwise_ok {
        return merge_by_bitwise_or(dst, src).map_err(ExecutionError::from);
    }

    cellwise_merge(dst, src)
}

fn cellwise_merge(dst: &mut MemChunk, src: &MemChunk) -> Result<(), ExecutionError> {
    let emptyable = src.empty_bitmap().is_some();
    let read_mode = if emptyable {
        IterationMode::IGNORE_EMPTY_CELLS
    } else {
        // without a bitmap, only non-default cells are worth moving
        IterationMode::IGNORE_EMPTY_CELLS | IterationMode::IGNORE_DEFAULT_VALUES
    };
    let mut reader = src.read_iter(read_mode);
    let mut writer = dst.write_iter(IterationMode::APPEND_CHUNK | IterationMode::NO_EMPTY_CHECK);
    while !reader.end() {
        let pos = reader.position().map_err(ChunkError::from)?;
        if !writer.set_position(&pos).map_err(ChunkError::from)? {
            return Err(ExecutionError::MergeFailed("set_position".to_string()));
        }
        let v = reader.item().map_err(ChunkError::from)?.clone();
        writer.write_item(&v).map_err(ChunkError::from)?;
        reader.advance().map_err(ChunkError::from)?;
    }
    writer.flush().map_err(ChunkError::from)?;
    Ok(())
}

fn merge_by_bitwise_or(dst: &mut MemChunk, src: &MemChunk) -> Result<(), ChunkError> {
    match src.body() {
        ChunkBody::Sparse(src_body) => {
            let src_body = src_body.clone();
            let src_bm = src.empty_bitmap().cloned();
            if let ChunkBody::Sparse(dst_body) = dst.body_mut() {
                let base = dst_body.heap.len() as u32;
                dst_body.heap.extend_from_slice(&src_body.heap);
                for (pos, mut cell) in src_body.cells {
                    if cell.null_reason.is_none() {
                        cell.offset += base;
                    }
                    dst_body.cells.insert(pos, cell);
                }
            }
            if let (Some(dst_bm), Some(src_bm)) = (dst.empty_bitmap_mut(), src_bm.as_ref()) {
                dst_bm.or_with(src_bm);
            }
            Ok(())
        }
        ChunkBody::Rle(src_body) => {
            let src_body = src_body.clone();
            let src_bm = src.empty_bitmap().cloned();
            if let ChunkBody::Rle(dst_body) = dst.body_mut() {
                let base = dst_body.heap.len() as u32;
                dst_body.heap.extend_from_slice(&src_body.heap);
                for mut seg in src_body.segments {
                    if seg.null_reason.is_none() {
                        seg.offset += base;
                    }
                    dst_body.segments.push(seg);
                }
                dst_body.segments.sort_by_key(|s| s.start);
            }
            if let (Some(dst_bm), Some(src_bm)) = (dst.empty_bitmap_mut(), src_bm.as_ref()) {
                dst_bm.or_with(src_bm);
            }
            Ok(())
        }
        ChunkBody::Dense(_) => {
            // dense payloads OR through the bitmap: copy exactly the cells
            // the source bitmap marks
            let src_bm = src
                .empty_bitmap()
                .cloned()
                .ok_or(ChunkError::OperationFailed("missing source bitmap"))?;
            let layout = src.layout().clone();
            let mut copies = Vec::new();
            let mut pos = 0;
            while let Some(p) = src_bm.next_set(pos) {
                if let ChunkBody::Dense(src_body) = src.body() {
                    copies.push((p, src_body.read_value(&layout, p)));
                }
                pos = p + 1;
            }
            if let ChunkBody::Dense(dst_body) = dst.body_mut() {
                for (p, v) in copies {
                    dst_body.write_value(&layout, p, &v)?;
                }
            }
            if let Some(dst_bm) = dst.empty_bitmap_mut() {
                dst_bm.or_with(&src_bm);
            }
            Ok(())
        }
    }
}

/// Aggregate-state merge: reason-0 nulls mean "no state yet"; live states
/// combine through the aggregate, which must be associative for
/// cross-instance merges to be order-independent.
pub fn aggregate_merge(
    dst: &mut MemChunk,
    src: &MemChunk,
    aggregate: &dyn Aggregate,
) -> Result<(), ExecutionError> {
    if !dst.layout().nullable {
        return Err(ChunkError::AggregateStateMustBeNullable.into());
    }
    dst.set_count(None);

    let mut reader = src.read_iter(IterationMode::NONE);
    let mut writer = dst.write_iter(IterationMode::APPEND_CHUNK | IterationMode::NO_EMPTY_CHECK);
    while !reader.end() {
        let src_state = reader.item().map_err(ChunkError::from)?.clone();
        if src_state.missing_reason() == Some(0) {
            reader.advance().map_err(ChunkError::from)?;
            continue;
        }
        let pos = reader.position().map_err(ChunkError::from)?;
        if !writer.set_position(&pos).map_err(ChunkError::from)? {
            return Err(ExecutionError::MergeFailed("set_position".to_string()));
        }
        let dst_state = writer.item().map_err(ChunkError::from)?.clone();
        let mut combined = src_state;
        if has_state(&dst_state) {
            aggregate.merge(&mut combined, &dst_state);
        }
        writer.write_item(&combined).map_err(ChunkError::from)?;
        reader.advance().map_err(ChunkError::from)?;
    }
    writer.flush().map_err(ChunkError::from)?;
    Ok(())
}

fn has_state(v: &Value) -> bool {
    v.missing_reason() != Some(0)
}
