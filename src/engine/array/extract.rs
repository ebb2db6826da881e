use crate::engine::array::attribute::AttributeId;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::iterator::Array;
use crate::engine::chunk::iterator::{ChunkIterator, IterationMode};
use crate::engine::chunk::mem_chunk::ChunkBody;
use crate::engine::errors::{ChunkError, ExecutionError};
use crate::engine::types::type_registry::TYPES;

/// Copies the dense rectangular region `[first, last]` of one attribute
/// into `buf`, row-major. The attribute must be fixed-size and at least a
/// byte wide, and `first` must be chunk-aligned on every axis. Plain
/// chunks move with strided copies; everything else goes cell by cell.
/// Returns the number of chunks that intersected the box.
pub fn extract_data(
    array: &dyn Array,
    attribute_id: AttributeId,
    buf: &mut [u8],
    first: &Coordinates,
    last: &Coordinates,
) -> Result<usize, ExecutionError> {
    let desc = array.descriptor();
    let attr = desc
        .attribute(attribute_id)
        .ok_or_else(|| ExecutionError::OperationFailed("unknown attribute".to_string()))?;
    let ty = TYPES.get(attr.type_id()).map_err(ChunkError::from)?;
    if ty.is_variable() {
        return Err(ExecutionError::ExtractExpectedFixedSizeAttribute);
    }
    if ty.bit_size() < 8 {
        return Err(ExecutionError::ExtractUnexpectedBooleanAttribute);
    }
    let dims = desc.dimensions();
    if first.len() != dims.len() || last.len() != dims.len() {
        return Err(ExecutionError::WrongNumberOfDimensions {
            expected: dims.len(),
            got: first.len(),
        });
    }

    let mut buf_cells = 1usize;
    for (j, dim) in dims.iter().enumerate() {
        if last[j] < first[j] || (first[j] - dim.start()) % dim.chunk_interval() != 0 {
            return Err(ExecutionError::UnalignedCoordinates);
        }
        buf_cells *= (last[j] - first[j] + 1) as usize;
    }
    let attr_size = ty.byte_size();
    if buf.len() < buf_cells * attr_size {
        return Err(ExecutionError::OperationFailed(
            "extract buffer too small".to_string(),
        ));
    }
    buf[..buf_cells * attr_size].fill(0);

    let mut extracted = 0usize;
    let mut it = array.const_iterator(attribute_id)?;
    while !it.end() {
        let chunk = it.chunk()?;
        let chunk_pos = it.position()?;
        let inside = chunk_pos
            .iter()
            .zip(first.iter().zip(last.iter()))
            .all(|(p, (f, l))| p >= f && p <= l);
        if inside {
            if chunk.is_plain() {
                // strided copy straight out of the packed cells
                let chunk_first = chunk.first_position(false).clone();
                let chunk_last = chunk.last_position(false).clone();
                if let ChunkBody::Dense(body) = chunk.body() {
                    copy_stride(
                        buf,
                        &body.cells,
                        &chunk_first,
                        &chunk_last,
                        first,
                        last,
                        attr_size,
                    );
                }
            } else {
                let mode = IterationMode::IGNORE_OVERLAPS
                    | IterationMode::IGNORE_EMPTY_CELLS
                    | IterationMode::IGNORE_NULL_VALUES;
                let mut ci = chunk.read_iter(mode);
                while !ci.end() {
                    let item_pos = ci.position().map_err(ChunkError::from)?;
                    let v = ci.item().map_err(ChunkError::from)?;
                    if !v.is_null() {
                        let mut offs = 0usize;
                        for (j, p) in item_pos.iter().enumerate() {
                            offs = offs * (last[j] - first[j] + 1) as usize
                                + (p - first[j]) as usize;
                        }
                        let take = v.size().min(attr_size);
                        buf[offs * attr_size..offs * attr_size + take]
                            .copy_from_slice(&v.data()[..take]);
                    }
                    ci.advance().map_err(ChunkError::from)?;
                }
            }
            extracted += 1;
        }
        it.advance()?;
    }
    Ok(extracted)
}

/// Copies the chunk's packed rows into their place in the destination
/// box, one contiguous innermost-dimension run at a time.
fn copy_stride(
    buf: &mut [u8],
    cells: &[u8],
    chunk_first: &Coordinates,
    chunk_last: &Coordinates,
    box_first: &Coordinates,
    box_last: &Coordinates,
    attr_size: usize,
) {
    let ndims = chunk_first.len();
    let row_len = (chunk_last[ndims - 1] - chunk_first[ndims - 1] + 1) as usize;

    // walk every outer-coordinate combination of the chunk
    let mut pos = chunk_first.clone();
    loop {
        // destination offset of this row's first cell
        let mut offs = 0usize;
        for j in 0..ndims {
            offs = offs * (box_last[j] - box_first[j] + 1) as usize
                + (pos[j] - box_first[j]) as usize;
        }
        // source offset within the packed chunk
        let mut src = 0usize;
        for j in 0..ndims {
            src = src * (chunk_last[j] - chunk_first[j] + 1) as usize
                + (pos[j] - chunk_first[j]) as usize;
        }
        buf[offs * attr_size..(offs + row_len) * attr_size]
            .copy_from_slice(&cells[src * attr_size..(src + row_len) * attr_size]);

        // advance the outer dimensions only
        let mut i = ndims - 1;
        loop {
            if i == 0 {
                return;
            }
            i -= 1;
            pos[i] += 1;
            if pos[i] <= chunk_last[i] {
                break;
            }
            pos[i] = chunk_first[i];
        }
    }
}
