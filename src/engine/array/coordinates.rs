use crate::engine::array::descriptor::ArrayDesc;

pub type Coordinate = i64;
pub type Coordinates = Vec<Coordinate>;

/// Maps between coordinates and row-major positions within one chunk's
/// bounding box (overlap included). Shared by the sparse and RLE codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatesMapper {
    origin: Coordinates,
    intervals: Vec<u64>,
    logical_size: u64,
}

impl CoordinatesMapper {
    /// `chunk_pos` must be aligned to the chunk grid of `desc`.
    pub fn new(desc: &ArrayDesc, chunk_pos: &Coordinates) -> Self {
        let dims = desc.dimensions();
        let mut origin = chunk_pos.clone();
        let mut intervals = Vec::with_capacity(dims.len());
        let mut logical_size = 1u64;
        for (i, dim) in dims.iter().enumerate() {
            origin[i] -= dim.chunk_overlap();
            let span = (dim.chunk_interval() + 2 * dim.chunk_overlap()) as u64;
            logical_size *= span;
            intervals.push(span);
        }
        Self {
            origin,
            intervals,
            logical_size,
        }
    }

    pub fn num_dims(&self) -> usize {
        self.intervals.len()
    }

    pub fn origin(&self) -> &Coordinates {
        &self.origin
    }

    /// Number of cells in the bounding box, overlap included.
    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    /// Returns `None` when `pos` is outside the bounding box.
    pub fn coord_to_pos(&self, pos: &Coordinates) -> Option<u64> {
        let mut offset = 0u64;
        for i in 0..self.intervals.len() {
            let rel = pos[i] - self.origin[i];
            if rel < 0 || rel as u64 >= self.intervals[i] {
                return None;
            }
            offset = offset * self.intervals[i] + rel as u64;
        }
        Some(offset)
    }

    pub fn pos_to_coord(&self, mut pos: u64) -> Coordinates {
        let n = self.intervals.len();
        let mut coords = vec![0i64; n];
        for i in (0..n).rev() {
            coords[i] = self.origin[i] + (pos % self.intervals[i]) as i64;
            pos /= self.intervals[i];
        }
        coords
    }
}

/// True when `pos` lies inside the closed box `[first, last]`.
pub fn box_contains(first: &Coordinates, last: &Coordinates, pos: &Coordinates) -> bool {
    pos.iter()
        .zip(first.iter().zip(last.iter()))
        .all(|(p, (f, l))| p >= f && p <= l)
}

/// Advances `pos` one step in row-major order within `[first, last]`.
/// Returns false when iteration wrapped past the end.
pub fn odometer_step(pos: &mut Coordinates, first: &Coordinates, last: &Coordinates) -> bool {
    let mut i = pos.len();
    loop {
        if i == 0 {
            return false;
        }
        i -= 1;
        pos[i] += 1;
        if pos[i] <= last[i] {
            return true;
        }
        pos[i] = first[i];
    }
}

/// Cell count of the closed box `[first, last]`.
pub fn box_cells(first: &Coordinates, last: &Coordinates) -> u64 {
    first
        .iter()
        .zip(last.iter())
        .map(|(f, l)| if l < f { 0 } else { (l - f + 1) as u64 })
        .product()
}
