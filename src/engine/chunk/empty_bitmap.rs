use serde::{Deserialize, Serialize};

/// Which cells of a chunk's bounding box carry data. Dense chunks keep a
/// bitset; RLE chunks keep the parallel run-length stream of set cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyBitmap {
    Bits { bits: Vec<u8>, n: u64 },
    Runs { runs: Vec<(u64, u64)>, n: u64 },
}

impl EmptyBitmap {
    pub fn bits(n: u64) -> Self {
        EmptyBitmap::Bits {
            bits: vec![0u8; ((n + 7) / 8) as usize],
            n,
        }
    }

    pub fn runs(n: u64) -> Self {
        EmptyBitmap::Runs { runs: Vec::new(), n }
    }

    pub fn len(&self) -> u64 {
        match self {
            EmptyBitmap::Bits { n, .. } | EmptyBitmap::Runs { n, .. } => *n,
        }
    }

    pub fn is_set(&self, pos: u64) -> bool {
        match self {
            EmptyBitmap::Bits { bits, .. } => {
                bits.get((pos >> 3) as usize)
                    .map_or(false, |b| b & (1 << (pos & 7)) != 0)
            }
            EmptyBitmap::Runs { runs, .. } => {
                let idx = runs.partition_point(|(start, _)| *start <= pos);
                idx > 0 && {
                    let (start, len) = runs[idx - 1];
                    pos < start + len
                }
            }
        }
    }

    pub fn set(&mut self, pos: u64) {
        match self {
            EmptyBitmap::Bits { bits, .. } => {
                bits[(pos >> 3) as usize] |= 1 << (pos & 7);
            }
            EmptyBitmap::Runs { runs, .. } => {
                let idx = runs.partition_point(|(start, _)| *start <= pos);
                if idx > 0 {
                    let (start, len) = runs[idx - 1];
                    if pos < start + len {
                        return;
                    }
                    if pos == start + len {
                        runs[idx - 1].1 += 1;
                        // coalesce with the following run if now adjacent
                        if idx < runs.len() && runs[idx].0 == pos + 1 {
                            runs[idx - 1].1 += runs[idx].1;
                            runs.remove(idx);
                        }
                        return;
                    }
                }
                if idx < runs.len() && runs[idx].0 == pos + 1 {
                    runs[idx].0 = pos;
                    runs[idx].1 += 1;
                    return;
                }
                runs.insert(idx, (pos, 1));
            }
        }
    }

    /// Number of set cells.
    pub fn count(&self) -> u64 {
        match self {
            EmptyBitmap::Bits { bits, .. } => {
                bits.iter().map(|b| b.count_ones() as u64).sum()
            }
            EmptyBitmap::Runs { runs, .. } => runs.iter().map(|(_, len)| len).sum(),
        }
    }

    /// First set position at or after `pos`.
    pub fn next_set(&self, pos: u64) -> Option<u64> {
        match self {
            EmptyBitmap::Bits { bits, n } => {
                let mut p = pos;
                while p < *n {
                    if bits[(p >> 3) as usize] & (1 << (p & 7)) != 0 {
                        return Some(p);
                    }
                    p += 1;
                }
                None
            }
            EmptyBitmap::Runs { runs, .. } => {
                let idx = runs.partition_point(|(start, _)| *start <= pos);
                if idx > 0 {
                    let (start, len) = runs[idx - 1];
                    if pos < start + len {
                        return Some(pos);
                    }
                }
                runs.get(idx).map(|(start, _)| *start)
            }
        }
    }

    /// OR-merge of two bitmaps over the same box.
    pub fn or_with(&mut self, other: &EmptyBitmap) {
        match (self, other) {
            (EmptyBitmap::Bits { bits, .. }, EmptyBitmap::Bits { bits: ob, .. }) => {
                for (dst, src) in bits.iter_mut().zip(ob.iter()) {
                    *dst |= src;
                }
            }
            (me, other) => {
                let mut pos = 0;
                while let Some(p) = other.next_set(pos) {
                    me.set(p);
                    pos = p + 1;
                }
            }
        }
    }
}
