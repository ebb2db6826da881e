use std::collections::BTreeMap;

use crate::engine::chunk::mem_chunk::ChunkLayout;
use crate::engine::errors::ChunkError;
use crate::engine::types::value::Value;

/// One run of the payload. A `same_value` segment repeats a single heap
/// value for its whole length; a literal segment stores `length`
/// consecutive fixed-width values. Null segments carry the reason instead
/// of a heap offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RleSegment {
    pub start: u64,
    pub length: u64,
    pub same_value: bool,
    pub null_reason: Option<u8>,
    pub offset: u32,
}

impl RleSegment {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Run-length payload plus the parallel run-length stream of set cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RleBody {
    pub segments: Vec<RleSegment>,
    pub heap: Vec<u8>,
}

impl RleBody {
    pub fn new(_layout: &ChunkLayout) -> Self {
        Self {
            segments: Vec::new(),
            heap: Vec::new(),
        }
    }

    /// Sum of run lengths.
    pub fn count(&self) -> u64 {
        self.segments.iter().map(|s| s.length).sum()
    }

    /// Binary search for the segment containing `pos`.
    pub fn segment_for(&self, pos: u64) -> Option<&RleSegment> {
        let idx = self.segments.partition_point(|s| s.start <= pos);
        if idx == 0 {
            return None;
        }
        let seg = &self.segments[idx - 1];
        (pos < seg.end()).then_some(seg)
    }

    /// First stored position at or after `pos`.
    pub fn next_stored(&self, pos: u64) -> Option<u64> {
        if self.segment_for(pos).is_some() {
            return Some(pos);
        }
        let idx = self.segments.partition_point(|s| s.start <= pos);
        self.segments.get(idx).map(|s| s.start)
    }

    pub fn read_value(&self, layout: &ChunkLayout, pos: u64) -> Value {
        match self.segment_for(pos) {
            None => layout.default_value.clone(),
            Some(seg) => self.segment_value(layout, seg, pos),
        }
    }

    pub fn segment_value(&self, layout: &ChunkLayout, seg: &RleSegment, pos: u64) -> Value {
        if let Some(reason) = seg.null_reason {
            return Value::null(reason);
        }
        let slot = if seg.same_value {
            seg.offset as usize
        } else {
            seg.offset as usize + (pos - seg.start) as usize * layout.elem_size.max(1)
        };
        if layout.packed_bool {
            let bit = slot as u64;
            let b = self.heap[(bit >> 3) as usize] & (1 << (bit & 7)) != 0;
            return Value::from_bool(b);
        }
        if layout.var_sized {
            let len = u32::from_le_bytes(self.heap[slot..slot + 4].try_into().unwrap()) as usize;
            return Value::from_bytes(self.heap[slot + 4..slot + 4 + len].to_vec());
        }
        Value::from_bytes(self.heap[slot..slot + layout.elem_size].to_vec())
    }

    pub fn null_reason_at(&self, pos: u64) -> Option<u8> {
        self.segment_for(pos).and_then(|s| s.null_reason)
    }

    pub fn contains(&self, pos: u64) -> bool {
        self.segment_for(pos).is_some()
    }

    /// Expands the payload into per-cell values, for staging updates.
    pub fn to_cells(&self, layout: &ChunkLayout) -> BTreeMap<u64, Value> {
        let mut out = BTreeMap::new();
        for seg in &self.segments {
            for pos in seg.start..seg.end() {
                out.insert(pos, self.segment_value(layout, seg, pos));
            }
        }
        out
    }

    /// Rebuilds the run-length payload from per-cell values. Adjacent equal
    /// values coalesce into `same_value` runs; unequal neighbors of a
    /// fixed-size type become literal runs.
    pub fn from_cells(
        layout: &ChunkLayout,
        cells: &BTreeMap<u64, Value>,
    ) -> Result<Self, ChunkError> {
        let mut body = Self {
            segments: Vec::new(),
            heap: Vec::new(),
        };
        let mut iter = cells.iter().peekable();
        while let Some((&start, first)) = iter.next() {
            // collect the maximal run of adjacent positions
            let mut run: Vec<(u64, &Value)> = vec![(start, first)];
            while let Some(&(&next_pos, next_v)) = iter.peek() {
                if next_pos == run.last().unwrap().0 + 1 {
                    run.push((next_pos, next_v));
                    iter.next();
                } else {
                    break;
                }
            }
            body.emit_run(layout, &run)?;
        }
        Ok(body)
    }

    fn emit_run(&mut self, layout: &ChunkLayout, run: &[(u64, &Value)]) -> Result<(), ChunkError> {
        let mut i = 0;
        while i < run.len() {
            let (start, v) = run[i];
            // length of the prefix of equal values
            let mut same = 1;
            while i + same < run.len() && run[i + same].1 == v {
                same += 1;
            }
            let literal_ok = !layout.var_sized && !layout.packed_bool && !v.is_null();
            if same > 1 || !literal_ok {
                self.push_same_value(layout, start, same as u64, v);
                i += same;
            } else {
                // gather unequal neighbors into one literal segment
                let mut len = 1;
                while i + len < run.len() {
                    let cand = run[i + len].1;
                    if cand.is_null() || (i + len + 1 < run.len() && run[i + len + 1].1 == cand) {
                        break;
                    }
                    len += 1;
                }
                let offset = self.heap.len() as u32;
                for k in 0..len {
                    let mut bytes = run[i + k].1.data().to_vec();
                    bytes.resize(layout.elem_size, 0);
                    self.heap.extend_from_slice(&bytes);
                }
                self.segments.push(RleSegment {
                    start,
                    length: len as u64,
                    same_value: false,
                    null_reason: None,
                    offset,
                });
                i += len;
            }
        }
        Ok(())
    }

    fn push_same_value(&mut self, layout: &ChunkLayout, start: u64, length: u64, v: &Value) {
        if let Some(reason) = v.missing_reason() {
            self.segments.push(RleSegment {
                start,
                length,
                same_value: true,
                null_reason: Some(reason),
                offset: 0,
            });
            return;
        }
        let offset = if layout.packed_bool {
            let bit = self.bit_cursor();
            if (bit >> 3) as usize >= self.heap.len() {
                self.heap.push(0);
            }
            if v.get_bool() {
                self.heap[(bit >> 3) as usize] |= 1 << (bit & 7);
            }
            bit as u32
        } else if layout.var_sized {
            let off = self.heap.len() as u32;
            self.heap.extend_from_slice(&(v.size() as u32).to_le_bytes());
            self.heap.extend_from_slice(v.data());
            off
        } else {
            let off = self.heap.len() as u32;
            let mut bytes = v.data().to_vec();
            bytes.resize(layout.elem_size, 0);
            self.heap.extend_from_slice(&bytes);
            off
        };
        self.segments.push(RleSegment {
            start,
            length,
            same_value: true,
            null_reason: None,
            offset,
        });
    }

    fn bit_cursor(&self) -> u64 {
        self.segments
            .iter()
            .filter(|s| s.null_reason.is_none() && s.same_value)
            .count() as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.heap.len() as u32).to_le_bytes());
        for seg in &self.segments {
            buf.extend_from_slice(&seg.start.to_le_bytes());
            buf.extend_from_slice(&seg.length.to_le_bytes());
            let mut flags = 0u8;
            if seg.same_value {
                flags |= 1;
            }
            if seg.null_reason.is_some() {
                flags |= 2;
            }
            buf.push(flags);
            buf.push(seg.null_reason.unwrap_or(0));
            buf.extend_from_slice(&seg.offset.to_le_bytes());
        }
        buf.extend_from_slice(&self.heap);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, ChunkError> {
        if data.len() < 8 {
            return Err(ChunkError::Corrupt("rle header truncated"));
        }
        let n = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let heap_len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        const SEG_LEN: usize = 22;
        let segs_end = 8 + n * SEG_LEN;
        if data.len() < segs_end + heap_len {
            return Err(ChunkError::Corrupt("rle payload truncated"));
        }
        let mut segments = Vec::with_capacity(n);
        let mut at = 8;
        for _ in 0..n {
            let start = u64::from_le_bytes(data[at..at + 8].try_into().unwrap());
            let length = u64::from_le_bytes(data[at + 8..at + 16].try_into().unwrap());
            let flags = data[at + 16];
            let reason = data[at + 17];
            let offset = u32::from_le_bytes(data[at + 18..at + 22].try_into().unwrap());
            segments.push(RleSegment {
                start,
                length,
                same_value: flags & 1 != 0,
                null_reason: (flags & 2 != 0).then_some(reason),
                offset,
            });
            at += SEG_LEN;
        }
        let heap = data[segs_end..segs_end + heap_len].to_vec();
        Ok(Self { segments, heap })
    }

    pub fn byte_size(&self) -> usize {
        self.segments.len() * 22 + self.heap.len()
    }
}
