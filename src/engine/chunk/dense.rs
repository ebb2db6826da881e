use crate::engine::chunk::mem_chunk::ChunkLayout;
use crate::engine::errors::ChunkError;
use crate::engine::types::value::Value;

/// Offset value marking a variable-size cell that still holds the default.
const VAR_DEFAULT: u32 = u32::MAX;

/// Packed row-major cells over the chunk's bounding box (overlap included).
/// Nullable attributes carry a null-bitmap prefix; variable-size attributes
/// store fixed-width offsets into a growable tail. Overwriting a cell with
/// a larger value appends a fresh tail slot and leaks the old one.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseBody {
    pub null_bits: Option<Vec<u8>>,
    pub cells: Vec<u8>,
    pub tail: Vec<u8>,
    pub n: u64,
}

impl DenseBody {
    pub fn new(layout: &ChunkLayout) -> Self {
        let n = layout.logical_size;
        let width = Self::cell_width(layout);
        let mut body = Self {
            null_bits: layout.nullable.then(|| vec![0u8; ((n + 7) / 8) as usize]),
            cells: if layout.packed_bool {
                vec![0u8; ((n + 7) / 8) as usize]
            } else {
                vec![0u8; (n as usize) * width]
            },
            tail: Vec::new(),
            n,
        };
        body.fill_default(layout);
        body
    }

    /// Bytes per cell in `cells`; packed booleans use bits instead.
    pub fn cell_width(layout: &ChunkLayout) -> usize {
        if layout.packed_bool {
            0
        } else if layout.var_sized {
            4
        } else {
            layout.elem_size
        }
    }

    fn fill_default(&mut self, layout: &ChunkLayout) {
        let default = &layout.default_value;
        if let Some(reason) = default.missing_reason() {
            let bits = self
                .null_bits
                .as_mut()
                .expect("null default requires a nullable attribute");
            for b in bits.iter_mut() {
                *b = 0xFF;
            }
            if layout.packed_bool {
                if reason != 0 {
                    for b in self.cells.iter_mut() {
                        *b = 0xFF;
                    }
                }
            } else if layout.var_sized {
                for i in 0..self.n as usize {
                    self.cells[i * 4..i * 4 + 4].copy_from_slice(&(reason as u32).to_le_bytes());
                }
            } else if layout.elem_size > 0 {
                for i in 0..self.n as usize {
                    self.cells[i * layout.elem_size] = reason;
                }
            }
            return;
        }
        if layout.var_sized {
            for i in 0..self.n as usize {
                self.cells[i * 4..i * 4 + 4].copy_from_slice(&VAR_DEFAULT.to_le_bytes());
            }
        } else if layout.packed_bool {
            if default.get_bool() {
                for b in self.cells.iter_mut() {
                    *b = 0xFF;
                }
            }
        } else if !default.is_zero() {
            let bytes = default.data();
            for i in 0..self.n as usize {
                self.cells[i * layout.elem_size..(i + 1) * layout.elem_size]
                    .copy_from_slice(&bytes[..layout.elem_size]);
            }
        }
    }

    fn null_reason_at(&self, layout: &ChunkLayout, pos: u64) -> Option<u8> {
        let bits = self.null_bits.as_ref()?;
        if bits[(pos >> 3) as usize] & (1 << (pos & 7)) == 0 {
            return None;
        }
        let reason = if layout.packed_bool {
            (self.cells[(pos >> 3) as usize] >> (pos & 7)) & 1
        } else if layout.var_sized {
            let off = self.offset_at(pos);
            if off == VAR_DEFAULT { 0 } else { off as u8 }
        } else {
            self.cells[pos as usize * layout.elem_size]
        };
        Some(reason)
    }

    fn offset_at(&self, pos: u64) -> u32 {
        let i = pos as usize * 4;
        u32::from_le_bytes(self.cells[i..i + 4].try_into().unwrap())
    }

    pub fn read_value(&self, layout: &ChunkLayout, pos: u64) -> Value {
        if let Some(reason) = self.null_reason_at(layout, pos) {
            return Value::null(reason);
        }
        if layout.packed_bool {
            let bit = self.cells[(pos >> 3) as usize] & (1 << (pos & 7)) != 0;
            return Value::from_bool(bit);
        }
        if layout.var_sized {
            let off = self.offset_at(pos);
            if off == VAR_DEFAULT {
                return layout.default_value.clone();
            }
            let off = off as usize;
            let len = u32::from_le_bytes(self.tail[off..off + 4].try_into().unwrap()) as usize;
            return Value::from_bytes(self.tail[off + 4..off + 4 + len].to_vec());
        }
        let i = pos as usize * layout.elem_size;
        Value::from_bytes(self.cells[i..i + layout.elem_size].to_vec())
    }

    pub fn write_value(
        &mut self,
        layout: &ChunkLayout,
        pos: u64,
        v: &Value,
    ) -> Result<(), ChunkError> {
        if let Some(reason) = v.missing_reason() {
            let bits = self
                .null_bits
                .as_mut()
                .ok_or(ChunkError::AssigningNullToNonNullable)?;
            bits[(pos >> 3) as usize] |= 1 << (pos & 7);
            if layout.packed_bool {
                let byte = &mut self.cells[(pos >> 3) as usize];
                if reason != 0 {
                    *byte |= 1 << (pos & 7);
                } else {
                    *byte &= !(1 << (pos & 7));
                }
            } else if layout.var_sized {
                let i = pos as usize * 4;
                self.cells[i..i + 4].copy_from_slice(&(reason as u32).to_le_bytes());
            } else if layout.elem_size > 0 {
                self.cells[pos as usize * layout.elem_size] = reason;
            }
            return Ok(());
        }
        if let Some(bits) = self.null_bits.as_mut() {
            bits[(pos >> 3) as usize] &= !(1 << (pos & 7));
        }
        if layout.packed_bool {
            let byte = &mut self.cells[(pos >> 3) as usize];
            if v.get_bool() {
                *byte |= 1 << (pos & 7);
            } else {
                *byte &= !(1 << (pos & 7));
            }
            return Ok(());
        }
        if layout.var_sized {
            let i = pos as usize * 4;
            let old = u32::from_le_bytes(self.cells[i..i + 4].try_into().unwrap());
            let fits_in_place = old != VAR_DEFAULT && {
                let off = old as usize;
                let old_len =
                    u32::from_le_bytes(self.tail[off..off + 4].try_into().unwrap()) as usize;
                old_len >= v.size()
            };
            let off = if fits_in_place {
                let off = old as usize;
                self.tail[off..off + 4].copy_from_slice(&(v.size() as u32).to_le_bytes());
                self.tail[off + 4..off + 4 + v.size()].copy_from_slice(v.data());
                old
            } else {
                let off = self.tail.len() as u32;
                self.tail.extend_from_slice(&(v.size() as u32).to_le_bytes());
                self.tail.extend_from_slice(v.data());
                off
            };
            self.cells[i..i + 4].copy_from_slice(&off.to_le_bytes());
            return Ok(());
        }
        let i = pos as usize * layout.elem_size;
        let take = v.size().min(layout.elem_size);
        self.cells[i..i + take].copy_from_slice(&v.data()[..take]);
        for b in &mut self.cells[i + take..i + layout.elem_size] {
            *b = 0;
        }
        Ok(())
    }

    /// True when the cell still holds the attribute default.
    pub fn is_default(&self, layout: &ChunkLayout, pos: u64) -> bool {
        let v = self.read_value(layout, pos);
        match (v.missing_reason(), layout.default_value.missing_reason()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => v.data() == layout.default_value.data(),
            _ => false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut flags = 0u8;
        if self.null_bits.is_some() {
            flags |= 1;
        }
        buf.push(flags);
        buf.extend_from_slice(&self.n.to_le_bytes());
        let nb = self.null_bits.as_deref().unwrap_or(&[]);
        buf.extend_from_slice(&(nb.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.cells.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.tail.len() as u32).to_le_bytes());
        buf.extend_from_slice(nb);
        buf.extend_from_slice(&self.cells);
        buf.extend_from_slice(&self.tail);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, ChunkError> {
        if data.len() < 21 {
            return Err(ChunkError::Corrupt("dense header truncated"));
        }
        let flags = data[0];
        let n = u64::from_le_bytes(data[1..9].try_into().unwrap());
        let nb_len = u32::from_le_bytes(data[9..13].try_into().unwrap()) as usize;
        let cells_len = u32::from_le_bytes(data[13..17].try_into().unwrap()) as usize;
        let tail_len = u32::from_le_bytes(data[17..21].try_into().unwrap()) as usize;
        let rest = &data[21..];
        if rest.len() < nb_len + cells_len + tail_len {
            return Err(ChunkError::Corrupt("dense payload truncated"));
        }
        let null_bits = (flags & 1 != 0).then(|| rest[..nb_len].to_vec());
        let cells = rest[nb_len..nb_len + cells_len].to_vec();
        let tail = rest[nb_len + cells_len..nb_len + cells_len + tail_len].to_vec();
        Ok(Self {
            null_bits,
            cells,
            tail,
            n,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.cells.len() + self.tail.len() + self.null_bits.as_ref().map_or(0, |b| b.len())
    }
}
