use serde::{Deserialize, Serialize};

use crate::engine::array::coordinates::Coordinate;

/// A named integer axis. Chunk positions along this axis are aligned to
/// `start + k * chunk_interval`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDesc {
    name: String,
    start: Coordinate,
    end_max: Coordinate,
    chunk_interval: i64,
    chunk_overlap: i64,
}

impl DimensionDesc {
    pub fn new(
        name: impl Into<String>,
        start: Coordinate,
        end_max: Coordinate,
        chunk_interval: i64,
        chunk_overlap: i64,
    ) -> Self {
        assert!(chunk_interval > 0, "chunk interval must be positive");
        assert!(
            (0..chunk_interval).contains(&chunk_overlap),
            "overlap must be within [0, interval)"
        );
        Self {
            name: name.into(),
            start,
            end_max,
            chunk_interval,
            chunk_overlap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Coordinate {
        self.start
    }

    pub fn end_max(&self) -> Coordinate {
        self.end_max
    }

    pub fn chunk_interval(&self) -> i64 {
        self.chunk_interval
    }

    pub fn chunk_overlap(&self) -> i64 {
        self.chunk_overlap
    }

    pub fn length(&self) -> u64 {
        (self.end_max - self.start + 1).max(0) as u64
    }

    /// Number of chunk positions along this axis.
    pub fn chunk_count(&self) -> u64 {
        let len = self.length();
        if len == 0 {
            0
        } else {
            (len + self.chunk_interval as u64 - 1) / self.chunk_interval as u64
        }
    }

    /// Aligns `c` down to its chunk's first coordinate.
    pub fn chunk_start_for(&self, c: Coordinate) -> Coordinate {
        let rel = c - self.start;
        self.start + rel.div_euclid(self.chunk_interval) * self.chunk_interval
    }
}
