use serde::{Deserialize, Serialize};

use crate::engine::array::coordinates::{Coordinates, box_cells};
use crate::engine::array::descriptor::ArrayDesc;

/// Logical bounding box of the data flowing through a plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalBoundaries {
    start: Coordinates,
    end: Coordinates,
}

impl PhysicalBoundaries {
    pub fn new(start: Coordinates, end: Coordinates) -> Self {
        Self { start, end }
    }

    pub fn from_descriptor(desc: &ArrayDesc) -> Self {
        Self {
            start: desc.dimensions().iter().map(|d| d.start()).collect(),
            end: desc.dimensions().iter().map(|d| d.end_max()).collect(),
        }
    }

    pub fn start(&self) -> &Coordinates {
        &self.start
    }

    pub fn end(&self) -> &Coordinates {
        &self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start
            .iter()
            .zip(self.end.iter())
            .any(|(s, e)| e < s)
    }

    pub fn cells(&self) -> u64 {
        box_cells(&self.start, &self.end)
    }

    pub fn union(&self, other: &PhysicalBoundaries) -> PhysicalBoundaries {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        PhysicalBoundaries {
            start: self
                .start
                .iter()
                .zip(other.start.iter())
                .map(|(a, b)| *a.min(b))
                .collect(),
            end: self
                .end
                .iter()
                .zip(other.end.iter())
                .map(|(a, b)| *a.max(b))
                .collect(),
        }
    }

    pub fn intersect(&self, other: &PhysicalBoundaries) -> PhysicalBoundaries {
        PhysicalBoundaries {
            start: self
                .start
                .iter()
                .zip(other.start.iter())
                .map(|(a, b)| *a.max(b))
                .collect(),
            end: self
                .end
                .iter()
                .zip(other.end.iter())
                .map(|(a, b)| *a.min(b))
                .collect(),
        }
    }
}
