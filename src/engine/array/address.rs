use serde::{Deserialize, Serialize};

use crate::engine::array::attribute::AttributeId;
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::descriptor::ArrayId;

/// Logical identity of one chunk: array, attribute, and the chunk's
/// aligned first position (without overlap). Orders by attribute first so
/// that per-attribute scans walk chunk positions contiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub array_id: ArrayId,
    pub attribute_id: AttributeId,
    pub coords: Coordinates,
}

impl Address {
    pub fn new(array_id: ArrayId, attribute_id: AttributeId, coords: Coordinates) -> Self {
        Self {
            array_id,
            attribute_id,
            coords,
        }
    }

    pub fn with_attribute(&self, attribute_id: AttributeId) -> Self {
        Self {
            array_id: self.array_id,
            attribute_id,
            coords: self.coords.clone(),
        }
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.array_id
            .cmp(&other.array_id)
            .then(self.attribute_id.cmp(&other.attribute_id))
            .then_with(|| self.coords.cmp(&other.coords))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
