use serde::{Deserialize, Serialize};

use crate::engine::array::attribute::{AttributeDesc, AttributeId};
use crate::engine::array::coordinates::Coordinates;
use crate::engine::array::dimension::DimensionDesc;
use crate::engine::errors::CatalogError;
use crate::engine::plan::distribution::ArrayDistribution;
use crate::engine::types::type_registry::TID_INDICATOR;

pub type ArrayId = u64;
pub type VersionId = u64;

/// Schema of one array: ordered attributes over a multidimensional
/// dimension space. At most one attribute is the empty-bitmap indicator;
/// when present, every chunk of every other attribute has a same-positioned
/// bitmap chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDesc {
    id: ArrayId,
    name: String,
    attributes: Vec<AttributeDesc>,
    dimensions: Vec<DimensionDesc>,
    distribution: Option<ArrayDistribution>,
    transient: bool,
}

impl ArrayDesc {
    pub fn new(
        name: impl Into<String>,
        attributes: Vec<AttributeDesc>,
        dimensions: Vec<DimensionDesc>,
    ) -> Self {
        let mut attributes = attributes;
        for (i, attr) in attributes.iter_mut().enumerate() {
            attr.set_id(i as AttributeId);
        }
        debug_assert!(
            attributes.iter().filter(|a| a.is_empty_indicator()).count() <= 1,
            "at most one empty-bitmap attribute"
        );
        Self {
            id: 0,
            name: name.into(),
            attributes,
            dimensions,
            distribution: None,
            transient: false,
        }
    }

    /// Appends the empty-bitmap indicator attribute if none exists yet.
    pub fn with_empty_bitmap(mut self) -> Self {
        if self.empty_bitmap_attribute().is_none() {
            let id = self.attributes.len() as AttributeId;
            self.attributes
                .push(AttributeDesc::new(id, "$empty", TID_INDICATOR).empty_bitmap());
        }
        self
    }

    pub fn with_id(mut self, id: ArrayId) -> Self {
        self.id = id;
        self
    }

    pub fn with_distribution(mut self, dist: ArrayDistribution) -> Self {
        self.distribution = Some(dist);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn id(&self) -> ArrayId {
        self.id
    }

    pub fn set_id(&mut self, id: ArrayId) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn attributes(&self) -> &[AttributeDesc] {
        &self.attributes
    }

    pub fn dimensions(&self) -> &[DimensionDesc] {
        &self.dimensions
    }

    pub fn distribution(&self) -> Option<&ArrayDistribution> {
        self.distribution.as_ref()
    }

    pub fn attribute(&self, id: AttributeId) -> Option<&AttributeDesc> {
        self.attributes.get(id as usize)
    }

    pub fn attribute_by_name(&self, name: &str) -> Result<&AttributeDesc, CatalogError> {
        self.attributes
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| CatalogError::AttributeNotFound(name.to_string()))
    }

    pub fn empty_bitmap_attribute(&self) -> Option<&AttributeDesc> {
        self.attributes.iter().find(|a| a.is_empty_indicator())
    }

    /// Attributes excluding the empty-bitmap indicator.
    pub fn data_attributes(&self) -> impl Iterator<Item = &AttributeDesc> {
        self.attributes.iter().filter(|a| !a.is_empty_indicator())
    }

    pub fn has_overlap(&self) -> bool {
        self.dimensions.iter().any(|d| d.chunk_overlap() != 0)
    }

    pub fn contains(&self, pos: &Coordinates) -> bool {
        pos.len() == self.dimensions.len()
            && pos
                .iter()
                .zip(self.dimensions.iter())
                .all(|(p, d)| *p >= d.start() && *p <= d.end_max())
    }

    /// Aligns `pos` down to its chunk's first coordinate on every axis.
    pub fn chunk_position_for(&self, pos: &Coordinates) -> Coordinates {
        pos.iter()
            .zip(self.dimensions.iter())
            .map(|(p, d)| d.chunk_start_for(*p))
            .collect()
    }

    /// Row-major index of an aligned chunk position within the chunk grid;
    /// drives round-robin placement.
    pub fn chunk_linear_index(&self, chunk_pos: &Coordinates) -> u64 {
        let mut index = 0u64;
        for (p, d) in chunk_pos.iter().zip(self.dimensions.iter()) {
            let along = ((p - d.start()) / d.chunk_interval()) as u64;
            index = index * d.chunk_count().max(1) + along;
        }
        index
    }

    /// Last position of the chunk at `chunk_pos`, clamped to the array box.
    pub fn chunk_last_position(&self, chunk_pos: &Coordinates, with_overlap: bool) -> Coordinates {
        chunk_pos
            .iter()
            .zip(self.dimensions.iter())
            .map(|(p, d)| {
                let mut last = p + d.chunk_interval() - 1;
                if with_overlap {
                    last += d.chunk_overlap();
                }
                last.min(d.end_max())
            })
            .collect()
    }

    /// First position of the chunk at `chunk_pos`, overlap included,
    /// clamped to the array box.
    pub fn chunk_first_position(&self, chunk_pos: &Coordinates, with_overlap: bool) -> Coordinates {
        chunk_pos
            .iter()
            .zip(self.dimensions.iter())
            .map(|(p, d)| {
                if with_overlap {
                    (p - d.chunk_overlap()).max(d.start())
                } else {
                    *p
                }
            })
            .collect()
    }

    /// All aligned chunk positions of the array box, in row-major order.
    pub fn chunk_positions(&self) -> Vec<Coordinates> {
        if self.dimensions.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut pos: Coordinates = self.dimensions.iter().map(|d| d.start()).collect();
        loop {
            out.push(pos.clone());
            let mut i = self.dimensions.len();
            loop {
                if i == 0 {
                    return out;
                }
                i -= 1;
                let d = &self.dimensions[i];
                pos[i] += d.chunk_interval();
                if pos[i] <= d.end_max() {
                    break;
                }
                pos[i] = d.start();
            }
        }
    }

    pub fn same_shape(&self, other: &ArrayDesc) -> bool {
        self.dimensions.len() == other.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(other.dimensions.iter())
                .all(|(a, b)| {
                    a.chunk_interval() == b.chunk_interval()
                        && a.chunk_overlap() == b.chunk_overlap()
                        && a.start() == b.start()
                })
    }
}
