use std::sync::Arc;

use crate::engine::array::attribute::AttributeDesc;
use crate::engine::array::descriptor::ArrayDesc;
use crate::engine::array::dimension::DimensionDesc;
use crate::engine::types::type_registry::TID_INT32;
use crate::engine::types::value::Value;

/// Builds array descriptors for tests. Defaults to the classic
/// `A<v:int32>[i=0:3,4,0]` shape.
pub struct ArrayDescFactory {
    name: String,
    attributes: Vec<AttributeDesc>,
    dimensions: Vec<DimensionDesc>,
    emptyable: bool,
}

impl ArrayDescFactory {
    pub fn new() -> Self {
        Self {
            name: "test_array".to_string(),
            attributes: vec![AttributeDesc::new(0, "v", TID_INT32)],
            dimensions: vec![DimensionDesc::new("i", 0, 3, 4, 0)],
            emptyable: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn attribute(mut self, name: &str, type_id: &str) -> Self {
        let id = self.attributes.len() as u32;
        self.attributes.push(AttributeDesc::new(id, name, type_id));
        self
    }

    pub fn nullable_attribute(mut self, name: &str, type_id: &str) -> Self {
        let id = self.attributes.len() as u32;
        self.attributes
            .push(AttributeDesc::new(id, name, type_id).nullable(true));
        self
    }

    pub fn attribute_with_default(mut self, name: &str, type_id: &str, default: Value) -> Self {
        let id = self.attributes.len() as u32;
        self.attributes
            .push(AttributeDesc::new(id, name, type_id).with_default(default));
        self
    }

    /// Replaces the default attribute set entirely.
    pub fn no_default_attributes(mut self) -> Self {
        self.attributes.clear();
        self
    }

    pub fn dimension(mut self, name: &str, start: i64, end: i64, interval: i64, overlap: i64) -> Self {
        self.dimensions
            .push(DimensionDesc::new(name, start, end, interval, overlap));
        self
    }

    /// Replaces the default dimension set entirely.
    pub fn no_default_dimensions(mut self) -> Self {
        self.dimensions.clear();
        self
    }

    pub fn emptyable(mut self) -> Self {
        self.emptyable = true;
        self
    }

    pub fn create(self) -> Arc<ArrayDesc> {
        let mut desc = ArrayDesc::new(self.name, self.attributes, self.dimensions);
        if self.emptyable {
            desc = desc.with_empty_bitmap();
        }
        Arc::new(desc)
    }
}

impl Default for ArrayDescFactory {
    fn default() -> Self {
        Self::new()
    }
}
