use serde::{Deserialize, Serialize};

use crate::engine::types::value::Value;

pub type AttributeId = u32;

/// Compression applied to a chunk payload on the wire and in the spill
/// file. Encodings themselves (dense/sparse/RLE) are orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum CompressionMethod {
    #[default]
    None = 0,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDesc {
    id: AttributeId,
    name: String,
    type_id: String,
    nullable: bool,
    default_value: Option<Value>,
    default_compression: CompressionMethod,
    emptyable: bool,
}

impl AttributeDesc {
    pub fn new(id: AttributeId, name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            type_id: type_id.into(),
            nullable: false,
            default_value: None,
            default_compression: CompressionMethod::None,
            emptyable: false,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_default(mut self, v: Value) -> Self {
        self.default_value = Some(v);
        self
    }

    pub fn empty_bitmap(mut self) -> Self {
        self.emptyable = true;
        self
    }

    pub fn id(&self) -> AttributeId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: AttributeId) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_empty_indicator(&self) -> bool {
        self.emptyable
    }

    pub fn default_compression(&self) -> CompressionMethod {
        self.default_compression
    }

    /// Explicit default if one was declared; callers fall back to the
    /// type's zero value otherwise.
    pub fn declared_default(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }
}
