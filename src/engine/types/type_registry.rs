use ahash::AHashMap;
use once_cell::sync::Lazy;

use crate::engine::errors::TypeError;

/// Process-scoped registry of built-in types. User-defined types live in
/// the engine context; chunk layout only needs the built-ins.
pub static TYPES: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::builtin);

pub const TID_INT8: &str = "int8";
pub const TID_INT16: &str = "int16";
pub const TID_INT32: &str = "int32";
pub const TID_INT64: &str = "int64";
pub const TID_UINT8: &str = "uint8";
pub const TID_UINT16: &str = "uint16";
pub const TID_UINT32: &str = "uint32";
pub const TID_UINT64: &str = "uint64";
pub const TID_FLOAT: &str = "float";
pub const TID_DOUBLE: &str = "double";
pub const TID_BOOL: &str = "bool";
pub const TID_CHAR: &str = "char";
pub const TID_STRING: &str = "string";
/// Empty-bitmap attributes carry this type: a packed boolean.
pub const TID_INDICATOR: &str = "indicator";
/// Variable-size opaque state carried by aggregate chunks.
pub const TID_AGGREGATE_STATE: &str = "aggregate_state";

/// A registered scalar type. `bit_size == 0` means variable-size,
/// `bit_size == 1` a packed boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    id: String,
    bit_size: u32,
}

impl Type {
    pub fn new(id: impl Into<String>, bit_size: u32) -> Self {
        Self {
            id: id.into(),
            bit_size,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bit_size(&self) -> u32 {
        self.bit_size
    }

    /// Fixed byte width; 0 for variable-size and for packed booleans.
    pub fn byte_size(&self) -> usize {
        (self.bit_size / 8) as usize
    }

    pub fn is_variable(&self) -> bool {
        self.bit_size == 0
    }

    pub fn is_bool(&self) -> bool {
        self.bit_size == 1
    }
}

/// Process-wide map from type identifier to its layout.
#[derive(Debug)]
pub struct TypeRegistry {
    types: AHashMap<String, Type>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: AHashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for (id, bits) in [
            (TID_INT8, 8),
            (TID_INT16, 16),
            (TID_INT32, 32),
            (TID_INT64, 64),
            (TID_UINT8, 8),
            (TID_UINT16, 16),
            (TID_UINT32, 32),
            (TID_UINT64, 64),
            (TID_FLOAT, 32),
            (TID_DOUBLE, 64),
            (TID_BOOL, 1),
            (TID_INDICATOR, 1),
            (TID_CHAR, 8),
            (TID_STRING, 0),
            (TID_AGGREGATE_STATE, 0),
        ] {
            reg.register(Type::new(id, bits));
        }
        reg
    }

    pub fn register(&mut self, ty: Type) {
        self.types.insert(ty.id.clone(), ty);
    }

    pub fn get(&self, id: &str) -> Result<&Type, TypeError> {
        self.types
            .get(id)
            .ok_or_else(|| TypeError::NotRegistered(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
