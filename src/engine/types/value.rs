use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::engine::types::type_registry::{
    TID_BOOL, TID_DOUBLE, TID_FLOAT, TID_INDICATOR, TID_INT16, TID_INT32, TID_INT64, TID_INT8,
    TID_STRING, Type,
};

/// Reason 0 is reserved: in aggregate state chunks it means "group absent".
pub const MISSING_REASON_ABSENT: u8 = 0;

/// A typed scalar. Either a payload (little-endian bytes for fixed-size
/// types, an owned buffer for variable-size ones) or a null carrying a
/// missing-reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    /// `None` for non-null values.
    missing: Option<u8>,
    data: Vec<u8>,
}

impl Value {
    pub fn null(reason: u8) -> Self {
        Self {
            missing: Some(reason),
            data: Vec::new(),
        }
    }

    /// The "group absent" null used by aggregate state chunks.
    pub fn absent() -> Self {
        Self::null(MISSING_REASON_ABSENT)
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            missing: None,
            data: data.into(),
        }
    }

    pub fn from_i64(v: i64) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_i32(v: i32) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_i16(v: i16) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_i8(v: i8) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_u64(v: u64) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_f64(v: f64) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_f32(v: f32) -> Self {
        Self::from_bytes(v.to_le_bytes().to_vec())
    }

    pub fn from_bool(v: bool) -> Self {
        Self::from_bytes(vec![v as u8])
    }

    pub fn from_string(v: impl AsRef<str>) -> Self {
        Self::from_bytes(v.as_ref().as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        self.missing.is_some()
    }

    pub fn missing_reason(&self) -> Option<u8> {
        self.missing
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Reads a signed integer of any fixed width, sign-extended.
    pub fn get_i64(&self) -> i64 {
        match self.data.len() {
            0 => 0,
            1 => self.data[0] as i8 as i64,
            2 => i16::from_le_bytes([self.data[0], self.data[1]]) as i64,
            4 => i32::from_le_bytes(self.data[..4].try_into().unwrap()) as i64,
            8 => i64::from_le_bytes(self.data[..8].try_into().unwrap()),
            _ => {
                let mut buf = [0u8; 8];
                let n = self.data.len().min(8);
                buf[..n].copy_from_slice(&self.data[..n]);
                i64::from_le_bytes(buf)
            }
        }
    }

    pub fn get_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        let n = self.data.len().min(8);
        buf[..n].copy_from_slice(&self.data[..n]);
        u64::from_le_bytes(buf)
    }

    pub fn get_f64(&self) -> f64 {
        match self.data.len() {
            4 => f32::from_le_bytes(self.data[..4].try_into().unwrap()) as f64,
            8 => f64::from_le_bytes(self.data[..8].try_into().unwrap()),
            _ => self.get_i64() as f64,
        }
    }

    pub fn get_bool(&self) -> bool {
        self.data.first().copied().unwrap_or(0) != 0
    }

    pub fn get_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn is_zero(&self) -> bool {
        !self.is_null() && self.data.iter().all(|b| *b == 0)
    }

    /// Total order within one type: nulls sort before non-nulls, null ties
    /// break on the reason code.
    pub fn compare(&self, other: &Value, ty: &Type) -> Ordering {
        match (self.missing, other.missing) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => match ty.id() {
                TID_STRING => self.data.cmp(&other.data),
                TID_BOOL | TID_INDICATOR => self.get_bool().cmp(&other.get_bool()),
                TID_DOUBLE | TID_FLOAT => self
                    .get_f64()
                    .partial_cmp(&other.get_f64())
                    .unwrap_or(Ordering::Equal),
                TID_INT8 | TID_INT16 | TID_INT32 | TID_INT64 => {
                    self.get_i64().cmp(&other.get_i64())
                }
                _ => self.get_u64().cmp(&other.get_u64()),
            },
        }
    }

    pub fn equals(&self, other: &Value, ty: &Type) -> bool {
        self.compare(other, ty) == Ordering::Equal
    }

    pub fn compare_less(&self, other: &Value, ty: &Type) -> bool {
        self.compare(other, ty) == Ordering::Less
    }

    pub fn to_json(&self, ty: &Type) -> serde_json::Value {
        use serde_json::json;
        if let Some(reason) = self.missing {
            return json!({ "null": reason });
        }
        match ty.id() {
            TID_STRING => json!(self.get_string()),
            TID_BOOL | TID_INDICATOR => json!(self.get_bool()),
            TID_DOUBLE | TID_FLOAT => json!(self.get_f64()),
            TID_INT8 | TID_INT16 | TID_INT32 | TID_INT64 => json!(self.get_i64()),
            _ => json!(self.get_u64()),
        }
    }
}

/// A default value for a freshly initialized cell of the given type.
pub fn default_for(ty: &Type) -> Value {
    if ty.is_variable() {
        Value::from_bytes(Vec::new())
    } else if ty.is_bool() {
        Value::from_bool(false)
    } else {
        Value::from_bytes(vec![0u8; ty.byte_size()])
    }
}
