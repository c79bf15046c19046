//! Dynamic value types for IR operations
//!
//! Values are serializable representations of component data that can
//! be transmitted over the patch bus without requiring concrete types.

use crate::codec::{ByteReader, ByteWriter, WireFormat, MAX_DECODE_DEPTH};
use crate::patch::EntityRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Default tolerance used by [`Value::approx_eq`] callers
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Reference to an asset by path and stable identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetRef {
    /// Asset path as known to the asset server
    pub path: String,
    /// Stable identifier surviving renames
    pub uuid: Uuid,
}

impl AssetRef {
    /// Reference an asset with a known identifier
    pub fn new(path: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            path: path.into(),
            uuid,
        }
    }

    /// Reference an asset by path, minting a fresh identifier
    pub fn from_path(path: impl Into<String>) -> Self {
        Self::new(path, Uuid::new_v4())
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.path);
        let raw = self.uuid.as_u128();
        w.write_u64((raw >> 64) as u64);
        w.write_u64(raw as u64);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        let path = r.read_string()?;
        let hi = r.read_u64()? as u128;
        let lo = r.read_u64()? as u128;
        Some(Self::new(path, Uuid::from_u128((hi << 64) | lo)))
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.uuid)
    }
}

/// A dynamic value that can represent any component data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null/None value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (i64 for wide compatibility)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// 2D vector
    Vec2([f64; 2]),
    /// 3D vector
    Vec3([f64; 3]),
    /// 4D vector / quaternion
    Vec4([f64; 4]),
    /// 4x4 matrix (column-major)
    Mat4([f64; 16]),
    /// Array of values
    Array(Vec<Value>),
    /// Object/map of values
    Object(BTreeMap<String, Value>),
    /// Raw bytes (base64 encoded in JSON)
    #[serde(with = "base64_serde")]
    Bytes(Vec<u8>),
    /// Reference to an entity
    EntityRef(EntityRef),
    /// Reference to an asset
    AssetRef(AssetRef),
}

impl Value {
    /// Create a null value
    pub fn null() -> Self {
        Self::Null
    }

    /// Create an empty object
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if value is an object
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Name of the variant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Vec2(_) => "Vec2",
            Self::Vec3(_) => "Vec3",
            Self::Vec4(_) => "Vec4",
            Self::Mat4(_) => "Mat4",
            Self::Array(_) => "Array",
            Self::Object(_) => "Object",
            Self::Bytes(_) => "Bytes",
            Self::EntityRef(_) => "EntityRef",
            Self::AssetRef(_) => "AssetRef",
        }
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as f64 (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as vec3
    pub fn as_vec3(&self) -> Option<[f64; 3]> {
        match self {
            Self::Vec3(v) => Some(*v),
            Self::Array(arr) if arr.len() == 3 => {
                Some([arr[0].as_float()?, arr[1].as_float()?, arr[2].as_float()?])
            }
            _ => None,
        }
    }

    /// Try to get as array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to get as object
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get as mutable object
    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get a field from an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    /// Set a field on an object value
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<()> {
        self.as_object_mut()?.insert(key.into(), value);
        Some(())
    }

    /// Resolve a dot-separated path. The empty path resolves to `self`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |current, segment| current.get(segment))
    }

    /// Write `value` at a dot-separated path.
    ///
    /// Missing intermediate objects are created and `Null` is promoted to an
    /// empty object. Returns `false`, leaving `self` untouched, when the path
    /// is malformed or crosses a non-object value.
    pub fn set_path(&mut self, path: &str, value: Value) -> bool {
        if path.is_empty() {
            *self = value;
            return true;
        }
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) || !self.path_is_writable(&segments) {
            return false;
        }
        self.set_segments(&segments, value);
        true
    }

    fn path_is_writable(&self, segments: &[&str]) -> bool {
        match segments.split_first() {
            None => true,
            Some((head, rest)) => match self {
                Self::Null => true,
                Self::Object(map) => map.get(*head).map_or(true, |next| next.path_is_writable(rest)),
                _ => false,
            },
        }
    }

    fn set_segments(&mut self, segments: &[&str], value: Value) {
        match segments.split_first() {
            None => *self = value,
            Some((head, rest)) => {
                if self.is_null() {
                    *self = Self::object();
                }
                if let Self::Object(map) = self {
                    map.entry((*head).to_string())
                        .or_insert(Self::Null)
                        .set_segments(rest, value);
                }
            }
        }
    }

    /// Apply a field write with component-patch semantics.
    ///
    /// With an empty path, writing an object onto an object merges the
    /// top-level keys; anything else replaces the value. A non-empty path
    /// behaves like [`Value::set_path`].
    pub fn apply_field(&mut self, path: &str, value: Value) -> bool {
        if path.is_empty() {
            if let (Self::Object(target), Self::Object(fields)) = (&mut *self, &value) {
                for (key, field) in fields {
                    target.insert(key.clone(), field.clone());
                }
                return true;
            }
            *self = value;
            return true;
        }
        self.set_path(path, value)
    }

    /// Structural equality with floats, vectors and matrices compared within
    /// `epsilon`. `NaN` compares equal to `NaN`.
    pub fn approx_eq(&self, other: &Value, epsilon: f64) -> bool {
        fn close(a: f64, b: f64, epsilon: f64) -> bool {
            (a.is_nan() && b.is_nan()) || a == b || (a - b).abs() <= epsilon
        }
        fn all_close(a: &[f64], b: &[f64], epsilon: f64) -> bool {
            a.iter().zip(b).all(|(x, y)| close(*x, *y, epsilon))
        }

        match (self, other) {
            (Self::Float(a), Self::Float(b)) => close(*a, *b, epsilon),
            (Self::Vec2(a), Self::Vec2(b)) => all_close(a, b, epsilon),
            (Self::Vec3(a), Self::Vec3(b)) => all_close(a, b, epsilon),
            (Self::Vec4(a), Self::Vec4(b)) => all_close(a, b, epsilon),
            (Self::Mat4(a), Self::Mat4(b)) => all_close(a, b, epsilon),
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.approx_eq(y, epsilon))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v.approx_eq(w, epsilon)))
            }
            _ => self == other,
        }
    }

    /// Rough heap + inline footprint, used for namespace memory accounting
    pub fn estimated_size(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Self::String(s) => inline + s.len(),
            Self::Bytes(b) => inline + b.len(),
            Self::AssetRef(a) => inline + a.path.len(),
            Self::Array(items) => inline + items.iter().map(Value::estimated_size).sum::<usize>(),
            Self::Object(map) => {
                inline
                    + map
                        .iter()
                        .map(|(k, v)| k.len() + v.estimated_size())
                        .sum::<usize>()
            }
            _ => inline,
        }
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter) {
        match self {
            Self::Null => w.write_u8(0),
            Self::Bool(b) => {
                w.write_u8(1);
                w.write_bool(*b);
            }
            Self::Int(i) => {
                w.write_u8(2);
                w.write_i64(*i);
            }
            Self::Float(f) => {
                w.write_u8(3);
                w.write_f64(*f);
            }
            Self::String(s) => {
                w.write_u8(4);
                w.write_str(s);
            }
            Self::Vec2(v) => {
                w.write_u8(5);
                v.iter().for_each(|c| w.write_f64(*c));
            }
            Self::Vec3(v) => {
                w.write_u8(6);
                v.iter().for_each(|c| w.write_f64(*c));
            }
            Self::Vec4(v) => {
                w.write_u8(7);
                v.iter().for_each(|c| w.write_f64(*c));
            }
            Self::Mat4(m) => {
                w.write_u8(8);
                m.iter().for_each(|c| w.write_f64(*c));
            }
            Self::Array(items) => {
                w.write_u8(9);
                w.write_seq(items, |w, item| item.encode(w));
            }
            Self::Object(map) => {
                w.write_u8(10);
                w.write_u32(map.len() as u32);
                for (key, value) in map {
                    w.write_str(key);
                    value.encode(w);
                }
            }
            Self::Bytes(bytes) => {
                w.write_u8(11);
                w.write_bytes(bytes);
            }
            Self::EntityRef(entity) => {
                w.write_u8(12);
                entity.encode(w);
            }
            Self::AssetRef(asset) => {
                w.write_u8(13);
                asset.encode(w);
            }
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Self::decode_at_depth(r, 0)
    }

    fn decode_at_depth(r: &mut ByteReader<'_>, depth: usize) -> Option<Self> {
        if depth > MAX_DECODE_DEPTH {
            return None;
        }
        fn floats<const N: usize>(r: &mut ByteReader<'_>) -> Option<[f64; N]> {
            let mut out = [0.0; N];
            for slot in out.iter_mut() {
                *slot = r.read_f64()?;
            }
            Some(out)
        }

        let value = match r.read_u8()? {
            0 => Self::Null,
            1 => Self::Bool(r.read_bool()?),
            2 => Self::Int(r.read_i64()?),
            3 => Self::Float(r.read_f64()?),
            4 => Self::String(r.read_string()?),
            5 => Self::Vec2(floats(r)?),
            6 => Self::Vec3(floats(r)?),
            7 => Self::Vec4(floats(r)?),
            8 => Self::Mat4(floats(r)?),
            9 => Self::Array(r.read_seq(|r| Self::decode_at_depth(r, depth + 1))?),
            10 => {
                let entries = r.read_seq(|r| {
                    let key = r.read_string()?;
                    let value = Self::decode_at_depth(r, depth + 1)?;
                    Some((key, value))
                })?;
                Self::Object(entries.into_iter().collect())
            }
            11 => Self::Bytes(r.read_bytes()?),
            12 => Self::EntityRef(EntityRef::decode(r)?),
            13 => Self::AssetRef(AssetRef::decode(r)?),
            _ => return None,
        };
        Some(value)
    }
}

impl WireFormat for Value {
    const MAGIC: [u8; 4] = *b"VALU";

    fn encode_payload(&self, w: &mut ByteWriter) {
        self.encode(w);
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Self::decode(r)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<[f64; 2]> for Value {
    fn from(v: [f64; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for Value {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3([v[0] as f64, v[1] as f64, v[2] as f64])
    }
}

impl From<[f64; 3]> for Value {
    fn from(v: [f64; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for Value {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4([v[0] as f64, v[1] as f64, v[2] as f64, v[3] as f64])
    }
}

impl From<[f64; 4]> for Value {
    fn from(v: [f64; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<EntityRef> for Value {
    fn from(v: EntityRef) -> Self {
        Self::EntityRef(v)
    }
}

impl From<AssetRef> for Value {
    fn from(v: AssetRef) -> Self {
        Self::AssetRef(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map: BTreeMap<String, Value> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::Object(map)
    }
}

/// Helper module for base64 serialization of bytes
mod base64_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
