//! Component schemas
//!
//! Plugins describe the shape of their components with a
//! [`ComponentSchema`]; the [`SchemaRegistry`] is shared with the
//! [`crate::PatchValidator`], which checks component patches against it.
//! Components without a registered schema are accepted as-is.

use crate::codec::{wire_enum, ByteReader, ByteWriter, WireFormat};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

wire_enum! {
    /// Expected type of a field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum FieldType {
        Bool = 0,
        Int = 1,
        /// Accepts `Int` as well
        Float = 2,
        String = 3,
        Vec2 = 4,
        Vec3 = 5,
        Vec4 = 6,
        Mat4 = 7,
        Array = 8,
        Object = 9,
        Bytes = 10,
        EntityRef = 11,
        AssetRef = 12,
        Any = 13,
    }
}

impl FieldType {
    /// Check the variant of a non-null value
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Any, _)
                | (Self::Bool, Value::Bool(_))
                | (Self::Int, Value::Int(_))
                | (Self::Float, Value::Float(_) | Value::Int(_))
                | (Self::String, Value::String(_))
                | (Self::Vec2, Value::Vec2(_))
                | (Self::Vec3, Value::Vec3(_))
                | (Self::Vec4, Value::Vec4(_))
                | (Self::Mat4, Value::Mat4(_))
                | (Self::Array, Value::Array(_))
                | (Self::Object, Value::Object(_))
                | (Self::Bytes, Value::Bytes(_))
                | (Self::EntityRef, Value::EntityRef(_))
                | (Self::AssetRef, Value::AssetRef(_))
        )
    }

    /// Whether a dot path may continue below a field of this type
    pub fn is_nested(self) -> bool {
        matches!(self, Self::Object | Self::Any)
    }
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn contains(&self, value: f64) -> bool {
        !value.is_nan()
            && self.min.map_or(true, |min| value >= min)
            && self.max.map_or(true, |max| value <= max)
    }
}

/// Constraints on a string field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringConstraint {
    /// Minimum length in characters
    pub min_length: Option<usize>,
    /// Maximum length in characters
    pub max_length: Option<usize>,
    /// Regular expression the whole string must match
    pub pattern: Option<String>,
}

/// Constraints on an array field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayConstraint {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Type every element must have
    pub element_type: Option<FieldType>,
}

/// Why a value does not fit a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldViolation {
    /// Wrong variant
    Type { expected: FieldType, found: &'static str },
    /// Right variant, but a range/length/pattern/enum constraint fails
    Constraint(String),
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type { expected, found } => write!(f, "expected {:?}, found {}", expected, found),
            Self::Constraint(message) => f.write_str(message),
        }
    }
}

/// Description of one component field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// Must be supplied on `Add` unless a default exists
    pub required: bool,
    /// `Null` is accepted
    pub nullable: bool,
    pub default: Option<Value>,
    pub range: Option<NumericRange>,
    pub string: Option<StringConstraint>,
    pub array: Option<ArrayConstraint>,
    /// If non-empty, the value must equal one of these
    pub enum_values: Vec<Value>,
}

impl FieldDescriptor {
    /// Optional, non-nullable field without constraints
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            nullable: false,
            default: None,
            range: None,
            string: None,
            array: None,
            enum_values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.range = Some(NumericRange { min, max });
        self
    }

    pub fn with_string_constraint(mut self, constraint: StringConstraint) -> Self {
        self.string = Some(constraint);
        self
    }

    /// Shorthand for a string constraint with only a pattern
    pub fn with_pattern(self, pattern: impl Into<String>) -> Self {
        self.with_string_constraint(StringConstraint {
            pattern: Some(pattern.into()),
            ..Default::default()
        })
    }

    pub fn with_array_constraint(mut self, constraint: ArrayConstraint) -> Self {
        self.array = Some(constraint);
        self
    }

    pub fn with_enum_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Check a value against the type and every constraint.
    ///
    /// `pattern` is the compiled form of the string pattern, if any; a
    /// pattern that failed to compile rejects every string.
    pub fn check_value(&self, value: &Value, pattern: Option<&Regex>) -> Result<(), FieldViolation> {
        if value.is_null() && self.nullable {
            return Ok(());
        }
        if !self.field_type.matches(value) {
            return Err(FieldViolation::Type {
                expected: self.field_type,
                found: value.type_name(),
            });
        }

        if let Some(range) = &self.range {
            if let Some(number) = value.as_float() {
                if !range.contains(number) {
                    return Err(FieldViolation::Constraint(format!(
                        "{} outside [{}, {}]",
                        number,
                        range.min.map_or("-inf".to_string(), |v| v.to_string()),
                        range.max.map_or("inf".to_string(), |v| v.to_string()),
                    )));
                }
            }
        }

        if let (Some(constraint), Some(s)) = (&self.string, value.as_str()) {
            let length = s.chars().count();
            if constraint.min_length.map_or(false, |min| length < min)
                || constraint.max_length.map_or(false, |max| length > max)
            {
                return Err(FieldViolation::Constraint(format!(
                    "string length {} out of bounds",
                    length
                )));
            }
            if let Some(source) = &constraint.pattern {
                if !pattern.map_or(false, |re| re.is_match(s)) {
                    return Err(FieldViolation::Constraint(format!(
                        "'{}' does not match pattern '{}'",
                        s, source
                    )));
                }
            }
        }

        if let (Some(constraint), Some(items)) = (&self.array, value.as_array()) {
            if constraint.min_length.map_or(false, |min| items.len() < min)
                || constraint.max_length.map_or(false, |max| items.len() > max)
            {
                return Err(FieldViolation::Constraint(format!(
                    "array length {} out of bounds",
                    items.len()
                )));
            }
            if let Some(element_type) = constraint.element_type {
                if let Some(index) = items.iter().position(|item| !element_type.matches(item)) {
                    return Err(FieldViolation::Constraint(format!(
                        "element {} is {}, expected {:?}",
                        index,
                        items[index].type_name(),
                        element_type
                    )));
                }
            }
        }

        if !self.enum_values.is_empty() && !self.enum_values.contains(value) {
            return Err(FieldViolation::Constraint(
                "value is not one of the allowed values".to_string(),
            ));
        }

        Ok(())
    }

    fn encode(&self, w: &mut ByteWriter) {
        fn write_len(w: &mut ByteWriter, len: &usize) {
            w.write_u64(*len as u64);
        }

        w.write_str(&self.name);
        w.write_u8(self.field_type.tag());
        w.write_bool(self.required);
        w.write_bool(self.nullable);
        w.write_option(self.default.as_ref(), |w, v| v.encode(w));
        w.write_option(self.range.as_ref(), |w, range| {
            w.write_option(range.min.as_ref(), |w, v| w.write_f64(*v));
            w.write_option(range.max.as_ref(), |w, v| w.write_f64(*v));
        });
        w.write_option(self.string.as_ref(), |w, c| {
            w.write_option(c.min_length.as_ref(), write_len);
            w.write_option(c.max_length.as_ref(), write_len);
            w.write_option(c.pattern.as_ref(), |w, p| w.write_str(p));
        });
        w.write_option(self.array.as_ref(), |w, c| {
            w.write_option(c.min_length.as_ref(), write_len);
            w.write_option(c.max_length.as_ref(), write_len);
            w.write_option(c.element_type.as_ref(), |w, t| w.write_u8(t.tag()));
        });
        w.write_seq(&self.enum_values, |w, v| v.encode(w));
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        fn read_len(r: &mut ByteReader<'_>) -> Option<usize> {
            usize::try_from(r.read_u64()?).ok()
        }
        fn read_type(r: &mut ByteReader<'_>) -> Option<FieldType> {
            FieldType::from_tag(r.read_u8()?)
        }

        Some(Self {
            name: r.read_string()?,
            field_type: read_type(r)?,
            required: r.read_bool()?,
            nullable: r.read_bool()?,
            default: r.read_option(Value::decode)?,
            range: r.read_option(|r| {
                Some(NumericRange {
                    min: r.read_option(ByteReader::read_f64)?,
                    max: r.read_option(ByteReader::read_f64)?,
                })
            })?,
            string: r.read_option(|r| {
                Some(StringConstraint {
                    min_length: r.read_option(read_len)?,
                    max_length: r.read_option(read_len)?,
                    pattern: r.read_option(ByteReader::read_string)?,
                })
            })?,
            array: r.read_option(|r| {
                Some(ArrayConstraint {
                    min_length: r.read_option(read_len)?,
                    max_length: r.read_option(read_len)?,
                    element_type: r.read_option(read_type)?,
                })
            })?,
            enum_values: r.read_seq(Value::decode)?,
        })
    }
}

/// Schema for one component type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSchema {
    /// Component type name
    pub type_name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
}

impl ComponentSchema {
    /// Create a new component schema
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field; a later field with the same name replaces the earlier one
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Object holding every declared default
    pub fn default_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
                .collect(),
        )
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_str(&self.type_name);
        w.write_seq(&self.fields, |w, f| f.encode(w));
    }

    fn decode(r: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            type_name: r.read_string()?,
            fields: r.read_seq(FieldDescriptor::decode)?,
        })
    }
}

impl WireFormat for ComponentSchema {
    const MAGIC: [u8; 4] = *b"SCHM";

    fn encode_payload(&self, w: &mut ByteWriter) {
        self.encode(w);
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        Self::decode(r)
    }
}

/// Registry of component schemas keyed by type name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ComponentSchema>,
    patterns: HashMap<String, Regex>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a schema, returning the previous one
    pub fn register(&mut self, schema: ComponentSchema) -> Option<ComponentSchema> {
        for pattern in schema
            .fields
            .iter()
            .filter_map(|f| f.string.as_ref()?.pattern.as_ref())
        {
            if self.patterns.contains_key(pattern) {
                continue;
            }
            // Anchored so the whole string has to match
            match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(re) => {
                    self.patterns.insert(pattern.clone(), re);
                }
                Err(err) => log::warn!(
                    "schema {}: invalid pattern '{}': {}",
                    schema.type_name,
                    pattern,
                    err
                ),
            }
        }
        log::debug!("registered schema {} ({} fields)", schema.type_name, schema.fields.len());
        self.schemas.insert(schema.type_name.clone(), schema)
    }

    pub fn unregister(&mut self, type_name: &str) -> Option<ComponentSchema> {
        self.schemas.remove(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&ComponentSchema> {
        self.schemas.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentSchema> {
        self.schemas.values()
    }

    /// Check a value against a field using the compiled pattern cache
    pub fn check_field(&self, field: &FieldDescriptor, value: &Value) -> Result<(), FieldViolation> {
        let pattern = field
            .string
            .as_ref()
            .and_then(|c| c.pattern.as_ref())
            .and_then(|p| self.patterns.get(p));
        field.check_value(value, pattern)
    }
}

impl PartialEq for SchemaRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.schemas == other.schemas
    }
}

impl WireFormat for SchemaRegistry {
    const MAGIC: [u8; 4] = *b"SREG";

    fn encode_payload(&self, w: &mut ByteWriter) {
        w.write_seq(self.schemas.values(), |w, s| s.encode(w));
    }

    fn decode_payload(r: &mut ByteReader<'_>, _version: u32) -> Option<Self> {
        let mut registry = Self::new();
        for schema in r.read_seq(ComponentSchema::decode)? {
            registry.register(schema);
        }
        Some(registry)
    }
}
