//! The runtime value tree built by the decoder and consumed by the encoder.

use super::signature::{BasicType, Signature};

/// A dynamically typed value mirroring the D-Bus type system.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    /// Index of a file descriptor; only meaningful to the bus layer.
    Handle(i32),
    Array {
        /// Kept so that empty arrays still know their type.
        element: Signature,
        items: Vec<StructuredValue>,
    },
    DictEntry {
        key: Box<StructuredValue>,
        value: Box<StructuredValue>,
    },
    Tuple(Vec<StructuredValue>),
    Variant(Box<StructuredValue>),
}

impl StructuredValue {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn variant(inner: StructuredValue) -> Self {
        Self::Variant(Box::new(inner))
    }

    pub fn dict_entry(key: StructuredValue, value: StructuredValue) -> Self {
        Self::DictEntry {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// An `as` array.
    pub fn string_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array {
            element: Signature::Basic(BasicType::String),
            items: items.into_iter().map(|s| Self::Str(s.into())).collect(),
        }
    }

    pub fn basic_type(&self) -> Option<BasicType> {
        Some(match self {
            Self::Bool(_) => BasicType::Boolean,
            Self::Byte(_) => BasicType::Byte,
            Self::Int16(_) => BasicType::Int16,
            Self::UInt16(_) => BasicType::UInt16,
            Self::Int32(_) => BasicType::Int32,
            Self::UInt32(_) => BasicType::UInt32,
            Self::Int64(_) => BasicType::Int64,
            Self::UInt64(_) => BasicType::UInt64,
            Self::Double(_) => BasicType::Double,
            Self::Str(_) => BasicType::String,
            Self::ObjectPath(_) => BasicType::ObjectPath,
            Self::Signature(_) => BasicType::Signature,
            Self::Handle(_) => BasicType::UnixFd,
            Self::Array { .. } | Self::DictEntry { .. } | Self::Tuple(_) | Self::Variant(_) => {
                return None;
            }
        })
    }

    /// The type this value was built for.
    ///
    /// Dict entries with a non-basic key cannot be produced by the decoder;
    /// such a key is reported as a string.
    pub fn signature(&self) -> Signature {
        match self {
            Self::Array { element, .. } => Signature::Array(Box::new(element.clone())),
            Self::DictEntry { key, value } => Signature::DictEntry(
                key.basic_type().unwrap_or(BasicType::String),
                Box::new(value.signature()),
            ),
            Self::Tuple(fields) => Signature::Struct(fields.iter().map(Self::signature).collect()),
            Self::Variant(_) => Signature::Variant,
            scalar => Signature::Basic(scalar.basic_type().unwrap_or(BasicType::String)),
        }
    }

    /// Positional child of a tuple or array.
    pub fn child(&self, index: usize) -> Option<&StructuredValue> {
        match self {
            Self::Tuple(fields) => fields.get(index),
            Self::Array { items, .. } => items.get(index),
            _ => None,
        }
    }

    /// Text form of a basic value as it travels on the line protocol.
    pub fn basic_text(&self) -> Option<String> {
        Some(match self {
            Self::Bool(b) => b.to_string(),
            Self::Byte(n) => n.to_string(),
            Self::Int16(n) => n.to_string(),
            Self::UInt16(n) => n.to_string(),
            Self::Int32(n) => n.to_string(),
            Self::UInt32(n) => n.to_string(),
            Self::Int64(n) => n.to_string(),
            Self::UInt64(n) => n.to_string(),
            Self::Handle(n) => n.to_string(),
            Self::Double(d) => format!("{d:.6}"),
            Self::Str(s) | Self::ObjectPath(s) | Self::Signature(s) => s.clone(),
            _ => return None,
        })
    }
}
