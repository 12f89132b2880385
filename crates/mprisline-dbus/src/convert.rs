//! Conversion between bus values and [`StructuredValue`] trees.
//!
//! Values coming off the bus become [`StructuredValue`]s before they are
//! encoded for the client; decoded client values go the other way before
//! they are put in a reply or a signal body.

use mprisline_core::codec::{Signature, StructuredValue};
use zbus::zvariant::{self, Array, Dict, ObjectPath, StructureBuilder, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{0} values cannot cross the line protocol")]
    Unsupported(&'static str),

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

fn invalid(kind: &'static str, reason: impl std::fmt::Display) -> ConvertError {
    ConvertError::Invalid {
        kind,
        reason: reason.to_string(),
    }
}

/// Build the bus form of a decoded client value.
///
/// An array whose elements are dict entries becomes a dictionary.
pub fn to_value(value: &StructuredValue) -> Result<Value<'static>, ConvertError> {
    Ok(match value {
        StructuredValue::Bool(b) => Value::from(*b),
        StructuredValue::Byte(n) => Value::from(*n),
        StructuredValue::Int16(n) => Value::from(*n),
        StructuredValue::UInt16(n) => Value::from(*n),
        StructuredValue::Int32(n) => Value::from(*n),
        StructuredValue::UInt32(n) => Value::from(*n),
        StructuredValue::Int64(n) => Value::from(*n),
        StructuredValue::UInt64(n) => Value::from(*n),
        StructuredValue::Double(d) => Value::from(*d),
        StructuredValue::Str(s) => Value::from(s.clone()),
        StructuredValue::ObjectPath(p) => Value::from(
            ObjectPath::try_from(p.clone()).map_err(|e| invalid("object path", e))?,
        ),
        StructuredValue::Signature(s) => Value::from(
            zvariant::Signature::try_from(s.clone()).map_err(|e| invalid("signature", e))?,
        ),
        StructuredValue::Handle(_) => return Err(ConvertError::Unsupported("file descriptor")),
        StructuredValue::Array { element, items } => array_value(element, items)?,
        StructuredValue::DictEntry { .. } => {
            return Err(invalid("dict entry", "found outside of an array"));
        }
        StructuredValue::Tuple(fields) => {
            if fields.is_empty() {
                return Err(invalid("structure", "no fields"));
            }
            let mut builder = StructureBuilder::new();
            for field in fields {
                builder = builder.append_field(to_value(field)?);
            }
            Value::from(builder.build())
        }
        StructuredValue::Variant(inner) => Value::Value(Box::new(to_value(inner)?)),
    })
}

fn array_value(
    element: &Signature,
    items: &[StructuredValue],
) -> Result<Value<'static>, ConvertError> {
    if let Signature::DictEntry(key, value) = element {
        let mut dict = Dict::new(
            bus_signature(&Signature::Basic(*key))?,
            bus_signature(value)?,
        );
        for item in items {
            let StructuredValue::DictEntry { key, value } = item else {
                return Err(invalid("dictionary", "element is not a dict entry"));
            };
            dict.append(to_value(key)?, to_value(value)?)
                .map_err(|e| invalid("dictionary", e))?;
        }
        return Ok(Value::Dict(dict));
    }

    let mut array = Array::new(bus_signature(element)?);
    for item in items {
        array
            .append(to_value(item)?)
            .map_err(|e| invalid("array", e))?;
    }
    Ok(Value::Array(array))
}

fn bus_signature(signature: &Signature) -> Result<zvariant::Signature<'static>, ConvertError> {
    zvariant::Signature::try_from(signature.to_string()).map_err(|e| invalid("signature", e))
}

/// Read a bus value into the tree the encoder walks.
///
/// Dictionaries are not accepted: nothing a caller can send to an MPRIS
/// method or writable property carries one.
pub fn from_value(value: &Value<'_>) -> Result<StructuredValue, ConvertError> {
    Ok(match value {
        Value::Bool(b) => StructuredValue::Bool(*b),
        Value::U8(n) => StructuredValue::Byte(*n),
        Value::I16(n) => StructuredValue::Int16(*n),
        Value::U16(n) => StructuredValue::UInt16(*n),
        Value::I32(n) => StructuredValue::Int32(*n),
        Value::U32(n) => StructuredValue::UInt32(*n),
        Value::I64(n) => StructuredValue::Int64(*n),
        Value::U64(n) => StructuredValue::UInt64(*n),
        Value::F64(d) => StructuredValue::Double(*d),
        Value::Str(s) => StructuredValue::Str(s.as_str().to_string()),
        Value::ObjectPath(p) => StructuredValue::ObjectPath(p.as_str().to_string()),
        Value::Signature(s) => StructuredValue::Signature(s.as_str().to_string()),
        Value::Value(inner) => StructuredValue::variant(from_value(inner)?),
        Value::Array(array) => {
            let element = Signature::parse(array.element_signature().as_str())
                .map_err(|e| invalid("array signature", e))?;
            let items = array
                .iter()
                .map(from_value)
                .collect::<Result<Vec<_>, _>>()?;
            StructuredValue::Array { element, items }
        }
        Value::Structure(structure) => StructuredValue::Tuple(
            structure
                .fields()
                .iter()
                .map(from_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Dict(_) => return Err(ConvertError::Unsupported("dictionary")),
        _ => return Err(ConvertError::Unsupported("file descriptor")),
    })
}
