//! Text lines → [`StructuredValue`].
//!
//! Basic values occupy one line. Composite values span several:
//!
//! ```text
//! as          a{sv}            (ox)        v
//! first       xesam:title      /track/3    s:Playing
//! second      s:Song name      120000
//! :END ARRAY: :END ARRAY:
//! ```
//!
//! A decode call may be handed the first line up front (`first`), which is
//! how `type:value` replies and array elements feed nested decoders.

use super::signature::{BasicType, Signature};
use super::value::StructuredValue;
use super::CodecError;
use crate::channel::LineSource;
use crate::BoxFuture;

/// Terminates an array on the wire.
pub const END_ARRAY: &str = ":END ARRAY:";

/// Decode one value of type `signature`, reading further lines from `source`
/// as the type requires.
///
/// `first` is always the value's first line, even when empty. Only a
/// `type:` line with nothing after the colon means the value starts on the
/// next line, and [`split_typed_line`] turns that into `None`.
pub fn decode_value<'a, S>(
    source: &'a mut S,
    signature: &'a Signature,
    first: Option<String>,
) -> BoxFuture<'a, Result<StructuredValue, CodecError>>
where
    S: LineSource + ?Sized,
{
    Box::pin(async move {
        match signature {
            Signature::Basic(basic) => {
                let line = match first {
                    Some(line) => line,
                    None => source.next_line().await?,
                };
                decode_basic(*basic, &line)
            }
            Signature::Variant => {
                let line = match non_empty(first) {
                    Some(line) => line,
                    None => source.next_line().await?,
                };
                let (inner_sig, inner_first) = split_typed_line(&line)?;
                let inner = decode_value(source, &inner_sig, inner_first).await?;
                Ok(StructuredValue::Variant(Box::new(inner)))
            }
            Signature::Array(element) => {
                let mut items = Vec::new();
                let mut pending = first;
                loop {
                    let line = match pending.take() {
                        Some(line) => line,
                        None => source.next_line().await?,
                    };
                    if line == END_ARRAY {
                        break;
                    }
                    items.push(decode_value(source, element, Some(line)).await?);
                }
                Ok(StructuredValue::Array {
                    element: element.as_ref().clone(),
                    items,
                })
            }
            Signature::DictEntry(key_type, value_sig) => {
                let key_line = match first {
                    Some(line) => line,
                    None => source.next_line().await?,
                };
                let key = decode_basic(*key_type, &key_line)?;
                let value_line = source.next_line().await?;
                let value = decode_value(source, value_sig, Some(value_line)).await?;
                Ok(StructuredValue::dict_entry(key, value))
            }
            Signature::Struct(fields) => {
                let mut first = first;
                let mut decoded = Vec::with_capacity(fields.len());
                for field in fields {
                    decoded.push(decode_value(source, field, first.take()).await?);
                }
                Ok(StructuredValue::Tuple(decoded))
            }
        }
    })
}

/// Split a `<type>:<value>` line at its first colon.
///
/// An empty value means the value lines follow on the channel.
pub fn split_typed_line(line: &str) -> Result<(Signature, Option<String>), CodecError> {
    let (ty, rest) = line
        .split_once(':')
        .ok_or_else(|| CodecError::MissingSeparator(line.to_string()))?;
    let signature = Signature::parse(ty)?;
    let first = (!rest.is_empty()).then(|| rest.to_string());
    Ok((signature, first))
}

fn non_empty(line: Option<String>) -> Option<String> {
    line.filter(|l| !l.is_empty())
}

macro_rules! clamped {
    ($n:expr, $t:ty) => {
        $n.clamp(<$t>::MIN as i128, <$t>::MAX as i128) as $t
    };
}

/// Decode a single-line basic value. Integers outside the target range are
/// clamped to it.
pub fn decode_basic(ty: BasicType, text: &str) -> Result<StructuredValue, CodecError> {
    let integer = || {
        parse_integer(text).ok_or_else(|| CodecError::InvalidNumber {
            ty,
            text: text.to_string(),
        })
    };
    Ok(match ty {
        BasicType::Boolean => StructuredValue::Bool(text.eq_ignore_ascii_case("true")),
        BasicType::Byte => StructuredValue::Byte(clamped!(integer()?, u8)),
        BasicType::Int16 => StructuredValue::Int16(clamped!(integer()?, i16)),
        BasicType::UInt16 => StructuredValue::UInt16(clamped!(integer()?, u16)),
        BasicType::Int32 => StructuredValue::Int32(clamped!(integer()?, i32)),
        BasicType::UInt32 => StructuredValue::UInt32(clamped!(integer()?, u32)),
        BasicType::Int64 => StructuredValue::Int64(clamped!(integer()?, i64)),
        BasicType::UInt64 => StructuredValue::UInt64(clamped!(integer()?, u64)),
        BasicType::UnixFd => StructuredValue::Handle(clamped!(integer()?, i32)),
        BasicType::Double => StructuredValue::Double(parse_double(text)),
        BasicType::String => StructuredValue::Str(text.to_string()),
        BasicType::ObjectPath => StructuredValue::ObjectPath(text.to_string()),
        BasicType::Signature => StructuredValue::Signature(text.to_string()),
    })
}

/// Leading integer of `text`, saturating at the `i128` range; trailing
/// garbage is ignored.
fn parse_integer(text: &str) -> Option<i128> {
    let s = text.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let len = digits.bytes().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let magnitude = digits[..len].bytes().fold(0i128, |acc, d| {
        acc.saturating_mul(10).saturating_add(i128::from(d - b'0'))
    });
    Some(if negative { -magnitude } else { magnitude })
}

/// Longest numeric prefix of `text`, or 0.0 when there is none.
fn parse_double(text: &str) -> f64 {
    let s = text.trim_start();
    let candidate = s
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
        .count();
    (1..=candidate)
        .rev()
        .find_map(|end| s[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}
