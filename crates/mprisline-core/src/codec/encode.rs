//! [`StructuredValue`] → text lines, for values the client asked for.
//!
//! The client names what it wants with a colon-separated tag list such as
//! `o:x`. Each tag produces the lines of one value, picked either as the
//! whole value (when its type equals the tag) or as the tag's positional
//! child of a tuple or array.

use tracing::warn;

use super::decode::END_ARRAY;
use super::signature::{check_length, Signature};
use super::value::StructuredValue;
use super::CodecError;
use crate::channel::LineSink;
use crate::BoxFuture;

/// Sent instead of any value when the tag list is over the length ceiling.
pub const TYPE_LENGTH_ERROR: &str = "ERROR:typelength";

/// Sent in place of a value that could not be extracted.
pub const EXTRACTION_FAILED: &str = "error";

/// Write `value` to `sink` as directed by `tags`.
pub async fn encode_arguments<S>(
    sink: &mut S,
    tags: &str,
    value: &StructuredValue,
) -> Result<(), CodecError>
where
    S: LineSink + ?Sized,
{
    if let Err(e) = check_length(tags) {
        sink.send_line(TYPE_LENGTH_ERROR).await?;
        return Err(e.into());
    }
    if tags.is_empty() {
        return Ok(());
    }

    for (index, tag) in tags.split(':').enumerate() {
        if tag.is_empty() {
            sink.send_line("").await?;
            continue;
        }
        let wanted = Signature::parse(tag)?;
        match extract(value, &wanted, index) {
            Some(v) => encode_value(sink, v).await?,
            None => {
                warn!(
                    tag,
                    index,
                    have = %value.signature(),
                    "No value matches the requested type, sending placeholder"
                );
                sink.send_line(EXTRACTION_FAILED).await?;
            }
        }
    }
    Ok(())
}

fn extract<'v>(
    value: &'v StructuredValue,
    wanted: &Signature,
    index: usize,
) -> Option<&'v StructuredValue> {
    if value.signature() == *wanted {
        return Some(value);
    }
    value.child(index).filter(|child| child.signature() == *wanted)
}

/// Write one value using the same line layout the decoder reads.
pub fn encode_value<'a, S>(
    sink: &'a mut S,
    value: &'a StructuredValue,
) -> BoxFuture<'a, Result<(), CodecError>>
where
    S: LineSink + ?Sized,
{
    Box::pin(async move {
        match value {
            StructuredValue::Array { items, .. } => {
                for item in items {
                    encode_value(sink, item).await?;
                }
                sink.send_line(END_ARRAY).await?;
            }
            StructuredValue::DictEntry { key, value } => {
                encode_value(sink, key).await?;
                encode_value(sink, value).await?;
            }
            StructuredValue::Tuple(fields) => {
                for field in fields {
                    encode_value(sink, field).await?;
                }
            }
            StructuredValue::Variant(inner) => {
                let sig = inner.signature();
                match inner.basic_text() {
                    Some(text) if !text.is_empty() => {
                        sink.send_line(&format!("{sig}:{text}")).await?;
                    }
                    // An empty inline value means "read the next line".
                    Some(_) => {
                        sink.send_line(&format!("{sig}:")).await?;
                        sink.send_line("").await?;
                    }
                    None => {
                        sink.send_line(&format!("{sig}:")).await?;
                        encode_value(sink, inner).await?;
                    }
                }
            }
            scalar => {
                let text = scalar.basic_text().unwrap_or_default();
                sink.send_line(&text).await?;
            }
        }
        Ok(())
    })
}
