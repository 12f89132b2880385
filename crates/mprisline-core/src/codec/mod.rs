//! Value codec: the textual line encoding of D-Bus typed values.
//!
//! ```text
//!   "a{sv}" ──► Signature ──┐
//!                           ├──► decode_value ──► StructuredValue
//!   lines from the client ──┘
//!
//!   StructuredValue + "o:x" ──► encode_arguments ──► lines to the client
//! ```

/// Lines → values.
pub mod decode;
/// Values → lines.
pub mod encode;
/// Type signature parsing.
pub mod signature;
/// The value tree.
pub mod value;

pub use decode::{decode_basic, decode_value, split_typed_line, END_ARRAY};
pub use encode::{encode_arguments, encode_value};
pub use signature::{BasicType, Signature, SignatureError, MAX_SIGNATURE_LEN};
pub use value::StructuredValue;

use crate::channel::ChannelError;

/// Failures while converting between lines and values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("bad type signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("line I/O failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("{text:?} is not a valid {ty:?} value")]
    InvalidNumber { ty: BasicType, text: String },

    #[error("expected <type>:<value>, got {0:?}")]
    MissingSeparator(String),
}
