//! D-Bus type signatures as a closed enum.

use std::fmt;
use std::str::FromStr;

/// Signatures this long (or longer) are refused outright.
pub const MAX_SIGNATURE_LEN: usize = 255;

/// Nesting limit for composite types; D-Bus allows 32 levels each of arrays
/// and structs.
const MAX_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature is {0} characters long (limit is {MAX_SIGNATURE_LEN})")]
    TooLong(usize),

    #[error("empty signature")]
    Empty,

    #[error("unknown type code {code:?} at offset {offset}")]
    UnknownCode { code: char, offset: usize },

    #[error("signature ends inside a composite type")]
    Unterminated,

    #[error("unexpected {code:?} at offset {offset}")]
    Unexpected { code: char, offset: usize },

    #[error("empty struct at offset {0}")]
    EmptyStruct(usize),

    #[error("dict entry key at offset {0} must be a basic type")]
    CompositeKey(usize),

    #[error("dict entry at offset {0} must hold exactly a key and a value")]
    DictArity(usize),

    #[error("trailing characters after a complete type at offset {0}")]
    Trailing(usize),

    #[error("type nesting deeper than {MAX_DEPTH}")]
    TooDeep,
}

/// Single-character types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Boolean,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
}

impl BasicType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'b' => Self::Boolean,
            b'y' => Self::Byte,
            b'n' => Self::Int16,
            b'q' => Self::UInt16,
            b'i' => Self::Int32,
            b'u' => Self::UInt32,
            b'x' => Self::Int64,
            b't' => Self::UInt64,
            b'd' => Self::Double,
            b's' => Self::String,
            b'o' => Self::ObjectPath,
            b'g' => Self::Signature,
            b'h' => Self::UnixFd,
            _ => return None,
        })
    }

    pub fn code(self) -> char {
        match self {
            Self::Boolean => 'b',
            Self::Byte => 'y',
            Self::Int16 => 'n',
            Self::UInt16 => 'q',
            Self::Int32 => 'i',
            Self::UInt32 => 'u',
            Self::Int64 => 'x',
            Self::UInt64 => 't',
            Self::Double => 'd',
            Self::String => 's',
            Self::ObjectPath => 'o',
            Self::Signature => 'g',
            Self::UnixFd => 'h',
        }
    }

    /// String-like types carry their text verbatim.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::String | Self::ObjectPath | Self::Signature)
    }
}

/// One complete type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    Basic(BasicType),
    /// `a` followed by the element type.
    Array(Box<Signature>),
    /// `{KV}`; keys are always basic.
    DictEntry(BasicType, Box<Signature>),
    /// `(T1…Tn)`, never empty.
    Struct(Vec<Signature>),
    /// `v`
    Variant,
}

impl Signature {
    /// Parse exactly one complete type from `text`.
    pub fn parse(text: &str) -> Result<Self, SignatureError> {
        check_length(text)?;
        if text.is_empty() {
            return Err(SignatureError::Empty);
        }
        let bytes = text.as_bytes();
        let (sig, consumed) = parse_at(bytes, 0, 0)?;
        if consumed != bytes.len() {
            return Err(SignatureError::Trailing(consumed));
        }
        Ok(sig)
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, Self::Basic(_))
    }

    pub fn as_basic(&self) -> Option<BasicType> {
        match self {
            Self::Basic(t) => Some(*t),
            _ => None,
        }
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<BasicType> for Signature {
    fn from(t: BasicType) -> Self {
        Self::Basic(t)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic(t) => write!(f, "{}", t.code()),
            Self::Array(elem) => write!(f, "a{elem}"),
            Self::DictEntry(k, v) => write!(f, "{{{}{v}}}", k.code()),
            Self::Struct(fields) => {
                f.write_str("(")?;
                for field in fields {
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            Self::Variant => f.write_str("v"),
        }
    }
}

/// Enforce the protocol's signature length ceiling.
pub fn check_length(text: &str) -> Result<(), SignatureError> {
    if text.len() >= MAX_SIGNATURE_LEN {
        return Err(SignatureError::TooLong(text.len()));
    }
    Ok(())
}

/// Parse one type starting at `pos`, returning it and the number of bytes it
/// spans.
fn parse_at(bytes: &[u8], pos: usize, depth: usize) -> Result<(Signature, usize), SignatureError> {
    if depth > MAX_DEPTH {
        return Err(SignatureError::TooDeep);
    }
    let Some(&code) = bytes.get(pos) else {
        return Err(SignatureError::Unterminated);
    };

    if let Some(basic) = BasicType::from_code(code) {
        return Ok((Signature::Basic(basic), 1));
    }

    match code {
        b'v' => Ok((Signature::Variant, 1)),
        b'a' => {
            let (elem, used) = parse_at(bytes, pos + 1, depth + 1)?;
            Ok((Signature::Array(Box::new(elem)), 1 + used))
        }
        b'(' => {
            let mut fields = Vec::new();
            let mut cursor = pos + 1;
            loop {
                match bytes.get(cursor) {
                    None => return Err(SignatureError::Unterminated),
                    Some(b')') => break,
                    Some(_) => {
                        let (field, used) = parse_at(bytes, cursor, depth + 1)?;
                        fields.push(field);
                        cursor += used;
                    }
                }
            }
            if fields.is_empty() {
                return Err(SignatureError::EmptyStruct(pos));
            }
            Ok((Signature::Struct(fields), cursor + 1 - pos))
        }
        b'{' => {
            let key_pos = pos + 1;
            let key = match bytes.get(key_pos) {
                None => return Err(SignatureError::Unterminated),
                Some(b'}') => return Err(SignatureError::DictArity(pos)),
                Some(&k) => match BasicType::from_code(k) {
                    Some(basic) => basic,
                    None if matches!(k, b'(' | b'{' | b'a' | b'v') => {
                        return Err(SignatureError::CompositeKey(key_pos));
                    }
                    None => {
                        return Err(SignatureError::UnknownCode {
                            code: k as char,
                            offset: key_pos,
                        });
                    }
                },
            };
            let value_pos = key_pos + 1;
            if bytes.get(value_pos) == Some(&b'}') {
                return Err(SignatureError::DictArity(pos));
            }
            let (value, used) = parse_at(bytes, value_pos, depth + 1)?;
            match bytes.get(value_pos + used) {
                Some(b'}') => Ok((
                    Signature::DictEntry(key, Box::new(value)),
                    value_pos + used + 1 - pos,
                )),
                None => Err(SignatureError::Unterminated),
                Some(_) => Err(SignatureError::DictArity(pos)),
            }
        }
        b')' | b'}' => Err(SignatureError::Unexpected {
            code: code as char,
            offset: pos,
        }),
        other => Err(SignatureError::UnknownCode {
            code: other as char,
            offset: pos,
        }),
    }
}
