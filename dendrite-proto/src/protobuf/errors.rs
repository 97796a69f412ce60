use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::protobuf::varint::VarintError;

/// Errors reported while compiling a schema or parsing a message against it.
#[derive(Debug)]
pub struct ParseError {
    kind: ErrorKind,
    context: Option<String>,
    token_pos: Option<usize>,
}

impl ParseError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            token_pos: None,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Return the field or message name associated with this error.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Return the text-format token index associated with this error.
    pub fn token_pos(&self) -> Option<usize> {
        self.token_pos
    }

    /// Associate a field or message name with this error.
    pub fn with_context(mut self, context: &str) -> Self {
        if self.context.is_none() {
            self.context = Some(context.to_string());
        }
        self
    }

    /// Associate a text-format token index with this error.
    pub fn with_token_pos(mut self, pos: usize) -> Self {
        if self.token_pos.is_none() {
            self.token_pos = Some(pos);
        }
        self
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(context) = &self.context {
            write!(f, " (in \"{}\")", context)?;
        }
        if let Some(pos) = self.token_pos {
            write!(f, " (at token {})", pos)?;
        }
        Ok(())
    }
}

impl Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(val: std::io::Error) -> Self {
        Self::new(ErrorKind::Io(val))
    }
}

impl From<VarintError> for ParseError {
    fn from(val: VarintError) -> Self {
        match val {
            VarintError::Eof | VarintError::Truncated => Self::new(ErrorKind::Eof),
            VarintError::Invalid => Self::new(ErrorKind::InvalidVarint),
            VarintError::Io(err) => Self::new(ErrorKind::Io(err)),
        }
    }
}

impl From<ErrorKind> for ParseError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Enum describing the kind of a [`ParseError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An IO error occurred while reading the input.
    Io(std::io::Error),

    /// The end of the input was reached unexpectedly.
    Eof,

    /// A varint value encodes more than 64 bits of value data.
    InvalidVarint,

    /// A field key carries a tag of zero.
    InvalidTag(u64),

    /// A field key carries a wire type other than 0, 1, 2 or 5.
    InvalidWireType(u64),

    /// The payload of a length-delimited field does not match its declared
    /// length, or a bulk copy destination does not match the data size.
    LengthMismatch,

    /// A string field contained invalid UTF-8.
    InvalidUtf8,

    /// An integer was read for an enum field that has no matching value.
    UnknownEnumValue(i64),

    /// A text-format document used a field name the schema does not declare.
    UnknownField(String),

    /// A type referenced by the schema was not found in the descriptor set.
    NameNotFound(String),

    /// A descriptor set declares two types with the same qualified name.
    DuplicateTypeName(String),

    /// A field descriptor uses a type id this parser does not support.
    UnknownTypeId(i64),

    /// A field descriptor uses a label id this parser does not support.
    UnknownLabelId(i64),

    /// A descriptor field that is required to compile the schema is missing.
    MissingField(String),

    /// A token could not be interpreted as a value of the schema type.
    InvalidValue(String),

    /// A value was extracted with a target type that does not match the
    /// schema type.
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// An index into a repeated or packed field was out of range.
    IndexOutOfRange { index: usize, len: usize },

    /// An accessor that requires exactly one parsed field saw a different
    /// count.
    NodeCount(usize),

    /// The text-format tokenizer produced an unexpected token.
    UnexpectedToken {
        expected: &'static str,
        found: String,
    },
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Io(err) => write!(f, "io error: {err}"),
            ErrorKind::Eof => write!(f, "unexpected end of input"),
            ErrorKind::InvalidVarint => write!(f, "invalid varint"),
            ErrorKind::InvalidTag(tag) => write!(f, "unsupported tag value [{tag}]"),
            ErrorKind::InvalidWireType(wt) => write!(f, "unsupported wire type [{wt}]"),
            ErrorKind::LengthMismatch => write!(f, "field length mismatch"),
            ErrorKind::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
            ErrorKind::UnknownEnumValue(val) => write!(f, "unknown enum value [{val}]"),
            ErrorKind::UnknownField(name) => write!(f, "unknown field \"{name}\""),
            ErrorKind::NameNotFound(name) => write!(f, "type name \"{name}\" not found"),
            ErrorKind::DuplicateTypeName(name) => {
                write!(f, "duplicate type name \"{name}\"")
            }
            ErrorKind::UnknownTypeId(id) => write!(f, "unknown protobuf type id [{id}]"),
            ErrorKind::UnknownLabelId(id) => write!(f, "unknown protobuf label id [{id}]"),
            ErrorKind::MissingField(name) => {
                write!(f, "descriptor field \"{name}\" is missing")
            }
            ErrorKind::InvalidValue(token) => {
                write!(f, "cannot interpret value \"{token}\"")
            }
            ErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: requested {expected}, found {actual}")
            }
            ErrorKind::IndexOutOfRange { index, len } => {
                write!(f, "index [{index}] out of range [0, {len})")
            }
            ErrorKind::NodeCount(n) => {
                write!(f, "expected exactly one field, found {n}")
            }
            ErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "expected {expected}, found \"{found}\"")
            }
        }
    }
}
