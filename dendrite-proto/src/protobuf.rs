//! Wire-format decoding and the runtime field tree.

mod errors;
mod field;
mod message;
mod value;
mod varint;

pub use errors::{ErrorKind, ParseError};
pub use field::{EnumField, Field, PackedField, PrimKind, ScalarValue, StringField};
pub use message::MessageField;
pub use value::{ByteReader, StreamReader};

pub(crate) use field::create_field;

#[cfg(test)]
pub(crate) use varint::encode_varint;
