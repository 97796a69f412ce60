//! The runtime-polymorphic field tree.
//!
//! A schema compiles to a tree of [`Field`] prototypes. Parsing clones a
//! prototype into a fresh instance for every occurrence of the field on the
//! wire, so the prototypes themselves stay value-free. Dispatch over the
//! field kind is a tagged variant rather than a trait hierarchy; cloning a
//! prototype is a shallow copy of the variant payload.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::protobuf::errors::{ErrorKind, ParseError};
use crate::protobuf::message::MessageField;
use crate::protobuf::value::ByteReader;
use crate::text::TokenCursor;

/// Primitive schema types that can appear outside of a message or enum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimKind {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Bool,
}

impl PrimKind {
    /// Map a `.proto` type name to a primitive kind.
    pub fn from_type_name(name: &str) -> Option<PrimKind> {
        match name {
            "int32" => Some(PrimKind::Int32),
            "uint32" => Some(PrimKind::UInt32),
            "int64" => Some(PrimKind::Int64),
            "uint64" => Some(PrimKind::UInt64),
            "float" => Some(PrimKind::Float),
            "double" => Some(PrimKind::Double),
            "bool" => Some(PrimKind::Bool),
            _ => None,
        }
    }

    /// Size in bytes of one decoded element of this kind.
    pub fn size_of(self) -> usize {
        match self {
            PrimKind::Int32 | PrimKind::UInt32 | PrimKind::Float => 4,
            PrimKind::Int64 | PrimKind::UInt64 | PrimKind::Double => 8,
            PrimKind::Bool => 1,
        }
    }

    /// Whether values of this kind use the varint wire encoding. The
    /// remaining kinds use fixed-width little-endian encodings.
    pub fn is_varint(self) -> bool {
        !matches!(self, PrimKind::Float | PrimKind::Double)
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimKind::Int32 => "int32",
            PrimKind::UInt32 => "uint32",
            PrimKind::Int64 => "int64",
            PrimKind::UInt64 => "uint64",
            PrimKind::Float => "float",
            PrimKind::Double => "double",
            PrimKind::Bool => "bool",
        }
    }
}

/// A single decoded primitive value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
}

impl ScalarValue {
    pub fn kind(&self) -> PrimKind {
        match self {
            ScalarValue::Int32(_) => PrimKind::Int32,
            ScalarValue::UInt32(_) => PrimKind::UInt32,
            ScalarValue::Int64(_) => PrimKind::Int64,
            ScalarValue::UInt64(_) => PrimKind::UInt64,
            ScalarValue::Float(_) => PrimKind::Float,
            ScalarValue::Double(_) => PrimKind::Double,
            ScalarValue::Bool(_) => PrimKind::Bool,
        }
    }

    /// Build a value of `kind` from a decoded varint.
    ///
    /// Signed values arrive as 64-bit two's complement; truncating to the
    /// target width preserves the sign.
    pub(crate) fn from_varint(kind: PrimKind, raw: u64) -> ScalarValue {
        match kind {
            PrimKind::Int32 => ScalarValue::Int32(raw as i32),
            PrimKind::UInt32 => ScalarValue::UInt32(raw as u32),
            PrimKind::Int64 => ScalarValue::Int64(raw as i64),
            PrimKind::UInt64 => ScalarValue::UInt64(raw),
            PrimKind::Bool => ScalarValue::Bool(raw != 0),
            PrimKind::Float | PrimKind::Double => unreachable!("not a varint kind"),
        }
    }

    /// Parse a text-format token as a value of `kind`. An empty token
    /// produces the zero value, which is how absent default declarations are
    /// represented.
    pub(crate) fn from_token(kind: PrimKind, token: &str) -> Result<ScalarValue, ParseError> {
        fn parse<T: std::str::FromStr + Default>(token: &str) -> Result<T, ParseError> {
            if token.is_empty() {
                return Ok(T::default());
            }
            token
                .parse()
                .map_err(|_| ParseError::new(ErrorKind::InvalidValue(token.to_string())))
        }

        Ok(match kind {
            PrimKind::Int32 => ScalarValue::Int32(parse(token)?),
            PrimKind::UInt32 => ScalarValue::UInt32(parse(token)?),
            PrimKind::Int64 => ScalarValue::Int64(parse(token)?),
            PrimKind::UInt64 => ScalarValue::UInt64(parse(token)?),
            PrimKind::Float => ScalarValue::Float(parse(token)?),
            PrimKind::Double => ScalarValue::Double(parse(token)?),
            PrimKind::Bool => match token {
                "" | "false" => ScalarValue::Bool(false),
                "true" => ScalarValue::Bool(true),
                _ => {
                    return Err(ParseError::new(ErrorKind::InvalidValue(token.to_string())));
                }
            },
        })
    }

    /// Write this value into `dst` in little-endian byte order. `dst` must
    /// be exactly `kind().size_of()` bytes.
    pub(crate) fn write_le(&self, dst: &mut [u8]) {
        match *self {
            ScalarValue::Int32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            ScalarValue::UInt32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            ScalarValue::Int64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            ScalarValue::UInt64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            ScalarValue::Float(v) => dst.copy_from_slice(&v.to_le_bytes()),
            ScalarValue::Double(v) => dst.copy_from_slice(&v.to_le_bytes()),
            ScalarValue::Bool(v) => dst[0] = v as u8,
        }
    }

    fn read_le(kind: PrimKind, src: &[u8]) -> ScalarValue {
        match kind {
            PrimKind::Int32 => ScalarValue::Int32(i32::from_le_bytes(src.try_into().unwrap())),
            PrimKind::UInt32 => ScalarValue::UInt32(u32::from_le_bytes(src.try_into().unwrap())),
            PrimKind::Int64 => ScalarValue::Int64(i64::from_le_bytes(src.try_into().unwrap())),
            PrimKind::UInt64 => ScalarValue::UInt64(u64::from_le_bytes(src.try_into().unwrap())),
            PrimKind::Float => ScalarValue::Float(f32::from_le_bytes(src.try_into().unwrap())),
            PrimKind::Double => ScalarValue::Double(f64::from_le_bytes(src.try_into().unwrap())),
            PrimKind::Bool => ScalarValue::Bool(src[0] != 0),
        }
    }
}

/// A string field. The prototype value carries the declared default.
#[derive(Clone, Debug, Default)]
pub struct StringField {
    pub value: String,
}

/// An enum field: a string value plus the mapping from wire integers to
/// value names.
#[derive(Clone, Debug)]
pub struct EnumField {
    values: Rc<BTreeMap<i64, String>>,
    packed: bool,
    pub value: String,
}

impl EnumField {
    pub(crate) fn new(values: BTreeMap<i64, String>, packed: bool, default: String) -> Self {
        Self {
            values: Rc::new(values),
            packed,
            value: default,
        }
    }

    fn read_binary(&mut self, r: &mut dyn ByteReader) -> Result<(), ParseError> {
        let id = if self.packed {
            // A packed enum field arrives as a block of varints; the last
            // value wins.
            let len = r.read_varint()?;
            let end = r.position() + len;
            let mut last = 0i64;
            while r.position() < end {
                last = r.read_varint()? as i64;
            }
            if r.position() != end {
                return Err(ParseError::new(ErrorKind::LengthMismatch));
            }
            last
        } else {
            r.read_varint()? as i64
        };

        match self.values.get(&id) {
            Some(name) => {
                self.value = name.clone();
                Ok(())
            }
            None => Err(ParseError::new(ErrorKind::UnknownEnumValue(id))),
        }
    }
}

/// A packed repeated primitive field.
///
/// Elements are stored decoded, as fixed-width little-endian slots of
/// `kind.size_of()` bytes, so bulk copy-out of fixed-width kinds is a single
/// block copy.
#[derive(Clone, Debug)]
pub struct PackedField {
    kind: PrimKind,
    data: Vec<u8>,
}

impl PackedField {
    pub(crate) fn new(kind: PrimKind) -> Self {
        Self { kind, data: Vec::new() }
    }

    pub fn kind(&self) -> PrimKind {
        self.kind
    }

    /// Number of elements in the payload.
    pub fn len(&self) -> usize {
        self.data.len() / self.kind.size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decoded little-endian element storage.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, index: usize) -> Result<ScalarValue, ParseError> {
        let size = self.kind.size_of();
        if index >= self.len() {
            return Err(ParseError::new(ErrorKind::IndexOutOfRange {
                index,
                len: self.len(),
            }));
        }
        Ok(ScalarValue::read_le(
            self.kind,
            &self.data[index * size..(index + 1) * size],
        ))
    }

    fn push(&mut self, value: ScalarValue) {
        let size = self.kind.size_of();
        let at = self.data.len();
        self.data.resize(at + size, 0);
        value.write_le(&mut self.data[at..]);
    }

    fn read_binary(&mut self, r: &mut dyn ByteReader) -> Result<(), ParseError> {
        self.data.clear();

        let len = r.read_varint()?;
        let size = self.kind.size_of();
        if self.kind.is_varint() {
            // Elements must consume the declared length exactly.
            let end = r.position() + len;
            while r.position() < end {
                let raw = r.read_varint()?;
                self.push(ScalarValue::from_varint(self.kind, raw));
            }
            if r.position() != end {
                return Err(ParseError::new(ErrorKind::LengthMismatch));
            }
        } else {
            if len as usize % size != 0 {
                return Err(ParseError::new(ErrorKind::LengthMismatch));
            }
            self.data = r.read_bytes(len as usize)?;
        }
        Ok(())
    }
}

/// A field of a message: either a prototype on a schema's field table or a
/// parsed instance.
#[derive(Clone, Debug)]
pub enum Field {
    Scalar(ScalarValue),
    Str(StringField),
    Enum(EnumField),
    Packed(PackedField),
    Message(MessageField),
}

impl Field {
    /// Schema type name of this field, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Field::Scalar(value) => value.kind().name(),
            Field::Str(_) => "string",
            Field::Enum(_) => "enum",
            Field::Packed(pack) => pack.kind().name(),
            Field::Message(_) => "message",
        }
    }

    /// Produce a fresh, value-free instance with the same shape as this
    /// prototype. Message clones share the prototype field table.
    pub fn fresh_clone(&self) -> Field {
        match self {
            Field::Scalar(value) => Field::Scalar(*value),
            Field::Str(s) => Field::Str(s.clone()),
            Field::Enum(e) => Field::Enum(e.clone()),
            Field::Packed(pack) => Field::Packed(PackedField::new(pack.kind)),
            Field::Message(msg) => Field::Message(msg.fresh_clone()),
        }
    }

    /// Read this field's value from a binary stream positioned just after
    /// the field's key.
    pub fn read_binary(&mut self, r: &mut dyn ByteReader) -> Result<(), ParseError> {
        match self {
            Field::Scalar(value) => {
                *value = match value.kind() {
                    kind if kind.is_varint() => {
                        let raw = r.read_varint()?;
                        ScalarValue::from_varint(kind, raw)
                    }
                    PrimKind::Float => ScalarValue::Float(f32::from_le_bytes(
                        r.read_u32_le()?.to_le_bytes(),
                    )),
                    _ => ScalarValue::Double(f64::from_le_bytes(r.read_u64_le()?.to_le_bytes())),
                };
                Ok(())
            }
            Field::Str(s) => {
                let len = r.read_varint()?;
                s.value = r.read_string(len as usize)?;
                Ok(())
            }
            Field::Enum(e) => e.read_binary(r),
            Field::Packed(pack) => pack.read_binary(r),
            Field::Message(msg) => msg.read_binary(r),
        }
    }

    /// Read this field's value from a text-format token stream.
    pub fn read_text(&mut self, tokens: &mut TokenCursor) -> Result<(), ParseError> {
        match self {
            Field::Scalar(value) => {
                let token = tokens.next()?;
                *value = ScalarValue::from_token(value.kind(), token)
                    .map_err(|err| err.with_token_pos(tokens.pos()))?;
                Ok(())
            }
            // Quote stripping already happened in the tokenizer; enum names
            // are taken verbatim as well.
            Field::Str(s) => {
                s.value = tokens.next()?.to_string();
                Ok(())
            }
            Field::Enum(e) => {
                e.value = tokens.next()?.to_string();
                Ok(())
            }
            Field::Packed(pack) => {
                let kind = pack.kind;
                let token = tokens.next()?;
                let value = ScalarValue::from_token(kind, token)
                    .map_err(|err| err.with_token_pos(tokens.pos()))?;
                pack.data.clear();
                pack.push(value);
                Ok(())
            }
            Field::Message(msg) => msg.read_text(tokens),
        }
    }
}

/// Create a prototype field for a primitive or string schema type.
pub(crate) fn create_field(
    type_name: &str,
    default_value: &str,
    packed: bool,
) -> Result<Field, ParseError> {
    if type_name == "string" {
        return Ok(Field::Str(StringField {
            value: default_value.to_string(),
        }));
    }

    let kind = PrimKind::from_type_name(type_name)
        .ok_or_else(|| ParseError::new(ErrorKind::NameNotFound(type_name.to_string())))?;
    if packed {
        Ok(Field::Packed(PackedField::new(kind)))
    } else {
        Ok(Field::Scalar(ScalarValue::from_token(kind, default_value)?))
    }
}
