//! Typed query facade over parsed fields.

use std::rc::Rc;

use crate::protobuf::{ErrorKind, Field, ParseError, ScalarValue};

/// A view over a list of parsed field instances.
///
/// A `Node` wraps the instances parsed for one field name (repeated fields
/// parse to several instances) and exposes typed access: named traversal
/// into a contained message, indexed access into a repeated or packed field,
/// scalar extraction and bulk copy-out.
#[derive(Clone, Debug, Default)]
pub struct Node {
    fields: Vec<Rc<Field>>,
}

impl Node {
    pub(crate) fn from_fields(fields: Vec<Rc<Field>>) -> Self {
        Self { fields }
    }

    /// Whether this node refers to no parsed fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of values: the element count for a single packed field, the
    /// instance count otherwise.
    pub fn size(&self) -> usize {
        if let [field] = self.fields.as_slice() {
            if let Field::Packed(pack) = field.as_ref() {
                return pack.len();
            }
        }
        self.fields.len()
    }

    fn single(&self) -> Result<&Field, ParseError> {
        match self.fields.as_slice() {
            [field] => Ok(field),
            other => Err(ParseError::new(ErrorKind::NodeCount(other.len()))),
        }
    }

    /// Traverse into the contained message by field name.
    ///
    /// Requires this node to hold exactly one field of message kind. The
    /// result is empty if the name was not parsed and declares no default.
    pub fn get(&self, name: &str) -> Result<Node, ParseError> {
        match self.single()? {
            Field::Message(msg) => Ok(msg.get(name)),
            other => Err(ParseError::new(ErrorKind::TypeMismatch {
                expected: "message",
                actual: other.type_name(),
            })
            .with_context(name)),
        }
    }

    /// Whether the contained message parsed at least one instance of `name`.
    pub fn has(&self, name: &str) -> Result<bool, ParseError> {
        match self.single()? {
            Field::Message(msg) => Ok(msg.has(name)),
            other => Err(ParseError::new(ErrorKind::TypeMismatch {
                expected: "message",
                actual: other.type_name(),
            })
            .with_context(name)),
        }
    }

    /// Index into a packed payload or a repeated field list.
    pub fn at(&self, index: usize) -> Result<Node, ParseError> {
        if let [field] = self.fields.as_slice() {
            if let Field::Packed(pack) = field.as_ref() {
                let value = pack.get(index)?;
                return Ok(Node::from_fields(vec![Rc::new(Field::Scalar(value))]));
            }
        }
        match self.fields.get(index) {
            Some(field) => Ok(Node::from_fields(vec![Rc::clone(field)])),
            None => Err(ParseError::new(ErrorKind::IndexOutOfRange {
                index,
                len: self.fields.len(),
            })),
        }
    }

    fn scalar(&self) -> Result<ScalarValue, ParseError> {
        match self.single()? {
            Field::Scalar(value) => Ok(*value),
            Field::Packed(pack) => {
                if pack.len() == 1 {
                    pack.get(0)
                } else {
                    Err(ParseError::new(ErrorKind::NodeCount(pack.len())))
                }
            }
            other => Err(ParseError::new(ErrorKind::TypeMismatch {
                expected: "scalar",
                actual: other.type_name(),
            })),
        }
    }

    /// Extract the single string or enum value.
    pub fn as_str(&self) -> Result<&str, ParseError> {
        match self.single()? {
            Field::Str(s) => Ok(&s.value),
            Field::Enum(e) => Ok(&e.value),
            other => Err(ParseError::new(ErrorKind::TypeMismatch {
                expected: "string",
                actual: other.type_name(),
            })),
        }
    }

    /// Copy all values out as little-endian bytes.
    ///
    /// A single packed field is copied with one block copy; a repeated
    /// scalar list is converted element by element. `dst` must match the
    /// total byte size exactly.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<(), ParseError> {
        if let [field] = self.fields.as_slice() {
            if let Field::Packed(pack) = field.as_ref() {
                if dst.len() != pack.bytes().len() {
                    return Err(ParseError::new(ErrorKind::LengthMismatch));
                }
                dst.copy_from_slice(pack.bytes());
                return Ok(());
            }
        }

        let mut offset = 0;
        for field in &self.fields {
            let Field::Scalar(value) = field.as_ref() else {
                return Err(ParseError::new(ErrorKind::TypeMismatch {
                    expected: "scalar",
                    actual: field.type_name(),
                }));
            };
            let size = value.kind().size_of();
            if offset + size > dst.len() {
                return Err(ParseError::new(ErrorKind::LengthMismatch));
            }
            value.write_le(&mut dst[offset..offset + size]);
            offset += size;
        }
        if offset != dst.len() {
            return Err(ParseError::new(ErrorKind::LengthMismatch));
        }
        Ok(())
    }
}

macro_rules! impl_scalar_getter {
    ($method:ident, $variant:ident, $type:ty, $name:literal) => {
        impl Node {
            #[doc = concat!("Extract the single `", $name, "` value.")]
            pub fn $method(&self) -> Result<$type, ParseError> {
                match self.scalar()? {
                    ScalarValue::$variant(value) => Ok(value),
                    other => Err(ParseError::new(ErrorKind::TypeMismatch {
                        expected: $name,
                        actual: other.kind().name(),
                    })),
                }
            }
        }
    };
}

impl_scalar_getter!(as_i32, Int32, i32, "int32");
impl_scalar_getter!(as_u32, UInt32, u32, "uint32");
impl_scalar_getter!(as_i64, Int64, i64, "int64");
impl_scalar_getter!(as_u64, UInt64, u64, "uint64");
impl_scalar_getter!(as_f32, Float, f32, "float");
impl_scalar_getter!(as_f64, Double, f64, "double");
impl_scalar_getter!(as_bool, Bool, bool, "bool");
