//! Hand encoding of wire-format messages and descriptor sets for tests.

#![allow(dead_code)]

use crate::protobuf::encode_varint;

pub fn key(tag: u64, wire_type: u64) -> Vec<u8> {
    encode_varint(tag << 3 | wire_type)
}

pub fn varint_field(tag: u64, value: i64) -> Vec<u8> {
    let mut buf = key(tag, 0);
    buf.extend(encode_varint(value as u64));
    buf
}

pub fn fixed32_field(tag: u64, value: u32) -> Vec<u8> {
    let mut buf = key(tag, 5);
    buf.extend(value.to_le_bytes());
    buf
}

pub fn fixed64_field(tag: u64, value: u64) -> Vec<u8> {
    let mut buf = key(tag, 1);
    buf.extend(value.to_le_bytes());
    buf
}

pub fn float_field(tag: u64, value: f32) -> Vec<u8> {
    fixed32_field(tag, u32::from_le_bytes(value.to_le_bytes()))
}

pub fn len_field(tag: u64, bytes: &[u8]) -> Vec<u8> {
    let mut buf = key(tag, 2);
    buf.extend(encode_varint(bytes.len() as u64));
    buf.extend(bytes);
    buf
}

pub fn string_field(tag: u64, value: &str) -> Vec<u8> {
    len_field(tag, value.as_bytes())
}

pub fn packed_varint_field(tag: u64, values: &[i64]) -> Vec<u8> {
    let payload: Vec<u8> = values
        .iter()
        .flat_map(|&v| encode_varint(v as u64))
        .collect();
    len_field(tag, &payload)
}

pub fn packed_float_field(tag: u64, values: &[f32]) -> Vec<u8> {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    len_field(tag, &payload)
}

// Field type and label ids used by descriptor sets.
pub const TYPE_DOUBLE: i64 = 1;
pub const TYPE_FLOAT: i64 = 2;
pub const TYPE_INT64: i64 = 3;
pub const TYPE_UINT64: i64 = 4;
pub const TYPE_INT32: i64 = 5;
pub const TYPE_BOOL: i64 = 8;
pub const TYPE_STRING: i64 = 9;
pub const TYPE_MESSAGE: i64 = 11;
pub const TYPE_BYTES: i64 = 12;
pub const TYPE_UINT32: i64 = 13;
pub const TYPE_ENUM: i64 = 14;

pub const LABEL_OPTIONAL: i64 = 1;
pub const LABEL_REQUIRED: i64 = 2;
pub const LABEL_REPEATED: i64 = 3;

/// Description of one field of a test schema.
pub struct FieldSpec {
    pub name: &'static str,
    pub number: i64,
    pub label: i64,
    pub type_id: i64,
    pub type_name: Option<&'static str>,
    pub default_value: Option<&'static str>,
    pub packed: Option<bool>,
}

impl FieldSpec {
    pub fn new(name: &'static str, number: i64, type_id: i64) -> Self {
        Self {
            name,
            number,
            label: LABEL_OPTIONAL,
            type_id,
            type_name: None,
            default_value: None,
            packed: None,
        }
    }

    pub fn repeated(mut self) -> Self {
        self.label = LABEL_REPEATED;
        self
    }

    pub fn type_name(mut self, name: &'static str) -> Self {
        self.type_name = Some(name);
        self
    }

    pub fn default(mut self, value: &'static str) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = Some(packed);
        self
    }
}

/// Encode a `FieldDescriptorProto`.
pub fn field_desc(spec: &FieldSpec) -> Vec<u8> {
    let mut buf = string_field(1, spec.name);
    buf.extend(varint_field(3, spec.number));
    buf.extend(varint_field(4, spec.label));
    buf.extend(varint_field(5, spec.type_id));
    if let Some(type_name) = spec.type_name {
        buf.extend(string_field(6, type_name));
    }
    if let Some(default_value) = spec.default_value {
        buf.extend(string_field(7, default_value));
    }
    if let Some(packed) = spec.packed {
        buf.extend(len_field(8, &varint_field(2, packed as i64)));
    }
    buf
}

/// Encode a `DescriptorProto` with fields, nested messages and nested enums.
pub fn message_desc(
    name: &str,
    fields: &[Vec<u8>],
    nested: &[Vec<u8>],
    enums: &[Vec<u8>],
) -> Vec<u8> {
    let mut buf = string_field(1, name);
    for field in fields {
        buf.extend(len_field(2, field));
    }
    for msg in nested {
        buf.extend(len_field(3, msg));
    }
    for en in enums {
        buf.extend(len_field(4, en));
    }
    buf
}

/// Encode an `EnumDescriptorProto`.
pub fn enum_desc(name: &str, values: &[(&str, i64)]) -> Vec<u8> {
    let mut buf = string_field(1, name);
    for (value_name, number) in values {
        let mut value = string_field(1, value_name);
        value.extend(varint_field(2, *number));
        buf.extend(len_field(2, &value));
    }
    buf
}

/// Encode a `FileDescriptorProto`.
pub fn file_desc(
    package: Option<&str>,
    syntax: Option<&str>,
    messages: &[Vec<u8>],
    enums: &[Vec<u8>],
) -> Vec<u8> {
    let mut buf = string_field(1, "test.proto");
    if let Some(package) = package {
        buf.extend(string_field(2, package));
    }
    for msg in messages {
        buf.extend(len_field(4, msg));
    }
    for en in enums {
        buf.extend(len_field(5, en));
    }
    if let Some(syntax) = syntax {
        buf.extend(string_field(12, syntax));
    }
    buf
}

/// Encode a `FileDescriptorSet`.
pub fn descriptor_set(files: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    for file in files {
        buf.extend(len_field(1, file));
    }
    buf
}
