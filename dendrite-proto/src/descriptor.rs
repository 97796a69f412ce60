//! Hand-wired bootstrap schema for compiled descriptor sets.
//!
//! A compiled descriptor set is itself a Protocol Buffers message
//! (`FileDescriptorSet` from `descriptor.proto`). To parse it, a small field
//! tree mirroring the parts of that schema we rely on is built by hand here;
//! the schema compiler then uses the parsed set to build field trees for
//! arbitrary user schemas.

use crate::protobuf::{ErrorKind, Field, MessageField, ParseError};

fn field_options() -> MessageField {
    let mut msg = MessageField::new();
    msg.add_primitive("bool", "packed", 2);
    msg
}

fn field_descriptor() -> MessageField {
    let mut msg = MessageField::new();
    msg.add_primitive("string", "name", 1);
    msg.add_primitive("int32", "number", 3);
    // optional, required, repeated.
    msg.add_primitive("int32", "label", 4);
    msg.add_primitive("int32", "type", 5);
    msg.add_primitive("string", "type_name", 6);
    msg.add_primitive("string", "default_value", 7);
    msg.add_field(Field::Message(field_options()), "options", 8, false);
    msg
}

fn enum_value_descriptor() -> MessageField {
    let mut msg = MessageField::new();
    msg.add_primitive("string", "name", 1);
    msg.add_primitive("int32", "number", 2);
    msg
}

fn enum_descriptor() -> MessageField {
    let mut msg = MessageField::new();
    msg.add_primitive("string", "name", 1);
    msg.add_field(Field::Message(enum_value_descriptor()), "value", 2, false);
    msg
}

fn message_descriptor(max_msg_depth: u32) -> MessageField {
    let mut msg = MessageField::new();
    msg.add_primitive("string", "name", 1);
    msg.add_field(Field::Message(field_descriptor()), "field", 2, false);
    if max_msg_depth > 0 {
        // Registered as `message_type` rather than `nested_type` so message
        // walks treat files and messages uniformly.
        msg.add_field(
            Field::Message(message_descriptor(max_msg_depth - 1)),
            "message_type",
            3,
            false,
        );
    }
    msg.add_field(Field::Message(enum_descriptor()), "enum_type", 4, false);
    msg
}

fn file_descriptor(max_msg_depth: u32) -> MessageField {
    let mut msg = MessageField::new();
    msg.add_primitive("string", "name", 1);
    msg.add_primitive("string", "package", 2);
    msg.add_primitive("string", "syntax", 12);
    msg.add_field(
        Field::Message(message_descriptor(max_msg_depth)),
        "message_type",
        4,
        false,
    );
    msg.add_field(Field::Message(enum_descriptor()), "enum_type", 5, false);
    msg
}

/// Build the bootstrap schema for a `FileDescriptorSet`.
///
/// `max_msg_depth` bounds how many levels of nested message declarations
/// are unrolled; three suffice for the schemas this crate is used with.
pub(crate) fn file_descriptor_set(max_msg_depth: u32) -> MessageField {
    let mut msg = MessageField::new();
    msg.add_field(
        Field::Message(file_descriptor(max_msg_depth)),
        "file",
        1,
        false,
    );
    msg
}

/// Default nesting depth for [`file_descriptor_set`].
pub(crate) const DEFAULT_MSG_DEPTH: u32 = 3;

/// Map a `FieldDescriptorProto.Type` id to its schema type name.
pub(crate) fn type_name_by_id(id: i64) -> Result<&'static str, ParseError> {
    match id {
        1 => Ok("double"),
        2 => Ok("float"),
        3 => Ok("int64"),
        4 => Ok("uint64"),
        5 => Ok("int32"),
        8 => Ok("bool"),
        9 | 12 => Ok("string"),
        11 => Ok("message"),
        13 => Ok("uint32"),
        14 => Ok("enum"),
        other => Err(ParseError::new(ErrorKind::UnknownTypeId(other))),
    }
}

/// Map a `FieldDescriptorProto.Label` id to its name.
pub(crate) fn label_by_id(id: i64) -> Result<&'static str, ParseError> {
    match id {
        1 => Ok("optional"),
        2 => Ok("required"),
        3 => Ok("repeated"),
        other => Err(ParseError::new(ErrorKind::UnknownLabelId(other))),
    }
}
