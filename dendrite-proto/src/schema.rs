//! Compilation of a parsed descriptor set into a runtime field tree.

use std::collections::{BTreeMap, HashMap};

use crate::descriptor::{label_by_id, type_name_by_id};
use crate::node::Node;
use crate::protobuf::{
    create_field, EnumField, ErrorKind, Field, MessageField, ParseError,
};

/// Build the field tree for the fully-qualified message `root` (leading
/// dot, then `package.Message`) from a parsed descriptor set.
pub(crate) fn compile(set: &MessageField, root: &str) -> Result<MessageField, ParseError> {
    let mut type_nodes = HashMap::new();
    let mut proto3 = false;

    let files = set.get("file");
    for i in 0..files.size() {
        let file = files.at(i)?;
        collect_file_types(&file, &mut type_nodes)?;
        proto3 = proto3 || (file.has("syntax")? && file.get("syntax")?.as_str()? == "proto3");
    }

    let mut built = HashMap::new();
    build_message(root, &type_nodes, &mut built, proto3)
}

/// Fetch a descriptor field that the compiler cannot proceed without.
fn require(node: &Node, name: &str) -> Result<Node, ParseError> {
    let value = node.get(name)?;
    if value.is_empty() {
        Err(ParseError::new(ErrorKind::MissingField(name.to_string())))
    } else {
        Ok(value)
    }
}

/// Map every message and enum declared by `file` under its fully-qualified
/// name, recursing into nested declarations.
fn collect_file_types(
    file: &Node,
    type_nodes: &mut HashMap<String, Node>,
) -> Result<(), ParseError> {
    let mut package = String::new();
    if file.has("package")? {
        package = format!(".{}", file.get("package")?.as_str()?);
    }

    if file.has("message_type")? {
        collect_types(&file.get("message_type")?, &package, type_nodes)?;
    }
    if file.has("enum_type")? {
        collect_types(&file.get("enum_type")?, &package, type_nodes)?;
    }
    Ok(())
}

fn collect_types(
    types: &Node,
    parent: &str,
    type_nodes: &mut HashMap<String, Node>,
) -> Result<(), ParseError> {
    for i in 0..types.size() {
        let node = types.at(i)?;
        let name = require(&node, "name")?.as_str()?.to_string();
        let qualified = format!("{parent}.{name}");

        if type_nodes.insert(qualified.clone(), node.clone()).is_some() {
            return Err(ParseError::new(ErrorKind::DuplicateTypeName(qualified)));
        }

        if node.has("message_type")? {
            collect_types(&node.get("message_type")?, &qualified, type_nodes)?;
        }
        if node.has("enum_type")? {
            collect_types(&node.get("enum_type")?, &qualified, type_nodes)?;
        }
    }
    Ok(())
}

/// Build a message prototype by recursive descent over its field
/// descriptors.
///
/// Built messages are memoized by qualified name, which both deduplicates
/// shared types and terminates self-referential schemas: the memo is
/// registered before the fields are walked, so a cyclic reference receives
/// a handle onto the same (still filling) field table.
fn build_message(
    name: &str,
    type_nodes: &HashMap<String, Node>,
    built: &mut HashMap<String, MessageField>,
    proto3: bool,
) -> Result<MessageField, ParseError> {
    if let Some(msg) = built.get(name) {
        return Ok(msg.fresh_clone());
    }

    let node = type_nodes
        .get(name)
        .ok_or_else(|| ParseError::new(ErrorKind::NameNotFound(name.to_string())))?
        .clone();

    let mut message = MessageField::new();
    built.insert(name.to_string(), message.fresh_clone());

    let fields = node.get("field")?;
    for i in 0..fields.size() {
        let field_node = fields.at(i)?;

        let field_name = require(&field_node, "name")?.as_str()?.to_string();
        let tag = require(&field_node, "number")?.as_i32()?;
        if tag <= 0 {
            return Err(ParseError::new(ErrorKind::InvalidTag(tag as u64)).with_context(&field_name));
        }
        let type_id = require(&field_node, "type")?.as_i32()? as i64;
        let label_id = require(&field_node, "label")?.as_i32()? as i64;
        let base_type = type_name_by_id(type_id)?;

        // Named types carry their qualified name in `type_name`.
        let type_name = if field_node.has("type_name")? {
            field_node.get("type_name")?.as_str()?.to_string()
        } else {
            base_type.to_string()
        };

        let default_value = if field_node.has("default_value")? {
            field_node.get("default_value")?.as_str()?.to_string()
        } else {
            String::new()
        };

        let explicit_packed = field_node.has("options")? && {
            let options = field_node.get("options")?;
            options.has("packed")? && options.get("packed")?.as_bool()?
        };
        let repeated = label_by_id(label_id)? == "repeated";
        let packable = base_type != "message" && base_type != "string";
        // Proto3 packs repeated primitives implicitly.
        let packed = explicit_packed || (proto3 && repeated && packable);

        let field = match base_type {
            "message" => Field::Message(build_message(&type_name, type_nodes, built, proto3)?),
            "enum" => build_enum(&type_name, type_nodes, &default_value, packed)?,
            _ => create_field(base_type, &default_value, packed)?,
        };
        message.add_field(field, &field_name, tag as u64, !default_value.is_empty());
    }

    Ok(message)
}

fn build_enum(
    name: &str,
    type_nodes: &HashMap<String, Node>,
    default_value: &str,
    packed: bool,
) -> Result<Field, ParseError> {
    let node = type_nodes
        .get(name)
        .ok_or_else(|| ParseError::new(ErrorKind::NameNotFound(name.to_string())))?;

    let mut values = BTreeMap::new();
    let list = node.get("value")?;
    for i in 0..list.size() {
        let value = list.at(i)?;
        let value_name = require(&value, "name")?.as_str()?.to_string();
        let number = require(&value, "number")?.as_i32()? as i64;
        if values.insert(number, value_name.clone()).is_some() {
            return Err(ParseError::new(ErrorKind::DuplicateTypeName(format!(
                "{name}.{value_name}"
            ))));
        }
    }

    Ok(Field::Enum(EnumField::new(
        values,
        packed,
        default_value.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::descriptor::{file_descriptor_set, DEFAULT_MSG_DEPTH};
    use crate::protobuf::{ErrorKind, MessageField, StreamReader};
    use crate::wire;

    fn parse_set(bytes: Vec<u8>) -> MessageField {
        let mut set = file_descriptor_set(DEFAULT_MSG_DEPTH);
        let mut reader = StreamReader::from_buf(bytes);
        set.read_binary(&mut reader).unwrap();
        set
    }

    fn int_message_set(syntax: Option<&str>, field: wire::FieldSpec) -> MessageField {
        let message = wire::message_desc("M", &[wire::field_desc(&field)], &[], &[]);
        let file = wire::file_desc(Some("pkg"), syntax, &[message], &[]);
        parse_set(wire::descriptor_set(&[file]))
    }

    #[test]
    fn test_compile_simple_message() {
        let set = int_message_set(None, wire::FieldSpec::new("x", 1, wire::TYPE_INT32));
        let mut msg = compile(&set, ".pkg.M").unwrap();
        assert_eq!(msg.field_names(), ["x"]);

        let mut reader = StreamReader::from_buf(vec![0x08, 0x96, 0x01]);
        msg.read_binary(&mut reader).unwrap();
        assert_eq!(msg.get("x").as_i32().unwrap(), 150);
    }

    #[test]
    fn test_root_name_not_found() {
        let set = int_message_set(None, wire::FieldSpec::new("x", 1, wire::TYPE_INT32));
        let err = compile(&set, ".pkg.Missing").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::NameNotFound(_)));
    }

    #[test]
    fn test_nested_message_types() {
        let inner_field = wire::field_desc(&wire::FieldSpec::new("c", 1, wire::TYPE_STRING));
        let inner = wire::message_desc("Inner", &[inner_field], &[], &[]);
        let outer_fields = [
            wire::field_desc(&wire::FieldSpec::new("a", 1, wire::TYPE_INT32)),
            wire::field_desc(
                &wire::FieldSpec::new("b", 2, wire::TYPE_MESSAGE).type_name(".pkg.M.Inner"),
            ),
        ];
        let outer = wire::message_desc("M", &outer_fields, &[inner], &[]);
        let file = wire::file_desc(Some("pkg"), None, &[outer], &[]);
        let set = parse_set(wire::descriptor_set(&[file]));

        let mut msg = compile(&set, ".pkg.M").unwrap();
        assert_eq!(msg.field_names(), ["a", "b"]);

        let mut buf = wire::varint_field(1, 1);
        buf.extend(wire::len_field(2, &wire::string_field(1, "hi")));
        let mut reader = StreamReader::from_buf(buf);
        msg.read_binary(&mut reader).unwrap();

        assert_eq!(msg.get("a").as_i32().unwrap(), 1);
        assert_eq!(msg.get("b").get("c").unwrap().as_str().unwrap(), "hi");
    }

    #[test]
    fn test_self_referential_schema() {
        let fields = [
            wire::field_desc(&wire::FieldSpec::new("v", 1, wire::TYPE_INT32)),
            wire::field_desc(
                &wire::FieldSpec::new("child", 2, wire::TYPE_MESSAGE).type_name(".Tree"),
            ),
        ];
        let message = wire::message_desc("Tree", &fields, &[], &[]);
        let file = wire::file_desc(None, None, &[message], &[]);
        let set = parse_set(wire::descriptor_set(&[file]));

        let mut msg = compile(&set, ".Tree").unwrap();

        // Two levels of nesting: v=1 { child { v=2 } }.
        let inner = wire::varint_field(1, 2);
        let mut buf = wire::varint_field(1, 1);
        buf.extend(wire::len_field(2, &inner));
        let mut reader = StreamReader::from_buf(buf);
        msg.read_binary(&mut reader).unwrap();

        assert_eq!(msg.get("v").as_i32().unwrap(), 1);
        let child = msg.get("child");
        assert_eq!(child.get("v").unwrap().as_i32().unwrap(), 2);
        assert!(!child.has("child").unwrap());
    }

    #[test]
    fn test_explicit_packed_option() {
        let set = int_message_set(
            None,
            wire::FieldSpec::new("xs", 4, wire::TYPE_INT32)
                .repeated()
                .packed(true),
        );
        let mut msg = compile(&set, ".pkg.M").unwrap();

        let mut reader =
            StreamReader::from_buf(vec![0x22, 0x06, 0x03, 0x8E, 0x02, 0x9E, 0xA7, 0x05]);
        msg.read_binary(&mut reader).unwrap();

        let xs = msg.get("xs");
        assert_eq!(xs.size(), 3);
        assert_eq!(xs.at(2).unwrap().as_i32().unwrap(), 86942);
    }

    #[test]
    fn test_proto2_repeated_is_not_packed() {
        let set = int_message_set(None, wire::FieldSpec::new("xs", 1, wire::TYPE_INT32).repeated());
        let mut msg = compile(&set, ".pkg.M").unwrap();

        // Un-packed repeated ints arrive as separate instances.
        let mut buf = wire::varint_field(1, 5);
        buf.extend(wire::varint_field(1, 6));
        let mut reader = StreamReader::from_buf(buf);
        msg.read_binary(&mut reader).unwrap();

        let xs = msg.get("xs");
        assert_eq!(xs.size(), 2);
        assert_eq!(xs.at(1).unwrap().as_i32().unwrap(), 6);
    }

    #[test]
    fn test_proto3_implies_packed() {
        let set = int_message_set(
            Some("proto3"),
            wire::FieldSpec::new("xs", 4, wire::TYPE_INT32).repeated(),
        );
        let mut msg = compile(&set, ".pkg.M").unwrap();

        let mut reader = StreamReader::from_buf(wire::packed_varint_field(4, &[7, 8]));
        msg.read_binary(&mut reader).unwrap();

        let xs = msg.get("xs");
        assert_eq!(xs.size(), 2);
        assert_eq!(xs.at(0).unwrap().as_i32().unwrap(), 7);
    }

    #[test]
    fn test_enum_field() {
        let en = wire::enum_desc("Phase", &[("TRAIN", 0), ("TEST", 1)]);
        let field = wire::field_desc(
            &wire::FieldSpec::new("phase", 1, wire::TYPE_ENUM)
                .type_name(".pkg.Phase")
                .default("TRAIN"),
        );
        let message = wire::message_desc("M", &[field], &[], &[]);
        let file = wire::file_desc(Some("pkg"), None, &[message], &[en]);
        let set = parse_set(wire::descriptor_set(&[file]));

        let mut msg = compile(&set, ".pkg.M").unwrap();

        // Absent from the wire: the declared default applies.
        let mut reader = StreamReader::from_buf(Vec::new());
        msg.read_binary(&mut reader).unwrap();
        assert_eq!(msg.get("phase").as_str().unwrap(), "TRAIN");

        let mut reader = StreamReader::from_buf(wire::varint_field(1, 1));
        msg.read_binary(&mut reader).unwrap();
        assert_eq!(msg.get("phase").as_str().unwrap(), "TEST");

        let mut reader = StreamReader::from_buf(wire::varint_field(1, 9));
        let err = msg.read_binary(&mut reader).err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::UnknownEnumValue(9)));
    }

    #[test]
    fn test_missing_type_name() {
        let set = int_message_set(
            None,
            wire::FieldSpec::new("b", 1, wire::TYPE_MESSAGE).type_name(".pkg.Absent"),
        );
        let err = compile(&set, ".pkg.M").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::NameNotFound(name) if name == ".pkg.Absent"));
    }

    #[test]
    fn test_scalar_default_value() {
        let set = int_message_set(
            None,
            wire::FieldSpec::new("x", 1, wire::TYPE_INT32).default("42"),
        );
        let mut msg = compile(&set, ".pkg.M").unwrap();

        let mut reader = StreamReader::from_buf(Vec::new());
        msg.read_binary(&mut reader).unwrap();
        assert!(!msg.has("x"));
        assert_eq!(msg.get("x").as_i32().unwrap(), 42);
    }
}
