//! Top-level parser facade.

use std::path::Path;
use std::rc::Rc;

use crate::descriptor;
use crate::node::Node;
use crate::protobuf::{ByteReader, Field, MessageField, ParseError, StreamReader};
use crate::schema;
use crate::text::{strip_comments, tokenize, TokenCursor};

/// A schema-driven parser for one root message type.
///
/// The parser is constructed from a compiled descriptor set plus the
/// fully-qualified name of the root message, and can then parse any number
/// of binary or text-format instances of that message. Parsed values are
/// reached through [`Node`] views; reparsing drops the previous values.
pub struct ProtoParser {
    root: MessageField,
}

impl ProtoParser {
    /// Compile a parser from a descriptor-set stream.
    ///
    /// `message` is the fully-qualified root message name: a leading dot,
    /// the package (if any), then the message name, e.g. `.caffe.NetParameter`.
    pub fn new(reader: &mut dyn ByteReader, message: &str) -> Result<Self, ParseError> {
        let mut set = descriptor::file_descriptor_set(descriptor::DEFAULT_MSG_DEPTH);
        set.read_binary(reader)?;
        let root = schema::compile(&set, message)?;
        Ok(Self { root })
    }

    /// Compile a parser from in-memory descriptor-set bytes.
    pub fn from_bytes(bytes: &[u8], message: &str) -> Result<Self, ParseError> {
        Self::new(&mut StreamReader::from_buf(bytes), message)
    }

    /// Compile a parser from a descriptor-set file.
    pub fn from_file(path: impl AsRef<Path>, message: &str) -> Result<Self, ParseError> {
        Self::new(&mut StreamReader::open(path)?, message)
    }

    /// Parse a binary instance of the root message.
    pub fn parse_binary(&mut self, reader: &mut dyn ByteReader) -> Result<(), ParseError> {
        self.root.read_binary(reader)
    }

    /// Parse a binary instance from in-memory bytes.
    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        self.parse_binary(&mut StreamReader::from_buf(bytes))
    }

    /// Parse a binary instance from a file.
    pub fn parse_binary_file(&mut self, path: impl AsRef<Path>) -> Result<(), ParseError> {
        self.parse_binary(&mut StreamReader::open(path)?)
    }

    /// Parse a text-format instance of the root message.
    pub fn parse_text(&mut self, text: &str) -> Result<(), ParseError> {
        let stripped = strip_comments(text);

        // Wrap the document in braces so top-level and embedded messages
        // share one reader. The binary format cannot do the same because a
        // top-level message carries no length prefix.
        let mut tokens = vec!["{".to_string()];
        tokens.extend(tokenize(&stripped));
        tokens.push("}".to_string());

        let mut cursor = TokenCursor::new(tokens);
        self.root.read_text(&mut cursor)
    }

    /// Parse a text-format instance from a file.
    pub fn parse_text_file(&mut self, path: impl AsRef<Path>) -> Result<(), ParseError> {
        let text = std::fs::read_to_string(path)?;
        self.parse_text(&text)
    }

    /// A node over the parsed root message itself.
    pub fn root(&self) -> Node {
        Node::from_fields(vec![Rc::new(Field::Message(self.root.clone()))])
    }

    /// Parsed instances of a top-level field, or its default.
    pub fn get(&self, name: &str) -> Node {
        self.root.get(name)
    }

    /// Whether a top-level field was present in the parsed input.
    pub fn has(&self, name: &str) -> bool {
        self.root.has(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ProtoParser;
    use crate::protobuf::ErrorKind;
    use crate::wire;

    /// Descriptor bytes for:
    ///
    /// ```proto
    /// package pkg;
    /// message M2 { optional string c = 1; }
    /// message M {
    ///     optional int32 a = 1;
    ///     optional M2 b = 2;
    ///     optional float f = 3 [default = 0.5];
    ///     repeated int32 xs = 4 [packed = true];
    /// }
    /// ```
    fn test_descriptor() -> Vec<u8> {
        let m2 = wire::message_desc(
            "M2",
            &[wire::field_desc(&wire::FieldSpec::new(
                "c",
                1,
                wire::TYPE_STRING,
            ))],
            &[],
            &[],
        );
        let m_fields = [
            wire::field_desc(&wire::FieldSpec::new("a", 1, wire::TYPE_INT32)),
            wire::field_desc(&wire::FieldSpec::new("b", 2, wire::TYPE_MESSAGE).type_name(".pkg.M2")),
            wire::field_desc(&wire::FieldSpec::new("f", 3, wire::TYPE_FLOAT).default("0.5")),
            wire::field_desc(
                &wire::FieldSpec::new("xs", 4, wire::TYPE_INT32)
                    .repeated()
                    .packed(true),
            ),
        ];
        let m = wire::message_desc("M", &m_fields, &[], &[]);
        let file = wire::file_desc(Some("pkg"), None, &[m, m2], &[]);
        wire::descriptor_set(&[file])
    }

    #[test]
    fn test_parse_binary() {
        let mut parser = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        parser.parse_bytes(&[0x08, 0x96, 0x01]).unwrap();

        assert!(parser.has("a"));
        assert_eq!(parser.get("a").as_i32().unwrap(), 150);

        // Declared default for a field absent from the wire.
        assert!(!parser.has("f"));
        assert_eq!(parser.get("f").as_f32().unwrap(), 0.5);
    }

    #[test]
    fn test_parse_packed() {
        let mut parser = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        parser
            .parse_bytes(&[0x22, 0x06, 0x03, 0x8E, 0x02, 0x9E, 0xA7, 0x05])
            .unwrap();

        let xs = parser.get("xs");
        assert_eq!(xs.size(), 3);
        assert_eq!(xs.at(0).unwrap().as_i32().unwrap(), 3);
        assert_eq!(xs.at(1).unwrap().as_i32().unwrap(), 270);
        assert_eq!(xs.at(2).unwrap().as_i32().unwrap(), 86942);
    }

    #[test]
    fn test_parse_text() {
        let mut parser = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        parser.parse_text("a: 1  b { c: \"hi\" }").unwrap();

        assert_eq!(parser.get("a").as_i32().unwrap(), 1);
        assert_eq!(parser.get("b").get("c").unwrap().as_str().unwrap(), "hi");
    }

    #[test]
    fn test_parse_text_with_comments() {
        let mut parser = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        let text = "# heading comment\na: 2 # trailing\nb {\n  c: \"x\";\n}\n";
        parser.parse_text(text).unwrap();

        assert_eq!(parser.get("a").as_i32().unwrap(), 2);
        assert_eq!(parser.get("b").get("c").unwrap().as_str().unwrap(), "x");
    }

    #[test]
    fn test_text_unknown_name_is_fatal() {
        let mut parser = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        let err = parser.parse_text("bogus: 1").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::UnknownField(name) if name == "bogus"));
    }

    #[test]
    fn test_binary_text_agreement() {
        // The same logical document in both formats parses to the same
        // scalar values.
        let mut binary = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        let mut buf = wire::varint_field(1, 7);
        buf.extend(wire::len_field(2, &wire::string_field(1, "deep")));
        buf.extend(wire::float_field(3, 1.25));
        binary.parse_bytes(&buf).unwrap();

        let mut text = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        text.parse_text("a: 7 f: 1.25 b { c: \"deep\" }").unwrap();

        for parser in [&binary, &text] {
            assert_eq!(parser.get("a").as_i32().unwrap(), 7);
            assert_eq!(parser.get("f").as_f32().unwrap(), 1.25);
            assert_eq!(parser.get("b").get("c").unwrap().as_str().unwrap(), "deep");
        }
    }

    #[test]
    fn test_unknown_tag_roundtrip() {
        // A message with an unknown tag parses, and the known fields equal
        // those of the same message without the unknown tag.
        let mut known = wire::varint_field(1, 3);
        known.extend(wire::packed_varint_field(4, &[5, 6]));

        let mut noisy = wire::varint_field(1, 3);
        noisy.extend(wire::len_field(19, b"opaque"));
        noisy.extend(wire::packed_varint_field(4, &[5, 6]));

        let mut a = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        a.parse_bytes(&known).unwrap();
        let mut b = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        b.parse_bytes(&noisy).unwrap();

        for parser in [&a, &b] {
            assert_eq!(parser.get("a").as_i32().unwrap(), 3);
            assert_eq!(parser.get("xs").size(), 2);
            assert_eq!(parser.get("xs").at(1).unwrap().as_i32().unwrap(), 6);
        }
    }

    #[test]
    fn test_root_node() {
        let mut parser = ProtoParser::from_bytes(&test_descriptor(), ".pkg.M").unwrap();
        parser.parse_bytes(&wire::varint_field(1, 4)).unwrap();

        let root = parser.root();
        assert_eq!(root.get("a").unwrap().as_i32().unwrap(), 4);
        assert!(root.has("a").unwrap());
        assert!(!root.has("b").unwrap());
    }
}
