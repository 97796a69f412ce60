//! The message field kind and its prototype tables.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::node::Node;
use crate::protobuf::errors::{ErrorKind, ParseError};
use crate::protobuf::field::Field;
use crate::protobuf::value::ByteReader;
use crate::text::TokenCursor;

/// Decode a field key: the low 3 bits are the wire type, the rest the tag.
///
/// | Wire type | Schema types                                  |
/// |-----------|-----------------------------------------------|
/// |         0 | int32, int64, uint32, uint64, bool, enum      |
/// |         1 | fixed64, sfixed64, double                     |
/// |         2 | string, bytes, embedded messages, packed data |
/// |         5 | fixed32, sfixed32, float                      |
///
/// Wire types 3 and 4 (groups) are deprecated and rejected.
pub(crate) fn parse_key(r: &mut dyn ByteReader) -> Result<(u64, u64), ParseError> {
    let key = r.read_varint()?;
    let tag = key >> 3;
    let wire_type = key & 7;
    if tag == 0 {
        return Err(ParseError::new(ErrorKind::InvalidTag(tag)));
    }
    if !matches!(wire_type, 0 | 1 | 2 | 5) {
        return Err(ParseError::new(ErrorKind::InvalidWireType(wire_type)));
    }
    Ok((tag, wire_type))
}

/// Skip the value of an unrecognized field, routed by wire type.
fn skip_field(r: &mut dyn ByteReader, wire_type: u64) -> Result<(), ParseError> {
    match wire_type {
        0 => {
            r.read_varint()?;
        }
        1 => r.skip(8)?,
        2 => {
            let len = r.read_varint()?;
            r.skip(len)?;
        }
        5 => r.skip(4)?,
        other => return Err(ParseError::new(ErrorKind::InvalidWireType(other))),
    }
    Ok(())
}

struct FieldDef {
    name: String,
    proto: Rc<Field>,
    has_default: bool,
}

impl std::fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef").field("name", &self.name).finish()
    }
}

/// Prototype tables of a message: tag and name indexes into the field
/// prototypes plus the set of fields that declare defaults.
#[derive(Debug, Default)]
struct FieldTable {
    defs: Vec<FieldDef>,
    by_tag: BTreeMap<u64, usize>,
    by_name: BTreeMap<String, usize>,
}

/// A message field: prototype tables shared by all instances of the message
/// type, plus the per-instance map of parsed field values.
///
/// The tables are behind shared ownership so that memoized self-referential
/// schemas work: a clone taken while the type is still being built observes
/// the completed table once the builder finishes, and cloning never follows
/// the cycle.
#[derive(Clone, Debug)]
pub struct MessageField {
    tables: Rc<RefCell<FieldTable>>,
    read: BTreeMap<String, Vec<Rc<Field>>>,
}

impl Default for MessageField {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageField {
    pub fn new() -> Self {
        Self {
            tables: Rc::new(RefCell::new(FieldTable::default())),
            read: BTreeMap::new(),
        }
    }

    /// Register a field prototype under `name` and `tag`.
    pub fn add_field(&mut self, field: Field, name: &str, tag: u64, has_default: bool) {
        let mut table = self.tables.borrow_mut();
        let idx = table.defs.len();
        table.defs.push(FieldDef {
            name: name.to_string(),
            proto: Rc::new(field),
            has_default,
        });
        table.by_tag.insert(tag, idx);
        table.by_name.insert(name.to_string(), idx);
    }

    /// Register a primitive or string field with no default.
    ///
    /// Panics if `type_name` is not a primitive schema type; use
    /// [`add_field`](Self::add_field) for enums and messages.
    pub fn add_primitive(&mut self, type_name: &str, name: &str, tag: u64) {
        let field = crate::protobuf::create_field(type_name, "", false)
            .expect("primitive type name");
        self.add_field(field, name, tag, false);
    }

    /// Produce an instance of this message type with no parsed values. The
    /// prototype tables are shared, not copied.
    pub fn fresh_clone(&self) -> MessageField {
        MessageField {
            tables: Rc::clone(&self.tables),
            read: BTreeMap::new(),
        }
    }

    /// Names declared in the field table, in tag order.
    pub fn field_names(&self) -> Vec<String> {
        let table = self.tables.borrow();
        table
            .by_tag
            .values()
            .map(|&idx| table.defs[idx].name.clone())
            .collect()
    }

    /// Whether at least one instance of `name` was parsed.
    pub fn has(&self, name: &str) -> bool {
        self.read.contains_key(name)
    }

    /// Parsed instances of `name`, or the default-valued prototype if the
    /// field declares a default and was absent from the input.
    pub fn get(&self, name: &str) -> Node {
        if let Some(fields) = self.read.get(name) {
            return Node::from_fields(fields.clone());
        }
        let table = self.tables.borrow();
        if let Some(&idx) = table.by_name.get(name) {
            let def = &table.defs[idx];
            if def.has_default {
                return Node::from_fields(vec![Rc::clone(&def.proto)]);
            }
        }
        Node::default()
    }

    /// Parse a binary message.
    ///
    /// A reader positioned at offset zero holds a top-level message, which
    /// runs to the end of the stream. At any other position the message is
    /// embedded and starts with its byte length; the read must land exactly
    /// on the computed end offset.
    pub fn read_binary(&mut self, r: &mut dyn ByteReader) -> Result<(), ParseError> {
        // Drop values from any previous parse.
        self.read.clear();

        let embedded = r.position() != 0;
        let end = if embedded {
            let len = r.read_varint()?;
            Some(r.position() + len)
        } else {
            None
        };

        loop {
            match end {
                Some(end) => {
                    if r.position() >= end {
                        break;
                    }
                }
                None => {
                    if r.is_eof()? {
                        break;
                    }
                }
            }

            let (tag, wire_type) = parse_key(r)?;
            let matched = {
                let table = self.tables.borrow();
                table.by_tag.get(&tag).map(|&idx| {
                    let def = &table.defs[idx];
                    (def.name.clone(), def.proto.fresh_clone())
                })
            };
            match matched {
                Some((name, mut instance)) => {
                    instance
                        .read_binary(r)
                        .map_err(|err| err.with_context(&name))?;
                    self.read.entry(name).or_default().push(Rc::new(instance));
                }
                None => skip_field(r, wire_type)?,
            }
        }

        if let Some(end) = end {
            if r.position() != end {
                return Err(ParseError::new(ErrorKind::LengthMismatch));
            }
        }
        Ok(())
    }

    /// Parse a text-format message: `{`, then repeated `name value` pairs
    /// where a value is a scalar token or a nested `{ ... }`, closed by `}`.
    ///
    /// Text format carries no length prefixes, so a name the schema does not
    /// declare cannot be skipped and is a fatal error.
    pub fn read_text(&mut self, tokens: &mut TokenCursor) -> Result<(), ParseError> {
        self.read.clear();

        tokens.expect("{")?;
        while tokens.peek()? != "}" {
            let name = tokens.next()?.to_string();
            let matched = {
                let table = self.tables.borrow();
                table
                    .by_name
                    .get(&name)
                    .map(|&idx| table.defs[idx].proto.fresh_clone())
            };
            let Some(mut instance) = matched else {
                return Err(ParseError::new(ErrorKind::UnknownField(name))
                    .with_token_pos(tokens.pos()));
            };
            instance
                .read_text(tokens)
                .map_err(|err| err.with_context(&name))?;
            self.read.entry(name).or_default().push(Rc::new(instance));
        }
        tokens.expect("}")?;
        Ok(())
    }
}
