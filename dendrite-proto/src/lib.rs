//! Reflective Protocol Buffers parser.
//!
//! Unlike code-generated parsers, this crate builds a typed field tree at
//! runtime from a compiled descriptor set (the output of `protoc
//! --descriptor_set_out`). Binary or text-format instances of the schema are
//! then parsed against that tree, which means new schemas can be loaded
//! without recompiling and unknown fields are skipped safely.
//!
//! The entry point is [`ProtoParser`], which is constructed from descriptor
//! bytes plus the fully-qualified name of a root message, and which hands out
//! [`Node`] views over parsed values:
//!
//! ```no_run
//! use dendrite_proto::ProtoParser;
//!
//! # fn main() -> Result<(), dendrite_proto::ParseError> {
//! let descriptor = std::fs::read("model.descriptor")?;
//! let mut parser = ProtoParser::from_bytes(&descriptor, ".pkg.Model")?;
//! parser.parse_binary_file("model.bin")?;
//! let num_layers = parser.get("layer").size();
//! # Ok(()) }
//! ```
//!
//! The descriptor set itself is a Protocol Buffers message; it is parsed by
//! the same engine against a small hand-wired schema, so the crate has no
//! generated code and no dependencies.

#![forbid(unsafe_code)]

mod descriptor;
mod node;
mod parser;
pub mod protobuf;
mod schema;
mod text;

pub use node::Node;
pub use parser::ProtoParser;
pub use protobuf::{ByteReader, ErrorKind, ParseError, StreamReader};

#[cfg(test)]
mod wire;
