//! Dendrite is the core of a small deep-learning inference framework: a
//! mutable layer graph with shape inference, topological allocation and
//! recursive forward evaluation, plus an importer that flattens legacy
//! serialized module trees into that graph.
//!
//! Model formats built on Protocol Buffers are read through the
//! [`proto`] crate, re-exported here, which parses arbitrary schemas at
//! runtime from compiled descriptor sets.
//!
//! Tensor arithmetic is not implemented here: layers that move data (split,
//! concatenation, slicing, reshaping and friends) are built in because the
//! importer synthesizes them, while compute kernels are supplied by the
//! embedding application through the [`LayerRegistry`].

mod env;
mod error;
mod layer;
mod net;
mod tensor;

pub mod layers;
pub mod torch;

pub use dendrite_proto as proto;

pub use error::NetError;
pub use layer::{Layer, LayerParams, LayerRegistry, LayerShapes, ParamValue};
pub use net::{LayerData, LayerPin, Net};
pub use tensor::{DataType, Element, Shape, Tensor};
