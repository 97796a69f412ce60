//! Import of legacy serialized module trees.
//!
//! Legacy models are trees of modules: leaves carry weights and geometry,
//! containers (`Sequential`, `Concat`, `Parallel`, table containers)
//! compose their children. [`loader`] reads the serialized object graph
//! into a [`Module`] tree through a caller-supplied byte stream;
//! [`importer`] flattens that tree into a [`Net`](crate::Net) by
//! synthesizing explicit split, concat and element-wise layers.

mod importer;
mod loader;
mod module;

pub use importer::populate_net;
pub use loader::{load_modules, LegacyReader};
pub use module::Module;
