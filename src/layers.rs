//! Built-in structural layers.
//!
//! These layers move data rather than compute on it: the importer
//! synthesizes them when flattening legacy container modules, so they ship
//! with the engine. Arithmetic layers (convolution, pooling, activations)
//! are supplied by the embedding application through the registry.

mod concat;
mod eltwise;
mod identity;
mod max_unpool;
mod reshape;
mod slice;
mod split;

pub use concat::ConcatLayer;
pub use eltwise::EltwiseLayer;
pub use identity::IdentityLayer;
pub use max_unpool::MaxUnpoolLayer;
pub use reshape::ReshapeLayer;
pub use slice::SliceLayer;
pub use split::SplitLayer;

use crate::layer::LayerRegistry;

pub(crate) fn register_builtins(registry: &mut LayerRegistry) {
    // An empty registry cannot refuse these.
    registry.register("Split", split::create).unwrap();
    registry.register("Slice", slice::create).unwrap();
    registry.register("Concat", concat::create).unwrap();
    registry.register("Reshape", reshape::create).unwrap();
    registry.register("Eltwise", eltwise::create).unwrap();
    registry.register("Identity", identity::create).unwrap();
    registry.register("MaxUnpool", max_unpool::create).unwrap();
}

/// Element counts before and from `axis` for a shape.
fn outer_inner(shape: &[usize], axis: usize) -> (usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis..].iter().product();
    (outer, inner)
}
