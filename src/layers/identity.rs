use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::tensor::{Shape, Tensor};

/// Passes its inputs through unchanged, in place when the allocator allows
/// it.
pub struct IdentityLayer;

pub(super) fn create(_params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    Ok(Box::new(IdentityLayer))
}

impl Layer for IdentityLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        _required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        if inputs.is_empty() {
            return Err(NetError::Shape("identity layer has no inputs".to_string()));
        }
        Ok(LayerShapes::inplace(inputs.to_vec()))
    }

    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            if !output.shares_storage(input) {
                output.as_f32_mut()?.copy_from_slice(&input.as_f32()?);
            }
        }
        Ok(())
    }
}
