use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::tensor::{Shape, Tensor};

/// Fans its input out to any number of identical outputs.
pub struct SplitLayer;

pub(super) fn create(_params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    Ok(Box::new(SplitLayer))
}

impl Layer for SplitLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        let Some(input) = inputs.first() else {
            return Err(NetError::Shape("split layer has no input".to_string()));
        };
        Ok(LayerShapes::new(vec![
            input.clone();
            required_outputs.max(1)
        ]))
    }

    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        let src = inputs[0].as_f32()?;
        for output in outputs.iter_mut() {
            output.as_f32_mut()?.copy_from_slice(&src);
        }
        Ok(())
    }
}
