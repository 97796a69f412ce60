use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::layers::outer_inner;
use crate::tensor::{Shape, Tensor};

/// Concatenates its inputs along one axis.
pub struct ConcatLayer {
    pub axis: usize,
}

pub(super) fn create(params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    let axis = params.get_i64_or("axis", 1)?;
    if axis < 0 {
        return Err(NetError::Config(format!(
            "concat layer \"{}\" has a negative axis",
            params.name
        )));
    }
    Ok(Box::new(ConcatLayer { axis: axis as usize }))
}

impl Layer for ConcatLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        _required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        let Some(first) = inputs.first() else {
            return Err(NetError::Shape("concat layer has no inputs".to_string()));
        };
        if self.axis >= first.len() {
            return Err(NetError::Shape(format!(
                "concat axis {} exceeds input rank {}",
                self.axis,
                first.len()
            )));
        }

        let mut out = first.clone();
        for input in &inputs[1..] {
            let same_besides_axis = input.len() == first.len()
                && input
                    .iter()
                    .zip(first.iter())
                    .enumerate()
                    .all(|(i, (a, b))| i == self.axis || a == b);
            if !same_besides_axis {
                return Err(NetError::Shape(format!(
                    "concat inputs {:?} and {:?} differ outside axis {}",
                    first, input, self.axis
                )));
            }
            out[self.axis] += input[self.axis];
        }
        Ok(LayerShapes::new(vec![out]))
    }

    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        let (outer, out_inner) = outer_inner(outputs[0].shape(), self.axis);
        let mut dst = outputs[0].as_f32_mut()?;

        let mut offset = 0;
        for input in inputs {
            let src = input.as_f32()?;
            let (_, in_inner) = outer_inner(input.shape(), self.axis);
            for o in 0..outer {
                let at = o * out_inner + offset;
                dst[at..at + in_inner].copy_from_slice(&src[o * in_inner..(o + 1) * in_inner]);
            }
            offset += in_inner;
        }
        Ok(())
    }
}
