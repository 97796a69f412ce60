use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::layers::outer_inner;
use crate::tensor::{Shape, Tensor};

/// Cuts its input into equal parts along one axis, one part per consumed
/// output.
pub struct SliceLayer {
    pub axis: usize,
}

pub(super) fn create(params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    let axis = params.get_i64_or("axis", 1)?;
    if axis < 0 {
        return Err(NetError::Config(format!(
            "slice layer \"{}\" has a negative axis",
            params.name
        )));
    }
    Ok(Box::new(SliceLayer { axis: axis as usize }))
}

impl Layer for SliceLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        let Some(input) = inputs.first() else {
            return Err(NetError::Shape("slice layer has no input".to_string()));
        };
        if self.axis >= input.len() {
            return Err(NetError::Shape(format!(
                "slice axis {} exceeds input rank {}",
                self.axis,
                input.len()
            )));
        }

        let parts = required_outputs.max(1);
        if input[self.axis] % parts != 0 {
            return Err(NetError::Shape(format!(
                "axis {} of size {} cannot be sliced into {} parts",
                self.axis, input[self.axis], parts
            )));
        }
        let mut part = input.clone();
        part[self.axis] /= parts;
        Ok(LayerShapes::new(vec![part; parts]))
    }

    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        let src = inputs[0].as_f32()?;
        let (outer, in_inner) = outer_inner(inputs[0].shape(), self.axis);

        let mut offset = 0;
        for output in outputs.iter_mut() {
            let (_, out_inner) = outer_inner(output.shape(), self.axis);
            let mut dst = output.as_f32_mut()?;
            for o in 0..outer {
                let at = o * in_inner + offset;
                dst[o * out_inner..(o + 1) * out_inner].copy_from_slice(&src[at..at + out_inner]);
            }
            offset += out_inner;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::create;
    use crate::layer::LayerParams;
    use crate::tensor::{DataType, Tensor};

    fn axis_params(axis: i64) -> LayerParams {
        let mut params = LayerParams::new();
        params.set_i64("axis", axis);
        params
    }

    #[test]
    fn test_slice_shapes() {
        let layer = create(&axis_params(1)).unwrap();
        let shapes = layer.memory_shapes(&[vec![2, 4, 3]], 2).unwrap();
        assert_eq!(shapes.out, [vec![2, 2, 3], vec![2, 2, 3]]);

        let err = layer.memory_shapes(&[vec![2, 3, 3]], 2).err().unwrap();
        assert!(matches!(err, crate::NetError::Shape(_)));
    }

    #[test]
    fn test_slice_forward_inverts_concat() {
        let mut layer = create(&axis_params(1)).unwrap();
        let input = Tensor::from_data(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]);
        let mut outputs = vec![
            Tensor::zeros(&[2, 1], DataType::F32),
            Tensor::zeros(&[2, 1], DataType::F32),
        ];

        layer.forward(&[input], &mut outputs, &mut []).unwrap();
        assert_eq!(&*outputs[0].as_f32().unwrap(), &[1.0, 3.0]);
        assert_eq!(&*outputs[1].as_f32().unwrap(), &[2.0, 4.0]);
    }
}
