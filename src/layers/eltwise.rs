use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::tensor::{Shape, Tensor};

/// Element-wise combination of equally-shaped inputs. Only summation is
/// supported, which is what table-style legacy containers lower to.
pub struct EltwiseLayer;

pub(super) fn create(params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    let operation = params.get_str_or("operation", "sum")?;
    if operation != "sum" {
        return Err(NetError::NotImplemented(format!(
            "eltwise operation \"{operation}\""
        )));
    }
    Ok(Box::new(EltwiseLayer))
}

impl Layer for EltwiseLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        _required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        let Some(first) = inputs.first() else {
            return Err(NetError::Shape("eltwise layer has no inputs".to_string()));
        };
        for input in &inputs[1..] {
            if input != first {
                return Err(NetError::Shape(format!(
                    "eltwise inputs {:?} and {:?} differ",
                    first, input
                )));
            }
        }
        Ok(LayerShapes::new(vec![first.clone()]))
    }

    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        let mut dst = outputs[0].as_f32_mut()?;
        dst.fill(0.0);
        for input in inputs {
            let src = input.as_f32()?;
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d += s;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::create;
    use crate::layer::LayerParams;
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_sum() {
        let mut layer = create(&LayerParams::new()).unwrap();
        let a = Tensor::from_data(&[3], vec![1.0f32, 2.0, 3.0]);
        let b = Tensor::from_data(&[3], vec![10.0f32, 20.0, 30.0]);
        let mut outputs = vec![Tensor::zeros(&[3], DataType::F32)];

        layer.forward(&[a, b], &mut outputs, &mut []).unwrap();
        assert_eq!(&*outputs[0].as_f32().unwrap(), &[11.0, 22.0, 33.0]);
    }

    #[test]
    fn test_unsupported_operation() {
        let mut params = LayerParams::new();
        params.set_str("operation", "max");
        let err = create(&params).err().unwrap();
        assert!(matches!(err, crate::NetError::NotImplemented(_)));
    }

    #[test]
    fn test_shape_mismatch() {
        let layer = create(&LayerParams::new()).unwrap();
        let err = layer
            .memory_shapes(&[vec![1, 2], vec![2, 1]], 1)
            .err()
            .unwrap();
        assert!(matches!(err, crate::NetError::Shape(_)));
    }
}
