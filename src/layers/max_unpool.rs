use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::tensor::{Shape, Tensor};

/// Reverses a max pooling: scatters input values back to the positions the
/// partner pooling layer recorded in its indices output.
///
/// Input 0 is the pooled data, input 1 the indices tensor (flat positions
/// within each channel plane). The kernel geometry of the partner pooling
/// layer determines the output size.
pub struct MaxUnpoolLayer {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub pad: (usize, usize),
}

pub(super) fn create(params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    let dim = |name: &str| -> Result<usize, NetError> {
        let value = params.get_i64(name)?;
        if value < 0 {
            return Err(NetError::Config(format!(
                "parameter \"{}\" of layer \"{}\" is negative",
                name, params.name
            )));
        }
        Ok(value as usize)
    };
    Ok(Box::new(MaxUnpoolLayer {
        kernel: (dim("pool_k_h")?, dim("pool_k_w")?),
        stride: (dim("pool_stride_h")?, dim("pool_stride_w")?),
        pad: (dim("pool_pad_h")?, dim("pool_pad_w")?),
    }))
}

impl MaxUnpoolLayer {
    fn unpooled(&self, size: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize, NetError> {
        let out = (size as i64 - 1) * stride as i64 - 2 * pad as i64 + kernel as i64;
        if out <= 0 {
            return Err(NetError::Shape(format!(
                "unpooling of size {size} yields non-positive output size {out}"
            )));
        }
        Ok(out as usize)
    }
}

impl Layer for MaxUnpoolLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        _required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        let [data, indices] = inputs else {
            return Err(NetError::Shape(format!(
                "unpooling expects data and indices inputs, received {}",
                inputs.len()
            )));
        };
        if data.len() != 4 {
            return Err(NetError::Shape(format!(
                "unpooling expects a 4-d data input, received {:?}",
                data
            )));
        }
        if indices != data {
            return Err(NetError::Shape(format!(
                "unpooling indices shape {:?} differs from data shape {:?}",
                indices, data
            )));
        }

        let out = vec![
            data[0],
            data[1],
            self.unpooled(data[2], self.kernel.0, self.stride.0, self.pad.0)?,
            self.unpooled(data[3], self.kernel.1, self.stride.1, self.pad.1)?,
        ];
        Ok(LayerShapes::new(vec![out]))
    }

    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        let data = inputs[0].as_f32()?;
        let indices = inputs[1].as_f32()?;

        let in_shape = inputs[0].shape().to_vec();
        let out_shape = outputs[0].shape().to_vec();
        let planes = in_shape[0] * in_shape[1];
        let in_plane = in_shape[2] * in_shape[3];
        let out_plane = out_shape[2] * out_shape[3];

        let mut dst = outputs[0].as_f32_mut()?;
        dst.fill(0.0);
        for p in 0..planes {
            let src = &data[p * in_plane..(p + 1) * in_plane];
            let idx = &indices[p * in_plane..(p + 1) * in_plane];
            let out = &mut dst[p * out_plane..(p + 1) * out_plane];
            for i in 0..in_plane {
                let j = idx[i] as usize;
                if j >= out_plane {
                    return Err(NetError::Shape(format!(
                        "unpooling index {j} out of range for plane of {out_plane}"
                    )));
                }
                out[j] = src[i];
            }
        }
        Ok(())
    }
}
