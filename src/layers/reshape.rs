use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerShapes};
use crate::tensor::{Shape, Tensor};

/// Rewrites a span of axes of each input's shape.
///
/// The span starts at `axis` and covers `num_axes` axes (-1 means through
/// the last axis); it is replaced by `dim`, where `0` copies the input axis
/// at the same position and `-1` is inferred from the element count. With
/// an empty `dim` the span is removed, which squeezes size-1 axes out.
pub struct ReshapeLayer {
    pub axis: usize,
    pub num_axes: i64,
    pub dim: Vec<i64>,
}

pub(super) fn create(params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
    let axis = params.get_i64_or("axis", 0)?;
    if axis < 0 {
        return Err(NetError::Config(format!(
            "reshape layer \"{}\" has a negative axis",
            params.name
        )));
    }
    let num_axes = params.get_i64_or("num_axes", -1)?;
    if num_axes < -1 {
        return Err(NetError::Config(format!(
            "reshape layer \"{}\" has invalid num_axes {}",
            params.name, num_axes
        )));
    }
    let dim = if params.has("dim") {
        params.get_int_list("dim")?
    } else {
        Vec::new()
    };
    Ok(Box::new(ReshapeLayer {
        axis: axis as usize,
        num_axes,
        dim,
    }))
}

impl ReshapeLayer {
    fn output_shape(&self, input: &[usize]) -> Result<Shape, NetError> {
        let rank = input.len();
        let span = if self.num_axes == -1 {
            rank.checked_sub(self.axis)
                .ok_or_else(|| NetError::Shape(format!(
                    "reshape axis {} exceeds input rank {}",
                    self.axis, rank
                )))?
        } else {
            self.num_axes as usize
        };
        if self.axis + span > rank {
            return Err(NetError::Shape(format!(
                "reshape span [{}, {}) exceeds input rank {}",
                self.axis,
                self.axis + span,
                rank
            )));
        }

        let total: usize = input.iter().product();
        let mut out: Shape = input[..self.axis].to_vec();
        let mut inferred = None;
        for (i, &d) in self.dim.iter().enumerate() {
            match d {
                0 => {
                    let src = input.get(self.axis + i).ok_or_else(|| {
                        NetError::Shape(format!(
                            "reshape dim #{i} copies an axis past the input rank"
                        ))
                    })?;
                    out.push(*src);
                }
                -1 => {
                    if inferred.is_some() {
                        return Err(NetError::Shape(
                            "reshape declares more than one inferred axis".to_string(),
                        ));
                    }
                    inferred = Some(out.len());
                    out.push(1);
                }
                d if d > 0 => out.push(d as usize),
                d => {
                    return Err(NetError::Shape(format!(
                        "reshape dim #{i} has invalid value {d}"
                    )));
                }
            }
        }
        out.extend(&input[self.axis + span..]);

        let known: usize = out.iter().product();
        if let Some(index) = inferred {
            if known == 0 || total % known != 0 {
                return Err(NetError::Shape(format!(
                    "cannot infer reshape axis: {total} elements vs. {:?}",
                    out
                )));
            }
            out[index] = total / known;
        } else if known != total {
            return Err(NetError::Shape(format!(
                "reshape to {:?} changes the element count of {:?}",
                out, input
            )));
        }
        Ok(out)
    }
}

impl Layer for ReshapeLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        _required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        if inputs.is_empty() {
            return Err(NetError::Shape("reshape layer has no inputs".to_string()));
        }
        let out = inputs
            .iter()
            .map(|input| self.output_shape(input))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LayerShapes::inplace(out))
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
