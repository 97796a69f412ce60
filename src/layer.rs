//! Layer parameters, the layer trait and the layer factory.

use rustc_hash::FxHashMap;

use crate::error::NetError;
use crate::layers;
use crate::tensor::{Shape, Tensor};

/// A scalar or array parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Real(f64),
    Str(String),
    IntList(Vec<i64>),
    RealList(Vec<f64>),
}

impl ParamValue {
    /// Integer view of this value. Reals are truncated, as the legacy
    /// formats store integer parameters as doubles.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Real(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            ParamValue::Int(v) => Some(vec![*v]),
            ParamValue::IntList(v) => Some(v.clone()),
            ParamValue::RealList(v) => Some(v.iter().map(|&x| x as i64).collect()),
            _ => None,
        }
    }
}

/// Configuration of one layer: its name and type, a parameter dictionary
/// and the constant blobs (weights, biases) it owns.
#[derive(Clone, Debug, Default)]
pub struct LayerParams {
    pub name: String,
    pub layer_type: String,
    values: FxHashMap<String, ParamValue>,
    pub blobs: Vec<Tensor>,
}

impl LayerParams {
    pub fn new() -> LayerParams {
        LayerParams::default()
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn set_i64(&mut self, name: &str, value: i64) {
        self.set(name, ParamValue::Int(value));
    }

    pub fn set_f64(&mut self, name: &str, value: f64) {
        self.set(name, ParamValue::Real(value));
    }

    pub fn set_str(&mut self, name: &str, value: &str) {
        self.set(name, ParamValue::Str(value.to_string()));
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set(name, ParamValue::Int(value as i64));
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    fn missing(&self, name: &str) -> NetError {
        NetError::Config(format!(
            "layer \"{}\" is missing parameter \"{}\"",
            self.name, name
        ))
    }

    fn mismatch(&self, name: &str, expected: &str) -> NetError {
        NetError::Config(format!(
            "parameter \"{}\" of layer \"{}\" is not {}",
            name, self.name, expected
        ))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, NetError> {
        match self.values.get(name) {
            Some(value) => value.as_i64().ok_or_else(|| self.mismatch(name, "an integer")),
            None => Err(self.missing(name)),
        }
    }

    pub fn get_i64_or(&self, name: &str, default: i64) -> Result<i64, NetError> {
        match self.values.get(name) {
            Some(value) => value.as_i64().ok_or_else(|| self.mismatch(name, "an integer")),
            None => Ok(default),
        }
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, NetError> {
        match self.values.get(name) {
            Some(value) => value.as_f64().ok_or_else(|| self.mismatch(name, "a number")),
            None => Err(self.missing(name)),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str, NetError> {
        match self.values.get(name) {
            Some(value) => value.as_str().ok_or_else(|| self.mismatch(name, "a string")),
            None => Err(self.missing(name)),
        }
    }

    pub fn get_str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str, NetError> {
        match self.values.get(name) {
            Some(value) => value.as_str().ok_or_else(|| self.mismatch(name, "a string")),
            None => Ok(default),
        }
    }

    pub fn get_bool_or(&self, name: &str, default: bool) -> Result<bool, NetError> {
        Ok(self.get_i64_or(name, default as i64)? != 0)
    }

    pub fn get_int_list(&self, name: &str) -> Result<Vec<i64>, NetError> {
        match self.values.get(name) {
            Some(value) => value
                .as_int_list()
                .ok_or_else(|| self.mismatch(name, "an integer list")),
            None => Err(self.missing(name)),
        }
    }
}

/// Result of a layer's shape inference: output shapes, scratch buffer
/// shapes and whether the layer wants its outputs aliased onto its inputs.
#[derive(Clone, Debug, Default)]
pub struct LayerShapes {
    pub out: Vec<Shape>,
    pub internal: Vec<Shape>,
    pub inplace: bool,
}

impl LayerShapes {
    pub fn new(out: Vec<Shape>) -> LayerShapes {
        LayerShapes {
            out,
            internal: Vec::new(),
            inplace: false,
        }
    }

    pub fn inplace(out: Vec<Shape>) -> LayerShapes {
        LayerShapes {
            out,
            internal: Vec::new(),
            inplace: true,
        }
    }
}

/// A computation step of the network.
///
/// The engine drives a layer through three phases: shape inference before
/// buffers exist, a finalize pass once buffers are allocated, and forward
/// evaluation. Layers declaring `inplace` shape inference may have their
/// output tensors alias their inputs; the allocator decides whether that
/// actually happens, so forwards must tolerate both.
pub trait Layer {
    /// Compute output and scratch shapes for the given input shapes.
    ///
    /// `required_outputs` is how many of this layer's outputs are consumed
    /// downstream. The default mirrors every input.
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        let Some(first) = inputs.first() else {
            return Err(NetError::Shape("layer has no inputs".to_string()));
        };
        Ok(LayerShapes::new(vec![
            first.clone();
            required_outputs.max(inputs.len())
        ]))
    }

    /// One-time setup after buffers are allocated.
    fn finalize(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<(), NetError> {
        let _ = (inputs, outputs);
        Ok(())
    }

    /// Evaluate the layer.
    fn forward(
        &mut self,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        internals: &mut [Tensor],
    ) -> Result<(), NetError>;

    /// Resolve a named input pin to its index.
    fn input_name_to_index(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }

    /// Resolve a named output pin to its index.
    fn output_name_to_index(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }
}

/// Constructor registered for a layer type.
pub type LayerConstructor = fn(&LayerParams) -> Result<Box<dyn Layer>, NetError>;

/// Factory mapping layer type names to constructors.
///
/// Lookup is case-insensitive. Registering the same constructor for a type
/// twice is a no-op; registering a different constructor for an existing
/// type is an error.
#[derive(Default)]
pub struct LayerRegistry {
    constructors: FxHashMap<String, LayerConstructor>,
}

impl LayerRegistry {
    /// Create a registry with no layer types.
    pub fn new() -> LayerRegistry {
        LayerRegistry::default()
    }

    /// Create a registry with the built-in structural layers registered.
    pub fn with_builtin_layers() -> LayerRegistry {
        let mut registry = LayerRegistry::new();
        layers::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, type_name: &str, constructor: LayerConstructor) -> Result<(), NetError> {
        let key = type_name.to_lowercase();
        if let Some(existing) = self.constructors.get(&key) {
            if *existing != constructor {
                return Err(NetError::Config(format!(
                    "layer type \"{key}\" was already registered"
                )));
            }
        }
        self.constructors.insert(key, constructor);
        Ok(())
    }

    pub fn unregister(&mut self, type_name: &str) {
        self.constructors.remove(&type_name.to_lowercase());
    }

    /// Instantiate a layer of the given type.
    pub fn create(
        &self,
        type_name: &str,
        params: &LayerParams,
    ) -> Result<Box<dyn Layer>, NetError> {
        match self.constructors.get(&type_name.to_lowercase()) {
            Some(constructor) => constructor(params),
            None => Err(NetError::NotImplemented(format!(
                "layer type \"{type_name}\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Layer, LayerParams, LayerRegistry, NetError, ParamValue, Tensor};

    struct Noop;

    impl Layer for Noop {
        fn forward(
            &mut self,
            _inputs: &[Tensor],
            _outputs: &mut [Tensor],
            _internals: &mut [Tensor],
        ) -> Result<(), NetError> {
            Ok(())
        }
    }

    fn noop_ctor(_params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
        Ok(Box::new(Noop))
    }

    fn other_ctor(_params: &LayerParams) -> Result<Box<dyn Layer>, NetError> {
        Ok(Box::new(Noop))
    }

    #[test]
    fn test_registry_case_insensitive() {
        let mut registry = LayerRegistry::new();
        registry.register("ReLU", noop_ctor).unwrap();

        assert!(registry.create("relu", &LayerParams::new()).is_ok());
        assert!(registry.create("RELU", &LayerParams::new()).is_ok());
        let err = registry.create("Tanh", &LayerParams::new()).err().unwrap();
        assert!(matches!(err, NetError::NotImplemented(_)));
    }

    #[test]
    fn test_registry_duplicate_rules() {
        let mut registry = LayerRegistry::new();
        registry.register("ReLU", noop_ctor).unwrap();

        // Same constructor again is allowed.
        registry.register("relu", noop_ctor).unwrap();

        // A different constructor for the same type is not.
        let err = registry.register("Relu", other_ctor).err().unwrap();
        assert!(matches!(err, NetError::Config(_)));

        registry.unregister("RELU");
        registry.register("relu", other_ctor).unwrap();
    }

    #[test]
    fn test_param_access() {
        let mut params = LayerParams::new();
        params.name = "conv1".to_string();
        params.set_i64("num_output", 64);
        params.set_f64("eps", 1e-5);
        params.set_str("pool", "MAX");
        params.set(
            "dim",
            ParamValue::RealList(vec![4.0, 2.0]),
        );

        assert_eq!(params.get_i64("num_output").unwrap(), 64);
        assert_eq!(params.get_f64("num_output").unwrap(), 64.0);
        assert_eq!(params.get_str("pool").unwrap(), "MAX");
        assert_eq!(params.get_int_list("dim").unwrap(), [4, 2]);
        assert_eq!(params.get_i64_or("axis", 1).unwrap(), 1);

        let err = params.get_i64("missing").err().unwrap();
        assert!(matches!(err, NetError::Config(_)));
        let err = params.get_i64("pool").err().unwrap();
        assert!(matches!(err, NetError::Config(_)));
    }

    #[test]
    fn test_default_memory_shapes() {
        let layer = Noop;
        let shapes = layer.memory_shapes(&[vec![1, 3, 4, 4]], 2).unwrap();
        assert_eq!(shapes.out, [vec![1, 3, 4, 4], vec![1, 3, 4, 4]]);
        assert!(!shapes.inplace);

        assert!(layer.memory_shapes(&[], 1).is_err());
    }
}
