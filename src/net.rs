//! The layer graph: construction, shape inference, allocation and forward
//! evaluation.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::env;
use crate::error::NetError;
use crate::layer::{Layer, LayerParams, LayerRegistry, LayerShapes};
use crate::tensor::{DataType, Shape, Tensor};

/// Reserved id of the synthetic layer whose output tensors are the network
/// inputs.
const INPUT_LAYER_ID: usize = 0;

/// A specific output port of a layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LayerPin {
    pub lid: usize,
    pub oid: usize,
}

/// Per-layer record: configuration, wiring and buffers.
pub struct LayerData {
    id: usize,
    name: String,
    layer_type: String,
    params: LayerParams,

    /// Producer pin for each input, in input order. `None` marks an input
    /// that was reserved but never connected.
    input_pins: SmallVec<[Option<LayerPin>; 4]>,
    /// Ids of the layers feeding this one, derived from `input_pins`.
    parent_ids: BTreeSet<usize>,
    /// Output indexes consumed by some other layer's input pin.
    required_outputs: BTreeSet<usize>,

    outputs: Vec<Tensor>,
    /// Bound views of the producers' output tensors, in input order.
    inputs: Vec<Tensor>,
    internals: Vec<Tensor>,

    instance: Option<Box<dyn Layer>>,
    visited: bool,
}

impl LayerData {
    fn new(id: usize, name: &str, layer_type: &str, mut params: LayerParams) -> LayerData {
        params.name = name.to_string();
        params.layer_type = layer_type.to_string();
        LayerData {
            id,
            name: name.to_string(),
            layer_type: layer_type.to_string(),
            params,
            input_pins: SmallVec::new(),
            parent_ids: BTreeSet::new(),
            required_outputs: BTreeSet::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            internals: Vec::new(),
            instance: None,
            visited: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer_type(&self) -> &str {
        &self.layer_type
    }

    pub fn params(&self) -> &LayerParams {
        &self.params
    }

    pub fn input_pins(&self) -> &[Option<LayerPin>] {
        &self.input_pins
    }

    pub fn required_outputs(&self) -> &BTreeSet<usize> {
        &self.required_outputs
    }

    pub fn outputs(&self) -> &[Tensor] {
        &self.outputs
    }

    /// The layer implementation, created through the registry on first use
    /// and kept for the lifetime of the network.
    fn instance_mut(&mut self, registry: &LayerRegistry) -> Result<&mut Box<dyn Layer>, NetError> {
        if self.instance.is_none() {
            let instance = registry.create(&self.layer_type, &self.params).map_err(|err| {
                match err {
                    NetError::NotImplemented(_) => NetError::NotImplemented(format!(
                        "can't create layer \"{}\" of type \"{}\"",
                        self.name, self.layer_type
                    )),
                    other => other,
                }
            })?;
            self.instance = Some(instance);
        }
        Ok(self.instance.as_mut().unwrap())
    }
}

/// The synthetic layer holding the network input tensors.
struct InputLayer {
    names: Vec<String>,
}

impl Layer for InputLayer {
    fn memory_shapes(
        &self,
        inputs: &[Shape],
        _required_outputs: usize,
    ) -> Result<LayerShapes, NetError> {
        // Seeded with the network input shapes; outputs mirror them.
        Ok(LayerShapes::new(inputs.to_vec()))
    }

    fn forward(
        &mut self,
        _inputs: &[Tensor],
        _outputs: &mut [Tensor],
        _internals: &mut [Tensor],
    ) -> Result<(), NetError> {
        Ok(())
    }

    fn output_name_to_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[derive(Default)]
struct ShapeRecord {
    in_shapes: Vec<Shape>,
    shapes: LayerShapes,
}

type ShapesMap = FxHashMap<usize, ShapeRecord>;

/// A directed acyclic graph of layers with named tensor pins.
///
/// Layers are added by name and type and wired output-pin to input-pin.
/// Layer ids are assigned in increasing order starting at 1; id 0 is the
/// synthetic input layer. Layers whose outputs nothing consumes are the
/// network outputs.
///
/// Buffers are allocated lazily: the first call to [`allocate`](Net::allocate)
/// or [`forward_all`](Net::forward_all) runs shape inference over the whole
/// graph, sizes every output tensor and finalizes every layer. Reassigning
/// an input blob with a new shape triggers re-allocation on the next run.
pub struct Net {
    layers: BTreeMap<usize, LayerData>,
    name_to_id: FxHashMap<String, usize>,
    last_id: usize,
    allocated: bool,
    registry: LayerRegistry,
    net_outputs: Vec<usize>,
}

impl Default for Net {
    fn default() -> Net {
        Net::new()
    }
}

impl Net {
    /// Create an empty network using the built-in layer registry.
    pub fn new() -> Net {
        Net::with_registry(LayerRegistry::with_builtin_layers())
    }

    /// Create an empty network with a caller-provided layer registry.
    pub fn with_registry(registry: LayerRegistry) -> Net {
        let mut input = LayerData::new(INPUT_LAYER_ID, "_input", "__NetInput__", LayerParams::new());
        input.instance = Some(Box::new(InputLayer { names: Vec::new() }));

        let mut layers = BTreeMap::new();
        layers.insert(INPUT_LAYER_ID, input);
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("_input".to_string(), INPUT_LAYER_ID);

        Net {
            layers,
            name_to_id,
            last_id: 0,
            allocated: false,
            registry,
            net_outputs: Vec::new(),
        }
    }

    /// Whether the network holds no layers besides the input layer.
    pub fn is_empty(&self) -> bool {
        self.layers.len() <= 1
    }

    /// Ids of all layers, including the input layer, in ascending order.
    pub fn layer_ids(&self) -> Vec<usize> {
        self.layers.keys().copied().collect()
    }

    /// Names of all layers except the input layer.
    pub fn layer_names(&self) -> Vec<String> {
        self.layers
            .values()
            .filter(|ld| ld.id != INPUT_LAYER_ID)
            .map(|ld| ld.name.clone())
            .collect()
    }

    pub fn layer_id(&self, name: &str) -> Option<usize> {
        self.name_to_id.get(name).copied()
    }

    pub fn layer(&self, id: usize) -> Option<&LayerData> {
        self.layers.get(&id)
    }

    fn layer_data(&self, id: usize) -> Result<&LayerData, NetError> {
        self.layers
            .get(&id)
            .ok_or_else(|| NetError::Config(format!("layer with id {id} not found")))
    }

    /// Add a layer and return its id.
    ///
    /// Names must be unique and must not contain `.`, which is reserved for
    /// pin aliases.
    pub fn add_layer(
        &mut self,
        name: &str,
        layer_type: &str,
        params: LayerParams,
    ) -> Result<usize, NetError> {
        if name.contains('.') {
            return Err(NetError::Config(format!(
                "layer name \"{name}\" must not contain a dot"
            )));
        }
        if self.name_to_id.contains_key(name) {
            return Err(NetError::Config(format!(
                "layer \"{name}\" is already in the net"
            )));
        }

        self.last_id += 1;
        let id = self.last_id;
        self.name_to_id.insert(name.to_string(), id);
        self.layers
            .insert(id, LayerData::new(id, name, layer_type, params));
        Ok(id)
    }

    /// Add a layer and connect output 0 of the previously added layer (or
    /// of the input layer, if the net is empty) to its input 0.
    pub fn add_layer_to_prev(
        &mut self,
        name: &str,
        layer_type: &str,
        params: LayerParams,
    ) -> Result<usize, NetError> {
        let prev_id = self.last_id;
        let id = self.add_layer(name, layer_type, params)?;
        self.connect(prev_id, 0, id, 0)?;
        Ok(id)
    }

    fn add_layer_input(ld: &mut LayerData, in_idx: usize, from: LayerPin) -> Result<(), NetError> {
        if ld.input_pins.len() <= in_idx {
            ld.input_pins.resize(in_idx + 1, None);
        } else if let Some(stored) = ld.input_pins[in_idx] {
            if stored != from {
                return Err(NetError::Config(format!(
                    "input #{} of layer \"{}\" was already connected",
                    in_idx, ld.name
                )));
            }
        }
        ld.input_pins[in_idx] = Some(from);
        Ok(())
    }

    /// Connect output `out_idx` of layer `out_id` to input `in_idx` of
    /// layer `in_id`.
    pub fn connect(
        &mut self,
        out_id: usize,
        out_idx: usize,
        in_id: usize,
        in_idx: usize,
    ) -> Result<(), NetError> {
        self.layer_data(out_id)?;
        let in_ld = self
            .layers
            .get_mut(&in_id)
            .ok_or_else(|| NetError::Config(format!("layer with id {in_id} not found")))?;

        Self::add_layer_input(in_ld, in_idx, LayerPin { lid: out_id, oid: out_idx })?;
        self.layers
            .get_mut(&out_id)
            .unwrap()
            .required_outputs
            .insert(out_idx);
        Ok(())
    }

    /// Connect two pins given as dotted aliases, e.g. `"conv1.1"` or
    /// `"pool.indices"`. The part after the dot is an output (resp. input)
    /// port: empty means 0, digits are an index, anything else is resolved
    /// through the layer instance's pin names.
    pub fn connect_by_name(&mut self, out_pin: &str, in_pin: &str) -> Result<(), NetError> {
        let out = self.pin_by_alias(out_pin, true)?;
        let inp = self.pin_by_alias(in_pin, false)?;
        self.connect(out.lid, out.oid, inp.lid, inp.oid)
    }

    fn split_pin(alias: &str) -> (&str, &str) {
        match alias.find('.') {
            Some(pos) => (&alias[..pos], &alias[pos + 1..]),
            None => (alias, ""),
        }
    }

    fn resolve_pin_port(&mut self, id: usize, port: &str, is_out: bool) -> Result<usize, NetError> {
        if port.is_empty() {
            return Ok(0);
        }
        if port.as_bytes()[0].is_ascii_digit() {
            if let Ok(index) = port.parse::<usize>() {
                return Ok(index);
            }
        }

        let registry = &self.registry;
        let ld = self
            .layers
            .get_mut(&id)
            .ok_or_else(|| NetError::Config(format!("layer with id {id} not found")))?;
        let instance = ld.instance_mut(registry)?;
        let index = if is_out {
            instance.output_name_to_index(port)
        } else {
            instance.input_name_to_index(port)
        };
        index.ok_or_else(|| {
            NetError::Config(format!(
                "layer \"{}\" has no {} pin named \"{}\"",
                ld.name,
                if is_out { "output" } else { "input" },
                port
            ))
        })
    }

    fn pin_by_alias(&mut self, alias: &str, is_out: bool) -> Result<LayerPin, NetError> {
        let (layer_name, port) = Self::split_pin(alias);
        // An empty layer name addresses the synthetic input layer.
        let lid = if layer_name.is_empty() {
            INPUT_LAYER_ID
        } else {
            self.layer_id(layer_name)
                .ok_or_else(|| NetError::Config(format!("layer \"{layer_name}\" not found")))?
        };
        let port = port.to_string();
        let oid = self.resolve_pin_port(lid, &port, is_out)?;
        Ok(LayerPin { lid, oid })
    }

    /// Declare the names of the network input tensors, resolvable in
    /// aliases such as `".data"`.
    pub fn set_net_inputs(&mut self, names: &[&str]) {
        let ld = self.layers.get_mut(&INPUT_LAYER_ID).unwrap();
        ld.instance = Some(Box::new(InputLayer {
            names: names.iter().map(|s| s.to_string()).collect(),
        }));
    }

    /// Assign a tensor to the output pin named by `alias`.
    ///
    /// Assigning a network input (alias with an empty layer part, e.g.
    /// `".data"`) is how inputs are provided. If the new shape differs from
    /// the previous one, the network is re-allocated on the next run.
    pub fn set_blob(&mut self, alias: &str, tensor: Tensor) -> Result<(), NetError> {
        let pin = self.pin_by_alias(alias, true)?;
        let ld = self.layers.get_mut(&pin.lid).unwrap();

        let needed = (pin.oid + 1).max(ld.required_outputs.len());
        if ld.outputs.len() < needed {
            ld.outputs.resize(needed, Tensor::empty());
        }
        let prev_shape = ld.outputs[pin.oid].shape().to_vec();
        self.allocated = self.allocated && prev_shape == tensor.shape();
        ld.outputs[pin.oid] = tensor;
        Ok(())
    }

    /// Fetch the tensor currently assigned to the output pin named by
    /// `alias`.
    pub fn get_blob(&mut self, alias: &str) -> Result<Tensor, NetError> {
        let pin = self.pin_by_alias(alias, true)?;
        let ld = self.layer_data(pin.lid)?;
        ld.outputs.get(pin.oid).cloned().ok_or_else(|| {
            NetError::Config(format!(
                "layer \"{}\" produces only {} outputs, #{} was requested",
                ld.name,
                ld.outputs.len(),
                pin.oid
            ))
        })
    }

    /// Ids of layers with no consumed outputs. These are the network
    /// outputs.
    pub fn unconnected_out_layers(&self) -> Vec<usize> {
        self.layers
            .values()
            .filter(|ld| ld.required_outputs.is_empty())
            .map(|ld| ld.id)
            .collect()
    }

    /// Allocate buffers for the whole network, if not already allocated.
    pub fn allocate(&mut self) -> Result<(), NetError> {
        self.setup()
    }

    /// Ids of the network output layers. Allocates if needed.
    pub fn net_outputs(&mut self) -> Result<&[usize], NetError> {
        self.setup()?;
        Ok(&self.net_outputs)
    }

    fn setup(&mut self) -> Result<(), NetError> {
        if !self.allocated {
            self.allocate_layers()?;
            self.compute_net_outputs();
            self.allocated = true;
        }
        Ok(())
    }

    fn compute_net_outputs(&mut self) {
        self.net_outputs = self.unconnected_out_layers();
        if env::debug_net() {
            eprintln!("net outputs ({}):", self.net_outputs.len());
            for id in &self.net_outputs {
                eprintln!("  {}", self.layers[id].name);
            }
        }
    }

    /// Two-pass recursive shape inference: first pull input shapes from the
    /// producers (recursing into them as needed), then ask the layer
    /// instance for its output shapes. Results are memoized in `map`.
    fn layer_shapes_rec(
        &mut self,
        id: usize,
        map: &mut ShapesMap,
        in_progress: &mut FxHashSet<usize>,
    ) -> Result<(), NetError> {
        if let Some(record) = map.get(&id) {
            if !record.shapes.out.is_empty() {
                return Ok(());
            }
        }
        if !in_progress.insert(id) {
            return Err(NetError::Config(format!(
                "cycle detected at layer \"{}\"",
                self.layer_data(id)?.name
            )));
        }

        let pins: Vec<Option<LayerPin>> = self.layer_data(id)?.input_pins.to_vec();
        let needs_inputs = map.get(&id).map_or(true, |rec| rec.in_shapes.is_empty());
        if needs_inputs {
            let mut in_shapes = Vec::with_capacity(pins.len());
            for (i, pin) in pins.iter().enumerate() {
                let Some(pin) = pin else {
                    return Err(NetError::Config(format!(
                        "input #{} of layer \"{}\" is not connected",
                        i,
                        self.layer_data(id)?.name
                    )));
                };
                self.layer_shapes_rec(pin.lid, map, in_progress)?;

                let producer = &map[&pin.lid];
                let shape = producer.shapes.out.get(pin.oid).ok_or_else(|| {
                    NetError::Shape(format!(
                        "layer \"{}\" has no output #{}",
                        self.layers[&pin.lid].name, pin.oid
                    ))
                })?;
                in_shapes.push(shape.clone());
            }
            map.entry(id).or_default().in_shapes = in_shapes;
        }

        let in_shapes = map[&id].in_shapes.clone();
        let required = self.layer_data(id)?.required_outputs.len();
        let layer_name = self.layer_data(id)?.name.clone();
        let shapes = {
            let registry = &self.registry;
            let ld = self.layers.get_mut(&id).unwrap();
            ld.instance_mut(registry)?
                .memory_shapes(&in_shapes, required)
                .map_err(|err| match err {
                    NetError::Shape(msg) => NetError::Shape(format!(
                        "shape inference of layer \"{layer_name}\" failed: {msg}"
                    )),
                    other => other,
                })?
        };
        map.get_mut(&id).unwrap().shapes = shapes;

        in_progress.remove(&id);
        Ok(())
    }

    /// Infer shapes for every layer given the network input shapes.
    fn layers_shapes(&mut self, input_shapes: Vec<Shape>) -> Result<ShapesMap, NetError> {
        let mut map = ShapesMap::default();
        map.insert(
            INPUT_LAYER_ID,
            ShapeRecord {
                in_shapes: input_shapes,
                shapes: LayerShapes::default(),
            },
        );

        let mut in_progress = FxHashSet::default();
        for id in self.layer_ids() {
            self.layer_shapes_rec(id, &mut map, &mut in_progress)?;
        }
        Ok(map)
    }

    fn allocate_layer(
        &mut self,
        id: usize,
        shapes: &ShapesMap,
        in_progress: &mut FxHashSet<usize>,
    ) -> Result<(), NetError> {
        if self.layer_data(id)?.visited {
            return Ok(());
        }
        if !in_progress.insert(id) {
            return Err(NetError::Config(format!(
                "cycle detected at layer \"{}\"",
                self.layer_data(id)?.name
            )));
        }

        // Derive parents and allocate them first.
        let pins: Vec<Option<LayerPin>> = self.layer_data(id)?.input_pins.to_vec();
        let mut parents = BTreeSet::new();
        for (i, pin) in pins.iter().enumerate() {
            let Some(pin) = pin else {
                return Err(NetError::Config(format!(
                    "input #{} of layer \"{}\" is not connected",
                    i,
                    self.layer_data(id)?.name
                )));
            };
            parents.insert(pin.lid);
        }
        for &parent in &parents {
            self.allocate_layer(parent, shapes, in_progress)?;
        }

        // Bind inputs to the producers' output tensors.
        let mut inputs = Vec::with_capacity(pins.len());
        for pin in pins.iter().flatten() {
            let producer = self.layer_data(pin.lid)?;
            let tensor = producer.outputs.get(pin.oid).cloned().ok_or_else(|| {
                NetError::Config(format!(
                    "layer \"{}\" has no output #{}",
                    producer.name, pin.oid
                ))
            })?;
            inputs.push(tensor);
        }

        let record = shapes
            .get(&id)
            .ok_or_else(|| NetError::Config(format!("no inferred shapes for layer id {id}")))?;

        let registry = &self.registry;
        let ld = self.layers.get_mut(&id).unwrap();
        ld.parent_ids = parents;
        ld.inputs = inputs;

        if ld.required_outputs.len() > record.shapes.out.len() {
            return Err(NetError::Shape(format!(
                "layer \"{}\" must produce {} outputs but shape inference yielded {}",
                ld.name,
                ld.required_outputs.len(),
                record.shapes.out.len()
            )));
        }

        // A layer produces at least one output tensor. Existing tensors are
        // kept whenever the recorded shape is unchanged.
        let out_count = record.shapes.out.len().max(1);
        if ld.outputs.len() < out_count {
            ld.outputs.resize(out_count, Tensor::empty());
        }
        for (i, out_shape) in record.shapes.out.iter().enumerate() {
            if ld.outputs[i].shape() != out_shape.as_slice() {
                let count: usize = out_shape.iter().product();
                let aliasable = record.shapes.inplace
                    && i < ld.inputs.len()
                    && ld.inputs[i].element_count() == count;
                ld.outputs[i] = if aliasable {
                    ld.inputs[i].reshaped(out_shape)?
                } else {
                    Tensor::zeros(out_shape, DataType::F32)
                };
            }
        }

        if ld.internals.len() < record.shapes.internal.len() {
            ld.internals
                .resize(record.shapes.internal.len(), Tensor::empty());
        }
        for (i, shape) in record.shapes.internal.iter().enumerate() {
            let count: usize = shape.iter().product();
            if ld.internals[i].shape() != shape.as_slice() && count > 0 {
                ld.internals[i] = Tensor::zeros(shape, DataType::F32);
            }
        }

        ld.instance_mut(registry)?;
        let LayerData {
            instance,
            inputs,
            outputs,
            ..
        } = ld;
        instance.as_mut().unwrap().finalize(inputs, outputs)?;

        self.layers.get_mut(&id).unwrap().visited = true;
        in_progress.remove(&id);
        Ok(())
    }

    fn allocate_layers(&mut self) -> Result<(), NetError> {
        for ld in self.layers.values_mut() {
            ld.visited = false;
        }

        let input_ld = self.layer_data(INPUT_LAYER_ID)?;
        if input_ld.outputs.is_empty() {
            return Err(NetError::Config(
                "network inputs are not set".to_string(),
            ));
        }
        let mut input_shapes = Vec::with_capacity(input_ld.outputs.len());
        for tensor in &input_ld.outputs {
            if tensor.is_empty() {
                return Err(NetError::Config(
                    "a network input tensor is empty".to_string(),
                ));
            }
            input_shapes.push(tensor.shape().to_vec());
        }

        let shapes = self.layers_shapes(input_shapes)?;
        let mut in_progress = FxHashSet::default();
        for id in self.layer_ids() {
            self.allocate_layer(id, &shapes, &mut in_progress)?;
        }
        Ok(())
    }

    fn forward_layer_inner(&mut self, id: usize) -> Result<(), NetError> {
        let ld = self.layer_data(id)?;
        if ld.visited {
            return Ok(());
        }

        let parents: Vec<usize> = ld.parent_ids.iter().copied().collect();
        for parent in parents {
            self.forward_layer_inner(parent)?;
        }

        let registry = &self.registry;
        let ld = self.layers.get_mut(&id).unwrap();
        ld.instance_mut(registry)?;
        let LayerData {
            instance,
            inputs,
            outputs,
            internals,
            ..
        } = ld;
        instance.as_mut().unwrap().forward(inputs, outputs, internals)?;

        self.layers.get_mut(&id).unwrap().visited = true;
        Ok(())
    }

    fn clear_visit_flags(&mut self) {
        for ld in self.layers.values_mut() {
            ld.visited = false;
        }
    }

    /// Run the whole network.
    pub fn forward_all(&mut self) -> Result<(), NetError> {
        self.setup()?;
        self.clear_visit_flags();
        for id in self.layer_ids() {
            self.forward_layer_inner(id)?;
        }
        Ok(())
    }

    /// Run the network up to and including the given layer.
    pub fn forward_to(&mut self, id: usize) -> Result<(), NetError> {
        self.setup()?;
        self.clear_visit_flags();
        self.forward_layer_inner(id)
    }
}
