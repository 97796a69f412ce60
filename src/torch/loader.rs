//! Reading of the legacy serialized object graph.
//!
//! Serialized models are a stream of tagged values: numbers, strings,
//! plain tables and class instances. Class instances carry a reference
//! index so shared objects (a storage referenced by several tensors) are
//! read once. The loader walks the stream through a caller-supplied
//! [`LegacyReader`], normalizes class parameters into
//! [`LayerParams`](crate::LayerParams) and produces the [`Module`] tree the
//! importer consumes.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::NetError;
use crate::layer::ParamValue;
use crate::tensor::{DataType, Tensor};
use crate::torch::module::Module;

// Value type tags of the serialization format.
const TYPE_NIL: i32 = 0;
const TYPE_NUMBER: i32 = 1;
const TYPE_STRING: i32 = 2;
const TYPE_TABLE: i32 = 3;
const TYPE_TORCH: i32 = 4;
const TYPE_BOOLEAN: i32 = 5;

/// Typed read access to a legacy model stream.
///
/// The byte-level encoding (endianness, text vs. binary) is the reader's
/// concern; the loader consumes typed scalars, raw strings and typed
/// arrays, and occasionally rewinds to re-dispatch on a value tag.
pub trait LegacyReader {
    fn read_i32(&mut self) -> Result<i32, NetError>;
    fn read_i64(&mut self) -> Result<i64, NetError>;
    fn read_f64(&mut self) -> Result<f64, NetError>;

    /// Read `len` raw bytes, the payload of a string.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, NetError>;

    /// Read `len` elements of `dtype` as a rank-1 tensor.
    fn read_array(&mut self, dtype: DataType, len: usize) -> Result<Tensor, NetError>;

    fn position(&self) -> u64;
    fn seek(&mut self, pos: u64) -> Result<(), NetError>;
}

/// Read the serialized module tree from `reader`.
///
/// The result is a synthetic `Sequential` root holding the stream's
/// top-level object.
pub fn load_modules(reader: &mut dyn LegacyReader) -> Result<Module, NetError> {
    let mut loader = Loader {
        reader,
        seen: FxHashSet::default(),
        storages: FxHashMap::default(),
        tensors: FxHashMap::default(),
    };
    let mut root = Module::new("Sequential");
    loader.read_object(&mut root)?;
    Ok(root)
}

/// A scalar-valued entry of a class table.
enum ScalarParam {
    Number(f64),
    Str(String),
    Bool(bool),
    NumberList(Vec<f64>),
}

/// Scalar parameters of one class table, keyed by field name.
#[derive(Default)]
struct ScalarDict {
    values: FxHashMap<String, ScalarParam>,
}

impl ScalarDict {
    fn insert(&mut self, key: String, value: ScalarParam) {
        self.values.insert(key, value);
    }

    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn missing(key: &str) -> NetError {
        NetError::Import(format!("module table is missing field \"{key}\""))
    }

    fn get_f64(&self, key: &str) -> Result<f64, NetError> {
        match self.values.get(key) {
            Some(ScalarParam::Number(value)) => Ok(*value),
            Some(_) => Err(NetError::Import(format!(
                "module field \"{key}\" is not a number"
            ))),
            None => Err(Self::missing(key)),
        }
    }

    fn get_i64(&self, key: &str) -> Result<i64, NetError> {
        Ok(self.get_f64(key)? as i64)
    }

    fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, NetError> {
        if self.has(key) {
            self.get_i64(key)
        } else {
            Ok(default)
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, NetError> {
        match self.values.get(key) {
            Some(ScalarParam::Bool(value)) => Ok(*value),
            Some(_) => Err(NetError::Import(format!(
                "module field \"{key}\" is not a boolean"
            ))),
            None => Ok(default),
        }
    }

    fn get_list(&self, key: &str) -> Result<&[f64], NetError> {
        match self.values.get(key) {
            Some(ScalarParam::NumberList(values)) => Ok(values),
            Some(_) => Err(NetError::Import(format!(
                "module field \"{key}\" is not an array"
            ))),
            None => Err(Self::missing(key)),
        }
    }
}

/// Tensor parameters of one class table: field name to the tensor's
/// reference index and data.
type TensorDict = FxHashMap<String, (i32, Tensor)>;

fn take_tensor(tensors: &mut TensorDict, key: &str, class: &str) -> Result<Tensor, NetError> {
    tensors
        .remove(key)
        .map(|(_, tensor)| tensor)
        .ok_or_else(|| NetError::Import(format!("\"{class}\" has no \"{key}\" tensor")))
}

/// Map a `torch.<Type><suffix>` class name to its element type. Returns
/// `Ok(None)` if the class does not carry the suffix at all.
fn parse_torch_type(class: &str, suffix: &str) -> Result<Option<DataType>, NetError> {
    let Some(rest) = class.strip_prefix("torch.") else {
        return Ok(None);
    };
    let Some(middle) = rest.strip_suffix(suffix) else {
        return Ok(None);
    };
    match middle {
        "Double" => Ok(Some(DataType::F64)),
        "Float" | "Cuda" => Ok(Some(DataType::F32)),
        "Byte" => Ok(Some(DataType::U8)),
        "Char" => Ok(Some(DataType::I8)),
        "Short" => Ok(Some(DataType::I16)),
        "Int" => Ok(Some(DataType::I32)),
        "Long" => Ok(Some(DataType::I64)),
        _ => Err(NetError::NotImplemented(format!(
            "element type of legacy class \"{class}\""
        ))),
    }
}

/// Strip the framework prefix from a module class name.
fn nn_class_name(class: &str) -> Option<&str> {
    for prefix in ["nn.", "cunn.", "cudnn.", "fbcunn."] {
        if let Some(rest) = class.strip_prefix(prefix) {
            return Some(rest);
        }
    }
    None
}

struct Loader<'r> {
    reader: &'r mut dyn LegacyReader,
    /// Reference indexes already read.
    seen: FxHashSet<i32>,
    /// Raw storages by reference index.
    storages: FxHashMap<i32, Tensor>,
    /// Materialized tensors by reference index, converted to f32.
    tensors: FxHashMap<i32, Tensor>,
}

impl<'r> Loader<'r> {
    fn read_string(&mut self) -> Result<String, NetError> {
        let len = self.reader.read_i32()?;
        if len < 0 {
            return Err(NetError::Import("negative string length".to_string()));
        }
        let bytes = self.reader.read_bytes(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|_| NetError::Import("class name is not valid UTF-8".to_string()))
    }

    /// Class names may be preceded by a version marker string.
    fn read_class_name(&mut self) -> Result<String, NetError> {
        let version = self.read_string()?;
        if version.starts_with("V ") {
            self.read_string()
        } else {
            Ok(version)
        }
    }

    /// Read one tagged value. Class instances encountered anywhere in the
    /// stream attach to `cur` if they turn out to be modules.
    fn read_object(&mut self, cur: &mut Module) -> Result<(), NetError> {
        let type_id = self.reader.read_i32()?;
        match type_id {
            TYPE_NIL => Ok(()),
            TYPE_NUMBER => {
                self.reader.read_f64()?;
                Ok(())
            }
            TYPE_STRING => {
                self.read_string()?;
                Ok(())
            }
            TYPE_BOOLEAN => {
                self.reader.read_i32()?;
                Ok(())
            }
            TYPE_TABLE => self.read_table(cur),
            TYPE_TORCH => {
                let index = self.reader.read_i32()?;
                self.read_torch_object(cur, index)?;
                self.seen.insert(index);
                Ok(())
            }
            other => Err(NetError::Import(format!(
                "unsupported value type tag [{other}]"
            ))),
        }
    }

    /// Read a plain table, recursing into its keys and values. This is how
    /// container `modules` lists are traversed.
    fn read_table(&mut self, cur: &mut Module) -> Result<(), NetError> {
        let index = self.reader.read_i32()?;
        if !self.seen.insert(index) {
            return Ok(());
        }

        let size = self.reader.read_i32()?;
        for _ in 0..size {
            self.read_object(cur)?; // key
            self.read_object(cur)?; // value
        }
        Ok(())
    }

    /// Read a class instance's state table, splitting string-keyed entries
    /// into scalar and tensor parameters. Non-string keys and unhandled
    /// value types are skipped generically.
    fn read_torch_table(&mut self, cur: &mut Module) -> Result<(ScalarDict, TensorDict), NetError> {
        let type_id = self.reader.read_i32()?;
        let index = self.reader.read_i32()?;
        if type_id != TYPE_TABLE || !self.seen.insert(index) {
            return Err(NetError::Import("malformed module state table".to_string()));
        }

        let pairs = self.reader.read_i32()?;
        let mut scalars = ScalarDict::default();
        let mut tensors = TensorDict::default();

        for _ in 0..pairs {
            let key_pos = self.reader.position();
            let key_type = self.reader.read_i32()?;
            if key_type != TYPE_STRING {
                self.reader.seek(key_pos)?;
                self.read_object(cur)?; // key
                self.read_object(cur)?; // value
                continue;
            }
            let key = self.read_string()?;

            let value_pos = self.reader.position();
            let value_type = self.reader.read_i32()?;
            match value_type {
                TYPE_TORCH => {
                    let obj_index = self.reader.read_i32()?;
                    self.read_torch_object(cur, obj_index)?;
                    self.seen.insert(obj_index);

                    if let Some(tensor) = self.tensors.get(&obj_index) {
                        tensors.insert(key, (obj_index, tensor.clone()));
                    } else if let Some(storage) = self.storages.get(&obj_index) {
                        // Bare storages hold numeric lists (reshape sizes
                        // and the like).
                        let list: Vec<f64> = (0..storage.element_count())
                            .map(|i| storage.get_f64(i))
                            .collect();
                        scalars.insert(key, ScalarParam::NumberList(list));
                    }
                }
                TYPE_NUMBER => {
                    scalars.insert(key, ScalarParam::Number(self.reader.read_f64()?));
                }
                TYPE_STRING => {
                    let value = self.read_string()?;
                    scalars.insert(key, ScalarParam::Str(value));
                }
                TYPE_BOOLEAN => {
                    scalars.insert(key, ScalarParam::Bool(self.reader.read_i32()? != 0));
                }
                _ => {
                    self.reader.seek(value_pos)?;
                    self.read_object(cur)?;
                }
            }
        }
        Ok((scalars, tensors))
    }

    fn read_storage(&mut self, index: i32, dtype: DataType) -> Result<(), NetError> {
        let size = self.reader.read_i64()?;
        if size < 0 {
            return Err(NetError::Import("negative storage size".to_string()));
        }
        let data = self.reader.read_array(dtype, size as usize)?;
        self.storages.insert(index, data);
        Ok(())
    }

    fn read_i64_array(&mut self, len: usize) -> Result<Vec<i64>, NetError> {
        let tensor = self.reader.read_array(DataType::I64, len)?;
        Ok((0..len).map(|i| tensor.get_f64(i) as i64).collect())
    }

    /// Read a tensor: dimensions, strides, storage offset and a reference
    /// to the backing storage, materialized into a contiguous f32 blob.
    fn read_tensor(&mut self, index: i32, dtype: DataType) -> Result<(), NetError> {
        let ndims = self.reader.read_i32()?;
        if ndims < 0 {
            return Err(NetError::Import("negative tensor rank".to_string()));
        }
        let sizes = self.read_i64_array(ndims as usize)?;
        let steps = self.read_i64_array(ndims as usize)?;
        let offset = self.reader.read_i64()? - 1;

        let type_id = self.reader.read_i32()?;
        if type_id == TYPE_NIL && ndims == 0 {
            self.tensors.insert(index, Tensor::empty());
            return Ok(());
        }
        if type_id != TYPE_TORCH {
            return Err(NetError::Import(
                "tensor does not reference a storage".to_string(),
            ));
        }

        let storage_index = self.reader.read_i32()?;
        if !self.seen.contains(&storage_index) {
            let class = self.read_class_name()?;
            let storage_dtype = parse_torch_type(&class, "Storage")?.ok_or_else(|| {
                NetError::Import(format!("\"{class}\" is not a storage class"))
            })?;
            if storage_dtype != dtype {
                return Err(NetError::Import(format!(
                    "tensor of type {} references a {} storage",
                    dtype.name(),
                    storage_dtype.name()
                )));
            }
            self.read_storage(storage_index, storage_dtype)?;
            self.seen.insert(storage_index);
        }

        let storage = self
            .storages
            .get(&storage_index)
            .ok_or_else(|| NetError::Import("tensor references an unread storage".to_string()))?
            .clone();

        if ndims == 0 {
            self.tensors.insert(index, Tensor::empty());
            return Ok(());
        }
        let needed = offset + steps[0] * sizes[0];
        if offset < 0 || needed > storage.element_count() as i64 {
            return Err(NetError::Import(
                "storage has insufficient elements for the tensor".to_string(),
            ));
        }

        let shape: Vec<usize> = sizes.iter().map(|&s| s as usize).collect();
        let data = gather_strided(&storage, offset, &sizes, &steps)?;
        self.tensors.insert(index, Tensor::from_data(&shape, data));
        Ok(())
    }

    fn read_torch_object(&mut self, cur: &mut Module, index: i32) -> Result<(), NetError> {
        if self.seen.contains(&index) {
            return Ok(());
        }

        let class = self.read_class_name()?;
        if let Some(dtype) = parse_torch_type(&class, "Tensor")? {
            self.read_tensor(index, dtype)?;
        } else if let Some(dtype) = parse_torch_type(&class, "Storage")? {
            self.read_storage(index, dtype)?;
        } else if let Some(nn_name) = nn_class_name(&class) {
            let nn_name = nn_name.to_string();
            self.read_module(cur, &nn_name)?;
        } else {
            return Err(NetError::NotImplemented(format!(
                "legacy class \"{class}\""
            )));
        }

        self.seen.insert(index);
        Ok(())
    }

    /// Read one module instance and append it, normalized, to `cur`.
    fn read_module(&mut self, cur: &mut Module, nn_name: &str) -> Result<(), NetError> {
        match nn_name {
            "Sequential" | "Parallel" | "Concat" | "ConcatTable" | "JoinTable" => {
                let mut module = Module::new(nn_name);
                let (scalars, _tensors) = self.read_torch_table(&mut module)?;
                match nn_name {
                    "Parallel" => {
                        module
                            .params
                            .set_i64("inputDimension", scalars.get_i64("inputDimension")?);
                        module
                            .params
                            .set_i64("outputDimension", scalars.get_i64("outputDimension")?);
                    }
                    "Concat" | "JoinTable" => {
                        module.params.set_i64("dimension", scalars.get_i64("dimension")?);
                    }
                    _ => {}
                }
                cur.children.push(module);
            }

            "SpatialConvolution" => {
                let mut module = Module::with_api_type(nn_name, "Convolution");
                let (scalars, mut tensors) = self.read_torch_table(&mut module)?;

                let weight = take_tensor(&mut tensors, "weight", nn_name)?;
                module.params.blobs.push(weight);
                let bias = tensors.remove("bias");
                module.params.set_bool("bias_term", bias.is_some());
                if let Some((_, bias)) = bias {
                    module.params.blobs.push(bias);
                }

                module
                    .params
                    .set_i64("num_output", scalars.get_i64("nOutputPlane")?);
                kernel_params(&scalars, &mut module)?;
                cur.children.push(module);
            }

            "SpatialMaxPooling" | "SpatialAveragePooling" => {
                let mut module = Module::with_api_type(nn_name, "Pooling");
                let (scalars, tensors) = self.read_torch_table(&mut module)?;

                if nn_name == "SpatialMaxPooling" {
                    module.params.set_str("pool", "MAX");
                    let (indices_index, _) = tensors.get("indices").ok_or_else(|| {
                        NetError::Import("max pooling has no \"indices\" tensor".to_string())
                    })?;
                    module
                        .params
                        .set_i64("indices_blob_id", *indices_index as i64);
                } else {
                    module.params.set_str("pool", "AVE");
                }
                kernel_params(&scalars, &mut module)?;
                cur.children.push(module);
            }

            "Linear" => {
                let mut module = Module::with_api_type(nn_name, "InnerProduct");
                let (_scalars, mut tensors) = self.read_torch_table(&mut module)?;

                let weight = take_tensor(&mut tensors, "weight", nn_name)?;
                module.params.set_i64("num_output", weight.shape()[0] as i64);
                module.params.blobs.push(weight);
                let bias = tensors.remove("bias");
                module.params.set_bool("bias_term", bias.is_some());
                if let Some((_, bias)) = bias {
                    module.params.blobs.push(bias);
                }
                cur.children.push(module);
            }

            "Reshape" => {
                let mut module = Module::with_api_type(nn_name, "Reshape");
                let (scalars, _tensors) = self.read_torch_table(&mut module)?;

                let size: Vec<i64> = scalars.get_list("size")?.iter().map(|&v| v as i64).collect();
                module.params.set("dim", ParamValue::IntList(size));
                if scalars.get_bool_or("batchMode", false)? {
                    module.params.set_i64("axis", 1);
                }
                cur.children.push(module);
            }

            "ReLU" => {
                cur.children.push(Module::with_api_type(nn_name, "ReLU"));
                self.read_object(cur)?;
            }
            "Tanh" => {
                cur.children.push(Module::with_api_type(nn_name, "TanH"));
                self.read_object(cur)?;
            }
            "Sigmoid" => {
                cur.children.push(Module::with_api_type(nn_name, "Sigmoid"));
                self.read_object(cur)?;
            }

            "SpatialBatchNormalization" => {
                let mut module = Module::with_api_type(nn_name, "BatchNorm");
                let (scalars, mut tensors) = self.read_torch_table(&mut module)?;

                let mean = take_tensor(&mut tensors, "running_mean", nn_name)?;
                let var = take_tensor(&mut tensors, "running_var", nn_name)?;
                module.params.blobs.push(mean);
                module.params.blobs.push(var);
                module.params.set_f64("eps", scalars.get_f64("eps")?);

                if let Some((_, weight)) = tensors.remove("weight") {
                    module.params.set_bool("has_weight", true);
                    module.params.blobs.push(weight);
                }
                if let Some((_, bias)) = tensors.remove("bias") {
                    module.params.set_bool("has_bias", true);
                    module.params.blobs.push(bias);
                }
                cur.children.push(module);
            }

            "PReLU" => {
                let mut module = Module::new(nn_name);
                let (scalars, mut tensors) = self.read_torch_table(&mut module)?;

                let weight = take_tensor(&mut tensors, "weight", nn_name)?;
                let channels = scalars.get_f64("nOutputPlane")? as usize;
                if channels != 0 {
                    if weight.element_count() != channels {
                        return Err(NetError::Import(format!(
                            "PReLU weight holds {} values for {} channels",
                            weight.element_count(),
                            channels
                        )));
                    }
                    module.api_type = Some("ChannelsPReLU".to_string());
                    module.params.blobs.push(weight);
                } else {
                    if weight.element_count() != 1 {
                        return Err(NetError::Import(
                            "shared PReLU expects a single weight".to_string(),
                        ));
                    }
                    module.api_type = Some("ReLU".to_string());
                    module.params.set_f64("negative_slope", weight.get_f64(0));
                }
                cur.children.push(module);
            }

            "SpatialDropout" => {
                let mut module = Module::with_api_type(nn_name, "Power");
                let (scalars, _tensors) = self.read_torch_table(&mut module)?;

                // Inference-time dropout is a fixed rescale.
                let scale = 1.0 - scalars.get_f64("p")?;
                if scale <= 0.0 {
                    return Err(NetError::Import(
                        "dropout probability must be below one".to_string(),
                    ));
                }
                module.params.set_f64("scale", scale);
                cur.children.push(module);
            }

            "Identity" => {
                let mut module = Module::with_api_type(nn_name, "Identity");
                self.read_torch_table(&mut module)?;
                cur.children.push(module);
            }

            "Padding" => {
                let mut module = Module::with_api_type(nn_name, "Padding");
                let (scalars, _tensors) = self.read_torch_table(&mut module)?;

                module
                    .params
                    .set_i64("padding_dim", scalars.get_i64("dim")? - 1);
                module.params.set_i64("padding", scalars.get_i64("pad")?);
                if scalars.has("nInputDim") {
                    module
                        .params
                        .set_i64("input_dims", scalars.get_i64("nInputDim")?);
                }
                if scalars.has("value") {
                    module.params.set_f64("value", scalars.get_f64("value")?);
                }
                if scalars.has("index") {
                    module.params.set_i64("index", scalars.get_i64("index")? - 1);
                }
                cur.children.push(module);
            }

            "CAddTable" => {
                cur.children.push(Module::new(nn_name));
                self.read_object(cur)?;
            }

            "SpatialDilatedConvolution" => {
                let mut module = Module::with_api_type(nn_name, "Convolution");
                let (scalars, mut tensors) = self.read_torch_table(&mut module)?;

                module.params.set_i64("kernel_w", scalars.get_i64("kW")?);
                module.params.set_i64("kernel_h", scalars.get_i64("kH")?);
                module.params.set_i64("pad_w", scalars.get_i64("padW")?);
                module.params.set_i64("pad_h", scalars.get_i64("padH")?);
                module.params.set_i64("stride_w", scalars.get_i64("dW")?);
                module.params.set_i64("stride_h", scalars.get_i64("dH")?);
                module
                    .params
                    .set_i64("dilation_w", scalars.get_i64("dilationW")?);
                module
                    .params
                    .set_i64("dilation_h", scalars.get_i64("dilationH")?);
                module
                    .params
                    .set_i64("num_output", scalars.get_i64("nOutputPlane")?);

                let weight = take_tensor(&mut tensors, "weight", nn_name)?;
                module.params.blobs.push(weight);
                let bias = tensors.remove("bias");
                module.params.set_bool("bias_term", bias.is_some());
                if let Some((_, bias)) = bias {
                    module.params.blobs.push(bias);
                }
                cur.children.push(module);
            }

            "SpatialFullConvolution" => {
                let mut module = Module::with_api_type(nn_name, "Deconvolution");
                let (scalars, mut tensors) = self.read_torch_table(&mut module)?;

                module.params.set_i64("kernel_w", scalars.get_i64("kW")?);
                module.params.set_i64("kernel_h", scalars.get_i64("kH")?);
                module.params.set_i64("pad_w", scalars.get_i64("padW")?);
                module.params.set_i64("pad_h", scalars.get_i64("padH")?);
                module.params.set_i64("stride_w", scalars.get_i64("dW")?);
                module.params.set_i64("stride_h", scalars.get_i64("dH")?);
                module.params.set_i64("adj_w", scalars.get_i64("adjW")?);
                module.params.set_i64("adj_h", scalars.get_i64("adjH")?);
                module
                    .params
                    .set_i64("num_output", scalars.get_i64("nOutputPlane")?);

                let weight = take_tensor(&mut tensors, "weight", nn_name)?;
                if weight.ndim() != 4 {
                    return Err(NetError::Import(
                        "full convolution expects a 4-d weight".to_string(),
                    ));
                }
                // The output-channel axis comes second in this layout.
                let s = weight.shape().to_vec();
                module
                    .params
                    .blobs
                    .push(weight.reshaped(&[s[1], s[0], s[2], s[3]])?);

                let bias = tensors.remove("bias");
                module.params.set_bool("bias_term", bias.is_some());
                if let Some((_, bias)) = bias {
                    module.params.blobs.push(bias);
                }
                cur.children.push(module);
            }

            "SpatialMaxUnpooling" => {
                let mut module = Module::new(nn_name);
                let (_scalars, tensors) = self.read_torch_table(&mut module)?;

                let (indices_index, _) = tensors.get("indices").ok_or_else(|| {
                    NetError::Import("max unpooling has no \"indices\" tensor".to_string())
                })?;
                module
                    .params
                    .set_i64("indices_blob_id", *indices_index as i64);
                cur.children.push(module);
            }

            other => {
                return Err(NetError::NotImplemented(format!(
                    "legacy module class \"{other}\""
                )));
            }
        }
        Ok(())
    }
}

/// Common geometry fields of convolution and pooling modules.
fn kernel_params(scalars: &ScalarDict, module: &mut Module) -> Result<(), NetError> {
    module.params.set_i64("kernel_h", scalars.get_i64("kH")?);
    module.params.set_i64("kernel_w", scalars.get_i64("kW")?);
    module.params.set_i64("stride_h", scalars.get_i64("dH")?);
    module.params.set_i64("stride_w", scalars.get_i64("dW")?);
    module.params.set_i64("pad_h", scalars.get_i64_or("padH", 0)?);
    module.params.set_i64("pad_w", scalars.get_i64_or("padW", 0)?);
    Ok(())
}

/// Gather a strided view of `storage` into a contiguous f32 buffer.
fn gather_strided(
    storage: &Tensor,
    offset: i64,
    sizes: &[i64],
    steps: &[i64],
) -> Result<Vec<f32>, NetError> {
    let count: usize = sizes.iter().map(|&s| s as usize).product();
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }

    let storage_len = storage.element_count() as i64;
    let ndims = sizes.len();
    let mut index = vec![0i64; ndims];
    'element: loop {
        let flat: i64 = offset + index.iter().zip(steps).map(|(i, s)| i * s).sum::<i64>();
        if flat < 0 || flat >= storage_len {
            return Err(NetError::Import(
                "tensor strides reach outside the storage".to_string(),
            ));
        }
        out.push(storage.get_f64(flat as usize) as f32);

        let mut d = ndims;
        while d > 0 {
            d -= 1;
            index[d] += 1;
            if index[d] < sizes[d] {
                continue 'element;
            }
            index[d] = 0;
        }
        break;
    }
    Ok(out)
}
