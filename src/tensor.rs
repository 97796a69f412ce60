//! The tensor abstraction consumed by the graph engine.
//!
//! Tensors are dense, contiguous, reference-counted buffers with a shape and
//! an element type. Storage is shared between handles: reshaping produces a
//! view over the same buffer, which is how in-place layers alias their
//! output onto their input. The engine is single-threaded, so interior
//! mutability uses `RefCell` rather than locks.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::error::NetError;

/// Dimensions of a tensor, outermost first.
pub type Shape = Vec<usize>;

/// Element types. `F32` is the compute type; the remaining types appear in
/// imported constant data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    F32,
    F64,
    I32,
    I64,
    I16,
    I8,
    U8,
}

impl DataType {
    /// Size in bytes of one element.
    pub fn size_of(self) -> usize {
        match self {
            DataType::F64 | DataType::I64 => 8,
            DataType::F32 | DataType::I32 => 4,
            DataType::I16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::I16 => "i16",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
        }
    }
}

#[derive(Clone, Debug)]
enum Storage {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    I16(Vec<i16>),
    I8(Vec<i8>),
    U8(Vec<u8>),
}

impl Storage {
    fn dtype(&self) -> DataType {
        match self {
            Storage::F32(_) => DataType::F32,
            Storage::F64(_) => DataType::F64,
            Storage::I32(_) => DataType::I32,
            Storage::I64(_) => DataType::I64,
            Storage::I16(_) => DataType::I16,
            Storage::I8(_) => DataType::I8,
            Storage::U8(_) => DataType::U8,
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F64(v) => v.len(),
            Storage::I32(v) => v.len(),
            Storage::I64(v) => v.len(),
            Storage::I16(v) => v.len(),
            Storage::I8(v) => v.len(),
            Storage::U8(v) => v.len(),
        }
    }

    fn zeros(dtype: DataType, len: usize) -> Storage {
        match dtype {
            DataType::F32 => Storage::F32(vec![0.; len]),
            DataType::F64 => Storage::F64(vec![0.; len]),
            DataType::I32 => Storage::I32(vec![0; len]),
            DataType::I64 => Storage::I64(vec![0; len]),
            DataType::I16 => Storage::I16(vec![0; len]),
            DataType::I8 => Storage::I8(vec![0; len]),
            DataType::U8 => Storage::U8(vec![0; len]),
        }
    }

    fn get_f64(&self, index: usize) -> f64 {
        match self {
            Storage::F32(v) => v[index] as f64,
            Storage::F64(v) => v[index],
            Storage::I32(v) => v[index] as f64,
            Storage::I64(v) => v[index] as f64,
            Storage::I16(v) => v[index] as f64,
            Storage::I8(v) => v[index] as f64,
            Storage::U8(v) => v[index] as f64,
        }
    }
}

mod sealed {
    use super::Storage;

    pub trait Sealed: Sized {
        fn wrap(data: Vec<Self>) -> Storage;
    }
}

/// Element types a tensor can be built from.
pub trait Element: Copy + sealed::Sealed {}

macro_rules! impl_element {
    ($type:ty, $variant:ident) => {
        impl sealed::Sealed for $type {
            fn wrap(data: Vec<Self>) -> Storage {
                Storage::$variant(data)
            }
        }

        impl Element for $type {}
    };
}

impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(i16, I16);
impl_element!(i8, I8);
impl_element!(u8, U8);

/// A dense tensor handle. Cloning a handle shares the underlying storage;
/// use [`deep_clone`](Tensor::deep_clone) for an independent copy.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<RefCell<Storage>>,
    shape: Shape,
}

impl Tensor {
    /// An unallocated tensor. It has no dimensions and zero elements, and
    /// compares unequal in shape to every allocated tensor.
    pub fn empty() -> Tensor {
        Tensor {
            data: Rc::new(RefCell::new(Storage::F32(Vec::new()))),
            shape: Vec::new(),
        }
    }

    /// A zero-filled tensor of the given shape and element type.
    pub fn zeros(shape: &[usize], dtype: DataType) -> Tensor {
        let len = shape.iter().product();
        Tensor {
            data: Rc::new(RefCell::new(Storage::zeros(dtype, len))),
            shape: shape.to_vec(),
        }
    }

    /// Build a tensor from a vector of elements. The data length must match
    /// the shape's element count.
    pub fn from_data<T: Element>(shape: &[usize], data: Vec<T>) -> Tensor {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "data length does not match shape"
        );
        Tensor {
            data: Rc::new(RefCell::new(<T as sealed::Sealed>::wrap(data))),
            shape: shape.to_vec(),
        }
    }

    pub fn dtype(&self) -> DataType {
        self.data.borrow().dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements. Zero for unallocated tensors.
    pub fn element_count(&self) -> usize {
        if self.shape.is_empty() {
            0
        } else {
            self.shape.iter().product()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }

    /// A view with a new shape over the same storage. The element counts
    /// must match.
    pub fn reshaped(&self, shape: &[usize]) -> Result<Tensor, NetError> {
        let count: usize = shape.iter().product();
        if count != self.element_count() {
            return Err(NetError::Shape(format!(
                "cannot view {} elements as shape {:?}",
                self.element_count(),
                shape
            )));
        }
        Ok(Tensor {
            data: Rc::clone(&self.data),
            shape: shape.to_vec(),
        })
    }

    /// An independent copy of this tensor's data.
    pub fn deep_clone(&self) -> Tensor {
        Tensor {
            data: Rc::new(RefCell::new(self.data.borrow().clone())),
            shape: self.shape.clone(),
        }
    }

    /// Whether two handles view the same storage.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    /// Element at a flat index, converted to f64. Used for reading imported
    /// constant data of arbitrary element type.
    pub fn get_f64(&self, index: usize) -> f64 {
        self.data.borrow().get_f64(index)
    }

    /// A copy of this tensor converted to f32.
    pub fn to_f32(&self) -> Tensor {
        if self.dtype() == DataType::F32 {
            return self.deep_clone();
        }
        let storage = self.data.borrow();
        let data: Vec<f32> = (0..storage.len())
            .map(|i| storage.get_f64(i) as f32)
            .collect();
        drop(storage);
        Tensor::from_data(&self.shape, data)
    }

    /// Borrow the elements as f32.
    pub fn as_f32(&self) -> Result<Ref<'_, [f32]>, NetError> {
        let storage = self.data.borrow();
        match &*storage {
            Storage::F32(_) => Ok(Ref::map(storage, |s| match s {
                Storage::F32(v) => v.as_slice(),
                _ => unreachable!(),
            })),
            other => Err(NetError::Shape(format!(
                "expected an f32 tensor, found {}",
                other.dtype().name()
            ))),
        }
    }

    /// Mutably borrow the elements as f32.
    pub fn as_f32_mut(&self) -> Result<RefMut<'_, [f32]>, NetError> {
        let storage = self.data.borrow_mut();
        match &*storage {
            Storage::F32(_) => Ok(RefMut::map(storage, |s| match s {
                Storage::F32(v) => v.as_mut_slice(),
                _ => unreachable!(),
            })),
            other => Err(NetError::Shape(format!(
                "expected an f32 tensor, found {}",
                other.dtype().name()
            ))),
        }
    }

    /// Fill this tensor's storage from little-endian bytes. The byte count
    /// must equal `element_count() * dtype().size_of()`.
    pub fn copy_from_le_bytes(&self, bytes: &[u8]) -> Result<(), NetError> {
        let mut storage = self.data.borrow_mut();
        let expected = storage.len() * storage.dtype().size_of();
        if bytes.len() != expected {
            return Err(NetError::Shape(format!(
                "expected {} bytes, received {}",
                expected,
                bytes.len()
            )));
        }

        fn fill<T, const N: usize>(dst: &mut [T], bytes: &[u8], from_le: impl Fn([u8; N]) -> T) {
            for (value, chunk) in dst.iter_mut().zip(bytes.chunks_exact(N)) {
                *value = from_le(chunk.try_into().unwrap());
            }
        }

        match &mut *storage {
            Storage::F32(v) => fill(v, bytes, f32::from_le_bytes),
            Storage::F64(v) => fill(v, bytes, f64::from_le_bytes),
            Storage::I32(v) => fill(v, bytes, i32::from_le_bytes),
            Storage::I64(v) => fill(v, bytes, i64::from_le_bytes),
            Storage::I16(v) => fill(v, bytes, i16::from_le_bytes),
            Storage::I8(v) => fill(v, bytes, i8::from_le_bytes),
            Storage::U8(v) => v.copy_from_slice(bytes),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &self.dtype().name())
            .field("shape", &self.shape)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DataType, Tensor};

    #[test]
    fn test_empty() {
        let t = Tensor::empty();
        assert_eq!(t.element_count(), 0);
        assert!(t.is_empty());
        assert_ne!(t.shape(), &[1, 2]);
    }

    #[test]
    fn test_zeros_and_access() {
        let t = Tensor::zeros(&[2, 3], DataType::F32);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.element_count(), 6);

        t.as_f32_mut().unwrap()[4] = 2.5;
        assert_eq!(t.as_f32().unwrap()[4], 2.5);
        assert_eq!(t.get_f64(4), 2.5);
    }

    #[test]
    fn test_reshaped_shares_storage() {
        let t = Tensor::from_data(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]);
        let view = t.reshaped(&[4]).unwrap();
        assert!(view.shares_storage(&t));

        view.as_f32_mut().unwrap()[0] = 9.0;
        assert_eq!(t.as_f32().unwrap()[0], 9.0);

        assert!(t.reshaped(&[3]).is_err());
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let t = Tensor::from_data(&[2], vec![1.0f32, 2.0]);
        let copy = t.deep_clone();
        assert!(!copy.shares_storage(&t));

        copy.as_f32_mut().unwrap()[0] = 5.0;
        assert_eq!(t.as_f32().unwrap()[0], 1.0);
    }

    #[test]
    fn test_to_f32_converts() {
        let t = Tensor::from_data(&[3], vec![1i64, -2, 3]);
        assert_eq!(t.dtype(), DataType::I64);

        let f = t.to_f32();
        assert_eq!(f.dtype(), DataType::F32);
        assert_eq!(&*f.as_f32().unwrap(), &[1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_copy_from_le_bytes() {
        let t = Tensor::zeros(&[2], DataType::F32);
        let mut bytes = Vec::new();
        bytes.extend(1.5f32.to_le_bytes());
        bytes.extend((-0.5f32).to_le_bytes());
        t.copy_from_le_bytes(&bytes).unwrap();
        assert_eq!(&*t.as_f32().unwrap(), &[1.5, -0.5]);

        assert!(t.copy_from_le_bytes(&bytes[..4]).is_err());
    }
}
