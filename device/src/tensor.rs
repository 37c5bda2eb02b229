//! Host-resident tensors handed to kernels.
//!
//! A [`HostTensor`] is a cheap, clonable handle: clones share the same
//! storage, so a tensor passed as a kernel output is observed by every other
//! handle once the kernel writes into it.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tilejit_dtype::ScalarDType;
use tilejit_dtype::ext::HasDType;

use crate::error::{DTypeMismatchSnafu, ElementCountSnafu, Result, TensorSizeSnafu, UnsupportedDTypeSnafu};

struct Storage {
    bytes: RwLock<Box<[u8]>>,
}

#[derive(Clone)]
pub struct HostTensor {
    storage: Arc<Storage>,
    dtype: ScalarDType,
    shape: SmallVec<[usize; 4]>,
}

impl HostTensor {
    /// Allocate a zero-filled tensor.
    pub fn zeros(dtype: ScalarDType, shape: &[usize]) -> Result<Self> {
        let nbytes = byte_len(dtype, shape)?;
        Ok(Self::from_bytes_unchecked(dtype, shape, vec![0u8; nbytes].into_boxed_slice()))
    }

    /// Allocate a tensor where every element equals `value` converted to `dtype`.
    pub fn full(dtype: ScalarDType, shape: &[usize], value: f64) -> Result<Self> {
        Self::from_fn(dtype, shape, |_| value)
    }

    /// Allocate a tensor whose element `i` (row-major) is `f(i)` converted to `dtype`.
    pub fn from_fn(dtype: ScalarDType, shape: &[usize], mut f: impl FnMut(usize) -> f64) -> Result<Self> {
        let nbytes = byte_len(dtype, shape)?;
        let mut bytes = vec![0u8; nbytes].into_boxed_slice();
        for (idx, chunk) in bytes.chunks_exact_mut(dtype.bytes()).enumerate() {
            encode_element(dtype, f(idx), chunk)?;
        }
        Ok(Self::from_bytes_unchecked(dtype, shape, bytes))
    }

    pub fn from_slice<T: HasDType + bytemuck::Pod>(data: &[T], shape: &[usize]) -> Result<Self> {
        let expected = element_count(T::DTYPE, shape)?;
        ensure!(data.len() == expected, ElementCountSnafu { expected, actual: data.len() });
        let bytes: Box<[u8]> = bytemuck::cast_slice(data).into();
        Ok(Self::from_bytes_unchecked(T::DTYPE, shape, bytes))
    }

    fn from_bytes_unchecked(dtype: ScalarDType, shape: &[usize], bytes: Box<[u8]>) -> Self {
        Self { storage: Arc::new(Storage { bytes: RwLock::new(bytes) }), dtype, shape: SmallVec::from_slice(shape) }
    }

    /// Copy the contents out as a typed vector.
    pub fn to_vec<T: HasDType + bytemuck::Pod>(&self) -> Result<Vec<T>> {
        ensure!(T::DTYPE == self.dtype, DTypeMismatchSnafu { expected: T::DTYPE, actual: self.dtype });
        let bytes = self.storage.bytes.read();
        Ok(bytemuck::pod_collect_to_vec(&bytes[..]))
    }

    pub fn dtype(&self) -> ScalarDType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.bytes()
    }

    /// Run `f` over the raw bytes under a shared lock.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.storage.bytes.read())
    }

    /// Whether both handles refer to the same storage.
    pub fn shares_storage(&self, other: &HostTensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Exclusive access to the storage, held across a native call.
    pub fn lock_mut(&self) -> TensorWriteGuard<'_> {
        TensorWriteGuard { storage: &self.storage, bytes: self.storage.bytes.write() }
    }
}

/// Write guard over a tensor's storage.
pub struct TensorWriteGuard<'a> {
    storage: &'a Arc<Storage>,
    bytes: RwLockWriteGuard<'a, Box<[u8]>>,
}

impl TensorWriteGuard<'_> {
    /// Whether `tensor` shares the guarded storage.
    pub fn covers(&self, tensor: &HostTensor) -> bool {
        Arc::ptr_eq(self.storage, &tensor.storage)
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Address of the first byte; valid while the guard is held.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }
}

impl fmt::Debug for HostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostTensor").field("dtype", &self.dtype).field("shape", &self.shape.as_slice()).finish()
    }
}

fn element_count(dtype: ScalarDType, shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .context(TensorSizeSnafu { shape: shape.to_vec(), dtype })
}

fn byte_len(dtype: ScalarDType, shape: &[usize]) -> Result<usize> {
    element_count(dtype, shape)?.checked_mul(dtype.bytes()).context(TensorSizeSnafu { shape: shape.to_vec(), dtype })
}

fn encode_element(dtype: ScalarDType, value: f64, out: &mut [u8]) -> Result<()> {
    match dtype {
        ScalarDType::Bool => out[0] = u8::from(value != 0.0),
        ScalarDType::Int8 => out.copy_from_slice(&(value as i8).to_ne_bytes()),
        ScalarDType::UInt8 => out.copy_from_slice(&(value as u8).to_ne_bytes()),
        ScalarDType::Int16 => out.copy_from_slice(&(value as i16).to_ne_bytes()),
        ScalarDType::UInt16 => out.copy_from_slice(&(value as u16).to_ne_bytes()),
        ScalarDType::Int32 => out.copy_from_slice(&(value as i32).to_ne_bytes()),
        ScalarDType::UInt32 => out.copy_from_slice(&(value as u32).to_ne_bytes()),
        ScalarDType::Int64 => out.copy_from_slice(&(value as i64).to_ne_bytes()),
        ScalarDType::UInt64 => out.copy_from_slice(&(value as u64).to_ne_bytes()),
        ScalarDType::Float16 => out.copy_from_slice(&half::f16::from_f64(value).to_ne_bytes()),
        ScalarDType::BFloat16 => out.copy_from_slice(&half::bf16::from_f64(value).to_ne_bytes()),
        ScalarDType::Float32 => out.copy_from_slice(&(value as f32).to_ne_bytes()),
        ScalarDType::Float64 => out.copy_from_slice(&value.to_ne_bytes()),
        ScalarDType::FP8E4M3 | ScalarDType::FP8E5M2 => {
            return UnsupportedDTypeSnafu { dtype, operation: "host element fill" }.fail();
        }
    }
    Ok(())
}
