//! Native execution entry points.
//!
//! Compiled TPU kernels are not called directly. A registered
//! [`NativeEntry`] receives the library path, the symbol and the partitioned
//! argument lists, and performs the call. [`DynlibEntry`] is the in-process
//! implementation: it `dlopen`s the library and calls the generated
//! `<name>_kernel` wrapper described on [`KernelEntryFn`].

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::{ArgumentLayoutSnafu, LibraryLoadSnafu, NativeEntryNotRegisteredSnafu, Result, SymbolNotFoundSnafu};
use crate::tensor::{HostTensor, TensorWriteGuard};

/// Name of the default entry.
pub const DYNLIB_EXECUTE: &str = "dynlib_execute";

/// One `global_addr_t` field of a kernel's argument struct.
pub type ArgSlot = u64;

/// `void <name>_kernel(const void *args)`
///
/// `args` points at `tpu_kernel_api_<name>_args_t`: one [`ArgSlot`] per
/// positional kernel parameter, in declaration order.
pub type KernelEntryFn = unsafe extern "C" fn(*const c_void);

/// A marshaled call ready to cross into native code.
#[derive(Debug, Clone, Copy)]
pub struct NativeCall<'a> {
    pub library: &'a Path,
    pub symbol: &'a str,
    pub tensors: &'a [HostTensor],
    pub tensor_positions: &'a [i64],
    pub float_scalars: &'a [f64],
    pub float_positions: &'a [i64],
    pub fixed_scalars: &'a [i64],
    pub fixed_positions: &'a [i64],
}

impl NativeCall<'_> {
    /// Number of positional slots in the argument block.
    pub fn arity(&self) -> usize {
        self.tensors.len() + self.float_scalars.len() + self.fixed_scalars.len()
    }

    /// Rebuild the positional argument block.
    ///
    /// `tensor_addresses[i]` is the data address of `tensors[i]`. Fixed scalars
    /// keep their two's-complement bits and floats their IEEE-754 double bits.
    /// Every position in `0..arity` must be filled exactly once.
    pub fn argument_block(&self, tensor_addresses: &[ArgSlot]) -> Result<Vec<ArgSlot>> {
        let slots = self.arity();
        let tensors = self.tensor_positions.iter().zip(tensor_addresses.iter().copied());
        let floats = self.float_positions.iter().zip(self.float_scalars.iter().map(|v| v.to_bits()));
        let fixed = self.fixed_positions.iter().zip(self.fixed_scalars.iter().map(|&v| v as ArgSlot));

        let mut block: Vec<Option<ArgSlot>> = vec![None; slots];
        for (&position, value) in tensors.chain(floats).chain(fixed) {
            let slot = usize::try_from(position)
                .ok()
                .and_then(|p| block.get_mut(p))
                .context(ArgumentLayoutSnafu { position, slots })?;
            ensure!(slot.is_none(), ArgumentLayoutSnafu { position, slots });
            *slot = Some(value);
        }

        block
            .into_iter()
            .enumerate()
            .map(|(position, slot)| slot.context(ArgumentLayoutSnafu { position: position as i64, slots }))
            .collect()
    }
}

pub trait NativeEntry: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, call: &NativeCall<'_>) -> Result<()>;
}

/// Loads shared libraries once per path and calls the requested symbol.
#[derive(Default)]
pub struct DynlibEntry {
    libraries: Mutex<HashMap<PathBuf, Arc<Library>>>,
}

impl DynlibEntry {
    pub fn new() -> Self {
        Self::default()
    }

    fn library(&self, path: &Path) -> Result<Arc<Library>> {
        let mut libraries = self.libraries.lock();
        if let Some(lib) = libraries.get(path) {
            return Ok(lib.clone());
        }
        // SAFETY: loading runs the library's initializers; kernels are plain C with none of their own.
        let lib = unsafe { Library::new(path) }.context(LibraryLoadSnafu { path: path.to_path_buf() })?;
        let lib = Arc::new(lib);
        libraries.insert(path.to_path_buf(), lib.clone());
        tracing::debug!(library = %path.display(), "loaded kernel library");
        Ok(lib)
    }
}

/// Write-lock every distinct storage once; aliased tensors share a guard.
fn lock_tensors<'a>(tensors: &'a [HostTensor]) -> (Vec<TensorWriteGuard<'a>>, Vec<ArgSlot>) {
    let mut guards: Vec<TensorWriteGuard<'a>> = Vec::with_capacity(tensors.len());
    let mut addresses = Vec::with_capacity(tensors.len());
    for tensor in tensors {
        let index = match guards.iter().position(|guard| guard.covers(tensor)) {
            Some(index) => index,
            None => {
                guards.push(tensor.lock_mut());
                guards.len() - 1
            }
        };
        addresses.push(guards[index].as_mut_ptr() as ArgSlot);
    }
    (guards, addresses)
}

impl NativeEntry for DynlibEntry {
    fn name(&self) -> &str {
        DYNLIB_EXECUTE
    }

    fn execute(&self, call: &NativeCall<'_>) -> Result<()> {
        let lib = self.library(call.library)?;
        // SAFETY: generated kernels export `<name>_kernel` with the `KernelEntryFn` signature.
        let func: KernelEntryFn = unsafe {
            *lib.get::<KernelEntryFn>(call.symbol.as_bytes()).context(SymbolNotFoundSnafu {
                symbol: call.symbol.to_string(),
                path: call.library.to_path_buf(),
            })?
        };

        let (guards, addresses) = lock_tensors(call.tensors);
        let block = call.argument_block(&addresses)?;

        tracing::trace!(
            kernel.symbol = %call.symbol,
            kernel.num_slots = block.len(),
            kernel.num_tensors = call.tensors.len(),
            kernel.num_fp = call.float_scalars.len(),
            kernel.num_fixed = call.fixed_scalars.len(),
            "native call"
        );

        // SAFETY: `block` outlives the call and every tensor address stays valid under its write guard.
        unsafe { func(block.as_ptr().cast()) };
        drop(guards);
        Ok(())
    }
}

/// Named native entries.
pub struct NativeRegistry {
    entries: RwLock<HashMap<String, Arc<dyn NativeEntry>>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Register `entry` under its own name, replacing any previous entry.
    pub fn register(&self, entry: Arc<dyn NativeEntry>) {
        self.entries.write().insert(entry.name().to_string(), entry);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn NativeEntry>> {
        self.entries.read().get(name).cloned().context(NativeEntryNotRegisteredSnafu { name: name.to_string() })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry, pre-populated with [`DynlibEntry`].
pub static NATIVE_ENTRIES: Lazy<NativeRegistry> = Lazy::new(|| {
    let registry = NativeRegistry::new();
    registry.register(Arc::new(DynlibEntry::new()));
    registry
});
