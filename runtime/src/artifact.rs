//! Upstream compiler output consumed by the adapters.

use smallvec::SmallVec;
use tilejit_dtype::ScalarDType;

/// A formal kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    pub name: String,
    pub dtype: ScalarDType,
    pub shape: SmallVec<[usize; 4]>,
}

impl KernelParam {
    pub fn new(name: impl Into<String>, dtype: ScalarDType, shape: &[usize]) -> Self {
        Self { name: name.into(), dtype, shape: SmallVec::from_slice(shape) }
    }
}

/// Device source plus its interface, as produced by the upstream compiler.
///
/// Read-only from the adapters' point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub kernel_source: String,
    /// First global symbol of the device module, if the compiler reported one.
    pub global_symbol: Option<String>,
    pub params: Vec<KernelParam>,
}

impl CompiledArtifact {
    pub fn new(kernel_source: impl Into<String>, params: Vec<KernelParam>) -> Self {
        Self { kernel_source: kernel_source.into(), global_symbol: None, params }
    }

    pub fn with_global_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.global_symbol = Some(symbol.into());
        self
    }

    /// Logical entry name: explicit override, then the global symbol, then `main`.
    pub fn entry_name(&self, requested: Option<&str>) -> String {
        requested.or(self.global_symbol.as_deref()).unwrap_or("main").to_string()
    }
}
