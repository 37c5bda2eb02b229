//! Kernel cache and JIT options.

use std::path::PathBuf;
use std::sync::Arc;

use bon::bon;
use tilejit_device::{NativeEntry, Toolchain, ToolchainConfig};

use crate::backend::BackendKind;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".tilejit_cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `TILEJIT_CACHE_DIR`, else `./.tilejit_cache`.
    pub fn from_env() -> Self {
        let dir = std::env::var_os("TILEJIT_CACHE_DIR").filter(|v| !v.is_empty()).map(PathBuf::from);
        let dir = dir.unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(DEFAULT_CACHE_DIR)
        });
        Self { dir }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Everything [`crate::jit`] needs besides the artifact.
pub struct JitOptions {
    pub target: BackendKind,
    /// Result indices; negative values count back from the parameter count.
    pub out_idx: Vec<i64>,
    pub entry_name: Option<String>,
    pub cache: CacheConfig,
    pub toolchain_config: Arc<ToolchainConfig>,
    /// Replaces the process-spawning toolchain.
    pub toolchain: Option<Arc<dyn Toolchain>>,
    /// Replaces the registered `dynlib_execute` entry (TPU only).
    pub native_entry: Option<Arc<dyn NativeEntry>>,
}

#[bon]
impl JitOptions {
    #[builder]
    pub fn new(
        #[builder(default)] target: BackendKind,
        #[builder(default)] out_idx: Vec<i64>,
        #[builder(into)] entry_name: Option<String>,
        #[builder(default)] cache: CacheConfig,
        #[builder(default = Arc::new(ToolchainConfig::from_env()))] toolchain_config: Arc<ToolchainConfig>,
        toolchain: Option<Arc<dyn Toolchain>>,
        native_entry: Option<Arc<dyn NativeEntry>>,
    ) -> Self {
        Self { target, out_idx, entry_name, cache, toolchain_config, toolchain, native_entry }
    }
}

impl Default for JitOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
