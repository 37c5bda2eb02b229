//! Compile entry point.

use std::sync::Arc;

use tilejit_device::ProcessToolchain;

use crate::artifact::CompiledArtifact;
use crate::backend::{BackendAdapter, BackendKind, RvvAdapter, TpuAdapter};
use crate::config::JitOptions;
use crate::error::Result;
use crate::kernel::JitKernel;

/// Wrap `artifact` in a kernel handle for `options.target`.
///
/// Nothing is compiled here; call [`JitKernel::prepare`] or [`JitKernel::call`].
pub fn jit(artifact: CompiledArtifact, options: JitOptions) -> Result<JitKernel> {
    let JitOptions { target, out_idx, entry_name, cache, toolchain_config, toolchain, native_entry } = options;

    let toolchain = toolchain.unwrap_or_else(|| Arc::new(ProcessToolchain::new(toolchain_config.clone())));
    let adapter: Arc<dyn BackendAdapter> = match target {
        BackendKind::Tpu => match native_entry {
            Some(entry) => Arc::new(TpuAdapter::with_native_entry(toolchain_config, entry)),
            None => Arc::new(TpuAdapter::new(toolchain_config)?),
        },
        BackendKind::Rvv => Arc::new(RvvAdapter::new(toolchain_config)),
    };

    JitKernel::new(Arc::new(artifact), adapter, toolchain, cache.dir, entry_name.as_deref(), &out_idx)
}
