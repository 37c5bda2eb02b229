//! Sophgo TPU adapter.
//!
//! Kernels compile to a shared library linked against the chip emulator (or
//! cmodel firmware) and run through a registered [`NativeEntry`].

use std::path::PathBuf;
use std::sync::Arc;

use snafu::ResultExt;
use tilejit_device::{
    CompileRequest, DYNLIB_EXECUTE, Driver, NATIVE_ENTRIES, NativeCall, NativeEntry, ToolOptions, Toolchain,
    ToolchainConfig,
};

use super::{BackendAdapter, BackendKind, BuildContext, ExecutionOutcome};
use crate::cache::{ArtifactKind, ArtifactRecord};
use crate::error::{DeviceSnafu, Result};
use crate::marshal::MarshaledCallArgs;

/// Wrapper suffix the TPU code generator appends to every entry.
pub const ENTRY_SUFFIX: &str = "_kernel";

/// Chips served by the tpuv7 runtime emulator.
const TPUV7_CHIPS: &[&str] = &["bm1690", "sg2262"];

const COMPILE_FLAGS: &[&str] = &["-O2", "-shared", "-fPIC", "-Wno-psabi"];

/// Tensor descriptor the kernel runtime expects to be declared in every translation unit.
pub const TENSOR_INFO_STRUCT: &str = "
typedef struct {
  dim4 shape;
  dim4 stride;
  global_addr_t addr;
  data_type_t dtype;
  int mode;
  int align_mode;
  int size;
  int offset;
  bool unsigned_flag;
  bool default_stride;
} __ppl_tensor_info;
";

/// Insert [`TENSOR_INFO_STRUCT`] after the line holding the first `#include`.
///
/// Without a trailing newline on that line the struct goes at the end; without
/// any include it goes first.
pub fn inject_tensor_info(source: &str) -> String {
    let Some(include) = source.find("#include") else {
        return format!("{TENSOR_INFO_STRUCT}{source}");
    };
    match source[include..].find('\n') {
        Some(offset) => {
            let split = include + offset + 1;
            format!("{}{TENSOR_INFO_STRUCT}{}", &source[..split], &source[split..])
        }
        None => format!("{source}\n{TENSOR_INFO_STRUCT}"),
    }
}

pub struct TpuAdapter {
    config: Arc<ToolchainConfig>,
    native: Arc<dyn NativeEntry>,
}

impl TpuAdapter {
    /// Adapter dispatching through the global `dynlib_execute` entry.
    pub fn new(config: Arc<ToolchainConfig>) -> Result<Self> {
        let native = NATIVE_ENTRIES.get(DYNLIB_EXECUTE).context(DeviceSnafu)?;
        Ok(Self { config, native })
    }

    pub fn with_native_entry(config: Arc<ToolchainConfig>, native: Arc<dyn NativeEntry>) -> Self {
        Self { config, native }
    }

    pub fn chip(&self) -> &str {
        &self.config.chip
    }

    /// Include paths and link setup for the configured chip.
    pub fn link_options(&self) -> Result<ToolOptions> {
        let root = self.config.resolve_sdk_root().context(DeviceSnafu)?;
        let chip = self.chip();
        let runtime = root.join("runtime");

        let include_dirs: Vec<PathBuf> = vec![
            runtime.join("customize/include"),
            runtime.join("kernel"),
            runtime.join(chip).join("TPU1686/kernel/include"),
        ];
        let (library, library_dir) = if TPUV7_CHIPS.contains(&chip) {
            ("tpuv7_emulator", runtime.join(chip).join("tpuv7-runtime-emulator/lib"))
        } else {
            ("cmodel_firmware", runtime.join(chip).join("lib"))
        };

        Ok(ToolOptions {
            flags: COMPILE_FLAGS.iter().map(|f| f.to_string()).collect(),
            include_dirs,
            library_dirs: vec![library_dir],
            libraries: vec![library.to_string()],
        })
    }
}

impl BackendAdapter for TpuAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Tpu
    }

    fn entry_symbol(&self, name: &str) -> String {
        if name.ends_with(ENTRY_SUFFIX) { name.to_string() } else { format!("{name}{ENTRY_SUFFIX}") }
    }

    fn prepare_source(&self, source: &str) -> String {
        inject_tensor_info(source)
    }

    fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::SharedLibrary
    }

    fn invoke_toolchain(&self, ctx: &BuildContext<'_>) -> Result<()> {
        let options = self.link_options()?;
        tracing::debug!(tpu.chip = %self.chip(), source = %ctx.source.display(), "compiling TPU kernel");
        let request =
            CompileRequest { driver: Driver::C, source: ctx.source, output: ctx.output, target_arch: None, options };
        ctx.toolchain.compile(&request).context(DeviceSnafu)
    }

    fn execute(
        &self,
        _toolchain: &dyn Toolchain,
        record: &ArtifactRecord,
        args: &MarshaledCallArgs,
    ) -> Result<ExecutionOutcome> {
        let fixed = args.fixed_abi();
        let call = NativeCall {
            library: &record.path,
            symbol: &record.symbol,
            tensors: &args.tensors,
            tensor_positions: &args.tensor_positions,
            float_scalars: &args.float_scalars,
            float_positions: &args.float_positions,
            fixed_scalars: &fixed,
            fixed_positions: &args.fixed_positions,
        };
        self.native.execute(&call).context(DeviceSnafu)?;
        Ok(ExecutionOutcome::Completed)
    }
}
