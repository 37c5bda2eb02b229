//! RISC-V vector adapter.
//!
//! Kernels become standalone ELF executables. Execution under a simulator is
//! best effort: the target is often used only to check that the generated
//! source compiles against the RVV intrinsics.

use std::sync::Arc;

use snafu::ResultExt;
use tilejit_device::{
    CompileRequest, Driver, HeaderRequest, SimulationRequest, ToolOptions, Toolchain, ToolchainConfig,
};

use super::{BackendAdapter, BackendKind, BuildContext, ExecutionOutcome};
use crate::cache::{ArtifactKind, ArtifactRecord};
use crate::error::{DeviceSnafu, Result};
use crate::marshal::MarshaledCallArgs;

/// Standard headers every RVV kernel is compiled with.
pub const PRELUDE_HEADERS: [&str; 9] =
    ["riscv_vector.h", "stdint.h", "stdio.h", "stdlib.h", "string.h", "math.h", "assert.h", "stddef.h", "float.h"];

pub fn with_prelude(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + PRELUDE_HEADERS.len() * 24);
    for header in PRELUDE_HEADERS {
        out.push_str("#include <");
        out.push_str(header);
        out.push_str(">\n");
    }
    out.push_str(source);
    out
}

pub struct RvvAdapter {
    config: Arc<ToolchainConfig>,
}

impl RvvAdapter {
    pub fn new(config: Arc<ToolchainConfig>) -> Self {
        Self { config }
    }

    pub fn arch(&self) -> &str {
        &self.config.rvv_arch
    }
}

impl BackendAdapter for RvvAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Rvv
    }

    fn entry_symbol(&self, name: &str) -> String {
        name.to_string()
    }

    fn prepare_source(&self, source: &str) -> String {
        with_prelude(source)
    }

    fn artifact_kind(&self) -> ArtifactKind {
        ArtifactKind::Executable
    }

    fn invoke_toolchain(&self, ctx: &BuildContext<'_>) -> Result<()> {
        let header =
            HeaderRequest { driver: Driver::RiscvC, source: ctx.source, header: ctx.header, target_arch: Some(self.arch()) };
        match ctx.toolchain.extract_header(&header) {
            Ok(count) => tracing::debug!(header = %ctx.header.display(), declarations = count, "wrote kernel header"),
            Err(error) => tracing::warn!(%error, source = %ctx.source.display(), "header extraction failed"),
        }

        let options = ToolOptions { flags: vec!["-mabi=lp64d".into(), "-O0".into()], ..Default::default() };
        let request = CompileRequest {
            driver: Driver::RiscvCxx,
            source: ctx.source,
            output: ctx.output,
            target_arch: Some(self.arch()),
            options,
        };
        ctx.toolchain.compile(&request).context(DeviceSnafu)
    }

    fn execute(
        &self,
        toolchain: &dyn Toolchain,
        record: &ArtifactRecord,
        args: &MarshaledCallArgs,
    ) -> Result<ExecutionOutcome> {
        tracing::debug!(kernel.symbol = %record.symbol, kernel.num_args = args.len(), "arguments are not forwarded to the simulator");
        let request = SimulationRequest { executable: &record.path, args: Vec::new() };
        let outcome = match toolchain.simulate(&request) {
            Ok(run) if run.success => {
                tracing::debug!(command = %run.command, stdout = %run.stdout, "simulation finished");
                ExecutionOutcome::Completed
            }
            Ok(run) => {
                let reason = format!("`{}` exited with {}: {}", run.command, run.status, run.stderr.trim());
                tracing::warn!(%reason, "simulation failed");
                ExecutionOutcome::Degraded { reason }
            }
            Err(error) => {
                tracing::warn!(%error, "simulation unavailable");
                ExecutionOutcome::Degraded { reason: error.to_string() }
            }
        };
        Ok(outcome)
    }
}
