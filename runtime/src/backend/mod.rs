//! Backend adapters.
//!
//! One [`BackendAdapter`] per hardware target. Adapters only describe what is
//! backend specific; caching, marshaling and the preparation state machine are
//! shared and live in [`crate::kernel`].

use std::path::Path;
use std::str::FromStr;

use tilejit_device::Toolchain;

use crate::cache::{ArtifactKind, ArtifactRecord};
use crate::error::{Error, Result, UnknownTargetSnafu};
use crate::marshal::MarshaledCallArgs;

pub mod rvv;
pub mod tpu;

pub use rvv::RvvAdapter;
pub use tpu::TpuAdapter;

/// Hardware target of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// Sophgo TPU, executed through a shared-library call-through.
    #[default]
    Tpu,
    /// RISC-V vector, executed as an ELF under an instruction-set simulator.
    Rvv,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tpu" | "sophgo" => Ok(BackendKind::Tpu),
            "rvv" | "riscv" | "risc-v" => Ok(BackendKind::Rvv),
            _ => UnknownTargetSnafu { name: s.to_string() }.fail(),
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// Best-effort execution failed; the reason was logged as a warning.
    Degraded { reason: String },
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed)
    }
}

/// Inputs to a single artifact build.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub toolchain: &'a dyn Toolchain,
    /// Persisted, post-processed source.
    pub source: &'a Path,
    /// Scratch output; renamed into the cache on success.
    pub output: &'a Path,
    /// Final header location for backends that emit one.
    pub header: &'a Path,
}

pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Symbol the artifact exports for the logical kernel `name`.
    fn entry_symbol(&self, name: &str) -> String;

    /// Deterministic source transform applied before hashing.
    fn prepare_source(&self, source: &str) -> String;

    fn artifact_kind(&self) -> ArtifactKind;

    fn invoke_toolchain(&self, ctx: &BuildContext<'_>) -> Result<()>;

    /// Run a prepared artifact. Must not mutate adapter state.
    fn execute(
        &self,
        toolchain: &dyn Toolchain,
        record: &ArtifactRecord,
        args: &MarshaledCallArgs,
    ) -> Result<ExecutionOutcome>;
}
