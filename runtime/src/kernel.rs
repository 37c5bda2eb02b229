//! Uniform kernel handle.
//!
//! A [`JitKernel`] owns one artifact and one backend adapter. Preparation is
//! explicit ([`JitKernel::prepare`]) and idempotent; [`JitKernel::call`] is the
//! lazy convenience that prepares on first use.
//!
//! # State machine
//!
//! ```text
//! Uninitialized -> SourcePrepared -> ArtifactCached   -> Ready
//!                                 -> ArtifactCompiled -> Ready
//!                (any error)      -> Failed (terminal)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tilejit_device::{HostTensor, Toolchain};

use crate::artifact::CompiledArtifact;
use crate::backend::{BackendAdapter, BackendKind, BuildContext, ExecutionOutcome};
use crate::cache::{ArtifactRecord, ArtifactStore};
use crate::error::{NotPreparedSnafu, OutputNotTensorSnafu, PreparationFailedSnafu, Result, ResultIndexOutOfRangeSnafu};
use crate::marshal::{KernelArg, marshal};
use crate::profiler::{Profiler, TensorSupplyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum AdapterState {
    Uninitialized,
    SourcePrepared,
    ArtifactCached,
    ArtifactCompiled,
    Ready,
    Failed,
}

/// Where a prepared artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    Cached,
    Compiled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedArtifact {
    pub record: ArtifactRecord,
    pub origin: ArtifactOrigin,
    pub source_path: PathBuf,
}

/// Result of one kernel invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub outcome: ExecutionOutcome,
    /// Tensor arguments at the result indices, in result-index order.
    pub outputs: Vec<HostTensor>,
}

struct Lifecycle {
    state: AdapterState,
    prepared: Option<Arc<PreparedArtifact>>,
    failure: Option<String>,
}

pub struct JitKernel {
    artifact: Arc<CompiledArtifact>,
    adapter: Arc<dyn BackendAdapter>,
    toolchain: Arc<dyn Toolchain>,
    cache_dir: PathBuf,
    entry: String,
    symbol: String,
    result_indices: Vec<usize>,
    lifecycle: Mutex<Lifecycle>,
}

impl JitKernel {
    pub fn new(
        artifact: Arc<CompiledArtifact>,
        adapter: Arc<dyn BackendAdapter>,
        toolchain: Arc<dyn Toolchain>,
        cache_dir: impl Into<PathBuf>,
        entry_name: Option<&str>,
        out_idx: &[i64],
    ) -> Result<Self> {
        let result_indices = normalize_result_indices(out_idx, artifact.params.len())?;
        let entry = artifact.entry_name(entry_name);
        let symbol = adapter.entry_symbol(&entry);
        tracing::debug!(kernel.name = %entry, kernel.symbol = %symbol, backend = %adapter.kind(), "created kernel handle");

        Ok(Self {
            artifact,
            adapter,
            toolchain,
            cache_dir: cache_dir.into(),
            entry,
            symbol,
            result_indices,
            lifecycle: Mutex::new(Lifecycle { state: AdapterState::Uninitialized, prepared: None, failure: None }),
        })
    }

    /// Logical kernel name.
    pub fn name(&self) -> &str {
        &self.entry
    }

    /// Symbol exported by the artifact.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn backend(&self) -> BackendKind {
        self.adapter.kind()
    }

    /// Device source as produced upstream, before backend transforms.
    pub fn source(&self) -> &str {
        &self.artifact.kernel_source
    }

    pub fn artifact(&self) -> &CompiledArtifact {
        &self.artifact
    }

    pub fn result_indices(&self) -> &[usize] {
        &self.result_indices
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.lock().state
    }

    /// The prepared artifact, if preparation has succeeded.
    pub fn record(&self) -> Option<ArtifactRecord> {
        self.lifecycle.lock().prepared.as_ref().map(|p| p.record.clone())
    }

    /// Build or fetch the artifact. Idempotent.
    ///
    /// A failure is terminal: later calls report [`crate::Error::PreparationFailed`]
    /// without touching the toolchain again.
    pub fn prepare(&self) -> Result<Arc<PreparedArtifact>> {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(reason) = &lifecycle.failure {
            return PreparationFailedSnafu { entry: self.entry.clone(), reason: reason.clone() }.fail();
        }
        if let Some(prepared) = &lifecycle.prepared {
            if prepared.record.path.is_file() {
                return Ok(prepared.clone());
            }
            tracing::debug!(kernel.name = %self.entry, path = %prepared.record.path.display(), "artifact vanished, preparing again");
            lifecycle.prepared = None;
            lifecycle.state = AdapterState::Uninitialized;
        }

        match self.build(&mut lifecycle) {
            Ok(prepared) => {
                let prepared = Arc::new(prepared);
                lifecycle.prepared = Some(prepared.clone());
                lifecycle.state = AdapterState::Ready;
                Ok(prepared)
            }
            Err(error) => {
                tracing::debug!(kernel.name = %self.entry, %error, "preparation failed");
                lifecycle.failure = Some(error.to_string());
                lifecycle.state = AdapterState::Failed;
                Err(error)
            }
        }
    }

    fn build(&self, lifecycle: &mut Lifecycle) -> Result<PreparedArtifact> {
        let source = self.adapter.prepare_source(&self.artifact.kernel_source);
        lifecycle.state = AdapterState::SourcePrepared;

        let store = ArtifactStore::open(&self.cache_dir)?;
        let resolution = store.resolve(&self.symbol, &source, self.adapter.artifact_kind());
        let paths = &resolution.paths;

        let origin = if resolution.is_hit() {
            lifecycle.state = AdapterState::ArtifactCached;
            tracing::debug!(kernel.name = %self.entry, path = %paths.artifact.display(), "using cached kernel");
            ArtifactOrigin::Cached
        } else {
            store.write_source(paths, &source)?;
            store.persist_artifact(&paths.artifact, |output| {
                let ctx = BuildContext {
                    toolchain: self.toolchain.as_ref(),
                    source: &paths.source,
                    output,
                    header: &paths.header,
                };
                self.adapter.invoke_toolchain(&ctx)
            })?;
            lifecycle.state = AdapterState::ArtifactCompiled;
            tracing::info!(kernel.name = %self.entry, backend = %self.adapter.kind(), path = %paths.artifact.display(), "compiled kernel");
            ArtifactOrigin::Compiled
        };

        let record = ArtifactRecord {
            key: resolution.key.clone(),
            path: paths.artifact.clone(),
            backend: self.adapter.kind(),
            symbol: self.symbol.clone(),
        };
        Ok(PreparedArtifact { record, origin, source_path: paths.source.clone() })
    }

    /// Execute a prepared artifact.
    pub fn invoke(&self, args: &[KernelArg]) -> Result<Invocation> {
        let prepared = self.lifecycle.lock().prepared.clone().context(NotPreparedSnafu { entry: self.entry.clone() })?;
        let marshaled = marshal(args)?;
        let outputs = self.select_outputs(args)?;

        tracing::debug!(
            kernel.name = %self.entry,
            kernel.symbol = %prepared.record.symbol,
            path = %prepared.record.path.display(),
            tensors = ?marshaled.tensors.iter().map(|t| (t.shape().to_vec(), t.dtype())).collect::<Vec<_>>(),
            tensor_positions = ?marshaled.tensor_positions,
            float_scalars = ?marshaled.float_scalars,
            float_positions = ?marshaled.float_positions,
            fixed_scalars = ?marshaled.fixed_abi(),
            fixed_positions = ?marshaled.fixed_positions,
            "executing kernel"
        );

        let outcome = self.adapter.execute(self.toolchain.as_ref(), &prepared.record, &marshaled)?;
        Ok(Invocation { outcome, outputs })
    }

    /// Prepare if needed, then invoke.
    pub fn call(&self, args: &[KernelArg]) -> Result<Invocation> {
        self.prepare()?;
        self.invoke(args)
    }

    /// Launch-grid form of [`JitKernel::call`]; the grid is not used by host-driven backends.
    pub fn grid(&self, dims: &[usize]) -> Launch<'_> {
        Launch { kernel: self, grid: SmallVec::from_slice(dims) }
    }

    pub fn profiler(&self, supply: TensorSupplyKind) -> Profiler<'_> {
        Profiler::new(self, supply)
    }

    fn select_outputs(&self, args: &[KernelArg]) -> Result<Vec<HostTensor>> {
        self.result_indices
            .iter()
            .map(|&index| args.get(index).and_then(KernelArg::as_tensor).cloned().context(OutputNotTensorSnafu { index }))
            .collect()
    }
}

impl fmt::Debug for JitKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitKernel")
            .field("entry", &self.entry)
            .field("symbol", &self.symbol)
            .field("backend", &self.adapter.kind())
            .field("state", &self.state())
            .finish()
    }
}

/// A kernel bound to a launch grid.
pub struct Launch<'a> {
    kernel: &'a JitKernel,
    grid: SmallVec<[usize; 3]>,
}

impl Launch<'_> {
    pub fn dims(&self) -> &[usize] {
        &self.grid
    }

    pub fn call(&self, args: &[KernelArg]) -> Result<Invocation> {
        tracing::trace!(kernel.name = %self.kernel.entry, grid = ?self.grid.as_slice(), "grid launch");
        self.kernel.call(args)
    }
}

/// Map negative result indices onto `[0, params)`.
pub fn normalize_result_indices(out_idx: &[i64], params: usize) -> Result<Vec<usize>> {
    out_idx
        .iter()
        .map(|&index| {
            let resolved = if index < 0 { index + params as i64 } else { index };
            ensure!((0..params as i64).contains(&resolved), ResultIndexOutOfRangeSnafu { index, params });
            Ok(resolved as usize)
        })
        .collect()
}
