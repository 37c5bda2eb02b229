//! JIT kernel adapters and the compilation cache.
//!
//! Turns device source from an upstream compiler into a cached, callable
//! artifact behind a backend-independent handle.
//!
//! # Backends
//!
//! * TPU: shared library called through a registered native entry.
//! * RVV: standalone ELF run under an instruction-set simulator.
//!
//! # Benchmarking
//!
//! The `profiler` module times repeated invocations with synthetic inputs.

pub mod artifact;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod jit;
pub mod kernel;
pub mod marshal;
pub mod profiler;


pub use artifact::{CompiledArtifact, KernelParam};
pub use backend::{BackendAdapter, BackendKind, ExecutionOutcome, RvvAdapter, TpuAdapter};
pub use cache::{ArtifactKind, ArtifactPaths, ArtifactRecord, ArtifactStore, CacheKey, Resolution};
pub use config::{CacheConfig, JitOptions};
pub use error::*;
pub use jit::jit;
pub use kernel::{AdapterState, ArtifactOrigin, Invocation, JitKernel, Launch, PreparedArtifact};
pub use marshal::{FixedScalar, KernelArg, MarshaledCallArgs, marshal};
pub use profiler::{BenchmarkConfig, BenchmarkResult, Profiler, TensorSupplyKind};
