//! Host-side device plumbing for JIT kernels.
//!
//! * [`config`] snapshots the toolchain environment once.
//! * [`toolchain`] drives the external compilers and simulators.
//! * [`native`] owns the C boundary used to execute compiled kernels.
//! * [`tensor`] provides the host tensors kernels read and write.

pub mod config;
pub mod error;
pub mod native;
pub mod tensor;
pub mod toolchain;


pub use config::{DEFAULT_CHIP, DEFAULT_RVV_ARCH, Driver, Simulator, SimulatorKind, ToolchainConfig};
pub use error::{Error, Result};
pub use native::{ArgSlot, DYNLIB_EXECUTE, DynlibEntry, KernelEntryFn, NATIVE_ENTRIES, NativeCall, NativeEntry, NativeRegistry};
pub use tensor::{HostTensor, TensorWriteGuard};
pub use toolchain::{
    CompileRequest, HeaderRequest, ProcessToolchain, SimulationRequest, SimulatorRun, ToolOptions, Toolchain,
};
