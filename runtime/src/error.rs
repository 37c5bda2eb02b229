//! Error types for kernel preparation and invocation.

use std::path::PathBuf;

use snafu::Snafu;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Toolchain, native call or host tensor failure.
    #[snafu(display("{source}"))]
    Device { source: tilejit_device::Error },

    /// Cache directory could not be created or written.
    #[snafu(display("cannot write kernel cache at {}: {source}", path.display()))]
    CacheWrite { path: PathBuf, source: std::io::Error },

    /// Argument outside the tensor / float / fixed-point calling convention.
    #[snafu(display("unsupported argument type at position {position}: {kind}"))]
    UnsupportedArgumentType { position: usize, kind: &'static str },

    /// Result index outside `[-params, params)`.
    #[snafu(display("result index {index} out of range for {params} parameters"))]
    ResultIndexOutOfRange { index: i64, params: usize },

    /// Result index names an argument that is not a tensor.
    #[snafu(display("result index {index} does not refer to a tensor argument"))]
    OutputNotTensor { index: usize },

    /// Target name that maps to no backend adapter.
    #[snafu(display("unknown target '{name}'"))]
    UnknownTarget { name: String },

    /// `invoke` was called before a successful `prepare`.
    #[snafu(display("kernel '{entry}' has not been prepared"))]
    NotPrepared { entry: String },

    /// An earlier preparation attempt failed; the handle does not retry.
    #[snafu(display("preparation of kernel '{entry}' failed earlier: {reason}"))]
    PreparationFailed { entry: String, reason: String },

    /// Benchmark configured with zero timed runs.
    #[snafu(display("benchmark requires at least one timed run"))]
    EmptyBenchmark,
}

impl From<tilejit_device::Error> for Error {
    fn from(source: tilejit_device::Error) -> Self {
        Error::Device { source }
    }
}
