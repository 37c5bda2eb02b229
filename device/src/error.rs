use std::path::PathBuf;

use snafu::Snafu;
use tilejit_dtype::ScalarDType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No executable (or SDK directory) matched the override or the search list.
    #[snafu(display("{tool} not found (searched: {})", searched.join(", ")))]
    ToolchainNotFound { tool: String, searched: Vec<String> },

    /// The child process could not be started at all.
    #[snafu(display("failed to run `{command}`: {source}"))]
    Spawn { command: String, source: std::io::Error },

    /// Compiler exited unsuccessfully.
    #[snafu(display("compilation failed ({status}): `{command}`\n{stderr}"))]
    CompileFailed { command: String, status: String, stderr: String },

    /// Declaration-only pass produced no usable output.
    #[snafu(display("header extraction failed: `{command}`: {reason}"))]
    HeaderExtraction { command: String, reason: String },

    /// No instruction-set simulator could be located.
    #[snafu(display("no instruction-set simulator found (searched: {})", searched.join(", ")))]
    SimulatorUnavailable { searched: Vec<String> },

    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to load {}: {source}", path.display()))]
    LibraryLoad { path: PathBuf, source: libloading::Error },

    #[snafu(display("symbol '{symbol}' not found in {}: {source}", path.display()))]
    SymbolNotFound { symbol: String, path: PathBuf, source: libloading::Error },

    /// Argument positions do not tile the kernel's positional argument block.
    #[snafu(display("argument position {position} does not fit a {slots}-slot argument block"))]
    ArgumentLayout { position: i64, slots: usize },

    #[snafu(display("no native execution entry registered under '{name}'"))]
    NativeEntryNotRegistered { name: String },

    #[snafu(display("tensor of shape {shape:?} and dtype {dtype} overflows addressable memory"))]
    TensorSize { shape: Vec<usize>, dtype: ScalarDType },

    #[snafu(display("{operation} does not support dtype {dtype}"))]
    UnsupportedDType { dtype: ScalarDType, operation: &'static str },

    #[snafu(display("dtype mismatch: expected {expected}, got {actual}"))]
    DTypeMismatch { expected: ScalarDType, actual: ScalarDType },

    #[snafu(display("element count mismatch: shape holds {expected} elements, got {actual}"))]
    ElementCount { expected: usize, actual: usize },
}
