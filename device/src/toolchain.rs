//! External compiler and simulator invocation.
//!
//! Every step shells out through [`std::process::Command`] and never inherits
//! configuration from the process environment beyond what
//! [`ToolchainConfig`] captured. Failures carry the rendered command line and
//! the tool's stderr.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use snafu::{ResultExt, ensure};

use crate::config::{Driver, SimulatorKind, ToolchainConfig};
use crate::error::{CompileFailedSnafu, HeaderExtractionSnafu, IoSnafu, Result, SpawnSnafu};

/// Extra compiler flags and search paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOptions {
    pub flags: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
    pub libraries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub driver: Driver,
    pub source: &'a Path,
    pub output: &'a Path,
    /// Emitted as `-march=<arch>` when set.
    pub target_arch: Option<&'a str>,
    pub options: ToolOptions,
}

#[derive(Debug, Clone)]
pub struct HeaderRequest<'a> {
    pub driver: Driver,
    pub source: &'a Path,
    pub header: &'a Path,
    pub target_arch: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct SimulationRequest<'a> {
    pub executable: &'a Path,
    pub args: Vec<String>,
}

/// Captured outcome of a simulator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorRun {
    pub command: String,
    pub status: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Boundary between the adapters and the external build tools.
pub trait Toolchain: Send + Sync {
    /// Compile `request.source` into `request.output`.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<()>;

    /// Write a C header declaring the functions defined in `request.source`.
    ///
    /// Returns the number of declarations emitted.
    fn extract_header(&self, request: &HeaderRequest<'_>) -> Result<usize>;

    /// Run an executable under the configured instruction-set simulator.
    fn simulate(&self, request: &SimulationRequest<'_>) -> Result<SimulatorRun>;
}

/// [`Toolchain`] that spawns real processes.
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    config: Arc<ToolchainConfig>,
}

impl ProcessToolchain {
    pub fn new(config: Arc<ToolchainConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Build the compile command without running it.
    pub fn compile_command(&self, request: &CompileRequest<'_>) -> Result<Command> {
        let compiler = self.config.locate_compiler(request.driver)?;
        let source = absolute(request.source)?;

        let mut cmd = Command::new(compiler);
        cmd.current_dir(&self.config.working_dir);
        if let Some(arch) = request.target_arch {
            cmd.arg(format!("-march={arch}"));
        }
        cmd.args(&request.options.flags).arg(&source).arg("-o").arg(request.output);
        for dir in &request.options.include_dirs {
            cmd.arg(format!("-I{}", dir.display()));
        }
        for dir in &request.options.library_dirs {
            cmd.arg(format!("-L{}", dir.display()));
        }
        for lib in &request.options.libraries {
            cmd.arg(format!("-l{lib}"));
        }
        Ok(cmd)
    }
}

impl Toolchain for ProcessToolchain {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<()> {
        let mut cmd = self.compile_command(request)?;
        let command = render_command(&cmd);
        tracing::debug!(toolchain.command = %command, "compiling");

        let output = cmd.output().context(SpawnSnafu { command: command.clone() })?;
        ensure!(
            output.status.success(),
            CompileFailedSnafu {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
        );
        tracing::debug!(toolchain.output = %request.output.display(), "compiled");
        Ok(())
    }

    fn extract_header(&self, request: &HeaderRequest<'_>) -> Result<usize> {
        let compiler = self.config.locate_compiler(request.driver)?;
        let source = absolute(request.source)?;
        let header_dir = request.header.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let aux = tempfile::Builder::new()
            .prefix(".aux-")
            .suffix(".info")
            .tempfile_in(header_dir)
            .context(IoSnafu { path: header_dir.to_path_buf() })?
            .into_temp_path();

        let mut cmd = Command::new(compiler);
        cmd.current_dir(&self.config.working_dir);
        if let Some(arch) = request.target_arch {
            cmd.arg(format!("-march={arch}"));
        }
        cmd.arg("-fsyntax-only").arg("-aux-info").arg(&*aux).arg(&source);
        let command = render_command(&cmd);
        tracing::debug!(toolchain.command = %command, "extracting declarations");

        let output = cmd.output().context(SpawnSnafu { command: command.clone() })?;
        let info = match fs::read_to_string(&aux) {
            Ok(info) => info,
            Err(error) => {
                let reason = format!("cannot read declaration listing {}: {error}", aux.display());
                return HeaderExtractionSnafu { command, reason }.fail();
            }
        };
        if info.is_empty() {
            // The aux file is usable even when the compiler complains, so only an empty file is fatal.
            let reason = if output.status.success() {
                "compiler produced no declaration listing".to_string()
            } else {
                format!("{}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim())
            };
            return HeaderExtractionSnafu { command, reason }.fail();
        }

        let needle = source.to_string_lossy();
        let decls: Vec<&str> = info.lines().filter(|line| line.contains(needle.as_ref())).collect();
        if decls.is_empty() {
            tracing::warn!(source = %source.display(), "no declarations found for source file");
        }

        let file_name = request.header.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let text = render_header(&header_guard(&file_name), &decls);
        fs::write(request.header, text).context(IoSnafu { path: request.header.to_path_buf() })?;
        Ok(decls.len())
    }

    fn simulate(&self, request: &SimulationRequest<'_>) -> Result<SimulatorRun> {
        let simulator = self.config.locate_simulator()?;
        let executable = absolute(request.executable)?;

        let mut cmd = Command::new(&simulator.path);
        cmd.current_dir(&self.config.working_dir);
        match simulator.kind {
            SimulatorKind::Spike => {
                cmd.arg(format!("--isa={}", self.config.rvv_arch)).arg(&self.config.proxy_kernel);
            }
            SimulatorKind::QemuUser => {
                cmd.args(["-cpu", "rv64,v=true"]);
            }
        }
        cmd.arg(&executable).args(&request.args);
        let command = render_command(&cmd);
        tracing::debug!(toolchain.command = %command, "simulating");

        let output = cmd.output().context(SpawnSnafu { command: command.clone() })?;
        Ok(simulator_run(command, output))
    }
}

fn simulator_run(command: String, output: Output) -> SimulatorRun {
    SimulatorRun {
        command,
        status: output.status.to_string(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).context(IoSnafu { path: path.to_path_buf() })
}

/// Space-joined program and arguments, for logs and error messages.
pub fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Include guard derived from the header file name.
pub fn header_guard(file_name: &str) -> String {
    let digest = Sha256::digest(file_name.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02X}")).collect();
    format!("TILEJIT_{hex}_H")
}

/// C/C++ compatible header wrapping `decls`.
pub fn render_header(guard: &str, decls: &[&str]) -> String {
    let mut body = String::new();
    for decl in decls {
        body.push_str(decl.trim_end());
        body.push('\n');
    }
    format!(
        "#ifndef {guard}\n#define {guard}\n\n#include <riscv_vector.h>\n#include <stddef.h>\n\n\
         #ifdef __cplusplus\nextern \"C\" {{\n#endif\n\n{body}\n#ifdef __cplusplus\n}}\n#endif\n\n#endif // {guard}\n"
    )
}
