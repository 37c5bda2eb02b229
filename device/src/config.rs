//! Immutable toolchain configuration.
//!
//! All environment lookups happen once, in [`ToolchainConfig::from_env`]. The
//! resulting snapshot is shared by the toolchain invoker and the backend
//! adapters and is never written back into the process environment.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use bon::bon;

use crate::error::{Result, SimulatorUnavailableSnafu, ToolchainNotFoundSnafu};

pub const DEFAULT_CHIP: &str = "bm1690";
pub const DEFAULT_RVV_ARCH: &str = "rv64gcv";

/// Directory searched for a bundled TPU SDK when `SOPHGO_TPU_ROOT` is unset.
pub const BUNDLED_SDK_DIR: &str = "3rdparty/sophgo_tpu";

/// Which compiler driver a toolchain step needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    /// Host C compiler.
    C,
    /// C compiler targeting RISC-V.
    RiscvC,
    /// C++ compiler targeting RISC-V.
    RiscvCxx,
}

impl Driver {
    /// Executable names tried in order when no override is configured.
    pub const fn candidates(self) -> &'static [&'static str] {
        match self {
            Driver::C => &["gcc", "clang"],
            Driver::RiscvC => &["riscv64-unknown-linux-gnu-gcc", "riscv64-linux-gnu-gcc", "gcc"],
            Driver::RiscvCxx => &["riscv64-unknown-linux-gnu-g++", "riscv64-linux-gnu-g++", "g++"],
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Driver::C => "C compiler",
            Driver::RiscvC => "RISC-V C compiler",
            Driver::RiscvCxx => "RISC-V C++ compiler",
        }
    }
}

/// Instruction-set simulator flavours with known command lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorKind {
    /// `spike --isa=<arch> <pk> <elf>`
    Spike,
    /// `qemu-riscv64 -cpu rv64,v=true <elf>`
    QemuUser,
}

impl SimulatorKind {
    pub const CANDIDATES: &'static [&'static str] = &["spike", "qemu-riscv64"];

    /// Infer the flavour from the executable's file name.
    pub fn detect(path: &Path) -> Self {
        let name = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase()).unwrap_or_default();
        if name.contains("qemu") { SimulatorKind::QemuUser } else { SimulatorKind::Spike }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulator {
    pub kind: SimulatorKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// TPU SDK root (`SOPHGO_TPU_ROOT`).
    pub sdk_root: Option<PathBuf>,
    /// Fallback SDK locations probed when `sdk_root` is unset.
    pub sdk_search: Vec<PathBuf>,
    /// TPU chip selector (`CHIP_ARCH`, then `CHIP`).
    pub chip: String,
    /// `-march` value for the RVV backend.
    pub rvv_arch: String,
    /// `CC` override.
    pub cc: Option<PathBuf>,
    /// `CXX` override.
    pub cxx: Option<PathBuf>,
    /// Simulator override (`TILEJIT_RVV_SIM`).
    pub simulator: Option<PathBuf>,
    /// Proxy kernel passed to spike.
    pub proxy_kernel: PathBuf,
    /// `PATH` snapshot used for executable lookup.
    pub search_path: Option<OsString>,
    /// Directory relative lookups resolve against.
    pub working_dir: PathBuf,
}

#[bon]
impl ToolchainConfig {
    #[builder]
    pub fn new(
        #[builder(into)] sdk_root: Option<PathBuf>,
        #[builder(default)] sdk_search: Vec<PathBuf>,
        #[builder(into, default = DEFAULT_CHIP.to_string())] chip: String,
        #[builder(into, default = DEFAULT_RVV_ARCH.to_string())] rvv_arch: String,
        #[builder(into)] cc: Option<PathBuf>,
        #[builder(into)] cxx: Option<PathBuf>,
        #[builder(into)] simulator: Option<PathBuf>,
        #[builder(into, default = PathBuf::from("pk"))] proxy_kernel: PathBuf,
        #[builder(into)] search_path: Option<OsString>,
        #[builder(into, default = PathBuf::from("."))] working_dir: PathBuf,
    ) -> Self {
        Self { sdk_root, sdk_search, chip, rvv_arch, cc, cxx, simulator, proxy_kernel, search_path, working_dir }
    }

    /// Snapshot the toolchain-related environment.
    ///
    /// # Environment Variables
    ///
    /// * `SOPHGO_TPU_ROOT` - TPU SDK root (fallback: `3rdparty/sophgo_tpu` in the working directory or any ancestor)
    /// * `CHIP_ARCH` / `CHIP` - TPU chip (default: bm1690)
    /// * `TILEJIT_RVV_ARCH` - RISC-V `-march` (default: rv64gcv)
    /// * `CC` / `CXX` - compiler overrides
    /// * `TILEJIT_RVV_SIM` - simulator executable
    /// * `TILEJIT_RISCV_PK` - proxy kernel for spike (default: pk)
    pub fn from_env() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let sdk_search = working_dir.ancestors().map(|dir| dir.join(BUNDLED_SDK_DIR)).collect();
        let chip = env_value("CHIP_ARCH").or_else(|| env_value("CHIP")).unwrap_or_else(|| DEFAULT_CHIP.to_string());

        Self {
            sdk_root: env_value("SOPHGO_TPU_ROOT").map(PathBuf::from),
            sdk_search,
            chip,
            rvv_arch: env_value("TILEJIT_RVV_ARCH").unwrap_or_else(|| DEFAULT_RVV_ARCH.to_string()),
            cc: env_value("CC").map(PathBuf::from),
            cxx: env_value("CXX").map(PathBuf::from),
            simulator: env_value("TILEJIT_RVV_SIM").map(PathBuf::from),
            proxy_kernel: env_value("TILEJIT_RISCV_PK").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("pk")),
            search_path: std::env::var_os("PATH"),
            working_dir,
        }
    }

    /// Resolve the compiler executable for `driver`.
    ///
    /// An override (`CC`/`CXX`) wins over the search list; an override that
    /// cannot be resolved is an error rather than a silent fallback.
    pub fn locate_compiler(&self, driver: Driver) -> Result<PathBuf> {
        let override_path = match driver {
            Driver::C | Driver::RiscvC => self.cc.as_deref(),
            Driver::RiscvCxx => self.cxx.as_deref(),
        };
        self.locate(driver.label(), override_path, driver.candidates())
    }

    pub fn locate_simulator(&self) -> Result<Simulator> {
        let path = self.locate("simulator", self.simulator.as_deref(), SimulatorKind::CANDIDATES).map_err(|_| {
            let mut searched: Vec<String> = self.simulator.iter().map(|p| p.display().to_string()).collect();
            searched.extend(SimulatorKind::CANDIDATES.iter().map(|c| c.to_string()));
            SimulatorUnavailableSnafu { searched }.build()
        })?;
        Ok(Simulator { kind: SimulatorKind::detect(&path), path })
    }

    /// The TPU SDK root: the configured root if it exists, else the first bundled copy found.
    pub fn resolve_sdk_root(&self) -> Result<PathBuf> {
        let candidates = self.sdk_root.iter().chain(self.sdk_search.iter());
        if let Some(found) = candidates.clone().find(|dir| dir.is_dir()) {
            return Ok(found.clone());
        }
        ToolchainNotFoundSnafu {
            tool: "TPU SDK (set SOPHGO_TPU_ROOT)".to_string(),
            searched: candidates.map(|dir| dir.display().to_string()).collect::<Vec<_>>(),
        }
        .fail()
    }

    fn locate(&self, tool: &str, override_path: Option<&Path>, candidates: &[&str]) -> Result<PathBuf> {
        if let Some(path) = override_path {
            return self.resolve_executable(path.as_os_str()).ok_or_else(|| {
                ToolchainNotFoundSnafu { tool: tool.to_string(), searched: vec![path.display().to_string()] }.build()
            });
        }

        for candidate in candidates {
            if let Some(found) = self.resolve_executable(candidate.as_ref()) {
                tracing::trace!(tool, path = %found.display(), "located executable");
                return Ok(found);
            }
        }
        ToolchainNotFoundSnafu {
            tool: tool.to_string(),
            searched: candidates.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        }
        .fail()
    }

    fn resolve_executable(&self, name: &std::ffi::OsStr) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.components().count() > 1 {
            let path = if path.is_relative() { self.working_dir.join(path) } else { path.to_path_buf() };
            return path.is_file().then_some(path);
        }
        which::which_in(name, self.search_path.as_ref(), &self.working_dir).ok()
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
