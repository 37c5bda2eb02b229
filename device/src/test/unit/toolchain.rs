use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use crate::config::{Driver, ToolchainConfig};
use crate::error::Error;
use crate::toolchain::{
    CompileRequest, HeaderRequest, ProcessToolchain, SimulationRequest, ToolOptions, Toolchain, header_guard,
    render_command, render_header,
};

/// Fake compiler: logs its arguments next to itself and writes `built` to the `-o` target.
#[cfg(unix)]
const FAKE_CC: &str = r#"echo "$@" > "$(dirname "$0")/args.log"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
printf built > "$out""#;

/// Fake compiler that only answers `-aux-info`, listing one local and one system declaration.
#[cfg(unix)]
const FAKE_AUX_CC: &str = r#"aux=""
src=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-aux-info" ]; then aux="$2"; shift; else src="$1"; fi
  shift
done
echo "/* $src:3:NC */ extern void add_kernel (float *, float *, int);" > "$aux"
echo "/* /usr/include/stdio.h:356:NC */ extern int printf (const char *, ...);" >> "$aux""#;

fn toolchain(dir: &Path, cc: Option<std::path::PathBuf>) -> ProcessToolchain {
    let config = ToolchainConfig::builder()
        .search_path(dir.as_os_str().to_os_string())
        .working_dir(dir)
        .maybe_cc(cc.clone())
        .maybe_cxx(cc)
        .build();
    ProcessToolchain::new(Arc::new(config))
}

#[test]
fn test_render_command() {
    let mut cmd = Command::new("gcc");
    cmd.args(["-O2", "a.c", "-o", "a.so"]);
    assert_eq!(render_command(&cmd), "gcc -O2 a.c -o a.so");
}

#[test]
fn test_header_guard_is_stable() {
    let guard = header_guard("add_kernel_abc.h");
    assert_eq!(guard, header_guard("add_kernel_abc.h"));
    assert_ne!(guard, header_guard("other.h"));
    assert!(guard.starts_with("TILEJIT_") && guard.ends_with("_H"));
    assert!(guard.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
}

#[test]
fn test_render_header_layout() {
    let text = render_header("G_H", &["extern void f (int);"]);
    assert!(text.starts_with("#ifndef G_H\n#define G_H\n"));
    assert!(text.contains("extern \"C\" {"));
    assert!(text.contains("extern void f (int);\n"));
    assert!(text.trim_end().ends_with("#endif // G_H"));
}

#[test]
fn test_compile_without_compiler() {
    let dir = tempfile::tempdir().unwrap();
    let tc = toolchain(dir.path(), None);
    let src = dir.path().join("k.c");
    let request = CompileRequest {
        driver: Driver::C,
        source: &src,
        output: &dir.path().join("k.so"),
        target_arch: None,
        options: ToolOptions::default(),
    };
    assert!(matches!(tc.compile(&request), Err(Error::ToolchainNotFound { .. })));
}

#[cfg(unix)]
#[test]
fn test_compile_argument_order() {
    let dir = tempfile::tempdir().unwrap();
    let cc = super::script(dir.path(), "fake-cc", FAKE_CC);
    let tc = toolchain(dir.path(), Some(cc));
    let src = dir.path().join("k.c");
    std::fs::write(&src, "void k(void) {}").unwrap();
    let out = dir.path().join("k.so");

    let options = ToolOptions {
        flags: vec!["-O2".into(), "-shared".into()],
        include_dirs: vec!["/inc".into()],
        library_dirs: vec!["/lib".into()],
        libraries: vec!["m".into()],
    };
    let request = CompileRequest { driver: Driver::C, source: &src, output: &out, target_arch: Some("rv64gcv"), options };
    tc.compile(&request).unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "built");
    let args = std::fs::read_to_string(dir.path().join("args.log")).unwrap();
    let expected = format!("-march=rv64gcv -O2 -shared {} -o {} -I/inc -L/lib -lm", src.display(), out.display());
    assert_eq!(args.trim(), expected);
}

#[cfg(unix)]
#[test]
fn test_compile_failure_carries_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let cc = super::script(dir.path(), "bad-cc", "echo 'k.c:1: error: boom' >&2\nexit 1");
    let tc = toolchain(dir.path(), Some(cc));
    let src = dir.path().join("k.c");
    std::fs::write(&src, "oops").unwrap();
    let request = CompileRequest {
        driver: Driver::C,
        source: &src,
        output: &dir.path().join("k.so"),
        target_arch: None,
        options: ToolOptions::default(),
    };
    match tc.compile(&request).unwrap_err() {
        Error::CompileFailed { command, stderr, .. } => {
            assert!(command.contains("bad-cc"));
            assert!(stderr.contains("error: boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(unix)]
#[test]
fn test_extract_header_filters_foreign_declarations() {
    let dir = tempfile::tempdir().unwrap();
    let cc = super::script(dir.path(), "aux-cc", FAKE_AUX_CC);
    let tc = toolchain(dir.path(), Some(cc));
    let src = dir.path().join("add_kernel.c");
    std::fs::write(&src, "void add_kernel(float *a, float *b, int n) {}").unwrap();
    let header = dir.path().join("add_kernel.h");

    let request = HeaderRequest { driver: Driver::RiscvC, source: &src, header: &header, target_arch: Some("rv64gcv") };
    assert_eq!(tc.extract_header(&request).unwrap(), 1);

    let text = std::fs::read_to_string(&header).unwrap();
    assert!(text.contains("extern void add_kernel (float *, float *, int);"));
    assert!(!text.contains("printf"));
    assert!(text.contains(&header_guard("add_kernel.h")));
}

#[cfg(unix)]
#[test]
fn test_extract_header_without_listing() {
    let dir = tempfile::tempdir().unwrap();
    let cc = super::script(dir.path(), "silent-cc", "echo nope >&2\nexit 1");
    let tc = toolchain(dir.path(), Some(cc));
    let src = dir.path().join("k.c");
    std::fs::write(&src, "").unwrap();
    let request =
        HeaderRequest { driver: Driver::RiscvC, source: &src, header: &dir.path().join("k.h"), target_arch: None };
    assert!(matches!(tc.extract_header(&request), Err(Error::HeaderExtraction { .. })));
    assert!(!dir.path().join("k.h").exists());
}

#[cfg(unix)]
#[test]
fn test_extract_header_unreadable_listing() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"aux=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-aux-info" ]; then aux="$2"; shift; fi
  shift
done
printf '\377\376 not utf-8\n' > "$aux""#;
    let cc = super::script(dir.path(), "latin1-cc", body);
    let tc = toolchain(dir.path(), Some(cc));
    let src = dir.path().join("k.c");
    std::fs::write(&src, "").unwrap();
    let request =
        HeaderRequest { driver: Driver::RiscvC, source: &src, header: &dir.path().join("k.h"), target_arch: None };
    match tc.extract_header(&request) {
        Err(Error::HeaderExtraction { reason, .. }) => {
            assert!(reason.contains("cannot read declaration listing"), "{reason}");
            assert!(!reason.contains("no declaration listing"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn test_simulate_with_qemu_flavour() {
    let dir = tempfile::tempdir().unwrap();
    super::script(dir.path(), "qemu-riscv64", "echo \"$@\"\nexit 3");
    let tc = toolchain(dir.path(), None);
    let elf = dir.path().join("kernel");
    let run = tc.simulate(&SimulationRequest { executable: &elf, args: vec!["x".into()] }).unwrap();
    assert!(!run.success);
    assert_eq!(run.stdout.trim(), format!("-cpu rv64,v=true {} x", elf.display()));
}

#[test]
fn test_simulate_without_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let tc = toolchain(dir.path(), None);
    let elf = dir.path().join("kernel");
    let err = tc.simulate(&SimulationRequest { executable: &elf, args: vec![] }).unwrap_err();
    assert!(matches!(err, Error::SimulatorUnavailable { .. }));
}
