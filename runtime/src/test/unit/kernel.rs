use std::sync::Arc;
use std::sync::atomic::Ordering;

use test_case::test_case;
use tilejit_device::{
    CompileRequest, HeaderRequest, HostTensor, SimulationRequest, SimulatorRun, Toolchain, ToolchainConfig,
};
use tilejit_dtype::ScalarDType;

use super::{ADD_SOURCE, MockNative, MockToolchain, add_artifact, kernel};
use crate::artifact::{CompiledArtifact, KernelParam};
use crate::backend::BackendKind;
use crate::backend::tpu::inject_tensor_info;
use crate::cache::CacheKey;
use crate::config::{CacheConfig, JitOptions};
use crate::error::Error;
use crate::kernel::{AdapterState, ArtifactOrigin, normalize_result_indices};
use crate::marshal::KernelArg;

fn f32_tensor(values: &[f32]) -> HostTensor {
    HostTensor::from_slice(values, &[values.len()]).unwrap()
}

#[test]
fn test_add_compiles_once_then_hits_cache() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let native = Arc::new(MockNative::default());

    let first = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), native.clone(), add_artifact(), vec![-1]);
    assert_eq!(first.state(), AdapterState::Uninitialized);
    let prepared = first.prepare().unwrap();
    assert_eq!(prepared.origin, ArtifactOrigin::Compiled);
    assert_eq!(first.state(), AdapterState::Ready);
    assert_eq!(toolchain.compiles(), 1);

    let key = CacheKey::new("add_kernel", &inject_tensor_info(ADD_SOURCE));
    let expected = dir.path().join("cache").join(format!("add_kernel_{key}.so"));
    assert_eq!(prepared.record.path, expected);
    assert!(expected.is_file());
    assert_eq!(std::fs::read_to_string(&prepared.source_path).unwrap(), inject_tensor_info(ADD_SOURCE));

    let second = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), native, add_artifact(), vec![-1]);
    let again = second.prepare().unwrap();
    assert_eq!(again.origin, ArtifactOrigin::Cached);
    assert_eq!(again.record, prepared.record);
    assert_eq!(toolchain.compiles(), 1);
}

#[test]
fn test_changed_source_recompiles() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let native = Arc::new(MockNative::default());

    let a = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), native.clone(), add_artifact(), vec![]);
    let mut edited = add_artifact();
    edited.kernel_source.push(' ');
    let b = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), native, edited, vec![]);

    let (ra, rb) = (a.prepare().unwrap(), b.prepare().unwrap());
    assert_ne!(ra.record.key, rb.record.key);
    assert_eq!(rb.origin, ArtifactOrigin::Compiled);
    assert_eq!(toolchain.compiles(), 2);
}

#[test]
fn test_repeated_calls_prepare_once() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let native = Arc::new(MockNative::default());
    let k = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), native.clone(), add_artifact(), vec![2]);

    let (a, b, c) = (f32_tensor(&[1.0; 4]), f32_tensor(&[2.0; 4]), f32_tensor(&[0.0; 4]));
    let args = [KernelArg::from(&a), KernelArg::from(&b), KernelArg::from(&c)];
    k.call(&args).unwrap();
    let result = k.call(&args).unwrap();

    assert_eq!(toolchain.compiles(), 1);
    assert_eq!(native.calls.lock().len(), 2);
    assert!(result.outcome.is_completed());
    assert_eq!(result.outputs.len(), 1);
    assert!(result.outputs[0].shares_storage(&c));
    assert_eq!(c.to_vec::<f32>().unwrap(), vec![3.0; 4]);
}

#[test]
fn test_native_call_carries_positions() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let native = Arc::new(MockNative::default());
    let k = kernel(dir.path(), BackendKind::Tpu, toolchain, native.clone(), add_artifact(), vec![]);

    let (a, b) = (f32_tensor(&[1.0]), f32_tensor(&[2.0]));
    k.call(&[KernelArg::from(&a), 3i64.into(), 2.5f64.into(), KernelArg::from(&b), true.into()]).unwrap();

    let calls = native.calls.lock();
    let call = &calls[0];
    assert_eq!(call.symbol, "add_kernel");
    assert_eq!(Some(call.library.clone()), k.record().map(|r| r.path));
    assert_eq!(call.tensor_positions, vec![0, 3]);
    assert_eq!(call.fixed_scalars, vec![3, 1]);
    assert_eq!(call.fixed_positions, vec![1, 4]);
    assert_eq!(call.float_scalars, vec![2.5]);
    assert_eq!(call.float_positions, vec![2]);
}

#[test]
fn test_invoke_requires_prepare() {
    let dir = tempfile::tempdir().unwrap();
    let k = kernel(
        dir.path(),
        BackendKind::Tpu,
        Arc::new(MockToolchain::default()),
        Arc::new(MockNative::default()),
        add_artifact(),
        vec![],
    );
    assert!(matches!(k.invoke(&[]), Err(Error::NotPrepared { .. })));
    assert!(k.record().is_none());
    k.prepare().unwrap();
    assert!(k.invoke(&[]).is_ok());
}

#[test]
fn test_compile_failure_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain { fail_compile: true, ..Default::default() });
    let k = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), Arc::new(MockNative::default()), add_artifact(), vec![]);

    match k.prepare().unwrap_err() {
        Error::Device { source: tilejit_device::Error::CompileFailed { command, stderr, .. } } => {
            assert!(command.starts_with("mock-cc"));
            assert!(stderr.contains("mock failure"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(k.state(), AdapterState::Failed);
    assert!(matches!(k.call(&[]), Err(Error::PreparationFailed { .. })));
    assert_eq!(toolchain.compiles(), 1);

    // Only the debugging source is left behind.
    let entries: Vec<_> = std::fs::read_dir(dir.path().join("cache")).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].extension().unwrap(), "c");
}

#[test]
fn test_missing_sdk_fails_before_compiling() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let options = crate::JitOptions::builder()
        .cache(crate::CacheConfig::new(dir.path().join("cache")))
        .toolchain_config(Arc::new(tilejit_device::ToolchainConfig::builder().working_dir(dir.path()).build()))
        .toolchain(toolchain.clone())
        .native_entry(Arc::new(MockNative::default()))
        .build();
    let k = crate::jit(add_artifact(), options).unwrap();

    let err = k.prepare().unwrap_err();
    assert!(matches!(err, Error::Device { source: tilejit_device::Error::ToolchainNotFound { .. } }));
    assert_eq!(toolchain.compiles(), 0);
}

#[test]
fn test_cleared_cache_recompiles() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let k = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), Arc::new(MockNative::default()), add_artifact(), vec![]);

    k.prepare().unwrap();
    std::fs::remove_dir_all(dir.path().join("cache")).unwrap();
    let prepared = k.prepare().unwrap();
    assert_eq!(prepared.origin, ArtifactOrigin::Compiled);
    assert_eq!(toolchain.compiles(), 2);
}

#[test]
fn test_grid_call_matches_plain_call() {
    let dir = tempfile::tempdir().unwrap();
    let native = Arc::new(MockNative::default());
    let k = kernel(dir.path(), BackendKind::Tpu, Arc::new(MockToolchain::default()), native.clone(), add_artifact(), vec![]);

    let launch = k.grid(&[4, 1, 1]);
    assert_eq!(launch.dims(), &[4, 1, 1]);
    launch.call(&[1i64.into()]).unwrap();
    k.call(&[1i64.into()]).unwrap();

    let calls = native.calls.lock();
    assert_eq!(calls[0], calls[1]);
}

#[test]
fn test_source_is_available_before_compiling() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let k = kernel(dir.path(), BackendKind::Tpu, toolchain.clone(), Arc::new(MockNative::default()), add_artifact(), vec![]);
    assert_eq!(k.source(), ADD_SOURCE);
    assert_eq!(toolchain.compiles(), 0);
}

#[test]
fn test_output_must_be_tensor() {
    let dir = tempfile::tempdir().unwrap();
    let native = Arc::new(MockNative::default());
    let k = kernel(dir.path(), BackendKind::Tpu, Arc::new(MockToolchain::default()), native.clone(), add_artifact(), vec![1]);
    let err = k.call(&[f32_tensor(&[1.0]).into(), 2i64.into()]).unwrap_err();
    assert!(matches!(err, Error::OutputNotTensor { index: 1 }));
    assert!(native.calls.lock().is_empty());
}

#[test]
fn test_reduction_result_index() {
    let dir = tempfile::tempdir().unwrap();
    let params = vec![
        KernelParam::new("A", ScalarDType::Float32, &[128, 64]),
        KernelParam::new("Scale", ScalarDType::Float32, &[1]),
        KernelParam::new("Out", ScalarDType::Float32, &[128]),
    ];
    let artifact = CompiledArtifact::new("void reduce_sum() {}", params);
    let k = kernel(dir.path(), BackendKind::Tpu, Arc::new(MockToolchain::default()), Arc::new(MockNative::default()), artifact, vec![-1]);
    assert_eq!(k.result_indices(), &[2]);
}

#[test_case(&[-1], 3 => vec![2])]
#[test_case(&[0, -3], 3 => vec![0, 0])]
#[test_case(&[1, 2], 3 => vec![1, 2])]
#[test_case(&[], 0 => Vec::<usize>::new())]
fn test_normalize_result_indices(idx: &[i64], params: usize) -> Vec<usize> {
    normalize_result_indices(idx, params).unwrap()
}

#[test_case(&[3], 3)]
#[test_case(&[-4], 3)]
#[test_case(&[0], 0)]
fn test_result_index_out_of_range(idx: &[i64], params: usize) {
    assert!(matches!(normalize_result_indices(idx, params), Err(Error::ResultIndexOutOfRange { .. })));
}

#[test]
fn test_entry_name_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let make = |artifact: CompiledArtifact, name: Option<&str>| {
        let options = crate::JitOptions::builder()
            .target(BackendKind::Tpu)
            .maybe_entry_name(name)
            .cache(crate::CacheConfig::new(dir.path().join("cache")))
            .toolchain_config(super::toolchain_config(dir.path()))
            .toolchain(Arc::new(MockToolchain::default()))
            .native_entry(Arc::new(MockNative::default()))
            .build();
        crate::jit(artifact, options).unwrap()
    };

    assert_eq!(make(add_artifact(), None).symbol(), "add_kernel");
    assert_eq!(make(add_artifact(), Some("gemm")).symbol(), "gemm_kernel");
    let anonymous = CompiledArtifact::new("void f() {}", vec![]);
    let k = make(anonymous, None);
    assert_eq!(k.name(), "main");
    assert_eq!(k.symbol(), "main_kernel");
}

#[test]
fn test_rvv_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain::default());
    let artifact = CompiledArtifact::new("void vadd() {}", vec![]).with_global_symbol("vadd");
    let k = kernel(dir.path(), BackendKind::Rvv, toolchain.clone(), Arc::new(MockNative::default()), artifact, vec![]);

    let result = k.call(&[1i64.into()]).unwrap();
    assert!(!result.outcome.is_completed());
    let record = k.record().unwrap();
    assert_eq!(record.backend, BackendKind::Rvv);
    assert_eq!(record.symbol, "vadd");
    assert!(record.path.extension().is_none());
    assert!(record.path.with_extension("h").is_file());
    assert_eq!(toolchain.headers.load(Ordering::SeqCst), 1);
    assert_eq!(toolchain.simulations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_rvv_with_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(MockToolchain {
        simulation: Some(SimulatorRun {
            command: String::new(),
            status: "exit status: 0".into(),
            success: true,
            stdout: String::new(),
            stderr: String::new(),
        }),
        ..Default::default()
    });
    let artifact = CompiledArtifact::new("void vadd() {}", vec![]);
    let k = kernel(dir.path(), BackendKind::Rvv, toolchain, Arc::new(MockNative::default()), artifact, vec![]);
    assert!(k.call(&[]).unwrap().outcome.is_completed());
}

/// Holds every compile until `parties` of them are in flight.
struct RendezvousToolchain {
    barrier: std::sync::Barrier,
    inner: MockToolchain,
}

impl Toolchain for RendezvousToolchain {
    fn compile(&self, request: &CompileRequest<'_>) -> tilejit_device::Result<()> {
        self.barrier.wait();
        self.inner.compile(request)
    }

    fn extract_header(&self, request: &HeaderRequest<'_>) -> tilejit_device::Result<usize> {
        self.inner.extract_header(request)
    }

    fn simulate(&self, request: &SimulationRequest<'_>) -> tilejit_device::Result<SimulatorRun> {
        self.inner.simulate(request)
    }
}

#[test]
fn test_concurrent_first_use_publishes_one_complete_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let toolchain = Arc::new(RendezvousToolchain { barrier: std::sync::Barrier::new(2), inner: MockToolchain::default() });
    let config: Arc<ToolchainConfig> = super::toolchain_config(dir.path());
    let handle = || {
        let options = JitOptions::builder()
            .target(BackendKind::Tpu)
            .cache(CacheConfig::new(dir.path().join("cache")))
            .toolchain_config(config.clone())
            .toolchain(toolchain.clone())
            .native_entry(Arc::new(MockNative::default()))
            .build();
        crate::jit(add_artifact(), options).unwrap()
    };
    let (a, b) = (handle(), handle());

    // Neither compile can finish before both have missed the cache.
    let (ra, rb) = std::thread::scope(|scope| {
        let ta = scope.spawn(|| a.prepare());
        let tb = scope.spawn(|| b.prepare());
        (ta.join().unwrap().unwrap(), tb.join().unwrap().unwrap())
    });

    assert_eq!(toolchain.inner.compiles(), 2);
    assert_eq!(ra.record, rb.record);
    assert_eq!(std::fs::read(&ra.record.path).unwrap(), b"mock artifact");
    assert_eq!((a.state(), b.state()), (AdapterState::Ready, AdapterState::Ready));

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".build-") || name.starts_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
