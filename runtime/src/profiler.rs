//! Kernel benchmarking.
//!
//! The profiler supplies synthetic host tensors for every declared parameter
//! and times repeated invocations of a prepared kernel.

use std::time::{Duration, Instant};

use rand::Rng;
use snafu::{ResultExt, ensure};
use tilejit_device::HostTensor;

use crate::artifact::KernelParam;
use crate::error::{DeviceSnafu, EmptyBenchmarkSnafu, Result};
use crate::kernel::JitKernel;
use crate::marshal::KernelArg;

/// How synthetic input tensors are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum TensorSupplyKind {
    #[default]
    Auto,
    Random,
    /// Random whole numbers.
    Integer,
    Zero,
    One,
}

/// Configuration for kernel benchmarking.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Number of warmup runs (not timed).
    pub warmup_runs: usize,
    /// Number of timing runs.
    pub timing_runs: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self { warmup_runs: 1, timing_runs: 3 }
    }
}

/// Result of kernel benchmarking.
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
    /// All timing measurements.
    pub runs: Vec<Duration>,
}

impl BenchmarkResult {
    fn from_runs(runs: Vec<Duration>) -> Self {
        let min = runs.iter().copied().min().unwrap_or(Duration::ZERO);
        let max = runs.iter().copied().max().unwrap_or(Duration::ZERO);
        let total: Duration = runs.iter().sum();
        let mean = total / runs.len().max(1) as u32;
        Self { min, mean, max, runs }
    }
}

pub struct Profiler<'a> {
    kernel: &'a JitKernel,
    supply: TensorSupplyKind,
}

impl<'a> Profiler<'a> {
    pub fn new(kernel: &'a JitKernel, supply: TensorSupplyKind) -> Self {
        Self { kernel, supply }
    }

    pub fn supply_kind(&self) -> TensorSupplyKind {
        self.supply
    }

    /// A host tensor matching `param`, filled per the supply kind.
    pub fn supply(&self, param: &KernelParam) -> Result<HostTensor> {
        let (dtype, shape) = (param.dtype, param.shape.as_slice());
        let tensor = match self.supply {
            TensorSupplyKind::Zero => HostTensor::zeros(dtype, shape),
            TensorSupplyKind::One => HostTensor::full(dtype, shape, 1.0),
            TensorSupplyKind::Integer => {
                let mut rng = rand::thread_rng();
                let (lo, hi) = if dtype.is_unsigned() || dtype.is_bool() { (0, 2) } else { (-4, 5) };
                HostTensor::from_fn(dtype, shape, |_| f64::from(rng.gen_range(lo..hi)))
            }
            TensorSupplyKind::Auto | TensorSupplyKind::Random => {
                let mut rng = rand::thread_rng();
                if dtype.is_float() {
                    HostTensor::from_fn(dtype, shape, |_| rng.gen_range(-1.0..1.0))
                } else {
                    let hi = if dtype.is_bool() { 2 } else { 8 };
                    HostTensor::from_fn(dtype, shape, |_| f64::from(rng.gen_range(0..hi)))
                }
            }
        };
        tensor.context(DeviceSnafu)
    }

    /// One tensor per declared parameter; outputs are zeroed.
    pub fn supply_inputs(&self) -> Result<Vec<KernelArg>> {
        let outputs = self.kernel.result_indices();
        self.kernel
            .artifact()
            .params
            .iter()
            .enumerate()
            .map(|(idx, param)| {
                let tensor = if outputs.contains(&idx) {
                    HostTensor::zeros(param.dtype, &param.shape).context(DeviceSnafu)?
                } else {
                    self.supply(param)?
                };
                Ok(KernelArg::Tensor(tensor))
            })
            .collect()
    }

    /// Benchmark with freshly supplied inputs.
    pub fn benchmark(&self, config: &BenchmarkConfig) -> Result<BenchmarkResult> {
        let args = self.supply_inputs()?;
        self.benchmark_with(&args, config)
    }

    /// Warmup runs (discarded), then timed runs of the prepared kernel.
    pub fn benchmark_with(&self, args: &[KernelArg], config: &BenchmarkConfig) -> Result<BenchmarkResult> {
        ensure!(config.timing_runs > 0, EmptyBenchmarkSnafu);
        self.kernel.prepare()?;

        for _ in 0..config.warmup_runs {
            self.kernel.invoke(args)?;
        }

        let mut runs = Vec::with_capacity(config.timing_runs);
        for _ in 0..config.timing_runs {
            let start = Instant::now();
            self.kernel.invoke(args)?;
            runs.push(start.elapsed());
        }

        let result = BenchmarkResult::from_runs(runs);
        tracing::debug!(kernel.name = %self.kernel.name(), min = ?result.min, mean = ?result.mean, max = ?result.max, "benchmarked kernel");
        Ok(result)
    }
}
