//! Argument marshaling.
//!
//! The native entry point accepts exactly three argument categories. Every
//! call argument is classified, in call order, into one of them and keeps its
//! original position so the native side can rebuild the signature.

use tilejit_device::HostTensor;

use crate::error::{Result, UnsupportedArgumentTypeSnafu};

/// A positional kernel call argument.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Tensor(HostTensor),
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Accepted by the type but rejected by [`marshal`].
    Str(String),
    /// Accepted by the type but rejected by [`marshal`].
    None,
}

impl KernelArg {
    pub fn kind(&self) -> &'static str {
        match self {
            KernelArg::Tensor(_) => "tensor",
            KernelArg::Bool(_) => "bool",
            KernelArg::Int(_) => "int",
            KernelArg::Float(_) => "float",
            KernelArg::Str(_) => "str",
            KernelArg::None => "none",
        }
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            KernelArg::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl From<HostTensor> for KernelArg {
    fn from(t: HostTensor) -> Self {
        KernelArg::Tensor(t)
    }
}

impl From<&HostTensor> for KernelArg {
    fn from(t: &HostTensor) -> Self {
        KernelArg::Tensor(t.clone())
    }
}

impl From<bool> for KernelArg {
    fn from(v: bool) -> Self {
        KernelArg::Bool(v)
    }
}

impl From<i32> for KernelArg {
    fn from(v: i32) -> Self {
        KernelArg::Int(v.into())
    }
}

impl From<i64> for KernelArg {
    fn from(v: i64) -> Self {
        KernelArg::Int(v)
    }
}

impl From<f32> for KernelArg {
    fn from(v: f32) -> Self {
        KernelArg::Float(v.into())
    }
}

impl From<f64> for KernelArg {
    fn from(v: f64) -> Self {
        KernelArg::Float(v)
    }
}

impl From<&str> for KernelArg {
    fn from(v: &str) -> Self {
        KernelArg::Str(v.to_string())
    }
}

/// A fixed-point scalar. Booleans stay distinguishable here and become `0`/`1` at the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedScalar {
    Bool(bool),
    Int(i64),
}

impl FixedScalar {
    pub fn as_i64(self) -> i64 {
        match self {
            FixedScalar::Bool(b) => i64::from(b),
            FixedScalar::Int(v) => v,
        }
    }
}

/// Classified call arguments. Rebuilt on every call.
#[derive(Debug, Clone, Default)]
pub struct MarshaledCallArgs {
    pub tensors: Vec<HostTensor>,
    pub tensor_positions: Vec<i64>,
    pub float_scalars: Vec<f64>,
    pub float_positions: Vec<i64>,
    pub fixed_scalars: Vec<FixedScalar>,
    pub fixed_positions: Vec<i64>,
}

impl MarshaledCallArgs {
    /// Number of classified arguments.
    pub fn len(&self) -> usize {
        self.tensors.len() + self.float_scalars.len() + self.fixed_scalars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed scalars as passed across the C boundary.
    pub fn fixed_abi(&self) -> Vec<i64> {
        self.fixed_scalars.iter().map(|s| s.as_i64()).collect()
    }

    /// Rebuild the original argument list from the three groups.
    pub fn reassemble(&self) -> Vec<KernelArg> {
        let tensors = self.tensor_positions.iter().zip(&self.tensors).map(|(&p, t)| (p, KernelArg::Tensor(t.clone())));
        let floats = self.float_positions.iter().zip(&self.float_scalars).map(|(&p, &v)| (p, KernelArg::Float(v)));
        let fixed = self.fixed_positions.iter().zip(&self.fixed_scalars).map(|(&p, &s)| {
            let arg = match s {
                FixedScalar::Bool(b) => KernelArg::Bool(b),
                FixedScalar::Int(v) => KernelArg::Int(v),
            };
            (p, arg)
        });

        let mut all: Vec<(i64, KernelArg)> = tensors.chain(floats).chain(fixed).collect();
        all.sort_by_key(|(p, _)| *p);
        all.into_iter().map(|(_, arg)| arg).collect()
    }
}

/// Classify `args` into tensor, float and fixed-point groups.
///
/// Strings and `None` are rejected; no partial result is returned.
pub fn marshal(args: &[KernelArg]) -> Result<MarshaledCallArgs> {
    let mut out = MarshaledCallArgs::default();
    for (position, arg) in args.iter().enumerate() {
        let index = position as i64;
        match arg {
            KernelArg::Tensor(t) => {
                out.tensors.push(t.clone());
                out.tensor_positions.push(index);
            }
            KernelArg::Bool(b) => {
                out.fixed_scalars.push(FixedScalar::Bool(*b));
                out.fixed_positions.push(index);
            }
            KernelArg::Int(v) => {
                out.fixed_scalars.push(FixedScalar::Int(*v));
                out.fixed_positions.push(index);
            }
            KernelArg::Float(v) => {
                out.float_scalars.push(*v);
                out.float_positions.push(index);
            }
            KernelArg::Str(_) | KernelArg::None => {
                return UnsupportedArgumentTypeSnafu { position, kind: arg.kind() }.fail();
            }
        }
    }
    Ok(out)
}
