//! Element types of kernel parameters and host tensors.
//!
//! Kernels produced upstream declare every formal parameter with a shape and a
//! [`ScalarDType`]. The JIT layer only needs a handful of facts about a type:
//! its byte width, how the backend toolchains spell it, and whether a value
//! of it is integral or floating.

pub mod error;
pub mod ext;


use std::fmt;
use std::str::FromStr;

pub use error::{Error, Result};

/// Scalar element types understood by the kernel backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ScalarDType {
    Bool = 0,

    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    FP8E4M3 = 9,
    FP8E5M2 = 10,
    Float16 = 11,
    BFloat16 = 12,
    Float32 = 13,
    Float64 = 14,
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
            Self::FP8E4M3 | Self::FP8E5M2 => 1,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Stable numeric tag passed across the native execution boundary.
    pub const fn tag(&self) -> u32 {
        *self as u32
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(
            self,
            Self::FP8E4M3 | Self::FP8E5M2 | Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64
        )
    }

    /// Canonical lowercase name, as accepted by [`FromStr`].
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::FP8E4M3 => "float8_e4m3",
            Self::FP8E5M2 => "float8_e5m2",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// `data_type_t` enumerator used by the TPU kernel runtime, if the chip supports the type.
    pub const fn ppl_data_type(&self) -> Option<&'static str> {
        match self {
            Self::Float32 => Some("DT_FP32"),
            Self::Float16 => Some("DT_FP16"),
            Self::BFloat16 => Some("DT_BFP16"),
            Self::FP8E5M2 => Some("DT_FP8E5M2"),
            Self::FP8E4M3 => Some("DT_FP8E4M3"),
            Self::Int32 => Some("DT_INT32"),
            Self::UInt32 => Some("DT_UINT32"),
            Self::Int16 => Some("DT_INT16"),
            Self::UInt16 => Some("DT_UINT16"),
            Self::Int8 => Some("DT_INT8"),
            Self::UInt8 => Some("DT_UINT8"),
            Self::Bool | Self::Int64 | Self::UInt64 | Self::Float64 => None,
        }
    }
}

impl fmt::Display for ScalarDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarDType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let dtype = match s.trim().to_ascii_lowercase().as_str() {
            "bool" => Self::Bool,
            "int8" | "i8" => Self::Int8,
            "uint8" | "u8" => Self::UInt8,
            "int16" | "i16" => Self::Int16,
            "uint16" | "u16" => Self::UInt16,
            "int32" | "i32" | "int" => Self::Int32,
            "uint32" | "u32" => Self::UInt32,
            "int64" | "i64" => Self::Int64,
            "uint64" | "u64" => Self::UInt64,
            "float8_e4m3" | "float8_e4m3fn" | "fp8e4m3" => Self::FP8E4M3,
            "float8_e5m2" | "fp8e5m2" => Self::FP8E5M2,
            "float16" | "f16" | "fp16" | "half" => Self::Float16,
            "bfloat16" | "bf16" => Self::BFloat16,
            "float32" | "f32" | "fp32" | "float" => Self::Float32,
            "float64" | "f64" | "fp64" | "double" => Self::Float64,
            _ => return error::UnknownDTypeSnafu { name: s.to_string() }.fail(),
        };
        Ok(dtype)
    }
}
