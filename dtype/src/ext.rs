use super::*;

/// Rust scalar types with a fixed element dtype.
pub trait HasDType: Copy {
    const DTYPE: ScalarDType;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl HasDType for $ty { const DTYPE: ScalarDType = $dtype; })*
    };
}

impl_dtype_ext! {
    bool => ScalarDType::Bool,
    i8 => ScalarDType::Int8, i16 => ScalarDType::Int16, i32 => ScalarDType::Int32, i64 => ScalarDType::Int64,
    u8 => ScalarDType::UInt8, u16 => ScalarDType::UInt16, u32 => ScalarDType::UInt32, u64 => ScalarDType::UInt64,
    half::f16 => ScalarDType::Float16, half::bf16 => ScalarDType::BFloat16,
    f32 => ScalarDType::Float32, f64 => ScalarDType::Float64,
}
