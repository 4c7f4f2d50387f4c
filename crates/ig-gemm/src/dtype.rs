use std::fmt;

/// Element types of GEMM operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    /// 32-bit floating point.
    F32,
    /// bfloat16 (via the `half` crate), widened to f32 before accumulation.
    Bf16,
    /// Signed 8-bit integer.
    S8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 32-bit integer, the accumulator type of the quantized paths.
    S32,
}

impl ElemType {
    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElemType::F32 | ElemType::S32 => 4,
            ElemType::Bf16 => 2,
            ElemType::S8 | ElemType::U8 => 1,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemType::F32 => write!(f, "f32"),
            ElemType::Bf16 => write!(f, "bf16"),
            ElemType::S8 => write!(f, "s8"),
            ElemType::U8 => write!(f, "u8"),
            ElemType::S32 => write!(f, "s32"),
        }
    }
}

/// Rust types that can appear as GEMM operands.
pub trait Element: Copy + Send + Sync + 'static {
    const TYPE: ElemType;
}

impl Element for f32 {
    const TYPE: ElemType = ElemType::F32;
}

impl Element for half::bf16 {
    const TYPE: ElemType = ElemType::Bf16;
}

impl Element for i8 {
    const TYPE: ElemType = ElemType::S8;
}

impl Element for u8 {
    const TYPE: ElemType = ElemType::U8;
}

impl Element for i32 {
    const TYPE: ElemType = ElemType::S32;
}
