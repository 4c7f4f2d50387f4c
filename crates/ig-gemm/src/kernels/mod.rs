//! Register-blocked GEMM tile kernels generated at runtime.
//!
//! One kernel computes an `MR x NR` block of C, where MR spans two vector
//! registers and NR is four columns. The packing driver feeds it contiguous
//! panels of A and B.

mod tile;

use std::fmt;

use ig_jit::{CodeGenerator, CpuCapabilities, EmittedKernel, Isa, JitConfig, Target, VecLen};

pub use tile::{TileArgs, TileFn};

/// Columns of C per tile.
pub const TILE_NR: usize = 4;
/// Vector registers of C rows per tile.
pub const MR_VECS: usize = 2;

/// Arithmetic a kernel accumulates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelClass {
    /// f32 fused multiply-add, with alpha, beta and bias applied in the
    /// epilogue.
    Float,
    /// Wrapping i32 multiply-add. The raw sums are stored and scaled by the
    /// caller.
    Int,
}

/// Everything that changes the code of a tile kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub class: KernelClass,
    pub isa: Isa,
    pub beta_zero: bool,
    pub with_bias: bool,
}

impl KernelKey {
    pub fn float(isa: Isa, beta_zero: bool, with_bias: bool) -> Self {
        KernelKey {
            class: KernelClass::Float,
            isa,
            beta_zero,
            with_bias,
        }
    }

    pub fn int(isa: Isa) -> Self {
        KernelKey {
            class: KernelClass::Int,
            isa,
            beta_zero: true,
            with_bias: false,
        }
    }

    pub fn vec_len(&self) -> VecLen {
        match self.isa {
            Isa::Avx512Common | Isa::Avx512Core => VecLen::V512,
            Isa::Avx | Isa::Avx2 | Isa::Fma => VecLen::V256,
            Isa::Sse41 | Isa::Asimd => VecLen::V128,
        }
    }

    /// Rows of C per tile.
    pub fn mr(&self) -> usize {
        self.vec_len().lanes() * MR_VECS
    }

    pub fn name(&self) -> String {
        let class = match self.class {
            KernelClass::Float => "f32",
            KernelClass::Int => "s32",
        };
        let beta = if self.beta_zero { "b0" } else { "bn" };
        let bias = if self.with_bias { "_bias" } else { "" };
        format!("gemm_{class}_{}_{beta}{bias}", self.isa)
    }
}

/// A finalized tile kernel.
pub struct GemmKernel {
    key: KernelKey,
    code: EmittedKernel,
}

impl GemmKernel {
    /// Emits and finalizes the kernel for `key`.
    ///
    /// Fails when `caps` lacks an encoding the kernel needs, so a kernel that
    /// exists can always run on a processor with those capabilities.
    pub fn generate(
        key: KernelKey,
        target: Target,
        caps: &dyn CpuCapabilities,
        config: JitConfig,
    ) -> ig_jit::Result<GemmKernel> {
        let mut g = CodeGenerator::new(key.name(), file!(), target, key.vec_len(), caps, config);
        tile::emit(&mut g, &key);
        let code = g.get_code()?;
        Ok(GemmKernel { key, code })
    }

    pub fn key(&self) -> KernelKey {
        self.key
    }

    pub fn mr(&self) -> usize {
        self.key.mr()
    }

    pub fn nr(&self) -> usize {
        TILE_NR
    }

    pub fn code(&self) -> &EmittedKernel {
        &self.code
    }

    /// Runs the kernel on one tile.
    ///
    /// # Safety
    /// The kernel must have been generated for the running target and
    /// processor. Every pointer in `args` must cover what the kernel reads
    /// and writes: `k * MR` packed A values, `k * NR` packed B values, MR
    /// bias values when built with bias, and `NR` columns of `MR` elements
    /// at stride `ldc_bytes` from `c`.
    pub(crate) unsafe fn run(&self, args: &TileArgs) {
        let f: TileFn = self.code.as_fn();
        f(args);
    }
}

impl fmt::Debug for GemmKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GemmKernel")
            .field("key", &self.key)
            .field("size", &self.code.size())
            .finish()
    }
}
