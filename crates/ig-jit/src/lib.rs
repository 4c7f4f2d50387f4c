//! `ig-jit` - Runtime kernel emitter for isa-gemm.
//!
//! This crate provides:
//! - `HostCpu` / `IsaSet`, the capability query behind every encoding choice
//! - `X86Assembler` and `A64Assembler`, byte-level encoders with labels
//! - `OpTable`, the per-generator lowering of portable vector operations
//! - `CodeGenerator`, which emits ABI-correct frames and `uni_*` operations
//!   and finalizes them into an `EmittedKernel` in executable memory
//! - Opt-in dumping of finalized kernels (`IG_JIT_DUMP`) and a profiling
//!   registration hook

pub mod abi;
pub mod asm;
pub mod code;
pub mod config;
pub mod cpu;
pub mod dump;
pub mod error;
pub mod generator;
pub mod ops;
pub mod reg;

pub use abi::{AbiFrame, Target};
pub use asm::Label;
pub use code::EmittedKernel;
pub use config::JitConfig;
pub use cpu::{CpuCapabilities, HostCpu, Isa, IsaSet};
pub use dump::{dump_enabled, set_dump_enabled, CodeDumper, CodeRegistrar};
pub use error::{JitError, Result};
pub use generator::{CodeGenerator, RoundMode};
pub use ops::{Lowering, OpTable, VecOp};
pub use reg::{Address, Gpr, VSrc, VecLen, Vreg};
