//! `ig-gemm` - ISA-adaptive GEMM dispatcher for isa-gemm.
//!
//! This crate provides:
//! - Column-major BLAS-style GEMM entry points for f32, bf16 and 8-bit
//!   quantized operands
//! - Argument validation shared by every route
//! - A per-call route decision: vendor library, generated kernel,
//!   simplified quantized kernel or portable reference
//! - Register-blocked tile kernels generated at runtime through `ig-jit`
//! - Parallel execution over an `ig-thread` worker team

pub mod backend;
pub mod check;
pub mod config;
pub mod cpu;
pub mod dispatch;
mod driver;
pub mod dtype;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod request;

// Re-export primary types at the crate root for convenience.
pub use backend::{BackendRegistry, VendorBlas};
pub use check::{check_gemm_input, check_gemm_x8x8x32_input};
pub use config::{GemmConfig, MAX_ISA_ENV};
pub use cpu::igemm_output;
pub use dispatch::{
    decide_bf16, decide_igemm, decide_sgemm, gemm_bf16bf16f32, gemm_s8s8s32, gemm_s8u8s32, sgemm,
    DispatchDecision, GemmDispatcher,
};
pub use dtype::{ElemType, Element};
pub use error::{GemmError, Result, Status};
pub use kernels::{GemmKernel, KernelClass, KernelKey};
pub use layout::{GemmDesc, MatrixDescriptor, OffsetMode, Transpose};
pub use request::{GemmRequest, OutputOffset, ZeroPoints};
