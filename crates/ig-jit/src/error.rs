use thiserror::Error;

use crate::abi::Target;
use crate::ops::VecOp;
use crate::reg::VecLen;

#[derive(Error, Debug)]
pub enum JitError {
    #[error("code buffer exhausted: {needed} bytes emitted, capacity is {capacity}")]
    BufferExhausted { needed: usize, capacity: usize },
    #[error("no encoding for {op:?} on {target} at {len}")]
    NoEncoding {
        op: VecOp,
        len: VecLen,
        target: Target,
    },
    #[error("label {0} referenced but never bound")]
    UnboundLabel(usize),
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    #[error("instruction not available on {0}")]
    UnsupportedTarget(Target),
    #[error("generator produced no code")]
    EmptyCode,
    #[error("failed to map executable memory: {0}")]
    Map(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JitError>;
