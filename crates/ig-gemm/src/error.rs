use ig_jit::JitError;
use ig_thread::ThreadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GemmError {
    /// Malformed shape, flags, strides or operand buffers. Always reported
    /// before any other outcome and before any output is written.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// A well-formed request this build cannot service. Retrying the same
    /// request gives the same answer.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error(transparent)]
    Thread(#[from] ThreadError),
    #[error(transparent)]
    Jit(#[from] JitError),
}

pub type Result<T> = std::result::Result<T, GemmError>;

/// Outcome of a GEMM call as seen by C callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub enum Status {
    Success = 0,
    InvalidArguments = 1,
    Unimplemented = 2,
}

impl Status {
    pub fn of<T>(result: &Result<T>) -> Status {
        match result {
            Ok(_) => Status::Success,
            Err(err) => Status::from(err),
        }
    }
}

impl From<&GemmError> for Status {
    fn from(err: &GemmError) -> Self {
        match err {
            GemmError::InvalidArguments(_) => Status::InvalidArguments,
            // pool or emitter setup failures leave the request unserviceable
            GemmError::Unimplemented(_) | GemmError::Thread(_) | GemmError::Jit(_) => {
                Status::Unimplemented
            }
        }
    }
}
