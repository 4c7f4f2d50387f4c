use ig_gemm::Status;

/// Status codes returned by the GEMM entry points.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IGStatus {
    Success = 0,
    InvalidArguments = 1,
    Unimplemented = 2,
}

impl From<Status> for IGStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => IGStatus::Success,
            Status::InvalidArguments => IGStatus::InvalidArguments,
            Status::Unimplemented => IGStatus::Unimplemented,
        }
    }
}
