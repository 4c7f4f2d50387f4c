use std::cell::RefCell;
use std::ffi::CString;

use ig_gemm::{GemmError, Result, Status};

use crate::types::IGStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Remembers `msg` for the next `ig_last_error` on this thread. Interior NUL
/// bytes are dropped.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into().replace('\0', "");
    LAST_ERROR.with(|e| *e.borrow_mut() = CString::new(msg).ok());
}

/// Takes the pending message, so each failure is reported once.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Maps a call result to its status, recording the message of a failure.
pub(crate) fn report<T>(result: Result<T>) -> IGStatus {
    if let Err(err) = &result {
        set_last_error(err.to_string());
    }
    Status::of(&result).into()
}

pub(crate) fn invalid(msg: &str) -> GemmError {
    GemmError::InvalidArguments(msg.to_string())
}
