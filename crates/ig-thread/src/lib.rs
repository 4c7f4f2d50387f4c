//! `ig-thread` - Parallel executor for isa-gemm.
//!
//! This crate provides:
//! - `balance211` for splitting a linear range evenly across workers
//! - `NdCounter`, a mixed-radix odometer over 1 to 6 dimensions
//! - `for_nd` for walking one worker's share of an N-dimensional space
//! - `Team`, a fork-join pool with `parallel_nd` and a nested
//!   `parallel_nd_in_team` variant for code already running in a team

pub mod balance;
pub mod counter;
pub mod error;
pub mod nd;
pub mod team;

pub use balance::balance211;
pub use counter::NdCounter;
pub use error::{Result, ThreadError};
pub use nd::for_nd;
pub use team::{
    get_num_threads, get_thread_num, parallel_nd_in_team, Team, ThreadConfig, ThreadCtx,
};
