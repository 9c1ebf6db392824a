//! Single-owner executor for an updater collection.
//!
//! An [`Executor`] owns one [`Collection`](updater_core::Collection) and runs
//! refresh, install and upload jobs against it one at a time on the blocking
//! pool. Every submission returns a future resolving to the job's result.

mod error;
mod executor;
mod logging;

pub use error::WorkerError;
pub use executor::{Executor, JobContext};
pub use logging::init_tracing;
