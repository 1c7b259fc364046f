//! Scheduler runner, split into focused submodules:
//! - `core`: builder, scheduler handle, submission and shutdown
//! - `admission`: permit acquisition and the resource-gated admission loop
//! - `execution`: per-unit lifecycle, handler invocation, outcome bookkeeping

mod admission;
mod core;
mod execution;

pub use self::admission::AdmissionError;
pub use self::core::{AdmissionScheduler, SchedulerBuilder, SubmitError};
