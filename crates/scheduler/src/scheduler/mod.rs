//! Admission-controlled unit scheduler.
//!
//! Every submitted unit runs on its own task, but only after it holds one of
//! a fixed number of permits and the host's CPU and memory load are under
//! threshold. The outcome lands in the batch's [`ResultStore`](crate::store::ResultStore)
//! and the batch's [`CompletionBarrier`](crate::barrier::CompletionBarrier)
//! is signaled exactly once per unit, on every exit path.

pub mod runner;
pub mod types;

pub use runner::{AdmissionError, AdmissionScheduler, SchedulerBuilder, SubmitError};
pub use types::{SchedulerEvent, SchedulerMetrics};
