//! Admission-controlled parallel execution of named work units.
//!
//! A batch of [`WorkUnit`](harness_core::WorkUnit)s is submitted to an
//! [`AdmissionScheduler`]; each unit waits for a permit and for host load to
//! drop below threshold, runs its handler through the [`DispatchRegistry`],
//! and records an [`Outcome`](harness_core::Outcome). The driver waits on a
//! [`CompletionBarrier`] sized to the batch and hands the ordered results to
//! a [`ReportSink`].

pub mod barrier;
pub mod dispatch;
pub mod driver;
pub mod handlers;
pub mod monitor;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod store;

pub use barrier::{BarrierError, CompletionBarrier};
pub use dispatch::{Arity, DispatchError, DispatchRegistry, Handler, HandlerContext, HandlerError};
pub use driver::{run_batch, run_batch_until};
pub use monitor::{LoadSampler, ResourceMonitor, ResourceSnapshot};
pub use report::{BatchReport, JsonReportSink, LogReportSink, ReportError, ReportSink, Summary};
pub use scheduler::{AdmissionScheduler, SchedulerBuilder, SchedulerEvent, SchedulerMetrics, SubmitError};
pub use source::{expand_rows, Plan, SourceError};
pub use store::ResultStore;
