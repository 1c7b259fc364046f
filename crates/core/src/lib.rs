pub mod config;
pub mod error;
pub mod unit;

pub use config::{HarnessConfig, ReportConfig, SchedulerConfig};
pub use error::*;
pub use unit::*;
