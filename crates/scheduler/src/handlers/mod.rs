//! Built-in handlers available to every batch.
//!
//! - `command`: run an external program, pass on exit status 0
//! - `sleep`: wait N milliseconds, then pass
//! - `fail`: always fail

pub mod basic;
pub mod command;

pub use basic::{FailHandler, SleepHandler};
pub use command::CommandHandler;

use crate::dispatch::{Arity, DispatchError, DispatchRegistry};

/// Register the built-in handlers under their conventional names.
pub fn register_builtin(registry: &mut DispatchRegistry) -> Result<(), DispatchError> {
    registry.register::<CommandHandler>("command", Arity::AtLeast(1))?;
    registry.register::<SleepHandler>("sleep", Arity::Exact(1))?;
    registry.register::<FailHandler>("fail", Arity::Any)?;
    Ok(())
}
