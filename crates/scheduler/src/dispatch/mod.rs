//! Name-based handler dispatch.
//!
//! Work units name their handler as a string. The [`DispatchRegistry`] maps
//! those names to handler constructors, checks argument counts, and turns
//! every resolution or execution fault into a typed [`DispatchError`] so a
//! single bad unit can never take down its worker.

pub mod handler;
pub mod registry;

pub use handler::{Arity, FnHandler, Handler, HandlerContext, HandlerError};
pub use registry::{DispatchError, DispatchRegistry, HandlerConstructor};
