use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::session::{LazySession, NoopSessions, Session, SessionError};

/// Number of positional arguments a handler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
            Arity::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Everything a handler can see about the unit it is running.
pub struct HandlerContext {
    unit_name: String,
    artifact_path: Option<PathBuf>,
    session: LazySession,
}

impl HandlerContext {
    pub fn new(unit_name: impl Into<String>, artifact_path: Option<PathBuf>, session: LazySession) -> Self {
        Self {
            unit_name: unit_name.into(),
            artifact_path,
            session,
        }
    }

    /// Context with no artifact location and no external session.
    pub fn detached(unit_name: impl Into<String>) -> Self {
        Self::new(unit_name, None, LazySession::new(0, Arc::new(NoopSessions)))
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn slot(&self) -> usize {
        self.session.slot()
    }

    /// Where this unit's artifact is expected to land.
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    pub fn set_artifact_path(&mut self, path: Option<PathBuf>) {
        self.artifact_path = path;
    }

    /// The worker slot's session, opened on first call.
    pub fn session(&mut self) -> Result<&mut (dyn Session + 'static), SessionError> {
        self.session.get()
    }

    /// Consume the context, closing any open session.
    pub fn into_artifact_path(self) -> Option<PathBuf> {
        self.artifact_path
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("session unavailable: {0}")]
    Session(#[from] SessionError),
    #[error("execution failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A named piece of test logic. A fresh instance is constructed for every
/// invocation, so `&mut self` state never leaks between units.
#[async_trait]
pub trait Handler: Send {
    /// Run against positional arguments. `Ok(false)` is an ordinary failed check;
    /// `Err` is a fault and is reported with its reason.
    async fn run(&mut self, args: &[String], ctx: &mut HandlerContext) -> Result<bool, HandlerError>;
}

/// Adapts a synchronous closure into a [`Handler`].
pub struct FnHandler<F> {
    f: Arc<F>,
}

impl<F> FnHandler<F> {
    pub fn new(f: Arc<F>) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&[String], &mut HandlerContext) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    async fn run(&mut self, args: &[String], ctx: &mut HandlerContext) -> Result<bool, HandlerError> {
        (self.f)(args, ctx)
    }
}
