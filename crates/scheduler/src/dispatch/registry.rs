use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::handler::{Arity, FnHandler, Handler, HandlerContext, HandlerError};

/// Builds a fresh handler instance for one invocation.
pub type HandlerConstructor =
    Arc<dyn Fn() -> Result<Box<dyn Handler>, HandlerError> + Send + Sync>;

struct Registration {
    arity: Arity,
    construct: HandlerConstructor,
}

/// Resolves handler names to constructors at run time.
///
/// Populated once at startup, then shared read-only across workers.
pub struct DispatchRegistry {
    handlers: HashMap<String, Registration>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered under '{0}'")]
    UnknownHandler(String),
    #[error("handler '{handler}' takes {expected} arguments, got {got}")]
    ArityMismatch {
        handler: String,
        expected: Arity,
        got: usize,
    },
    #[error("handler with name '{0}' is already registered")]
    DuplicateName(String),
    #[error("failed to construct handler '{handler}': {source}")]
    Construction {
        handler: String,
        #[source]
        source: HandlerError,
    },
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },
    #[error("handler '{handler}' panicked: {message}")]
    Panicked { handler: String, message: String },
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler type constructed through `Default`.
    pub fn register<H>(&mut self, name: &str, arity: Arity) -> Result<(), DispatchError>
    where
        H: Handler + Default + 'static,
    {
        self.register_with(name, arity, || Ok(Box::new(H::default()) as Box<dyn Handler>))
    }

    /// Register a handler with a custom constructor. Construction errors
    /// surface as failed invocations, not registration errors.
    pub fn register_with<C>(&mut self, name: &str, arity: Arity, construct: C) -> Result<(), DispatchError>
    where
        C: Fn() -> Result<Box<dyn Handler>, HandlerError> + Send + Sync + 'static,
    {
        if self.handlers.contains_key(name) {
            return Err(DispatchError::DuplicateName(name.to_string()));
        }
        debug!(handler = name, %arity, "registered handler");
        self.handlers.insert(
            name.to_string(),
            Registration {
                arity,
                construct: Arc::new(construct),
            },
        );
        Ok(())
    }

    /// Register a synchronous closure as a handler.
    pub fn register_fn<F>(&mut self, name: &str, arity: Arity, f: F) -> Result<(), DispatchError>
    where
        F: Fn(&[String], &mut HandlerContext) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register_with(name, arity, move || {
            Ok(Box::new(FnHandler::new(Arc::clone(&f))) as Box<dyn Handler>)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn arity_of(&self, name: &str) -> Option<Arity> {
        self.handlers.get(name).map(|r| r.arity)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Look up `name`, check the argument count, and build a fresh instance.
    pub fn resolve(&self, name: &str, args: &[String]) -> Result<Box<dyn Handler>, DispatchError> {
        let registration = self
            .handlers
            .get(name)
            .ok_or_else(|| DispatchError::UnknownHandler(name.to_string()))?;

        if !registration.arity.accepts(args.len()) {
            return Err(DispatchError::ArityMismatch {
                handler: name.to_string(),
                expected: registration.arity,
                got: args.len(),
            });
        }

        (registration.construct)().map_err(|source| DispatchError::Construction {
            handler: name.to_string(),
            source,
        })
    }

    /// Resolve and run a handler, keeping every fault inside the returned error.
    pub async fn try_invoke(
        &self,
        name: &str,
        args: &[String],
        ctx: &mut HandlerContext,
    ) -> Result<bool, DispatchError> {
        let mut handler = self.resolve(name, args)?;

        match AssertUnwindSafe(handler.run(args, ctx)).catch_unwind().await {
            Ok(Ok(passed)) => Ok(passed),
            Ok(Err(source)) => Err(DispatchError::Handler {
                handler: name.to_string(),
                source,
            }),
            Err(payload) => Err(DispatchError::Panicked {
                handler: name.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Resolve and run a handler, reporting any dispatch failure as `false`.
    pub async fn invoke(&self, name: &str, args: &[String], ctx: &mut HandlerContext) -> bool {
        match self.try_invoke(name, args, ctx).await {
            Ok(passed) => passed,
            Err(e) => {
                warn!(unit = ctx.unit_name(), handler = name, error = %e, "dispatch failed");
                false
            }
        }
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    /// Counts its own construction and passes when its single argument is non-empty.
    struct Probe {
        calls: usize,
    }

    impl Default for Probe {
        fn default() -> Self {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Self { calls: 0 }
        }
    }

    #[async_trait]
    impl Handler for Probe {
        async fn run(&mut self, args: &[String], _ctx: &mut HandlerContext) -> Result<bool, HandlerError> {
            self.calls += 1;
            // Fresh instance per invocation.
            assert_eq!(self.calls, 1);
            Ok(!args[0].is_empty())
        }
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn invoke_registered_handler() {
        let mut registry = DispatchRegistry::new();
        registry.register::<Probe>("method1", Arity::Exact(1)).unwrap();
        let mut ctx = HandlerContext::detached("TestCase1");

        let before = CONSTRUCTED.load(Ordering::SeqCst);
        assert!(registry.invoke("method1", &args(&["TestCase1"]), &mut ctx).await);
        assert!(!registry.invoke("method1", &args(&[""]), &mut ctx).await);
        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst) - before, 2);
    }

    #[tokio::test]
    async fn unknown_handler_is_false_not_panic() {
        let registry = DispatchRegistry::new();
        let mut ctx = HandlerContext::detached("u");
        assert!(!registry.invoke("method99", &args(&["u"]), &mut ctx).await);

        let err = registry.try_invoke("method99", &[], &mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownHandler(ref n) if n == "method99"));
    }

    #[tokio::test]
    async fn arity_mismatch_is_reported() {
        let mut registry = DispatchRegistry::new();
        registry.register::<Probe>("method1", Arity::Exact(1)).unwrap();
        let mut ctx = HandlerContext::detached("u");

        let err = registry.try_invoke("method1", &args(&["a", "b"]), &mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::ArityMismatch { got: 2, .. }));
        assert!(err.to_string().contains("exactly 1"));
    }

    #[tokio::test]
    async fn construction_failure_is_reported() {
        let mut registry = DispatchRegistry::new();
        registry
            .register_with("broken", Arity::Any, || Err(HandlerError::Failed("no driver".into())))
            .unwrap();
        let mut ctx = HandlerContext::detached("u");

        let err = registry.try_invoke("broken", &[], &mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Construction { .. }));
        assert!(!registry.invoke("broken", &[], &mut ctx).await);
    }

    #[tokio::test]
    async fn handler_error_and_panic_are_contained() {
        let mut registry = DispatchRegistry::new();
        registry
            .register_fn("erroring", Arity::Any, |_, _| Err(HandlerError::Failed("element not found".into())))
            .unwrap();
        registry
            .register_fn("panicking", Arity::Any, |_, _| panic!("boom"))
            .unwrap();
        let mut ctx = HandlerContext::detached("u");

        let err = registry.try_invoke("erroring", &[], &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("element not found"));

        let err = registry.try_invoke("panicking", &[], &mut ctx).await.unwrap_err();
        match err {
            DispatchError::Panicked { message, .. } => assert_eq!(message, "boom"),
            other => panic!("expected panic error, got {other}"),
        }
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = DispatchRegistry::new();
        registry.register::<Probe>("method1", Arity::Exact(1)).unwrap();
        assert!(matches!(
            registry.register::<Probe>("method1", Arity::Any),
            Err(DispatchError::DuplicateName(_))
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["method1".to_string()]);
        assert_eq!(registry.arity_of("method1"), Some(Arity::Exact(1)));
    }
}
