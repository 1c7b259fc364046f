//! Per-worker session resources handed to handlers.
//!
//! Each admitted unit runs in a numbered worker slot. The slot's session
//! (a browser, a database connection, ...) is opened lazily the first time
//! the handler asks for it and closed when the unit's context is dropped,
//! whichever way the handler exits.

use std::any::Any;
use std::sync::{Arc, Mutex};

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open session for slot {slot}: {reason}")]
    Open { slot: usize, reason: String },
}

/// A resource bound to one worker slot for the duration of one unit.
pub trait Session: Send + 'static {
    /// Release the underlying resource. Called exactly once.
    fn close(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Opens sessions on demand.
pub trait SessionFactory: Send + Sync {
    fn open(&self, slot: usize) -> Result<Box<dyn Session>, SessionError>;
}

/// Factory for handlers that need no external session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessions;

struct NoopSession;

impl Session for NoopSession {
    fn close(&mut self) {}

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl SessionFactory for NoopSessions {
    fn open(&self, _slot: usize) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(NoopSession))
    }
}

/// Session that is opened on first use and closed on drop.
pub struct LazySession {
    slot: usize,
    factory: Arc<dyn SessionFactory>,
    session: Option<Box<dyn Session>>,
}

impl LazySession {
    pub fn new(slot: usize, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            slot,
            factory,
            session: None,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Get the slot's session, opening it if this is the first request.
    pub fn get(&mut self) -> Result<&mut (dyn Session + 'static), SessionError> {
        if self.session.is_none() {
            debug!(slot = self.slot, "opening session");
            self.session = Some(self.factory.open(self.slot)?);
        }
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(SessionError::Open {
                slot: self.slot,
                reason: "session vanished after open".into(),
            }),
        }
    }

    /// Typed access for handlers that know which factory is installed.
    pub fn downcast_mut<T: Session>(&mut self) -> Result<Option<&mut T>, SessionError> {
        Ok(self.get()?.as_any_mut().downcast_mut::<T>())
    }
}

impl Drop for LazySession {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(slot = self.slot, "closing session");
            session.close();
        }
    }
}

// ── Worker slots ────────────────────────────────────────────────────

/// Fixed set of worker slot indices, one per permit.
pub struct SlotPool {
    free: Arc<Mutex<Vec<usize>>>,
}

impl SlotPool {
    pub fn new(size: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new((0..size).rev().collect())),
        }
    }

    /// Take a free slot. Returns `None` only if more slots are held than exist.
    pub fn acquire(&self) -> Option<SlotGuard> {
        let index = self.free.lock().unwrap_or_else(|e| e.into_inner()).pop()?;
        Some(SlotGuard {
            index,
            free: Arc::clone(&self.free),
        })
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A held slot; returned to the pool on drop.
pub struct SlotGuard {
    index: usize,
    free: Arc<Mutex<Vec<usize>>>,
}

impl SlotGuard {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.index);
    }
}
