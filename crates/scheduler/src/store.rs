use std::sync::Mutex;

use harness_core::Outcome;
use indexmap::IndexMap;
use tracing::warn;

/// Per-batch outcome store.
///
/// Names enter the ledger when they are first seen (normally at submission),
/// so [`snapshot`](Self::snapshot) replays outcomes in submission order no
/// matter which unit finished first.
///
/// Duplicate unit names: the ledger keeps one entry at the position the name
/// was first seen, and the most recently recorded outcome wins. Each
/// replacement is counted in [`overwrites`](Self::overwrites).
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: IndexMap<String, Option<Outcome>>,
    overwrites: usize,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim a ledger position for `unit_name`. Returns `false` if the name
    /// already has one.
    pub fn reserve(&self, unit_name: &str) -> bool {
        let mut inner = self.lock();
        if inner.entries.contains_key(unit_name) {
            return false;
        }
        inner.entries.insert(unit_name.to_string(), None);
        true
    }

    /// Store an outcome under its unit name, returning any outcome it replaced.
    pub fn record(&self, outcome: Outcome) -> Option<Outcome> {
        let mut inner = self.lock();
        let previous = match inner.entries.get_mut(&outcome.unit_name) {
            Some(slot) => slot.replace(outcome),
            None => {
                inner.entries.insert(outcome.unit_name.clone(), Some(outcome));
                None
            }
        };
        if let Some(prev) = &previous {
            inner.overwrites += 1;
            warn!(unit = %prev.unit_name, "outcome recorded twice for the same unit name; keeping the latest");
        }
        previous
    }

    pub fn get(&self, unit_name: &str) -> Option<Outcome> {
        self.lock().entries.get(unit_name).cloned().flatten()
    }

    /// Recorded outcomes in ledger order. Call after the batch barrier has
    /// released; earlier calls may observe a partial batch.
    pub fn snapshot(&self) -> Vec<Outcome> {
        self.lock().entries.values().flatten().cloned().collect()
    }

    /// Number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.lock().entries.values().filter(|o| o.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ledger entries still waiting for an outcome.
    pub fn pending(&self) -> usize {
        self.lock().entries.values().filter(|o| o.is_none()).count()
    }

    pub fn overwrites(&self) -> usize {
        self.lock().overwrites
    }
}
