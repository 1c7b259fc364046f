use std::path::{Path, PathBuf};
use std::sync::Arc;

use harness_core::{Outcome, WorkUnit};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::HandlerContext;
use crate::scheduler::types::SchedulerEvent;
use crate::session::{LazySession, SlotGuard};

use super::admission::AdmissionError;
use super::core::Shared;

/// Records exactly one outcome and signals the barrier exactly once for a
/// unit, even if its task unwinds or is aborted mid-flight.
///
/// The unit's permit and slot live here so they are always released before
/// the barrier signal.
pub(super) struct CompletionGuard {
    shared: Arc<Shared>,
    unit: String,
    recorded: bool,
    permit: Option<OwnedSemaphorePermit>,
    slot: Option<SlotGuard>,
}

impl CompletionGuard {
    pub(super) fn new(shared: Arc<Shared>, unit: String) -> Self {
        Self {
            shared,
            unit,
            recorded: false,
            permit: None,
            slot: None,
        }
    }

    fn hold_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }

    fn hold_slot(&mut self, slot: SlotGuard) -> usize {
        let index = slot.index();
        self.slot = Some(slot);
        index
    }

    pub(super) fn record(&mut self, outcome: Outcome) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_outcome(outcome.passed);
        }
        info!(
            unit = %outcome.unit_name,
            passed = outcome.passed,
            duration_secs = outcome.duration_secs,
            "unit finished"
        );
        self.shared.emit(SchedulerEvent::Finished {
            unit: outcome.unit_name.clone(),
            passed: outcome.passed,
            duration_secs: outcome.duration_secs,
            error: outcome.error.clone(),
        });
        self.shared.store.record(outcome);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.recorded {
            warn!(unit = %self.unit, "unit task ended without an outcome");
            let outcome = Outcome::failed(
                self.unit.clone(),
                0,
                Some("worker aborted before recording an outcome".into()),
            );
            self.record(outcome);
        }
        drop(self.slot.take());
        drop(self.permit.take());
        if let Err(e) = self.shared.barrier.signal() {
            warn!(unit = %self.unit, error = %e, "completion barrier");
        }
    }
}

impl Shared {
    /// Full lifecycle of one unit on its own task.
    pub(super) async fn run_unit(self: Arc<Self>, unit: WorkUnit, mut guard: CompletionGuard) {
        self.execute(&unit, &mut guard).await;
    }

    async fn execute(&self, unit: &WorkUnit, guard: &mut CompletionGuard) {
        let mut interrupt = self.interrupt.subscribe();

        match self.acquire_permit(&mut interrupt).await {
            Ok(permit) => guard.hold_permit(permit),
            Err(e) => {
                guard.record(self.not_admitted(unit, e));
                return;
            }
        }
        let slot = match self.slots.acquire() {
            Some(slot) => guard.hold_slot(slot),
            None => {
                guard.record(self.not_admitted(unit, AdmissionError::NoSlot));
                return;
            }
        };

        let attempts = match self.admit(&unit.name, &mut interrupt).await {
            Ok(attempts) => attempts,
            Err(e) => {
                guard.record(self.not_admitted(unit, e));
                return;
            }
        };
        debug!(unit = %unit.name, slot, attempts, "unit admitted");
        self.emit(SchedulerEvent::Admitted {
            unit: unit.name.clone(),
            attempts,
            slot,
        });

        let outcome = self.invoke(unit, slot).await;
        guard.record(outcome);
    }

    fn not_admitted(&self, unit: &WorkUnit, reason: AdmissionError) -> Outcome {
        warn!(unit = %unit.name, reason = %reason, "unit not admitted");
        Outcome::failed(unit.name.clone(), 0, Some(reason.to_string()))
    }

    /// Run the unit's handler, timing it and turning every fault into a failed outcome.
    async fn invoke(&self, unit: &WorkUnit, slot: usize) -> Outcome {
        let artifact = self
            .artifact_dir
            .as_ref()
            .map(|dir| artifact_path(dir, &unit.name));
        let mut ctx = HandlerContext::new(
            unit.name.clone(),
            artifact,
            LazySession::new(slot, Arc::clone(&self.sessions)),
        );

        let in_flight = InFlight::start(self);
        let start = Instant::now();

        let result = {
            let call = self.registry.try_invoke(&unit.handler, &unit.args, &mut ctx);
            match self.config.unit_timeout() {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(r) => r.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
                },
                None => call.await.map_err(|e| e.to_string()),
            }
        };

        let duration_secs = start.elapsed().as_secs();
        drop(in_flight);
        // Dropping the context closes the slot's session if the handler opened one.
        let artifact_path = ctx.into_artifact_path();

        match result {
            Ok(true) => Outcome::passed(unit.name.clone(), duration_secs).with_artifact(artifact_path),
            Ok(false) => Outcome::failed(unit.name.clone(), duration_secs, None).with_artifact(artifact_path),
            Err(reason) => {
                warn!(unit = %unit.name, handler = %unit.handler, error = %reason, "unit failed");
                Outcome::failed(unit.name.clone(), duration_secs, Some(reason)).with_artifact(artifact_path)
            }
        }
    }
}

/// Keeps `in_flight` balanced even when the handler future is dropped.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl<'a> InFlight<'a> {
    fn start(shared: &'a Shared) -> Self {
        if let Ok(mut m) = shared.metrics.write() {
            m.record_start();
        }
        Self { shared }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_end();
        }
    }
}

/// Default artifact for a unit: `<dir>/<stem>.png`, where the stem is the
/// unit name restricted to `[A-Za-z0-9._-]` so it cannot leave `dir`.
fn artifact_path(dir: &Path, unit: &str) -> PathBuf {
    let stem: String = unit
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = match stem.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => stem,
    };
    dir.join(format!("{stem}.png"))
}
