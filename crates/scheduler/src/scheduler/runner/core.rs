use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use harness_core::{Outcome, SchedulerConfig, WorkUnit};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::barrier::CompletionBarrier;
use crate::dispatch::DispatchRegistry;
use crate::monitor::{LoadSampler, ResourceMonitor};
use crate::scheduler::types::{SchedulerEvent, SchedulerMetrics};
use crate::session::{NoopSessions, SessionFactory, SlotPool};
use crate::store::ResultStore;

use super::execution::CompletionGuard;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("scheduler is shut down; unit '{0}' was not accepted")]
    ShutDown(String),
}

/// Collaborators for one scheduler. The store and barrier are supplied at
/// [`build`](Self::build) time because they are sized per batch.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: Arc<DispatchRegistry>,
    sampler: Option<Arc<dyn LoadSampler>>,
    sessions: Arc<dyn SessionFactory>,
    artifact_dir: Option<PathBuf>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig, registry: Arc<DispatchRegistry>) -> Self {
        Self {
            config,
            registry,
            sampler: None,
            sessions: Arc::new(NoopSessions),
            artifact_dir: None,
        }
    }

    /// Override the load sampler (defaults to a host [`ResourceMonitor`]).
    pub fn sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Directory for per-unit artifacts; each unit defaults to `<dir>/<name>.png`.
    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn build(self, store: Arc<ResultStore>, barrier: Arc<CompletionBarrier>) -> AdmissionScheduler {
        let capacity = self.config.max_concurrency;
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(ResourceMonitor::host(self.config.warmup())));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (interrupt, _) = watch::channel(false);

        info!(
            capacity,
            cpu_threshold = self.config.cpu_threshold,
            memory_threshold = self.config.memory_threshold,
            batch_size = barrier.total(),
            "scheduler ready"
        );

        AdmissionScheduler {
            shared: Arc::new(Shared {
                config: self.config,
                registry: self.registry,
                sampler,
                sessions: self.sessions,
                artifact_dir: self.artifact_dir,
                permits: Arc::new(Semaphore::new(capacity)),
                slots: SlotPool::new(capacity),
                store,
                barrier,
                metrics: RwLock::new(SchedulerMetrics::default()),
                events,
                interrupt,
            }),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(Vec::new()),
        }
    }
}

/// State shared between the scheduler handle and every unit task.
pub(super) struct Shared {
    pub(super) config: SchedulerConfig,
    pub(super) registry: Arc<DispatchRegistry>,
    pub(super) sampler: Arc<dyn LoadSampler>,
    pub(super) sessions: Arc<dyn SessionFactory>,
    pub(super) artifact_dir: Option<PathBuf>,
    pub(super) permits: Arc<Semaphore>,
    pub(super) slots: SlotPool,
    pub(super) store: Arc<ResultStore>,
    pub(super) barrier: Arc<CompletionBarrier>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    pub(super) events: broadcast::Sender<SchedulerEvent>,
    pub(super) interrupt: watch::Sender<bool>,
}

impl Shared {
    pub(super) fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Admission-controlled scheduler for one batch.
///
/// [`submit`](Self::submit) never blocks; callers learn about completion only
/// through the batch's [`CompletionBarrier`]. Must be used from within a
/// Tokio runtime.
pub struct AdmissionScheduler {
    pub(super) shared: Arc<Shared>,
    accepting: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AdmissionScheduler {
    /// Queue a unit for asynchronous execution.
    pub fn submit(
        &self,
        unit_name: impl Into<String>,
        handler: impl Into<String>,
        args: Vec<String>,
    ) -> Result<(), SubmitError> {
        self.submit_unit(WorkUnit::new(unit_name, handler, args))
    }

    /// Queue a unit for asynchronous execution.
    ///
    /// After [`shutdown`](Self::shutdown) the unit is refused: it is recorded
    /// as failed and still counted against the barrier, so the batch cannot
    /// hang on it.
    pub fn submit_unit(&self, unit: WorkUnit) -> Result<(), SubmitError> {
        let shared = &self.shared;

        if !self.accepting.load(Ordering::Acquire) {
            warn!(unit = %unit.name, "submission after shutdown refused");
            let reason = "scheduler is shut down".to_string();
            shared.emit(SchedulerEvent::Rejected {
                unit: unit.name.clone(),
                reason: reason.clone(),
            });
            shared.store.reserve(&unit.name);
            let mut guard = CompletionGuard::new(Arc::clone(shared), unit.name.clone());
            guard.record(Outcome::failed(unit.name.clone(), 0, Some(reason)));
            return Err(SubmitError::ShutDown(unit.name));
        }

        if !shared.store.reserve(&unit.name) {
            warn!(
                unit = %unit.name,
                "duplicate unit name in batch; the later outcome will replace the earlier one"
            );
        }
        if let Ok(mut m) = shared.metrics.write() {
            m.submitted += 1;
        }
        shared.emit(SchedulerEvent::Submitted {
            unit: unit.name.clone(),
            handler: unit.handler.clone(),
        });

        // Created before spawning so an abort before the first poll still records.
        let guard = CompletionGuard::new(Arc::clone(shared), unit.name.clone());
        let handle = tokio::spawn(Arc::clone(shared).run_unit(unit, guard));
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        Ok(())
    }

    /// Stop accepting submissions. Units already submitted keep running.
    pub fn shutdown(&self) {
        info!("Scheduler shutdown requested");
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Wait for every submitted unit task to exit.
    pub async fn drain(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!("unit task was aborted"),
                Err(e) => error!(error = %e, "unit task ended abnormally"),
            }
        }
        info!("Scheduler drained");
    }

    /// Fail every unit still waiting for a permit or backing off. Units
    /// already inside their handler run to completion.
    pub fn interrupt(&self) {
        warn!("Scheduler interrupt requested");
        self.shared.interrupt.send_replace(true);
    }

    /// Abort every unit task that has not finished, running handlers included.
    /// Each aborted unit is recorded as failed and still signals the barrier.
    pub fn abort(&self) {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        let running = workers.iter().filter(|h| !h.is_finished()).count();
        warn!(running, "Scheduler abort requested");
        self.shared.interrupt.send_replace(true);
        for handle in workers.iter() {
            handle.abort();
        }
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Subscribe to lifecycle events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.max_concurrency
    }

    pub fn available_permits(&self) -> usize {
        self.shared.permits.available_permits()
    }

    /// Permits currently held by units.
    pub fn outstanding_permits(&self) -> usize {
        self.capacity().saturating_sub(self.available_permits())
    }

    pub fn store(&self) -> Arc<ResultStore> {
        Arc::clone(&self.shared.store)
    }

    pub fn barrier(&self) -> Arc<CompletionBarrier> {
        Arc::clone(&self.shared.barrier)
    }
}
