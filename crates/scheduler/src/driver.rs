//! Batch driver: size the barrier, submit everything, wait, report.

use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use harness_core::WorkUnit;
use tracing::{info, warn};

use crate::barrier::CompletionBarrier;
use crate::report::BatchReport;
use crate::scheduler::SchedulerBuilder;
use crate::store::ResultStore;

/// Run one batch to completion and return its report.
///
/// Per-unit failures never surface here; they are entries in the report.
pub async fn run_batch(units: Vec<WorkUnit>, builder: SchedulerBuilder) -> BatchReport {
    run_batch_until(units, builder, futures::stream::pending()).await
}

/// Like [`run_batch`], but listens to `cancel` while the batch runs.
///
/// The first signal fails every unit not yet admitted and lets running units
/// finish. The second aborts the running units too; they are reported as
/// failed. The report always has one entry per submitted unit.
pub async fn run_batch_until<S>(units: Vec<WorkUnit>, builder: SchedulerBuilder, cancel: S) -> BatchReport
where
    S: Stream<Item = ()>,
{
    let total = units.len();
    let store = Arc::new(ResultStore::new());
    let barrier = Arc::new(CompletionBarrier::new(total));
    let scheduler = builder.build(Arc::clone(&store), Arc::clone(&barrier));

    info!(units = total, capacity = scheduler.capacity(), "starting batch");
    let started_at = Utc::now();

    for unit in units {
        // Refusals are recorded as failed outcomes and still count down the barrier.
        if let Err(e) = scheduler.submit_unit(unit) {
            warn!(error = %e, "submission refused");
        }
    }

    let cancel = cancel.fuse();
    tokio::pin!(cancel);
    let wait = barrier.wait();
    tokio::pin!(wait);
    let mut signals = 0u32;
    loop {
        tokio::select! {
            _ = &mut wait => break,
            Some(()) = cancel.next() => {
                signals += 1;
                if signals == 1 {
                    warn!(pending = barrier.remaining(), "batch cancelled; failing units not yet admitted");
                    scheduler.interrupt();
                } else {
                    warn!(pending = barrier.remaining(), "batch cancelled again; aborting running units");
                    scheduler.abort();
                }
            }
        }
    }

    let finished_at = Utc::now();
    scheduler.shutdown();
    scheduler.drain().await;

    let metrics = scheduler.metrics();
    info!(
        completed = metrics.completed,
        passed = metrics.passed,
        failed = metrics.failed,
        admission_backoffs = metrics.admission_backoffs,
        peak_in_flight = metrics.peak_in_flight,
        "batch finished"
    );

    BatchReport::new(started_at, finished_at, store.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Arity, DispatchRegistry, Handler, HandlerContext, HandlerError};
    use crate::handlers::register_builtin;
    use crate::monitor::{LoadSampler, ResourceSnapshot};
    use async_trait::async_trait;
    use harness_core::SchedulerConfig;
    use std::time::Duration;

    struct Calm;

    #[async_trait]
    impl LoadSampler for Calm {
        async fn sample(&self) -> ResourceSnapshot {
            ResourceSnapshot::new(1.0, 1.0)
        }
    }

    struct Busy;

    #[async_trait]
    impl LoadSampler for Busy {
        async fn sample(&self) -> ResourceSnapshot {
            ResourceSnapshot::new(100.0, 100.0)
        }
    }

    /// Never returns.
    struct Hangs;

    #[async_trait]
    impl Handler for Hangs {
        async fn run(&mut self, _args: &[String], _ctx: &mut HandlerContext) -> Result<bool, HandlerError> {
            std::future::pending().await
        }
    }

    fn builder(sampler: Arc<dyn LoadSampler>) -> SchedulerBuilder {
        let mut registry = DispatchRegistry::new();
        register_builtin(&mut registry).unwrap();
        registry.register_fn("pass", Arity::Any, |_, _| Ok(true)).unwrap();
        let config = SchedulerConfig {
            max_concurrency: 2,
            warmup_ms: 0,
            ..SchedulerConfig::default()
        };
        SchedulerBuilder::new(config, Arc::new(registry)).sampler(sampler)
    }

    #[tokio::test(start_paused = true)]
    async fn report_preserves_plan_order() {
        let units = vec![
            WorkUnit::new("slow", "sleep", vec!["3000".into()]),
            WorkUnit::new("quick", "pass", vec![]),
            WorkUnit::new("broken", "fail", vec![]),
        ];
        let report = run_batch(units, builder(Arc::new(Calm))).await;

        let names: Vec<&str> = report.entries.iter().map(|o| o.unit_name.as_str()).collect();
        assert_eq!(names, vec!["slow", "quick", "broken"]);
        assert_eq!(report.entries[0].duration_secs, 3);
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.total_unit_seconds, 3);
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let report = run_batch(vec![], builder(Arc::new(Calm))).await;
        assert!(report.entries.is_empty());
        assert!(report.summary.all_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_fails_units_stuck_in_admission() {
        let units = vec![
            WorkUnit::new("a", "pass", vec![]),
            WorkUnit::new("b", "pass", vec![]),
            WorkUnit::new("c", "pass", vec![]),
        ];
        let cancel = futures::stream::once(tokio::time::sleep(Duration::from_secs(60)));
        let report = run_batch_until(units, builder(Arc::new(Busy)), cancel).await;

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.failed, 3);
        let reasons: Vec<&str> = report
            .entries
            .iter()
            .filter_map(|o| o.error.as_deref())
            .collect();
        assert!(reasons.contains(&"interrupted during admission backoff"));
        assert!(reasons.contains(&"interrupted while waiting for a permit"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_cancel_aborts_hung_handlers() {
        let mut registry = DispatchRegistry::new();
        registry.register_fn("pass", Arity::Any, |_, _| Ok(true)).unwrap();
        registry
            .register_with("hangs", Arity::Any, || Ok(Box::new(Hangs) as Box<dyn Handler>))
            .unwrap();
        let config = SchedulerConfig {
            max_concurrency: 1,
            warmup_ms: 0,
            ..SchedulerConfig::default()
        };
        let builder = SchedulerBuilder::new(config, Arc::new(registry)).sampler(Arc::new(Calm));

        let units = vec![
            WorkUnit::new("hung", "hangs", vec![]),
            WorkUnit::new("queued", "pass", vec![]),
        ];
        let cancel = futures::stream::iter([10u64, 20])
            .then(|secs| tokio::time::sleep(Duration::from_secs(secs)));
        let report = run_batch_until(units, builder, cancel).await;

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(
            report.entries[0].error.as_deref(),
            Some("worker aborted before recording an outcome")
        );
        assert_eq!(
            report.entries[1].error.as_deref(),
            Some("interrupted while waiting for a permit")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_cancel_stream_still_waits() {
        let units = vec![WorkUnit::new("slow", "sleep", vec!["5000".into()])];
        let report = run_batch_until(units, builder(Arc::new(Calm)), futures::stream::empty()).await;
        assert_eq!(report.summary.passed, 1);
    }
}
