use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit};
use tracing::info;

use crate::scheduler::types::SchedulerEvent;

use super::core::Shared;

/// Why a unit never reached its handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("interrupted while waiting for a permit")]
    InterruptedAwaitingPermit,
    #[error("interrupted during admission backoff")]
    InterruptedBackoff,
    #[error("permit pool closed")]
    PoolClosed,
    #[error("no free worker slot")]
    NoSlot,
    #[error("host still overloaded after {0} admission attempts")]
    Overloaded(u32),
}

/// Resolves once the interrupt flag is raised.
pub(super) async fn interrupted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can interrupt us any more.
            std::future::pending::<()>().await;
        }
    }
}

impl Shared {
    /// Block until a permit is free. The permit is released when dropped.
    pub(super) async fn acquire_permit(
        &self,
        interrupt: &mut watch::Receiver<bool>,
    ) -> Result<OwnedSemaphorePermit, AdmissionError> {
        tokio::select! {
            biased;
            _ = interrupted(interrupt) => Err(AdmissionError::InterruptedAwaitingPermit),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| AdmissionError::PoolClosed)
            }
        }
    }

    /// Sample host load until it is under both thresholds, sleeping the
    /// backoff interval between overloaded samples. Returns the number of
    /// samples taken.
    pub(super) async fn admit(
        &self,
        unit: &str,
        interrupt: &mut watch::Receiver<bool>,
    ) -> Result<u32, AdmissionError> {
        let config = &self.config;
        let mut attempts = 0u32;

        loop {
            let snapshot = tokio::select! {
                biased;
                _ = interrupted(interrupt) => return Err(AdmissionError::InterruptedBackoff),
                snapshot = self.sampler.sample() => snapshot,
            };
            attempts += 1;

            if snapshot.is_acceptable(config.cpu_threshold, config.memory_threshold) {
                return Ok(attempts);
            }

            if let Some(max) = config.max_admission_attempts {
                if attempts >= max {
                    return Err(AdmissionError::Overloaded(attempts));
                }
            }

            if let Ok(mut m) = self.metrics.write() {
                m.admission_backoffs += 1;
            }
            info!(
                unit,
                attempt = attempts,
                cpu = snapshot.cpu.effective(),
                memory = snapshot.memory_percent,
                backoff_ms = config.backoff_ms,
                "high cpu or memory utilization, backing off"
            );
            self.emit(SchedulerEvent::Backoff {
                unit: unit.to_string(),
                attempt: attempts,
                snapshot,
            });

            tokio::select! {
                biased;
                _ = interrupted(interrupt) => return Err(AdmissionError::InterruptedBackoff),
                _ = tokio::time::sleep(config.backoff()) => {}
            }
        }
    }
}
