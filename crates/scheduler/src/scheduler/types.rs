use serde::Serialize;

use crate::monitor::ResourceSnapshot;

/// Structured lifecycle events, broadcast to any subscriber (report sinks,
/// progress displays). Sending never blocks the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    Submitted {
        unit: String,
        handler: String,
    },
    /// Host was over threshold; the unit sleeps before resampling.
    Backoff {
        unit: String,
        attempt: u32,
        snapshot: ResourceSnapshot,
    },
    Admitted {
        unit: String,
        attempts: u32,
        slot: usize,
    },
    Finished {
        unit: String,
        passed: bool,
        duration_secs: u64,
        error: Option<String>,
    },
    /// Submission refused because the scheduler is shut down.
    Rejected {
        unit: String,
        reason: String,
    },
}

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub passed: u64,
    pub failed: u64,
    /// Total overloaded samples across all units.
    pub admission_backoffs: u64,
    /// Units currently inside their handler.
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl SchedulerMetrics {
    pub fn record_start(&mut self) {
        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
    }

    pub fn record_end(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn record_outcome(&mut self, passed: bool) {
        self.completed += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_high_water_mark() {
        let mut m = SchedulerMetrics::default();
        m.record_start();
        m.record_start();
        m.record_end();
        m.record_start();
        m.record_end();
        m.record_end();
        m.record_end();
        assert_eq!(m.in_flight, 0);
        assert_eq!(m.peak_in_flight, 2);
    }

    #[test]
    fn outcome_counts() {
        let mut m = SchedulerMetrics::default();
        m.record_outcome(true);
        m.record_outcome(false);
        m.record_outcome(true);
        assert_eq!((m.completed, m.passed, m.failed), (3, 2, 1));
    }

    #[test]
    fn events_serialize_tagged() {
        let e = SchedulerEvent::Admitted {
            unit: "TestCase1".into(),
            attempts: 2,
            slot: 0,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["event"], "admitted");
        assert_eq!(json["attempts"], 2);
    }
}
