//! Host load sampling used by admission control.
//!
//! CPU load is derived from the delta between two aggregate tick snapshots
//! (`/proc/stat` on Linux), so the monitor keeps the previous snapshot and
//! serializes samples behind a mutex. Hosts without tick counters fall back to
//! the `sysinfo` CPU usage. Memory utilization comes from `sysinfo`.
//! Every failure mode degrades to "load unknown", which admission treats as safe.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::debug;

// ── Snapshot types ──────────────────────────────────────────────────

/// CPU load as observed by one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CpuLoad {
    /// No previous tick snapshot to compare against, or ticks unavailable.
    Unknown,
    Percent(f64),
}

impl CpuLoad {
    /// Load used for admission decisions; unknown counts as idle.
    pub fn effective(&self) -> f64 {
        match self {
            CpuLoad::Unknown => 0.0,
            CpuLoad::Percent(p) => *p,
        }
    }
}

/// Point-in-time view of host load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu: CpuLoad,
    /// Percentage of physical memory in use, 0 when unknown.
    pub memory_percent: f64,
}

impl ResourceSnapshot {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu: CpuLoad::Percent(cpu_percent),
            memory_percent,
        }
    }

    pub fn unknown() -> Self {
        Self {
            cpu: CpuLoad::Unknown,
            memory_percent: 0.0,
        }
    }

    /// Both CPU and memory strictly below their thresholds.
    pub fn is_acceptable(&self, cpu_threshold: f64, memory_threshold: f64) -> bool {
        self.cpu.effective() < cpu_threshold && self.memory_percent < memory_threshold
    }
}

/// Aggregate CPU tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    /// Ticks spent in any non-idle mode.
    pub busy: u64,
    /// All ticks, idle included.
    pub total: u64,
}

impl CpuTicks {
    /// Parse the aggregate `cpu` line of `/proc/stat`.
    /// Format: "cpu  user nice system idle iowait irq softirq steal ..."
    pub fn parse_proc_stat_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        if parts.next()? != "cpu" {
            return None;
        }
        let fields: Vec<u64> = parts.take(8).map(|p| p.parse().ok()).collect::<Option<_>>()?;
        if fields.len() < 4 {
            return None;
        }
        let total: u64 = fields.iter().sum();
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    /// Utilization percentage implied by the ticks elapsed since `prev`.
    pub fn load_since(&self, prev: &CpuTicks) -> f64 {
        let total_delta = self.total.saturating_sub(prev.total);
        if total_delta == 0 {
            return 0.0;
        }
        let busy_delta = self.busy.saturating_sub(prev.busy);
        (busy_delta as f64 / total_delta as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Physical memory totals in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub total: u64,
    pub available: u64,
}

impl MemoryReading {
    pub fn utilization_percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let used = 100.0 - (self.available as f64 / self.total as f64 * 100.0);
        Some(used.clamp(0.0, 100.0))
    }
}

// ── Probes ──────────────────────────────────────────────────────────

/// Raw measurement source behind the monitor.
pub trait SystemProbe: Send {
    fn cpu_ticks(&mut self) -> Option<CpuTicks>;
    fn memory(&mut self) -> Option<MemoryReading>;

    /// Utilization since the previous call, for probes without tick counters.
    /// Only consulted when [`cpu_ticks`](Self::cpu_ticks) returns `None`.
    fn cpu_usage(&mut self) -> Option<f64> {
        None
    }
}

/// Probe reading the real host.
pub struct HostProbe {
    system: System,
    /// `sysinfo` needs one refresh before usage means anything.
    cpu_primed: bool,
}

impl HostProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            cpu_primed: false,
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn cpu_ticks(&mut self) -> Option<CpuTicks> {
        let content = std::fs::read_to_string("/proc/stat").ok()?;
        content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .and_then(CpuTicks::parse_proc_stat_line)
    }

    fn memory(&mut self) -> Option<MemoryReading> {
        self.system.refresh_memory();
        let reading = MemoryReading {
            total: self.system.total_memory(),
            available: self.system.available_memory(),
        };
        (reading.total > 0).then_some(reading)
    }

    fn cpu_usage(&mut self) -> Option<f64> {
        self.system.refresh_cpu();
        if !self.cpu_primed {
            self.cpu_primed = true;
            return None;
        }
        let usage = self.system.global_cpu_info().cpu_usage() as f64;
        usage.is_finite().then(|| usage.clamp(0.0, 100.0))
    }
}

// ── Sampler ─────────────────────────────────────────────────────────

/// Anything admission control can ask for the current host load.
#[async_trait]
pub trait LoadSampler: Send + Sync {
    async fn sample(&self) -> ResourceSnapshot;
}

struct MonitorState {
    probe: Box<dyn SystemProbe>,
    prev_ticks: Option<CpuTicks>,
}

/// Tick-delta resource monitor. One instance per scheduler.
pub struct ResourceMonitor {
    state: Mutex<MonitorState>,
    warmup: Duration,
}

impl ResourceMonitor {
    pub fn new(probe: Box<dyn SystemProbe>, warmup: Duration) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                probe,
                prev_ticks: None,
            }),
            warmup,
        }
    }

    /// Monitor over the real host.
    pub fn host(warmup: Duration) -> Self {
        Self::new(Box::new(HostProbe::new()), warmup)
    }
}

#[async_trait]
impl LoadSampler for ResourceMonitor {
    async fn sample(&self) -> ResourceSnapshot {
        let mut state = self.state.lock().await;
        tokio::time::sleep(self.warmup).await;

        let cpu = match state.probe.cpu_ticks() {
            Some(now) => {
                let cpu = match state.prev_ticks {
                    Some(prev) => CpuLoad::Percent(now.load_since(&prev)),
                    None => CpuLoad::Unknown,
                };
                state.prev_ticks = Some(now);
                cpu
            }
            None => state
                .probe
                .cpu_usage()
                .map(CpuLoad::Percent)
                .unwrap_or(CpuLoad::Unknown),
        };

        let memory_percent = match state.probe.memory().and_then(|m| m.utilization_percent()) {
            Some(pct) => pct,
            None => {
                debug!("memory reading unavailable, treating as idle");
                0.0
            }
        };

        let snapshot = ResourceSnapshot {
            cpu,
            memory_percent,
        };
        debug!(cpu = ?snapshot.cpu, memory = snapshot.memory_percent, "resource sample");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedProbe {
        ticks: VecDeque<Option<CpuTicks>>,
        usage: VecDeque<Option<f64>>,
        memory: Option<MemoryReading>,
    }

    impl SystemProbe for ScriptedProbe {
        fn cpu_ticks(&mut self) -> Option<CpuTicks> {
            self.ticks.pop_front().flatten()
        }
        fn memory(&mut self) -> Option<MemoryReading> {
            self.memory
        }
        fn cpu_usage(&mut self) -> Option<f64> {
            self.usage.pop_front().flatten()
        }
    }

    fn ticks(busy: u64, total: u64) -> Option<CpuTicks> {
        Some(CpuTicks { busy, total })
    }

    #[test]
    fn parse_aggregate_cpu_line() {
        let t = CpuTicks::parse_proc_stat_line("cpu  100 0 50 800 50 0 0 0 0 0").unwrap();
        assert_eq!(t.total, 1000);
        assert_eq!(t.busy, 150);
    }

    #[test]
    fn parse_rejects_per_core_and_garbage() {
        assert!(CpuTicks::parse_proc_stat_line("cpu0 1 2 3 4").is_none());
        assert!(CpuTicks::parse_proc_stat_line("intr 12345").is_none());
        assert!(CpuTicks::parse_proc_stat_line("cpu 1 2 x 4").is_none());
        assert!(CpuTicks::parse_proc_stat_line("cpu 1 2").is_none());
    }

    #[test]
    fn load_since_delta() {
        let prev = CpuTicks { busy: 100, total: 1000 };
        let now = CpuTicks { busy: 400, total: 2000 };
        assert!((now.load_since(&prev) - 30.0).abs() < 1e-9);
        assert_eq!(prev.load_since(&prev), 0.0);
    }

    #[test]
    fn memory_utilization() {
        let m = MemoryReading { total: 1000, available: 250 };
        assert!((m.utilization_percent().unwrap() - 75.0).abs() < 1e-9);
        assert!(MemoryReading { total: 0, available: 0 }.utilization_percent().is_none());
    }

    #[test]
    fn thresholds_are_strict() {
        assert!(ResourceSnapshot::new(79.9, 94.9).is_acceptable(80.0, 95.0));
        assert!(!ResourceSnapshot::new(80.0, 10.0).is_acceptable(80.0, 95.0));
        assert!(!ResourceSnapshot::new(10.0, 95.0).is_acceptable(80.0, 95.0));
        assert!(ResourceSnapshot::unknown().is_acceptable(80.0, 95.0));
    }

    #[tokio::test(start_paused = true)]
    async fn first_sample_is_unknown_then_delta() {
        let probe = ScriptedProbe {
            ticks: VecDeque::from(vec![ticks(0, 1000), ticks(900, 2000)]),
            memory: Some(MemoryReading { total: 100, available: 60 }),
            ..Default::default()
        };
        let monitor = ResourceMonitor::new(Box::new(probe), Duration::from_secs(2));

        let first = monitor.sample().await;
        assert_eq!(first.cpu, CpuLoad::Unknown);
        assert_eq!(first.cpu.effective(), 0.0);
        assert!((first.memory_percent - 40.0).abs() < 1e-9);

        let second = monitor.sample().await;
        assert_eq!(second.cpu, CpuLoad::Percent(90.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_sources_are_safe() {
        let probe = ScriptedProbe::default();
        let monitor = ResourceMonitor::new(Box::new(probe), Duration::from_secs(2));
        for _ in 0..3 {
            let snap = monitor.sample().await;
            assert_eq!(snap, ResourceSnapshot::unknown());
            assert!(snap.is_acceptable(80.0, 95.0));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn usage_fallback_without_tick_counters() {
        let probe = ScriptedProbe {
            usage: VecDeque::from(vec![None, Some(91.5), Some(20.0)]),
            ..Default::default()
        };
        let monitor = ResourceMonitor::new(Box::new(probe), Duration::ZERO);

        assert_eq!(monitor.sample().await.cpu, CpuLoad::Unknown);
        let busy = monitor.sample().await;
        assert_eq!(busy.cpu, CpuLoad::Percent(91.5));
        assert!(!busy.is_acceptable(80.0, 95.0));
        assert_eq!(monitor.sample().await.cpu, CpuLoad::Percent(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_counters_take_precedence_over_usage() {
        let probe = ScriptedProbe {
            ticks: VecDeque::from(vec![ticks(0, 1000), ticks(100, 2000)]),
            usage: VecDeque::from(vec![Some(99.0), Some(99.0)]),
            ..Default::default()
        };
        let monitor = ResourceMonitor::new(Box::new(probe), Duration::ZERO);

        assert_eq!(monitor.sample().await.cpu, CpuLoad::Unknown);
        assert_eq!(monitor.sample().await.cpu, CpuLoad::Percent(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn sample_waits_for_warmup() {
        let probe = ScriptedProbe::default();
        let monitor = ResourceMonitor::new(Box::new(probe), Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        monitor.sample().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
