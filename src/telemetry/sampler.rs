//! Host telemetry sampling.
//!
//! Raw OS counters are noisy and occasionally unavailable. The sampler reads
//! them through a [`SystemProbe`], degrades missing readings to zero, and
//! smooths each metric with its own [`EmaState`].

use std::time::Instant;

use sysinfo::{Networks, Pid, System};

use crate::telemetry::smoothing::{EmaState, DEFAULT_TIME_CONSTANT_SECS};
use crate::telemetry::tune::SystemSnapshot;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Memory totals in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Cumulative system-wide network byte counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

impl NetworkCounters {
    pub fn total(&self) -> u64 {
        self.bytes_sent.saturating_add(self.bytes_recv)
    }
}

/// Source of OS counters. Every reading is best-effort.
pub trait SystemProbe: Send {
    fn logical_cpu_count(&self) -> usize;

    fn memory_stats(&mut self) -> Option<MemoryStats>;

    fn network_counters(&mut self) -> Option<NetworkCounters>;

    /// Global CPU utilization in percent (0-100).
    fn cpu_percent(&mut self) -> Option<f64>;

    /// Memory utilization in percent (0-100).
    fn mem_percent(&mut self) -> Option<f64>;

    /// Threads in this process, where the platform reports it.
    fn thread_count(&mut self) -> Option<usize> {
        None
    }

    /// Point-in-time snapshot for the auto-tuner.
    fn snapshot(&mut self) -> SystemSnapshot {
        let memory = self.memory_stats();
        SystemSnapshot {
            logical_cpu_count: self.logical_cpu_count(),
            total_memory_bytes: memory.map(|m| m.total_bytes).filter(|b| *b > 0),
            available_memory_bytes: memory.map(|m| m.available_bytes).filter(|b| *b > 0),
        }
    }
}

/// [`SystemProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    networks: Networks,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime CPU usage so the next refresh has a baseline.
        system.refresh_cpu();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn logical_cpu_count(&self) -> usize {
        num_cpus::get()
    }

    fn memory_stats(&mut self) -> Option<MemoryStats> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(MemoryStats {
            total_bytes: total,
            available_bytes: self.system.available_memory(),
        })
    }

    fn network_counters(&mut self) -> Option<NetworkCounters> {
        self.networks.refresh();
        let mut counters = NetworkCounters::default();
        for (_name, data) in self.networks.iter() {
            counters.bytes_sent = counters.bytes_sent.saturating_add(data.total_transmitted());
            counters.bytes_recv = counters.bytes_recv.saturating_add(data.total_received());
        }
        Some(counters)
    }

    fn cpu_percent(&mut self) -> Option<f64> {
        self.system.refresh_cpu();
        let usage = self.system.global_cpu_info().cpu_usage() as f64;
        usage.is_finite().then_some(usage.clamp(0.0, 100.0))
    }

    fn mem_percent(&mut self) -> Option<f64> {
        let memory = self.memory_stats()?;
        let used = memory.total_bytes.saturating_sub(memory.available_bytes);
        Some(used as f64 / memory.total_bytes as f64 * 100.0)
    }

    fn thread_count(&mut self) -> Option<usize> {
        let pid = self.pid?;
        self.system.refresh_process(pid);
        self.system.process(pid)?.tasks().map(|tasks| tasks.len())
    }
}

/// Smoothed host readings for display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryReading {
    /// System network throughput (send + receive) in MiB/s.
    pub net_mib_per_sec: f64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Periodic sampler owning one EMA per metric.
pub struct TelemetrySampler<P: SystemProbe> {
    probe: P,
    net: EmaState,
    cpu: EmaState,
    mem: EmaState,
    prev_net: Option<(NetworkCounters, Instant)>,
}

impl<P: SystemProbe> TelemetrySampler<P> {
    pub fn new(probe: P) -> Self {
        Self::with_time_constant(probe, DEFAULT_TIME_CONSTANT_SECS)
    }

    pub fn with_time_constant(probe: P, tau_secs: f64) -> Self {
        Self {
            probe,
            net: EmaState::new(tau_secs),
            cpu: EmaState::new(tau_secs),
            mem: EmaState::new(tau_secs),
            prev_net: None,
        }
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    pub fn sample(&mut self) -> TelemetryReading {
        self.sample_at(Instant::now())
    }

    /// Take one sample at `now`.
    pub fn sample_at(&mut self, now: Instant) -> TelemetryReading {
        TelemetryReading {
            net_mib_per_sec: self.sample_network(now),
            cpu_percent: match self.probe.cpu_percent() {
                Some(pct) => self.cpu.update(pct, now),
                None => 0.0,
            },
            mem_percent: match self.probe.mem_percent() {
                Some(pct) => self.mem.update(pct, now),
                None => 0.0,
            },
        }
    }

    fn sample_network(&mut self, now: Instant) -> f64 {
        let Some(counters) = self.probe.network_counters() else {
            self.prev_net = None;
            return 0.0;
        };

        let previous = self.prev_net.replace((counters, now));
        let Some((prev_counters, prev_time)) = previous else {
            // First reading only establishes the baseline.
            return self.net.value();
        };

        let dt = now.saturating_duration_since(prev_time).as_secs_f64();
        if dt <= 0.0 {
            return self.net.value();
        }
        let delta = counters.total().saturating_sub(prev_counters.total());
        let instant_rate = delta as f64 / BYTES_PER_MIB / dt;
        self.net.update(instant_rate, now)
    }
}
