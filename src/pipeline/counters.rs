//! Per-CPU pipeline counters
//!
//! Every CPU keeps a small set of named event counters. They are updated
//! with relaxed atomics from interrupt context and read through
//! [`CounterSnapshot`] for diagnostics.

use core::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Counter Type
// ============================================================================

/// Named event counter (atomically updated)
#[derive(Debug)]
pub struct PipeCounter {
    value: AtomicU64,
    name: &'static str,
}

impl PipeCounter {
    /// Create a new counter
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    /// Increment counter by 1
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero
    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// Get counter name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Per-CPU Counter Set
// ============================================================================

/// Event counters for one CPU
#[derive(Debug)]
pub struct CpuCounters {
    /// Hardware IRQs entering the pipeline
    pub irqs: PipeCounter,
    /// IRQs classified as out-of-band events
    pub oob_irqs: PipeCounter,
    /// IRQs logged for in-band replay
    pub inband_logged: PipeCounter,
    /// Out-of-band IRQs deferred while the stage was stalled
    pub oob_deferred: PipeCounter,
    /// In-band IRQs replayed from the log
    pub inband_replayed: PipeCounter,
    /// Out-of-band IRQs replayed from the log
    pub oob_replayed: PipeCounter,
    /// In-band to out-of-band switches
    pub to_oob: PipeCounter,
    /// Out-of-band to in-band switches
    pub to_inband: PipeCounter,
    /// Synchronous traps seen
    pub traps: PipeCounter,
    /// Syscalls handled by the companion core
    pub syscalls_oob: PipeCounter,
    /// Out-of-band IPIs sent from this CPU
    pub ipis_sent: PipeCounter,
    /// Out-of-band IPIs handled on this CPU
    pub ipis_received: PipeCounter,
    /// Invariant violations detected
    pub violations: PipeCounter,
    /// IRQs dropped as spurious
    pub spurious: PipeCounter,
}

impl CpuCounters {
    /// Create a zeroed counter set
    pub const fn new() -> Self {
        Self {
            irqs: PipeCounter::new("irqs"),
            oob_irqs: PipeCounter::new("oob_irqs"),
            inband_logged: PipeCounter::new("inband_logged"),
            oob_deferred: PipeCounter::new("oob_deferred"),
            inband_replayed: PipeCounter::new("inband_replayed"),
            oob_replayed: PipeCounter::new("oob_replayed"),
            to_oob: PipeCounter::new("to_oob"),
            to_inband: PipeCounter::new("to_inband"),
            traps: PipeCounter::new("traps"),
            syscalls_oob: PipeCounter::new("syscalls_oob"),
            ipis_sent: PipeCounter::new("ipis_sent"),
            ipis_received: PipeCounter::new("ipis_received"),
            violations: PipeCounter::new("violations"),
            spurious: PipeCounter::new("spurious"),
        }
    }

    /// All counters, for iteration
    pub fn all(&self) -> [&PipeCounter; 14] {
        [
            &self.irqs,
            &self.oob_irqs,
            &self.inband_logged,
            &self.oob_deferred,
            &self.inband_replayed,
            &self.oob_replayed,
            &self.to_oob,
            &self.to_inband,
            &self.traps,
            &self.syscalls_oob,
            &self.ipis_sent,
            &self.ipis_received,
            &self.violations,
            &self.spurious,
        ]
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        for counter in self.all() {
            counter.reset();
        }
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            irqs: self.irqs.get(),
            oob_irqs: self.oob_irqs.get(),
            inband_logged: self.inband_logged.get(),
            oob_deferred: self.oob_deferred.get(),
            inband_replayed: self.inband_replayed.get(),
            oob_replayed: self.oob_replayed.get(),
            to_oob: self.to_oob.get(),
            to_inband: self.to_inband.get(),
            traps: self.traps.get(),
            syscalls_oob: self.syscalls_oob.get(),
            ipis_sent: self.ipis_sent.get(),
            ipis_received: self.ipis_received.get(),
            violations: self.violations.get(),
            spurious: self.spurious.get(),
        }
    }
}

impl Default for CpuCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a CPU's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub irqs: u64,
    pub oob_irqs: u64,
    pub inband_logged: u64,
    pub oob_deferred: u64,
    pub inband_replayed: u64,
    pub oob_replayed: u64,
    pub to_oob: u64,
    pub to_inband: u64,
    pub traps: u64,
    pub syscalls_oob: u64,
    pub ipis_sent: u64,
    pub ipis_received: u64,
    pub violations: u64,
    pub spurious: u64,
}
