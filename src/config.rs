//! Pipeline configuration
//!
//! Everything here is fixed at boot: the CPU count, which IRQ carries the
//! periodic tick, where the out-of-band IPI vectors live, and how broken
//! invariants are handled.

use heapless::Vec;

use crate::error::{PipelineError, Result};
use crate::types::{IrqNumber, IRQ_SPACE};

/// Maximum number of CPUs a pipeline can manage
pub const MAX_CPUS: usize = 64;

/// Maximum number of in-band IPI vectors that can be reserved
pub const MAX_RESERVED_VECTORS: usize = 16;

// ============================================================================
// Invariant Policy
// ============================================================================

/// What to do when a pipeline invariant is found broken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantPolicy {
    /// Fail fast
    Panic,
    /// Log, count, and force the CPU back to the in-band stage
    Recover,
}

impl InvariantPolicy {
    /// Panic in debug builds, recover in release builds
    pub const fn for_build() -> Self {
        if cfg!(debug_assertions) {
            InvariantPolicy::Panic
        } else {
            InvariantPolicy::Recover
        }
    }
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        Self::for_build()
    }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Boot-time pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of logical CPUs
    pub nr_cpus: usize,
    /// IRQ carrying the per-CPU periodic tick, if the companion may steal it
    pub tick_irq: Option<IrqNumber>,
    /// Handling of broken invariants
    pub invariant_policy: InvariantPolicy,
    /// First out-of-band IPI vector; the architecture default when `None`
    pub oob_ipi_base: Option<IrqNumber>,
    /// Vectors already used by the in-band kernel's own IPIs
    pub inband_ipi_vectors: Vec<IrqNumber, MAX_RESERVED_VECTORS>,
}

impl PipelineConfig {
    /// Configuration for `nr_cpus` CPUs with defaults everywhere else
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            nr_cpus,
            tick_irq: None,
            invariant_policy: InvariantPolicy::for_build(),
            oob_ipi_base: None,
            inband_ipi_vectors: Vec::new(),
        }
    }

    /// Set the tick IRQ
    pub fn with_tick_irq(mut self, irq: IrqNumber) -> Self {
        self.tick_irq = Some(irq);
        self
    }

    /// Set the invariant policy
    pub fn with_policy(mut self, policy: InvariantPolicy) -> Self {
        self.invariant_policy = policy;
        self
    }

    /// Override the architecture's out-of-band IPI base vector
    pub fn with_oob_ipi_base(mut self, base: IrqNumber) -> Self {
        self.oob_ipi_base = Some(base);
        self
    }

    /// Record a vector used by the in-band kernel's IPIs
    pub fn reserve_inband_vector(mut self, irq: IrqNumber) -> Result<Self> {
        if !irq.in_range() {
            return Err(PipelineError::IrqOutOfRange(irq));
        }
        if !self.inband_ipi_vectors.contains(&irq) {
            self.inband_ipi_vectors
                .push(irq)
                .map_err(|_| PipelineError::TooManyReservedVectors)?;
        }
        Ok(self)
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.nr_cpus == 0 {
            return Err(PipelineError::NoCpus);
        }
        if self.nr_cpus > MAX_CPUS {
            return Err(PipelineError::TooManyCpus {
                requested: self.nr_cpus,
                max: MAX_CPUS,
            });
        }
        if let Some(tick) = self.tick_irq {
            if !tick.in_range() {
                return Err(PipelineError::IrqOutOfRange(tick));
            }
        }
        if let Some(base) = self.oob_ipi_base {
            // Three consecutive vectors must fit
            if base.index() + 3 > IRQ_SPACE {
                return Err(PipelineError::IrqOutOfRange(base));
            }
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
