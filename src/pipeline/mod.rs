//! The dual-stage interrupt pipeline
//!
//! A [`Pipeline`] owns the state of every CPU it manages and the
//! registrations shared between them: which IRQ lines belong to the
//! out-of-band stage, where the out-of-band IPI vectors live, and which
//! collaborators to call. Code running on a CPU works through a [`Cpu`]
//! handle, which carries the virtual mask, stage control and trap
//! routing operations.
//!
//! ## Lifecycle
//!
//! 1. [`Pipeline::new`] validates the configuration and allocates vectors.
//! 2. [`Pipeline::attach_companion`] registers the out-of-band core.
//! 3. [`Pipeline::activate`] switches the in-band irqflags API from the
//!    hardware mask to the virtual one.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Vec;
use log::{debug, info};
use spin::Once;

use crate::arch::{Architecture, NativeArch};
use crate::config::{PipelineConfig, MAX_CPUS};
use crate::error::{PipelineError, Result};
use crate::types::{CpuId, IrqNumber, Stage};

pub mod companion;
pub mod counters;
pub mod ipi;
pub mod irqset;
pub mod percpu;
mod stage;
mod stall;

pub use companion::{
    CompanionCore, FpuState, FpuUnit, InbandKernel, LazyFpuSwitch, NoSwitchHooks, SwitchHooks,
};
pub use counters::{CounterSnapshot, CpuCounters, PipeCounter};
pub use ipi::{IpiDelivery, OobIpiKind, OobIpiVectors};
pub use irqset::IrqSet;
pub use percpu::{PerCpu, StallFlags, TrapFrame, MAX_TRAP_NESTING};

// ============================================================================
// Platform Collaborators
// ============================================================================

/// In-kernel collaborators the pipeline calls into
pub struct Platform<A: Architecture = NativeArch> {
    /// In-band IRQ entry
    pub inband: &'static dyn InbandKernel<A>,
    /// IPI raising
    pub ipi: &'static dyn IpiDelivery,
    /// Stage switch hooks
    pub hooks: &'static dyn SwitchHooks,
}

impl<A: Architecture> Platform<A> {
    /// Collaborators with no-op switch hooks
    pub fn new(inband: &'static dyn InbandKernel<A>, ipi: &'static dyn IpiDelivery) -> Self {
        Self {
            inband,
            ipi,
            hooks: &NoSwitchHooks,
        }
    }

    /// Use `hooks` around stage switches
    pub fn with_hooks(mut self, hooks: &'static dyn SwitchHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl<A: Architecture> Clone for Platform<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Architecture> Copy for Platform<A> {}

// ============================================================================
// Pipeline
// ============================================================================

/// Interrupt pipeline for a set of CPUs
pub struct Pipeline<A: Architecture = NativeArch> {
    pub(crate) config: PipelineConfig,
    pub(crate) cpus: Vec<PerCpu, MAX_CPUS>,
    pub(crate) vectors: OobIpiVectors,
    /// Lines owned by the out-of-band stage
    oob_irqs: IrqSet,
    active: AtomicBool,
    pub(crate) platform: Platform<A>,
    companion: Once<&'static dyn CompanionCore<A>>,
}

impl<A: Architecture> Pipeline<A> {
    /// Build an inactive pipeline
    pub fn new(config: PipelineConfig, platform: Platform<A>) -> Result<Self> {
        config.validate()?;
        let base = config.oob_ipi_base.unwrap_or(A::OOB_IPI_BASE);
        let vectors = OobIpiVectors::allocate(base, &config.inband_ipi_vectors)?;
        if let Some(tick) = config.tick_irq.filter(|&tick| vectors.contains(tick)) {
            return Err(PipelineError::ReservedIrq(tick));
        }

        let mut cpus = Vec::new();
        for n in 0..config.nr_cpus {
            cpus.push(PerCpu::new(CpuId(n)))
                .map_err(|_| PipelineError::TooManyCpus {
                    requested: config.nr_cpus,
                    max: MAX_CPUS,
                })?;
        }

        info!(
            "irq pipeline: {} cpu(s) on {}, oob ipis at {}..={}",
            config.nr_cpus,
            A::NAME,
            vectors.vector(OobIpiKind::CallFunction),
            vectors.vector(OobIpiKind::Timer),
        );

        Ok(Self {
            config,
            cpus,
            vectors,
            oob_irqs: IrqSet::new(),
            active: AtomicBool::new(false),
            platform,
            companion: Once::new(),
        })
    }

    /// Start diverting IRQs through the pipeline
    ///
    /// Counters restart from zero on the first activation.
    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            for cpu in &self.cpus {
                cpu.counters.reset();
            }
            info!("irq pipeline: active");
        }
    }

    /// Whether the pipeline is active
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Register the companion core; only one may ever attach
    pub fn attach_companion(&self, companion: &'static dyn CompanionCore<A>) -> Result<()> {
        let mut attached = false;
        self.companion.call_once(|| {
            attached = true;
            companion
        });
        if attached {
            info!("irq pipeline: companion core attached");
            Ok(())
        } else {
            Err(PipelineError::CompanionAttached)
        }
    }

    /// The attached companion core
    #[inline]
    pub fn companion(&self) -> Option<&'static dyn CompanionCore<A>> {
        self.companion.get().copied()
    }

    /// Handle for `id`
    pub fn cpu(&self, id: CpuId) -> Result<Cpu<'_, A>> {
        self.cpus
            .get(id.0)
            .map(|state| Cpu {
                pipeline: self,
                state,
            })
            .ok_or(PipelineError::NoSuchCpu(id))
    }

    /// Handles for every managed CPU
    pub fn cpus(&self) -> impl Iterator<Item = Cpu<'_, A>> + '_ {
        self.cpus.iter().map(move |state| Cpu {
            pipeline: self,
            state,
        })
    }

    /// Number of managed CPUs
    pub fn nr_cpus(&self) -> usize {
        self.cpus.len()
    }

    pub(crate) fn check_cpu(&self, id: CpuId) -> Result<()> {
        if id.0 < self.cpus.len() {
            Ok(())
        } else {
            Err(PipelineError::NoSuchCpu(id))
        }
    }

    /// Hand `irq` to the out-of-band stage
    pub fn set_oob_irq(&self, irq: IrqNumber) -> Result<()> {
        self.check_oob_line(irq)?;
        if self.oob_irqs.post(irq) {
            debug!("irq pipeline: {} now out-of-band", irq);
        }
        Ok(())
    }

    /// Return `irq` to the in-band stage
    pub fn clear_oob_irq(&self, irq: IrqNumber) -> Result<()> {
        self.check_oob_line(irq)?;
        if self.oob_irqs.remove(irq) {
            debug!("irq pipeline: {} back in-band", irq);
        }
        Ok(())
    }

    /// Whether `irq` is owned by the out-of-band stage
    #[inline]
    pub fn is_oob_irq(&self, irq: IrqNumber) -> bool {
        self.oob_irqs.contains(irq)
    }

    fn check_oob_line(&self, irq: IrqNumber) -> Result<()> {
        if self.companion().is_none() {
            return Err(PipelineError::NoCompanion);
        }
        if !irq.in_range() {
            return Err(PipelineError::IrqOutOfRange(irq));
        }
        if self.vectors.contains(irq) {
            return Err(PipelineError::ReservedIrq(irq));
        }
        Ok(())
    }

    /// The out-of-band IPI vectors
    pub fn ipi_vectors(&self) -> OobIpiVectors {
        self.vectors
    }

    /// Boot configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<A: Architecture> fmt::Debug for Pipeline<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("arch", &A::NAME)
            .field("nr_cpus", &self.cpus.len())
            .field("active", &self.is_active())
            .field("companion", &self.companion.is_completed())
            .field("vectors", &self.vectors)
            .finish()
    }
}

// ============================================================================
// CPU Handle
// ============================================================================

/// Handle to one CPU's pipeline state
///
/// Operations on a handle must run on the CPU it names.
pub struct Cpu<'p, A: Architecture = NativeArch> {
    pub(crate) pipeline: &'p Pipeline<A>,
    pub(crate) state: &'p PerCpu,
}

impl<'p, A: Architecture> Clone for Cpu<'p, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'p, A: Architecture> Copy for Cpu<'p, A> {}

impl<'p, A: Architecture> fmt::Debug for Cpu<'p, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("id", &self.id())
            .field("stage", &self.current_stage())
            .field("inband_stalled", &self.is_stalled(Stage::InBand))
            .field("oob_stalled", &self.is_stalled(Stage::OutOfBand))
            .field("inband_pending", &self.state.inband_pending.len())
            .field("oob_pending", &self.state.oob_pending.len())
            .finish()
    }
}

impl<'p, A: Architecture> Cpu<'p, A> {
    /// CPU identifier
    #[inline]
    pub fn id(&self) -> CpuId {
        self.state.id()
    }

    /// Pipeline this CPU belongs to
    #[inline]
    pub fn pipeline(&self) -> &'p Pipeline<A> {
        self.pipeline
    }

    /// Raw per-CPU state
    #[inline]
    pub fn state(&self) -> &'p PerCpu {
        self.state
    }

    /// Live event counters
    #[inline]
    pub fn counters(&self) -> &'p CpuCounters {
        &self.state.counters
    }

    /// Whether IRQs are logged for `stage`
    pub fn has_pending(&self, stage: Stage) -> bool {
        match stage {
            Stage::InBand => !self.state.inband_pending.is_empty(),
            Stage::OutOfBand => !self.state.oob_pending.is_empty(),
        }
    }

    /// Number of traps in flight
    pub fn trap_depth(&self) -> usize {
        self.state.trap_depth()
    }
}
