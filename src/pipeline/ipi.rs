//! Out-of-band inter-processor interrupts
//!
//! Three IPI vectors are set aside for the companion core, separate from
//! whatever the in-band kernel uses for its own cross-CPU signaling. They
//! are allocated once when the pipeline is built and never change.

use core::fmt;
use core::sync::atomic::{fence, Ordering};

use log::trace;

use crate::arch::Architecture;
use crate::error::{PipelineError, Result};
use crate::pipeline::Cpu;
use crate::types::{CpuId, IrqNumber, IRQ_SPACE};

/// Kinds of out-of-band IPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OobIpiKind {
    /// Run a function on the target's out-of-band stage
    CallFunction = 0,
    /// Ask the target's companion scheduler to reschedule
    Reschedule = 1,
    /// Out-of-band timer event
    Timer = 2,
}

impl OobIpiKind {
    /// All kinds, in vector order
    pub const ALL: [OobIpiKind; 3] = [
        OobIpiKind::CallFunction,
        OobIpiKind::Reschedule,
        OobIpiKind::Timer,
    ];

    /// Get kind name for debugging
    pub fn name(&self) -> &'static str {
        match self {
            OobIpiKind::CallFunction => "call_function",
            OobIpiKind::Reschedule => "reschedule",
            OobIpiKind::Timer => "timer",
        }
    }
}

impl fmt::Display for OobIpiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The three out-of-band IPI vectors, consecutive from a base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OobIpiVectors {
    base: IrqNumber,
}

impl OobIpiVectors {
    /// Place the vectors at `base..base + 3`, refusing any overlap with
    /// the in-band kernel's `reserved` vectors
    pub fn allocate(base: IrqNumber, reserved: &[IrqNumber]) -> Result<Self> {
        if base.index() + OobIpiKind::ALL.len() > IRQ_SPACE {
            return Err(PipelineError::IrqOutOfRange(base));
        }
        let vectors = Self { base };
        for kind in OobIpiKind::ALL {
            let vector = vectors.vector(kind);
            if reserved.contains(&vector) {
                return Err(PipelineError::VectorConflict(vector));
            }
        }
        Ok(vectors)
    }

    /// Vector for `kind`
    #[inline]
    pub fn vector(&self, kind: OobIpiKind) -> IrqNumber {
        IrqNumber(self.base.0 + kind as u32)
    }

    /// IPI kind carried by `irq`, if it is one of the vectors
    pub fn kind_of(&self, irq: IrqNumber) -> Option<OobIpiKind> {
        let offset = irq.0.checked_sub(self.base.0)?;
        OobIpiKind::ALL.get(offset as usize).copied()
    }

    /// Whether `irq` is one of the vectors
    #[inline]
    pub fn contains(&self, irq: IrqNumber) -> bool {
        self.kind_of(irq).is_some()
    }
}

/// Platform interrupt controller access for raising IPIs
pub trait IpiDelivery: Sync {
    /// Raise `vector` on `target`
    fn raise(&self, target: CpuId, vector: IrqNumber);
}

impl<'p, A: Architecture> Cpu<'p, A> {
    /// Signal the out-of-band stage of `target`
    ///
    /// State published before the call is visible to the target's
    /// handler. Delivery lands on the target's out-of-band stage no matter
    /// whether its in-band stage is stalled.
    pub fn send_oob_ipi(&self, target: CpuId, kind: OobIpiKind) -> Result<()> {
        self.pipeline.check_cpu(target)?;
        if self.pipeline.companion().is_none() {
            return Err(PipelineError::NoCompanion);
        }
        let vector = self.pipeline.vectors.vector(kind);
        fence(Ordering::SeqCst);
        self.pipeline.platform.ipi.raise(target, vector);
        self.state.counters.ipis_sent.inc();
        trace!("{}: {} ipi to {} on {}", self.id(), kind, target, vector);
        Ok(())
    }

    pub(crate) fn dispatch_oob_ipi(&self, kind: OobIpiKind) -> bool {
        let Some(companion) = self.pipeline.companion() else {
            return false;
        };
        // Pairs with the fence in send_oob_ipi()
        fence(Ordering::Acquire);
        self.state.counters.ipis_received.inc();
        companion.handle_oob_ipi(*self, kind);
        true
    }
}
