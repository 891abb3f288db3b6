//! Per-CPU pipeline state
//!
//! One [`PerCpu`] exists for every logical CPU the pipeline manages. It is
//! only ever mutated by code running on that CPU, with hard interrupts
//! masked around read-modify-write sequences that span several fields.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use heapless::Vec;
use spin::Mutex;

use crate::arch::{hard_local_irq_restore, hard_local_irq_save, ArchFlagBridge};
use crate::pipeline::counters::CpuCounters;
use crate::pipeline::irqset::IrqSet;
use crate::types::{CpuId, Stage, TrapNumber};

/// Deepest trap nesting tracked frame by frame
pub const MAX_TRAP_NESTING: usize = 8;

// ============================================================================
// Stall Flags
// ============================================================================

/// The two per-stage stall bits of one CPU, packed in a byte
#[derive(Debug, Default)]
pub struct StallFlags(AtomicU8);

impl StallFlags {
    /// Both stages unstalled
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Stall `stage`, returning whether it was already stalled
    #[inline]
    pub fn test_and_stall(&self, stage: Stage) -> bool {
        let bit = stage.stall_bit();
        self.0.fetch_or(bit, Ordering::AcqRel) & bit != 0
    }

    /// Stall `stage`
    #[inline]
    pub fn stall(&self, stage: Stage) {
        self.0.fetch_or(stage.stall_bit(), Ordering::AcqRel);
    }

    /// Unstall `stage`, returning whether it was stalled
    #[inline]
    pub fn clear(&self, stage: Stage) -> bool {
        let bit = stage.stall_bit();
        self.0.fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Whether `stage` is stalled
    #[inline]
    pub fn is_stalled(&self, stage: Stage) -> bool {
        self.0.load(Ordering::Acquire) & stage.stall_bit() != 0
    }
}

// ============================================================================
// Trap Frames
// ============================================================================

/// One trap in flight on a CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    /// Trap number passed at entry
    pub number: TrapNumber,
    /// Stage current when the trap was taken
    pub entry_stage: Stage,
}

/// Outcome of popping the trap stack at trap exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapPop {
    /// Innermost frame matched the exiting trap
    Matched(TrapFrame),
    /// Exiting a level that overflowed the frame stack
    Untracked,
    /// Innermost frame belongs to a different trap; it was discarded
    Mismatched(TrapFrame),
    /// No trap in flight
    Empty,
}

#[derive(Debug)]
struct TrapStack {
    frames: Vec<TrapFrame, MAX_TRAP_NESTING>,
    untracked: usize,
}

// ============================================================================
// Per-CPU State
// ============================================================================

/// Pipeline state owned by one CPU
#[derive(Debug)]
pub struct PerCpu {
    id: CpuId,
    /// Virtual interrupt mask for both stages
    pub(crate) stall: StallFlags,
    current: AtomicU8,
    /// IRQs logged for in-band replay
    pub(crate) inband_pending: IrqSet,
    /// IRQs deferred while the out-of-band stage was stalled
    pub(crate) oob_pending: IrqSet,
    traps: Mutex<TrapStack>,
    depth: AtomicUsize,
    pub(crate) counters: CpuCounters,
}

impl PerCpu {
    /// Fresh state: in-band, both stages unstalled, nothing pending
    pub fn new(id: CpuId) -> Self {
        Self {
            id,
            stall: StallFlags::new(),
            current: AtomicU8::new(Stage::InBand as u8),
            inband_pending: IrqSet::new(),
            oob_pending: IrqSet::new(),
            traps: Mutex::new(TrapStack {
                frames: Vec::new(),
                untracked: 0,
            }),
            depth: AtomicUsize::new(0),
            counters: CpuCounters::new(),
        }
    }

    /// CPU this state belongs to
    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Current stage
    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.current.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_stage(&self, stage: Stage) {
        self.current.store(stage as u8, Ordering::Release);
    }

    /// Number of traps in flight
    pub fn trap_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Record trap entry; `false` when the frame stack is full and the
    /// level is tracked by depth only
    ///
    /// The stack lock is only ever held with hard interrupts masked, so an
    /// IRQ handler that faults cannot spin on it.
    pub(crate) fn push_trap<A: ArchFlagBridge>(&self, frame: TrapFrame) -> bool {
        let flags = hard_local_irq_save::<A>();
        let tracked = {
            let mut stack = self.traps.lock();
            self.depth.fetch_add(1, Ordering::AcqRel);
            if stack.untracked == 0 && stack.frames.push(frame).is_ok() {
                true
            } else {
                stack.untracked += 1;
                false
            }
        };
        hard_local_irq_restore::<A>(flags);
        tracked
    }

    /// Record trap exit for `number`
    pub(crate) fn pop_trap<A: ArchFlagBridge>(&self, number: TrapNumber) -> TrapPop {
        let flags = hard_local_irq_save::<A>();
        let popped = {
            let mut stack = self.traps.lock();
            if stack.untracked > 0 {
                stack.untracked -= 1;
                self.depth.fetch_sub(1, Ordering::AcqRel);
                TrapPop::Untracked
            } else {
                match stack.frames.pop() {
                    Some(frame) => {
                        self.depth.fetch_sub(1, Ordering::AcqRel);
                        if frame.number == number {
                            TrapPop::Matched(frame)
                        } else {
                            TrapPop::Mismatched(frame)
                        }
                    }
                    None => TrapPop::Empty,
                }
            }
        };
        hard_local_irq_restore::<A>(flags);
        popped
    }
}
